use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::{GhMatrixError, Result};

/// Operating system family of the machine a matrix job runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerOs {
    Linux,
    Macos,
    Windows,
}

impl RunnerOs {
    /// Map a CI runner label such as `ubuntu-latest` or `macos-14` to its OS family
    pub fn from_runner_label(label: &str) -> Option<Self> {
        let label = label.to_ascii_lowercase();
        if label.starts_with("ubuntu") || label.starts_with("linux") {
            Some(RunnerOs::Linux)
        } else if label.starts_with("macos") {
            Some(RunnerOs::Macos)
        } else if label.starts_with("windows") {
            Some(RunnerOs::Windows)
        } else {
            None
        }
    }

    /// OS family of the machine we are running on
    pub fn host() -> Option<Self> {
        match std::env::consts::OS {
            "linux" => Some(RunnerOs::Linux),
            "macos" => Some(RunnerOs::Macos),
            "windows" => Some(RunnerOs::Windows),
            _ => None,
        }
    }
}

impl fmt::Display for RunnerOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerOs::Linux => write!(f, "linux"),
            RunnerOs::Macos => write!(f, "macos"),
            RunnerOs::Windows => write!(f, "windows"),
        }
    }
}

/// One row of the build matrix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixEntry {
    /// Runner label (`ubuntu-latest`, `macos-latest`, `windows-latest`)
    pub os: String,

    /// Archive base name; the release asset is `<artifact_name>.zip`
    pub artifact_name: String,

    /// Deprecated asset name kept for older download scripts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_name: Option<String>,

    /// Rust target triple
    pub target: String,

    /// Build through `cross` instead of plain cargo
    #[serde(default)]
    pub cross: bool,

    /// OS package providing the linker for this target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linker: Option<String>,
}

impl MatrixEntry {
    pub fn new(os: &str, binary: &str, target: &str) -> Self {
        Self {
            os: os.to_string(),
            artifact_name: format!("{binary}_{target}"),
            legacy_name: None,
            target: target.to_string(),
            cross: false,
            linker: None,
        }
    }

    pub fn with_cross(mut self) -> Self {
        self.cross = true;
        self
    }

    pub fn with_linker(mut self, package: &str) -> Self {
        self.linker = Some(package.to_string());
        self
    }

    pub fn with_legacy_name(mut self, name: &str) -> Self {
        self.legacy_name = Some(name.to_string());
        self
    }

    pub fn runner_os(&self) -> Result<RunnerOs> {
        RunnerOs::from_runner_label(&self.os).ok_or_else(|| {
            GhMatrixError::InvalidMatrix(format!(
                "unknown runner '{}' for {}",
                self.os, self.artifact_name
            ))
        })
    }

    /// File name of the compiled binary for this entry's target
    pub fn binary_file_name(&self, binary: &str) -> String {
        binary_file_name(binary, &self.target)
    }

    pub fn archive_file_name(&self) -> String {
        format!("{}.zip", self.artifact_name)
    }

    pub fn legacy_archive_file_name(&self) -> Option<String> {
        self.legacy_name.as_ref().map(|name| format!("{name}.zip"))
    }
}

/// `eza.exe` on Windows targets, `eza` everywhere else
pub fn binary_file_name(binary: &str, target: &str) -> String {
    if target.contains("windows") {
        format!("{binary}.exe")
    } else {
        binary.to_string()
    }
}

/// The seven release configurations
pub fn default_matrix(binary: &str) -> Vec<MatrixEntry> {
    vec![
        MatrixEntry::new("ubuntu-latest", binary, "x86_64-unknown-linux-gnu")
            .with_legacy_name(&format!("{binary}-linux-x86_64")),
        MatrixEntry::new("ubuntu-latest", binary, "x86_64-unknown-linux-musl")
            .with_linker("musl-tools"),
        MatrixEntry::new("ubuntu-latest", binary, "aarch64-unknown-linux-gnu")
            .with_cross()
            .with_linker("gcc-aarch64-linux-gnu"),
        MatrixEntry::new("ubuntu-latest", binary, "arm-unknown-linux-gnueabihf")
            .with_cross()
            .with_linker("gcc-arm-linux-gnueabihf"),
        MatrixEntry::new("windows-latest", binary, "x86_64-pc-windows-msvc")
            .with_legacy_name(&format!("{binary}-windows-x86_64")),
        MatrixEntry::new("macos-latest", binary, "x86_64-apple-darwin")
            .with_legacy_name(&format!("{binary}-macos-x86_64")),
        MatrixEntry::new("macos-latest", binary, "aarch64-apple-darwin"),
    ]
}

/// Reject matrices whose assets would collide on the release
pub fn validate(entries: &[MatrixEntry]) -> Result<()> {
    if entries.is_empty() {
        return Err(GhMatrixError::InvalidMatrix(
            "the matrix has no entries".to_string(),
        ));
    }

    let mut names = HashSet::new();
    for entry in entries {
        entry.runner_os()?;

        if entry.target.split('-').count() < 3 {
            return Err(GhMatrixError::InvalidMatrix(format!(
                "target '{}' is not a target triple",
                entry.target
            )));
        }

        let own = std::iter::once(&entry.artifact_name).chain(entry.legacy_name.iter());
        for name in own {
            if name.is_empty() {
                return Err(GhMatrixError::InvalidMatrix(format!(
                    "empty artifact name for target {}",
                    entry.target
                )));
            }
            if !names.insert(name.as_str()) {
                return Err(GhMatrixError::InvalidMatrix(format!(
                    "artifact name '{name}' is used more than once"
                )));
            }
        }
    }

    Ok(())
}

/// Which matrix entries a run builds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Entries whose runner OS matches the host
    Host,
    /// Every entry
    All,
    /// Entries with these artifact names
    Named(Vec<String>),
}

impl Selection {
    pub fn from_flags(all: bool, names: Vec<String>) -> Self {
        if !names.is_empty() {
            Selection::Named(names)
        } else if all {
            Selection::All
        } else {
            Selection::Host
        }
    }
}

pub fn select(
    entries: &[MatrixEntry],
    selection: &Selection,
    host: Option<RunnerOs>,
) -> Result<Vec<MatrixEntry>> {
    match selection {
        Selection::All => Ok(entries.to_vec()),
        Selection::Host => {
            let host = host.ok_or_else(|| {
                GhMatrixError::Config(format!(
                    "host OS '{}' has no matching runner; use --all or --entry",
                    std::env::consts::OS
                ))
            })?;
            let mut selected = Vec::new();
            for entry in entries {
                if entry.runner_os()? == host {
                    selected.push(entry.clone());
                } else {
                    tracing::debug!("Skipping {} (runs on {})", entry.artifact_name, entry.os);
                }
            }
            Ok(selected)
        }
        Selection::Named(names) => {
            let mut seen = HashSet::new();
            names
                .iter()
                .filter(|name| seen.insert(name.as_str()))
                .map(|name| {
                    entries
                        .iter()
                        .find(|e| &e.artifact_name == name)
                        .cloned()
                        .ok_or_else(|| {
                            GhMatrixError::InvalidMatrix(format!("no matrix entry named '{name}'"))
                        })
                })
                .collect()
        }
    }
}
