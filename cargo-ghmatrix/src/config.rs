use anyhow::{Context, Result};
use cargo_manifest::Manifest;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::matrix::MatrixEntry;

pub const PROJECT_CONFIG: &str = ".config/ghmatrix.toml";

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub default: DefaultConfig,

    #[serde(default)]
    pub repository: RepositoryConfig,

    /// Replaces the built-in matrix when non-empty
    #[serde(default)]
    pub matrix: Vec<MatrixEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DefaultConfig {
    #[serde(default = "default_true")]
    pub draft: bool,

    #[serde(default)]
    pub binary: Option<String>,

    #[serde(default)]
    pub jobs: Option<usize>,

    #[serde(default = "default_true")]
    pub checksum: bool,

    #[serde(default = "default_true")]
    pub native_rebuild: bool,

    #[serde(default = "default_profile")]
    pub profile: String,
}

impl Default for DefaultConfig {
    fn default() -> Self {
        Self {
            draft: true,
            binary: None,
            jobs: None,
            checksum: true,
            native_rebuild: true,
            profile: default_profile(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct RepositoryConfig {
    pub owner: Option<String>,
    pub repo: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_profile() -> String {
    "release".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Load an explicit config file, or the project file falling back to the user-wide one
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let project = PathBuf::from(PROJECT_CONFIG);
        if project.exists() {
            tracing::debug!("Using project config {}", project.display());
            return Self::load(&project);
        }

        let user = Self::default_path();
        tracing::debug!("Using user config {}", user.display());
        Self::load(&user)
    }

    /// Get the user-wide configuration file path
    pub fn default_path() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("ghmatrix.toml"))
            .unwrap_or_else(|| PathBuf::from("~/.config/ghmatrix.toml"))
    }

    /// Fill in whatever the command line left unset
    pub fn merge_with_args(&self, args: &mut crate::cli::Args) {
        if args.binary.is_none() {
            args.binary = self.default.binary.clone();
        }

        if args.profile.is_none() {
            args.profile = Some(self.default.profile.clone());
        }

        if args.jobs.is_none() {
            args.jobs = self.default.jobs;
        }

        if !self.default.draft {
            args.no_draft = true;
        }

        if !self.default.checksum {
            args.no_checksum = true;
        }

        if args.repository.is_none() {
            if let (Some(owner), Some(repo)) = (&self.repository.owner, &self.repository.repo) {
                args.repository = Some(format!("{owner}/{repo}"));
            }
        }
    }
}

/// Name of the binary the package builds: the first `[[bin]]`, else the package name
pub fn detect_binary_name(manifest_path: &Path) -> Option<String> {
    let manifest = Manifest::from_path(manifest_path).ok()?;
    let package = manifest.package?;

    let bin = manifest
        .bin
        .first()
        .and_then(|bin| bin.name.clone())
        .unwrap_or(package.name);
    Some(bin)
}
