use anyhow::Result;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::error::{GhMatrixError, Result as GhResult};
use crate::matrix::{MatrixEntry, RunnerOs};
use crate::packager;
use crate::release::ReleaseHandle;

/// Settings shared by every matrix job of a run
#[derive(Debug, Clone)]
pub struct BuildSettings {
    /// Base name of the binary (`eza`)
    pub binary: String,
    /// Cargo profile to build with
    pub profile: String,
    /// Run the plain cargo build after the helper build
    pub native_rebuild: bool,
    /// Cargo's target directory
    pub cargo_target_dir: PathBuf,
    /// Where release archives are written
    pub dist_dir: PathBuf,
    /// Where workflow artifacts are stored
    pub artifact_dir: PathBuf,
    /// Log commands and skip GitHub calls instead of executing them
    pub dry_run: bool,
}

impl BuildSettings {
    fn profile_args(&self) -> Vec<String> {
        if self.profile == "release" {
            vec!["--release".to_string()]
        } else {
            vec!["--profile".to_string(), self.profile.clone()]
        }
    }

    fn profile_dir(&self) -> &str {
        match self.profile.as_str() {
            "dev" => "debug",
            other => other,
        }
    }

    /// Location cargo writes the entry's binary to
    pub fn binary_path(&self, entry: &MatrixEntry) -> PathBuf {
        self.cargo_target_dir
            .join(&entry.target)
            .join(self.profile_dir())
            .join(entry.binary_file_name(&self.binary))
    }
}

/// An external command, kept as data so plans can be inspected before running
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment, on top of the inherited one
    pub envs: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.envs {
            write!(f, "{key}={value} ")?;
        }
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// The steps of one matrix job, in execution order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    AddTarget,
    InstallCross,
    InstallLinker(String),
    HelperBuild,
    NativeBuild,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::AddTarget => "install target",
            Step::InstallCross => "install cross",
            Step::InstallLinker(_) => "install linker",
            Step::HelperBuild => "build",
            Step::NativeBuild => "native build",
        }
    }
}

pub fn plan_steps(entry: &MatrixEntry, settings: &BuildSettings) -> Vec<Step> {
    let mut steps = vec![Step::AddTarget];
    if entry.cross {
        steps.push(Step::InstallCross);
    }
    if let Some(package) = &entry.linker {
        steps.push(Step::InstallLinker(package.clone()));
    }
    steps.push(Step::HelperBuild);
    if settings.native_rebuild {
        steps.push(Step::NativeBuild);
    }
    steps
}

/// Package manager invocation for the runner's OS
pub fn package_install_commands(os: RunnerOs, package: &str) -> Vec<CommandSpec> {
    match os {
        RunnerOs::Linux => vec![
            CommandSpec::new("sudo").args(["apt-get", "update"]),
            CommandSpec::new("sudo").args(["apt-get", "install", "-y", package]),
        ],
        RunnerOs::Macos => vec![CommandSpec::new("brew").args(["install", package])],
        RunnerOs::Windows => vec![CommandSpec::new("choco").args(["install", "-y", package])],
    }
}

pub fn step_commands(
    step: &Step,
    entry: &MatrixEntry,
    settings: &BuildSettings,
    os: RunnerOs,
) -> Vec<CommandSpec> {
    match step {
        Step::AddTarget => vec![CommandSpec::new("rustup").args(["target", "add", entry.target.as_str()])],
        Step::InstallCross => {
            vec![CommandSpec::new("cargo").args(["install", "cross", "--locked"])]
        }
        Step::InstallLinker(package) => package_install_commands(os, package),
        Step::HelperBuild => {
            let program = if entry.cross { "cross" } else { "cargo" };
            vec![build_command(program, entry, settings)]
        }
        Step::NativeBuild => vec![build_command("cargo", entry, settings)],
    }
}

fn build_command(program: &str, entry: &MatrixEntry, settings: &BuildSettings) -> CommandSpec {
    let mut cmd = CommandSpec::new(program)
        .args(["build", "--target", entry.target.as_str()])
        .args(settings.profile_args())
        .args(["--bin", settings.binary.as_str()]);

    if settings.cargo_target_dir != Path::new("target") {
        cmd = cmd
            .arg("--target-dir")
            .arg(settings.cargo_target_dir.to_string_lossy());
    }

    // cross brings its own toolchain; plain cargo has to be pointed at the installed gcc
    if program == "cargo" {
        if let Some(linker) = entry.linker.as_deref().and_then(linker_command) {
            cmd = cmd.env(linker_env_var(&entry.target), linker);
        }
    }
    cmd
}

/// `gcc-aarch64-linux-gnu` installs `aarch64-linux-gnu-gcc`
pub fn linker_command(package: &str) -> Option<String> {
    package
        .strip_prefix("gcc-")
        .map(|triple| format!("{triple}-gcc"))
}

/// Cargo's per-target linker variable, e.g. `CARGO_TARGET_AARCH64_UNKNOWN_LINUX_GNU_LINKER`
pub fn linker_env_var(target: &str) -> String {
    format!(
        "CARGO_TARGET_{}_LINKER",
        target.to_ascii_uppercase().replace(['-', '.'], "_")
    )
}

fn command_on_path(program: &str) -> bool {
    let exe = if cfg!(windows) {
        format!("{program}.exe")
    } else {
        program.to_string()
    };

    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(&exe).is_file()))
        .unwrap_or(false)
}

async fn run_step(
    step: &Step,
    entry: &MatrixEntry,
    settings: &BuildSettings,
    os: RunnerOs,
) -> GhResult<()> {
    if *step == Step::InstallCross && !settings.dry_run && command_on_path("cross") {
        tracing::debug!("cross is already installed");
        return Ok(());
    }

    for spec in step_commands(step, entry, settings, os) {
        if settings.dry_run {
            tracing::info!("[dry-run] {}", spec);
            continue;
        }

        tracing::info!("Running: {}", spec);
        let status = Command::new(&spec.program)
            .args(&spec.args)
            .envs(spec.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .status()
            .await
            .map_err(|e| {
                tracing::error!("Failed to spawn {}: {}", spec.program, e);
                GhMatrixError::StepFailed {
                    target: entry.target.clone(),
                    step: step.name().to_string(),
                }
            })?;

        if !status.success() {
            return Err(GhMatrixError::StepFailed {
                target: entry.target.clone(),
                step: step.name().to_string(),
            });
        }
    }

    Ok(())
}

/// Files a finished matrix job produced
#[derive(Debug, Clone)]
pub struct JobOutput {
    pub archive: PathBuf,
    pub legacy_archive: Option<PathBuf>,
    pub workflow_artifact: PathBuf,
    pub uploaded: bool,
}

/// Run one matrix job: toolchain setup, both builds, packaging and uploads
pub async fn run_job(
    entry: &MatrixEntry,
    settings: &BuildSettings,
    release: Option<&ReleaseHandle>,
) -> Result<JobOutput> {
    let os = entry.runner_os()?;

    for step in plan_steps(entry, settings) {
        tracing::debug!("Step: {}", step.name());
        run_step(&step, entry, settings, os).await?;
    }

    let binary = settings.binary_path(entry);
    if !binary.is_file() {
        return Err(GhMatrixError::BinaryNotFound {
            binary: entry.binary_file_name(&settings.binary),
            path: binary.display().to_string(),
        }
        .into());
    }

    let archive = packager::create_zip(&binary, &settings.dist_dir, &entry.artifact_name)?;
    let workflow_artifact =
        packager::stage_artifact(&archive, &settings.artifact_dir, &entry.artifact_name)?;

    if let Some(release) = release {
        release.upload(&archive).await?;
    }

    let legacy_archive = match &entry.legacy_name {
        Some(alias) => {
            let path = packager::duplicate_archive(&archive, alias)?;
            if let Some(release) = release {
                release.upload(&path).await?;
            }
            Some(path)
        }
        None => None,
    };

    Ok(JobOutput {
        archive,
        legacy_archive,
        workflow_artifact,
        uploaded: release.is_some(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packager::{inspect_zip, sha256_file};
    use std::fs;
    use tempfile::tempdir;

    fn settings(root: &Path) -> BuildSettings {
        BuildSettings {
            binary: "eza".to_string(),
            profile: "release".to_string(),
            native_rebuild: true,
            cargo_target_dir: root.join("target"),
            dist_dir: root.join("dist"),
            artifact_dir: root.join("dist").join("artifacts"),
            dry_run: true,
        }
    }

    fn arm_entry() -> MatrixEntry {
        MatrixEntry::new("ubuntu-latest", "eza", "arm-unknown-linux-gnueabihf")
            .with_cross()
            .with_linker("gcc-arm-linux-gnueabihf")
    }

    #[test]
    fn test_plan_for_cross_entry() {
        let dir = tempdir().unwrap();
        let steps = plan_steps(&arm_entry(), &settings(dir.path()));
        assert_eq!(
            steps,
            vec![
                Step::AddTarget,
                Step::InstallCross,
                Step::InstallLinker("gcc-arm-linux-gnueabihf".to_string()),
                Step::HelperBuild,
                Step::NativeBuild,
            ]
        );
    }

    #[test]
    fn test_plan_without_native_rebuild() {
        let dir = tempdir().unwrap();
        let mut settings = settings(dir.path());
        settings.native_rebuild = false;

        let entry = MatrixEntry::new("macos-latest", "eza", "aarch64-apple-darwin");
        assert_eq!(
            plan_steps(&entry, &settings),
            vec![Step::AddTarget, Step::HelperBuild]
        );
    }

    #[test]
    fn test_helper_build_uses_cross_and_native_uses_cargo() {
        let settings = BuildSettings {
            cargo_target_dir: PathBuf::from("target"),
            ..settings(Path::new("/tmp"))
        };
        let entry = arm_entry();

        let helper = step_commands(&Step::HelperBuild, &entry, &settings, RunnerOs::Linux);
        assert_eq!(
            helper[0].to_string(),
            "cross build --target arm-unknown-linux-gnueabihf --release --bin eza"
        );

        let native = step_commands(&Step::NativeBuild, &entry, &settings, RunnerOs::Linux);
        assert_eq!(native[0].program, "cargo");
    }

    #[test]
    fn test_native_build_links_with_installed_gcc() {
        let settings = BuildSettings {
            cargo_target_dir: PathBuf::from("target"),
            ..settings(Path::new("/tmp"))
        };
        let entry = MatrixEntry::new("ubuntu-latest", "eza", "aarch64-unknown-linux-gnu")
            .with_cross()
            .with_linker("gcc-aarch64-linux-gnu");

        let native = step_commands(&Step::NativeBuild, &entry, &settings, RunnerOs::Linux);
        assert_eq!(
            native[0].envs,
            vec![(
                "CARGO_TARGET_AARCH64_UNKNOWN_LINUX_GNU_LINKER".to_string(),
                "aarch64-linux-gnu-gcc".to_string()
            )]
        );
        assert!(native[0]
            .to_string()
            .starts_with("CARGO_TARGET_AARCH64_UNKNOWN_LINUX_GNU_LINKER=aarch64-linux-gnu-gcc cargo build"));

        let helper = step_commands(&Step::HelperBuild, &entry, &settings, RunnerOs::Linux);
        assert!(helper[0].envs.is_empty());

        let musl = MatrixEntry::new("ubuntu-latest", "eza", "x86_64-unknown-linux-musl")
            .with_linker("musl-tools");
        let native = step_commands(&Step::NativeBuild, &musl, &settings, RunnerOs::Linux);
        assert!(native[0].envs.is_empty());

        assert_eq!(
            linker_env_var("arm-unknown-linux-gnueabihf"),
            "CARGO_TARGET_ARM_UNKNOWN_LINUX_GNUEABIHF_LINKER"
        );
        assert_eq!(
            linker_command("gcc-arm-linux-gnueabihf").as_deref(),
            Some("arm-linux-gnueabihf-gcc")
        );
    }

    #[test]
    fn test_linker_install_is_os_specific() {
        let linux = package_install_commands(RunnerOs::Linux, "musl-tools");
        assert_eq!(linux.last().unwrap().to_string(), "sudo apt-get install -y musl-tools");

        let mac = package_install_commands(RunnerOs::Macos, "llvm");
        assert_eq!(mac[0].to_string(), "brew install llvm");

        let windows = package_install_commands(RunnerOs::Windows, "mingw");
        assert_eq!(windows[0].to_string(), "choco install -y mingw");
    }

    #[test]
    fn test_binary_path_follows_profile() {
        let root = Path::new("/work");
        let mut settings = settings(root);
        let entry = MatrixEntry::new("windows-latest", "eza", "x86_64-pc-windows-msvc");
        assert_eq!(
            settings.binary_path(&entry),
            root.join("target/x86_64-pc-windows-msvc/release/eza.exe")
        );

        settings.profile = "dev".to_string();
        assert_eq!(
            settings.binary_path(&entry),
            root.join("target/x86_64-pc-windows-msvc/debug/eza.exe")
        );
    }

    #[tokio::test]
    async fn test_dry_run_job_packages_and_aliases() {
        let dir = tempdir().unwrap();
        let settings = settings(dir.path());
        let entry = MatrixEntry::new("ubuntu-latest", "eza", "x86_64-unknown-linux-gnu")
            .with_legacy_name("eza-linux-x86_64");

        let binary = settings.binary_path(&entry);
        fs::create_dir_all(binary.parent().unwrap()).unwrap();
        fs::write(&binary, b"binary").unwrap();

        let output = run_job(&entry, &settings, None).await.unwrap();

        assert!(!output.uploaded);
        assert_eq!(inspect_zip(&output.archive).unwrap(), vec!["eza".to_string()]);
        let legacy = output.legacy_archive.unwrap();
        assert_eq!(legacy.file_name().unwrap(), "eza-linux-x86_64.zip");
        assert_eq!(sha256_file(&legacy).unwrap(), sha256_file(&output.archive).unwrap());
        assert!(output
            .workflow_artifact
            .starts_with(dir.path().join("dist/artifacts/eza_x86_64-unknown-linux-gnu")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_step_fails_the_job() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let bin = dir.path().join("bin");
        fs::create_dir_all(&bin).unwrap();
        let rustup = bin.join("rustup");
        fs::write(&rustup, "#!/bin/sh\nexit 1\n").unwrap();
        fs::set_permissions(&rustup, fs::Permissions::from_mode(0o755)).unwrap();

        let original = std::env::var_os("PATH").unwrap_or_default();
        let mut dirs = vec![bin];
        dirs.extend(std::env::split_paths(&original));
        std::env::set_var("PATH", std::env::join_paths(dirs).unwrap());

        let mut settings = settings(dir.path());
        settings.dry_run = false;
        let entry = MatrixEntry::new("ubuntu-latest", "eza", "x86_64-unknown-linux-gnu");
        let result = run_job(&entry, &settings, None).await;
        std::env::set_var("PATH", original);

        let err = result.unwrap_err();
        match err.downcast_ref::<GhMatrixError>() {
            Some(GhMatrixError::StepFailed { target, step }) => {
                assert_eq!(target, "x86_64-unknown-linux-gnu");
                assert_eq!(step, "install target");
            }
            other => panic!("expected a failed step, got {other:?}"),
        }
        assert!(!settings.dist_dir.join("eza_x86_64-unknown-linux-gnu.zip").exists());
    }

    #[tokio::test]
    async fn test_job_without_binary_fails() {
        let dir = tempdir().unwrap();
        let entry = MatrixEntry::new("macos-latest", "eza", "aarch64-apple-darwin");

        let err = run_job(&entry, &settings(dir.path()), None).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
