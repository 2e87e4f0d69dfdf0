use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::builder::{run_job, BuildSettings, JobOutput};
use crate::cli::Args;
use crate::config::{detect_binary_name, Config};
use crate::github::GitHubClient;
use crate::lock::RunLock;
use crate::manifest::{ArchiveRecord, DistManifest, JobRecord, JobStatus};
use crate::matrix::{self, MatrixEntry, RunnerOs};
use crate::packager;
use crate::release::{detect_trigger, ReleaseHandle, ReleaseRecord, Trigger};
use crate::retry::RetryConfig;

const LOCK_POLL: Duration = Duration::from_secs(5);
const LOCK_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// The release a run uploads to
pub enum ReleaseTarget {
    /// Nothing is sent to GitHub
    DryRun(ReleaseRecord),
    Live(ReleaseHandle),
}

impl ReleaseTarget {
    pub fn record(&self) -> &ReleaseRecord {
        match self {
            ReleaseTarget::DryRun(record) => record,
            ReleaseTarget::Live(handle) => &handle.record,
        }
    }

    pub fn handle(&self) -> Option<&ReleaseHandle> {
        match self {
            ReleaseTarget::DryRun(_) => None,
            ReleaseTarget::Live(handle) => Some(handle),
        }
    }
}

/// Which part of a run `run_jobs` is serving
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Release and matrix in one process
    Full,
    /// One runner's share of a run split across CI jobs
    MatrixOnly,
}

impl Stage {
    /// A split runner only sees its own archives, so its SHA256SUMS stays local
    fn publishes_checksums(self) -> bool {
        self == Stage::Full
    }
}

/// Resolved configuration: the merged args plus the matrix they apply to
pub struct Resolved {
    pub args: Args,
    pub binary: String,
    pub matrix: Vec<MatrixEntry>,
    pub native_rebuild: bool,
}

/// Load config, merge it under the command line and build the matrix
pub fn resolve(mut args: Args) -> Result<Resolved> {
    let config = Config::discover(args.config.as_deref())?;
    config.merge_with_args(&mut args);

    let binary = args
        .binary
        .clone()
        .or_else(|| detect_binary_name(Path::new("Cargo.toml")))
        .unwrap_or_else(|| "eza".to_string());

    let matrix = if config.matrix.is_empty() {
        matrix::default_matrix(&binary)
    } else {
        config.matrix
    };
    matrix::validate(&matrix)?;

    Ok(Resolved {
        args,
        binary,
        matrix,
        native_rebuild: config.default.native_rebuild,
    })
}

/// Default dist directory for a tag
pub fn default_dist_dir(args: &Args, tag: &str) -> PathBuf {
    args.dist_dir.clone().unwrap_or_else(|| {
        args.target_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("target"))
            .join("dist")
            .join(tag)
    })
}

pub struct Pipeline {
    args: Args,
    trigger: Trigger,
    matrix: Vec<MatrixEntry>,
    settings: Arc<BuildSettings>,
    retry: RetryConfig,
}

impl Pipeline {
    pub fn new(args: Args) -> Result<Self> {
        let resolved = resolve(args)?;
        let args = resolved.args;

        let trigger = detect_trigger(args.tag.as_deref(), Path::new("."))?;
        tracing::info!("Trigger: {:?}", trigger);

        let dist_dir = default_dist_dir(&args, trigger.tag());
        let settings = BuildSettings {
            binary: resolved.binary,
            profile: args.profile.clone().unwrap_or_else(|| "release".to_string()),
            native_rebuild: resolved.native_rebuild,
            cargo_target_dir: args.target_dir.clone().unwrap_or_else(|| PathBuf::from("target")),
            artifact_dir: dist_dir.join("artifacts"),
            dist_dir,
            dry_run: args.dry_run,
        };

        Ok(Self {
            args,
            trigger,
            matrix: resolved.matrix,
            settings: Arc::new(settings),
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn tag(&self) -> &str {
        self.trigger.tag()
    }

    pub fn dist_dir(&self) -> &Path {
        &self.settings.dist_dir
    }

    fn client(&self) -> Result<(Arc<GitHubClient>, String, String)> {
        let (owner, repo) = self.args.parse_repository()?;
        let client = GitHubClient::new(self.args.github_token.clone())?;
        Ok((Arc::new(client), owner, repo))
    }

    /// Release Creator: create (or reuse) the draft release for the tag
    pub async fn create_release(&self) -> Result<ReleaseTarget> {
        if self.args.dry_run {
            tracing::info!("[dry-run] Would create release {}", self.tag());
            return Ok(ReleaseTarget::DryRun(ReleaseRecord::dry_run(
                self.tag(),
                self.args.draft(),
            )));
        }

        let (client, owner, repo) = self.client()?;
        tracing::info!("Repository: {}/{}", owner, repo);

        let handle = ReleaseHandle::create(
            client,
            &owner,
            &repo,
            &self.trigger,
            self.args.draft(),
            self.retry.clone(),
        )
        .await?;
        Ok(ReleaseTarget::Live(handle))
    }

    /// Attach to a release an earlier stage created
    pub async fn attach_release(&self, upload_url: Option<&str>) -> Result<ReleaseTarget> {
        if self.args.dry_run {
            return Ok(ReleaseTarget::DryRun(ReleaseRecord::dry_run(
                self.tag(),
                self.args.draft(),
            )));
        }

        let (client, owner, repo) = self.client()?;
        let record = match upload_url {
            Some(url) => {
                let attached = ReleaseRecord::from_upload_url(self.tag(), url)?;
                match client.get_release(&owner, &repo, attached.id).await {
                    Ok(release) => ReleaseRecord::from_release(&release),
                    Err(e) => {
                        tracing::warn!("Could not look up release {}: {}", attached.id, e);
                        attached
                    }
                }
            }
            None => {
                let release = client
                    .find_release_by_tag(&owner, &repo, self.tag())
                    .await?
                    .with_context(|| {
                        format!(
                            "No release for tag {} in {}/{}; run `cargo ghmatrix release` first",
                            self.tag(),
                            owner,
                            repo
                        )
                    })?;
                ReleaseRecord::from_release(&release)
            }
        };

        Ok(ReleaseTarget::Live(ReleaseHandle {
            client,
            owner,
            repo,
            record,
            retry: self.retry.clone(),
        }))
    }

    async fn lock(&self) -> Result<RunLock> {
        Ok(RunLock::acquire(self.dist_dir(), self.tag(), LOCK_POLL, Some(LOCK_TIMEOUT)).await?)
    }

    /// Full run: release first, then every selected matrix job
    pub async fn run(&self) -> Result<DistManifest> {
        let _lock = self.lock().await?;
        let release = self.create_release().await?;
        self.run_jobs(release, Stage::Full).await
    }

    /// Matrix stage only, against an existing release
    pub async fn run_matrix(&self, release: ReleaseTarget) -> Result<DistManifest> {
        let _lock = self.lock().await?;
        self.run_jobs(release, Stage::MatrixOnly).await
    }

    async fn run_jobs(&self, release: ReleaseTarget, stage: Stage) -> Result<DistManifest> {
        let selected = matrix::select(&self.matrix, &self.args.selection(), RunnerOs::host())?;
        if selected.is_empty() {
            anyhow::bail!("No matrix entries selected for this host; use --all or --entry");
        }
        fs::create_dir_all(self.dist_dir())?;

        let limit = self.args.jobs.unwrap_or(selected.len()).max(1);
        tracing::info!(
            "Running {} matrix jobs for {} (up to {} at once)",
            selected.len(),
            self.tag(),
            limit
        );

        let release = Arc::new(release);
        let permits = Arc::new(Semaphore::new(limit));
        let mut set = JoinSet::new();

        for (index, entry) in selected.iter().cloned().enumerate() {
            let settings = self.settings.clone();
            let release = release.clone();
            let permits = permits.clone();
            let span = tracing::info_span!("job", artifact = %entry.artifact_name);

            set.spawn(
                async move {
                    let _permit = permits.acquire_owned().await.ok();
                    let record = run_entry(&entry, &settings, release.handle()).await;
                    (index, record)
                }
                .instrument(span),
            );
        }

        let mut records: HashMap<usize, JobRecord> = HashMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, record)) => {
                    records.insert(index, record);
                }
                Err(e) => tracing::error!("Matrix job aborted: {}", e),
            }
        }

        let jobs: Vec<JobRecord> = selected
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                records
                    .remove(&index)
                    .unwrap_or_else(|| aborted_record(entry))
            })
            .collect();

        let mut manifest = DistManifest {
            release: release.record().clone(),
            binary: self.settings.binary.clone(),
            jobs,
            checksums: None,
            checksum_upload_error: None,
        };

        let checksum_file = if self.args.no_checksum {
            None
        } else {
            self.write_checksums(&manifest)?
        };
        manifest.checksums = checksum_file
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned());

        if let (Some(path), Some(handle)) = (&checksum_file, release.handle()) {
            if stage.publishes_checksums() {
                let result = handle.upload(path).await;
                record_checksum_upload(&mut manifest, result);
            } else {
                tracing::info!(
                    "Keeping {} local; it covers only this runner's archives",
                    path.display()
                );
            }
        }
        manifest.write(self.dist_dir())?;

        let failed = manifest.failed_jobs().count();
        tracing::info!(
            "{} of {} matrix jobs succeeded",
            manifest.jobs.len() - failed,
            manifest.jobs.len()
        );
        if let Some(handle) = release.handle() {
            tracing::info!("Release URL: {}", handle.record.html_url);
        }

        Ok(manifest)
    }

    fn write_checksums(&self, manifest: &DistManifest) -> Result<Option<PathBuf>> {
        let files: Vec<PathBuf> = manifest
            .jobs
            .iter()
            .flat_map(|job| job.archives.iter())
            .map(|archive| self.dist_dir().join(&archive.file_name))
            .collect();

        if files.is_empty() {
            return Ok(None);
        }
        Ok(Some(packager::generate_checksums(&files, self.dist_dir())?))
    }
}

async fn run_entry(
    entry: &MatrixEntry,
    settings: &BuildSettings,
    release: Option<&ReleaseHandle>,
) -> JobRecord {
    let started_at = Utc::now();
    tracing::info!("Building {} on {}", entry.target, entry.os);

    let result = run_job(entry, settings, release)
        .await
        .and_then(|output| archive_records(&output));

    let (status, archives) = match result {
        Ok(archives) => {
            tracing::info!("Finished {}", entry.artifact_name);
            (JobStatus::Succeeded, archives)
        }
        Err(e) => {
            tracing::error!("Failed to build {}: {:#}", entry.artifact_name, e);
            (
                JobStatus::Failed {
                    error: format!("{e:#}"),
                },
                Vec::new(),
            )
        }
    };

    JobRecord {
        artifact_name: entry.artifact_name.clone(),
        target: entry.target.clone(),
        os: entry.os.clone(),
        legacy_name: entry.legacy_name.clone(),
        started_at,
        finished_at: Utc::now(),
        status,
        archives,
    }
}

fn archive_records(output: &JobOutput) -> Result<Vec<ArchiveRecord>> {
    let primary = std::iter::once((&output.archive, false));
    let legacy = output.legacy_archive.iter().map(|path| (path, true));

    primary
        .chain(legacy)
        .map(|(path, legacy)| -> Result<ArchiveRecord> {
            Ok(ArchiveRecord {
                file_name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                sha256: packager::sha256_file(path)?,
                legacy,
                uploaded: output.uploaded,
            })
        })
        .collect()
}

/// The jobs already ran; a checksum upload failure is reported, not fatal
fn record_checksum_upload(manifest: &mut DistManifest, result: Result<()>) {
    if let Err(e) = result {
        tracing::warn!("Failed to upload checksums: {:#}", e);
        manifest.checksum_upload_error = Some(format!("{e:#}"));
    }
}

fn aborted_record(entry: &MatrixEntry) -> JobRecord {
    let now = Utc::now();
    JobRecord {
        artifact_name: entry.artifact_name.clone(),
        target: entry.target.clone(),
        os: entry.os.clone(),
        legacy_name: entry.legacy_name.clone(),
        started_at: now,
        finished_at: now,
        status: JobStatus::Failed {
            error: "job aborted before reporting".to_string(),
        },
        archives: Vec::new(),
    }
}
