use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use git2::Repository;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use crate::error::GhMatrixError;
use crate::github::{release_id_from_upload_url, upload_endpoint, GitHubClient};
use crate::retry::{with_retry, RetryConfig};

/// What started the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// A tag pointing at HEAD
    TagPush { tag: String },
    /// Explicitly requested, named after `--tag` or the current ref
    ManualDispatch { tag: String },
}

impl Trigger {
    pub fn tag(&self) -> &str {
        match self {
            Trigger::TagPush { tag } | Trigger::ManualDispatch { tag } => tag,
        }
    }
}

/// Work out the trigger from an explicit tag or from the repository at `repo_path`
pub fn detect_trigger(explicit_tag: Option<&str>, repo_path: &Path) -> Result<Trigger> {
    if let Some(tag) = explicit_tag {
        return Ok(Trigger::ManualDispatch {
            tag: tag.to_string(),
        });
    }

    let repo = Repository::discover(repo_path).context(
        "Failed to find git repository. Run from a checkout or pass --tag explicitly",
    )?;
    let head = repo.head().context("Failed to get git HEAD")?;
    let oid = head.peel_to_commit()?.id();

    let tags = repo.tag_names(None).context("Failed to get git tags")?;
    for tag in tags.iter().flatten() {
        let Ok(object) = repo.revparse_single(tag) else {
            continue;
        };
        if object.peel_to_commit().map(|c| c.id()).ok() == Some(oid) {
            return Ok(Trigger::TagPush {
                tag: tag.to_string(),
            });
        }
    }

    if head.is_branch() {
        if let Some(branch) = head.shorthand() {
            tracing::warn!(
                "No tag on HEAD; naming the release after the current ref '{}'",
                branch
            );
            return Ok(Trigger::ManualDispatch {
                tag: branch.to_string(),
            });
        }
    }

    Err(GhMatrixError::NoTag.into())
}

/// The release every matrix job uploads to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    pub tag: String,
    pub id: u64,
    pub draft: bool,
    /// Upload endpoint without the URI template suffix
    pub upload_url: String,
    pub html_url: String,
    /// When GitHub created the release; unknown for a release attached by URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ReleaseRecord {
    pub fn from_release(release: &octocrab::models::repos::Release) -> Self {
        Self {
            tag: release.tag_name.clone(),
            id: release.id.0,
            draft: release.draft,
            upload_url: upload_endpoint(&release.upload_url).to_string(),
            html_url: release.html_url.to_string(),
            created_at: release.created_at,
        }
    }

    /// Record for a release handed over by an earlier stage via its upload URL
    pub fn from_upload_url(tag: &str, upload_url: &str) -> Result<Self> {
        let id = release_id_from_upload_url(upload_url).ok_or_else(|| {
            GhMatrixError::Config(format!("Cannot find a release id in '{upload_url}'"))
        })?;

        Ok(Self {
            tag: tag.to_string(),
            id,
            draft: true,
            upload_url: upload_endpoint(upload_url).to_string(),
            html_url: String::new(),
            created_at: None,
        })
    }

    /// Stand-in record used when nothing is sent to GitHub
    pub fn dry_run(tag: &str, draft: bool) -> Self {
        Self {
            tag: tag.to_string(),
            id: 0,
            draft,
            upload_url: String::new(),
            html_url: String::new(),
            created_at: Some(Utc::now()),
        }
    }
}

/// Append the release outputs in `key=value` form (the `$GITHUB_OUTPUT` format)
pub fn publish_output(record: &ReleaseRecord, path: &Path) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open output file {}", path.display()))?;

    writeln!(file, "upload_url={}", record.upload_url)?;
    writeln!(file, "release_id={}", record.id)?;
    writeln!(file, "tag={}", record.tag)?;
    Ok(())
}

/// A created release plus what is needed to upload to it
pub struct ReleaseHandle {
    pub client: Arc<GitHubClient>,
    pub owner: String,
    pub repo: String,
    pub record: ReleaseRecord,
    pub retry: RetryConfig,
}

impl ReleaseHandle {
    /// Create (or reuse) the release for the trigger's tag
    pub async fn create(
        client: Arc<GitHubClient>,
        owner: &str,
        repo: &str,
        trigger: &Trigger,
        draft: bool,
        retry: RetryConfig,
    ) -> Result<Self> {
        let tag = trigger.tag();
        let release = with_retry(&format!("Creating release {tag}"), &retry, || {
            let client = client.clone();
            async move {
                client
                    .create_release(owner, repo, tag, draft, None)
                    .await
                    .map_err(anyhow::Error::from)
            }
        })
        .await?;

        let record = ReleaseRecord::from_release(&release);
        tracing::info!("Release ready: {} (upload endpoint {})", record.tag, record.upload_url);

        Ok(Self {
            client,
            owner: owner.to_string(),
            repo: repo.to_string(),
            record,
            retry,
        })
    }

    /// Upload a file as a release asset, replacing a stale asset of the same name
    pub async fn upload(&self, path: &Path) -> Result<()> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| GhMatrixError::AssetUpload(format!("Invalid asset path: {}", path.display())))?;

        with_retry(&format!("Uploading {name}"), &self.retry, move || async move {
            self.replace_asset(path, name).await.map_err(anyhow::Error::from)
        })
        .await
    }

    async fn replace_asset(&self, path: &Path, name: &str) -> crate::error::Result<()> {
        if let Some(asset_id) = self
            .client
            .asset_exists(&self.owner, &self.repo, self.record.id, name)
            .await?
        {
            tracing::info!("Deleting existing asset: {}", name);
            self.client.delete_asset(&self.owner, &self.repo, asset_id).await?;
        }

        self.client
            .upload_asset(&self.record.upload_url, path, name)
            .await
    }
}
