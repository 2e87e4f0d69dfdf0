use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::release::ReleaseRecord;

pub const MANIFEST_FILE: &str = "dist-manifest.json";

/// Record of one pipeline run, written next to the archives it describes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistManifest {
    pub release: ReleaseRecord,
    /// Base binary name the archives carry
    pub binary: String,
    pub jobs: Vec<JobRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksums: Option<String>,
    /// Set when the checksum file could not be attached to the release
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum_upload_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub artifact_name: String,
    pub target: String,
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_name: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: JobStatus,
    #[serde(default)]
    pub archives: Vec<ArchiveRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum JobStatus {
    Succeeded,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub file_name: String,
    pub sha256: String,
    #[serde(default)]
    pub legacy: bool,
    #[serde(default)]
    pub uploaded: bool,
}

impl JobRecord {
    pub fn succeeded(&self) -> bool {
        self.status == JobStatus::Succeeded
    }
}

impl DistManifest {
    pub fn failed_jobs(&self) -> impl Iterator<Item = &JobRecord> {
        self.jobs.iter().filter(|job| !job.succeeded())
    }

    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!("Wrote run manifest: {}", path.display());
        Ok(path)
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("Failed to parse {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_failed_status_is_tagged() {
        let status = JobStatus::Failed {
            error: "Step 'build' failed for target arm-unknown-linux-gnueabihf".to_string(),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "failed");
        assert!(json["error"].as_str().unwrap().contains("arm-unknown"));

        let ok = serde_json::to_value(JobStatus::Succeeded).unwrap();
        assert_eq!(ok, serde_json::json!({ "state": "succeeded" }));
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempdir().unwrap();
        let now = Utc::now();
        let manifest = DistManifest {
            release: ReleaseRecord::dry_run("v0.18.0", true),
            binary: "eza".to_string(),
            jobs: vec![JobRecord {
                artifact_name: "eza_aarch64-apple-darwin".to_string(),
                target: "aarch64-apple-darwin".to_string(),
                os: "macos-latest".to_string(),
                legacy_name: None,
                started_at: now,
                finished_at: now,
                status: JobStatus::Failed {
                    error: "boom".to_string(),
                },
                archives: Vec::new(),
            }],
            checksums: None,
            checksum_upload_error: None,
        };

        manifest.write(dir.path()).unwrap();
        let loaded = DistManifest::load(dir.path()).unwrap();

        assert_eq!(loaded.release, manifest.release);
        assert_eq!(loaded.failed_jobs().count(), 1);
    }
}
