//! Structural checks over a finished dist directory.
//!
//! A healthy run created its release before any job started, produced exactly
//! one archive per successful entry holding exactly one correctly named
//! binary, and wrote alias archives that are byte-identical to their primary.

use anyhow::Result;
use std::path::Path;

use crate::manifest::{ArchiveRecord, DistManifest, JobRecord};
use crate::matrix::binary_file_name;
use crate::packager::{inspect_zip, sha256_file};

#[derive(Debug, Default)]
pub struct VerifyReport {
    pub checked_jobs: usize,
    pub violations: Vec<String>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.violations.is_empty()
    }
}

pub fn verify_dist(dir: &Path) -> Result<VerifyReport> {
    let manifest = DistManifest::load(dir)?;
    let mut report = VerifyReport::default();

    let created_at = manifest.release.created_at;
    if created_at.is_none() {
        tracing::warn!(
            "Creation time of release {} is unknown; skipping the ordering check",
            manifest.release.tag
        );
    }

    for job in &manifest.jobs {
        if created_at.is_some_and(|created| job.started_at < created) {
            report.violations.push(format!(
                "{}: started before release {} was created",
                job.artifact_name, manifest.release.tag
            ));
        }

        if !job.succeeded() {
            continue;
        }
        report.checked_jobs += 1;
        check_job(dir, &manifest.binary, job, &mut report.violations);
    }

    for violation in &report.violations {
        tracing::warn!("{}", violation);
    }
    Ok(report)
}

fn check_job(dir: &Path, binary: &str, job: &JobRecord, violations: &mut Vec<String>) {
    let primaries: Vec<&ArchiveRecord> = job.archives.iter().filter(|a| !a.legacy).collect();
    let expected = format!("{}.zip", job.artifact_name);

    let primary = match primaries.as_slice() {
        [only] if only.file_name == expected => *only,
        [only] => {
            violations.push(format!(
                "{}: archive is named {} instead of {}",
                job.artifact_name, only.file_name, expected
            ));
            return;
        }
        other => {
            violations.push(format!(
                "{}: expected exactly one archive, found {}",
                job.artifact_name,
                other.len()
            ));
            return;
        }
    };

    if !check_archive(dir, primary, violations) {
        return;
    }

    let expected_binary = binary_file_name(binary, &job.target);
    match inspect_zip(&dir.join(&primary.file_name)) {
        Ok(entries) if entries == [expected_binary.clone()] => {}
        Ok(entries) => violations.push(format!(
            "{}: archive should hold only {}, holds {:?}",
            job.artifact_name, expected_binary, entries
        )),
        Err(e) => violations.push(format!("{}: cannot read archive: {}", job.artifact_name, e)),
    }

    let legacy: Vec<&ArchiveRecord> = job.archives.iter().filter(|a| a.legacy).collect();
    match (&job.legacy_name, legacy.as_slice()) {
        (None, []) => {}
        (Some(alias), [record]) => {
            let alias_file = format!("{alias}.zip");
            if record.file_name != alias_file {
                violations.push(format!(
                    "{}: legacy archive is named {} instead of {}",
                    job.artifact_name, record.file_name, alias_file
                ));
            } else if check_archive(dir, record, violations) && record.sha256 != primary.sha256 {
                violations.push(format!(
                    "{}: legacy archive {} differs from {}",
                    job.artifact_name, record.file_name, primary.file_name
                ));
            }
        }
        (Some(alias), records) => violations.push(format!(
            "{}: expected one legacy archive {}.zip, found {}",
            job.artifact_name,
            alias,
            records.len()
        )),
        (None, records) => violations.push(format!(
            "{}: has {} legacy archives but no legacy name",
            job.artifact_name,
            records.len()
        )),
    }
}

/// The file exists and still hashes to what the manifest recorded
fn check_archive(dir: &Path, record: &ArchiveRecord, violations: &mut Vec<String>) -> bool {
    let path = dir.join(&record.file_name);
    match sha256_file(&path) {
        Ok(sha) if sha == record.sha256 => true,
        Ok(_) => {
            violations.push(format!("{}: checksum does not match the manifest", record.file_name));
            false
        }
        Err(e) => {
            violations.push(format!("{}: {}", record.file_name, e));
            false
        }
    }
}
