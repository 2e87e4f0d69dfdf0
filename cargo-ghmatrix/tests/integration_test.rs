//! Integration tests for cargo-ghmatrix
//!
//! These run the whole pipeline in dry-run mode: commands are only logged and
//! GitHub is never contacted, but packaging, workflow artifacts, checksums and
//! the run manifest are produced for real from pre-built fake binaries.

use cargo_ghmatrix::cli::Args;
use cargo_ghmatrix::manifest::{DistManifest, JobStatus};
use cargo_ghmatrix::matrix::{binary_file_name, default_matrix};
use cargo_ghmatrix::packager::inspect_zip;
use cargo_ghmatrix::pipeline::Pipeline;
use cargo_ghmatrix::verify::verify_dist;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const LINUX: &str = "eza_x86_64-unknown-linux-gnu";
const MAC_ARM: &str = "eza_aarch64-apple-darwin";

fn dry_run_args(root: &Path, entries: &[&str]) -> Args {
    Args {
        tag: Some("v0.18.0".to_string()),
        binary: Some("eza".to_string()),
        config: Some(root.join("no-config.toml")),
        target_dir: Some(root.join("target")),
        dist_dir: Some(root.join("dist")),
        entry: entries.iter().map(|e| e.to_string()).collect(),
        dry_run: true,
        ..Args::default()
    }
}

/// Pretend cargo already built the binary for `target`
fn fake_build(root: &Path, target: &str) {
    let binary = root
        .join("target")
        .join(target)
        .join("release")
        .join(binary_file_name("eza", target));
    fs::create_dir_all(binary.parent().unwrap()).unwrap();
    fs::write(binary, format!("eza for {target}")).unwrap();
}

#[tokio::test]
async fn test_full_dry_run_produces_verifiable_dist() {
    let root = TempDir::new().unwrap();
    let all: Vec<String> = default_matrix("eza").into_iter().map(|e| e.artifact_name).collect();
    for entry in default_matrix("eza") {
        fake_build(root.path(), &entry.target);
    }

    let names: Vec<&str> = all.iter().map(String::as_str).collect();
    let pipeline = Pipeline::new(dry_run_args(root.path(), &names)).unwrap();
    assert_eq!(pipeline.tag(), "v0.18.0");

    let manifest = pipeline.run().await.unwrap();
    assert_eq!(manifest.jobs.len(), 7);
    assert_eq!(manifest.failed_jobs().count(), 0);
    assert_eq!(manifest.checksums.as_deref(), Some("SHA256SUMS"));

    let dist = root.path().join("dist");
    for name in &all {
        assert!(dist.join(format!("{name}.zip")).exists());
        assert!(dist.join("artifacts").join(name).join(format!("{name}.zip")).exists());
    }
    for alias in ["eza-linux-x86_64", "eza-windows-x86_64", "eza-macos-x86_64"] {
        assert!(dist.join(format!("{alias}.zip")).exists());
    }
    assert_eq!(
        inspect_zip(&dist.join("eza_x86_64-pc-windows-msvc.zip")).unwrap(),
        vec!["eza.exe".to_string()]
    );

    // 7 primary archives and 3 aliases
    let sums = fs::read_to_string(dist.join("SHA256SUMS")).unwrap();
    assert_eq!(sums.lines().count(), 10);

    let report = verify_dist(&dist).unwrap();
    assert!(report.is_ok(), "{:?}", report.violations);
    assert_eq!(report.checked_jobs, 7);

    assert!(!dist.join(".ghmatrix.lock").exists());
}

#[tokio::test]
async fn test_failed_entry_does_not_stop_siblings() {
    let root = TempDir::new().unwrap();
    fake_build(root.path(), "x86_64-unknown-linux-gnu");

    let pipeline = Pipeline::new(dry_run_args(root.path(), &[LINUX, MAC_ARM])).unwrap();
    let manifest = pipeline.run().await.unwrap();

    assert_eq!(manifest.jobs.len(), 2);
    assert_eq!(manifest.jobs[0].artifact_name, LINUX);
    assert_eq!(manifest.jobs[0].status, JobStatus::Succeeded);
    assert_eq!(manifest.jobs[0].archives.len(), 2);

    assert_eq!(manifest.jobs[1].artifact_name, MAC_ARM);
    match &manifest.jobs[1].status {
        JobStatus::Failed { error } => assert!(error.contains("not found")),
        other => panic!("expected failure, got {other:?}"),
    }

    let dist = root.path().join("dist");
    let reloaded = DistManifest::load(&dist).unwrap();
    assert_eq!(reloaded.failed_jobs().count(), 1);
    assert!(verify_dist(&dist).unwrap().is_ok());
}

#[tokio::test]
async fn test_release_precedes_every_job() {
    let root = TempDir::new().unwrap();
    fake_build(root.path(), "x86_64-unknown-linux-gnu");
    fake_build(root.path(), "aarch64-apple-darwin");

    let mut args = dry_run_args(root.path(), &[LINUX, MAC_ARM]);
    args.jobs = Some(1);
    args.no_checksum = true;

    let manifest = Pipeline::new(args).unwrap().run().await.unwrap();

    assert!(manifest.checksums.is_none());
    assert!(!root.path().join("dist/SHA256SUMS").exists());
    for job in &manifest.jobs {
        assert!(manifest.release.created_at.unwrap() <= job.started_at);
        assert!(job.started_at <= job.finished_at);
    }
}

#[tokio::test]
async fn test_repeated_entry_builds_once() {
    let root = TempDir::new().unwrap();
    fake_build(root.path(), "x86_64-unknown-linux-gnu");

    let pipeline = Pipeline::new(dry_run_args(root.path(), &[LINUX, LINUX])).unwrap();
    let manifest = pipeline.run().await.unwrap();

    assert_eq!(manifest.jobs.len(), 1);
    let sums = fs::read_to_string(root.path().join("dist/SHA256SUMS")).unwrap();
    // primary archive and its legacy alias
    assert_eq!(sums.lines().count(), 2);
}

#[tokio::test]
async fn test_unknown_entry_is_rejected() {
    let root = TempDir::new().unwrap();
    let pipeline = Pipeline::new(dry_run_args(root.path(), &["eza_sparc64-unknown-linux-gnu"])).unwrap();
    assert!(pipeline.run().await.is_err());
}

#[tokio::test]
async fn test_build_stage_against_dry_run_release() {
    let root = TempDir::new().unwrap();
    fake_build(root.path(), "aarch64-apple-darwin");

    let pipeline = Pipeline::new(dry_run_args(root.path(), &[MAC_ARM])).unwrap();
    let release = pipeline
        .attach_release(Some("https://uploads.github.com/repos/eza-community/eza/releases/1/assets"))
        .await
        .unwrap();
    assert_eq!(release.record().tag, "v0.18.0");
    assert!(release.handle().is_none());

    let manifest = pipeline.run_matrix(release).await.unwrap();
    assert_eq!(manifest.failed_jobs().count(), 0);
    assert!(manifest.jobs[0].archives.iter().all(|a| !a.uploaded));
}
