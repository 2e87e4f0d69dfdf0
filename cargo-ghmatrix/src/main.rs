use anyhow::Result;
use clap::Parser;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use cargo_ghmatrix::cli::{Args, CargoCli, Command, GhmatrixCli};
use cargo_ghmatrix::manifest::DistManifest;
use cargo_ghmatrix::matrix;
use cargo_ghmatrix::pipeline::{self, Pipeline};
use cargo_ghmatrix::release::{detect_trigger, publish_output};
use cargo_ghmatrix::verify::verify_dist;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments - handle both cargo subcommand and direct invocation
    let cli = match CargoCli::try_parse() {
        Ok(CargoCli::Ghmatrix(cli)) => cli,
        Err(_) => GhmatrixCli::parse(),
    };

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let command = cli.command.clone();
    let args: Args = cli.into();

    match command {
        Some(Command::Matrix) => {
            let resolved = pipeline::resolve(args)?;
            let selected = matrix::select(
                &resolved.matrix,
                &resolved.args.matrix_selection(),
                matrix::RunnerOs::host(),
            )?;
            let include = serde_json::json!({ "include": selected });
            println!("{}", serde_json::to_string_pretty(&include)?);
        }
        Some(Command::Verify { dir }) => {
            let dir = match dir {
                Some(dir) => dir,
                None => {
                    let trigger = detect_trigger(args.tag.as_deref(), Path::new("."))?;
                    pipeline::default_dist_dir(&args, trigger.tag())
                }
            };

            let report = verify_dist(&dir)?;
            if !report.is_ok() {
                anyhow::bail!(
                    "{} problem(s) found in {}:\n  {}",
                    report.violations.len(),
                    dir.display(),
                    report.violations.join("\n  ")
                );
            }
            tracing::info!("{}: {} archive set(s) verified", dir.display(), report.checked_jobs);
        }
        Some(Command::Release { output }) => {
            let pipeline = Pipeline::new(args)?;
            let release = pipeline.create_release().await?;
            let record = release.record();
            println!("{}", record.upload_url);
            if let Some(output) = output {
                publish_output(record, &output)?;
            }
        }
        Some(Command::Build { upload_url }) => {
            let pipeline = Pipeline::new(args)?;
            let release = pipeline.attach_release(upload_url.as_deref()).await?;
            let manifest = pipeline.run_matrix(release).await?;
            finish(&manifest)?;
        }
        None => {
            let pipeline = Pipeline::new(args)?;
            let manifest = pipeline.run().await?;
            finish(&manifest)?;
        }
    }

    Ok(())
}

/// Non-fail-fast: report every failed job, then fail the run as a whole
fn finish(manifest: &DistManifest) -> Result<()> {
    if let Some(error) = &manifest.checksum_upload_error {
        tracing::warn!("Checksums were not attached to the release: {}", error);
    }

    let failed: Vec<_> = manifest.failed_jobs().collect();
    if failed.is_empty() {
        tracing::info!("Distribution completed successfully!");
        return Ok(());
    }

    for job in &failed {
        tracing::error!("{} failed", job.artifact_name);
    }
    anyhow::bail!("{} of {} matrix jobs failed", failed.len(), manifest.jobs.len())
}
