use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::matrix::Selection;

#[derive(Parser, Debug)]
#[clap(
    name = "cargo-ghmatrix",
    version,
    about = "Create a GitHub release and attach binaries built for a target matrix",
    long_about = None,
    bin_name = "cargo"
)]
pub enum CargoCli {
    #[clap(name = "ghmatrix")]
    Ghmatrix(GhmatrixCli),
}

#[derive(Parser, Debug, Clone)]
#[clap(version, about, long_about = None)]
pub struct GhmatrixCli {
    #[clap(subcommand)]
    pub command: Option<Command>,

    /// Release tag. If not specified, uses the tag on HEAD, then the current branch
    #[clap(short, long, global = true)]
    pub tag: Option<String>,

    /// Publish the release immediately instead of as a draft
    #[clap(long, global = true)]
    pub no_draft: bool,

    /// GitHub repository (owner/repo)
    /// If not specified, uses repository from Cargo.toml
    #[clap(long, global = true)]
    pub repository: Option<String>,

    /// GitHub token (can also be set via GITHUB_TOKEN env var)
    #[clap(long, env = "GITHUB_TOKEN", global = true, hide_env_values = true)]
    pub github_token: Option<String>,

    /// Configuration file path [default: .config/ghmatrix.toml, then the user config]
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    /// Build only these matrix entries (comma-separated artifact names)
    #[clap(short, long, value_delimiter = ',', global = true)]
    pub entry: Vec<String>,

    /// Build every matrix entry, not just those for the host OS
    #[clap(long, global = true)]
    pub all: bool,

    /// Maximum number of matrix jobs running at once
    #[clap(short, long, global = true)]
    pub jobs: Option<usize>,

    /// Name of the binary to package (defaults to the package's binary)
    #[clap(long, global = true)]
    pub binary: Option<String>,

    /// Cargo build profile
    #[clap(long, global = true)]
    pub profile: Option<String>,

    /// Cargo target directory
    #[clap(long, env = "CARGO_TARGET_DIR", global = true)]
    pub target_dir: Option<PathBuf>,

    /// Directory for archives and the run manifest [default: target/dist/<tag>]
    #[clap(long, global = true)]
    pub dist_dir: Option<PathBuf>,

    /// Print commands and package existing binaries without calling GitHub
    #[clap(long, global = true)]
    pub dry_run: bool,

    /// Don't generate or upload SHA256SUMS
    #[clap(long, global = true)]
    pub no_checksum: bool,

    /// Enable verbose output
    #[clap(long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create the draft release and expose its upload endpoint
    Release {
        /// Append upload_url/release_id/tag to this key=value file
        #[clap(long, env = "GITHUB_OUTPUT")]
        output: Option<PathBuf>,
    },

    /// Build, package and upload the selected matrix entries
    Build {
        /// Upload endpoint produced by `release`; looked up by tag when absent
        #[clap(long)]
        upload_url: Option<String>,
    },

    /// Print the effective matrix as JSON
    Matrix,

    /// Check a finished dist directory
    Verify {
        /// Dist directory [default: target/dist/<tag>]
        dir: Option<PathBuf>,
    },
}

/// Options shared by every stage, after parsing
#[derive(Debug, Clone, Default)]
pub struct Args {
    pub tag: Option<String>,
    pub no_draft: bool,
    pub repository: Option<String>,
    pub github_token: Option<String>,
    pub config: Option<PathBuf>,
    pub entry: Vec<String>,
    pub all: bool,
    pub jobs: Option<usize>,
    pub binary: Option<String>,
    pub profile: Option<String>,
    pub target_dir: Option<PathBuf>,
    pub dist_dir: Option<PathBuf>,
    pub dry_run: bool,
    pub no_checksum: bool,
    pub verbose: bool,
}

impl From<GhmatrixCli> for Args {
    fn from(cli: GhmatrixCli) -> Self {
        Args {
            tag: cli.tag,
            no_draft: cli.no_draft,
            repository: cli.repository,
            github_token: cli.github_token,
            config: cli.config,
            entry: cli.entry,
            all: cli.all,
            jobs: cli.jobs,
            binary: cli.binary,
            profile: cli.profile,
            target_dir: cli.target_dir,
            dist_dir: cli.dist_dir,
            dry_run: cli.dry_run,
            no_checksum: cli.no_checksum,
            verbose: cli.verbose,
        }
    }
}

impl Args {
    pub fn selection(&self) -> Selection {
        Selection::from_flags(self.all, self.entry.clone())
    }

    /// Selection for `matrix`: every entry unless some are named
    pub fn matrix_selection(&self) -> Selection {
        Selection::from_flags(true, self.entry.clone())
    }

    pub fn draft(&self) -> bool {
        !self.no_draft
    }

    /// Parse repository from argument or Cargo.toml
    pub fn parse_repository(&self) -> anyhow::Result<(String, String)> {
        if let Some(repo) = &self.repository {
            let parts: Vec<&str> = repo.split('/').collect();
            if parts.len() != 2 || parts.iter().any(|p| p.is_empty()) {
                return Err(crate::error::GhMatrixError::InvalidRepo(format!(
                    "'{repo}'. Expected: owner/repo"
                ))
                .into());
            }
            return Ok((parts[0].to_string(), parts[1].to_string()));
        }

        let cargo_toml = std::fs::read_to_string("Cargo.toml")?;
        let manifest: toml::Value = toml::from_str(&cargo_toml)?;

        let repo_url = manifest
            .get("package")
            .and_then(|p| p.get("repository"))
            .and_then(|r| r.as_str())
            .or_else(|| {
                manifest
                    .get("workspace")
                    .and_then(|w| w.get("package"))
                    .and_then(|p| p.get("repository"))
                    .and_then(|r| r.as_str())
            })
            .ok_or_else(|| anyhow::anyhow!("No repository field in Cargo.toml"))?;

        parse_github_url(repo_url)
            .ok_or_else(|| anyhow::anyhow!("Could not parse repository from Cargo.toml: {repo_url}"))
    }
}

/// Extract owner and repo from an https or ssh GitHub URL
pub fn parse_github_url(url: &str) -> Option<(String, String)> {
    let url = url.trim().trim_end_matches('/').trim_end_matches(".git");
    let path = url
        .strip_prefix("https://github.com/")
        .or_else(|| url.strip_prefix("http://github.com/"))
        .or_else(|| url.strip_prefix("git@github.com:"))?;

    let mut parts = path.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(repo), None) if !owner.is_empty() && !repo.is_empty() => {
            Some((owner.to_string(), repo.to_string()))
        }
        _ => None,
    }
}
