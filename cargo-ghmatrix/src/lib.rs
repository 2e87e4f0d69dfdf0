//! # cargo-ghmatrix
//!
//! A cargo subcommand that runs a matrix release: it creates a GitHub release,
//! builds one binary per (runner OS, target triple) entry, zips each binary and
//! attaches the archives to the release.
//!
//! ## Overview
//!
//! A run has two stages. The release stage creates (or reuses) a draft release
//! for the tag and exposes its upload endpoint. The matrix stage then runs every
//! selected entry concurrently: it installs the Rust target, `cross` and any
//! linker package the entry needs, builds the binary, packages it as
//! `<artifact-name>.zip`, stores that archive as a workflow artifact and uploads
//! it to the release, plus a second copy under the entry's legacy name if it has
//! one. A failing entry never stops its siblings.
//!
//! ## Usage
//!
//! ```bash
//! # Release and build the entries for this host
//! cargo ghmatrix --tag v0.18.0
//!
//! # Split across CI jobs
//! cargo ghmatrix release --output "$GITHUB_OUTPUT"
//! cargo ghmatrix build --upload-url "$UPLOAD_URL" --entry eza_aarch64-apple-darwin
//!
//! # Inspect the matrix and check a finished run
//! cargo ghmatrix matrix --all
//! cargo ghmatrix verify target/dist/v0.18.0
//! ```
//!
//! ## Configuration
//!
//! Configuration is read from `.config/ghmatrix.toml` in the project, falling
//! back to `ghmatrix.toml` in the user config directory. A `[[matrix]]` table
//! there replaces the built-in seven entries.

/// Per-entry build steps, packaging and uploads
pub mod builder;

/// Command-line interface definitions and argument parsing
pub mod cli;

/// Configuration file handling and default settings management
pub mod config;

/// Error types and error handling utilities
pub mod error;

/// GitHub API client for creating releases and uploading assets
pub mod github;

/// Concurrency group lock for runs sharing a dist directory
pub mod lock;

/// The run manifest written after every matrix stage
pub mod manifest;

/// Build matrix entries, defaults, validation and selection
pub mod matrix;

/// Zip archives, workflow artifacts and checksums
pub mod packager;

/// Orchestration of the release and matrix stages
pub mod pipeline;

/// Release triggers, records and asset uploads
pub mod release;

/// Network retry logic with exponential backoff
pub mod retry;

/// Structural checks over a finished run
pub mod verify;
