use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{GhMatrixError, Result};

/// Package a single binary into `<artifact_name>.zip`
///
/// The binary is stored at the archive root under its own file name with
/// executable permissions, so unpacking yields a runnable `eza`/`eza.exe`.
pub fn create_zip(binary: &Path, output_dir: &Path, artifact_name: &str) -> Result<PathBuf> {
    let file_name = binary
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| GhMatrixError::Config(format!("Invalid binary path: {}", binary.display())))?;

    fs::create_dir_all(output_dir)?;
    let archive_path = output_dir.join(format!("{artifact_name}.zip"));

    let file = File::create(&archive_path)?;
    let mut zip = zip::ZipWriter::new(file);

    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o755);

    zip.start_file(file_name, options)?;
    let content = fs::read(binary)?;
    zip.write_all(&content)?;
    zip.finish()?;

    tracing::info!("Created archive: {}", archive_path.display());
    Ok(archive_path)
}

/// Write `<alias>.zip` next to `archive` with identical bytes
pub fn duplicate_archive(archive: &Path, alias: &str) -> Result<PathBuf> {
    let dir = archive.parent().unwrap_or_else(|| Path::new("."));
    let alias_path = dir.join(format!("{alias}.zip"));
    fs::copy(archive, &alias_path)?;
    tracing::info!("Created legacy archive: {}", alias_path.display());
    Ok(alias_path)
}

/// Store an archive in the run's workflow artifact area
pub fn stage_artifact(archive: &Path, artifact_dir: &Path, artifact_name: &str) -> Result<PathBuf> {
    let file_name = archive
        .file_name()
        .ok_or_else(|| GhMatrixError::Config(format!("Invalid archive path: {}", archive.display())))?;

    let dir = artifact_dir.join(artifact_name);
    fs::create_dir_all(&dir)?;
    let staged = dir.join(file_name);
    fs::copy(archive, &staged)?;

    tracing::debug!("Stored workflow artifact: {}", staged.display());
    Ok(staged)
}

/// Names of the entries stored in a zip archive
pub fn inspect_zip(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;

    let mut names = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        names.push(entry.name().to_string());
    }
    Ok(names)
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Generate a `SHA256SUMS` file covering `files`
pub fn generate_checksums(files: &[PathBuf], output_dir: &Path) -> Result<PathBuf> {
    let checksum_path = output_dir.join("SHA256SUMS");
    let mut checksum_file = File::create(&checksum_path)?;

    for file_path in files {
        let file_name = file_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| GhMatrixError::Config(format!("Invalid file path: {}", file_path.display())))?;

        writeln!(checksum_file, "{}  {}", sha256_file(file_path)?, file_name)?;
    }

    tracing::info!("Generated checksums: {}", checksum_path.display());
    Ok(checksum_path)
}
