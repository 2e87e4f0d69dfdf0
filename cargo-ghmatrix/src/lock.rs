use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{GhMatrixError, Result};

const LOCK_FILE: &str = ".ghmatrix.lock";

/// Exclusive claim on a dist directory for one concurrency group.
///
/// A later run queues behind the holder instead of cancelling it. The lock
/// file is removed when the guard is dropped.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub async fn acquire(
        dir: &Path,
        group: &str,
        poll: Duration,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(LOCK_FILE);
        let started = Instant::now();
        let mut waiting = false;

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    writeln!(file, "{} {}", group, std::process::id())?;
                    tracing::debug!("Acquired run lock {}", path.display());
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if !waiting {
                        tracing::info!(
                            "Another run in group '{}' holds {}; waiting for it to finish",
                            group,
                            path.display()
                        );
                        waiting = true;
                    }

                    if let Some(timeout) = timeout {
                        if started.elapsed() >= timeout {
                            return Err(GhMatrixError::RunLock {
                                path: path.display().to_string(),
                                reason: format!(
                                    "still held after {}s; remove it if no run is active",
                                    timeout.as_secs()
                                ),
                            });
                        }
                    }

                    tokio::time::sleep(poll).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!("Failed to remove run lock {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const POLL: Duration = Duration::from_millis(10);

    #[tokio::test]
    async fn test_second_run_waits_for_first() {
        let dir = tempdir().unwrap();
        let first = RunLock::acquire(dir.path(), "v0.18.0", POLL, None).await.unwrap();
        assert!(first.path().exists());

        let path = dir.path().to_path_buf();
        let waiter = tokio::spawn(async move {
            RunLock::acquire(&path, "v0.18.0", POLL, Some(Duration::from_secs(5))).await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(first);
        let second = waiter.await.unwrap().unwrap();
        assert!(second.path().exists());
    }

    #[tokio::test]
    async fn test_waiting_times_out() {
        let dir = tempdir().unwrap();
        let _held = RunLock::acquire(dir.path(), "v0.18.0", POLL, None).await.unwrap();

        let err = RunLock::acquire(dir.path(), "v0.18.0", POLL, Some(Duration::from_millis(30)))
            .await
            .unwrap_err();
        assert!(matches!(err, GhMatrixError::RunLock { .. }));
    }

    #[tokio::test]
    async fn test_lock_released_on_drop() {
        let dir = tempdir().unwrap();
        let lock = RunLock::acquire(dir.path(), "main", POLL, None).await.unwrap();
        let path = lock.path().to_path_buf();
        drop(lock);
        assert!(!path.exists());
    }
}
