use anyhow::Result;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::GhMatrixError;

/// Retry policy for GitHub calls
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub max_elapsed_time: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(30),
            max_elapsed_time: Some(Duration::from_secs(300)),
        }
    }
}

impl RetryConfig {
    pub fn to_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            max_elapsed_time: self.max_elapsed_time,
            ..Default::default()
        }
    }
}

/// Execute an async operation, retrying transient failures with exponential backoff
pub async fn with_retry<F, Fut, T>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let backoff = config.to_backoff();
    let mut attempt = 0;

    retry(backoff, || {
        attempt += 1;
        let op = operation();

        async move {
            match op.await {
                Ok(result) => {
                    if attempt > 1 {
                        info!("{} succeeded on attempt {}", operation_name, attempt);
                    }
                    Ok(result)
                }
                Err(e) if !is_retryable_error(&e) => {
                    warn!("{} failed: {}", operation_name, e);
                    Err(backoff::Error::permanent(e))
                }
                Err(e) if attempt <= config.max_retries => {
                    warn!(
                        "{} failed on attempt {} of {}: {}. Retrying...",
                        operation_name,
                        attempt,
                        config.max_retries + 1,
                        e
                    );
                    Err(backoff::Error::transient(e))
                }
                Err(e) => {
                    warn!("{} failed after {} attempts: {}", operation_name, attempt, e);
                    Err(backoff::Error::permanent(e))
                }
            }
        }
    })
    .await
}

fn is_retryable_status(status: u16) -> bool {
    status >= 500 || status == 429
}

fn is_retryable_io(err: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        err.kind(),
        ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionRefused
            | ErrorKind::TimedOut
            | ErrorKind::Interrupted
            | ErrorKind::UnexpectedEof
    )
}

fn is_retryable_http(err: &reqwest::Error) -> bool {
    err.is_timeout()
        || err.is_connect()
        || err
            .status()
            .map(|s| is_retryable_status(s.as_u16()))
            .unwrap_or(true)
}

fn is_retryable_kind(err: &GhMatrixError) -> bool {
    match err {
        GhMatrixError::Http(e) => is_retryable_http(e),
        GhMatrixError::Io(e) => is_retryable_io(e),
        GhMatrixError::UploadRejected { status, .. }
        | GhMatrixError::GitHubResponse { status, .. } => is_retryable_status(*status),
        // Transport failures; GitHub's own answers arrive as GitHubResponse
        GhMatrixError::GitHubApi(_) => true,
        GhMatrixError::ReleaseCreation { source, .. } => is_retryable_kind(source),
        _ => false,
    }
}

/// Network hiccups and server-side failures are worth another attempt; everything else is not
pub fn is_retryable_error(error: &anyhow::Error) -> bool {
    if let Some(err) = error.downcast_ref::<GhMatrixError>() {
        return is_retryable_kind(err);
    }

    if let Some(err) = error.downcast_ref::<reqwest::Error>() {
        return is_retryable_http(err);
    }

    error
        .downcast_ref::<std::io::Error>()
        .map(is_retryable_io)
        .unwrap_or(false)
}
