use thiserror::Error;

#[derive(Error, Debug)]
pub enum GhMatrixError {
    #[error("GitHub API error: {0}")]
    GitHubApi(Box<octocrab::Error>),

    #[error("GitHub returned HTTP {status}: {message}")]
    GitHubResponse { status: u16, message: String },

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Step '{step}' failed for target {target}")]
    StepFailed { target: String, step: String },

    #[error("Binary '{binary}' not found at {path}")]
    BinaryNotFound { binary: String, path: String },

    #[error("No tag found on HEAD and no ref name to fall back to")]
    NoTag,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid build matrix: {0}")]
    InvalidMatrix(String),

    #[error("Release creation failed for {tag}: {source}")]
    ReleaseCreation {
        tag: String,
        #[source]
        source: Box<GhMatrixError>,
    },

    #[error("Asset upload failed: {0}")]
    AssetUpload(String),

    #[error("Upload of {asset} rejected: HTTP {status} - {message}")]
    UploadRejected {
        asset: String,
        status: u16,
        message: String,
    },

    #[error("Invalid repository format: {0}")]
    InvalidRepo(String),

    #[error("Could not acquire run lock {path}: {reason}")]
    RunLock { path: String, reason: String },
}

pub type Result<T> = std::result::Result<T, GhMatrixError>;

impl From<octocrab::Error> for GhMatrixError {
    fn from(err: octocrab::Error) -> Self {
        match err {
            octocrab::Error::GitHub { source, .. } => GhMatrixError::GitHubResponse {
                status: source.status_code.as_u16(),
                message: source.message,
            },
            other => GhMatrixError::GitHubApi(Box::new(other)),
        }
    }
}

impl GhMatrixError {
    /// HTTP status of a response GitHub rejected, if that is what this is
    pub fn status(&self) -> Option<u16> {
        match self {
            GhMatrixError::GitHubResponse { status, .. }
            | GhMatrixError::UploadRejected { status, .. } => Some(*status),
            GhMatrixError::Http(e) => e.status().map(|s| s.as_u16()),
            GhMatrixError::ReleaseCreation { source, .. } => source.status(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_reaches_through_release_creation() {
        let missing = GhMatrixError::GitHubResponse {
            status: 404,
            message: "Not Found".to_string(),
        };
        assert_eq!(missing.status(), Some(404));

        let wrapped = GhMatrixError::ReleaseCreation {
            tag: "v0.18.0".to_string(),
            source: Box::new(missing),
        };
        assert_eq!(wrapped.status(), Some(404));
        assert!(wrapped.to_string().contains("v0.18.0"));

        assert_eq!(GhMatrixError::NoTag.status(), None);
    }
}
