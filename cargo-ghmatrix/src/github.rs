use crate::error::{GhMatrixError, Result};
use octocrab::{models::repos::Release, Octocrab};
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;

const API_BASE: &str = "https://api.github.com";

#[derive(Debug, Deserialize)]
struct AssetSummary {
    id: u64,
    name: String,
}

pub struct GitHubClient {
    octocrab: Octocrab,
    http_client: Client,
    token: Option<String>,
}

impl GitHubClient {
    pub fn new(token: Option<String>) -> Result<Self> {
        let token = token.or_else(|| std::env::var("GITHUB_TOKEN").ok());

        let octocrab = match &token {
            Some(token) => Octocrab::builder().personal_token(token.clone()).build()?,
            None => Octocrab::builder().build()?,
        };

        let http_client = Client::builder()
            .user_agent("cargo-ghmatrix")
            .timeout(std::time::Duration::from_secs(300))
            .build()?;

        Ok(Self {
            octocrab,
            http_client,
            token,
        })
    }

    fn token(&self) -> Result<&str> {
        self.token.as_deref().ok_or_else(|| {
            GhMatrixError::Config(
                "GitHub token not found. Pass --github-token or set GITHUB_TOKEN".to_string(),
            )
        })
    }

    pub async fn find_release_by_tag(
        &self,
        owner: &str,
        repo: &str,
        tag: &str,
    ) -> Result<Option<Release>> {
        match self
            .octocrab
            .repos(owner, repo)
            .releases()
            .get_by_tag(tag)
            .await
        {
            Ok(release) => Ok(Some(release)),
            Err(e) => match GhMatrixError::from(e) {
                err if err.status() == Some(404) => Ok(None),
                err => Err(err),
            },
        }
    }

    pub async fn get_release(&self, owner: &str, repo: &str, release_id: u64) -> Result<Release> {
        let route = format!("/repos/{owner}/{repo}/releases/{release_id}");
        Ok(self.octocrab.get(route, None::<&()>).await?)
    }

    /// Create a release for `tag`, or return the one that already exists
    pub async fn create_release(
        &self,
        owner: &str,
        repo: &str,
        tag: &str,
        draft: bool,
        target_commitish: Option<&str>,
    ) -> Result<Release> {
        if let Some(release) = self.find_release_by_tag(owner, repo, tag).await? {
            tracing::info!("Release {} already exists, reusing it", tag);
            return Ok(release);
        }

        tracing::info!("Creating release {} (draft: {})", tag, draft);

        let releases = self.octocrab.repos(owner, repo);
        let releases = releases.releases();
        let mut builder = releases.create(tag).name(tag).draft(draft);
        if let Some(target) = target_commitish {
            builder = builder.target_commitish(target);
        }

        builder
            .send()
            .await
            .map_err(|e| GhMatrixError::ReleaseCreation {
                tag: tag.to_string(),
                source: Box::new(e.into()),
            })
    }

    /// Upload a file to a release's upload endpoint under `asset_name`
    pub async fn upload_asset(
        &self,
        upload_url: &str,
        asset_path: &Path,
        asset_name: &str,
    ) -> Result<()> {
        tracing::info!("Uploading asset: {}", asset_name);

        let body = tokio::fs::read(asset_path).await?;

        let response = self
            .http_client
            .post(upload_url)
            .query(&[("name", asset_name)])
            .header("Content-Type", get_content_type(asset_path))
            .header("Authorization", format!("Bearer {}", self.token()?))
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GhMatrixError::UploadRejected {
                asset: asset_name.to_string(),
                status,
                message,
            });
        }

        tracing::info!("Successfully uploaded: {}", asset_name);
        Ok(())
    }

    /// Look up an asset of a release by name
    pub async fn asset_exists(
        &self,
        owner: &str,
        repo: &str,
        release_id: u64,
        asset_name: &str,
    ) -> Result<Option<u64>> {
        let url = format!("{API_BASE}/repos/{owner}/{repo}/releases/{release_id}/assets");

        let response = self
            .http_client
            .get(&url)
            .query(&[("per_page", "100")])
            .header("Accept", "application/vnd.github+json")
            .header("Authorization", format!("Bearer {}", self.token()?))
            .send()
            .await?
            .error_for_status()?;

        let assets: Vec<AssetSummary> = response.json().await?;
        Ok(assets
            .into_iter()
            .find(|asset| asset.name == asset_name)
            .map(|asset| asset.id))
    }

    pub async fn delete_asset(&self, owner: &str, repo: &str, asset_id: u64) -> Result<()> {
        let url = format!("{API_BASE}/repos/{owner}/{repo}/releases/assets/{asset_id}");

        let response = self
            .http_client
            .delete(&url)
            .header("Authorization", format!("Bearer {}", self.token()?))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GhMatrixError::AssetUpload(format!(
                "Failed to delete asset {asset_id}: {}",
                response.status()
            )));
        }

        Ok(())
    }
}

/// Strip the `{?name,label}` URI template GitHub appends to upload URLs
pub fn upload_endpoint(upload_url: &str) -> &str {
    match upload_url.find('{') {
        Some(idx) => &upload_url[..idx],
        None => upload_url,
    }
}

/// Release id embedded in an upload URL (`.../releases/<id>/assets`)
pub fn release_id_from_upload_url(upload_url: &str) -> Option<u64> {
    let mut segments = upload_endpoint(upload_url).trim_end_matches('/').rsplit('/');
    if segments.next()? != "assets" {
        return None;
    }
    segments.next()?.parse().ok()
}

/// Determine content type for an asset
pub fn get_content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
        "zip" => "application/zip",
        "json" => "application/json",
        _ if path.file_name().and_then(|n| n.to_str()) == Some("SHA256SUMS") => "text/plain",
        _ => "application/octet-stream",
    }
}
