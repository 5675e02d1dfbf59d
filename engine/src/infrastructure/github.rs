//! GitHub release source
//! Fetches release metadata and streams artifacts with progress.

use crate::constants::release::HTTP_TIMEOUT;
use crate::domain::error::{DomainError, Result};
use crate::domain::ports::{ProgressFn, ReleaseSource};
use crate::domain::value_objects::Version;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Deserialize;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::debug;

const API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = "winproc";

#[derive(Debug, Deserialize)]
struct ReleaseDoc {
    tag_name: String,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    html_url: String,
    #[serde(default)]
    assets: Vec<AssetDoc>,
}

#[derive(Debug, Deserialize)]
struct AssetDoc {
    name: String,
    browser_download_url: String,
    #[serde(default)]
    size: u64,
}

pub struct GithubReleaseSource {
    token: Option<String>,
    http: reqwest::Client,
}

impl GithubReleaseSource {
    pub fn new(token: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            token: token.filter(|t| !t.is_empty()),
            http,
        }
    }

    fn request(&self, url: &str, accept: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .http
            .get(url)
            .header("Accept", accept)
            .header("User-Agent", USER_AGENT);
        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("token {token}"));
        }
        req
    }

    async fn fetch_release(&self, url: &str) -> Result<Version> {
        let resp = self
            .request(url, "application/vnd.github.v3+json")
            .send()
            .await
            .map_err(|e| DomainError::ReleaseSource(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DomainError::ReleaseSource(format!(
                "release API error: {status} - {body}"
            )));
        }

        let doc: ReleaseDoc = resp
            .json()
            .await
            .map_err(|e| DomainError::ReleaseSource(e.to_string()))?;
        Ok(convert_release(doc))
    }
}

/// Map a release document onto a Version, selecting the first `.exe` asset.
/// A release with no `.exe` asset yields an empty artifact URL; the
/// subsequent download fails distinguishably.
fn convert_release(doc: ReleaseDoc) -> Version {
    let mut version = Version {
        tag: doc.tag_name,
        release_url: doc.html_url,
        published_at: doc.published_at,
        is_prerelease: doc.prerelease,
        ..Default::default()
    };
    if let Some(asset) = doc.assets.iter().find(|a| a.name.ends_with(".exe")) {
        version.asset_url = asset.browser_download_url.clone();
        version.asset_name = asset.name.clone();
        version.size = asset.size;
    }
    version
}

#[async_trait]
impl ReleaseSource for GithubReleaseSource {
    async fn latest_release(&self, repository: &str) -> Result<Version> {
        self.fetch_release(&format!("{API_BASE}/repos/{repository}/releases/latest"))
            .await
    }

    async fn release_by_tag(&self, repository: &str, tag: &str) -> Result<Version> {
        if tag == "latest" {
            return self.latest_release(repository).await;
        }
        self.fetch_release(&format!("{API_BASE}/repos/{repository}/releases/tags/{tag}"))
            .await
    }

    async fn list_releases(&self, repository: &str, limit: usize) -> Result<Vec<Version>> {
        let url = format!("{API_BASE}/repos/{repository}/releases?per_page={limit}");
        let resp = self
            .request(&url, "application/vnd.github.v3+json")
            .send()
            .await
            .map_err(|e| DomainError::ReleaseSource(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DomainError::ReleaseSource(format!(
                "release API error: {status} - {body}"
            )));
        }

        let docs: Vec<ReleaseDoc> = resp
            .json()
            .await
            .map_err(|e| DomainError::ReleaseSource(e.to_string()))?;
        Ok(docs.into_iter().map(convert_release).collect())
    }

    async fn download(
        &self,
        version: &Version,
        dest: &Path,
        progress: ProgressFn<'_>,
    ) -> Result<()> {
        let resp = self
            .request(&version.asset_url, "application/octet-stream")
            .send()
            .await
            .map_err(|e| DomainError::DownloadFailed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(DomainError::DownloadFailed(format!(
                "download failed: {}",
                resp.status()
            )));
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DomainError::DownloadFailed(e.to_string()))?;
        }
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| DomainError::DownloadFailed(e.to_string()))?;

        let total = resp.content_length().unwrap_or(0);
        let mut downloaded: u64 = 0;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| DomainError::DownloadFailed(e.to_string()))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| DomainError::DownloadFailed(e.to_string()))?;
            downloaded += chunk.len() as u64;
            progress(downloaded, total);
        }
        file.flush()
            .await
            .map_err(|e| DomainError::DownloadFailed(e.to_string()))?;

        debug!(
            tag = %version.tag,
            dest = %dest.display(),
            bytes = downloaded,
            "artifact downloaded"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(assets: Vec<AssetDoc>) -> ReleaseDoc {
        ReleaseDoc {
            tag_name: "v1.2.3".to_string(),
            prerelease: false,
            published_at: None,
            html_url: "https://example.invalid/rel".to_string(),
            assets,
        }
    }

    #[test]
    fn test_convert_release_picks_first_exe_asset() {
        let version = convert_release(doc(vec![
            AssetDoc {
                name: "checksums.txt".to_string(),
                browser_download_url: "https://example.invalid/sums".to_string(),
                size: 1,
            },
            AssetDoc {
                name: "app_v1.2.3.exe".to_string(),
                browser_download_url: "https://example.invalid/app.exe".to_string(),
                size: 42,
            },
            AssetDoc {
                name: "other.exe".to_string(),
                browser_download_url: "https://example.invalid/other.exe".to_string(),
                size: 7,
            },
        ]));
        assert_eq!(version.asset_name, "app_v1.2.3.exe");
        assert_eq!(version.size, 42);
    }

    #[test]
    fn test_convert_release_without_exe_leaves_empty_url() {
        let version = convert_release(doc(vec![AssetDoc {
            name: "app.tar.gz".to_string(),
            browser_download_url: "https://example.invalid/app.tar.gz".to_string(),
            size: 9,
        }]));
        assert!(version.asset_url.is_empty());
        assert_eq!(version.tag, "v1.2.3");
    }

    #[test]
    fn test_release_doc_parses_github_payload() {
        let raw = r#"{
            "tag_name": "v1.0.0",
            "prerelease": true,
            "published_at": "2024-06-01T10:00:00Z",
            "html_url": "https://github.com/o/r/releases/v1.0.0",
            "assets": [
                {"name": "r_v1.0.0.exe", "browser_download_url": "https://github.com/o/r/releases/download/v1.0.0/r_v1.0.0.exe", "size": 1024}
            ]
        }"#;
        let doc: ReleaseDoc = serde_json::from_str(raw).unwrap();
        let version = convert_release(doc);
        assert_eq!(version.tag, "v1.0.0");
        assert!(version.is_prerelease);
        assert_eq!(version.size, 1024);
        assert!(version.published_at.is_some());
    }
}
