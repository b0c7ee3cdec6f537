//! Image/asset downloads into a per-run directory
//!
//! Files are named after the asset URL and skipped when already on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::domain::RequestKey;
use crate::infrastructure::fetch_client::HttpFetchClient;
use crate::infrastructure::fetch_error::FetchError;

#[derive(Error, Debug)]
pub enum AssetError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Failed to write asset {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetOutcome {
    Downloaded(PathBuf),
    /// The file already existed; no request was made
    Skipped(PathBuf),
}

impl AssetOutcome {
    pub fn path(&self) -> &Path {
        match self {
            Self::Downloaded(path) | Self::Skipped(path) => path,
        }
    }
}

pub struct AssetDownloader {
    client: Arc<HttpFetchClient>,
    dir: PathBuf,
}

impl AssetDownloader {
    pub fn new(client: Arc<HttpFetchClient>, dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn download(&self, url: &str) -> Result<AssetOutcome, AssetError> {
        if let Some(name) = filename_from_url(url) {
            let path = self.dir.join(name);
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                debug!("Asset already present: {}", path.display());
                return Ok(AssetOutcome::Skipped(path));
            }
            let raw = self.client.fetch_bytes(url).await?;
            self.write(&path, &raw.body).await?;
            return Ok(AssetOutcome::Downloaded(path));
        }

        // No usable name in the URL: fall back to the request key, which
        // needs the content type to pick an extension.
        let stem = RequestKey::for_url(url);
        if let Some(existing) = self.find_by_stem(stem.as_str()).await {
            return Ok(AssetOutcome::Skipped(existing));
        }
        let raw = self.client.fetch_bytes(url).await?;
        let ext = extension_for_content_type(raw.content_type.as_deref());
        let path = self.dir.join(format!("{stem}.{ext}"));
        self.write(&path, &raw.body).await?;
        Ok(AssetOutcome::Downloaded(path))
    }

    async fn write(&self, path: &Path, body: &[u8]) -> Result<(), AssetError> {
        let io_err = |source| AssetError::Io {
            path: path.to_path_buf(),
            source,
        };
        tokio::fs::create_dir_all(&self.dir).await.map_err(io_err)?;

        let tmp = path.with_extension("part");
        tokio::fs::write(&tmp, body).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, path).await.map_err(io_err)?;
        info!("🖼️ Saved asset {} ({} bytes)", path.display(), body.len());
        Ok(())
    }

    async fn find_by_stem(&self, stem: &str) -> Option<PathBuf> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.ok()?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let is_match = path.file_stem().and_then(|s| s.to_str()) == Some(stem)
                && path.extension().and_then(|e| e.to_str()) != Some("part");
            if is_match {
                return Some(path);
            }
        }
        None
    }
}

/// Sanitized last path segment, if it carries a file extension
pub fn filename_from_url(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    let segment = url.path_segments()?.rev().find(|s| !s.is_empty())?;
    let name: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let name = name.trim_matches('.').to_string();
    let (stem, ext) = name.rsplit_once('.')?;
    (!stem.is_empty() && !ext.is_empty()).then_some(name)
}

fn extension_for_content_type(content_type: Option<&str>) -> &'static str {
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase())
        .unwrap_or_default();
    match mime.as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/svg+xml" => "svg",
        "image/avif" => "avif",
        _ => "bin",
    }
}
