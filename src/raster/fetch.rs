//! Icon byte sources
//!
//! The rasterizer does not care where icon bytes come from. Relative paths
//! resolve against an asset root (the site's `public/` folder), `file://`
//! URIs and absolute paths are read directly, and `http(s)://` URLs are
//! fetched when the `network` feature is enabled.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};

/// Loads the raw bytes of an icon
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, source: &str) -> Result<Vec<u8>>;
}

fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Reads icons from the local file system
#[derive(Debug, Clone)]
pub struct FsFetcher {
    root: PathBuf,
}

impl FsFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map a source onto a path below the asset root
    pub fn resolve(&self, source: &str) -> PathBuf {
        if let Some(path) = source.strip_prefix("file://") {
            return PathBuf::from(path);
        }

        let path = Path::new(source);
        if !path.is_absolute() {
            return self.root.join(path);
        }

        // Site-absolute paths ("/icons/rust.svg") live below the asset root,
        // unless they only exist as real absolute paths
        let candidate = self.root.join(path.strip_prefix("/").unwrap_or(path));
        if candidate.exists() || !path.exists() {
            candidate
        } else {
            path.to_path_buf()
        }
    }
}

impl Default for FsFetcher {
    fn default() -> Self {
        Self::new(".")
    }
}

#[async_trait]
impl AssetFetcher for FsFetcher {
    async fn fetch(&self, source: &str) -> Result<Vec<u8>> {
        if is_url(source) {
            return Err(PipelineError::load(
                source,
                "network sources need the `network` feature",
            ));
        }

        let path = self.resolve(source);
        tokio::fs::read(&path)
            .await
            .map_err(|e| PipelineError::load(source, format!("{} ({})", e, path.display())))
    }
}

/// Fetches URLs over HTTP and everything else from disk
#[cfg(feature = "network")]
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    files: FsFetcher,
}

#[cfg(feature = "network")]
impl HttpFetcher {
    pub fn new(files: FsFetcher) -> Self {
        Self {
            client: reqwest::Client::new(),
            files,
        }
    }
}

#[cfg(feature = "network")]
#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, source: &str) -> Result<Vec<u8>> {
        if !is_url(source) {
            return self.files.fetch(source).await;
        }

        let response = self
            .client
            .get(source)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PipelineError::load(source, e))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| PipelineError::load(source, e))?;
        Ok(bytes.to_vec())
    }
}

/// Fetcher used when none is configured
pub fn default_fetcher(root: impl Into<PathBuf>) -> std::sync::Arc<dyn AssetFetcher> {
    let files = FsFetcher::new(root);
    #[cfg(feature = "network")]
    {
        std::sync::Arc::new(HttpFetcher::new(files))
    }
    #[cfg(not(feature = "network"))]
    {
        std::sync::Arc::new(files)
    }
}
