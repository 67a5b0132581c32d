//! Template asset resolution and caching.
//!
//! An asset reference is either a local path or a remote URL. Remote
//! assets are downloaded once into a deterministic cache location keyed by
//! template name and asset category; a second resolution of the same
//! reference finds the cached file and performs no network I/O.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use url::Url;

/// Asset category, the second component of the cache path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetCategory {
    /// Directory manifest and model artifacts.
    Model,
    /// Identity and domain seed data.
    Data,
    /// Assertion files.
    Assertions,
}

impl AssetCategory {
    /// Cache subdirectory name for this category.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Data => "data",
            Self::Assertions => "assertions",
        }
    }
}

/// Errors raised while materializing an asset.
#[derive(Debug, Error)]
pub enum AssetError {
    /// The reference is neither an existing local path nor a URL.
    #[error("asset reference {asset:?} is not a local file or a URL")]
    InvalidRef {
        /// The offending reference.
        asset: String,
    },

    /// The URL has no final path segment to derive a file name from.
    #[error("asset URL {url} has no file name")]
    NoFileName {
        /// The offending URL.
        url: String,
    },

    /// The download failed.
    #[error("failed to download asset {url}")]
    Download {
        /// Asset URL.
        url: String,
        /// Transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The cache directory or file could not be written.
    #[error("failed to write asset cache at {path}")]
    Io {
        /// Cache path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Resolves template asset references to local files.
#[derive(Debug, Clone)]
pub struct AssetFetcher {
    http: reqwest::Client,
    cache_root: PathBuf,
}

impl AssetFetcher {
    /// Creates a fetcher caching under `cache_root`.
    pub const fn new(http: reqwest::Client, cache_root: PathBuf) -> Self {
        Self { http, cache_root }
    }

    /// Resolves `asset` for `template`, downloading it if necessary.
    ///
    /// An existing local path is returned unchanged, which lets developers
    /// point a template at files on disk without any network access. A
    /// remote reference maps to `cache_root/<template>/<category>/<name>`;
    /// if that file already exists the cached copy is returned and no
    /// fetch occurs.
    pub async fn resolve(
        &self,
        template: &str,
        category: AssetCategory,
        asset: &str,
    ) -> Result<PathBuf, AssetError> {
        let local = Path::new(asset);
        if local.exists() {
            return Ok(local.to_path_buf());
        }

        let url = Url::parse(asset)
            .map_err(|_| AssetError::InvalidRef { asset: asset.to_string() })?;
        let file_name = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| AssetError::NoFileName { url: asset.to_string() })?
            .to_string();

        let target_dir = self.cache_root.join(template).join(category.as_str());
        let target = target_dir.join(&file_name);
        if target.exists() {
            debug!(path = %target.display(), "asset already cached");
            return Ok(target);
        }

        tokio::fs::create_dir_all(&target_dir)
            .await
            .map_err(|source| AssetError::Io { path: target_dir.clone(), source })?;

        debug!(url = %url, path = %target.display(), "downloading asset");
        let bytes = self
            .http
            .get(url.clone())
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|source| AssetError::Download { url: asset.to_string(), source })?
            .bytes()
            .await
            .map_err(|source| AssetError::Download { url: asset.to_string(), source })?;

        tokio::fs::write(&target, &bytes)
            .await
            .map_err(|source| AssetError::Io { path: target.clone(), source })?;

        Ok(target)
    }
}
