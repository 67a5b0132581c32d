//! Directory client over the instance's REST gateway.
//!
//! The gateway fronts the directory gRPC services; the manifest lives at
//! `/api/v3/directory/manifest` and imports go through
//! `/api/v3/directory/import`. TLS verification policy (for the local
//! self-signed setup) is the caller's concern via the `reqwest::Client`
//! it passes in.

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use super::{DirectoryClient, DirectoryError};

const MANIFEST_PATH: &str = "/api/v3/directory/manifest";
const IMPORT_PATH: &str = "/api/v3/directory/import";

/// Directory client talking to the REST gateway.
pub struct HttpDirectoryClient {
    http: reqwest::Client,
    base: String,
    api_key: Option<String>,
}

impl HttpDirectoryClient {
    /// Creates a client against `base`, e.g. `https://localhost:9393`.
    pub fn new(http: reqwest::Client, base: impl Into<String>, api_key: Option<String>) -> Self {
        Self { http, base: base.into().trim_end_matches('/').to_string(), api_key }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.request(method, format!("{}{path}", self.base));
        if let Some(key) = &self.api_key {
            builder = builder.header("authorization", format!("basic {key}"));
        }
        builder
    }

    async fn expect_success(
        op: &'static str,
        response: Result<reqwest::Response, reqwest::Error>,
    ) -> Result<(), DirectoryError> {
        let response = response.map_err(|source| DirectoryError::Request { op, source })?;
        if response.status().is_success() {
            return Ok(());
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(DirectoryError::Rejected {
            op,
            message: format!("{status}: {}", body.trim()),
        })
    }
}

#[async_trait]
impl DirectoryClient for HttpDirectoryClient {
    async fn ensure_reachable(&self) -> Result<(), DirectoryError> {
        debug!(base = %self.base, "checking directory reachability");
        self.request(reqwest::Method::GET, MANIFEST_PATH)
            .send()
            .await
            .map_err(|_| DirectoryError::Unreachable { host: self.base.clone() })?;
        Ok(())
    }

    async fn delete_manifest(&self) -> Result<(), DirectoryError> {
        let response = self.request(reqwest::Method::DELETE, MANIFEST_PATH).send().await;
        Self::expect_success("delete manifest", response).await
    }

    async fn set_manifest(&self, manifest: &Path) -> Result<(), DirectoryError> {
        let body = tokio::fs::read(manifest)
            .await
            .map_err(|source| DirectoryError::Io { path: manifest.to_path_buf(), source })?;
        let response = self
            .request(reqwest::Method::POST, MANIFEST_PATH)
            .header("content-type", "application/yaml")
            .body(body)
            .send()
            .await;
        Self::expect_success("set manifest", response).await
    }

    async fn import_file(&self, file: &Path) -> Result<(), DirectoryError> {
        let raw = tokio::fs::read(file)
            .await
            .map_err(|source| DirectoryError::Io { path: file.to_path_buf(), source })?;
        // Validate locally so a bad seed file names the file, not the
        // gateway's generic decode error.
        let body: serde_json::Value = serde_json::from_slice(&raw)
            .map_err(|source| DirectoryError::InvalidData { path: file.to_path_buf(), source })?;
        let response = self
            .request(reqwest::Method::POST, IMPORT_PATH)
            .json(&body)
            .send()
            .await;
        Self::expect_success("import", response).await
    }
}
