//! Directory service boundary and bootstrap sequence.
//!
//! Installing a template destructively resets the directory: the manifest
//! and all object/relation data are deleted, the template's manifest is
//! applied, and the seed data is imported. Everything here assumes the
//! instance already reported healthy; the reachability gate exists so a
//! dead instance fails the run before a single mutation is attempted.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

pub mod bootstrap;
pub mod http;

pub use bootstrap::DirectoryBootstrapper;
pub use http::HttpDirectoryClient;

/// Errors from directory operations.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The directory service could not be reached.
    ///
    /// Raised before any mutation; the reset never starts against an
    /// unreachable instance.
    #[error("directory service not reachable at {host}")]
    Unreachable {
        /// Directory host.
        host: String,
    },

    /// A local manifest or data file could not be read.
    #[error("failed to read {path}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A data file is not valid JSON.
    #[error("invalid JSON in {path}")]
    InvalidData {
        /// File path.
        path: PathBuf,
        /// Decode error.
        #[source]
        source: serde_json::Error,
    },

    /// The request to the directory service failed in transport.
    #[error("directory request failed: {op}")]
    Request {
        /// Operation name.
        op: &'static str,
        /// Transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The directory service rejected an operation.
    #[error("directory rejected {op}: {message}")]
    Rejected {
        /// Operation name.
        op: &'static str,
        /// Server-provided detail.
        message: String,
    },
}

/// Client operations against the directory service.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Verifies the service answers at all. Must be called (and succeed)
    /// before any destructive operation.
    async fn ensure_reachable(&self) -> Result<(), DirectoryError>;

    /// Deletes the manifest, clearing all relation and object data.
    async fn delete_manifest(&self) -> Result<(), DirectoryError>;

    /// Uploads a new manifest, replacing the directory schema.
    async fn set_manifest(&self, manifest: &Path) -> Result<(), DirectoryError>;

    /// Imports one seed data file.
    async fn import_file(&self, file: &Path) -> Result<(), DirectoryError>;
}
