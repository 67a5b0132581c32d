//! Directory bootstrap steps.
//!
//! The bootstrapper wraps a [`DirectoryClient`] with the ordering rules of
//! template installation: reset gated on reachability, manifest before
//! data, and identity data strictly before domain data. The identity and
//! domain file sequences are kept as two separate ordered lists end to
//! end; they are never merged into a set, so import order can never
//! depend on hash iteration order.

use std::path::{Path, PathBuf};

use tracing::info;

use super::{DirectoryClient, DirectoryError};

/// An ordered, deduplicated sequence of paths.
///
/// Backed by a `Vec` so insertion order is preserved exactly; membership
/// checks are linear, which is fine at template scale.
#[derive(Debug, Default, Clone)]
pub struct OrderedPathSet {
    paths: Vec<PathBuf>,
}

impl OrderedPathSet {
    /// Creates an empty set.
    pub const fn new() -> Self {
        Self { paths: Vec::new() }
    }

    /// Appends `path` unless it is already present.
    pub fn insert(&mut self, path: PathBuf) {
        if !self.paths.contains(&path) {
            self.paths.push(path);
        }
    }

    /// The paths in insertion order.
    pub fn as_slice(&self) -> &[PathBuf] {
        &self.paths
    }
}

/// Expands a resolved data reference into importable files.
///
/// A file maps to itself; a directory contributes every `.json` file
/// directly under it, in name order. Supports development overrides where
/// a template reference points at a local seed-data directory.
pub fn expand_data_ref(path: &Path) -> Result<Vec<PathBuf>, DirectoryError> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    let entries = std::fs::read_dir(path)
        .map_err(|source| DirectoryError::Io { path: path.to_path_buf(), source })?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    Ok(files)
}

/// Executes the directory bootstrap steps in their required order.
pub struct DirectoryBootstrapper<'a> {
    client: &'a dyn DirectoryClient,
}

impl<'a> DirectoryBootstrapper<'a> {
    /// Creates a bootstrapper over `client`.
    pub const fn new(client: &'a dyn DirectoryClient) -> Self {
        Self { client }
    }

    /// Destructively resets the directory.
    ///
    /// Fails closed: the reachability check runs first, so an unreachable
    /// instance aborts before any mutation is attempted.
    pub async fn reset(&self) -> Result<(), DirectoryError> {
        self.client.ensure_reachable().await?;
        info!("deleting directory manifest and data");
        self.client.delete_manifest().await
    }

    /// Applies the template manifest.
    pub async fn apply_manifest(&self, manifest: &Path) -> Result<(), DirectoryError> {
        info!(manifest = %manifest.display(), "applying manifest");
        self.client.set_manifest(manifest).await
    }

    /// Imports `files` one at a time, in order. The first failure aborts
    /// the remaining imports; already-imported files are not rolled back.
    pub async fn import_files(&self, files: &[PathBuf]) -> Result<(), DirectoryError> {
        for file in files {
            info!(file = %file.display(), "importing data file");
            self.client.import_file(file).await?;
        }
        Ok(())
    }
}
