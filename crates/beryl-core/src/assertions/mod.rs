//! Template assertion execution.
//!
//! An assertion file pairs directory check queries with expected boolean
//! results. After a template is installed, each assertion is executed
//! against the live instance; the first mismatch fails the run. Assertions
//! are pure queries and never mutate state.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

pub mod http;

pub use http::HttpAssertionExecutor;

/// Errors from assertion parsing or execution.
#[derive(Debug, Error)]
pub enum AssertionError {
    /// An assertion file could not be read.
    #[error("failed to read assertion file {path}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// An assertion file is not valid.
    #[error("invalid assertion file {path}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Decode error.
        #[source]
        source: serde_json::Error,
    },

    /// Executing a check against the instance failed.
    #[error("assertion query failed: {message}")]
    Query {
        /// Failure detail.
        message: String,
    },

    /// A check returned a different result than the template expects.
    #[error("assertion {index} in {file} failed: expected {expected}, got {actual}")]
    Mismatch {
        /// Assertion file.
        file: PathBuf,
        /// Zero-based index within the file.
        index: usize,
        /// Expected result.
        expected: bool,
        /// Actual result.
        actual: bool,
    },
}

/// One assertion: a check query and its expected outcome.
#[derive(Debug, Clone, Deserialize)]
pub struct Assertion {
    /// Directory check request, passed through to the executor verbatim.
    pub check: serde_json::Value,
    /// Expected check result.
    pub expected: bool,
}

#[derive(Debug, Deserialize)]
struct AssertionFile {
    #[serde(default)]
    assertions: Vec<Assertion>,
}

/// Executes a single check query against the live instance.
#[async_trait]
pub trait AssertionExecutor: Send + Sync {
    /// Runs `check` and reports its boolean result.
    async fn execute(&self, check: &serde_json::Value) -> Result<bool, AssertionError>;
}

/// Runs every assertion in a sequence of files.
pub struct AssertionRunner;

impl AssertionRunner {
    /// Executes all assertions in `files`, in order.
    ///
    /// An empty file list is a trivial success; the executor is never
    /// contacted. The first mismatch or query failure aborts the rest.
    pub async fn run(
        executor: &dyn AssertionExecutor,
        files: &[PathBuf],
    ) -> Result<(), AssertionError> {
        for file in files {
            let parsed = Self::parse(file)?;
            info!(file = %file.display(), count = parsed.len(), "running assertions");
            for (index, assertion) in parsed.iter().enumerate() {
                let actual = executor.execute(&assertion.check).await?;
                if actual != assertion.expected {
                    return Err(AssertionError::Mismatch {
                        file: file.clone(),
                        index,
                        expected: assertion.expected,
                        actual,
                    });
                }
                debug!(file = %file.display(), index, "assertion passed");
            }
        }
        Ok(())
    }

    fn parse(file: &Path) -> Result<Vec<Assertion>, AssertionError> {
        let raw = std::fs::read_to_string(file)
            .map_err(|source| AssertionError::Io { path: file.to_path_buf(), source })?;
        let parsed: AssertionFile = serde_json::from_str(&raw)
            .map_err(|source| AssertionError::Parse { path: file.to_path_buf(), source })?;
        Ok(parsed.assertions)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    /// Executor that returns a fixed verdict and counts calls.
    struct Fixed {
        verdict: bool,
        calls: AtomicUsize,
    }

    impl Fixed {
        const fn new(verdict: bool) -> Self {
            Self { verdict, calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl AssertionExecutor for Fixed {
        async fn execute(&self, _: &serde_json::Value) -> Result<bool, AssertionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.verdict)
        }
    }

    fn write_assertions(dir: &Path, name: &str, body: &serde_json::Value) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, serde_json::to_vec(body).unwrap()).unwrap();
        path
    }

    #[tokio::test]
    async fn empty_file_list_never_contacts_the_executor() {
        let executor = Fixed::new(true);
        AssertionRunner::run(&executor, &[]).await.unwrap();
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn all_passing_assertions_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_assertions(
            dir.path(),
            "assert.json",
            &json!({ "assertions": [
                { "check": { "subject": "user:alice", "relation": "member" }, "expected": true },
                { "check": { "subject": "user:bob", "relation": "member" }, "expected": true }
            ]}),
        );

        let executor = Fixed::new(true);
        AssertionRunner::run(&executor, &[file]).await.unwrap();
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn first_mismatch_aborts_with_file_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_assertions(
            dir.path(),
            "assert.json",
            &json!({ "assertions": [
                { "check": { "subject": "user:alice" }, "expected": false },
                { "check": { "subject": "user:bob" }, "expected": false }
            ]}),
        );

        let executor = Fixed::new(true);
        let err = AssertionRunner::run(&executor, &[file]).await.unwrap_err();
        assert!(matches!(
            err,
            AssertionError::Mismatch { index: 0, expected: false, actual: true, .. }
        ));
        // Aborted after the first mismatch.
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "not json").unwrap();

        let executor = Fixed::new(true);
        let err = AssertionRunner::run(&executor, &[path]).await.unwrap_err();
        assert!(matches!(err, AssertionError::Parse { .. }));
    }

    #[tokio::test]
    async fn file_without_assertions_is_trivially_fine() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_assertions(dir.path(), "assert.json", &json!({}));
        let executor = Fixed::new(true);
        AssertionRunner::run(&executor, &[file]).await.unwrap();
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }
}
