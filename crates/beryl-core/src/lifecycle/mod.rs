//! Instance lifecycle boundary.
//!
//! The orchestrator drives the managed instance through three blocking
//! operations: stop whatever is running, render a configuration for the
//! template being installed, and start a fresh instance from that
//! configuration. Each operation is awaited to completion and never
//! retried; the first failure aborts the enclosing run.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

pub mod docker;

pub use docker::DockerLifecycle;

/// Errors from lifecycle operations.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The container runtime binary could not be spawned.
    #[error("failed to spawn {program}")]
    Spawn {
        /// Program name.
        program: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The container runtime reported a failure.
    #[error("command failed: {command}: {stderr}")]
    CommandFailed {
        /// The command line that failed.
        command: String,
        /// Captured standard error, trimmed.
        stderr: String,
    },

    /// Reading or writing the instance configuration failed.
    #[error("failed to write instance configuration at {path}")]
    ConfigIo {
        /// Configuration file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The instance configuration could not be serialized.
    #[error("failed to encode instance configuration for {path}")]
    ConfigEncode {
        /// Configuration file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: toml::ser::Error,
    },

    /// `--no-configure` was requested but no configuration exists.
    #[error("no existing configuration at {path} (remove --no-configure to generate one)")]
    MissingConfig {
        /// Expected configuration file path.
        path: PathBuf,
    },

    /// The container did not reach the running state.
    #[error("container {container} is not running after start")]
    NotRunning {
        /// Container name.
        container: String,
    },

    /// The container did not go away within the stop wait window.
    #[error("container {container} still present after stop")]
    StillRunning {
        /// Container name.
        container: String,
    },
}

/// Inputs for the configure step.
#[derive(Debug, Clone)]
pub struct ConfigureRequest {
    /// Configuration name (template name or `--config-name` override).
    pub config_name: String,
    /// Policy name from the template.
    pub policy_name: String,
    /// Policy bundle locator from the template.
    pub policy_resource: String,
    /// Whether to (re)render the configuration file. When `false` an
    /// existing file is reused and a missing one is an error.
    pub render: bool,
}

/// A rendered instance configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceConfig {
    /// Configuration name.
    pub config_name: String,
    /// Path of the rendered configuration file.
    pub config_file: PathBuf,
    /// Name of the container this configuration runs under.
    pub container_name: String,
}

/// Addresses of a started instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceAddresses {
    /// gRPC health endpoint (`host:port`).
    pub health: String,
    /// Directory gRPC endpoint (`host:port`).
    pub directory: String,
    /// Directory REST gateway base URL.
    pub gateway: String,
    /// Console URL.
    pub console: String,
}

/// Stop, configure, and start operations against the managed instance.
///
/// Implementations are synchronous steps from the orchestrator's point of
/// view: each call blocks until the operation finished or failed.
#[async_trait]
pub trait InstanceLifecycle: Send + Sync {
    /// Stops any instance whose name matches `name_or_pattern`. Waits for
    /// the container to be gone when `wait` is set. Stopping when nothing
    /// is running is a no-op, not an error.
    async fn stop(&self, name_or_pattern: &str, wait: bool) -> Result<(), LifecycleError>;

    /// Renders (or reuses) the instance configuration for a template.
    async fn configure(&self, request: &ConfigureRequest) -> Result<InstanceConfig, LifecycleError>;

    /// Starts an instance from `config`, optionally verifying it is
    /// running, and reports its service addresses.
    async fn start(
        &self,
        config: &InstanceConfig,
        wait: bool,
    ) -> Result<InstanceAddresses, LifecycleError>;
}
