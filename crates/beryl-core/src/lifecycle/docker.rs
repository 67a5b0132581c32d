//! Docker-backed instance lifecycle.
//!
//! Drives the `docker` CLI through `tokio::process`. The instance runs as
//! a single container with the configuration directory mounted read-only;
//! service ports are published on localhost.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use crate::config;

use super::{
    ConfigureRequest, InstanceAddresses, InstanceConfig, InstanceLifecycle, LifecycleError,
};

const DOCKER: &str = "docker";

/// How long to wait for a stopped container to disappear. Containers run
/// with `--rm`, so removal races the next `docker run --name` otherwise.
const STOP_WAIT: Duration = Duration::from_secs(10);
const STOP_POLL: Duration = Duration::from_millis(200);

/// Container image and naming settings, usually resolved from flags with
/// environment fallbacks.
#[derive(Debug, Clone)]
pub struct ContainerSettings {
    /// Registry, `host[:port]/repo`. Empty means the environment default.
    pub registry: String,
    /// Image name. Empty means the environment default.
    pub image: String,
    /// Image tag. Empty means the environment default.
    pub tag: String,
    /// Platform, e.g. `linux/amd64`.
    pub platform: String,
    /// Explicit container name override.
    pub name: Option<String>,
    /// Hostname passed to the container, if any.
    pub hostname: Option<String>,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            registry: String::new(),
            image: String::new(),
            tag: String::new(),
            platform: config::container_platform(),
            name: None,
            hostname: None,
        }
    }
}

/// Instance configuration file contents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceSettings {
    /// Policy bundle the instance serves.
    pub policy: PolicySettings,
    /// Service listen addresses.
    pub services: ServiceSettings,
}

/// Policy section of the instance configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicySettings {
    /// Policy name.
    pub name: String,
    /// Policy bundle locator.
    pub resource: String,
}

/// Services section of the instance configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceSettings {
    /// Directory gRPC address.
    pub directory: String,
    /// REST gateway base URL.
    pub gateway: String,
    /// gRPC health address.
    pub health: String,
    /// Console URL.
    pub console: String,
}

impl ServiceSettings {
    fn resolved() -> Self {
        Self {
            directory: config::directory_svc(),
            gateway: config::gateway_svc(),
            health: config::health_svc(),
            console: config::console_url(),
        }
    }
}

/// Lifecycle controller backed by the `docker` CLI.
pub struct DockerLifecycle {
    cfg_dir: PathBuf,
    settings: ContainerSettings,
}

impl DockerLifecycle {
    /// Creates a controller rendering configurations under `cfg_dir`.
    pub const fn new(cfg_dir: PathBuf, settings: ContainerSettings) -> Self {
        Self { cfg_dir, settings }
    }

    fn container_name(&self, config_name: &str) -> String {
        self.settings
            .name
            .clone()
            .unwrap_or_else(|| config::container_name(config_name))
    }

    fn image_ref(&self) -> String {
        config::container_ref(&self.settings.registry, &self.settings.image, &self.settings.tag)
    }

    /// Arguments for `docker run`, split out for testing.
    fn run_args(&self, config: &InstanceConfig) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            config.container_name.clone(),
            "--platform".to_string(),
            self.settings.platform.clone(),
        ];
        if let Some(hostname) = &self.settings.hostname {
            args.push("--hostname".to_string());
            args.push(hostname.clone());
        }
        for port in ["8080:8080", "9292:9292", "9393:9393", "9494:9494"] {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        args.push("-v".to_string());
        args.push(format!("{}:/config:ro", self.cfg_dir.display()));
        args.push("-e".to_string());
        args.push(format!("BERYL_CONFIG=/config/{}.toml", config.config_name));
        args.push(self.image_ref());
        args
    }

    async fn docker(&self, args: &[String]) -> Result<String, LifecycleError> {
        debug!(?args, "invoking docker");
        let output = Command::new(DOCKER)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| LifecycleError::Spawn { program: DOCKER.to_string(), source })?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(LifecycleError::CommandFailed {
                command: format!("{DOCKER} {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    async fn running_containers(&self, pattern: &str) -> Result<Vec<String>, LifecycleError> {
        let listed = self
            .docker(&[
                "ps".to_string(),
                "--filter".to_string(),
                format!("name={pattern}"),
                "--format".to_string(),
                "{{.Names}}".to_string(),
            ])
            .await?;
        Ok(listed.lines().map(str::to_string).filter(|l| !l.is_empty()).collect())
    }
}

#[async_trait]
impl InstanceLifecycle for DockerLifecycle {
    async fn stop(&self, name_or_pattern: &str, wait: bool) -> Result<(), LifecycleError> {
        let running = self.running_containers(name_or_pattern).await?;
        if running.is_empty() {
            debug!(pattern = name_or_pattern, "no matching containers running");
            return Ok(());
        }
        for container in &running {
            info!(container, "stopping container");
            self.docker(&["stop".to_string(), container.clone()]).await?;
        }
        if wait {
            // `--rm` removal is asynchronous; wait for the names to free up.
            let deadline = tokio::time::Instant::now() + STOP_WAIT;
            while !self.running_containers(name_or_pattern).await?.is_empty() {
                if tokio::time::Instant::now() >= deadline {
                    return Err(LifecycleError::StillRunning {
                        container: name_or_pattern.to_string(),
                    });
                }
                tokio::time::sleep(STOP_POLL).await;
            }
        }
        Ok(())
    }

    async fn configure(&self, request: &ConfigureRequest) -> Result<InstanceConfig, LifecycleError> {
        let config_file = self.cfg_dir.join(format!("{}.toml", request.config_name));
        let config = InstanceConfig {
            config_name: request.config_name.clone(),
            config_file: config_file.clone(),
            container_name: self.container_name(&request.config_name),
        };

        if !request.render {
            if config_file.exists() {
                debug!(path = %config_file.display(), "reusing existing configuration");
                return Ok(config);
            }
            return Err(LifecycleError::MissingConfig { path: config_file });
        }

        let settings = InstanceSettings {
            policy: PolicySettings {
                name: request.policy_name.clone(),
                resource: request.policy_resource.clone(),
            },
            services: ServiceSettings::resolved(),
        };
        let rendered = toml::to_string_pretty(&settings)
            .map_err(|source| LifecycleError::ConfigEncode { path: config_file.clone(), source })?;

        tokio::fs::create_dir_all(&self.cfg_dir)
            .await
            .map_err(|source| LifecycleError::ConfigIo { path: self.cfg_dir.clone(), source })?;
        tokio::fs::write(&config_file, rendered)
            .await
            .map_err(|source| LifecycleError::ConfigIo { path: config_file.clone(), source })?;

        info!(path = %config_file.display(), "rendered instance configuration");
        Ok(config)
    }

    async fn start(
        &self,
        config: &InstanceConfig,
        wait: bool,
    ) -> Result<InstanceAddresses, LifecycleError> {
        let args = self.run_args(config);
        info!(container = %config.container_name, image = %self.image_ref(), "starting container");
        self.docker(&args).await?;

        if wait {
            let state = self
                .docker(&[
                    "inspect".to_string(),
                    "-f".to_string(),
                    "{{.State.Running}}".to_string(),
                    config.container_name.clone(),
                ])
                .await?;
            if state != "true" {
                return Err(LifecycleError::NotRunning {
                    container: config.container_name.clone(),
                });
            }
        }

        let services = ServiceSettings::resolved();
        Ok(InstanceAddresses {
            health: services.health,
            directory: services.directory,
            gateway: services.gateway,
            console: services.console,
        })
    }
}
