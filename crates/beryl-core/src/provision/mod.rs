//! The provisioning orchestrator.
//!
//! Installing a template drives the managed instance through a strict
//! phase sequence: stop, configure, start, await health, reset the
//! directory, apply the manifest, import identity then domain data, run
//! assertions, and hand off to the console. Each phase is awaited to
//! completion; the first error marks the run failed and nothing after it
//! executes. There is no compensating rollback: a failure during the
//! directory phases can leave the instance partially applied, and the
//! operator recovers by re-running the install (the reset makes the
//! workflow idempotent).
//!
//! Runs against the same instance are not coordinated; callers must
//! serialize installs per instance.

use std::path::PathBuf;

use thiserror::Error;
use tracing::{error, info};

use crate::assertions::{AssertionError, AssertionExecutor, AssertionRunner};
use crate::assets::{AssetCategory, AssetError, AssetFetcher};
use crate::console::{ConsoleError, ConsoleLauncher};
use crate::directory::bootstrap::{OrderedPathSet, expand_data_ref};
use crate::directory::{DirectoryBootstrapper, DirectoryClient, DirectoryError};
use crate::health::{HealthCheck, HealthProbe};
use crate::lifecycle::{ConfigureRequest, InstanceConfig, InstanceLifecycle, LifecycleError};
use crate::template::{Template, TemplateError, validate_config_name};

/// Name of the CLI state file under the beryl home directory.
const STATE_FILE: &str = "cli.json";

/// Phases of a provisioning run, in execution order.
///
/// The lifecycle is linear: the only branch is the terminal `Failed`
/// state, reachable from any non-terminal phase. No phase after
/// `AwaitingHealth` begins unless the instance reported serving, and
/// `ImportingDomainData` never begins before `ImportingIdentityData`
/// completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Run created, nothing executed yet.
    Idle,
    /// Stopping any running instance.
    Stopping,
    /// Rendering the instance configuration.
    Configuring,
    /// Starting the instance.
    Starting,
    /// Polling the health endpoint.
    AwaitingHealth,
    /// Destructive directory reset.
    ResettingDirectory,
    /// Uploading the template manifest.
    ApplyingManifest,
    /// Importing identity seed data.
    ImportingIdentityData,
    /// Importing domain seed data.
    ImportingDomainData,
    /// Executing template assertions.
    RunningAssertions,
    /// Opening the console.
    LaunchingConsole,
    /// Run finished successfully.
    Completed,
    /// Run aborted; see the recorded error.
    Failed,
}

impl Phase {
    /// Stable name used in logs and error messages.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Stopping => "stopping",
            Self::Configuring => "configuring",
            Self::Starting => "starting",
            Self::AwaitingHealth => "awaiting-health",
            Self::ResettingDirectory => "resetting-directory",
            Self::ApplyingManifest => "applying-manifest",
            Self::ImportingIdentityData => "importing-identity-data",
            Self::ImportingDomainData => "importing-domain-data",
            Self::RunningAssertions => "running-assertions",
            Self::LaunchingConsole => "launching-console",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Underlying cause of a provisioning failure.
#[derive(Debug, Error)]
pub enum ProvisionErrorKind {
    /// Template fetch, parse, or reference resolution failure.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// Stop, configure, or start failure.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// The health probe budget expired without a serving verdict.
    #[error("health endpoint {address} not SERVING for service {service:?}")]
    ServiceUnavailable {
        /// Health endpoint address.
        address: String,
        /// Health service name.
        service: String,
    },

    /// Asset download or caching failure.
    #[error(transparent)]
    Asset(#[from] AssetError),

    /// Directory reset, manifest, or import failure. Directory state may
    /// be left partially applied.
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// An assertion failed or could not be executed.
    #[error(transparent)]
    Assertion(#[from] AssertionError),

    /// The console could not be launched.
    #[error(transparent)]
    Console(#[from] ConsoleError),

    /// The CLI state file could not be persisted.
    #[error("failed to persist CLI state at {path}")]
    State {
        /// State file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// A provisioning failure, carrying the phase it occurred in.
#[derive(Debug, Error)]
#[error("provisioning failed during {phase}")]
pub struct ProvisionError {
    /// The phase that was executing when the run failed.
    pub phase: Phase,
    /// The underlying cause.
    #[source]
    pub kind: ProvisionErrorKind,
}

/// Caller-supplied switches for one install.
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Skip the interactive confirmation.
    pub force: bool,
    /// Reuse the existing instance configuration instead of rendering.
    pub no_configure: bool,
    /// Skip the assertion phase.
    pub no_tests: bool,
    /// Skip the console hand-off.
    pub no_console: bool,
    /// Configuration name override (defaults to the template name).
    pub config_name: Option<String>,
}

/// Result of an install invocation.
#[derive(Debug)]
pub enum Outcome {
    /// All phases completed; the run record is returned for inspection.
    Completed(ProvisioningRun),
    /// The user declined the confirmation prompt. Nothing was executed;
    /// this is an early success, not an error.
    Declined,
}

/// Interactive yes/no confirmation.
pub trait Confirm: Send + Sync {
    /// Asks the user to confirm; `false` declines.
    fn confirm(&self, prompt: &str) -> bool;
}

/// State of one provisioning run.
///
/// Owned by a single install invocation and threaded through each phase;
/// never persisted across runs.
#[derive(Debug)]
pub struct ProvisioningRun {
    template: String,
    config_name: String,
    phase: Phase,
    error: Option<String>,
    instance: Option<InstanceConfig>,
}

impl ProvisioningRun {
    fn new(template: &Template, config_name: String) -> Self {
        Self {
            template: template.name.clone(),
            config_name,
            phase: Phase::Idle,
            error: None,
            instance: None,
        }
    }

    /// Template name this run installs.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Configuration name (template name or override).
    pub fn config_name(&self) -> &str {
        &self.config_name
    }

    /// Current phase.
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// The recorded failure, if the run failed.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Instance configuration, once the configure phase completed.
    pub const fn instance(&self) -> Option<&InstanceConfig> {
        self.instance.as_ref()
    }

    fn advance(&mut self, phase: Phase) {
        info!(phase = %phase, template = %self.template, "entering phase");
        self.phase = phase;
    }

    fn fail(&mut self, kind: impl Into<ProvisionErrorKind>) -> ProvisionError {
        let err = ProvisionError { phase: self.phase, kind: kind.into() };
        error!(phase = %err.phase, error = %err.kind, "provisioning failed");
        self.error = Some(err.kind.to_string());
        self.phase = Phase::Failed;
        err
    }
}

/// Composes the collaborators into the template install workflow.
pub struct Orchestrator<'a> {
    /// Asset resolver and cache.
    pub fetcher: &'a AssetFetcher,
    /// Readiness poll policy.
    pub probe: HealthProbe,
    /// Instance lifecycle controller.
    pub lifecycle: &'a dyn InstanceLifecycle,
    /// Health endpoint client.
    pub health: &'a dyn HealthCheck,
    /// Directory service client.
    pub directory: &'a dyn DirectoryClient,
    /// Assertion check executor.
    pub assertions: &'a dyn AssertionExecutor,
    /// Console launcher.
    pub console: &'a dyn ConsoleLauncher,
    /// Confirmation prompt.
    pub confirm: &'a dyn Confirm,
    /// Beryl home directory for the CLI state file.
    pub state_dir: PathBuf,
    /// Container name pattern passed to the stop phase.
    pub stop_pattern: String,
    /// Health service name to probe.
    pub health_service: String,
}

impl Orchestrator<'_> {
    /// Installs `template`, driving every phase to completion.
    ///
    /// Returns [`Outcome::Declined`] without executing anything when the
    /// user declines the confirmation prompt. Any phase failure is
    /// surfaced as a [`ProvisionError`] naming the phase; subsequent
    /// phases do not execute.
    pub async fn install(
        &self,
        template: &Template,
        opts: &InstallOptions,
    ) -> Result<Outcome, ProvisionError> {
        let config_name =
            opts.config_name.clone().unwrap_or_else(|| template.name.clone());
        let mut run = ProvisioningRun::new(template, config_name.clone());

        if let Some(name) = &opts.config_name {
            validate_config_name(name).map_err(|e| run.fail(e))?;
        }

        if !opts.force {
            let prompt = "Installing this template will completely reset your \
                          beryl configuration. Do you want to continue?";
            if !self.confirm.confirm(prompt) {
                info!(template = %template.name, "install declined");
                return Ok(Outcome::Declined);
            }
        }

        run.advance(Phase::Stopping);
        self.lifecycle
            .stop(&self.stop_pattern, true)
            .await
            .map_err(|e| run.fail(e))?;

        run.advance(Phase::Configuring);
        let request = ConfigureRequest {
            config_name: config_name.clone(),
            policy_name: template.assets.policy.name.clone(),
            policy_resource: template.assets.policy.resource.clone(),
            render: !opts.no_configure,
        };
        let instance = self.lifecycle.configure(&request).await.map_err(|e| run.fail(e))?;
        self.persist_state(&instance).map_err(|e| run.fail(e))?;
        run.instance = Some(instance.clone());

        run.advance(Phase::Starting);
        let addresses = self.lifecycle.start(&instance, true).await.map_err(|e| run.fail(e))?;

        run.advance(Phase::AwaitingHealth);
        let serving = self
            .probe
            .await_serving(self.health, &addresses.health, &self.health_service)
            .await;
        if !serving {
            return Err(run.fail(ProvisionErrorKind::ServiceUnavailable {
                address: addresses.health.clone(),
                service: self.health_service.clone(),
            }));
        }

        let bootstrap = DirectoryBootstrapper::new(self.directory);

        run.advance(Phase::ResettingDirectory);
        bootstrap.reset().await.map_err(|e| run.fail(e))?;

        run.advance(Phase::ApplyingManifest);
        let manifest = self
            .resolve_asset(template, &config_name, AssetCategory::Model, &template.assets.manifest)
            .await
            .map_err(|e| run.fail(e))?;
        bootstrap.apply_manifest(&manifest).await.map_err(|e| run.fail(e))?;

        // Identity and domain data stay in two separate ordered sequences;
        // the identity import completes before any domain file is touched.
        run.advance(Phase::ImportingIdentityData);
        let identity_files = self
            .resolve_data(template, &config_name, &template.assets.identity_data)
            .await
            .map_err(|e| run.fail(e))?;
        bootstrap.import_files(&identity_files).await.map_err(|e| run.fail(e))?;

        run.advance(Phase::ImportingDomainData);
        let domain_files = self
            .resolve_data(template, &config_name, &template.assets.domain_data)
            .await
            .map_err(|e| run.fail(e))?;
        bootstrap.import_files(&domain_files).await.map_err(|e| run.fail(e))?;

        if opts.no_tests {
            info!("skipping assertions (--no-tests)");
        } else {
            run.advance(Phase::RunningAssertions);
            let mut files = Vec::with_capacity(template.assets.assertions.len());
            for asset in &template.assets.assertions {
                let file = self
                    .resolve_asset(template, &config_name, AssetCategory::Assertions, asset)
                    .await
                    .map_err(|e| run.fail(e))?;
                files.push(file);
            }
            AssertionRunner::run(self.assertions, &files).await.map_err(|e| run.fail(e))?;
        }

        if opts.no_console {
            info!("skipping console launch (--no-console)");
        } else {
            run.advance(Phase::LaunchingConsole);
            self.console.open(&addresses.console).await.map_err(|e| run.fail(e))?;
        }

        run.advance(Phase::Completed);
        Ok(Outcome::Completed(run))
    }

    /// Resolves one asset reference through the template base and cache.
    async fn resolve_asset(
        &self,
        template: &Template,
        label: &str,
        category: AssetCategory,
        asset: &str,
    ) -> Result<PathBuf, ProvisionErrorKind> {
        let reference = template.abs_ref(asset)?;
        Ok(self.fetcher.resolve(label, category, &reference).await?)
    }

    /// Resolves one seed data category into an ordered file sequence.
    async fn resolve_data(
        &self,
        template: &Template,
        label: &str,
        refs: &[String],
    ) -> Result<Vec<PathBuf>, ProvisionErrorKind> {
        let mut files = OrderedPathSet::new();
        for asset in refs {
            let path = self.resolve_asset(template, label, AssetCategory::Data, asset).await?;
            for file in expand_data_ref(&path)? {
                files.insert(file);
            }
        }
        Ok(files.as_slice().to_vec())
    }

    /// Persists which configuration is active, so later CLI invocations
    /// address the instance this install created.
    fn persist_state(&self, instance: &InstanceConfig) -> Result<(), ProvisionErrorKind> {
        let path = self.state_dir.join(STATE_FILE);
        let state = serde_json::json!({
            "active": {
                "config": instance.config_name,
                "config_file": instance.config_file,
                "container_name": instance.container_name,
            }
        });
        let write = || -> std::io::Result<()> {
            std::fs::create_dir_all(&self.state_dir)?;
            let body = serde_json::to_vec_pretty(&state).map_err(std::io::Error::other)?;
            std::fs::write(&path, body)
        };
        write().map_err(|source| ProvisionErrorKind::State { path: path.clone(), source })
    }
}
