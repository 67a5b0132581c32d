//! End-to-end tests for the template install workflow.
//!
//! Every collaborator is replaced by a recording stub sharing one
//! operation log, so the tests assert the cross-component ordering the
//! workflow guarantees:
//!
//! - lifecycle phases run stop, configure, start, in that order
//! - no directory operation happens before the instance reports serving
//! - the destructive reset is gated on reachability
//! - identity data is imported strictly before domain data, file by file,
//!   in catalog order
//! - assertions run before the console opens, and a mismatch prevents the
//!   console launch
//! - declining the confirmation prompt executes nothing at all

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use beryl_core::assertions::{AssertionError, AssertionExecutor};
use beryl_core::assets::AssetFetcher;
use beryl_core::console::{ConsoleError, ConsoleLauncher};
use beryl_core::directory::{DirectoryClient, DirectoryError};
use beryl_core::health::{HealthCheck, HealthError, HealthProbe, ServingStatus};
use beryl_core::lifecycle::{
    ConfigureRequest, InstanceAddresses, InstanceConfig, InstanceLifecycle, LifecycleError,
};
use beryl_core::provision::{
    Confirm, InstallOptions, Orchestrator, Outcome, Phase, ProvisionErrorKind,
};
use beryl_core::template::{Catalog, Template};
use tempfile::TempDir;

type Log = Arc<Mutex<Vec<String>>>;

fn record(log: &Log, entry: impl Into<String>) {
    log.lock().unwrap().push(entry.into());
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// On-disk template assets plus the parsed descriptor.
struct Fixture {
    root: TempDir,
    template: Template,
}

impl Fixture {
    /// Lays out a complete template on disk: a manifest, two identity
    /// seed files, a domain seed directory with three files, and an
    /// assertion file with two passing checks. All catalog references are
    /// absolute local paths, so no test touches the network.
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path();

        std::fs::write(dir.join("manifest.yaml"), "model:\n  version: 3\n").unwrap();
        std::fs::write(dir.join("citadel_users.json"), r#"{"objects": []}"#).unwrap();
        std::fs::write(dir.join("citadel_groups.json"), r#"{"objects": []}"#).unwrap();

        let domain = dir.join("domain");
        std::fs::create_dir(&domain).unwrap();
        for name in ["apps.json", "relations.json", "resources.json"] {
            std::fs::write(domain.join(name), r#"{"relations": []}"#).unwrap();
        }

        std::fs::write(
            dir.join("assertions.json"),
            serde_json::json!({
                "assertions": [
                    {"check": {"subject": "rick@citadel.test"}, "expected": true},
                    {"check": {"subject": "morty@citadel.test"}, "expected": true},
                ]
            })
            .to_string(),
        )
        .unwrap();

        let body = serde_json::json!({
            "citadel": {
                "description": "Demo organization with nested groups",
                "assets": {
                    "policy": {
                        "name": "citadel",
                        "resource": "ghcr.io/beryl-hq/policy-citadel:latest"
                    },
                    "manifest": path(dir, "manifest.yaml"),
                    "identity_data": [
                        path(dir, "citadel_users.json"),
                        path(dir, "citadel_groups.json"),
                    ],
                    "domain_data": [domain.display().to_string()],
                    "assertions": [path(dir, "assertions.json")],
                }
            }
        })
        .to_string();

        let catalog =
            Catalog::from_json("https://templates.example.com/catalog.json", &body).unwrap();
        let template = catalog.template("citadel").unwrap();
        Self { root, template }
    }

    fn fetcher(&self) -> AssetFetcher {
        AssetFetcher::new(reqwest::Client::new(), self.root.path().join("cache"))
    }

    fn state_dir(&self) -> PathBuf {
        self.root.path().join("home")
    }
}

fn path(dir: &Path, name: &str) -> String {
    dir.join(name).display().to_string()
}

#[derive(Default)]
struct StubLifecycle {
    log: Log,
    fail_start: bool,
}

#[async_trait]
impl InstanceLifecycle for StubLifecycle {
    async fn stop(&self, name_or_pattern: &str, _wait: bool) -> Result<(), LifecycleError> {
        record(&self.log, format!("stop {name_or_pattern}"));
        Ok(())
    }

    async fn configure(
        &self,
        request: &ConfigureRequest,
    ) -> Result<InstanceConfig, LifecycleError> {
        record(&self.log, format!("configure {}", request.config_name));
        Ok(InstanceConfig {
            config_name: request.config_name.clone(),
            config_file: PathBuf::from(format!("/cfg/{}.toml", request.config_name)),
            container_name: format!("beryl-{}", request.config_name),
        })
    }

    async fn start(
        &self,
        config: &InstanceConfig,
        _wait: bool,
    ) -> Result<InstanceAddresses, LifecycleError> {
        record(&self.log, format!("start {}", config.container_name));
        if self.fail_start {
            return Err(LifecycleError::CommandFailed {
                command: "docker run".to_string(),
                stderr: "port already allocated".to_string(),
            });
        }
        Ok(InstanceAddresses {
            health: "localhost:9494".to_string(),
            directory: "localhost:9292".to_string(),
            gateway: "https://localhost:9393".to_string(),
            console: "https://localhost:8080/ui/directory".to_string(),
        })
    }
}

/// Health stub that reports NOT_SERVING for the first `serving_after`
/// checks and SERVING from then on.
struct StubHealth {
    serving_after: usize,
    calls: AtomicUsize,
}

impl StubHealth {
    fn serving() -> Self {
        Self { serving_after: 0, calls: AtomicUsize::new(0) }
    }

    fn never_serving() -> Self {
        Self { serving_after: usize::MAX, calls: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl HealthCheck for StubHealth {
    async fn check(&self, _address: &str, _service: &str) -> Result<ServingStatus, HealthError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call >= self.serving_after {
            Ok(ServingStatus::Serving)
        } else {
            Ok(ServingStatus::NotServing)
        }
    }
}

#[derive(Default)]
struct StubDirectory {
    log: Log,
    unreachable: bool,
}

#[async_trait]
impl DirectoryClient for StubDirectory {
    async fn ensure_reachable(&self) -> Result<(), DirectoryError> {
        record(&self.log, "reachable?");
        if self.unreachable {
            return Err(DirectoryError::Unreachable { host: "localhost:9292".to_string() });
        }
        Ok(())
    }

    async fn delete_manifest(&self) -> Result<(), DirectoryError> {
        record(&self.log, "delete-manifest");
        Ok(())
    }

    async fn set_manifest(&self, manifest: &Path) -> Result<(), DirectoryError> {
        record(&self.log, format!("set-manifest {}", file_name(manifest)));
        Ok(())
    }

    async fn import_file(&self, file: &Path) -> Result<(), DirectoryError> {
        record(&self.log, format!("import {}", file_name(file)));
        Ok(())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name().unwrap().to_string_lossy().to_string()
}

struct StubExecutor {
    log: Log,
    verdict: bool,
}

#[async_trait]
impl AssertionExecutor for StubExecutor {
    async fn execute(&self, _check: &serde_json::Value) -> Result<bool, AssertionError> {
        record(&self.log, "check");
        Ok(self.verdict)
    }
}

#[derive(Default)]
struct StubConsole {
    log: Log,
}

#[async_trait]
impl ConsoleLauncher for StubConsole {
    async fn open(&self, url: &str) -> Result<(), ConsoleError> {
        record(&self.log, format!("console {url}"));
        Ok(())
    }
}

struct Answer {
    yes: bool,
    calls: AtomicUsize,
}

impl Answer {
    fn new(yes: bool) -> Self {
        Self { yes, calls: AtomicUsize::new(0) }
    }
}

impl Confirm for Answer {
    fn confirm(&self, _prompt: &str) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.yes
    }
}

/// Everything a test needs to assemble an orchestrator.
struct Collaborators {
    log: Log,
    fetcher: AssetFetcher,
    lifecycle: StubLifecycle,
    health: StubHealth,
    directory: StubDirectory,
    executor: StubExecutor,
    console: StubConsole,
    confirm: Answer,
    state_dir: PathBuf,
}

impl Collaborators {
    fn new(fixture: &Fixture) -> Self {
        let log: Log = Log::default();
        Self {
            fetcher: fixture.fetcher(),
            lifecycle: StubLifecycle { log: log.clone(), fail_start: false },
            health: StubHealth::serving(),
            directory: StubDirectory { log: log.clone(), unreachable: false },
            executor: StubExecutor { log: log.clone(), verdict: true },
            console: StubConsole { log: log.clone() },
            confirm: Answer::new(true),
            state_dir: fixture.state_dir(),
            log,
        }
    }

    fn orchestrator(&self) -> Orchestrator<'_> {
        Orchestrator {
            fetcher: &self.fetcher,
            probe: HealthProbe::default(),
            lifecycle: &self.lifecycle,
            health: &self.health,
            directory: &self.directory,
            assertions: &self.executor,
            console: &self.console,
            confirm: &self.confirm,
            state_dir: self.state_dir.clone(),
            stop_pattern: "beryl".to_string(),
            health_service: "model".to_string(),
        }
    }
}

#[tokio::test]
async fn full_install_runs_every_phase_in_order() {
    let fixture = Fixture::new();
    let collab = Collaborators::new(&fixture);

    let outcome = collab
        .orchestrator()
        .install(&fixture.template, &InstallOptions::default())
        .await
        .unwrap();

    let Outcome::Completed(run) = outcome else {
        panic!("install did not complete");
    };
    assert_eq!(run.phase(), Phase::Completed);
    assert_eq!(run.template(), "citadel");
    assert!(run.error().is_none());

    // The shared log captures the cross-component order: identity files in
    // catalog order (users before groups, despite sorting the other way),
    // domain files in name order from the directory expansion, assertions
    // before the console.
    assert_eq!(
        entries(&collab.log),
        vec![
            "stop beryl",
            "configure citadel",
            "start beryl-citadel",
            "reachable?",
            "delete-manifest",
            "set-manifest manifest.yaml",
            "import citadel_users.json",
            "import citadel_groups.json",
            "import apps.json",
            "import relations.json",
            "import resources.json",
            "check",
            "check",
            "console https://localhost:8080/ui/directory",
        ]
    );

    // The CLI state file names the configuration this install activated.
    let state: serde_json::Value = serde_json::from_slice(
        &std::fs::read(collab.state_dir.join("cli.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(state["active"]["config"], "citadel");
}

#[tokio::test]
async fn identity_data_is_imported_strictly_before_domain_data() {
    let fixture = Fixture::new();
    let collab = Collaborators::new(&fixture);

    collab
        .orchestrator()
        .install(&fixture.template, &InstallOptions::default())
        .await
        .unwrap();

    let log = entries(&collab.log);
    let imports: Vec<&str> =
        log.iter().filter(|op| op.starts_with("import ")).map(String::as_str).collect();
    assert_eq!(imports.len(), 5);
    let last_identity = imports
        .iter()
        .rposition(|op| op.contains("citadel_"))
        .unwrap();
    let first_domain = imports
        .iter()
        .position(|op| !op.contains("citadel_"))
        .unwrap();
    assert!(last_identity < first_domain, "identity import after domain import: {imports:?}");
}

#[tokio::test]
async fn declining_the_prompt_executes_nothing() {
    let fixture = Fixture::new();
    let collab = Collaborators::new(&fixture);
    let collab = Collaborators { confirm: Answer::new(false), ..collab };

    let outcome = collab
        .orchestrator()
        .install(&fixture.template, &InstallOptions::default())
        .await
        .unwrap();

    assert!(matches!(outcome, Outcome::Declined));
    assert_eq!(collab.confirm.calls.load(Ordering::SeqCst), 1);
    assert!(entries(&collab.log).is_empty());
    assert!(!collab.state_dir.join("cli.json").exists());
}

#[tokio::test]
async fn force_skips_the_prompt() {
    let fixture = Fixture::new();
    let collab = Collaborators::new(&fixture);
    let collab = Collaborators { confirm: Answer::new(false), ..collab };

    let opts = InstallOptions { force: true, ..InstallOptions::default() };
    let outcome = collab.orchestrator().install(&fixture.template, &opts).await.unwrap();

    assert!(matches!(outcome, Outcome::Completed(_)));
    assert_eq!(collab.confirm.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn unhealthy_instance_fails_before_any_directory_operation() {
    let fixture = Fixture::new();
    let collab = Collaborators::new(&fixture);
    let collab = Collaborators { health: StubHealth::never_serving(), ..collab };

    let err = collab
        .orchestrator()
        .install(&fixture.template, &InstallOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.phase, Phase::AwaitingHealth);
    assert!(matches!(err.kind, ProvisionErrorKind::ServiceUnavailable { .. }));

    // The probe kept polling until the budget expired.
    assert!(collab.health.calls.load(Ordering::SeqCst) > 1);

    // Nothing after the health gate ran: no reset, no imports, no console.
    assert_eq!(
        entries(&collab.log),
        vec!["stop beryl", "configure citadel", "start beryl-citadel"]
    );
}

#[tokio::test]
async fn start_failure_names_the_starting_phase() {
    let fixture = Fixture::new();
    let mut collab = Collaborators::new(&fixture);
    collab.lifecycle.fail_start = true;

    let err = collab
        .orchestrator()
        .install(&fixture.template, &InstallOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.phase, Phase::Starting);
    assert!(matches!(err.kind, ProvisionErrorKind::Lifecycle(_)));
    assert!(!entries(&collab.log).contains(&"reachable?".to_string()));
}

#[tokio::test]
async fn unreachable_directory_aborts_before_the_reset() {
    let fixture = Fixture::new();
    let mut collab = Collaborators::new(&fixture);
    collab.directory.unreachable = true;

    let err = collab
        .orchestrator()
        .install(&fixture.template, &InstallOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.phase, Phase::ResettingDirectory);
    assert!(matches!(err.kind, ProvisionErrorKind::Directory(_)));

    let log = entries(&collab.log);
    assert!(log.contains(&"reachable?".to_string()));
    assert!(!log.iter().any(|op| op.starts_with("delete") || op.starts_with("import")));
}

#[tokio::test]
async fn assertion_mismatch_prevents_the_console_launch() {
    let fixture = Fixture::new();
    let mut collab = Collaborators::new(&fixture);
    collab.executor.verdict = false;

    let err = collab
        .orchestrator()
        .install(&fixture.template, &InstallOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.phase, Phase::RunningAssertions);
    assert!(matches!(
        err.kind,
        ProvisionErrorKind::Assertion(AssertionError::Mismatch { index: 0, .. })
    ));

    let log = entries(&collab.log);
    // The first mismatch aborts; the second assertion never runs.
    assert_eq!(log.iter().filter(|op| op.as_str() == "check").count(), 1);
    assert!(!log.iter().any(|op| op.starts_with("console")));
}

#[tokio::test]
async fn no_tests_skips_assertions_but_still_opens_the_console() {
    let fixture = Fixture::new();
    let collab = Collaborators::new(&fixture);

    let opts = InstallOptions { no_tests: true, ..InstallOptions::default() };
    collab.orchestrator().install(&fixture.template, &opts).await.unwrap();

    let log = entries(&collab.log);
    assert!(!log.contains(&"check".to_string()));
    assert!(log.last().is_some_and(|op| op.starts_with("console")));
}

#[tokio::test]
async fn no_console_completes_without_a_launch() {
    let fixture = Fixture::new();
    let collab = Collaborators::new(&fixture);

    let opts = InstallOptions { no_console: true, ..InstallOptions::default() };
    let outcome = collab.orchestrator().install(&fixture.template, &opts).await.unwrap();

    assert!(matches!(outcome, Outcome::Completed(_)));
    assert!(!entries(&collab.log).iter().any(|op| op.starts_with("console")));
}

#[tokio::test]
async fn invalid_config_name_override_fails_before_the_prompt() {
    let fixture = Fixture::new();
    let collab = Collaborators::new(&fixture);

    let opts = InstallOptions {
        config_name: Some("../escape".to_string()),
        ..InstallOptions::default()
    };
    let err = collab.orchestrator().install(&fixture.template, &opts).await.unwrap_err();

    assert_eq!(err.phase, Phase::Idle);
    assert!(matches!(err.kind, ProvisionErrorKind::Template(_)));
    assert_eq!(collab.confirm.calls.load(Ordering::SeqCst), 0);
    assert!(entries(&collab.log).is_empty());
}

#[tokio::test]
async fn config_name_override_is_threaded_through() {
    let fixture = Fixture::new();
    let collab = Collaborators::new(&fixture);

    let opts = InstallOptions {
        config_name: Some("citadel-dev".to_string()),
        ..InstallOptions::default()
    };
    let outcome = collab.orchestrator().install(&fixture.template, &opts).await.unwrap();

    let Outcome::Completed(run) = outcome else {
        panic!("install did not complete");
    };
    assert_eq!(run.config_name(), "citadel-dev");
    assert_eq!(run.instance().unwrap().container_name, "beryl-citadel-dev");

    let state: serde_json::Value = serde_json::from_slice(
        &std::fs::read(collab.state_dir.join("cli.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(state["active"]["config"], "citadel-dev");
}
