//! `beryl templates` - list and install authorization templates.

use std::io::{self, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use beryl_core::assertions::HttpAssertionExecutor;
use beryl_core::assets::AssetFetcher;
use beryl_core::config;
use beryl_core::console::BrowserLauncher;
use beryl_core::directory::HttpDirectoryClient;
use beryl_core::health::{GrpcHealth, HealthProbe};
use beryl_core::lifecycle::DockerLifecycle;
use beryl_core::lifecycle::docker::ContainerSettings;
use beryl_core::provision::{Confirm, InstallOptions, Orchestrator, Outcome};
use beryl_core::template::Catalog;
use clap::{Args, Subcommand};
use tracing::debug;

#[derive(Args, Debug)]
pub struct TemplatesCommand {
    #[command(subcommand)]
    command: TemplatesSubcommand,
}

#[derive(Subcommand, Debug)]
enum TemplatesSubcommand {
    /// List templates in the catalog
    #[command(alias = "ls")]
    List {
        /// Catalog URL
        #[arg(long, env = "BERYL_CATALOG_URL", default_value = config::DEFAULT_CATALOG_URL)]
        catalog: String,
    },

    /// Install a template, resetting the local instance
    Install(InstallArgs),
}

#[derive(Args, Debug)]
struct InstallArgs {
    /// Template name
    name: String,

    /// Catalog URL
    #[arg(long, env = "BERYL_CATALOG_URL", default_value = config::DEFAULT_CATALOG_URL)]
    catalog: String,

    /// Answer yes to the confirmation prompt
    #[arg(short, long)]
    force: bool,

    /// Reuse the existing instance configuration
    #[arg(long)]
    no_configure: bool,

    /// Skip template assertions
    #[arg(long)]
    no_tests: bool,

    /// Do not open the console when done
    #[arg(long)]
    no_console: bool,

    /// Configuration name (defaults to the template name)
    #[arg(long)]
    config_name: Option<String>,

    /// Container registry, `host[:port]/org`
    #[arg(long, env = "CONTAINER_REGISTRY", default_value = "", hide_default_value = true)]
    container_registry: String,

    /// Container image name
    #[arg(long, env = "CONTAINER_IMAGE", default_value = "", hide_default_value = true)]
    container_image: String,

    /// Container image tag
    #[arg(long, env = "CONTAINER_TAG", default_value = "", hide_default_value = true)]
    container_tag: String,

    /// Container platform, e.g. `linux/amd64`
    #[arg(long, env = "CONTAINER_PLATFORM")]
    container_platform: Option<String>,

    /// Container name override
    #[arg(long, env = "CONTAINER_NAME")]
    container_name: Option<String>,

    /// Hostname passed to the container
    #[arg(long, env = "CONTAINER_HOSTNAME")]
    hostname: Option<String>,

    /// Directory gateway base URL
    #[arg(long, env = "BERYL_GATEWAY_SVC")]
    host: Option<String>,

    /// Skip TLS verification against the gateway
    #[arg(short, long)]
    insecure: bool,

    /// Directory API key
    #[arg(long, env = "BERYL_API_KEY")]
    api_key: Option<String>,
}

impl InstallArgs {
    fn container_settings(&self) -> ContainerSettings {
        ContainerSettings {
            registry: self.container_registry.clone(),
            image: self.container_image.clone(),
            tag: self.container_tag.clone(),
            platform: self
                .container_platform
                .clone()
                .unwrap_or_else(config::container_platform),
            name: self.container_name.clone(),
            hostname: self.hostname.clone(),
        }
    }

    fn gateway(&self) -> String {
        self.host.clone().unwrap_or_else(config::gateway_svc)
    }

    fn install_options(&self) -> InstallOptions {
        InstallOptions {
            force: self.force,
            no_configure: self.no_configure,
            no_tests: self.no_tests,
            no_console: self.no_console,
            config_name: self.config_name.clone(),
        }
    }
}

pub async fn run(cmd: TemplatesCommand) -> Result<()> {
    match cmd.command {
        TemplatesSubcommand::List { catalog } => list(&catalog).await,
        TemplatesSubcommand::Install(args) => install(&args).await,
    }
}

async fn list(catalog_url: &str) -> Result<()> {
    let http = reqwest::Client::new();
    let catalog = Catalog::fetch(&http, catalog_url).await?;
    for (name, description) in catalog.list() {
        println!("{name:<24} {description}");
    }
    Ok(())
}

async fn install(args: &InstallArgs) -> Result<()> {
    let http = reqwest::Client::new();
    let catalog = Catalog::fetch(&http, &args.catalog).await?;
    let template = catalog.template(&args.name)?;
    debug!(template = %template.name, "resolved template");

    // A local instance usually serves a self-signed certificate; pass
    // --insecure to accept it.
    let local_http = reqwest::Client::builder()
        .danger_accept_invalid_certs(args.insecure)
        .build()
        .context("failed to build gateway HTTP client")?;

    let fetcher = AssetFetcher::new(http, config::templates_dir());
    let lifecycle = DockerLifecycle::new(config::cfg_dir(), args.container_settings());
    let health = GrpcHealth::new(Duration::from_secs(30));
    let gateway = args.gateway();
    let directory =
        HttpDirectoryClient::new(local_http.clone(), gateway.clone(), args.api_key.clone());
    let assertions = HttpAssertionExecutor::new(local_http, gateway);
    let console = BrowserLauncher;
    let confirm = StdinConfirm;

    let orchestrator = Orchestrator {
        fetcher: &fetcher,
        probe: HealthProbe::default(),
        lifecycle: &lifecycle,
        health: &health,
        directory: &directory,
        assertions: &assertions,
        console: &console,
        confirm: &confirm,
        state_dir: config::beryl_dir(),
        stop_pattern: "beryl".to_string(),
        health_service: config::HEALTH_SERVICE.to_string(),
    };

    match orchestrator.install(&template, &args.install_options()).await? {
        Outcome::Completed(run) => {
            println!(
                "template '{}' installed as configuration '{}'",
                args.name,
                run.config_name()
            );
        },
        Outcome::Declined => {
            println!("aborted");
        },
    }
    Ok(())
}

/// Interactive y/N prompt on standard input.
struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&self, prompt: &str) -> bool {
        print!("{prompt} [y/N] ");
        if io::stdout().flush().is_err() {
            return false;
        }
        let mut line = String::new();
        if io::stdin().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }
}
