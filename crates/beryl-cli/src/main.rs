//! beryl - local authorizer management CLI.
//!
//! Installs authorization templates into a locally-managed instance:
//! policy, directory manifest, seed data, and assertions, ending in the
//! console.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;

/// beryl - manage a local authorizer instance
#[derive(Parser, Debug)]
#[command(name = "beryl")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Template catalog operations
    Templates(commands::templates::TemplatesCommand),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    match cli.command {
        Commands::Templates(cmd) => runtime.block_on(commands::templates::run(cmd)),
    }
}
