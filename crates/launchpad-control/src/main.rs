//! Launchpad control service binary.
//!
//! Serves the provisioning API until interrupted.

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use launchpad_control::{ControlService, LaunchpadConfig};

/// Provision task manager instances on demand.
#[derive(Debug, Parser)]
#[command(name = "launchpad-control", version, about)]
struct Cli {
    /// Configuration file. Defaults to `launchpad.toml` in the working
    /// directory if present.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("launchpad_control=info".parse()?),
        )
        .init();

    info!("launchpad control service starting");

    let config = match &cli.config {
        Some(path) => LaunchpadConfig::from_file(path),
        None => LaunchpadConfig::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            return Err(e.into());
        }
    };

    info!(
        listen = %config.server.listen,
        base_domain = %config.domain.base_domain,
        mode = ?config.collaborators.mode,
        compensate_on_failure = config.orchestrator.compensate_on_failure,
        "configuration loaded"
    );

    ControlService::new(config).run().await?;
    Ok(())
}
