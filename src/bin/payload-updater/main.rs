//! payload-updater CLI entry point.

mod cli;

use clap::Parser;
use cli::Cli;
use payload_updater::{AgentBuilder, Error};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Build configuration
    let log_json = cli.log_json;
    let config = cli.into_config()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if log_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    info!("payload-updater v{}", env!("CARGO_PKG_VERSION"));

    if let Err(Error::Config(message)) = config.validate() {
        Cli::usage_error(message);
    }

    // Build and run the agent
    let agent = AgentBuilder::new(config).build().await?;

    // Run until shutdown
    agent.run().await?;

    info!("Goodbye!");
    Ok(())
}
