//! stornet - Azure Storage network rules management tool
//!
//! Command-line front end for managing the network rules of Azure Storage
//! accounts.

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stornet::cli::{Cli, Commands};
use stornet::config;
use stornet::error::Result;

#[tokio::main]
async fn main() {
    // Parse command-line arguments
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("Error: {}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Config commands must work before the configuration is complete
    let config = match &cli.command {
        Commands::Config { .. } => config::load_config_no_validation().await?,
        _ => config::load_config().await?,
    };

    init_logging(cli.debug || config.debug);
    info!("Starting stornet");

    cli.execute(config).await
}

fn init_logging(debug: bool) {
    let default_filter = if debug { "stornet=debug" } else { "stornet=info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
