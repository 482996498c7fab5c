//! EdgeX Bridge - command line entry point
//!
//! `run` subscribes to the configured topic and prints every event until
//! SIGINT/SIGTERM. `config --show` prints the effective configuration.

use clap::{Parser, Subcommand};
use edgex_bridge::config::{resolve_config_path, Config, DEFAULT_LOG_LEVEL};
use edgex_bridge::observability::init_from_level_name;
use edgex_bridge::{printing_handler, EdgexClient};
use std::path::PathBuf;
use std::process;
use tracing::{error, info};

/// MQTT client for EdgeX events
#[derive(Parser)]
#[command(name = "edgex-bridge")]
#[command(about = "Receive and publish EdgeX events over MQTT")]
#[command(version)]
struct Cli {
    /// Configuration file path (defaults to ./config.toml when present)
    #[arg(short, long, value_name = "FILE", env = "EDGEX_CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Environment variable prefix for overrides
    #[arg(long, value_name = "PREFIX")]
    env_prefix: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Receive events and print them until signalled
    Run,
    /// Validate configuration
    Config {
        /// Show the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config_path = resolve_config_path(cli.config);
    let config = match Config::load(config_path.as_deref(), cli.env_prefix.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            init_from_level_name(DEFAULT_LOG_LEVEL);
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    init_from_level_name(&config.log_level);
    if let Some(path) = &config_path {
        info!("Loaded configuration from: {}", path.display());
    }

    let result = match cli.command {
        Commands::Run => run_client(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

async fn run_client(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        "Starting edgex-bridge v{}",
        env!("CARGO_PKG_VERSION")
    );

    let client = EdgexClient::from_config(config, Some(printing_handler()))?;
    client.start().await?;

    info!("Client running, press Ctrl+C to exit");
    client.wait_for_stop().await;

    info!("Application shutdown complete");
    Ok(())
}

fn handle_config_command(config: &Config, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    info!("Configuration is valid");
    if show {
        println!("{}", config.to_display_toml()?);
    }
    Ok(())
}
