//! Receive test utility
//!
//! Starts a client with a printing callback and blocks until SIGINT/SIGTERM.
//!
//! ```bash
//! receive-test                       # ./config.toml when present, else defaults
//! receive-test --config bridge.toml
//! EDGEX_TOPIC='edgex/events/device/#' receive-test
//! ```

use clap::Parser;
use edgex_bridge::config::{resolve_config_path, DEFAULT_LOG_LEVEL};
use edgex_bridge::observability::init_from_level_name;
use edgex_bridge::{printing_handler, EdgexClient};
use std::path::PathBuf;
use std::process;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "receive-test", about = "Print EdgeX events received over MQTT")]
struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config_path = resolve_config_path(args.config);

    let client = match EdgexClient::new(config_path.as_deref(), Some(printing_handler())) {
        Ok(client) => client,
        Err(e) => {
            init_from_level_name(DEFAULT_LOG_LEVEL);
            error!("Failed to create client: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = client.start().await {
        error!("Failed to start client: {}", e);
        process::exit(1);
    }

    info!("Client running, press Ctrl+C to exit");
    client.wait_for_stop().await;
    info!("Exited");
}
