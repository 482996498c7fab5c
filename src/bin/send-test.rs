//! Send test utility
//!
//! Starts a client, publishes one synthetic event to `edgex/events/test`, then
//! keeps printing received events until SIGINT/SIGTERM.
//!
//! ```bash
//! send-test --config bridge.toml
//! send-test --topic edgex/events/custom/device
//! ```

use clap::Parser;
use edgex_bridge::config::{resolve_config_path, DEFAULT_LOG_LEVEL};
use edgex_bridge::observability::init_from_level_name;
use edgex_bridge::{printing_handler, EdgexClient, Event, TEST_EVENT_TOPIC};
use std::path::PathBuf;
use std::process;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "send-test", about = "Publish a synthetic EdgeX event over MQTT")]
struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Topic to publish the event to
    #[arg(long, default_value = TEST_EVENT_TOPIC)]
    topic: String,
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

    let event = Event::test_event();
    match client.publish_event(&event, &args.topic).await {
        Ok(()) => info!(topic = %args.topic, event_id = %event.id, "Published test message"),
        Err(e) => error!("Failed to publish test message: {}", e),
    }

    info!("Client running, press Ctrl+C to exit");
    client.wait_for_stop().await;
    info!("Exited");
}
