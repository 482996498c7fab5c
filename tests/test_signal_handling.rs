//! SIGTERM delivered to the process stops a started client
//!
//! Kept in its own test binary: the signal reaches every watcher in the process.

#![cfg(unix)]

use edgex_bridge::testing::InMemoryBus;
use edgex_bridge::{ClientState, Config, EdgexClient};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

#[tokio::test]
async fn test_sigterm_stops_client() {
    let bus = Arc::new(InMemoryBus::new());
    let client = EdgexClient::with_bus(Config::default(), bus.clone(), None);
    client.start().await.unwrap();

    let status = Command::new("kill")
        .args(["-TERM", &std::process::id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    timeout(Duration::from_secs(5), client.wait_for_stop())
        .await
        .expect("client should stop after SIGTERM");
    assert_eq!(client.state(), ClientState::Stopped);
    assert_eq!(bus.disconnect_calls(), 1);
}
