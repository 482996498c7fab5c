//! OS signal watcher
//!
//! Turns the first SIGINT or SIGTERM into [`EdgexClient::stop`]. The watcher also
//! exits when the client is stopped by other means. Targets without these
//! signals get no watcher and stopping is left to the caller.

use crate::client::EdgexClient;
use tokio::task::JoinHandle;

#[cfg(unix)]
pub fn spawn_signal_watcher(client: EdgexClient) -> Option<JoinHandle<()>> {
    use crate::client::stop_requested;
    use crate::dispatch_span;
    use tokio::signal::unix::{signal, SignalKind};
    use tracing::{debug, info, warn, Instrument};

    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Failed to register SIGINT handler: {}", e);
            return None;
        }
    };
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}", e);
            return None;
        }
    };
    let mut stop_rx = client.stop_receiver();

    let watcher = async move {
        tokio::select! {
            _ = stop_requested(&mut stop_rx) => {
                debug!("Client stopped, signal watcher exiting");
                return;
            }
            _ = sigint.recv() => info!("Received SIGINT, stopping client"),
            _ = sigterm.recv() => info!("Received SIGTERM, stopping client"),
        }
        client.stop().await;
    };

    Some(tokio::spawn(
        watcher.instrument(dispatch_span!(worker = "signals")),
    ))
}

#[cfg(not(unix))]
pub fn spawn_signal_watcher(_client: EdgexClient) -> Option<JoinHandle<()>> {
    None
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::testing::InMemoryBus;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_watcher_exits_when_client_stops() {
        let bus = Arc::new(InMemoryBus::new());
        let client = EdgexClient::with_bus(Config::default(), bus.clone(), None);
        client.set_signal_handling(false);
        client.start().await.unwrap();

        let watcher = spawn_signal_watcher(client.clone()).unwrap();
        client.stop().await;

        tokio::time::timeout(Duration::from_secs(2), watcher)
            .await
            .expect("watcher should exit after stop")
            .unwrap();
        assert_eq!(bus.disconnect_calls(), 1);
    }
}
