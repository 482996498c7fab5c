//! EdgeX Bridge - MQTT event client
//!
//! Connects to an MQTT broker, subscribes to a topic pattern, decodes EdgeX
//! event envelopes and hands each event to a user callback. Optionally
//! publishes a synthetic test event on a timer.
//!
//! # Overview
//!
//! - [`config`] - defaults, TOML file and environment overlays
//! - [`protocol`] - event schema, message envelope and topic matching
//! - [`transport`] - the four-method message bus capability and its MQTT adapter
//! - [`client`] - lifecycle, dispatch loop and publish loop
//! - [`signals`] - SIGINT/SIGTERM watcher
//! - [`observability`] - structured logging
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use edgex_bridge::{event_handler, EdgexClient};
//!
//! # async fn run() -> Result<(), edgex_bridge::ClientError> {
//! let handler = event_handler(|topic, event| {
//!     println!("{topic}: {} readings from {}", event.readings.len(), event.device_name);
//! });
//!
//! let client = EdgexClient::new(None, Some(handler))?;
//! client.start().await?;
//! client.wait_for_stop().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod signals;
pub mod testing;
pub mod transport;

pub use client::{
    decode_inbound, describe_event, event_handler, printing_handler, ClientState, EdgexClient,
    EventHandler,
};
pub use config::{BrokerSection, Config, ConfigError};
pub use error::{ClientError, ClientResult};
pub use protocol::*;
pub use transport::{new_message_bus, BusConfig, BusError, HostInfo, MessageBus};
