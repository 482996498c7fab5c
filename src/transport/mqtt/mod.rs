//! MQTT adapter for the message bus
//!
//! This module separates pure functions from I/O operations for testability.
//!
//! # Architecture
//!
//! - [`connection`] - Pure connection state management and configuration
//! - [`message_handler`] - Pure message routing and envelope codec
//! - [`client`] - Impure I/O operations and coordination
//!
//! # Usage
//!
//! ```rust,no_run
//! use edgex_bridge::transport::{MessageBus, MqttBus};
//! use edgex_bridge::Config;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let bus = MqttBus::new(&config.bus_config())?;
//! bus.connect().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::MqttBus;
pub use connection::{BrokerScheme, ConnectionState};
pub use message_handler::{EventRoute, MessageHandler};
