//! Message bus abstraction
//!
//! The client core only talks to the bus through the four-method [`MessageBus`]
//! capability. Implementations are selected by the configured bus type through
//! [`new_message_bus`]; tests inject [`crate::testing::InMemoryBus`] instead.

use crate::protocol::MessageEnvelope;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod mqtt;

pub use mqtt::MqttBus;

/// Option key for the client identifier
pub const OPTION_CLIENT_ID: &str = "ClientId";
/// Option key for the broker username
pub const OPTION_USERNAME: &str = "Username";
/// Option key for the broker password
pub const OPTION_PASSWORD: &str = "Password";

/// Broker location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    pub host: String,
    pub port: u16,
    pub protocol: String,
}

/// Everything an adapter needs to reach the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    pub broker: HostInfo,
    /// Adapter implementation (`mqtt`)
    pub kind: String,
    /// Adapter options: `ClientId`, and `Username`/`Password` when set
    pub optional: BTreeMap<String, String>,
}

impl BusConfig {
    pub fn option(&self, key: &str) -> Option<&str> {
        self.optional.get(key).map(String::as_str)
    }
}

/// Errors reported by message bus adapters
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Connection failed: {0}")]
    ConnectionFailedStr(String),
    #[error("Subscription failed: {0}")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Publishing failed: {0}")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Disconnect failed: {0}")]
    DisconnectFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Not connected to the message bus")]
    NotConnected,
    #[error("Unsupported message bus type: {0}")]
    UnsupportedType(String),
    #[error("Unsupported broker protocol: {0}")]
    UnsupportedProtocol(String),
    #[error("Envelope encoding error: {0}")]
    EnvelopeEncoding(#[source] serde_json::Error),
    #[error("Invalid message received: {0}")]
    Received(String),
}

/// Four-method capability over the underlying messaging library.
///
/// Implementations must tolerate concurrent `publish` calls while their own
/// workers deliver inbound envelopes to the subscriber channels.
#[async_trait::async_trait]
pub trait MessageBus: Send + Sync {
    /// Connect to the broker
    async fn connect(&self) -> Result<(), BusError>;

    /// Register a single subscription. Matching envelopes are pushed to `messages`
    /// and asynchronous errors to `errors`.
    async fn subscribe(
        &self,
        topic: &str,
        messages: mpsc::Sender<MessageEnvelope>,
        errors: mpsc::Sender<BusError>,
    ) -> Result<(), BusError>;

    /// Publish an envelope to a concrete topic
    async fn publish(&self, envelope: MessageEnvelope, topic: &str) -> Result<(), BusError>;

    /// Disconnect from the broker and stop delivering envelopes
    async fn disconnect(&self) -> Result<(), BusError>;
}

/// Build the adapter selected by `config.kind`
pub fn new_message_bus(config: &BusConfig) -> Result<Arc<dyn MessageBus>, BusError> {
    match config.kind.to_lowercase().as_str() {
        "mqtt" => Ok(Arc::new(MqttBus::new(config)?)),
        other => Err(BusError::UnsupportedType(other.to_string())),
    }
}
