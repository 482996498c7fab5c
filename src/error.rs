//! Client-level error types
//!
//! Construction and `start` return these to the caller. Decode and content type
//! failures are produced by the dispatch step and only logged by the loop.

use crate::config::ConfigError;
use crate::transport::BusError;
use thiserror::Error;

/// Main error type for client operations
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Message bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Failed to serialize event: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Failed to decode event: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("invalid content type: got {got}, expected application/json")]
    ContentType { got: String },

    #[error("Client already started")]
    AlreadyStarted,

    #[error("Client stopped")]
    Stopped,
}

impl ClientError {
    /// Whether the error is a steady-state inbound failure that the dispatch
    /// loop logs and drops
    pub fn is_inbound(&self) -> bool {
        matches!(self, ClientError::Decode(_) | ClientError::ContentType { .. })
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
