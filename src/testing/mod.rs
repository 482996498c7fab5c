//! Testing utilities
//!
//! Provides an in-memory [`crate::transport::MessageBus`] so the client can be
//! tested without an MQTT broker.

pub mod mocks;

pub use mocks::*;
