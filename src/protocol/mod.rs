//! Wire types exchanged over the message bus
//!
//! - [`event`] - the application payload (events and readings)
//! - [`envelope`] - the transport-level record wrapping a payload
//! - [`topics`] - topic filter validation and wildcard matching

pub mod envelope;
pub mod event;
pub mod topics;

pub use envelope::*;
pub use event::*;
pub use topics::*;
