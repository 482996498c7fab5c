//! Observability for the client: structured logging and span helpers.
//!
//! The span macros `bus_span!` and `dispatch_span!` are exported at the crate root.

pub mod logging;

pub use logging::{init_from_level_name, init_logging, parse_level, LogFormat};
