//! Structured logging using the tracing crate
//!
//! Provides contextual logging with span macros for the bus and dispatch workers.
//!
//! ## Log Format Options
//!
//! The output format is controlled by the `LOG_FORMAT` environment variable:
//!
//! - `json` - Structured JSON format for log aggregation systems
//! - `pretty` - Human-readable format with colors and indentation
//! - `compact` - Terminal-friendly format with colors but minimal spacing
//!
//! ## Environment Variables
//!
//! - `LOG_FORMAT`: Output format (json, pretty, compact) - defaults to compact
//! - `RUST_LOG`: Override log filtering (follows env_logger format)
//!
//! The level itself comes from the client's `log_level` setting.
//!
//! ## Examples
//!
//! ```bash
//! # JSON logging at debug level
//! LOG_FORMAT=json EDGEX_LOG_LEVEL=DEBUG ./receive-test
//!
//! # Only MQTT adapter traces
//! RUST_LOG=edgex_bridge::transport=trace ./receive-test
//! ```

use std::env;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// JSON format for structured logging (machine-readable)
    Json,
    /// Pretty format with colors and indentation (human-readable)
    Pretty,
    /// Compact format with colors but minimal spacing (terminal-friendly)
    #[default]
    Compact,
}

impl LogFormat {
    /// Parse log format from string
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => LogFormat::default(),
        }
    }

    /// Read `LOG_FORMAT` from the process environment
    pub fn from_env() -> Self {
        env::var("LOG_FORMAT")
            .map(|format| Self::parse(&format))
            .unwrap_or_default()
    }
}

/// Map a configured level name onto a tracing level
pub fn parse_level(level: &str) -> Level {
    match level.trim().to_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" | "WARNING" => Level::WARN,
        "INFO" => Level::INFO,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    }
}

fn build_filter(level: Level) -> EnvFilter {
    // Allow RUST_LOG to override
    if let Ok(rust_log) = env::var("RUST_LOG") {
        return EnvFilter::new(rust_log);
    }

    let mut filter = EnvFilter::new(level.to_string());
    // Reduce noise from dependencies
    for directive in ["rumqttc=warn", "tokio=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

/// Install the global subscriber.
///
/// Returns false when a subscriber was already installed, which happens when
/// several clients live in one process.
pub fn init_logging(level: Level, format: LogFormat) -> bool {
    let subscriber = tracing_subscriber::registry().with(build_filter(level));

    match format {
        LogFormat::Json => subscriber.with(fmt::layer().json()).try_init().is_ok(),
        LogFormat::Pretty => subscriber
            .with(fmt::layer().pretty().with_ansi(true))
            .try_init()
            .is_ok(),
        LogFormat::Compact => subscriber
            .with(fmt::layer().compact().with_ansi(true).with_target(false))
            .try_init()
            .is_ok(),
    }
}

/// Initialize logging from a configured level name and `LOG_FORMAT`
pub fn init_from_level_name(level: &str) -> bool {
    init_logging(parse_level(level), LogFormat::from_env())
}

/// Create a message bus span
#[macro_export]
macro_rules! bus_span {
    ($($field:tt)*) => {
        tracing::info_span!("message_bus", $($field)*)
    };
}

/// Create a client worker span
#[macro_export]
macro_rules! dispatch_span {
    ($($field:tt)*) => {
        tracing::info_span!("client_worker", $($field)*)
    };
}
