//! Client configuration: defaults, TOML file overlay and environment overrides
//!
//! Configuration is composed from three layers, each one a pure function of the
//! previous value:
//!
//! 1. [`Config::default`] - built-in defaults
//! 2. [`Config::with_file`] / [`Config::with_file_contents`] - TOML document overlay
//! 3. [`Config::with_env_overrides`] - `<env_prefix><KEY>` variables overlay
//!
//! [`Config::load`] composes all three against the process environment.

use crate::protocol::validate_topic_filter;
use crate::transport::{BusConfig, HostInfo, OPTION_CLIENT_ID, OPTION_PASSWORD, OPTION_USERNAME};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_PROTOCOL: &str = "tcp";
pub const DEFAULT_BUS_TYPE: &str = "mqtt";
pub const DEFAULT_TOPIC: &str = "edgex/events/#";
pub const DEFAULT_PUBLISH_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_LOG_LEVEL: &str = "INFO";
pub const DEFAULT_ENV_PREFIX: &str = "EDGEX_";
/// File picked up from the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// Explicit path if given, else `config.toml` when it exists, else none
pub fn resolve_config_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    explicit.or_else(|| {
        let default = PathBuf::from(DEFAULT_CONFIG_FILE);
        default.exists().then_some(default)
    })
}

/// Complete client configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Message bus implementation (`mqtt`)
    #[serde(rename = "type")]
    pub kind: String,
    /// Subscription pattern, MQTT wildcards allowed
    pub topic: String,
    pub client_id: String,
    pub username: String,
    pub password: String,
    /// Enable the periodic synthetic event publisher
    pub publish: bool,
    /// Seconds between synthetic events
    pub publish_interval: u64,
    pub log_level: String,
    pub env_prefix: String,
    pub broker: BrokerSection,
}

/// Broker section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerSection {
    pub host: String,
    pub port: u16,
    /// Transport scheme (`tcp`, `ssl`, ...)
    pub protocol: String,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            protocol: DEFAULT_PROTOCOL.to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kind: DEFAULT_BUS_TYPE.to_string(),
            topic: DEFAULT_TOPIC.to_string(),
            client_id: default_client_id(),
            username: String::new(),
            password: String::new(),
            publish: false,
            publish_interval: DEFAULT_PUBLISH_INTERVAL_SECS,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            broker: BrokerSection::default(),
        }
    }
}

/// Top-level keys a hand-written file may list after the `[broker]` header
const TOP_LEVEL_KEYS: &[&str] = &[
    "type",
    "topic",
    "client_id",
    "username",
    "password",
    "publish",
    "publish_interval",
    "log_level",
    "env_prefix",
];

fn default_client_id() -> String {
    format!("EdgeXClient-{}", Uuid::new_v4())
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Config {
    /// Load configuration: defaults, then the optional file, then the environment.
    ///
    /// An explicit `env_prefix` wins over the one found in the file.
    pub fn load(path: Option<&Path>, env_prefix: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::default().with_file(path)?,
            None => Self::default(),
        };

        if let Some(prefix) = env_prefix {
            config.env_prefix = prefix.to_string();
        }

        let config = config.with_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Overlay the TOML file at `path`
    pub fn with_file(self, path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        self.with_file_contents(&content)
    }

    /// Overlay a TOML document. Keys absent from the document keep their current value.
    pub fn with_file_contents(self, content: &str) -> Result<Self, ConfigError> {
        let mut base = match toml::Value::try_from(&self) {
            Ok(toml::Value::Table(table)) => table,
            Ok(_) => {
                return Err(ConfigError::InvalidConfig(
                    "Config did not encode as a table".to_string(),
                ))
            }
            Err(e) => {
                return Err(ConfigError::InvalidConfig(format!(
                    "Cannot encode config: {e}"
                )))
            }
        };
        let mut overlay: toml::Table = toml::from_str(content)?;
        hoist_top_level_keys(&mut overlay);
        merge_tables(&mut base, overlay);
        Ok(toml::Value::Table(base).try_into()?)
    }

    /// Overlay `<env_prefix><KEY>` variables resolved through `lookup`.
    ///
    /// Empty values are ignored and malformed integers leave the previous value in place.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let prefix = self.env_prefix.clone();
        let get = |suffix: &str| lookup(&format!("{prefix}{suffix}")).filter(|v| !v.is_empty());

        if let Some(v) = get("BROKER_HOST") {
            self.broker.host = v;
        }
        if let Some(port) = get("BROKER_PORT").and_then(|v| v.trim().parse().ok()) {
            self.broker.port = port;
        }
        if let Some(v) = get("BROKER_PROTOCOL") {
            self.broker.protocol = v;
        }
        if let Some(v) = get("TYPE") {
            self.kind = v;
        }
        if let Some(v) = get("TOPIC") {
            self.topic = v;
        }
        if let Some(v) = get("CLIENT_ID") {
            self.client_id = v;
        }
        if let Some(v) = get("USERNAME") {
            self.username = v;
        }
        if let Some(v) = get("PASSWORD") {
            self.password = v;
        }
        if get("PUBLISH").as_deref() == Some("true") {
            self.publish = true;
        }
        if let Some(interval) = get("PUBLISH_INTERVAL").and_then(|v| v.trim().parse().ok()) {
            self.publish_interval = interval;
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.log_level = v;
        }

        self
    }

    /// Reject values the client cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.host.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker.host must not be empty".to_string(),
            ));
        }
        validate_topic_filter(&self.topic)
            .map_err(|e| ConfigError::InvalidConfig(format!("topic: {e}")))?;
        if self.publish && self.publish_interval == 0 {
            return Err(ConfigError::InvalidConfig(
                "publish_interval must be greater than 0 when publish is enabled".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the message bus configuration for the adapter factory
    pub fn bus_config(&self) -> BusConfig {
        let mut optional = BTreeMap::new();
        optional.insert(OPTION_CLIENT_ID.to_string(), self.client_id.clone());
        if !self.username.is_empty() {
            optional.insert(OPTION_USERNAME.to_string(), self.username.clone());
        }
        if !self.password.is_empty() {
            optional.insert(OPTION_PASSWORD.to_string(), self.password.clone());
        }

        BusConfig {
            broker: HostInfo {
                host: self.broker.host.clone(),
                port: self.broker.port,
                protocol: self.broker.protocol.clone(),
            },
            kind: self.kind.clone(),
            optional,
        }
    }

    /// Render as TOML with the password masked
    pub fn to_display_toml(&self) -> Result<String, toml::ser::Error> {
        let mut shown = self.clone();
        if !shown.password.is_empty() {
            shown.password = "***".to_string();
        }
        toml::to_string_pretty(&shown)
    }
}

/// Move top-level keys that TOML scoped into `[broker]` back to the document root.
/// A key already present at the root keeps the root value.
fn hoist_top_level_keys(overlay: &mut toml::Table) {
    let Some(toml::Value::Table(broker)) = overlay.get_mut("broker") else {
        return;
    };
    let hoisted: Vec<(String, toml::Value)> = TOP_LEVEL_KEYS
        .iter()
        .filter_map(|key| broker.remove(*key).map(|value| (key.to_string(), value)))
        .collect();

    for (key, value) in hoisted {
        overlay.entry(key).or_insert(value);
    }
}

fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(nested)) => {
                merge_tables(existing, nested);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
