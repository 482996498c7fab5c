//! Pure connection state management for the MQTT adapter
//!
//! This module contains pure functions for connection state handling and
//! for translating a [`BusConfig`] into rumqttc options.

use crate::transport::{BusConfig, BusError, OPTION_CLIENT_ID, OPTION_PASSWORD, OPTION_USERNAME};
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use uuid::Uuid;

/// Time allowed for the broker to acknowledge the connection
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Time allowed for the event loop to flush DISCONNECT and stop
pub const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

const KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Connection state for the MQTT adapter
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Event loop started, waiting for ConnAck
    Connecting,
    /// ConnAck received, ready for operations
    Connected,
    /// Disconnected with reason
    Disconnected(String),
}

impl ConnectionState {
    pub fn can_publish(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Broker transport derived from the configured protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerScheme {
    Tcp,
    Tls,
}

impl BrokerScheme {
    pub fn parse(protocol: &str) -> Result<Self, BusError> {
        match protocol.to_lowercase().as_str() {
            "tcp" | "mqtt" => Ok(BrokerScheme::Tcp),
            "ssl" | "tls" | "mqtts" => Ok(BrokerScheme::Tls),
            other => Err(BusError::UnsupportedProtocol(other.to_string())),
        }
    }
}

/// Pure function to configure MQTT options from the bus config
pub fn configure_mqtt_options(config: &BusConfig) -> Result<MqttOptions, BusError> {
    let scheme = BrokerScheme::parse(&config.broker.protocol)?;

    let client_id = config
        .option(OPTION_CLIENT_ID)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("EdgeXClient-{}", Uuid::new_v4()));

    let mut mqtt_options = MqttOptions::new(client_id, &config.broker.host, config.broker.port);

    if scheme == BrokerScheme::Tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username) = config.option(OPTION_USERNAME) {
        let password = config.option(OPTION_PASSWORD).unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(KEEP_ALIVE);

    Ok(mqtt_options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::HostInfo;
    use std::collections::BTreeMap;

    fn test_bus_config(protocol: &str) -> BusConfig {
        let mut optional = BTreeMap::new();
        optional.insert(OPTION_CLIENT_ID.to_string(), "EdgeXClient-Test".to_string());
        BusConfig {
            broker: HostInfo {
                host: "localhost".to_string(),
                port: 1883,
                protocol: protocol.to_string(),
            },
            kind: "mqtt".to_string(),
            optional,
        }
    }

    #[test]
    fn test_scheme_parsing() {
        assert_eq!(BrokerScheme::parse("tcp").unwrap(), BrokerScheme::Tcp);
        assert_eq!(BrokerScheme::parse("TCP").unwrap(), BrokerScheme::Tcp);
        assert_eq!(BrokerScheme::parse("mqtt").unwrap(), BrokerScheme::Tcp);
        assert_eq!(BrokerScheme::parse("ssl").unwrap(), BrokerScheme::Tls);
        assert_eq!(BrokerScheme::parse("mqtts").unwrap(), BrokerScheme::Tls);
        assert!(matches!(
            BrokerScheme::parse("ws"),
            Err(BusError::UnsupportedProtocol(p)) if p == "ws"
        ));
    }

    #[test]
    fn test_configure_mqtt_options() {
        let options = configure_mqtt_options(&test_bus_config("tcp")).unwrap();
        assert_eq!(options.client_id(), "EdgeXClient-Test");
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1883));
        assert_eq!(options.keep_alive(), KEEP_ALIVE);
    }

    #[test]
    fn test_missing_client_id_is_generated() {
        let mut config = test_bus_config("tcp");
        config.optional.clear();
        let options = configure_mqtt_options(&config).unwrap();
        assert!(options.client_id().starts_with("EdgeXClient-"));
    }

    #[test]
    fn test_credentials_accepted() {
        let mut config = test_bus_config("tcp");
        config
            .optional
            .insert(OPTION_USERNAME.to_string(), "user".to_string());
        config
            .optional
            .insert(OPTION_PASSWORD.to_string(), "pass".to_string());

        assert!(configure_mqtt_options(&config).is_ok());
    }

    #[test]
    fn test_tls_protocol_accepted() {
        assert!(configure_mqtt_options(&test_bus_config("ssl")).is_ok());
    }

    #[test]
    fn test_unsupported_protocol_rejected() {
        let result = configure_mqtt_options(&test_bus_config("ws"));
        assert!(matches!(result, Err(BusError::UnsupportedProtocol(_))));
    }

    #[test]
    fn test_connection_state_can_publish() {
        assert!(ConnectionState::Connected.can_publish());
        assert!(!ConnectionState::Connecting.can_publish());
        assert!(!ConnectionState::Disconnected("gone".to_string()).can_publish());
    }
}
