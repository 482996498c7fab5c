//! Sensor event payload schema
//!
//! Field names follow the JSON convention of the EdgeX event DTO: lowercase-first
//! camel case, with the simple reading value inlined at reading level.
//!
//! # Examples
//! ```
//! use edgex_bridge::protocol::Event;
//!
//! let mut event = Event::new("Thermostat", "ThermostatProfile", "Temperature");
//! event.add_simple_reading("Temperature", "Float64", "21.5");
//!
//! let json = serde_json::to_string(&event).unwrap();
//! assert!(json.contains("\"deviceName\":\"Thermostat\""));
//! assert!(json.contains("\"value\":\"21.5\""));
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// API version stamped on events built with [`Event::new`]
pub const API_VERSION: &str = "v3";

pub const TEST_DEVICE_NAME: &str = "TestDevice";
pub const TEST_PROFILE_NAME: &str = "TestProfile";
pub const TEST_SOURCE_NAME: &str = "TestSource";
pub const TEST_RESOURCE_NAME: &str = "TestResource";
pub const VALUE_TYPE_STRING: &str = "String";

/// An event produced by a device, carrying one or more readings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Event {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    pub id: String,
    pub device_name: String,
    pub profile_name: String,
    pub source_name: String,
    /// Nanoseconds since the Unix epoch
    pub origin: i64,
    pub readings: Vec<Reading>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

/// A single measurement inside an [`Event`]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Reading {
    pub id: String,
    pub device_name: String,
    pub resource_name: String,
    pub profile_name: String,
    /// Nanoseconds since the Unix epoch
    pub origin: i64,
    pub value_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub units: String,
    #[serde(flatten)]
    pub simple_reading: SimpleReading,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimpleReading {
    pub value: String,
}

impl Event {
    pub fn new(
        device_name: impl Into<String>,
        profile_name: impl Into<String>,
        source_name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            id: Uuid::new_v4().to_string(),
            device_name: device_name.into(),
            profile_name: profile_name.into(),
            source_name: source_name.into(),
            origin: now_nanos(),
            readings: Vec::new(),
            tags: BTreeMap::new(),
        }
    }

    /// Append a simple reading for this event's device and profile
    pub fn add_simple_reading(
        &mut self,
        resource_name: impl Into<String>,
        value_type: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Reading {
        self.readings.push(Reading {
            id: Uuid::new_v4().to_string(),
            device_name: self.device_name.clone(),
            resource_name: resource_name.into(),
            profile_name: self.profile_name.clone(),
            origin: now_nanos(),
            value_type: value_type.into(),
            units: String::new(),
            simple_reading: SimpleReading {
                value: value.into(),
            },
            tags: BTreeMap::new(),
        });
        let last = self.readings.len() - 1;
        &mut self.readings[last]
    }

    /// Synthetic event used by the periodic publisher and the `send-test` binary
    pub fn test_event() -> Self {
        Self::test_event_at(Utc::now())
    }

    pub(crate) fn test_event_at(now: DateTime<Utc>) -> Self {
        let origin = now.timestamp_nanos_opt().unwrap_or_default();
        let mut event = Self {
            api_version: String::new(),
            id: Uuid::new_v4().to_string(),
            device_name: TEST_DEVICE_NAME.to_string(),
            profile_name: TEST_PROFILE_NAME.to_string(),
            source_name: TEST_SOURCE_NAME.to_string(),
            origin,
            readings: Vec::new(),
            tags: BTreeMap::new(),
        };
        let value = format!(
            "Test value at {}",
            now.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        event
            .add_simple_reading(TEST_RESOURCE_NAME, VALUE_TYPE_STRING, value)
            .origin = origin;
        event
    }
}

impl Reading {
    pub fn value(&self) -> &str {
        &self.simple_reading.value
    }
}

fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
}
