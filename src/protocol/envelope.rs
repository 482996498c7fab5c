//! Transport-level message envelope
//!
//! The envelope carries an opaque payload plus the metadata needed to route and
//! interpret it. On the wire it is itself a JSON document using the EdgeX
//! messaging field names, with the payload base64 encoded.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// The only content type accepted on receive and the one set on every publish
pub const CONTENT_TYPE_JSON: &str = "application/json";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MessageEnvelope {
    /// Topic the envelope arrived on; set by the adapter on receive
    #[serde(rename = "ReceivedTopic")]
    pub received_topic: String,
    #[serde(rename = "CorrelationID")]
    pub correlation_id: String,
    #[serde(rename = "APIVersion", skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(rename = "RequestID", skip_serializing_if = "String::is_empty")]
    pub request_id: String,
    #[serde(rename = "Payload", with = "base64_payload")]
    pub payload: Vec<u8>,
    #[serde(rename = "ContentType")]
    pub content_type: String,
}

impl MessageEnvelope {
    /// New outbound envelope with a fresh correlation id
    pub fn new(payload: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            payload,
            content_type: content_type.into(),
            ..Default::default()
        }
    }

    /// New outbound envelope tagged `application/json`
    pub fn json(payload: Vec<u8>) -> Self {
        Self::new(payload, CONTENT_TYPE_JSON)
    }

    pub fn is_json(&self) -> bool {
        self.content_type == CONTENT_TYPE_JSON
    }
}

mod base64_payload {
    use super::*;

    pub fn serialize<S>(payload: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(payload))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => STANDARD
                .decode(encoded.as_bytes())
                .map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}
