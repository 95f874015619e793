// ABOUTME: Envelope container and builder structures
// ABOUTME: Provides the vendor-neutral message wrapper and a fluent API for constructing it

//! Envelope container and builder structures.

use crate::constants::defaults;
use crate::error::{PostbusError, Result};

use base64::Engine;
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Wire keys that extension entries are not allowed to shadow
pub const RESERVED_KEYS: [&str; 8] = [
    "id",
    "source",
    "specversion",
    "type",
    "time",
    "data",
    "data_base64",
    "datacontenttype",
];

/// Vendor-neutral envelope wrapping a typed payload for cross-service messaging.
///
/// The envelope carries the routing identity (`type`), producer identity
/// (`source`), and payload of a single domain message. Exactly one of
/// `data` (structured JSON) or `data_base64` (binary) is present on a
/// well-formed envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageEnvelope {
    /// Unique identifier of this message
    pub id: String,

    /// URI identifying the producer
    pub source: String,

    /// Envelope format version, fixed at "1.0"
    #[serde(rename = "specversion")]
    pub spec_version: String,

    /// Stable type identifier used to route the message to a handler
    #[serde(rename = "type")]
    pub message_type: String,

    /// UTC timestamp with offset recorded at publish time
    pub time: DateTime<FixedOffset>,

    /// Media type of the payload; `application/json` when absent
    #[serde(rename = "datacontenttype", skip_serializing_if = "Option::is_none")]
    pub data_content_type: Option<String>,

    /// Structured JSON payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Base64-encoded binary payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_base64: Option<String>,

    /// Open extension map; entries are written as top-level wire fields
    #[serde(flatten)]
    pub extensions: HashMap<String, Value>,
}

impl MessageEnvelope {
    /// Get the fluent builder
    pub fn builder() -> EnvelopeBuilder {
        EnvelopeBuilder::new()
    }

    /// Effective payload media type, applying the `application/json` default
    pub fn content_type(&self) -> &str {
        self.data_content_type
            .as_deref()
            .unwrap_or(defaults::DATA_CONTENT_TYPE)
    }

    /// True when the effective content type is JSON (`application/json` or `application/*+json`)
    pub fn has_json_content_type(&self) -> bool {
        let content_type = self.content_type();
        content_type == "application/json"
            || (content_type.starts_with("application/") && content_type.ends_with("+json"))
    }

    /// Deserialize the structured payload into a concrete message type.
    ///
    /// Binary envelopes are decoded from base64 first, then parsed as JSON,
    /// so handlers see the same typed view regardless of transport encoding.
    pub fn payload_as<T>(&self) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        match (&self.data, &self.data_base64) {
            (Some(value), None) => serde_json::from_value(value.clone()).map_err(|e| {
                PostbusError::handler_signature(format!(
                    "payload of '{}' does not match the registered message type: {}",
                    self.message_type, e
                ))
            }),
            (None, Some(_)) => {
                let bytes = self.payload_bytes()?;
                serde_json::from_slice(&bytes).map_err(|e| {
                    PostbusError::handler_signature(format!(
                        "binary payload of '{}' does not parse as the registered message type: {}",
                        self.message_type, e
                    ))
                })
            }
            _ => Err(PostbusError::malformed_envelope(
                "envelope must carry exactly one of data and data_base64",
            )),
        }
    }

    /// Raw payload bytes: base64-decoded for binary envelopes, serialized JSON otherwise
    pub fn payload_bytes(&self) -> Result<Vec<u8>> {
        if let Some(ref encoded) = self.data_base64 {
            return base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| {
                    PostbusError::malformed_envelope(format!("data_base64 is not valid base64: {}", e))
                });
        }
        if let Some(ref value) = self.data {
            return serde_json::to_vec(value)
                .map_err(|e| PostbusError::codec(format!("failed to serialize payload: {}", e)));
        }
        Err(PostbusError::malformed_envelope(
            "envelope carries no payload",
        ))
    }

    /// Validate the envelope invariants required on a well-formed envelope
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(PostbusError::malformed_envelope("id must not be empty"));
        }
        if self.source.trim().is_empty() {
            return Err(PostbusError::malformed_envelope("source must not be empty"));
        }
        if self.message_type.trim().is_empty() {
            return Err(PostbusError::malformed_envelope("type must not be empty"));
        }
        if self.spec_version.trim().is_empty() {
            return Err(PostbusError::malformed_envelope(
                "specversion must not be empty",
            ));
        }
        match (&self.data, &self.data_base64) {
            (Some(_), Some(_)) => Err(PostbusError::malformed_envelope(
                "data and data_base64 are mutually exclusive",
            )),
            (None, None) => Err(PostbusError::malformed_envelope(
                "envelope must carry a data or data_base64 payload",
            )),
            _ => Ok(()),
        }
    }
}

/// Builder for creating envelopes with a fluent API.
///
/// Identity fields default to fresh values (generated id, current time,
/// fixed spec version) so publishers only set what they care about.
#[derive(Debug, Default)]
pub struct EnvelopeBuilder {
    id: Option<String>,
    source: Option<String>,
    message_type: Option<String>,
    time: Option<DateTime<FixedOffset>>,
    data_content_type: Option<String>,
    data: Option<Value>,
    data_base64: Option<String>,
    extensions: HashMap<String, Value>,
}

impl EnvelopeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the generated message id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the producer source URI
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Set the routing type identifier
    pub fn with_message_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = Some(message_type.into());
        self
    }

    /// Override the publish timestamp
    pub fn with_time(mut self, time: DateTime<FixedOffset>) -> Self {
        self.time = Some(time);
        self
    }

    /// Set the payload media type explicitly
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.data_content_type = Some(content_type.into());
        self
    }

    /// Set a structured JSON payload
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Serialize a typed message into the structured payload slot
    pub fn with_payload<T: Serialize>(self, payload: &T) -> Result<Self> {
        let value = serde_json::to_value(payload)
            .map_err(|e| PostbusError::codec(format!("failed to serialize payload: {}", e)))?;
        Ok(self.with_data(value))
    }

    /// Set a binary payload; the bytes are base64-encoded onto the wire
    pub fn with_binary_payload(mut self, bytes: &[u8]) -> Self {
        self.data_base64 = Some(base64::engine::general_purpose::STANDARD.encode(bytes));
        self
    }

    /// Add an extension entry written as a top-level wire field
    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }

    /// Build the envelope with validation
    pub fn build(self) -> Result<MessageEnvelope> {
        let message_type = self
            .message_type
            .ok_or_else(|| PostbusError::malformed_envelope("message type is required"))?;
        let source = self
            .source
            .ok_or_else(|| PostbusError::malformed_envelope("source is required"))?;

        for key in self.extensions.keys() {
            if RESERVED_KEYS.contains(&key.as_str()) {
                return Err(PostbusError::malformed_envelope(format!(
                    "extension '{}' shadows a reserved envelope key",
                    key
                )));
            }
        }

        let envelope = MessageEnvelope {
            id: self
                .id
                .unwrap_or_else(|| uuid::Uuid::now_v7().to_string()),
            source,
            spec_version: defaults::SPEC_VERSION.to_string(),
            message_type,
            time: self.time.unwrap_or_else(|| Utc::now().fixed_offset()),
            data_content_type: self.data_content_type,
            data: self.data,
            data_base64: self.data_base64,
            extensions: self.extensions,
        };
        envelope.validate()?;
        Ok(envelope)
    }
}
