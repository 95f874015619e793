// ABOUTME: Envelope codec for the cross-service wire format
// ABOUTME: Encodes/decodes envelopes, unwraps topic and event-bus tunnels, runs hook chains

//! Envelope codec for the cross-service wire format.
//!
//! The codec owns every transition between envelope values and wire bytes:
//! encoding with base64 binary payloads and media-type inference, decoding
//! with structural detection of messages tunneled through the topic and
//! event-bus services, and an ordered chain of user hooks that may mutate
//! the envelope or the bytes at four phases.

use crate::envelope::builder::{MessageEnvelope, RESERVED_KEYS};
use crate::envelope::metadata::{
    EventBusMetadata, QueueMetadata, TopicMetadata, TransportMetadata,
};
use crate::error::{PostbusError, Result};
use crate::queue::QueueMessage;
use crate::registry::{HandlerMapping, HandlerRegistry};

use chrono::DateTime;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Ordered callback chain run by the codec.
///
/// Every method has a no-op default, so hooks implement only the phases
/// they care about. Hooks may mutate the envelope or the bytes; any error
/// aborts the codec operation as a [`PostbusError::CodecFailure`].
pub trait CodecHook: Send + Sync {
    /// Runs on the envelope before it is serialized
    fn pre_serialize(&self, _envelope: &mut MessageEnvelope) -> Result<()> {
        Ok(())
    }

    /// Runs on the serialized bytes before they leave the codec
    fn post_serialize(&self, _bytes: &mut Vec<u8>) -> Result<()> {
        Ok(())
    }

    /// Runs on the raw bytes before they are parsed
    fn pre_deserialize(&self, _bytes: &mut Vec<u8>) -> Result<()> {
        Ok(())
    }

    /// Runs on the envelope after it has been parsed and unwrapped
    fn post_deserialize(&self, _envelope: &mut MessageEnvelope) -> Result<()> {
        Ok(())
    }
}

/// A fully decoded incoming message, ready for the subscriber pipeline
#[derive(Clone)]
pub struct DecodedMessage {
    /// The unwrapped envelope
    pub envelope: MessageEnvelope,
    /// Delivery details of the service the message arrived through
    pub metadata: TransportMetadata,
    /// The handler mapping resolved from the envelope type
    pub mapping: HandlerMapping,
}

impl std::fmt::Debug for DecodedMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedMessage")
            .field("envelope", &self.envelope)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Envelope codec with an ordered hook chain
#[derive(Clone, Default)]
pub struct EnvelopeCodec {
    hooks: Vec<Arc<dyn CodecHook>>,
}

impl std::fmt::Debug for EnvelopeCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeCodec")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl EnvelopeCodec {
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    /// Append a hook to the chain; hooks run in registration order
    pub fn with_hook(mut self, hook: Arc<dyn CodecHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Serialize an envelope to wire bytes.
    ///
    /// Binary payloads stay base64-encoded; when the caller did not set a
    /// media type it is inferred from the payload's magic bytes. Structured
    /// payloads with a non-JSON media type are emitted as a JSON string.
    pub fn encode(&self, envelope: &MessageEnvelope) -> Result<Vec<u8>> {
        let mut envelope = envelope.clone();
        for hook in &self.hooks {
            hook.pre_serialize(&mut envelope)
                .map_err(|e| PostbusError::codec(format!("pre-serialize hook failed: {}", e)))?;
        }

        if envelope.data_base64.is_some() && envelope.data_content_type.is_none() {
            envelope.data_content_type = Some(self.infer_content_type(&envelope)?);
        }

        if let Some(data) = envelope.data.take() {
            // Non-JSON media types carry their structured payload as a JSON string
            envelope.data = Some(if envelope.has_json_content_type() {
                data
            } else {
                match data {
                    Value::String(s) => Value::String(s),
                    other => Value::String(serde_json::to_string(&other).map_err(|e| {
                        PostbusError::codec(format!("failed to stringify payload: {}", e))
                    })?),
                }
            });
        }

        for key in envelope.extensions.keys() {
            if RESERVED_KEYS.contains(&key.as_str()) {
                return Err(PostbusError::codec(format!(
                    "extension '{}' shadows a reserved envelope key",
                    key
                )));
            }
        }
        envelope.validate()?;

        let mut bytes = serde_json::to_vec(&envelope)
            .map_err(|e| PostbusError::codec(format!("failed to encode envelope: {}", e)))?;
        for hook in &self.hooks {
            hook.post_serialize(&mut bytes)
                .map_err(|e| PostbusError::codec(format!("post-serialize hook failed: {}", e)))?;
        }
        Ok(bytes)
    }

    /// Parse a queue delivery into an envelope, transport metadata, and handler mapping.
    ///
    /// Detects and unwraps the topic and event-bus tunnels structurally, then
    /// validates the inner envelope and resolves its handler from the registry.
    pub fn decode(
        &self,
        raw: &[u8],
        delivery: &QueueMessage,
        registry: &HandlerRegistry,
    ) -> Result<DecodedMessage> {
        let mut bytes = raw.to_vec();
        for hook in &self.hooks {
            hook.pre_deserialize(&mut bytes)
                .map_err(|e| PostbusError::codec(format!("pre-deserialize hook failed: {}", e)))?;
        }

        let outer: Value = serde_json::from_slice(&bytes).map_err(|e| {
            PostbusError::malformed_envelope(format!("message body is not valid JSON: {}", e))
        })?;

        let (inner, metadata) = self.unwrap_tunnel(outer, delivery)?;

        let mut envelope: MessageEnvelope = serde_json::from_value(inner).map_err(|e| {
            PostbusError::malformed_envelope(format!("body does not parse as an envelope: {}", e))
        })?;
        for hook in &self.hooks {
            hook.post_deserialize(&mut envelope).map_err(|e| {
                PostbusError::codec(format!("post-deserialize hook failed: {}", e))
            })?;
        }
        envelope.validate()?;

        let mapping = registry.resolve(&envelope.message_type)?;
        Ok(DecodedMessage {
            envelope,
            metadata,
            mapping,
        })
    }

    /// Structural tunnel detection: the wrapper shapes are recognized purely
    /// by the presence of distinguishing fields at known JSON paths.
    fn unwrap_tunnel(
        &self,
        outer: Value,
        delivery: &QueueMessage,
    ) -> Result<(Value, TransportMetadata)> {
        if Self::is_topic_tunnel(&outer) {
            let inner_text = outer
                .get("Message")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    PostbusError::malformed_envelope("topic notification Message is not a string")
                })?;
            let inner: Value = serde_json::from_str(inner_text).map_err(|e| {
                PostbusError::malformed_envelope(format!(
                    "topic notification Message is not valid JSON: {}",
                    e
                ))
            })?;
            return Ok((inner, TransportMetadata::Topic(Self::topic_metadata(&outer))));
        }

        if Self::is_event_bus_tunnel(&outer) {
            let metadata = Self::event_bus_metadata(&outer);
            let inner = outer
                .get("detail")
                .cloned()
                .unwrap_or(Value::Null);
            return Ok((inner, TransportMetadata::EventBus(metadata)));
        }

        let metadata = TransportMetadata::Queue(QueueMetadata {
            message_id: delivery.message_id.clone(),
            receipt_handle: delivery.receipt_handle.clone(),
            message_group_id: delivery.message_group_id.clone(),
            deduplication_id: delivery.deduplication_id.clone(),
            attributes: delivery.attributes.clone(),
        });
        Ok((outer, metadata))
    }

    fn is_topic_tunnel(outer: &Value) -> bool {
        outer.get("Type").and_then(Value::as_str) == Some("Notification")
            && outer.get("Message").is_some()
            && outer.get("TopicArn").is_some()
            && outer.get("MessageId").is_some()
    }

    fn is_event_bus_tunnel(outer: &Value) -> bool {
        outer.get("detail").is_some()
            && outer.get("id").is_some()
            && outer.get("version").is_some()
            && outer.get("region").is_some()
    }

    fn topic_metadata(outer: &Value) -> TopicMetadata {
        TopicMetadata {
            topic_arn: json_string(outer, "TopicArn"),
            message_id: json_string(outer, "MessageId"),
            subject: outer
                .get("Subject")
                .and_then(Value::as_str)
                .map(str::to_string),
            unsubscribe_url: outer
                .get("UnsubscribeURL")
                .and_then(Value::as_str)
                .map(str::to_string),
            timestamp: outer
                .get("Timestamp")
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok()),
            attributes: json_object(outer, "MessageAttributes"),
        }
    }

    fn event_bus_metadata(outer: &Value) -> EventBusMetadata {
        EventBusMetadata {
            event_id: json_string(outer, "id"),
            detail_type: json_string(outer, "detail-type"),
            source: json_string(outer, "source"),
            time: outer
                .get("time")
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok()),
            account: json_string(outer, "account"),
            region: json_string(outer, "region"),
            resources: outer
                .get("resources")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    fn infer_content_type(&self, envelope: &MessageEnvelope) -> Result<String> {
        let bytes = envelope.payload_bytes()?;
        Ok(infer::get(&bytes)
            .map(|kind| kind.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string()))
    }
}

fn json_string(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn json_object(value: &Value, key: &str) -> HashMap<String, Value> {
    value
        .get(key)
        .and_then(Value::as_object)
        .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}
