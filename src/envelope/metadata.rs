// ABOUTME: Transport metadata attached to envelopes during decode
// ABOUTME: Captures queue, topic, and event-bus delivery details without re-serializing them

//! Transport metadata attached to decoded envelopes.
//!
//! Each decoded message carries exactly one metadata variant describing the
//! service it arrived through. The metadata is populated during decode and
//! never written back onto the wire.

use chrono::{DateTime, FixedOffset};
use serde_json::Value;
use std::collections::HashMap;

/// Delivery details of the service a message arrived through
#[derive(Debug, Clone, PartialEq)]
pub enum TransportMetadata {
    /// Message received directly from the queue service
    Queue(QueueMetadata),
    /// Message tunneled through the topic/notification service
    Topic(TopicMetadata),
    /// Message tunneled through the event-bus service
    EventBus(EventBusMetadata),
}

impl TransportMetadata {
    /// FIFO message-group id, present only on queue deliveries from FIFO queues
    pub fn message_group_id(&self) -> Option<&str> {
        match self {
            TransportMetadata::Queue(meta) => meta.message_group_id.as_deref(),
            _ => None,
        }
    }
}

/// Metadata for a direct queue delivery
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueMetadata {
    /// Service-assigned message id
    pub message_id: String,
    /// Opaque token identifying this delivery; required to delete or extend it
    pub receipt_handle: String,
    /// FIFO message-group id
    pub message_group_id: Option<String>,
    /// FIFO deduplication id
    pub deduplication_id: Option<String>,
    /// Raw message attributes as delivered
    pub attributes: HashMap<String, Value>,
}

/// Metadata for a message tunneled through the topic service
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopicMetadata {
    /// Identifier of the topic the message was published to
    pub topic_arn: String,
    /// Notification message id assigned by the topic service
    pub message_id: String,
    /// Optional subject line from the notification
    pub subject: Option<String>,
    /// URL for unsubscribing the queue from the topic
    pub unsubscribe_url: Option<String>,
    /// Timestamp the topic service stamped on the notification
    pub timestamp: Option<DateTime<FixedOffset>>,
    /// Notification message attributes
    pub attributes: HashMap<String, Value>,
}

/// Metadata for a message tunneled through the event-bus service
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventBusMetadata {
    /// Event id assigned by the event-bus service
    pub event_id: String,
    /// Free-form detail-type of the event
    pub detail_type: String,
    /// Event source identifier
    pub source: String,
    /// Timestamp the event-bus service stamped on the event
    pub time: Option<DateTime<FixedOffset>>,
    /// Account the event was published from
    pub account: String,
    /// Region the event was published in
    pub region: String,
    /// Resources the event refers to
    pub resources: Vec<String>,
}
