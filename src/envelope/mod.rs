// ABOUTME: Envelope structures, codec, and transport metadata
// ABOUTME: Implements the vendor-neutral wrapper shared by all three messaging services

//! Envelope structures, codec, and transport metadata.
//!
//! This module provides the vendor-neutral wrapper carrying typed payloads
//! across the queue, topic, and event-bus services, along with the codec
//! that moves it on and off the wire.

pub mod builder;
pub mod codec;
pub mod metadata;

pub use builder::{EnvelopeBuilder, MessageEnvelope, RESERVED_KEYS};
pub use codec::{CodecHook, DecodedMessage, EnvelopeCodec};
pub use metadata::{EventBusMetadata, QueueMetadata, TopicMetadata, TransportMetadata};
