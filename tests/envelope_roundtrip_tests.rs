// ABOUTME: Integration tests for the envelope round-trip law
// ABOUTME: Encode-then-decode preserves canonical fields for JSON and binary payloads

//! Envelope round-trip law at the public API surface.

mod common;

use common::*;
use postbus::envelope::{EnvelopeCodec, MessageEnvelope, TransportMetadata};
use postbus::queue::QueueMessage;
use postbus::registry::HandlerRegistry;

use serde_json::json;
use std::sync::Arc;

fn registry() -> Arc<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();
    registry.register(TEST_MESSAGE_TYPE, RecordingHandler::new());
    Arc::new(registry)
}

fn delivery() -> QueueMessage {
    QueueMessage {
        message_id: "m-1".to_string(),
        receipt_handle: "rh-1".to_string(),
        ..Default::default()
    }
}

#[test]
fn test_json_payload_round_trip_preserves_the_envelope() {
    // ARRANGE: Envelopes with assorted payload shapes and extensions
    let codec = EnvelopeCodec::new();
    let registry = registry();
    let payloads = vec![
        json!({"label": "plain", "fail": false}),
        json!({"label": "nested", "inner": {"deep": [1, 2, 3]}}),
        json!({"label": "unicode", "text": "héllo wörld"}),
    ];

    for payload in payloads {
        let original = MessageEnvelope::builder()
            .with_source("/postbus/tests")
            .with_message_type(TEST_MESSAGE_TYPE)
            .with_data(payload)
            .with_extension("correlation-id", json!("c-42"))
            .build()
            .unwrap();

        // ACT
        let bytes = codec.encode(&original).unwrap();
        let decoded = codec.decode(&bytes, &delivery(), &registry).unwrap();

        // ASSERT: Canonical fields and extensions survive untouched
        assert_eq!(decoded.envelope, original);
    }
}

#[test]
fn test_binary_payload_round_trip_preserves_the_bytes() {
    // ARRANGE: Arbitrary non-UTF8 bytes
    let codec = EnvelopeCodec::new();
    let registry = registry();
    let payload: Vec<u8> = (0u16..=255).map(|b| b as u8).collect();
    let original = MessageEnvelope::builder()
        .with_source("/postbus/tests")
        .with_message_type(TEST_MESSAGE_TYPE)
        .with_binary_payload(&payload)
        .with_content_type("application/octet-stream")
        .build()
        .unwrap();

    // ACT
    let bytes = codec.encode(&original).unwrap();
    let decoded = codec.decode(&bytes, &delivery(), &registry).unwrap();

    // ASSERT
    assert_eq!(decoded.envelope.payload_bytes().unwrap(), payload);
    assert!(decoded.envelope.data.is_none());
}

#[test]
fn test_queue_metadata_is_attached_from_the_delivery() {
    // ARRANGE
    let codec = EnvelopeCodec::new();
    let registry = registry();
    let bytes = envelope_body(&TestPayload::ok("m")).into_bytes();
    let delivery = QueueMessage {
        message_id: "m-9".to_string(),
        receipt_handle: "rh-9".to_string(),
        message_group_id: Some("G".to_string()),
        deduplication_id: Some("d-9".to_string()),
        ..Default::default()
    };

    // ACT
    let decoded = codec.decode(&bytes, &delivery, &registry).unwrap();

    // ASSERT
    match decoded.metadata {
        TransportMetadata::Queue(meta) => {
            assert_eq!(meta.message_id, "m-9");
            assert_eq!(meta.receipt_handle, "rh-9");
            assert_eq!(meta.message_group_id.as_deref(), Some("G"));
            assert_eq!(meta.deduplication_id.as_deref(), Some("d-9"));
        }
        other => panic!("expected queue metadata, got {:?}", other),
    }
}
