// ABOUTME: Shared test fixtures - recording mock queue transport and scriptable handlers
// ABOUTME: Lets integration tests drive the subscriber pipeline without external systems

//! Shared fixtures for the integration tests.
//!
//! [`MockQueueTransport`] replays scripted receive batches and records every
//! call for verification; [`RecordingHandler`] reads its behavior (sleep,
//! fail) from the message payload, so each scenario scripts per-message
//! outcomes without bespoke handler types.

use postbus::envelope::{EnvelopeCodec, MessageEnvelope};
use postbus::queue::{
    BatchEntry, BatchOutcome, QueueMessage, QueueServiceError, QueueTransport, ReceiveRequest,
};
use postbus::registry::{HandlerStatus, MessageContext, MessageHandler};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// One scripted answer for a `receive` call
pub enum ReceiveScript {
    Batch(Vec<QueueMessage>),
    Error(QueueServiceError),
}

/// Recording mock of the queue service transport.
///
/// Replays the scripted receive answers in order and returns empty batches
/// once the script is exhausted. Every call is recorded for verification.
#[derive(Default)]
pub struct MockQueueTransport {
    script: Mutex<VecDeque<ReceiveScript>>,
    pub receives: Mutex<Vec<ReceiveRequest>>,
    pub deletes: Mutex<Vec<Vec<BatchEntry>>>,
    pub visibility_changes: Mutex<Vec<(Vec<BatchEntry>, u32)>>,
}

impl MockQueueTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next receive call to return this batch
    pub fn with_batch(self, messages: Vec<QueueMessage>) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(ReceiveScript::Batch(messages));
        self
    }

    /// Script the next receive call to fail with this service error
    pub fn with_receive_error(self, code: &str, message: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(ReceiveScript::Error(QueueServiceError::new(code, message)));
        self
    }

    pub fn receive_count(&self) -> usize {
        self.receives.lock().unwrap().len()
    }

    pub fn deleted_receipt_handles(&self) -> Vec<String> {
        self.deletes
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .map(|entry| entry.receipt_handle.clone())
            .collect()
    }

    pub fn visibility_change_count(&self) -> usize {
        self.visibility_changes.lock().unwrap().len()
    }
}

#[async_trait]
impl QueueTransport for MockQueueTransport {
    async fn receive(
        &self,
        request: ReceiveRequest,
    ) -> Result<Vec<QueueMessage>, QueueServiceError> {
        let max_messages = request.max_messages;
        self.receives.lock().unwrap().push(request);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(ReceiveScript::Batch(mut messages)) => {
                // Respect the requested batch size; undelivered messages
                // stay at the head of the script for the next receive
                if messages.len() > max_messages {
                    let rest = messages.split_off(max_messages);
                    self.script
                        .lock()
                        .unwrap()
                        .push_front(ReceiveScript::Batch(rest));
                }
                Ok(messages)
            }
            Some(ReceiveScript::Error(error)) => Err(error),
            None => Ok(Vec::new()),
        }
    }

    async fn delete_batch(
        &self,
        _queue_url: &str,
        entries: Vec<BatchEntry>,
    ) -> Result<BatchOutcome, QueueServiceError> {
        let successful = entries.iter().map(|entry| entry.id.clone()).collect();
        self.deletes.lock().unwrap().push(entries);
        Ok(BatchOutcome {
            successful,
            failed: Vec::new(),
        })
    }

    async fn change_visibility_batch(
        &self,
        _queue_url: &str,
        entries: Vec<BatchEntry>,
        visibility_timeout_seconds: u32,
    ) -> Result<BatchOutcome, QueueServiceError> {
        let successful = entries.iter().map(|entry| entry.id.clone()).collect();
        self.visibility_changes
            .lock()
            .unwrap()
            .push((entries, visibility_timeout_seconds));
        Ok(BatchOutcome {
            successful,
            failed: Vec::new(),
        })
    }
}

/// Payload understood by [`RecordingHandler`]; behavior travels with the message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestPayload {
    pub label: String,
    #[serde(default)]
    pub fail: bool,
    #[serde(default)]
    pub sleep_ms: u64,
}

impl TestPayload {
    pub fn ok(label: &str) -> Self {
        Self {
            label: label.to_string(),
            fail: false,
            sleep_ms: 0,
        }
    }

    pub fn failing(label: &str) -> Self {
        Self {
            label: label.to_string(),
            fail: true,
            sleep_ms: 0,
        }
    }

    pub fn slow(label: &str, sleep_ms: u64) -> Self {
        Self {
            label: label.to_string(),
            fail: false,
            sleep_ms,
        }
    }
}

/// One recorded handler invocation
#[derive(Debug, Clone)]
pub struct Invocation {
    pub label: String,
    pub started_at: Instant,
    pub finished_at: Instant,
}

/// Handler that sleeps and fails as its payload instructs, recording each call
#[derive(Clone, Default)]
pub struct RecordingHandler {
    pub invocations: Arc<Mutex<Vec<Invocation>>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labels(&self) -> Vec<String> {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .map(|invocation| invocation.label.clone())
            .collect()
    }

    pub fn invocation(&self, label: &str) -> Option<Invocation> {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .find(|invocation| invocation.label == label)
            .cloned()
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    type Message = TestPayload;

    async fn handle(&self, _context: MessageContext, message: TestPayload) -> HandlerStatus {
        let started_at = Instant::now();
        if message.sleep_ms > 0 {
            tokio::time::sleep(Duration::from_millis(message.sleep_ms)).await;
        }
        self.invocations.lock().unwrap().push(Invocation {
            label: message.label.clone(),
            started_at,
            finished_at: Instant::now(),
        });
        if message.fail {
            HandlerStatus::Failed
        } else {
            HandlerStatus::Success
        }
    }
}

/// Message type identifier all fixtures register under
pub const TEST_MESSAGE_TYPE: &str = "postbus.test.payload";

/// Encode a [`TestPayload`] into an envelope body string
pub fn envelope_body(payload: &TestPayload) -> String {
    let envelope = MessageEnvelope::builder()
        .with_source("/postbus/tests")
        .with_message_type(TEST_MESSAGE_TYPE)
        .with_payload(payload)
        .unwrap()
        .build()
        .unwrap();
    String::from_utf8(EnvelopeCodec::new().encode(&envelope).unwrap()).unwrap()
}

/// Build a queue delivery carrying an encoded [`TestPayload`]
pub fn queue_message(id: &str, payload: TestPayload) -> QueueMessage {
    QueueMessage {
        message_id: id.to_string(),
        receipt_handle: format!("rh-{}", id),
        body: envelope_body(&payload),
        ..Default::default()
    }
}

/// Same as [`queue_message`] with a FIFO message-group id
pub fn fifo_queue_message(id: &str, group: &str, payload: TestPayload) -> QueueMessage {
    QueueMessage {
        message_group_id: Some(group.to_string()),
        ..queue_message(id, payload)
    }
}

/// Install a fmt subscriber honoring `RUST_LOG`; safe to call repeatedly
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Poll `condition` under virtual time until it holds or the deadline lapses
pub async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(120), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
