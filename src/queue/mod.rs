// ABOUTME: Queue service types, transport seam, and the classifying client facade
// ABOUTME: Splits oversized batches, classifies fatal vs transient errors, logs partial failures

//! Queue service access.
//!
//! [`QueueTransport`] is the raw RPC seam against the queue service; tests
//! and alternative backends implement it directly. [`QueueClient`] is the
//! facade the subscriber pipeline talks to: it classifies service errors
//! into fatal (surfaced) and transient (logged, swallowed), splits batches
//! above the service's 10-entry ceiling, and reports per-entry failures
//! without raising them.

use crate::constants::{error_codes, limits};
use crate::error::{PostbusError, Result};

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// One message as delivered by the queue service
#[derive(Debug, Clone, Default)]
pub struct QueueMessage {
    /// Service-assigned message id
    pub message_id: String,
    /// Opaque token identifying this delivery
    pub receipt_handle: String,
    /// Raw message body
    pub body: String,
    /// FIFO message-group id
    pub message_group_id: Option<String>,
    /// FIFO deduplication id
    pub deduplication_id: Option<String>,
    /// Raw attributes as delivered
    pub attributes: HashMap<String, Value>,
}

/// Parameters of one receive call
#[derive(Debug, Clone)]
pub struct ReceiveRequest {
    pub queue_url: String,
    pub max_messages: usize,
    pub wait_time_seconds: u32,
    pub visibility_timeout_seconds: u32,
}

/// One entry of a delete or change-visibility batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    /// Caller-chosen id used to match per-entry results
    pub id: String,
    /// Receipt handle of the delivery the entry refers to
    pub receipt_handle: String,
}

/// Per-entry failure within an otherwise successful batch call
#[derive(Debug, Clone)]
pub struct BatchFailure {
    pub id: String,
    pub code: String,
    pub message: String,
}

/// Aggregated result of a batch call
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Entry ids the service accepted
    pub successful: Vec<String>,
    /// Entries the service rejected
    pub failed: Vec<BatchFailure>,
}

/// Raw error returned by the queue service
#[derive(Debug, Clone)]
pub struct QueueServiceError {
    /// Service error code, e.g. `AccessDenied`
    pub code: String,
    pub message: String,
}

impl QueueServiceError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for QueueServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for QueueServiceError {}

/// Raw RPC seam against the queue service.
///
/// Implementations must be safe for concurrent calls; the poller, the
/// heartbeat loop, and completing handlers all share one transport.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Long-poll receive of up to `max_messages` deliveries
    async fn receive(
        &self,
        request: ReceiveRequest,
    ) -> std::result::Result<Vec<QueueMessage>, QueueServiceError>;

    /// Delete up to 10 deliveries in one call
    async fn delete_batch(
        &self,
        queue_url: &str,
        entries: Vec<BatchEntry>,
    ) -> std::result::Result<BatchOutcome, QueueServiceError>;

    /// Change the visibility timeout of up to 10 deliveries in one call
    async fn change_visibility_batch(
        &self,
        queue_url: &str,
        entries: Vec<BatchEntry>,
        visibility_timeout_seconds: u32,
    ) -> std::result::Result<BatchOutcome, QueueServiceError>;
}

/// Classifying facade over the raw queue transport
#[derive(Clone)]
pub struct QueueClient {
    transport: Arc<dyn QueueTransport>,
    queue_url: String,
}

impl std::fmt::Debug for QueueClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueClient")
            .field("queue_url", &self.queue_url)
            .finish_non_exhaustive()
    }
}

impl QueueClient {
    pub fn new(transport: Arc<dyn QueueTransport>, queue_url: impl Into<String>) -> Self {
        Self {
            transport,
            queue_url: queue_url.into(),
        }
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }

    /// Receive up to `max_messages` deliveries.
    ///
    /// Fatal errors (`InvalidAddress`, `AccessDenied`) are re-raised so the
    /// poller terminates. Transient errors are logged and surfaced as an
    /// empty batch, which the poller treats as a backoff signal.
    pub async fn receive(
        &self,
        max_messages: usize,
        wait_time_seconds: u32,
        visibility_timeout_seconds: u32,
    ) -> Result<Vec<QueueMessage>> {
        let request = ReceiveRequest {
            queue_url: self.queue_url.clone(),
            max_messages: max_messages.min(limits::RECEIVE_BATCH_MAX),
            wait_time_seconds,
            visibility_timeout_seconds,
        };
        match self.transport.receive(request).await {
            Ok(messages) => Ok(messages),
            Err(e) if is_fatal_code(&e.code) => {
                Err(PostbusError::fatal_queue(e.code, e.message))
            }
            Err(e) => {
                let error = PostbusError::transient_queue(e.to_string());
                tracing::warn!(queue_url = %self.queue_url, error = %error, "transient receive failure");
                Ok(Vec::new())
            }
        }
    }

    /// Delete a set of deliveries, splitting into service-sized chunks.
    ///
    /// Per-entry failures are logged and never raised; whole-call transient
    /// failures are logged and swallowed. Only fatal errors propagate.
    pub async fn delete_batch(&self, entries: Vec<BatchEntry>) -> Result<()> {
        for chunk in entries.chunks(limits::BATCH_ENTRY_MAX) {
            match self
                .transport
                .delete_batch(&self.queue_url, chunk.to_vec())
                .await
            {
                Ok(outcome) => {
                    for failure in &outcome.failed {
                        tracing::warn!(
                            queue_url = %self.queue_url,
                            entry_id = %failure.id,
                            code = %failure.code,
                            "delete entry failed"
                        );
                    }
                }
                Err(e) if is_fatal_code(&e.code) => {
                    return Err(PostbusError::fatal_queue(e.code, e.message));
                }
                Err(e) => {
                    tracing::warn!(queue_url = %self.queue_url, error = %e, "transient delete failure");
                }
            }
        }
        Ok(())
    }

    /// Extend the visibility of a set of deliveries, splitting into chunks.
    ///
    /// Returns the aggregated outcome so the heartbeat refreshes only the
    /// leases the service actually extended. A delivery deleted between the
    /// heartbeat scan and this call shows up as a per-entry failure, which
    /// is logged and otherwise ignored.
    pub async fn change_visibility_batch(
        &self,
        entries: Vec<BatchEntry>,
        visibility_timeout_seconds: u32,
    ) -> Result<BatchOutcome> {
        let mut aggregated = BatchOutcome::default();
        for chunk in entries.chunks(limits::BATCH_ENTRY_MAX) {
            match self
                .transport
                .change_visibility_batch(&self.queue_url, chunk.to_vec(), visibility_timeout_seconds)
                .await
            {
                Ok(outcome) => {
                    for failure in &outcome.failed {
                        tracing::warn!(
                            queue_url = %self.queue_url,
                            entry_id = %failure.id,
                            code = %failure.code,
                            "visibility change entry failed"
                        );
                    }
                    aggregated.successful.extend(outcome.successful);
                    aggregated.failed.extend(outcome.failed);
                }
                Err(e) if is_fatal_code(&e.code) => {
                    return Err(PostbusError::fatal_queue(e.code, e.message));
                }
                Err(e) => {
                    tracing::warn!(
                        queue_url = %self.queue_url,
                        error = %e,
                        "transient visibility change failure"
                    );
                    aggregated.failed.extend(chunk.iter().map(|entry| BatchFailure {
                        id: entry.id.clone(),
                        code: e.code.clone(),
                        message: e.message.clone(),
                    }));
                }
            }
        }
        Ok(aggregated)
    }
}

fn is_fatal_code(code: &str) -> bool {
    code == error_codes::INVALID_ADDRESS || code == error_codes::ACCESS_DENIED
}

/// Build the queue URL from a queue ARN.
///
/// The resolution is purely lexical: `arn:{partition}:sqs:{region}:{account}:{name}`
/// becomes `https://sqs.{region}.amazonaws.com/{account}/{name}`. Used only by
/// the serverless entry adapter, which receives ARNs rather than URLs from its
/// host.
pub fn resolve_queue_url_from_arn(arn: &str) -> Result<String> {
    let parts: Vec<&str> = arn.split(':').collect();
    if parts.len() != 6 || parts[0] != "arn" || parts[2] != "sqs" {
        return Err(PostbusError::invalid_configuration(format!(
            "'{}' is not a queue ARN",
            arn
        )));
    }
    let (region, account, name) = (parts[3], parts[4], parts[5]);
    if region.is_empty() || account.is_empty() || name.is_empty() {
        return Err(PostbusError::invalid_configuration(format!(
            "'{}' is missing region, account, or queue name",
            arn
        )));
    }
    Ok(format!(
        "https://sqs.{}.amazonaws.com/{}/{}",
        region, account, name
    ))
}
