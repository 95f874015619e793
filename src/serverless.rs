// ABOUTME: Serverless entry adapter driving the subscriber pipeline over a host batch
// ABOUTME: One-shot manager without heartbeat, with optional partial-failure reporting

//! Serverless entry adapter.
//!
//! Hosts that deliver queue batches directly (instead of letting the
//! library poll) drive the same manager through
//! [`ServerlessProcessor::process_batch`]. The manager runs one-shot with
//! the heartbeat disabled, deletion defaults to the host, and with
//! `use_batch_response` the returned report names every message that did
//! not succeed so the host can redrive exactly those. FIFO event sources
//! get the same per-group serialization as the long-running poller.

use crate::config::{ServerlessConfig, SubscriptionConfig};
use crate::constants::limits;
use crate::envelope::EnvelopeCodec;
use crate::error::{PostbusError, Result};
use crate::queue::{
    resolve_queue_url_from_arn, BatchEntry, QueueClient, QueueMessage, QueueTransport,
};
use crate::registry::HandlerRegistry;
use crate::subscriber::fifo::FifoScheduler;
use crate::subscriber::manager::{ManagerOptions, MessageManager};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// One host-delivered batch plus its source context
#[derive(Debug, Clone, Default)]
pub struct ServerlessBatch {
    /// Messages exactly as the host delivered them
    pub messages: Vec<QueueMessage>,
    /// ARN of the queue the batch came from; required to delete or change
    /// visibility, and the source of FIFO-ness
    pub event_source_arn: Option<String>,
}

impl ServerlessBatch {
    pub fn new(messages: Vec<QueueMessage>) -> Self {
        Self {
            messages,
            event_source_arn: None,
        }
    }

    pub fn with_event_source_arn(mut self, arn: impl Into<String>) -> Self {
        self.event_source_arn = Some(arn.into());
        self
    }

    fn is_fifo(&self) -> bool {
        self.event_source_arn
            .as_deref()
            .map(|arn| arn.ends_with(".fifo"))
            .unwrap_or(false)
    }
}

/// Partial-failure report returned to the host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResponse {
    /// Ids of messages that did not succeed (handler failures, abandoned
    /// FIFO group remainders, and decode failures)
    pub failed_message_ids: Vec<String>,
}

/// One-shot processor for host-delivered batches
pub struct ServerlessProcessor {
    transport: Arc<dyn QueueTransport>,
    registry: Arc<HandlerRegistry>,
    codec: EnvelopeCodec,
    config: ServerlessConfig,
}

impl std::fmt::Debug for ServerlessProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerlessProcessor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ServerlessProcessor {
    /// Create a processor; fails fast on invalid configuration
    pub fn new(
        transport: Arc<dyn QueueTransport>,
        registry: Arc<HandlerRegistry>,
        config: ServerlessConfig,
    ) -> Result<Self> {
        config.validate()?;
        if registry.is_empty() {
            return Err(PostbusError::handler_not_registered(
                "batch processor has no message handlers registered",
            ));
        }
        Ok(Self {
            transport,
            registry,
            codec: EnvelopeCodec::new(),
            config,
        })
    }

    /// Replace the default codec, e.g. to install hooks
    pub fn with_codec(mut self, codec: EnvelopeCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Drive one batch to completion and build the host response.
    ///
    /// Never calls `receive`; the heartbeat is disabled, so a handler must
    /// finish within the visibility budget the host configured. Any
    /// background work still pending when the batch is done is cancelled
    /// before returning, so nothing leaks across invocations.
    pub async fn process_batch(&self, batch: ServerlessBatch) -> Result<BatchResponse> {
        if batch.messages.is_empty() {
            return Ok(BatchResponse::default());
        }

        let queue_url = match &batch.event_source_arn {
            Some(arn) => resolve_queue_url_from_arn(arn)?,
            None => {
                if self.config.delete_on_success
                    || self.config.visibility_timeout_for_batch_failures.is_some()
                {
                    return Err(PostbusError::invalid_configuration(
                        "event_source_arn is required to delete messages or change their visibility",
                    ));
                }
                String::new()
            }
        };
        let is_fifo = batch.is_fifo();

        let cancellation = CancellationToken::new();
        let queue = QueueClient::new(Arc::clone(&self.transport), queue_url);
        let mut manager_config = SubscriptionConfig::new(queue.queue_url());
        manager_config.max_concurrent_messages = self.config.max_concurrent_messages;
        let manager = Arc::new(MessageManager::new(
            manager_config,
            queue.clone(),
            cancellation.clone(),
            ManagerOptions {
                delete_on_success: self.config.delete_on_success,
                extend_visibility: false,
            },
        ));

        let receipts: HashMap<String, String> = batch
            .messages
            .iter()
            .map(|message| (message.message_id.clone(), message.receipt_handle.clone()))
            .collect();

        let failed_message_ids = if is_fifo {
            self.process_fifo(&manager, &cancellation, batch.messages).await
        } else {
            self.process_standard(&manager, batch.messages).await
        };

        // Nothing may outlive the invocation
        cancellation.cancel();

        if !self.config.use_batch_response {
            return Ok(BatchResponse::default());
        }
        if let Some(visibility) = self.config.visibility_timeout_for_batch_failures {
            let entries: Vec<BatchEntry> = failed_message_ids
                .iter()
                .filter_map(|id| {
                    receipts
                        .get(id)
                        .filter(|receipt| !receipt.is_empty())
                        .map(|receipt| BatchEntry {
                            id: id.clone(),
                            receipt_handle: receipt.clone(),
                        })
                })
                .collect();
            if !entries.is_empty() {
                if let Err(e) = queue.change_visibility_batch(entries, visibility).await {
                    tracing::error!(
                        error = %e,
                        "failed to change visibility of reported batch failures"
                    );
                }
            }
        }
        Ok(BatchResponse { failed_message_ids })
    }

    async fn process_standard(
        &self,
        manager: &Arc<MessageManager>,
        messages: Vec<QueueMessage>,
    ) -> Vec<String> {
        let mut failed = Vec::new();
        let mut tasks = Vec::new();
        for message in messages {
            match self
                .codec
                .decode(message.body.as_bytes(), &message, &self.registry)
            {
                Err(e) => {
                    tracing::error!(
                        message_id = %message.message_id,
                        error = %e,
                        "failed to decode batch message"
                    );
                    failed.push(message.message_id);
                }
                Ok(decoded) => {
                    while manager.capacity() == 0 {
                        manager.wait_for_capacity(limits::WAIT_FOR_CAPACITY_MAX).await;
                    }
                    manager.reserve_slot();
                    let manager = Arc::clone(manager);
                    let message_id = message.message_id.clone();
                    tasks.push(tokio::spawn(async move {
                        (message_id, manager.process_reserved(decoded, message).await)
                    }));
                }
            }
        }
        for outcome in futures::future::join_all(tasks).await {
            match outcome {
                Ok((message_id, status)) => {
                    if !status.is_success() {
                        failed.push(message_id);
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "batch processing task aborted");
                }
            }
        }
        failed
    }

    async fn process_fifo(
        &self,
        manager: &Arc<MessageManager>,
        cancellation: &CancellationToken,
        messages: Vec<QueueMessage>,
    ) -> Vec<String> {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let scheduler = Arc::new(
            FifoScheduler::new(
                Arc::clone(manager),
                self.config.max_concurrent_messages,
                cancellation.child_token(),
            )
            .with_failure_sink(Arc::clone(&sink)),
        );

        let mut failed = Vec::new();
        for message in messages {
            match self
                .codec
                .decode(message.body.as_bytes(), &message, &self.registry)
            {
                Err(e) => {
                    tracing::error!(
                        message_id = %message.message_id,
                        error = %e,
                        "failed to decode batch message"
                    );
                    failed.push(message.message_id);
                }
                Ok(decoded) => FifoScheduler::enqueue(&scheduler, decoded, message),
            }
        }
        scheduler.wait_idle().await;
        failed.extend(sink.lock().unwrap().drain(..));
        failed
    }
}
