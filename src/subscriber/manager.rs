// ABOUTME: Message manager owning admission, in-flight leases, heartbeat, and acknowledgment
// ABOUTME: Bounds concurrent work and keeps visibility leases alive while handlers run

//! Message manager for one subscription.
//!
//! The manager exclusively owns the in-flight state: it admits messages
//! against the concurrency ceiling, records their visibility leases, runs
//! the single heartbeat task that extends leases close to expiry, deletes
//! acknowledged messages, and leaves failed ones visible for redelivery.

use crate::config::SubscriptionConfig;
use crate::envelope::DecodedMessage;
use crate::queue::{BatchEntry, QueueClient, QueueMessage};
use crate::registry::HandlerStatus;
use crate::subscriber::lease::{InFlightRecord, LeaseTracker};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Behavior switches that differ between the poller and the serverless adapter
#[derive(Debug, Clone, Copy)]
pub struct ManagerOptions {
    /// Delete each message as soon as its handler succeeds
    pub delete_on_success: bool,
    /// Run the heartbeat loop that extends near-expiry leases
    pub extend_visibility: bool,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            delete_on_success: true,
            extend_visibility: true,
        }
    }
}

/// Owner of the in-flight message set for one subscription
pub struct MessageManager {
    config: SubscriptionConfig,
    queue: QueueClient,
    options: ManagerOptions,
    leases: LeaseTracker,
    active: AtomicUsize,
    slot_freed: Notify,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    cancellation: CancellationToken,
}

impl std::fmt::Debug for MessageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageManager")
            .field("queue_url", &self.queue.queue_url())
            .field("active", &self.active_count())
            .field("in_flight", &self.leases.len())
            .finish_non_exhaustive()
    }
}

impl MessageManager {
    pub fn new(
        config: SubscriptionConfig,
        queue: QueueClient,
        cancellation: CancellationToken,
        options: ManagerOptions,
    ) -> Self {
        Self {
            config,
            queue,
            options,
            leases: LeaseTracker::new(),
            active: AtomicUsize::new(0),
            slot_freed: Notify::new(),
            heartbeat: Mutex::new(None),
            cancellation,
        }
    }

    /// Number of handler slots currently free; never negative
    pub fn capacity(&self) -> usize {
        self.config
            .max_concurrent_messages
            .saturating_sub(self.active_count())
    }

    /// Number of messages currently being processed
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Block until a slot frees, the timeout elapses, or cancellation fires.
    ///
    /// The caller must re-check [`capacity`](Self::capacity) afterwards; a
    /// wakeup is a hint, not a reservation.
    pub async fn wait_for_capacity(&self, timeout: Duration) {
        let capped = timeout.min(crate::constants::limits::WAIT_FOR_CAPACITY_MAX);
        tokio::select! {
            _ = self.slot_freed.notified() => {}
            _ = tokio::time::sleep(capped) => {}
            _ = self.cancellation.cancelled() => {}
        }
    }

    /// Resolves once no messages are in flight
    pub async fn wait_for_drain(&self) {
        loop {
            let notified = self.slot_freed.notified();
            if self.active_count() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Claim a concurrency slot ahead of [`process_reserved`](Self::process_reserved).
    ///
    /// Dispatchers that hand messages to spawned tasks reserve synchronously
    /// so the next capacity check already sees the admission; the spawned
    /// task may not have started yet.
    pub(crate) fn reserve_slot(&self) {
        self.active.fetch_add(1, Ordering::SeqCst);
    }

    /// Process one decoded message to completion.
    ///
    /// Admits the message, records its lease, makes sure the heartbeat is
    /// running, invokes the handler on its own task, then acknowledges on
    /// success or leaves the message visible on failure. The active count
    /// is decremented last, after the completion path finished.
    pub async fn process(
        self: Arc<Self>,
        decoded: DecodedMessage,
        delivery: QueueMessage,
    ) -> HandlerStatus {
        self.reserve_slot();
        self.process_reserved(decoded, delivery).await
    }

    /// [`process`](Self::process) for a message whose slot is already reserved
    pub(crate) async fn process_reserved(
        self: Arc<Self>,
        decoded: DecodedMessage,
        delivery: QueueMessage,
    ) -> HandlerStatus {
        let status = Self::run_message(&self, decoded, delivery).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.slot_freed.notify_one();
        status
    }

    async fn run_message(
        manager: &Arc<Self>,
        decoded: DecodedMessage,
        delivery: QueueMessage,
    ) -> HandlerStatus {
        if manager.cancellation.is_cancelled() {
            // Stops starting new work on cancel; already-running handlers
            // are unaffected and the message redelivers after its timeout
            let error = crate::error::PostbusError::cancelled(&delivery.message_id);
            tracing::warn!(
                message_id = %delivery.message_id,
                error = %error,
                "subscription cancelled before the handler started"
            );
            return HandlerStatus::Failed;
        }

        let needs_receipt = manager.options.delete_on_success || manager.options.extend_visibility;
        if needs_receipt && delivery.receipt_handle.is_empty() {
            let error = crate::error::PostbusError::missing_receipt_handle(&delivery.message_id);
            tracing::error!(
                message_id = %delivery.message_id,
                error = %error,
                "message cannot be acknowledged or extended"
            );
            return HandlerStatus::Failed;
        }

        let lease_key = if delivery.receipt_handle.is_empty() {
            None
        } else {
            Some(manager.leases.insert(InFlightRecord {
                message_id: delivery.message_id.clone(),
                receipt_handle: delivery.receipt_handle.clone(),
                expires_at: Instant::now() + manager.config.visibility_timeout(),
            }))
        };
        if manager.options.extend_visibility {
            Self::ensure_heartbeat(manager);
        }

        let status = manager.invoke_isolated(&decoded).await;

        match status {
            HandlerStatus::Success => {
                // The record leaves the tracker before the delete call; a
                // concurrent heartbeat scan simply loses the race and its
                // extension fails per-entry, which it ignores.
                if let Some(key) = lease_key {
                    manager.leases.remove(key);
                }
                if manager.options.delete_on_success {
                    let entry = BatchEntry {
                        id: decoded.envelope.id.clone(),
                        receipt_handle: delivery.receipt_handle.clone(),
                    };
                    if let Err(e) = manager.queue.delete_batch(vec![entry]).await {
                        tracing::error!(
                            message_id = %delivery.message_id,
                            error = %e,
                            "failed to delete acknowledged message"
                        );
                    }
                }
            }
            HandlerStatus::Failed => {
                if let Some(key) = lease_key {
                    manager.leases.remove(key);
                }
                tracing::warn!(
                    message_id = %delivery.message_id,
                    message_type = %decoded.envelope.message_type,
                    "handler failed; message left visible for redelivery"
                );
            }
        }

        status
    }

    /// Run the handler on its own task so a panic becomes `Failed`
    async fn invoke_isolated(&self, decoded: &DecodedMessage) -> HandlerStatus {
        let envelope = decoded.envelope.clone();
        let metadata = decoded.metadata.clone();
        let mapping = decoded.mapping.clone();
        let cancellation = self.cancellation.child_token();
        let task =
            tokio::spawn(async move { mapping.invoke(&envelope, metadata, cancellation).await });
        match task.await {
            Ok(status) => status,
            Err(e) => {
                tracing::error!(
                    message_id = %decoded.envelope.id,
                    error = %e,
                    "handler task aborted or panicked"
                );
                HandlerStatus::Failed
            }
        }
    }

    /// Start the heartbeat task unless one is already running.
    ///
    /// The slot in `self.heartbeat` is `Some` exactly while a task intends
    /// to keep scanning; the task clears it under the same lock before
    /// exiting, so a lease inserted concurrently either lands in front of a
    /// live scan or triggers a fresh spawn here.
    fn ensure_heartbeat(manager: &Arc<Self>) {
        let mut slot = manager.heartbeat.lock().unwrap();
        if slot.is_none() {
            let manager = Arc::clone(manager);
            *slot = Some(tokio::spawn(async move { manager.run_heartbeat().await }));
        }
    }

    async fn run_heartbeat(self: Arc<Self>) {
        tracing::debug!(queue_url = %self.queue.queue_url(), "heartbeat started");
        loop {
            tokio::select! {
                _ = self.cancellation.cancelled() => {
                    let mut slot = self.heartbeat.lock().unwrap();
                    *slot = None;
                    break;
                }
                _ = tokio::time::sleep(self.config.heartbeat_interval()) => {}
            }

            let due = self.leases.due_for_extension(self.config.extension_threshold());
            if !due.is_empty() {
                self.extend_leases(due).await;
            }

            let exit = {
                let mut slot = self.heartbeat.lock().unwrap();
                if self.leases.is_empty() {
                    *slot = None;
                    true
                } else {
                    false
                }
            };
            if exit {
                break;
            }
        }
        tracing::debug!(queue_url = %self.queue.queue_url(), "heartbeat stopped");
    }

    async fn extend_leases(&self, due: Vec<BatchEntry>) {
        let count = due.len();
        match self
            .queue
            .change_visibility_batch(due, self.config.visibility_timeout_seconds)
            .await
        {
            Ok(outcome) => {
                let extended: Vec<u64> = outcome
                    .successful
                    .iter()
                    .filter_map(|id| id.parse().ok())
                    .collect();
                self.leases
                    .refresh(&extended, Instant::now() + self.config.visibility_timeout());
                tracing::debug!(
                    requested = count,
                    extended = extended.len(),
                    "visibility leases extended"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "lease extension call failed");
            }
        }
    }
}
