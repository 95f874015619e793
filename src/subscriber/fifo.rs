// ABOUTME: FIFO group scheduler serializing handlers within a message group
// ABOUTME: Runs distinct groups in parallel under the subscription's concurrency ceiling

//! FIFO group scheduler.
//!
//! Messages are bucketed by their message-group id. Within a group the next
//! handler starts only after the previous one fully completed; across
//! groups, handlers run concurrently up to the concurrency ceiling (which
//! counts active groups — a serial group has at most one active message, so
//! group and message counts coincide). When a handler fails, the rest of
//! the group's locally-buffered messages are abandoned so the queue
//! redelivers them in order.

use crate::envelope::DecodedMessage;
use crate::queue::QueueMessage;
use crate::registry::HandlerStatus;
use crate::subscriber::manager::MessageManager;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct GroupState {
    queue: VecDeque<(DecodedMessage, QueueMessage)>,
    active: bool,
}

/// Scheduler enforcing per-group ordering for one FIFO subscription
pub(crate) struct FifoScheduler {
    manager: Arc<MessageManager>,
    max_concurrent_groups: usize,
    groups: Mutex<HashMap<String, GroupState>>,
    active_groups: AtomicUsize,
    worker_exited: Notify,
    cancellation: CancellationToken,
    /// When set, ids of failed and abandoned messages are recorded here
    /// (used by the serverless adapter's partial-failure report)
    failure_sink: Option<Arc<Mutex<Vec<String>>>>,
}

impl FifoScheduler {
    pub fn new(
        manager: Arc<MessageManager>,
        max_concurrent_groups: usize,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            manager,
            max_concurrent_groups,
            groups: Mutex::new(HashMap::new()),
            active_groups: AtomicUsize::new(0),
            worker_exited: Notify::new(),
            cancellation,
            failure_sink: None,
        }
    }

    /// Record failed and abandoned message ids into `sink`
    pub fn with_failure_sink(mut self, sink: Arc<Mutex<Vec<String>>>) -> Self {
        self.failure_sink = Some(sink);
        self
    }

    /// Stop workers after their current message; buffered messages are
    /// abandoned for queue redelivery
    pub fn stop(&self) {
        self.cancellation.cancel();
    }

    /// Free group slots under the concurrency ceiling
    pub fn capacity(&self) -> usize {
        self.max_concurrent_groups
            .saturating_sub(self.active_groups.load(Ordering::SeqCst))
    }

    /// Buffer a message behind its group and activate the group if a slot is free.
    ///
    /// Messages without a group id get a group of their own, which keeps
    /// them ordered against nothing but themselves.
    pub fn enqueue(scheduler: &Arc<Self>, decoded: DecodedMessage, message: QueueMessage) {
        let group_id = message
            .message_group_id
            .clone()
            .unwrap_or_else(|| message.message_id.clone());
        {
            let mut groups = scheduler.groups.lock().unwrap();
            groups
                .entry(group_id)
                .or_default()
                .queue
                .push_back((decoded, message));
        }
        Self::activate_ready(scheduler);
    }

    /// Resolve once no group is active and no undelivered work is buffered.
    ///
    /// After [`stop`](Self::stop), buffered messages count as abandoned and
    /// no longer hold this open.
    pub async fn wait_idle(&self) {
        loop {
            let exited = self.worker_exited.notified();
            if self.is_idle() {
                return;
            }
            exited.await;
        }
    }

    fn is_idle(&self) -> bool {
        if self.active_groups.load(Ordering::SeqCst) != 0 {
            return false;
        }
        if self.cancellation.is_cancelled() {
            return true;
        }
        self.groups
            .lock()
            .unwrap()
            .values()
            .all(|state| state.queue.is_empty())
    }

    /// Spawn workers for buffered, inactive groups while slots remain
    fn activate_ready(scheduler: &Arc<Self>) {
        let mut to_spawn = Vec::new();
        {
            let mut groups = scheduler.groups.lock().unwrap();
            let mut active = scheduler.active_groups.load(Ordering::SeqCst);
            for (group_id, state) in groups.iter_mut() {
                if active >= scheduler.max_concurrent_groups {
                    break;
                }
                if !state.active && !state.queue.is_empty() {
                    state.active = true;
                    active += 1;
                    to_spawn.push(group_id.clone());
                }
            }
            scheduler
                .active_groups
                .fetch_add(to_spawn.len(), Ordering::SeqCst);
        }
        for group_id in to_spawn {
            let scheduler = Arc::clone(scheduler);
            tokio::spawn(async move {
                scheduler.run_group(group_id).await;
            });
        }
    }

    /// Drain one group serially: each handler completes before the next starts
    async fn run_group(self: Arc<Self>, group_id: String) {
        loop {
            if self.cancellation.is_cancelled() {
                self.release_group(&group_id);
                break;
            }

            // Popping and unlocking are atomic under the groups lock, so a
            // message enqueued while the worker winds down either lands in
            // front of this pop or finds the group unlocked again.
            let next = {
                let mut groups = self.groups.lock().unwrap();
                match groups.get_mut(&group_id).and_then(|state| state.queue.pop_front()) {
                    Some(item) => Some(item),
                    None => {
                        groups.remove(&group_id);
                        None
                    }
                }
            };
            let Some((decoded, message)) = next else {
                break;
            };

            let message_id = message.message_id.clone();
            let status = Arc::clone(&self.manager).process(decoded, message).await;

            if status == HandlerStatus::Failed {
                let abandoned = self.release_group(&group_id);
                tracing::warn!(
                    group_id = %group_id,
                    abandoned = abandoned.len(),
                    "group handler failed; remaining buffered messages left for redelivery"
                );
                if let Some(sink) = &self.failure_sink {
                    let mut sink = sink.lock().unwrap();
                    sink.push(message_id);
                    sink.extend(abandoned);
                }
                break;
            }
        }

        self.active_groups.fetch_sub(1, Ordering::SeqCst);
        Self::activate_ready(&self);
        self.worker_exited.notify_one();
    }

    /// Drop the group's buffered messages and unlock it, returning their ids
    fn release_group(&self, group_id: &str) -> Vec<String> {
        let mut groups = self.groups.lock().unwrap();
        let abandoned = groups
            .get_mut(group_id)
            .map(|state| {
                state
                    .queue
                    .drain(..)
                    .map(|(_, message)| message.message_id)
                    .collect()
            })
            .unwrap_or_default();
        groups.remove(group_id);
        abandoned
    }
}

impl std::fmt::Debug for FifoScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FifoScheduler")
            .field("max_concurrent_groups", &self.max_concurrent_groups)
            .field("active_groups", &self.active_groups.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
