// ABOUTME: Long-running queue poller driving the subscriber pipeline
// ABOUTME: Gates receives on free capacity and applies backoff to transient failures

//! Long-running queue poller.
//!
//! [`QueuePoller::run`] loops until cancellation: it sizes each receive to
//! the manager's free capacity, decodes every delivery, and hands decoded
//! messages to the manager without awaiting them so they proceed
//! concurrently. Fatal queue errors terminate the loop; transient failures
//! and empty receives back off per the configured policy. FIFO endpoints
//! run the same loop through the per-group scheduler.

use crate::config::{BackoffPolicy, SubscriptionConfig};
use crate::constants::{backoff, limits};
use crate::envelope::EnvelopeCodec;
use crate::error::Result;
use crate::queue::{QueueClient, QueueTransport};
use crate::registry::HandlerRegistry;
use crate::subscriber::fifo::FifoScheduler;
use crate::subscriber::manager::{ManagerOptions, MessageManager};

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Delay sequence applied after transient failures and empty receives
#[derive(Debug)]
struct Backoff {
    policy: BackoffPolicy,
    next: Duration,
}

impl Backoff {
    fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            next: backoff::BASE_DELAY,
        }
    }

    /// Current delay, doubling the next one up to the cap
    fn delay(&mut self) -> Option<Duration> {
        match self.policy {
            BackoffPolicy::None => None,
            BackoffPolicy::CappedExponential => {
                let delay = self.next;
                self.next = (delay * 2).min(backoff::MAX_DELAY);
                Some(delay)
            }
        }
    }

    /// A receive that returned messages restarts the sequence
    fn reset(&mut self) {
        self.next = backoff::BASE_DELAY;
    }
}

/// Long-running poller for one queue subscription
pub struct QueuePoller {
    manager: Arc<MessageManager>,
    queue: QueueClient,
    codec: EnvelopeCodec,
    registry: Arc<HandlerRegistry>,
    config: SubscriptionConfig,
    cancellation: CancellationToken,
}

impl std::fmt::Debug for QueuePoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuePoller")
            .field("endpoint", &self.config.endpoint)
            .field("is_fifo", &self.config.is_fifo())
            .finish_non_exhaustive()
    }
}

impl QueuePoller {
    /// Create a poller over a raw queue transport.
    ///
    /// Fails fast on invalid configuration; nothing is polled until
    /// [`run`](Self::run) is called.
    pub fn new(
        transport: Arc<dyn QueueTransport>,
        registry: Arc<HandlerRegistry>,
        config: SubscriptionConfig,
    ) -> Result<Self> {
        config.validate()?;
        if registry.is_empty() {
            return Err(crate::error::PostbusError::handler_not_registered(
                "subscription has no message handlers registered",
            ));
        }
        let queue = QueueClient::new(transport, config.endpoint.clone());
        let cancellation = CancellationToken::new();
        let manager = Arc::new(MessageManager::new(
            config.clone(),
            queue.clone(),
            cancellation.clone(),
            ManagerOptions::default(),
        ));
        Ok(Self {
            manager,
            queue,
            codec: EnvelopeCodec::new(),
            registry,
            config,
            cancellation,
        })
    }

    /// Replace the default codec, e.g. to install hooks
    pub fn with_codec(mut self, codec: EnvelopeCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Token that stops the poller; in-flight handlers drain before `run` returns
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// The manager owning this subscription's in-flight state
    pub fn manager(&self) -> &Arc<MessageManager> {
        &self.manager
    }

    /// Run until cancellation or a fatal queue error.
    ///
    /// On a fatal error the loop stops receiving immediately, outstanding
    /// handlers complete normally, and the error is returned to the host.
    pub async fn run(self) -> Result<()> {
        tracing::debug!(endpoint = %self.config.endpoint, "poller started");
        let result = if self.config.is_fifo() {
            // The scheduler stops on the subscription token or on its own
            // child token, so a fatal receive error abandons buffered work
            // without interrupting in-flight handlers.
            let scheduler = Arc::new(FifoScheduler::new(
                Arc::clone(&self.manager),
                self.config.max_concurrent_messages,
                self.cancellation.child_token(),
            ));
            let result = self.poll_loop(&scheduler).await;
            scheduler.stop();
            scheduler.wait_idle().await;
            result
        } else {
            self.poll_loop(&StandardDispatch).await
        };
        self.manager.wait_for_drain().await;
        tracing::debug!(endpoint = %self.config.endpoint, "poller stopped");
        result
    }

    async fn poll_loop<D: Dispatch>(&self, dispatch: &D) -> Result<()> {
        let mut backoff = Backoff::new(self.config.backoff_policy);
        loop {
            if self.cancellation.is_cancelled() {
                return Ok(());
            }

            let want = dispatch
                .capacity(&self.manager)
                .min(limits::RECEIVE_BATCH_MAX);
            if want == 0 {
                self.manager
                    .wait_for_capacity(limits::WAIT_FOR_CAPACITY_MAX)
                    .await;
                continue;
            }

            let messages = tokio::select! {
                _ = self.cancellation.cancelled() => return Ok(()),
                received = self.queue.receive(
                    want,
                    self.config.wait_time_seconds,
                    self.config.visibility_timeout_seconds,
                ) => match received {
                    Ok(messages) => messages,
                    Err(e) => {
                        tracing::error!(endpoint = %self.config.endpoint, error = %e, "fatal queue error; poller terminating");
                        return Err(e);
                    }
                },
            };

            if messages.is_empty() {
                if let Some(delay) = backoff.delay() {
                    tokio::select! {
                        _ = self.cancellation.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                continue;
            }
            backoff.reset();

            for message in messages {
                match self
                    .codec
                    .decode(message.body.as_bytes(), &message, &self.registry)
                {
                    Ok(decoded) => dispatch.dispatch(&self.manager, decoded, message),
                    Err(e) => {
                        // Not dispatched and not deleted: the message
                        // reappears after its visibility timeout lapses.
                        tracing::error!(
                            message_id = %message.message_id,
                            error = %e,
                            "failed to decode message"
                        );
                    }
                }
            }
        }
    }
}

/// Seam between the receive loop and the two dispatch disciplines
trait Dispatch {
    fn capacity(&self, manager: &MessageManager) -> usize;
    fn dispatch(
        &self,
        manager: &Arc<MessageManager>,
        decoded: crate::envelope::DecodedMessage,
        message: crate::queue::QueueMessage,
    );
}

/// Standard queues: every message proceeds concurrently
struct StandardDispatch;

impl Dispatch for StandardDispatch {
    fn capacity(&self, manager: &MessageManager) -> usize {
        manager.capacity()
    }

    fn dispatch(
        &self,
        manager: &Arc<MessageManager>,
        decoded: crate::envelope::DecodedMessage,
        message: crate::queue::QueueMessage,
    ) {
        // Reserve before spawning so the next capacity check already
        // counts this message
        manager.reserve_slot();
        let manager = Arc::clone(manager);
        tokio::spawn(async move {
            manager.process_reserved(decoded, message).await;
        });
    }
}

impl Dispatch for Arc<FifoScheduler> {
    fn capacity(&self, _manager: &MessageManager) -> usize {
        FifoScheduler::capacity(self)
    }

    fn dispatch(
        &self,
        _manager: &Arc<MessageManager>,
        decoded: crate::envelope::DecodedMessage,
        message: crate::queue::QueueMessage,
    ) {
        FifoScheduler::enqueue(self, decoded, message);
    }
}
