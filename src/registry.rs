// ABOUTME: Handler registration and type-erased invocation
// ABOUTME: Maps envelope type identifiers to typed handler capabilities

//! Handler registration and invocation.
//!
//! Applications implement [`MessageHandler`] for each message type they
//! consume and register it under the envelope `type` identifier. The
//! registry is populated at startup and read-only afterwards; resolution
//! hands the subscriber pipeline a type-erased mapping that already knows
//! how to deserialize its payload.

use crate::envelope::{MessageEnvelope, TransportMetadata};
use crate::error::{PostbusError, Result};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Outcome of a single handler invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerStatus {
    /// The message was processed and may be acknowledged
    Success,
    /// Processing failed; the message is left for queue redelivery
    Failed,
}

impl HandlerStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, HandlerStatus::Success)
    }
}

/// Per-invocation scope handed to a handler alongside its typed message.
///
/// Carries the envelope identity, the transport delivery details, and the
/// cancellation token that fires when the subscription shuts down. One
/// context is constructed per invocation and owned by the handler call.
#[derive(Debug, Clone)]
pub struct MessageContext {
    /// Envelope id of the message being handled
    pub message_id: String,
    /// Producer source URI
    pub source: String,
    /// Routing type identifier the handler was resolved from
    pub message_type: String,
    /// Publish timestamp
    pub time: DateTime<FixedOffset>,
    /// Envelope extension entries
    pub extensions: HashMap<String, Value>,
    /// Delivery details of the service the message arrived through
    pub transport: TransportMetadata,
    /// Fires when the subscription is shutting down
    pub cancellation: CancellationToken,
}

/// Handler capability for one message type.
///
/// Implementations must be idempotent: delivery is at-least-once and the
/// runtime never deduplicates.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// The typed payload this handler consumes
    type Message: DeserializeOwned + Send + 'static;

    /// Handle one message.
    ///
    /// Returning [`HandlerStatus::Failed`] leaves the message on the queue
    /// for redelivery after its visibility timeout lapses.
    async fn handle(&self, context: MessageContext, message: Self::Message) -> HandlerStatus;
}

/// Type-erased invocation seam between the registry and the subscriber pipeline
#[async_trait]
trait ErasedHandler: Send + Sync {
    async fn invoke(
        &self,
        envelope: &MessageEnvelope,
        metadata: TransportMetadata,
        cancellation: CancellationToken,
    ) -> HandlerStatus;
}

struct TypedHandler<H> {
    handler: H,
}

#[async_trait]
impl<H> ErasedHandler for TypedHandler<H>
where
    H: MessageHandler,
{
    async fn invoke(
        &self,
        envelope: &MessageEnvelope,
        metadata: TransportMetadata,
        cancellation: CancellationToken,
    ) -> HandlerStatus {
        let message: H::Message = match envelope.payload_as() {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(
                    message_id = %envelope.id,
                    message_type = %envelope.message_type,
                    error = %e,
                    "handler cannot accept the envelope payload shape"
                );
                return HandlerStatus::Failed;
            }
        };
        let context = MessageContext {
            message_id: envelope.id.clone(),
            source: envelope.source.clone(),
            message_type: envelope.message_type.clone(),
            time: envelope.time,
            extensions: envelope.extensions.clone(),
            transport: metadata,
            cancellation,
        };
        self.handler.handle(context, message).await
    }
}

/// Resolved mapping from a type identifier to its handler capability
#[derive(Clone)]
pub struct HandlerMapping {
    message_type: Arc<str>,
    handler: Arc<dyn ErasedHandler>,
}

impl HandlerMapping {
    /// The type identifier this mapping was registered under
    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    /// Invoke the handler with a per-invocation scope.
    ///
    /// Payload-shape mismatches are logged and reported as `Failed`; they
    /// never propagate out of the invocation.
    pub async fn invoke(
        &self,
        envelope: &MessageEnvelope,
        metadata: TransportMetadata,
        cancellation: CancellationToken,
    ) -> HandlerStatus {
        self.handler.invoke(envelope, metadata, cancellation).await
    }
}

impl std::fmt::Debug for HandlerMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerMapping")
            .field("message_type", &self.message_type)
            .finish_non_exhaustive()
    }
}

/// Registry of handler mappings, populated at startup and immutable after
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, HandlerMapping>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under a type identifier.
    ///
    /// Re-registering a type replaces the previous mapping; registration
    /// happens before any subscription starts, so no synchronization is
    /// needed here.
    pub fn register<H>(&mut self, type_identifier: impl Into<String>, handler: H)
    where
        H: MessageHandler,
    {
        let message_type: String = type_identifier.into();
        let mapping = HandlerMapping {
            message_type: Arc::from(message_type.as_str()),
            handler: Arc::new(TypedHandler { handler }),
        };
        self.handlers.insert(message_type, mapping);
    }

    /// Resolve the mapping for an envelope type identifier
    pub fn resolve(&self, message_type: &str) -> Result<HandlerMapping> {
        self.handlers.get(message_type).cloned().ok_or_else(|| {
            let mut registered = self.registered_types();
            registered.sort_unstable();
            tracing::error!(
                message_type,
                registered = ?registered,
                "no handler registered for message type"
            );
            PostbusError::unknown_type(format!(
                "'{}' is not registered (registered types: {})",
                message_type,
                registered.join(", ")
            ))
        })
    }

    /// Type identifiers currently registered
    pub fn registered_types(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("registered", &self.handlers.len())
            .finish()
    }
}
