// ABOUTME: Main library entry point for the postbus runtime
// ABOUTME: Typed envelope messaging over managed queue, topic, and event-bus services

//! # Postbus
//!
//! A library for publishing typed domain messages to, and consuming them
//! from, managed messaging services using a vendor-neutral envelope format.
//! Applications register one handler per message type; the subscriber
//! runtime fetches deliveries, decodes the envelope (including messages
//! tunneled through the topic and event-bus services), dispatches with
//! bounded concurrency, keeps visibility leases alive while handlers run,
//! and acknowledges on success.
//!
//! ## Features
//!
//! - **Envelope Pattern**: One JSON wrapper carries the payload and routing
//!   metadata across all three services
//! - **Subscriber Runtime**: Long-running poller with lease heartbeating,
//!   capacity gating, and transient-error backoff
//! - **FIFO Ordering**: Strict per-group serialization with parallel groups
//! - **Serverless Entry**: Host-delivered batches drive the same pipeline,
//!   optionally reporting partial failures
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use postbus::prelude::*;
//! use async_trait::async_trait;
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct ChatMessage { text: String }
//!
//! struct ChatHandler;
//!
//! #[async_trait]
//! impl MessageHandler for ChatHandler {
//!     type Message = ChatMessage;
//!
//!     async fn handle(&self, _context: MessageContext, message: ChatMessage) -> HandlerStatus {
//!         println!("{}", message.text);
//!         HandlerStatus::Success
//!     }
//! }
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register("chat.message", ChatHandler);
//!
//! let config = SubscriptionConfig::builder("https://sqs.eu-west-1.amazonaws.com/123456789012/chat")
//!     .with_max_concurrent_messages(4)
//!     .build()?;
//! let poller = QueuePoller::new(transport, registry.into(), config)?;
//! poller.run().await?;
//! ```
//!
//! Handlers must be idempotent: delivery is at-least-once and the runtime
//! never deduplicates.

// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::config::{BackoffPolicy, SubscriptionConfig, SubscriptionConfigBuilder};
    pub use crate::envelope::{
        CodecHook, DecodedMessage, EnvelopeBuilder, EnvelopeCodec, MessageEnvelope,
        TransportMetadata,
    };
    pub use crate::error::{PostbusError, Result};
    pub use crate::queue::{QueueClient, QueueMessage, QueueTransport};
    pub use crate::registry::{
        HandlerMapping, HandlerRegistry, HandlerStatus, MessageContext, MessageHandler,
    };
    pub use crate::subscriber::{ManagerOptions, MessageManager, QueuePoller};

    #[cfg(feature = "serverless")]
    pub use crate::config::{ServerlessConfig, ServerlessConfigBuilder};

    #[cfg(feature = "serverless")]
    pub use crate::serverless::{BatchResponse, ServerlessBatch, ServerlessProcessor};
}

// Core modules (always available)
pub mod config;
pub mod constants;
pub mod envelope;
pub mod error;
pub mod queue;
pub mod registry;
pub mod subscriber;

// Serverless entry adapter
#[cfg(feature = "serverless")]
pub mod serverless;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
