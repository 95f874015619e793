// ABOUTME: Error types and handling for the postbus library
// ABOUTME: Provides the crate-wide error enum covering codec, handler, and queue failures

//! Error types and utilities for postbus.
//!
//! This module provides a single error type covering every failure the
//! library surfaces to callers, from envelope parsing and handler routing
//! to queue service errors and configuration validation.

use thiserror::Error;

/// Result type alias for postbus operations
pub type Result<T> = std::result::Result<T, PostbusError>;

/// Comprehensive error type for all postbus operations
#[derive(Debug, Error, Clone)]
pub enum PostbusError {
    /// Envelope is missing required fields or is not valid envelope JSON
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Envelope `type` does not resolve to a registered handler
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// Envelope serialization/deserialization or hook failure
    #[error("codec failure: {0}")]
    CodecFailure(String),

    /// No handler registered for the requested type identifier
    #[error("handler not registered: {0}")]
    HandlerNotRegistered(String),

    /// Registered handler cannot accept the envelope payload shape
    #[error("handler signature invalid: {0}")]
    HandlerSignatureInvalid(String),

    /// Queue service error the caller must stop on (bad address, access denied)
    #[error("fatal queue error [{code}]: {message}")]
    FatalQueueError { code: String, message: String },

    /// Queue service error that is retried with backoff
    #[error("transient queue error: {0}")]
    TransientQueueError(String),

    /// Message carries no receipt handle, so it cannot be deleted or extended
    #[error("missing receipt handle: {0}")]
    MissingReceiptHandle(String),

    /// Configuration validation failure detected at startup
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Processing was interrupted by cancellation
    #[error("cancelled during processing: {0}")]
    CancelledDuringProcessing(String),
}

impl PostbusError {
    /// Create a new malformed envelope error
    pub fn malformed_envelope(msg: impl Into<String>) -> Self {
        Self::MalformedEnvelope(msg.into())
    }

    /// Create a new unknown type error
    pub fn unknown_type(msg: impl Into<String>) -> Self {
        Self::UnknownType(msg.into())
    }

    /// Create a new codec failure
    pub fn codec(msg: impl Into<String>) -> Self {
        Self::CodecFailure(msg.into())
    }

    /// Create a new handler not registered error
    pub fn handler_not_registered(msg: impl Into<String>) -> Self {
        Self::HandlerNotRegistered(msg.into())
    }

    /// Create a new handler signature error
    pub fn handler_signature(msg: impl Into<String>) -> Self {
        Self::HandlerSignatureInvalid(msg.into())
    }

    /// Create a new fatal queue error with its service error code
    pub fn fatal_queue(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FatalQueueError {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a new transient queue error
    pub fn transient_queue(msg: impl Into<String>) -> Self {
        Self::TransientQueueError(msg.into())
    }

    /// Create a new missing receipt handle error
    pub fn missing_receipt_handle(msg: impl Into<String>) -> Self {
        Self::MissingReceiptHandle(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create a new cancellation error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::CancelledDuringProcessing(msg.into())
    }

    /// True when the error means the poller must terminate
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalQueueError { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructor_helpers_produce_matching_variants() {
        // ARRANGE & ACT: Build one error per constructor
        let malformed = PostbusError::malformed_envelope("no id");
        let unknown = PostbusError::unknown_type("Orders.Created");
        let fatal = PostbusError::fatal_queue("AccessDenied", "not allowed");
        let config = PostbusError::invalid_configuration("wait time out of range");

        // ASSERT: Variants and display strings line up
        assert!(matches!(malformed, PostbusError::MalformedEnvelope(_)));
        assert!(matches!(unknown, PostbusError::UnknownType(_)));
        assert!(matches!(fatal, PostbusError::FatalQueueError { .. }));
        assert!(matches!(config, PostbusError::InvalidConfiguration(_)));
        assert!(fatal.to_string().contains("AccessDenied"));
    }

    #[test]
    fn test_only_fatal_queue_errors_are_fatal() {
        // ARRANGE
        let fatal = PostbusError::fatal_queue("InvalidAddress", "bad queue url");
        let transient = PostbusError::transient_queue("throttled");
        let codec = PostbusError::codec("hook rejected payload");

        // ASSERT
        assert!(fatal.is_fatal());
        assert!(!transient.is_fatal());
        assert!(!codec.is_fatal());
    }
}
