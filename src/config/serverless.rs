// ABOUTME: Configuration for the serverless entry adapter
// ABOUTME: Controls deletion, batch-response reporting, and failure visibility handling

//! Configuration for the serverless entry adapter.

use crate::constants::defaults;
use crate::error::{PostbusError, Result};

use serde::{Deserialize, Serialize};

/// Configuration of one serverless batch invocation.
///
/// `delete_on_success` defaults to false because the host deletes the batch
/// itself when the invocation succeeds; enabling it makes sense together
/// with `use_batch_response`, where the host deletes only unreported
/// messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerlessConfig {
    /// Maximum number of messages processed concurrently within the batch
    pub max_concurrent_messages: usize,
    /// Delete each message as soon as its handler succeeds
    pub delete_on_success: bool,
    /// Return a partial-failure report naming messages that did not succeed
    pub use_batch_response: bool,
    /// When set, failed messages get this visibility timeout before returning
    pub visibility_timeout_for_batch_failures: Option<u32>,
}

impl Default for ServerlessConfig {
    fn default() -> Self {
        Self {
            max_concurrent_messages: defaults::MAX_CONCURRENT_MESSAGES,
            delete_on_success: false,
            use_batch_response: false,
            visibility_timeout_for_batch_failures: None,
        }
    }
}

impl ServerlessConfig {
    /// Get the fluent builder
    pub fn builder() -> ServerlessConfigBuilder {
        ServerlessConfigBuilder {
            config: Self::default(),
        }
    }

    /// Validate the configuration; the batch is never processed on failure
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_messages == 0 {
            return Err(PostbusError::invalid_configuration(
                "max_concurrent_messages must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Builder for [`ServerlessConfig`]
#[derive(Debug, Default)]
pub struct ServerlessConfigBuilder {
    config: ServerlessConfig,
}

impl ServerlessConfigBuilder {
    pub fn with_max_concurrent_messages(mut self, max: usize) -> Self {
        self.config.max_concurrent_messages = max;
        self
    }

    pub fn with_delete_on_success(mut self, delete: bool) -> Self {
        self.config.delete_on_success = delete;
        self
    }

    pub fn with_batch_response(mut self, use_batch_response: bool) -> Self {
        self.config.use_batch_response = use_batch_response;
        self
    }

    pub fn with_visibility_timeout_for_batch_failures(mut self, seconds: u32) -> Self {
        self.config.visibility_timeout_for_batch_failures = Some(seconds);
        self
    }

    /// Build with validation
    pub fn build(self) -> Result<ServerlessConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
