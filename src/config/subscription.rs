// ABOUTME: Subscription configuration for the long-running queue poller
// ABOUTME: Provides defaults, a fluent builder, and fail-fast validation

//! Subscription configuration for the long-running poller.

use crate::constants::{defaults, limits};
use crate::error::{PostbusError, Result};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delay strategy the poller applies after transient failures and empty receives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// Retry immediately
    None,
    /// Double from a 100 ms base to a 10 s cap, resetting once messages arrive
    #[default]
    CappedExponential,
}

/// Immutable configuration of one queue subscription.
///
/// Constructed once, validated at startup, and shared by the poller,
/// manager, and heartbeat loop for the subscription's lifetime.
///
/// # Examples
///
/// ```rust
/// use postbus::config::SubscriptionConfig;
///
/// let config = SubscriptionConfig::builder("https://sqs.eu-west-1.amazonaws.com/123456789012/orders")
///     .with_max_concurrent_messages(4)
///     .with_visibility_timeout_seconds(45)
///     .build()
///     .expect("valid configuration");
/// assert!(!config.is_fifo());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Queue URL the subscription reads from
    pub endpoint: String,
    /// Maximum number of messages processed concurrently
    pub max_concurrent_messages: usize,
    /// Long-poll wait time in seconds (0-20, service-imposed ceiling)
    pub wait_time_seconds: u32,
    /// Visibility timeout in seconds applied to received messages
    pub visibility_timeout_seconds: u32,
    /// Seconds before expiry at which a lease becomes eligible for extension
    pub visibility_extension_threshold_seconds: u32,
    /// Interval in seconds between heartbeat scans
    pub visibility_heartbeat_interval_seconds: u32,
    /// Backoff strategy for transient failures and empty receives
    pub backoff_policy: BackoffPolicy,
}

impl SubscriptionConfig {
    /// Create a configuration with defaults for the given queue URL
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            max_concurrent_messages: defaults::MAX_CONCURRENT_MESSAGES,
            wait_time_seconds: defaults::WAIT_TIME_SECONDS,
            visibility_timeout_seconds: defaults::VISIBILITY_TIMEOUT_SECONDS,
            visibility_extension_threshold_seconds:
                defaults::VISIBILITY_EXTENSION_THRESHOLD_SECONDS,
            visibility_heartbeat_interval_seconds:
                defaults::VISIBILITY_HEARTBEAT_INTERVAL_SECONDS,
            backoff_policy: BackoffPolicy::default(),
        }
    }

    /// Get the fluent builder
    pub fn builder(endpoint: impl Into<String>) -> SubscriptionConfigBuilder {
        SubscriptionConfigBuilder {
            config: Self::new(endpoint),
        }
    }

    /// FIFO-ness is derived from the queue service's endpoint naming scheme
    pub fn is_fifo(&self) -> bool {
        self.endpoint.ends_with(".fifo")
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.visibility_timeout_seconds))
    }

    pub fn extension_threshold(&self) -> Duration {
        Duration::from_secs(u64::from(self.visibility_extension_threshold_seconds))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.visibility_heartbeat_interval_seconds))
    }

    /// Validate the configuration; the subscription never starts on failure
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(PostbusError::invalid_configuration(
                "endpoint must not be empty",
            ));
        }
        if self.max_concurrent_messages == 0 {
            return Err(PostbusError::invalid_configuration(
                "max_concurrent_messages must be greater than zero",
            ));
        }
        if self.wait_time_seconds > limits::WAIT_TIME_SECONDS_MAX {
            return Err(PostbusError::invalid_configuration(format!(
                "wait_time_seconds must be at most {}",
                limits::WAIT_TIME_SECONDS_MAX
            )));
        }
        if self.visibility_timeout_seconds == 0 {
            return Err(PostbusError::invalid_configuration(
                "visibility_timeout_seconds must be greater than zero",
            ));
        }
        if self.visibility_extension_threshold_seconds == 0 {
            return Err(PostbusError::invalid_configuration(
                "visibility_extension_threshold_seconds must be greater than zero",
            ));
        }
        if self.visibility_heartbeat_interval_seconds == 0 {
            return Err(PostbusError::invalid_configuration(
                "visibility_heartbeat_interval_seconds must be greater than zero",
            ));
        }
        if self.visibility_extension_threshold_seconds >= self.visibility_timeout_seconds {
            return Err(PostbusError::invalid_configuration(
                "visibility_extension_threshold_seconds must be below visibility_timeout_seconds",
            ));
        }
        Ok(())
    }
}

/// Builder for [`SubscriptionConfig`]
#[derive(Debug)]
pub struct SubscriptionConfigBuilder {
    config: SubscriptionConfig,
}

impl SubscriptionConfigBuilder {
    pub fn with_max_concurrent_messages(mut self, max: usize) -> Self {
        self.config.max_concurrent_messages = max;
        self
    }

    pub fn with_wait_time_seconds(mut self, seconds: u32) -> Self {
        self.config.wait_time_seconds = seconds;
        self
    }

    pub fn with_visibility_timeout_seconds(mut self, seconds: u32) -> Self {
        self.config.visibility_timeout_seconds = seconds;
        self
    }

    pub fn with_visibility_extension_threshold_seconds(mut self, seconds: u32) -> Self {
        self.config.visibility_extension_threshold_seconds = seconds;
        self
    }

    pub fn with_visibility_heartbeat_interval_seconds(mut self, seconds: u32) -> Self {
        self.config.visibility_heartbeat_interval_seconds = seconds;
        self
    }

    pub fn with_backoff_policy(mut self, policy: BackoffPolicy) -> Self {
        self.config.backoff_policy = policy;
        self
    }

    /// Build with validation
    pub fn build(self) -> Result<SubscriptionConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        // ACT
        let config = SubscriptionConfig::new("https://queue.example/1/orders");

        // ASSERT
        assert_eq!(config.max_concurrent_messages, 10);
        assert_eq!(config.wait_time_seconds, 20);
        assert_eq!(config.visibility_timeout_seconds, 30);
        assert_eq!(config.visibility_extension_threshold_seconds, 5);
        assert_eq!(config.visibility_heartbeat_interval_seconds, 1);
        assert_eq!(config.backoff_policy, BackoffPolicy::CappedExponential);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_fifo_derived_from_endpoint_suffix() {
        // ACT & ASSERT
        assert!(SubscriptionConfig::new("https://queue.example/1/orders.fifo").is_fifo());
        assert!(!SubscriptionConfig::new("https://queue.example/1/orders").is_fifo());
    }

    #[test]
    fn test_validation_rejects_out_of_range_values() {
        // ARRANGE & ACT & ASSERT
        assert!(SubscriptionConfig::builder("https://q/1/a")
            .with_max_concurrent_messages(0)
            .build()
            .is_err());
        assert!(SubscriptionConfig::builder("https://q/1/a")
            .with_wait_time_seconds(21)
            .build()
            .is_err());
        assert!(SubscriptionConfig::builder("https://q/1/a")
            .with_visibility_timeout_seconds(0)
            .build()
            .is_err());
        assert!(SubscriptionConfig::builder("https://q/1/a")
            .with_visibility_extension_threshold_seconds(30)
            .build()
            .is_err());
        assert!(SubscriptionConfig::builder("")
            .build()
            .is_err());
    }

    #[test]
    fn test_backoff_policy_serializes_snake_case() {
        // ACT
        let none = serde_json::to_string(&BackoffPolicy::None).unwrap();
        let capped = serde_json::to_string(&BackoffPolicy::CappedExponential).unwrap();

        // ASSERT
        assert_eq!(none, "\"none\"");
        assert_eq!(capped, "\"capped_exponential\"");
    }
}
