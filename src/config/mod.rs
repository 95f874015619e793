// ABOUTME: Configuration structures for subscriptions and serverless batch processing
// ABOUTME: All configuration is constructed programmatically and validated at startup

//! Configuration types for postbus.
//!
//! Configuration is passed by construction and immutable for the lifetime
//! of the component it configures; every struct validates itself before
//! the subscriber pipeline starts.

pub mod subscription;

#[cfg(feature = "serverless")]
pub mod serverless;

pub use subscription::{BackoffPolicy, SubscriptionConfig, SubscriptionConfigBuilder};

#[cfg(feature = "serverless")]
pub use serverless::{ServerlessConfig, ServerlessConfigBuilder};
