// ABOUTME: Constants and default values for the postbus library
// ABOUTME: Centralizes subscription defaults, queue service limits, and backoff tuning

//! Constants and default values for postbus.
//!
//! This module centralizes all hard-coded values so configuration defaults
//! and service limits live in one place instead of being scattered through
//! the subscriber pipeline.

use std::time::Duration;

/// Default subscription values
pub mod defaults {
    /// Default maximum number of messages processed concurrently per subscription
    pub const MAX_CONCURRENT_MESSAGES: usize = 10;

    /// Default long-poll wait time in seconds
    pub const WAIT_TIME_SECONDS: u32 = 20;

    /// Default visibility timeout in seconds applied to received messages
    pub const VISIBILITY_TIMEOUT_SECONDS: u32 = 30;

    /// Default threshold in seconds before expiry at which a lease is extended
    pub const VISIBILITY_EXTENSION_THRESHOLD_SECONDS: u32 = 5;

    /// Default interval in seconds between heartbeat scans of in-flight leases
    pub const VISIBILITY_HEARTBEAT_INTERVAL_SECONDS: u32 = 1;

    /// Default media type for structured envelope payloads
    pub const DATA_CONTENT_TYPE: &str = "application/json";

    /// Spec version written into every envelope
    pub const SPEC_VERSION: &str = "1.0";
}

/// Queue service limits
pub mod limits {
    use super::*;

    /// Maximum number of messages a single receive call may request
    pub const RECEIVE_BATCH_MAX: usize = 10;

    /// Maximum number of entries per delete or change-visibility batch call
    pub const BATCH_ENTRY_MAX: usize = 10;

    /// Upper bound the queue service imposes on long-poll wait time
    pub const WAIT_TIME_SECONDS_MAX: u32 = 20;

    /// Ceiling on a single wait-for-capacity block
    pub const WAIT_FOR_CAPACITY_MAX: Duration = Duration::from_secs(60);
}

/// Capped-exponential backoff tuning for the poller
pub mod backoff {
    use super::*;

    /// First delay after a transient failure or empty receive
    pub const BASE_DELAY: Duration = Duration::from_millis(100);

    /// Delay ceiling; doubling stops here
    pub const MAX_DELAY: Duration = Duration::from_secs(10);
}

/// Queue service error codes with special classification
pub mod error_codes {
    /// Receive target URL does not name a queue
    pub const INVALID_ADDRESS: &str = "InvalidAddress";

    /// Caller lacks permission on the queue
    pub const ACCESS_DENIED: &str = "AccessDenied";
}
