// ABOUTME: Subscriber runtime - poller, manager, lease tracking, and FIFO scheduling
// ABOUTME: The long-running pipeline that fetches, dispatches, heartbeats, and acknowledges

//! Subscriber runtime.
//!
//! The pipeline: the [`QueuePoller`] fetches messages respecting free
//! capacity, the codec decodes them, and the [`MessageManager`] runs each
//! handler while heartbeating its visibility lease, acknowledging on
//! success and leaving failures visible for redelivery. FIFO endpoints add
//! per-group serialization on top of the same manager.

pub mod manager;
pub mod poller;

pub(crate) mod fifo;
pub(crate) mod lease;

pub use manager::{ManagerOptions, MessageManager};
pub use poller::QueuePoller;
