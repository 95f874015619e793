// ABOUTME: In-flight lease bookkeeping for the message manager
// ABOUTME: Tracks receipt handles and expected visibility expiries for heartbeat scans

//! In-flight lease bookkeeping.
//!
//! One record exists per accepted message, from admission until ack or
//! release. The heartbeat loop scans for records close to their expected
//! visibility expiry; scans and refreshes tolerate records that a racing
//! completion already removed.

use crate::queue::BatchEntry;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Lease state of one in-flight message
#[derive(Debug, Clone)]
pub(crate) struct InFlightRecord {
    pub message_id: String,
    pub receipt_handle: String,
    /// When the current visibility lease is expected to lapse
    pub expires_at: Instant,
}

/// Store of in-flight records, keyed by a per-manager admission counter
#[derive(Debug, Default)]
pub(crate) struct LeaseTracker {
    records: Mutex<HashMap<u64, InFlightRecord>>,
    next_key: AtomicU64,
}

impl LeaseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, returning the key that removes or refreshes it
    pub fn insert(&self, record: InFlightRecord) -> u64 {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        self.records.lock().unwrap().insert(key, record);
        key
    }

    /// Remove a record; `None` when it was already gone
    pub fn remove(&self, key: u64) -> Option<InFlightRecord> {
        self.records.lock().unwrap().remove(&key)
    }

    /// Records whose expiry falls within `threshold` from now.
    ///
    /// Entry ids are the lease keys, so batch outcomes map back to records.
    pub fn due_for_extension(&self, threshold: Duration) -> Vec<BatchEntry> {
        let deadline = Instant::now() + threshold;
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, record)| record.expires_at <= deadline)
            .map(|(key, record)| {
                tracing::trace!(message_id = %record.message_id, "lease due for extension");
                BatchEntry {
                    id: key.to_string(),
                    receipt_handle: record.receipt_handle.clone(),
                }
            })
            .collect()
    }

    /// Refresh the expiry of the given keys; keys whose record disappeared
    /// between scan and refresh are skipped
    pub fn refresh(&self, keys: &[u64], new_expiry: Instant) {
        let mut records = self.records.lock().unwrap();
        for key in keys {
            if let Some(record) = records.get_mut(key) {
                record.expires_at = new_expiry;
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}
