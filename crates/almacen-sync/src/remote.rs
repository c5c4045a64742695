//! # Remote Store Seam
//!
//! The boundary between this terminal's replica and the authoritative
//! remote source. The reconciler only needs one operation: apply a pending
//! change and learn whether it won or lost.
//!
//! A general-purpose distributed sync protocol is explicitly out of scope:
//! this is a single local replica reconciling against one remote, so the
//! trait is deliberately small.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use almacen_store::{SyncOperation, SyncQueueEntry};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Trait
// =============================================================================

/// What the remote decided about one replayed entry.
#[derive(Debug, Clone)]
pub enum RemoteDisposition {
    /// The local change was applied remotely.
    Accepted,

    /// The remote already holds a newer write for this key
    /// (last-writer-wins): the local replica should adopt it.
    Superseded {
        data: Value,
        written_at: DateTime<Utc>,
    },
}

/// The authoritative store the queue is replayed against.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Applies one pending change. Errors are categorized retryable or
    /// fatal via [`SyncError::is_retryable`].
    async fn apply(&self, entry: &SyncQueueEntry) -> SyncResult<RemoteDisposition>;
}

// =============================================================================
// In-Memory Reference Implementation
// =============================================================================

/// In-memory `RemoteStore`: the reference implementation used by tests and
/// by single-machine deployments that have no hub yet.
#[derive(Default)]
pub struct MemoryRemote {
    records: Mutex<HashMap<(String, String), (Value, DateTime<Utc>)>>,
    failing: Mutex<bool>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `apply` fail retryably (simulated outage).
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().expect("Remote mutex poisoned") = failing;
    }

    /// Seeds a remote-side record (for conflict tests).
    pub fn seed(&self, collection: &str, key: &str, data: Value, written_at: DateTime<Utc>) {
        self.records
            .lock()
            .expect("Remote mutex poisoned")
            .insert((collection.to_string(), key.to_string()), (data, written_at));
    }

    /// The remote copy of a record, if present.
    pub fn record(&self, collection: &str, key: &str) -> Option<Value> {
        self.records
            .lock()
            .expect("Remote mutex poisoned")
            .get(&(collection.to_string(), key.to_string()))
            .map(|(data, _)| data.clone())
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("Remote mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn apply(&self, entry: &SyncQueueEntry) -> SyncResult<RemoteDisposition> {
        if *self.failing.lock().expect("Remote mutex poisoned") {
            return Err(SyncError::remote_retryable("remote unreachable"));
        }

        let mut records = self.records.lock().expect("Remote mutex poisoned");
        let slot = (entry.collection.clone(), entry.key.clone());

        // Last-writer-wins on the write clock.
        if let Some((data, written_at)) = records.get(&slot) {
            if *written_at > entry.enqueued_at {
                return Ok(RemoteDisposition::Superseded {
                    data: data.clone(),
                    written_at: *written_at,
                });
            }
        }

        match entry.operation {
            SyncOperation::Create | SyncOperation::Update => {
                let payload = entry.payload.clone().ok_or_else(|| {
                    SyncError::remote_fatal(format!("entry {} has no payload", entry.id))
                })?;
                records.insert(slot, (payload, entry.enqueued_at));
            }
            SyncOperation::Delete => {
                records.remove(&slot);
            }
        }

        Ok(RemoteDisposition::Accepted)
    }
}
