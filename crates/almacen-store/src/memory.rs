//! # In-Memory Fallback Backend
//!
//! When the durable SQLite store cannot be opened (missing directory,
//! permissions, corrupted file), the offline store silently degrades to this
//! backend: a plain map mirrored into a flat JSON snapshot file after every
//! mutation, so a restart still recovers the data the terminal sold against.
//!
//! ## Degradation Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  OfflineStore::open(config)                                             │
//! │       │                                                                 │
//! │       ├── SQLite pool + migrations OK ──► Durable backend (WAL)        │
//! │       │                                                                 │
//! │       └── Any failure ──► warn! + MemoryBackend                        │
//! │                               │                                         │
//! │                               ├── load snapshot file (if present)      │
//! │                               └── mirror every mutation back to it     │
//! │                                                                         │
//! │  Snapshot write failures are logged, never surfaced: losing the        │
//! │  mirror is strictly better than failing the sale.                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::record::{StoredRecord, SyncOperation, SyncQueueEntry};

/// Everything the fallback holds, in snapshot-serializable form.
#[derive(Debug, Default, Serialize, Deserialize)]
struct MemoryInner {
    /// collection storage key → (record key → record)
    records: HashMap<String, BTreeMap<String, StoredRecord<Value>>>,
    queue: Vec<SyncQueueEntry>,
    next_queue_id: i64,
}

/// In-memory store mirrored to an optional JSON snapshot file.
#[derive(Debug)]
pub struct MemoryBackend {
    inner: Mutex<MemoryInner>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryBackend {
    /// Creates the backend, loading a previous snapshot when one exists.
    pub fn new(snapshot_path: Option<PathBuf>) -> Self {
        let inner = snapshot_path
            .as_ref()
            .and_then(|path| match std::fs::read_to_string(path) {
                Ok(raw) => match serde_json::from_str::<MemoryInner>(&raw) {
                    Ok(inner) => {
                        debug!(path = %path.display(), "Loaded fallback snapshot");
                        Some(inner)
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Fallback snapshot unreadable, starting empty");
                        None
                    }
                },
                Err(_) => None,
            })
            .unwrap_or_else(|| MemoryInner {
                next_queue_id: 1,
                ..MemoryInner::default()
            });

        let inner = if inner.next_queue_id == 0 {
            MemoryInner {
                next_queue_id: 1,
                ..inner
            }
        } else {
            inner
        };

        MemoryBackend {
            inner: Mutex::new(inner),
            snapshot_path,
        }
    }

    /// Best-effort mirror to the snapshot file. Failures are logged only.
    fn persist(&self, inner: &MemoryInner) {
        let Some(path) = &self.snapshot_path else {
            return;
        };
        match serde_json::to_string(inner) {
            Ok(raw) => {
                if let Err(e) = std::fs::write(path, raw) {
                    warn!(path = %path.display(), error = %e, "Failed to write fallback snapshot");
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialize fallback snapshot"),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().expect("Memory backend mutex poisoned")
    }

    pub fn set(&self, collection: &str, record: StoredRecord<Value>) {
        let mut inner = self.lock();
        inner
            .records
            .entry(collection.to_string())
            .or_default()
            .insert(record.key.clone(), record);
        self.persist(&inner);
    }

    pub fn get(&self, collection: &str, key: &str) -> Option<StoredRecord<Value>> {
        self.lock()
            .records
            .get(collection)
            .and_then(|m| m.get(key))
            .cloned()
    }

    pub fn get_all(&self, collection: &str) -> Vec<StoredRecord<Value>> {
        self.lock()
            .records
            .get(collection)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Removes a record; returns whether it existed.
    pub fn delete(&self, collection: &str, key: &str) -> bool {
        let mut inner = self.lock();
        let existed = inner
            .records
            .get_mut(collection)
            .map(|m| m.remove(key).is_some())
            .unwrap_or(false);
        if existed {
            self.persist(&inner);
        }
        existed
    }

    pub fn contains(&self, collection: &str, key: &str) -> bool {
        self.lock()
            .records
            .get(collection)
            .map(|m| m.contains_key(key))
            .unwrap_or(false)
    }

    pub fn enqueue(
        &self,
        operation: SyncOperation,
        collection: &str,
        key: &str,
        payload: Option<Value>,
    ) -> SyncQueueEntry {
        let mut inner = self.lock();
        let entry = SyncQueueEntry {
            id: inner.next_queue_id,
            operation,
            collection: collection.to_string(),
            key: key.to_string(),
            payload,
            enqueued_at: Utc::now(),
            attempts: 0,
            last_error: None,
        };
        inner.next_queue_id += 1;
        inner.queue.push(entry.clone());
        self.persist(&inner);
        entry
    }

    /// Pending entries in FIFO order, up to `limit`.
    pub fn pending(&self, limit: usize) -> Vec<SyncQueueEntry> {
        let inner = self.lock();
        let mut entries = inner.queue.clone();
        entries.sort_by(|a, b| {
            a.enqueued_at
                .cmp(&b.enqueued_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        entries.truncate(limit);
        entries
    }

    pub fn queue_len(&self) -> i64 {
        self.lock().queue.len() as i64
    }

    /// Removes a queue entry and flips the matching record to synced.
    pub fn mark_synced(&self, entry: &SyncQueueEntry) -> StoreResult<()> {
        let mut inner = self.lock();
        let pos = inner
            .queue
            .iter()
            .position(|e| e.id == entry.id)
            .ok_or(StoreError::QueueEntryNotFound(entry.id))?;
        inner.queue.remove(pos);

        if entry.operation != SyncOperation::Delete {
            if let Some(record) = inner
                .records
                .get_mut(&entry.collection)
                .and_then(|m| m.get_mut(&entry.key))
            {
                record.synced = true;
            }
        }

        self.persist(&inner);
        Ok(())
    }

    pub fn mark_failed(&self, entry_id: i64, error: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        let entry = inner
            .queue
            .iter_mut()
            .find(|e| e.id == entry_id)
            .ok_or(StoreError::QueueEntryNotFound(entry_id))?;
        entry.attempts += 1;
        entry.last_error = Some(error.to_string());
        self.persist(&inner);
        Ok(())
    }
}
