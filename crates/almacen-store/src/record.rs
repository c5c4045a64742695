//! # Record Envelope and Sync Queue Types
//!
//! Every persisted value is wrapped in a [`StoredRecord`]; every local write
//! made while disconnected produces a [`SyncQueueEntry`]. These are the two
//! halves of the offline contract: the record says what the local replica
//! believes, the queue says what the remote source has not confirmed yet.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Collection
// =============================================================================

/// A typed, namespaced collection identifier: (module id, collection name).
///
/// Modules never collide because every collection carries its owner's id.
/// The storage key is rendered as `<module_id>:<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Collection {
    pub module: String,
    pub name: String,
}

impl Collection {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Collection {
            module: module.into(),
            name: name.into(),
        }
    }

    /// The flattened `<module_id>:<name>` form used by both backends.
    pub fn storage_key(&self) -> String {
        format!("{}:{}", self.module, self.name)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.name)
    }
}

// =============================================================================
// Stored Record
// =============================================================================

/// Wrapper around every persisted entity.
///
/// `synced == false` means this local write has not yet been confirmed
/// against the remote source. `written_at` is the last-writer-wins clock
/// used during reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord<T> {
    pub data: T,
    pub written_at: DateTime<Utc>,
    pub synced: bool,
    pub key: String,
}

impl<T> StoredRecord<T> {
    /// Age of this record relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.written_at
    }
}

// =============================================================================
// Sync Queue
// =============================================================================

/// The kind of pending change awaiting upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    Create,
    Update,
    Delete,
}

impl SyncOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOperation::Create => "create",
            SyncOperation::Update => "update",
            SyncOperation::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(SyncOperation::Create),
            "update" => Some(SyncOperation::Update),
            "delete" => Some(SyncOperation::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One not-yet-confirmed local write.
///
/// Ordering is FIFO by `enqueued_at` (ties broken by `id`) and must be
/// preserved on replay. `attempts`/`last_error` track upload retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueEntry {
    pub id: i64,
    pub operation: SyncOperation,
    /// Flattened `<module_id>:<name>` collection key.
    pub collection: String,
    pub key: String,
    /// The full record payload; `None` for deletes.
    pub payload: Option<serde_json::Value>,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: i64,
    pub last_error: Option<String>,
}

// =============================================================================
// Sync Status
// =============================================================================

/// Snapshot of the store's sync state, for status surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub online: bool,
    pub pending_count: i64,
    pub last_sync_at: Option<DateTime<Utc>>,
}
