//! # Reconciler
//!
//! The background worker that closes the offline loop: it drains the
//! store's pending-change queue against the remote source once
//! connectivity returns.
//!
//! ## Drain Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Reconciler::run()                                │
//! │                                                                         │
//! │  every poll interval (or current backoff):                             │
//! │                                                                         │
//! │  1. Store offline? ──► skip the cycle                                  │
//! │  2. Fetch pending entries, FIFO by enqueued_at                         │
//! │  3. For each entry, in order:                                          │
//! │     • attempts ≥ max ──► warn + skip (left queued for the operator)    │
//! │     • remote.apply(entry)                                              │
//! │         ├── Accepted ───► mark_synced (entry removed, record synced)   │
//! │         ├── Superseded ─► last-writer-wins: adopt the remote copy      │
//! │         │                 locally (from_remote = true), mark_synced    │
//! │         └── Err ────────► mark_sync_failed + STOP THE BATCH            │
//! │                           (skipping ahead would break FIFO replay)     │
//! │  4. Clean cycle with progress ──► record last_sync                     │
//! │  5. Failures double the next delay (exponential backoff, capped);     │
//! │     a clean cycle resets it to the poll interval                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `flush_once` runs one cycle inline; tests use it for determinism and
//! callers can use it for a "sync now" button.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use almacen_store::{Collection, OfflineStore};

use crate::config::SyncSettings;
use crate::error::SyncResult;
use crate::remote::{RemoteDisposition, RemoteStore};

// =============================================================================
// Flush Report
// =============================================================================

/// What one drain cycle accomplished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Entries the remote accepted.
    pub replayed: usize,
    /// Entries resolved by adopting the newer remote copy.
    pub superseded: usize,
    /// Entries skipped for exceeding the retry budget.
    pub skipped: usize,
    /// Entries that failed this cycle (at most 1: the batch stops there).
    pub failed: usize,
}

impl FlushReport {
    /// Whether anything was confirmed against the remote.
    pub fn made_progress(&self) -> bool {
        self.replayed + self.superseded > 0
    }
}

// =============================================================================
// Reconciler
// =============================================================================

/// Handle for controlling a running reconciler.
#[derive(Clone)]
pub struct ReconcilerHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl ReconcilerHandle {
    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Replays the pending-change queue against the remote source.
pub struct Reconciler {
    store: Arc<OfflineStore>,
    remote: Arc<dyn RemoteStore>,
    settings: SyncSettings,
    shutdown_rx: mpsc::Receiver<()>,
}

impl Reconciler {
    /// Creates a reconciler and its control handle.
    pub fn new(
        store: Arc<OfflineStore>,
        remote: Arc<dyn RemoteStore>,
        settings: SyncSettings,
    ) -> (Self, ReconcilerHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        (
            Reconciler {
                store,
                remote,
                settings,
                shutdown_rx,
            },
            ReconcilerHandle { shutdown_tx },
        )
    }

    /// Creates the reconciler and spawns its loop as a background task.
    pub fn spawn(
        store: Arc<OfflineStore>,
        remote: Arc<dyn RemoteStore>,
        settings: SyncSettings,
    ) -> ReconcilerHandle {
        let (reconciler, handle) = Self::new(store, remote, settings);
        tokio::spawn(reconciler.run());
        handle
    }

    /// The worker loop. Runs until the handle signals shutdown.
    pub async fn run(mut self) {
        info!(
            poll_interval_secs = self.settings.poll_interval_secs,
            batch_size = self.settings.batch_size,
            "Reconciler starting"
        );

        let base = Duration::from_secs(self.settings.poll_interval_secs);
        let max_backoff = Duration::from_secs(self.settings.max_backoff_secs);
        let mut delay = base;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    match flush(&self.store, self.remote.as_ref(), &self.settings).await {
                        Ok(report) => {
                            if report.failed > 0 {
                                delay = next_backoff(delay, &self.settings, max_backoff);
                                warn!(?report, next_delay = ?delay, "Drain cycle hit a failure, backing off");
                            } else {
                                if report.made_progress() {
                                    info!(?report, "Drain cycle complete");
                                }
                                delay = base;
                            }
                        }
                        Err(e) => {
                            delay = next_backoff(delay, &self.settings, max_backoff);
                            error!(error = %e, next_delay = ?delay, "Drain cycle failed");
                        }
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Reconciler shutting down");
                    break;
                }
            }
        }

        info!("Reconciler stopped");
    }

    /// Runs exactly one drain cycle inline.
    pub async fn flush_once(&self) -> SyncResult<FlushReport> {
        flush(&self.store, self.remote.as_ref(), &self.settings).await
    }
}

fn next_backoff(current: Duration, settings: &SyncSettings, max: Duration) -> Duration {
    let initial = Duration::from_millis(settings.initial_backoff_ms);
    (current.max(initial) * 2).min(max)
}

// =============================================================================
// The Drain Cycle
// =============================================================================

/// One drain cycle: FIFO replay, LWW conflicts, stop-on-failure.
pub async fn flush(
    store: &OfflineStore,
    remote: &dyn RemoteStore,
    settings: &SyncSettings,
) -> SyncResult<FlushReport> {
    let mut report = FlushReport::default();

    if !store.is_online() {
        debug!("Store offline, skipping drain cycle");
        return Ok(report);
    }

    let entries = store.drain_sync_queue(settings.batch_size).await?;
    if entries.is_empty() {
        debug!("No pending sync entries");
        return Ok(report);
    }

    debug!(count = entries.len(), "Replaying pending entries");

    for entry in entries {
        if entry.attempts >= settings.max_retry_attempts {
            warn!(
                id = entry.id,
                collection = %entry.collection,
                key = %entry.key,
                attempts = entry.attempts,
                "Entry exceeded retry budget, skipping"
            );
            report.skipped += 1;
            continue;
        }

        match remote.apply(&entry).await {
            Ok(RemoteDisposition::Accepted) => {
                store.mark_synced(&entry).await?;
                report.replayed += 1;
            }
            Ok(RemoteDisposition::Superseded { data, written_at }) => {
                // The remote write is newer: adopt it locally.
                info!(
                    collection = %entry.collection,
                    key = %entry.key,
                    remote_written_at = %written_at,
                    "Local write superseded by newer remote copy"
                );
                let collection = parse_collection(&entry.collection);
                store.set(&collection, &entry.key, &data, true).await?;
                store.mark_synced(&entry).await?;
                report.superseded += 1;
            }
            Err(e) => {
                warn!(id = entry.id, error = %e, retryable = e.is_retryable(), "Replay failed");
                store.mark_sync_failed(entry.id, &e.to_string()).await?;
                report.failed += 1;
                // Skipping ahead would reorder the replay; stop here and
                // retry from this entry next cycle.
                break;
            }
        }
    }

    if report.failed == 0 && report.made_progress() {
        store.set_last_sync(Utc::now()).await?;
    }

    Ok(report)
}

/// Splits the flattened `<module_id>:<name>` storage key back into a
/// collection handle.
fn parse_collection(storage_key: &str) -> Collection {
    match storage_key.split_once(':') {
        Some((module, name)) => Collection::new(module, name),
        None => Collection::new("", storage_key),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemote;
    use almacen_store::StoreConfig;
    use serde_json::json;

    async fn offline_store_with_writes(keys: &[&str]) -> Arc<OfflineStore> {
        let store = Arc::new(OfflineStore::open(StoreConfig::fallback_only()).await);
        store.set_online(false);
        let col = Collection::new("inventory", "products");
        for (i, key) in keys.iter().enumerate() {
            store
                .set(&col, key, &json!({"name": key, "n": i}), false)
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_drain_replays_in_fifo_order() {
        let store = offline_store_with_writes(&["a", "b", "c"]).await;
        let remote = MemoryRemote::new();

        // Reconnect and drain.
        store.set_online(true);
        let report = flush(&store, &remote, &SyncSettings::default())
            .await
            .unwrap();

        assert_eq!(report.replayed, 3);
        assert_eq!(report.failed, 0);
        assert_eq!(store.pending_sync_count().await.unwrap(), 0);
        assert_eq!(remote.len(), 3);

        // Records are now confirmed and the sync clock advanced.
        let status = store.sync_status().await.unwrap();
        assert!(status.last_sync_at.is_some());
        let col = Collection::new("inventory", "products");
        let record = store
            .get_record::<serde_json::Value>(&col, "a")
            .await
            .unwrap()
            .unwrap();
        assert!(record.synced);
    }

    #[tokio::test]
    async fn test_offline_store_skips_cycle() {
        let store = offline_store_with_writes(&["a"]).await;
        let remote = MemoryRemote::new();

        // Still offline: nothing moves.
        let report = flush(&store, &remote, &SyncSettings::default())
            .await
            .unwrap();
        assert_eq!(report, FlushReport::default());
        assert_eq!(store.pending_sync_count().await.unwrap(), 1);
        assert!(remote.is_empty());
    }

    #[tokio::test]
    async fn test_failure_stops_batch_and_preserves_order() {
        let store = offline_store_with_writes(&["a", "b"]).await;
        let remote = MemoryRemote::new();
        remote.set_failing(true);

        store.set_online(true);
        let report = flush(&store, &remote, &SyncSettings::default())
            .await
            .unwrap();

        // First entry failed, second never attempted.
        assert_eq!(report.failed, 1);
        assert_eq!(report.replayed, 0);
        let pending = store.drain_sync_queue(10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(pending[1].attempts, 0);
        assert!(store.sync_status().await.unwrap().last_sync_at.is_none());

        // Outage over: the same order replays cleanly.
        remote.set_failing(false);
        let report = flush(&store, &remote, &SyncSettings::default())
            .await
            .unwrap();
        assert_eq!(report.replayed, 2);
        assert_eq!(store.pending_sync_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_newer_remote_copy_wins() {
        let store = offline_store_with_writes(&["a"]).await;
        let remote = MemoryRemote::new();
        let future = Utc::now() + chrono::Duration::hours(1);
        remote.seed("inventory:products", "a", json!({"name": "remote-a"}), future);

        store.set_online(true);
        let report = flush(&store, &remote, &SyncSettings::default())
            .await
            .unwrap();
        assert_eq!(report.superseded, 1);

        // The local replica adopted the remote copy, already confirmed.
        let col = Collection::new("inventory", "products");
        let record = store
            .get_record::<serde_json::Value>(&col, "a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.data["name"], "remote-a");
        assert!(record.synced);
        assert_eq!(store.pending_sync_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion_skips_entry() {
        let store = offline_store_with_writes(&["a"]).await;
        let remote = MemoryRemote::new();
        let settings = SyncSettings {
            max_retry_attempts: 2,
            ..SyncSettings::default()
        };

        store.set_online(true);
        remote.set_failing(true);
        for _ in 0..2 {
            flush(&store, &remote, &settings).await.unwrap();
        }

        // Budget exhausted: the entry is skipped, not retried.
        remote.set_failing(false);
        let report = flush(&store, &remote, &settings).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.replayed, 0);
        assert!(remote.is_empty());
        // It stays queued for operator attention.
        assert_eq!(store.pending_sync_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_spawned_reconciler_shuts_down() {
        let store = Arc::new(OfflineStore::open(StoreConfig::fallback_only()).await);
        let remote: Arc<dyn RemoteStore> = Arc::new(MemoryRemote::new());

        let handle = Reconciler::spawn(store, remote, SyncSettings::default());
        handle.shutdown().await;
        // Nothing to assert beyond "this returns": the loop exits on the
        // shutdown signal rather than sleeping forever.
    }

    #[tokio::test]
    async fn test_flush_once_via_reconciler() {
        let store = offline_store_with_writes(&["a"]).await;
        let remote: Arc<dyn RemoteStore> = Arc::new(MemoryRemote::new());
        let (reconciler, _handle) =
            Reconciler::new(store.clone(), remote, SyncSettings::default());

        store.set_online(true);
        let report = reconciler.flush_once().await.unwrap();
        assert_eq!(report.replayed, 1);
    }
}
