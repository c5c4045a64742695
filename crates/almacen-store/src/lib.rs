//! # almacen-store: Offline-First Persistence for Almacén POS
//!
//! Gives every other component a uniform `get/set/get_all/delete` API per
//! named collection, regardless of whether a durable store is available in
//! the runtime environment, plus the process-wide pending-change queue that
//! makes offline selling safe.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Almacén POS Data Flow                              │
//! │                                                                         │
//! │  Module code (sale, inventory, customers)                               │
//! │       │  namespaced collections: (module_id, collection_name)           │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  almacen-store (THIS CRATE)                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │ OfflineStore  │    │ StoredRecord  │    │  Sync queue  │  │   │
//! │  │   │ (store.rs)    │    │ envelopes     │    │  (FIFO)      │  │   │
//! │  │   └───────┬───────┘    └───────────────┘    └──────────────┘  │   │
//! │  │           │                                                     │   │
//! │  │     ┌─────┴──────┐                                             │   │
//! │  │     ▼            ▼                                             │   │
//! │  │  SQLite (WAL)  in-memory map + JSON snapshot                   │   │
//! │  │  (durable)     (fallback, silent degradation)                  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       ▲                                                                 │
//! │       │ drains the queue, FIFO, last-writer-wins                        │
//! │  almacen-sync reconciler                                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`store`] - `OfflineStore`, `StoreConfig`, backend selection
//! - [`record`] - `StoredRecord`, `Collection`, sync queue types
//! - [`memory`] - in-memory fallback backend
//! - [`migrations`] - embedded SQL migrations for the durable backend
//! - [`error`] - store error types

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod memory;
pub mod migrations;
pub mod record;
pub mod store;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{StoreError, StoreResult};
pub use record::{Collection, StoredRecord, SyncOperation, SyncQueueEntry, SyncStatus};
pub use store::{OfflineStore, StoreConfig};
