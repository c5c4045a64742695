//! # almacen-sync: Sync Queue Reconciliation for Almacén POS
//!
//! The upload half of the offline-first story. The store only *collects*
//! pending changes; this crate is the worker that actually replays them
//! against the authoritative remote source.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      almacen-sync (THIS CRATE)                          │
//! │                                                                         │
//! │  ┌─────────────┐      ┌──────────────────┐      ┌──────────────────┐   │
//! │  │ SyncSettings│      │   Reconciler     │      │   RemoteStore    │   │
//! │  │ (config.rs) │─────►│ (reconciler.rs)  │─────►│   (remote.rs)    │   │
//! │  │             │      │                  │      │                  │   │
//! │  │ TOML file   │      │ FIFO replay      │      │ trait seam +     │   │
//! │  │ + defaults  │      │ LWW conflicts    │      │ MemoryRemote     │   │
//! │  │             │      │ retry + backoff  │      │ reference impl   │   │
//! │  └─────────────┘      └────────┬─────────┘      └──────────────────┘   │
//! │                                │                                        │
//! │                                ▼                                        │
//! │                  almacen-store sync queue                               │
//! │            (drain_sync_queue / mark_synced / mark_sync_failed)          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`reconciler`] - the drain worker and its control handle
//! - [`remote`] - the `RemoteStore` trait and in-memory reference impl
//! - [`config`] - TOML-loadable settings
//! - [`error`] - sync error types with retry categorization

pub mod config;
pub mod error;
pub mod reconciler;
pub mod remote;

pub use config::SyncSettings;
pub use error::{SyncError, SyncResult};
pub use reconciler::{flush, FlushReport, Reconciler, ReconcilerHandle};
pub use remote::{MemoryRemote, RemoteDisposition, RemoteStore};
