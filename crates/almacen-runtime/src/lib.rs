//! # almacen-runtime: Event Bus + Module Lifecycle for Almacén POS
//!
//! The coordination layer of the platform: a synchronous, re-entrant
//! publish/subscribe bus with retained history, and the lifecycle runtime
//! every monetized module plugs into.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     almacen-runtime (THIS CRATE)                        │
//! │                                                                         │
//! │  ┌──────────────────┐   ┌──────────────────┐   ┌────────────────────┐  │
//! │  │    EventBus      │   │   ModuleHost     │   │     Platform       │  │
//! │  │    (bus.rs)      │   │   (module.rs)    │   │   (platform.rs)    │  │
//! │  │                  │   │                  │   │                    │  │
//! │  │ publish/subscribe│   │ lifecycle state  │   │ composition root:  │  │
//! │  │ bounded history  │◄──│ machine, module  │◄──│ one bus, one store │  │
//! │  │ EventInbox       │   │ events, license  │   │ dependency edges   │  │
//! │  └──────────────────┘   └──────────────────┘   └────────────────────┘  │
//! │                                                                         │
//! │  Modules built on this runtime: almacen-sale (pos-core),               │
//! │  almacen-inventory, almacen-customers. They communicate only through   │
//! │  published events - never by calling each other.                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`bus`] - `EventBus`, `EventInbox`, subscriptions, history
//! - [`events`] - canonical event names (the wire contract)
//! - [`module`] - `Module` trait, `ModuleHost` state machine, `ModuleStore`
//! - [`license`] - pure license token validation
//! - [`platform`] - composition root
//! - [`error`] - runtime error types

pub mod bus;
pub mod error;
pub mod events;
pub mod license;
pub mod module;
pub mod platform;

pub use bus::{BusConfig, EventBus, EventHandler, EventInbox, SubscriptionId};
pub use error::{RuntimeError, RuntimeResult};
pub use license::CORE_MODULE_ID;
pub use module::{Module, ModuleContext, ModuleHost, ModuleState, ModuleStore};
pub use platform::Platform;
