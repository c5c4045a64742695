//! # almacen-sale: The Core Sales Module for Almacén POS
//!
//! The `pos-core` module: the cart/sale/payment engine driving the event
//! bus and the offline store under real business invariants (money, totals,
//! tender reconciliation).
//!
//! ## Data Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Terminal UI (out of scope)                                             │
//! │       │  start_sale / add_product / checkout / cancel_sale              │
//! │       ▼                                                                 │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                   SaleModule (module.rs)                         │  │
//! │  │                                                                  │  │
//! │  │   ┌────────────────┐          ┌────────────────┐                │  │
//! │  │   │  CartEngine    │          │ PaymentEngine  │                │  │
//! │  │   │ (cart_engine)  │          │  (payment.rs)  │                │  │
//! │  │   │                │          │                │                │  │
//! │  │   │ persists every │          │ per-method     │                │  │
//! │  │   │ mutation       │          │ settlement sim │                │  │
//! │  │   └───────┬────────┘          └───────┬────────┘                │  │
//! │  └───────────┼───────────────────────────┼─────────────────────────┘  │
//! │              ▼                           ▼                             │
//! │        almacen-store               event bus: sale.* / payment.*       │
//! │        (cart snapshot,             (inventory and customers modules    │
//! │         sales history,              react asynchronously)              │
//! │         sync queue)                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod cart_engine;
pub mod error;
pub mod module;
pub mod payment;

pub use cart_engine::{CartEngine, CartPolicy};
pub use error::{SaleError, SaleResult};
pub use module::{CartStateView, SaleConfig, SaleModule, SaleSettings};
pub use payment::{PaymentConfig, PaymentEngine};
