//! # Domain Types
//!
//! Core domain types used throughout Almacén POS.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────────┐   │
//! │  │    Product      │   │      Sale       │   │   PaymentRequest    │   │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────────  │   │
//! │  │  id (UUID)      │   │  id (UUID)      │   │  method             │   │
//! │  │  name           │   │  items          │   │  amount             │   │
//! │  │  price (Money)  │   │  status         │   │  customer_ref       │   │
//! │  │  tax_rate (bps) │   │  total (Money)  │   └─────────────────────┘   │
//! │  └─────────────────┘   └─────────────────┘                             │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────────┐   │
//! │  │   DomainEvent   │   │ModuleDescriptor │   │   PaymentOutcome    │   │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────────  │   │
//! │  │  type + source  │   │  id, deps,      │   │  Success {ref,..}   │   │
//! │  │  full payload   │   │  monthly_price  │   │  Failure {reason}   │   │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Event payloads carry full entities, never deltas, so subscribers never
//! need to re-fetch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::cart::CartItem;
use crate::money::Money;

// =============================================================================
// Tax Rate
// =============================================================================

/// Tax rate represented in basis points (bps).
///
/// ## Why Basis Points?
/// 1 basis point = 0.01% = 1/10000
/// 2100 bps = 21% (IVA general), 1050 bps = 10.5% (IVA reducido)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TaxRate(u32);

impl TaxRate {
    /// Creates a tax rate from basis points.
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    /// Creates a tax rate from a percentage (for convenience).
    pub fn from_percentage(pct: f64) -> Self {
        TaxRate((pct * 100.0).round() as u32)
    }

    /// Returns the rate in basis points.
    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Returns the rate as a percentage (for display only).
    #[inline]
    pub fn percentage(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Zero tax rate.
    #[inline]
    pub const fn zero() -> Self {
        TaxRate(0)
    }

    /// Checks if tax rate is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl Default for TaxRate {
    fn default() -> Self {
        TaxRate::zero()
    }
}

// =============================================================================
// Product
// =============================================================================

/// A product available for sale.
///
/// The cart freezes `price` and `tax_rate` into its line items at add time,
/// so later catalog edits never change an in-progress sale.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Display name shown to cashier and on receipt.
    pub name: String,

    /// Unit price.
    pub price: Money,

    /// Tax rate in basis points (2100 = 21%).
    pub tax_rate: TaxRate,

    /// Optional category for reporting.
    pub category: Option<String>,

    /// Barcode (EAN-13, UPC-A, etc.).
    pub barcode: Option<String>,

    /// Whether product is active (soft delete).
    pub is_active: bool,
}

// =============================================================================
// Sale Status
// =============================================================================

/// The status of a sale transaction.
///
/// State machine: `Pending → Completed | Cancelled`. A completed or
/// cancelled sale is immutable. Refunds are a separate, later operation
/// outside this core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    /// Sale is in progress (items being added).
    Pending,
    /// Sale has been paid and finalized.
    Completed,
    /// Sale was cancelled before payment.
    Cancelled,
}

impl Default for SaleStatus {
    fn default() -> Self {
        SaleStatus::Pending
    }
}

// =============================================================================
// Payment Method
// =============================================================================

/// Payment methods accepted at the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Physical cash payment (change given).
    Cash,
    /// Credit card through the simulated gateway.
    CreditCard,
    /// Debit card through the simulated gateway.
    DebitCard,
    /// Mobile wallet transfer.
    Wallet,
    /// Interoperable QR payment.
    Qr,
    /// Store credit ("fiado") - the customers module enforces the ceiling.
    AccountCredit,
    /// Multiple tenders. Falls back to the cash path in this version.
    Mixed,
}

// =============================================================================
// Sale
// =============================================================================

/// A sale transaction.
///
/// Created when a new transaction starts, mutated only by cart operations
/// while `Pending`, immutable once `Completed` or `Cancelled`.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Sale {
    pub id: String,
    pub items: Vec<CartItem>,
    pub subtotal: Money,
    pub tax: Money,
    pub discount: Money,
    pub total: Money,
    /// Set when the sale completes.
    pub payment_method: Option<PaymentMethod>,
    /// Customer reference for fiado / loyalty, when known.
    pub customer_ref: Option<String>,
    pub status: SaleStatus,
    /// Receipt reference, assigned at completion.
    pub receipt_number: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Sale {
    /// Creates a new empty pending sale.
    pub fn new(id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Sale {
            id: id.into(),
            items: Vec::new(),
            subtotal: Money::zero(),
            tax: Money::zero(),
            discount: Money::zero(),
            total: Money::zero(),
            payment_method: None,
            customer_ref: None,
            status: SaleStatus::Pending,
            receipt_number: None,
            created_at,
            completed_at: None,
        }
    }

    /// Whether the sale can still be mutated.
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.status == SaleStatus::Pending
    }
}

// =============================================================================
// Payment Request / Outcome
// =============================================================================

/// A payment attempt request, as received from the terminal boundary.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub method: PaymentMethod,
    /// Amount tendered. For cash this may exceed the sale total.
    pub amount: Money,
    /// Required for `AccountCredit`.
    pub customer_ref: Option<String>,
}

/// Why a payment attempt failed.
///
/// Settlement failures are values, never exceptions; the sale stays
/// `Pending` and checkout is retryable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, thiserror::Error)]
#[ts(export)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaymentFailure {
    /// Tendered amount was zero or negative.
    #[error("payment amount must be positive")]
    InvalidAmount,

    /// Cash tendered is less than the amount due.
    #[error("insufficient cash tendered: short {short}")]
    InsufficientTendered { short: Money },

    /// Non-cash tender must match the amount due exactly.
    #[error("tendered {tendered} does not match amount due {due}")]
    AmountMismatch { due: Money, tendered: Money },

    /// `AccountCredit` requires a customer reference.
    #[error("customer reference required for account credit")]
    MissingCustomerRef,

    /// The simulated gateway declined the payment.
    #[error("payment declined by gateway")]
    Declined,

    /// The settlement exchange did not answer within the timeout.
    #[error("payment attempt timed out")]
    TimedOut,
}

/// The result of a payment attempt.
///
/// Ephemeral: not persisted beyond being folded into the completed `Sale`
/// and the `payment.*` event payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PaymentOutcome {
    #[serde(rename_all = "camelCase")]
    Success {
        /// Settlement reference assigned by the engine.
        settlement_ref: String,
        /// Gateway authorization code, when the method has one.
        auth_code: Option<String>,
        /// Change due back to the customer (cash only).
        change: Option<Money>,
    },
    Failure { reason: PaymentFailure },
}

impl PaymentOutcome {
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, PaymentOutcome::Success { .. })
    }

    /// The failure reason, if this outcome is a failure.
    pub fn failure_reason(&self) -> Option<&PaymentFailure> {
        match self {
            PaymentOutcome::Failure { reason } => Some(reason),
            PaymentOutcome::Success { .. } => None,
        }
    }
}

// =============================================================================
// Domain Event
// =============================================================================

/// An event published on the bus.
///
/// Immutable once emitted. Created only by the event bus on publish;
/// retained in its bounded in-memory history for diagnostics. The history
/// is NOT an event-sourcing log and must not be relied upon for durability.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
    /// Unique event id (UUID v4).
    pub id: String,

    /// Event name, e.g. `sale.completed`. The canonical names live in
    /// `almacen_runtime::events`.
    pub event_type: String,

    /// Id of the module that published the event.
    pub source_module: String,

    /// Full entity payload (never a delta).
    #[ts(type = "unknown")]
    pub payload: serde_json::Value,

    #[ts(as = "String")]
    pub timestamp: DateTime<Utc>,

    /// Payload schema version, for forward compatibility.
    pub schema_version: u32,
}

// =============================================================================
// Module Descriptor
// =============================================================================

/// Declares a module's identity, pricing and dependency edges.
///
/// Never mutated after construction.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDescriptor {
    /// Module id, e.g. `pos-core`, `inventory`, `customers`.
    pub id: String,
    pub name: String,
    pub version: String,
    /// Ids of modules that must be registered before this one.
    pub dependencies: Vec<String>,
    /// Optional modules can be left uninstalled; the core cannot.
    pub optional: bool,
    /// Monthly subscription price.
    pub monthly_price: Money,
    pub trial_days: u32,
    pub description: String,
}

// =============================================================================
// Sales Stats
// =============================================================================

/// Read-only rollup over the local sales history.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SalesStats {
    pub count: u64,
    pub total_amount: Money,
    pub average_ticket: Money,
    pub window_days: u32,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tax_rate_from_bps() {
        let rate = TaxRate::from_bps(2100);
        assert_eq!(rate.bps(), 2100);
        assert!((rate.percentage() - 21.0).abs() < 0.001);
    }

    #[test]
    fn test_tax_rate_from_percentage() {
        let rate = TaxRate::from_percentage(10.5);
        assert_eq!(rate.bps(), 1050);
    }

    #[test]
    fn test_sale_starts_pending_and_empty() {
        let sale = Sale::new("sale-1", Utc::now());
        assert_eq!(sale.status, SaleStatus::Pending);
        assert!(sale.is_pending());
        assert!(sale.items.is_empty());
        assert!(sale.total.is_zero());
    }

    #[test]
    fn test_payment_outcome_accessors() {
        let ok = PaymentOutcome::Success {
            settlement_ref: "ref-1".into(),
            auth_code: None,
            change: Some(Money::from_cents(1450)),
        };
        assert!(ok.is_success());
        assert!(ok.failure_reason().is_none());

        let failed = PaymentOutcome::Failure {
            reason: PaymentFailure::Declined,
        };
        assert!(!failed.is_success());
        assert_eq!(failed.failure_reason(), Some(&PaymentFailure::Declined));
    }

    #[test]
    fn test_payment_method_serde_names() {
        // Event payloads are the wire contract between modules: the snake_case
        // names must stay stable.
        let json = serde_json::to_string(&PaymentMethod::AccountCredit).unwrap();
        assert_eq!(json, "\"account_credit\"");
        let back: PaymentMethod = serde_json::from_str(&json).unwrap();
        assert_eq!(back, PaymentMethod::AccountCredit);
    }
}
