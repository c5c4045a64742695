//! # Sale Error Types
//!
//! The error taxonomy the terminal boundary sees.
//!
//! ## Error Taxonomy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Validation errors    - malformed item, bad amount, missing field.     │
//! │                         Rejected synchronously, never partially        │
//! │                         applied.                                       │
//! │                                                                         │
//! │  State-conflict errors - checkout on empty cart, no active sale,       │
//! │                         sale no longer pending. Rejected with a        │
//! │                         specific reason; cart and sale untouched.      │
//! │                                                                         │
//! │  Settlement errors    - NOT here. Gateway declines and timeouts are    │
//! │                         PaymentOutcome::Failure values, the sale       │
//! │                         stays Pending and checkout is retryable.       │
//! │                                                                         │
//! │  Persistence errors   - durable-store unavailability degrades inside   │
//! │                         the store; only real query failures surface.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use almacen_core::{CoreError, SaleStatus, ValidationError};
use almacen_store::StoreError;

/// Result type alias for sale operations.
pub type SaleResult<T> = Result<T, SaleError>;

/// Errors surfaced by the sale module boundary.
#[derive(Debug, Error)]
pub enum SaleError {
    /// There is no sale in progress.
    #[error("No active sale")]
    NoActiveSale,

    /// The current sale is not in a state that allows the operation.
    #[error("Sale {sale_id} is {status:?}, cannot {action}")]
    SaleNotPending {
        sale_id: String,
        status: SaleStatus,
        action: &'static str,
    },

    /// Checkout requires a non-empty cart.
    #[error("Cannot checkout an empty cart")]
    EmptyCart,

    /// Input validation failed at the call boundary.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Cart business rule violation.
    #[error(transparent)]
    Cart(#[from] CoreError),

    /// Persistence failure.
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// Payload (de)serialization failure.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SaleError {
    /// Whether this is a state-conflict rejection (as opposed to bad input
    /// or an infrastructure failure).
    pub fn is_state_conflict(&self) -> bool {
        matches!(
            self,
            SaleError::NoActiveSale | SaleError::SaleNotPending { .. } | SaleError::EmptyCart
        )
    }
}
