//! # Validation Module
//!
//! Input validation for cart and payment boundaries.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Frontend (TypeScript, out of scope here)                     │
//! │  ├── Basic format checks, immediate user feedback                      │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE - business rule validation at the call boundary  │
//! │  ├── Rejected synchronously, never partially applied                   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Cart/sale state machine (state-conflict errors)              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::cart::CartItem;
use crate::error::ValidationError;
use crate::types::{PaymentMethod, PaymentRequest};
use crate::MAX_ITEM_QUANTITY;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Cart Item Validation
// =============================================================================

/// Validates a cart item before it enters the cart.
///
/// ## Rules
/// - `product_ref` and `name` must not be empty
/// - Unit price must not be negative (zero is allowed: free items)
/// - Quantity must be positive and within the per-line cap
/// - Tax rate must be at most 100% (10000 bps)
/// - Line discount must not be negative
pub fn validate_cart_item(item: &CartItem) -> ValidationResult<()> {
    if item.product_ref.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "product_ref".to_string(),
        });
    }

    if item.name.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "name".to_string(),
        });
    }

    if item.name.len() > 200 {
        return Err(ValidationError::TooLong {
            field: "name".to_string(),
            max: 200,
        });
    }

    if item.unit_price.is_negative() {
        return Err(ValidationError::MustNotBeNegative {
            field: "unit_price".to_string(),
        });
    }

    validate_quantity(item.quantity)?;

    if item.tax_rate.bps() > 10_000 {
        return Err(ValidationError::OutOfRange {
            field: "tax_rate".to_string(),
            min: 0,
            max: 10_000,
        });
    }

    if item.line_discount.is_negative() {
        return Err(ValidationError::MustNotBeNegative {
            field: "line_discount".to_string(),
        });
    }

    Ok(())
}

/// Validates a quantity value.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_ITEM_QUANTITY (999)
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_ITEM_QUANTITY,
        });
    }

    Ok(())
}

// =============================================================================
// Payment Validation
// =============================================================================

/// Validates a payment request at the checkout boundary.
///
/// ## Rules
/// - Amount must be positive
/// - `AccountCredit` requires a customer reference
///
/// Tender-vs-total reconciliation (short cash, card amount mismatch) is a
/// settlement concern and is reported by the payment engine as a
/// `PaymentOutcome::Failure`, not here.
pub fn validate_payment_request(request: &PaymentRequest) -> ValidationResult<()> {
    if !request.amount.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: "amount".to_string(),
        });
    }

    if request.method == PaymentMethod::AccountCredit {
        let has_customer = request
            .customer_ref
            .as_deref()
            .map(|c| !c.trim().is_empty())
            .unwrap_or(false);
        if !has_customer {
            return Err(ValidationError::Required {
                field: "customer_ref".to_string(),
            });
        }
    }

    Ok(())
}

// =============================================================================
// Identifier Validation
// =============================================================================

/// Validates a UUID string format.
pub fn validate_uuid(id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "id".to_string(),
        });
    }

    uuid::Uuid::parse_str(id).map_err(|_| ValidationError::InvalidFormat {
        field: "id".to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Money;
    use crate::types::{Product, TaxRate};

    fn item(qty: i64) -> CartItem {
        CartItem::from_product(
            &Product {
                id: "p1".into(),
                name: "Pan lactal".into(),
                price: Money::from_cents(85_000),
                tax_rate: TaxRate::from_bps(2100),
                category: None,
                barcode: None,
                is_active: true,
            },
            qty,
        )
    }

    #[test]
    fn test_valid_item_passes() {
        assert!(validate_cart_item(&item(3)).is_ok());
    }

    #[test]
    fn test_rejects_empty_product_ref() {
        let mut bad = item(1);
        bad.product_ref = "  ".into();
        assert!(validate_cart_item(&bad).is_err());
    }

    #[test]
    fn test_rejects_negative_price_and_discount() {
        let mut bad = item(1);
        bad.unit_price = Money::from_cents(-1);
        assert!(validate_cart_item(&bad).is_err());

        let mut bad = item(1);
        bad.line_discount = Money::from_cents(-1);
        assert!(validate_cart_item(&bad).is_err());
    }

    #[test]
    fn test_rejects_tax_over_100_percent() {
        let mut bad = item(1);
        bad.tax_rate = TaxRate::from_bps(10_001);
        assert!(validate_cart_item(&bad).is_err());
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(999).is_ok());
        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-1).is_err());
        assert!(validate_quantity(1000).is_err());
    }

    #[test]
    fn test_payment_request_rules() {
        let ok = PaymentRequest {
            method: PaymentMethod::Cash,
            amount: Money::from_cents(100),
            customer_ref: None,
        };
        assert!(validate_payment_request(&ok).is_ok());

        let zero = PaymentRequest {
            amount: Money::zero(),
            ..ok.clone()
        };
        assert!(validate_payment_request(&zero).is_err());

        let fiado_missing_customer = PaymentRequest {
            method: PaymentMethod::AccountCredit,
            amount: Money::from_cents(100),
            customer_ref: None,
        };
        assert!(validate_payment_request(&fiado_missing_customer).is_err());

        let fiado = PaymentRequest {
            customer_ref: Some("cust-1".into()),
            ..fiado_missing_customer
        };
        assert!(validate_payment_request(&fiado).is_ok());
    }

    #[test]
    fn test_validate_uuid() {
        assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(validate_uuid("").is_err());
        assert!(validate_uuid("not-a-uuid").is_err());
    }
}
