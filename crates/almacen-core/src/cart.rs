//! # Cart Math
//!
//! Pure cart state and totals. Persistence lives in `almacen-sale`'s cart
//! engine; this module only does arithmetic and line bookkeeping, so every
//! invariant is testable without I/O.
//!
//! ## Totals Invariants
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  line_subtotal = max(0, unit_price × quantity − line_discount)          │
//! │  line_tax      = line_subtotal × tax_rate      (round half up)          │
//! │                                                                         │
//! │  subtotal = Σ line_subtotal                                             │
//! │  tax      = Σ line_tax                                                  │
//! │  total    = max(0, subtotal + tax − cart_discount)                      │
//! │                                                                         │
//! │  All amounts in integer cents. total == subtotal + tax − discount      │
//! │  holds to the cent for every mutation sequence.                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Line Merging
//! Adding an item merges with an existing line only when `product_ref`,
//! `unit_price` AND `tax_rate` all match (quantities are summed). The same
//! product at a different price opens a new line: the original price was
//! frozen when first added.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::types::{Product, TaxRate};
use crate::{MAX_CART_ITEMS, MAX_ITEM_QUANTITY};

// =============================================================================
// Cart Item
// =============================================================================

/// A line item in the cart.
///
/// Owned exclusively by the cart for the duration of one in-progress sale.
/// Price and tax rate are frozen copies taken from the product at add time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    /// Line id (UUID v4), generated when the line is created.
    pub id: String,

    /// Reference to the product this line was built from.
    pub product_ref: String,

    /// Product name at time of adding (frozen, for receipts).
    pub name: String,

    /// Unit price at time of adding (frozen).
    pub unit_price: Money,

    /// Quantity in cart.
    pub quantity: i64,

    /// Tax rate at time of adding (frozen).
    pub tax_rate: TaxRate,

    /// Absolute discount applied to this line.
    pub line_discount: Money,
}

impl CartItem {
    /// Creates a line from a product, freezing price and tax rate.
    pub fn from_product(product: &Product, quantity: i64) -> Self {
        CartItem {
            id: Uuid::new_v4().to_string(),
            product_ref: product.id.clone(),
            name: product.name.clone(),
            unit_price: product.price,
            quantity,
            tax_rate: product.tax_rate,
            line_discount: Money::zero(),
        }
    }

    /// Line subtotal: unit price × quantity − line discount, clamped at zero.
    pub fn line_subtotal(&self) -> Money {
        (self.unit_price.multiply_quantity(self.quantity) - self.line_discount)
            .max(Money::zero())
    }

    /// Tax for this line, computed over the discounted line subtotal.
    pub fn line_tax(&self) -> Money {
        self.line_subtotal().calculate_tax(self.tax_rate)
    }

    /// Whether a new line for `product` at this price/rate should merge here.
    fn merges_with(&self, other: &CartItem) -> bool {
        self.product_ref == other.product_ref
            && self.unit_price == other.unit_price
            && self.tax_rate == other.tax_rate
    }
}

// =============================================================================
// Discount
// =============================================================================

/// A cart-level discount, either an absolute amount or a percentage of the
/// current subtotal (resolved to an amount when applied).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Discount {
    Amount { amount: Money },
    /// Basis points of the subtotal: 1000 = 10%.
    PercentOfSubtotal { bps: u32 },
}

// =============================================================================
// Cart
// =============================================================================

/// The in-progress cart.
///
/// ## Invariants
/// - Lines are unique by (product_ref, unit_price, tax_rate)
/// - Quantity is always > 0 (update to 0 removes the line)
/// - At most `MAX_CART_ITEMS` lines, `MAX_ITEM_QUANTITY` per line
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    pub items: Vec<CartItem>,

    /// Cart-level discount, as an absolute amount.
    pub discount: Money,

    /// When the cart was created/last cleared.
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl Cart {
    /// Creates a new empty cart.
    pub fn new() -> Self {
        Cart {
            items: Vec::new(),
            discount: Money::zero(),
            created_at: Utc::now(),
        }
    }

    /// Adds an item, merging with an existing line when product, price and
    /// tax rate all match. Returns the id of the affected line.
    pub fn add_item(&mut self, item: CartItem) -> CoreResult<String> {
        if let Some(existing) = self.items.iter_mut().find(|i| i.merges_with(&item)) {
            let new_qty = existing.quantity + item.quantity;
            if new_qty > MAX_ITEM_QUANTITY {
                return Err(CoreError::QuantityTooLarge {
                    requested: new_qty,
                    max: MAX_ITEM_QUANTITY,
                });
            }
            existing.quantity = new_qty;
            return Ok(existing.id.clone());
        }

        if self.items.len() >= MAX_CART_ITEMS {
            return Err(CoreError::CartTooLarge {
                max: MAX_CART_ITEMS,
            });
        }

        let id = item.id.clone();
        self.items.push(item);
        Ok(id)
    }

    /// Removes a line by id, returning the removed line.
    pub fn remove_item(&mut self, item_id: &str) -> CoreResult<CartItem> {
        let pos = self
            .items
            .iter()
            .position(|i| i.id == item_id)
            .ok_or_else(|| CoreError::ItemNotInCart(item_id.to_string()))?;
        Ok(self.items.remove(pos))
    }

    /// Updates a line's quantity. A quantity of zero or less removes
    /// the line.
    pub fn update_quantity(&mut self, item_id: &str, quantity: i64) -> CoreResult<()> {
        if quantity <= 0 {
            self.remove_item(item_id)?;
            return Ok(());
        }

        if quantity > MAX_ITEM_QUANTITY {
            return Err(CoreError::QuantityTooLarge {
                requested: quantity,
                max: MAX_ITEM_QUANTITY,
            });
        }

        let item = self
            .items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or_else(|| CoreError::ItemNotInCart(item_id.to_string()))?;
        item.quantity = quantity;
        Ok(())
    }

    /// Applies a cart-level discount, replacing any previous one.
    ///
    /// Percentages are resolved against the subtotal at the moment of
    /// application, matching how the cashier quotes them.
    pub fn set_discount(&mut self, discount: Discount) {
        self.discount = match discount {
            Discount::Amount { amount } => amount.max(Money::zero()),
            Discount::PercentOfSubtotal { bps } => self.subtotal().percentage(bps),
        };
    }

    /// Subtotal: Σ per-line discounted subtotals (each clamped at zero).
    pub fn subtotal(&self) -> Money {
        self.items
            .iter()
            .fold(Money::zero(), |acc, i| acc + i.line_subtotal())
    }

    /// Total tax: Σ per-line tax, each rounded half up to the cent.
    pub fn tax(&self) -> Money {
        self.items
            .iter()
            .fold(Money::zero(), |acc, i| acc + i.line_tax())
    }

    /// The cart-level discount amount.
    pub fn discount(&self) -> Money {
        self.discount
    }

    /// Grand total: subtotal + tax − discount, clamped at zero.
    pub fn total(&self) -> Money {
        (self.subtotal() + self.tax() - self.discount).max(Money::zero())
    }

    /// Total quantity across all lines.
    pub fn item_count(&self) -> i64 {
        self.items.iter().map(|i| i.quantity).sum()
    }

    /// Number of distinct lines.
    pub fn line_count(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Clears all lines and the discount.
    pub fn clear(&mut self) {
        self.items.clear();
        self.discount = Money::zero();
        self.created_at = Utc::now();
    }

    /// Totals summary for boundary responses.
    pub fn totals(&self) -> CartTotals {
        CartTotals {
            item_count: self.item_count(),
            line_count: self.line_count(),
            subtotal: self.subtotal(),
            tax: self.tax(),
            discount: self.discount(),
            total: self.total(),
        }
    }
}

impl Default for Cart {
    fn default() -> Self {
        Cart::new()
    }
}

/// Cart totals summary for API responses.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct CartTotals {
    pub item_count: i64,
    pub line_count: usize,
    pub subtotal: Money,
    pub tax: Money,
    pub discount: Money,
    pub total: Money,
}

// =============================================================================
// Unit Tests
// =============================================================================
