//! # Cart Engine
//!
//! The persisting wrapper around the pure cart math: every mutating call
//! synchronously writes the full cart snapshot to the module's storage, so
//! a crash mid-sale can be recovered.
//!
//! ## Crash Recovery Policy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  CartEngine::load(storage, policy)                                      │
//! │                                                                         │
//! │  snapshot record found?                                                 │
//! │       │                                                                 │
//! │       ├── no ───────────────────────────► empty cart                   │
//! │       │                                                                 │
//! │       └── yes ── written_at age ≤ policy.freshness?                    │
//! │                      │                                                  │
//! │                      ├── yes ──► restore items + discount              │
//! │                      │                                                  │
//! │                      └── no ───► discard record, empty cart            │
//! │                                                                         │
//! │  The freshness gate (default 24 h) is a policy decision: a terminal    │
//! │  reopened the next morning should not resurrect yesterday's            │
//! │  half-finished sale. It is configurable, not a correctness rule.       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use almacen_core::validation::validate_cart_item;
use almacen_core::{Cart, CartItem, CartTotals, Discount};
use almacen_runtime::ModuleStore;

use crate::error::SaleResult;

/// Collection/key the snapshot lives under (namespaced by the module id).
const CART_COLLECTION: &str = "cart";
const CART_KEY: &str = "current";

// =============================================================================
// Policy
// =============================================================================

/// Cart persistence policy.
#[derive(Debug, Clone)]
pub struct CartPolicy {
    /// Maximum age of a persisted snapshot before it is discarded on load.
    pub freshness: Duration,
}

impl Default for CartPolicy {
    fn default() -> Self {
        CartPolicy {
            freshness: Duration::hours(24),
        }
    }
}

/// The persisted cart snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CartSnapshot {
    items: Vec<CartItem>,
    discount: almacen_core::Money,
}

// =============================================================================
// Cart Engine
// =============================================================================

/// Cart with write-through persistence.
pub struct CartEngine {
    cart: Cart,
    storage: ModuleStore,
    policy: CartPolicy,
}

impl CartEngine {
    /// Loads the engine, restoring a persisted snapshot only if it is
    /// fresher than the policy allows.
    pub async fn load(storage: ModuleStore, policy: CartPolicy) -> SaleResult<Self> {
        let mut cart = Cart::new();

        if let Some(record) = storage
            .get_record::<CartSnapshot>(CART_COLLECTION, CART_KEY)
            .await?
        {
            if record.age(Utc::now()) <= policy.freshness {
                info!(
                    items = record.data.items.len(),
                    "Restored in-progress cart from storage"
                );
                cart.items = record.data.items;
                cart.discount = record.data.discount;
                cart.created_at = record.written_at;
            } else {
                info!("Discarding stale cart snapshot");
                storage.delete(CART_COLLECTION, CART_KEY).await?;
            }
        }

        Ok(CartEngine {
            cart,
            storage,
            policy,
        })
    }

    /// Read-only view of the underlying cart.
    pub fn cart(&self) -> &Cart {
        &self.cart
    }

    pub fn is_empty(&self) -> bool {
        self.cart.is_empty()
    }

    pub fn totals(&self) -> CartTotals {
        self.cart.totals()
    }

    pub fn items(&self) -> &[CartItem] {
        &self.cart.items
    }

    pub fn policy(&self) -> &CartPolicy {
        &self.policy
    }

    /// Validates and adds an item, merging by product/price/tax rate.
    /// Returns the affected line id.
    pub async fn add_item(&mut self, item: CartItem) -> SaleResult<String> {
        validate_cart_item(&item).map_err(almacen_core::CoreError::from)?;
        let id = self.cart.add_item(item)?;
        self.persist().await?;
        debug!(line_id = %id, total = %self.cart.total(), "Cart item added");
        Ok(id)
    }

    pub async fn remove_item(&mut self, item_id: &str) -> SaleResult<CartItem> {
        let removed = self.cart.remove_item(item_id)?;
        self.persist().await?;
        Ok(removed)
    }

    /// Updates a line's quantity; zero or less removes the line.
    pub async fn update_quantity(&mut self, item_id: &str, quantity: i64) -> SaleResult<()> {
        self.cart.update_quantity(item_id, quantity)?;
        self.persist().await?;
        Ok(())
    }

    /// Applies a cart-level discount, replacing any previous one.
    pub async fn apply_discount(&mut self, discount: Discount) -> SaleResult<()> {
        self.cart.set_discount(discount);
        self.persist().await?;
        Ok(())
    }

    /// Clears the cart and persists the empty state.
    pub async fn clear(&mut self) -> SaleResult<()> {
        self.cart.clear();
        self.persist().await?;
        Ok(())
    }

    /// Write-through: the full snapshot, on every mutation.
    async fn persist(&self) -> SaleResult<()> {
        let snapshot = CartSnapshot {
            items: self.cart.items.clone(),
            discount: self.cart.discount,
        };
        self.storage
            .set(CART_COLLECTION, CART_KEY, &snapshot, false)
            .await?;
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
