//! # almacen-inventory: Inventory Module for Almacén POS
//!
//! Optional paid module. Tracks stock levels in its own namespaced
//! collections and reacts to completed sales by decrementing stock and
//! raising low-stock alerts.
//!
//! ## Reaction Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  pos-core publishes sale.completed (full Sale in the payload)           │
//! │       │  synchronous delivery into the module's EventInbox              │
//! │       ▼                                                                 │
//! │  background worker drains the inbox                                     │
//! │       │  (tests call drain() directly for determinism)                  │
//! │       ▼                                                                 │
//! │  per sold line: stock[product_ref].on_hand -= quantity                  │
//! │       │                                                                 │
//! │       ├── on_hand ≤ min_level ──► alert record + inventory.low_stock    │
//! │       └── publish inventory.stock.updated                               │
//! │                                                                         │
//! │  The module never calls the sale module, and the sale module never     │
//! │  calls it: the bus is the only coupling.                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Products the module has no stock record for are ignored: not every
//! product in a corner store is inventory-tracked.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use almacen_core::{DomainEvent, Money, ModuleDescriptor, Sale};
use almacen_runtime::{
    events, EventBus, EventInbox, Module, ModuleContext, ModuleStore, RuntimeResult,
    SubscriptionId, CORE_MODULE_ID,
};
use almacen_store::OfflineStore;

/// This module's id (the namespace of its collections).
pub const MODULE_ID: &str = "inventory";

/// Events this module publishes.
pub const STOCK_UPDATED: &str = "inventory.stock.updated";
pub const LOW_STOCK: &str = "inventory.low_stock";

const STOCK_COLLECTION: &str = "stock";
const ALERTS_COLLECTION: &str = "alerts";

/// Inbox poll interval for the background worker.
const WORKER_POLL_MS: u64 = 25;

// =============================================================================
// Records
// =============================================================================

/// Stock level for one tracked product.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockLevel {
    pub product_ref: String,
    pub name: String,
    pub on_hand: i64,
    /// Raising threshold: an alert fires when on_hand drops to this level
    /// or below.
    pub min_level: i64,
}

/// An active low-stock alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockAlert {
    pub id: String,
    pub product_ref: String,
    pub name: String,
    pub on_hand: i64,
    pub min_level: i64,
    pub raised_at: DateTime<Utc>,
}

// =============================================================================
// Module
// =============================================================================

/// The inventory module.
pub struct InventoryModule {
    descriptor: ModuleDescriptor,
    bus: EventBus,
    storage: ModuleStore,
    inbox: EventInbox,
    subscription: Mutex<Option<SubscriptionId>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Serializes inbox processing between drain() and the worker, so a
    /// drain() that returns means every buffered event is fully applied.
    work_lock: Arc<tokio::sync::Mutex<()>>,
}

impl InventoryModule {
    pub fn new(bus: EventBus, store: Arc<OfflineStore>) -> Self {
        InventoryModule {
            descriptor: ModuleDescriptor {
                id: MODULE_ID.to_string(),
                name: "Inventory".to_string(),
                version: "1.0.0".to_string(),
                dependencies: vec![CORE_MODULE_ID.to_string()],
                optional: true,
                monthly_price: Money::from_cents(800_000), // $8,000/month
                trial_days: 15,
                description: "Stock tracking, movements and low-stock alerts".to_string(),
            },
            bus,
            storage: ModuleStore::new(store, MODULE_ID),
            inbox: EventInbox::new(),
            subscription: Mutex::new(None),
            worker: Mutex::new(None),
            work_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    // =========================================================================
    // Public API
    // =========================================================================

    /// Creates or replaces the stock record for a product.
    pub async fn set_stock(
        &self,
        product_ref: &str,
        name: &str,
        on_hand: i64,
        min_level: i64,
    ) -> RuntimeResult<()> {
        let level = StockLevel {
            product_ref: product_ref.to_string(),
            name: name.to_string(),
            on_hand,
            min_level,
        };
        self.storage
            .set(STOCK_COLLECTION, product_ref, &level, false)
            .await?;
        Ok(())
    }

    /// Current stock level for a product, if tracked.
    pub async fn stock_of(&self, product_ref: &str) -> RuntimeResult<Option<StockLevel>> {
        Ok(self.storage.get(STOCK_COLLECTION, product_ref).await?)
    }

    /// All active low-stock alerts ("get active alerts" at the boundary).
    pub async fn active_alerts(&self) -> RuntimeResult<Vec<StockAlert>> {
        Ok(self.storage.get_all(ALERTS_COLLECTION).await?)
    }

    /// Dismisses an alert.
    pub async fn clear_alert(&self, alert_id: &str) -> RuntimeResult<()> {
        self.storage.delete(ALERTS_COLLECTION, alert_id).await?;
        Ok(())
    }

    /// Processes every buffered event now. The background worker does the
    /// same on a timer; tests call this directly for determinism. When this
    /// returns, everything that was buffered has been fully applied.
    pub async fn drain(&self) -> RuntimeResult<()> {
        let _processing = self.work_lock.lock().await;
        while let Some(event) = self.inbox.pop() {
            process_sale_completed(&self.storage, &self.bus, &event).await?;
        }
        Ok(())
    }
}

// =============================================================================
// Event Processing
// =============================================================================

/// Applies one `sale.completed` event to the stock records.
async fn process_sale_completed(
    storage: &ModuleStore,
    bus: &EventBus,
    event: &DomainEvent,
) -> RuntimeResult<()> {
    let sale: Sale = match serde_json::from_value(event.payload["sale"].clone()) {
        Ok(sale) => sale,
        Err(e) => {
            warn!(event_id = %event.id, error = %e, "sale.completed payload without a readable sale");
            return Ok(());
        }
    };

    for item in &sale.items {
        let Some(mut level) = storage
            .get::<StockLevel>(STOCK_COLLECTION, &item.product_ref)
            .await?
        else {
            debug!(product = %item.product_ref, "Product not inventory-tracked, skipping");
            continue;
        };

        level.on_hand -= item.quantity;
        storage
            .set(STOCK_COLLECTION, &item.product_ref, &level, false)
            .await?;

        bus.publish(STOCK_UPDATED, MODULE_ID, json!({ "stock": level }));
        info!(
            product = %item.product_ref,
            on_hand = level.on_hand,
            sold = item.quantity,
            "Stock decremented"
        );

        if level.on_hand <= level.min_level {
            let alert = StockAlert {
                id: Uuid::new_v4().to_string(),
                product_ref: level.product_ref.clone(),
                name: level.name.clone(),
                on_hand: level.on_hand,
                min_level: level.min_level,
                raised_at: Utc::now(),
            };
            storage
                .set(ALERTS_COLLECTION, &alert.id, &alert, false)
                .await?;
            bus.publish(LOW_STOCK, MODULE_ID, json!({ "alert": alert }));
            warn!(product = %alert.product_ref, on_hand = alert.on_hand, "Low stock alert raised");
        }
    }

    Ok(())
}

// =============================================================================
// Module Trait
// =============================================================================

#[async_trait]
impl Module for InventoryModule {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    async fn install(&self, _ctx: &ModuleContext) -> RuntimeResult<()> {
        let subscription = self.bus.subscribe(
            CORE_MODULE_ID,
            events::SALE_COMPLETED,
            self.inbox.forward(),
        );
        *self
            .subscription
            .lock()
            .expect("Subscription mutex poisoned") = Some(subscription);

        // Background drain loop; tests bypass it via drain().
        let inbox = self.inbox.clone();
        let storage = self.storage.clone();
        let bus = self.bus.clone();
        let work_lock = self.work_lock.clone();
        let handle = tokio::spawn(async move {
            loop {
                {
                    let _processing = work_lock.lock().await;
                    while let Some(event) = inbox.pop() {
                        if let Err(e) = process_sale_completed(&storage, &bus, &event).await {
                            error!(error = %e, "Failed to process sale.completed");
                        }
                    }
                }
                tokio::time::sleep(std::time::Duration::from_millis(WORKER_POLL_MS)).await;
            }
        });
        *self.worker.lock().expect("Worker mutex poisoned") = Some(handle);

        Ok(())
    }

    async fn uninstall(&self, _ctx: &ModuleContext) -> RuntimeResult<()> {
        if let Some(subscription) = self
            .subscription
            .lock()
            .expect("Subscription mutex poisoned")
            .take()
        {
            self.bus.unsubscribe(subscription);
        }
        if let Some(worker) = self.worker.lock().expect("Worker mutex poisoned").take() {
            worker.abort();
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
