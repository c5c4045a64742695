//! # Sale Orchestrator (the `pos-core` module)
//!
//! Owns the "current sale" state, wires cart mutations and payment
//! settlement into a sale record, and emits the domain events the other
//! modules subscribe to.
//!
//! ## Checkout Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  checkout(request)                                                      │
//! │       │                                                                 │
//! │       ├── no active sale / not pending ──► Err (state conflict)        │
//! │       ├── empty cart ────────────────────► Err (state conflict,        │
//! │       │                                    payment engine NOT invoked) │
//! │       ├── invalid request ───────────────► Err (validation)            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  PaymentEngine::attempt(request, due = cart total)                     │
//! │       │                                                                 │
//! │       ├── Failure ──► sale stays Pending, cart untouched, retryable    │
//! │       │               (engine already published payment.failed)        │
//! │       │                                                                 │
//! │       └── Success ─► finalize EXACTLY ONCE:                            │
//! │             1. sale: Completed, receipt number, payment method         │
//! │             2. persist to the sales history collection                 │
//! │             3. enqueue for upload to the remote source                 │
//! │             4. clear cart, drop current sale                           │
//! │             5. publish sale.completed (full Sale + PaymentOutcome)     │
//! │                                                                         │
//! │  Persist (2) strictly precedes publish (5): a subscriber observing     │
//! │  sale.completed can rely on the sale being in the history already.     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency
//! The whole session (cart engine + current sale) sits behind one async
//! mutex: calls into the orchestrator are serialized (single-writer
//! discipline, one in-progress transaction per terminal). A `cancel_sale`
//! issued while a checkout is in flight waits on the lock and is then
//! rejected as a state conflict, so the cancel/checkout race cannot occur.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use almacen_core::validation::{validate_payment_request, validate_quantity};
use almacen_core::{
    CartItem, Discount, Money, ModuleDescriptor, PaymentOutcome, PaymentRequest, Product, Sale,
    SaleStatus, SalesStats, TaxRate, DEFAULT_TAX_RATE_BPS,
};
use almacen_runtime::{
    events, EventBus, Module, ModuleContext, ModuleStore, RuntimeResult, CORE_MODULE_ID,
};
use almacen_store::{OfflineStore, SyncOperation};

use crate::cart_engine::{CartEngine, CartPolicy};
use crate::error::{SaleError, SaleResult};
use crate::payment::{PaymentConfig, PaymentEngine};

/// Collections owned by this module (namespaced under `pos-core`).
const SALES_COLLECTION: &str = "sales";
const CONFIG_COLLECTION: &str = "config";
const SETTINGS_KEY: &str = "settings";

// =============================================================================
// Settings & Configuration
// =============================================================================

/// Terminal-level sale settings, persisted in the module's config
/// collection at install time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleSettings {
    /// Tax rate applied when a product carries none.
    pub default_tax_rate: TaxRate,
    /// ISO 4217 currency code of the terminal.
    pub currency: String,
}

impl Default for SaleSettings {
    fn default() -> Self {
        SaleSettings {
            default_tax_rate: TaxRate::from_bps(DEFAULT_TAX_RATE_BPS),
            currency: "ARS".to_string(),
        }
    }
}

/// Everything configurable about the sale module.
#[derive(Debug, Clone, Default)]
pub struct SaleConfig {
    pub cart_policy: CartPolicy,
    pub payment: PaymentConfig,
    pub settings: SaleSettings,
}

// =============================================================================
// Boundary DTOs
// =============================================================================

/// Snapshot of the cart for the terminal boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartStateView {
    pub items: Vec<CartItem>,
    pub subtotal: Money,
    pub tax: Money,
    pub discount: Money,
    pub total: Money,
    pub item_count: i64,
    pub is_empty: bool,
}

// =============================================================================
// Sale Module
// =============================================================================

/// The session state guarded by the orchestrator mutex.
struct Session {
    cart: CartEngine,
    current: Option<Sale>,
}

/// The core sales module: cart + payment + sale state machine.
pub struct SaleModule {
    descriptor: ModuleDescriptor,
    bus: EventBus,
    storage: ModuleStore,
    payment: PaymentEngine,
    settings: SaleSettings,
    session: tokio::sync::Mutex<Session>,
}

impl SaleModule {
    /// Builds the module, restoring any fresh-enough persisted cart.
    pub async fn new(
        bus: EventBus,
        store: Arc<OfflineStore>,
        config: SaleConfig,
    ) -> SaleResult<Self> {
        let storage = ModuleStore::new(store, CORE_MODULE_ID);
        let cart = CartEngine::load(storage.clone(), config.cart_policy).await?;
        let payment = PaymentEngine::new(bus.clone(), config.payment);

        Ok(SaleModule {
            descriptor: Self::default_descriptor(),
            bus,
            storage,
            payment,
            settings: config.settings,
            session: tokio::sync::Mutex::new(Session {
                cart,
                current: None,
            }),
        })
    }

    fn default_descriptor() -> ModuleDescriptor {
        ModuleDescriptor {
            id: CORE_MODULE_ID.to_string(),
            name: "POS Core".to_string(),
            version: "1.0.0".to_string(),
            dependencies: vec![],
            optional: false, // the terminal cannot run without it
            monthly_price: Money::from_cents(1_200_000), // $12,000/month
            trial_days: 30,
            description: "Basic sales terminal: cart, payments, receipts".to_string(),
        }
    }

    pub fn settings(&self) -> &SaleSettings {
        &self.settings
    }

    // =========================================================================
    // Sale Lifecycle
    // =========================================================================

    /// Starts a new sale, clearing the cart. Any previous pending sale is
    /// replaced. Publishes `sale.started` with the full (empty) sale.
    pub async fn start_sale(&self) -> SaleResult<String> {
        let mut session = self.session.lock().await;

        session.cart.clear().await?;
        let sale = Sale::new(Uuid::new_v4().to_string(), Utc::now());
        let sale_id = sale.id.clone();

        self.bus.publish(
            events::SALE_STARTED,
            CORE_MODULE_ID,
            json!({ "sale": sale }),
        );
        session.current = Some(sale);

        info!(sale_id = %sale_id, "Sale started");
        Ok(sale_id)
    }

    /// Adds a product to the cart, freezing its price and tax rate into
    /// the line. Returns the updated cart view.
    pub async fn add_product(&self, product: &Product, quantity: i64) -> SaleResult<CartStateView> {
        validate_quantity(quantity)?;

        let mut session = self.session.lock().await;
        Self::require_pending(&session)?;

        let item = CartItem::from_product(product, quantity);
        session.cart.add_item(item).await?;
        Self::refresh_sale_totals(&mut session);

        debug!(product = %product.id, quantity, "Product added to cart");
        Ok(Self::view(&session))
    }

    /// Removes a line from the cart by line id.
    pub async fn remove_product(&self, item_id: &str) -> SaleResult<CartStateView> {
        let mut session = self.session.lock().await;
        Self::require_pending(&session)?;

        session.cart.remove_item(item_id).await?;
        Self::refresh_sale_totals(&mut session);
        Ok(Self::view(&session))
    }

    /// Updates a line's quantity; zero or less removes the line.
    pub async fn update_quantity(&self, item_id: &str, quantity: i64) -> SaleResult<CartStateView> {
        let mut session = self.session.lock().await;
        Self::require_pending(&session)?;

        session.cart.update_quantity(item_id, quantity).await?;
        Self::refresh_sale_totals(&mut session);
        Ok(Self::view(&session))
    }

    /// Applies a cart-level discount (absolute or percent of subtotal).
    pub async fn apply_discount(&self, discount: Discount) -> SaleResult<CartStateView> {
        let mut session = self.session.lock().await;
        Self::require_pending(&session)?;

        session.cart.apply_discount(discount).await?;
        Self::refresh_sale_totals(&mut session);
        Ok(Self::view(&session))
    }

    /// Current cart state for the terminal boundary.
    pub async fn cart_state(&self) -> CartStateView {
        let session = self.session.lock().await;
        Self::view(&session)
    }

    /// The in-progress sale, if any.
    pub async fn current_sale(&self) -> Option<Sale> {
        self.session.lock().await.current.clone()
    }

    /// Validates state, attempts settlement, and finalizes the sale on
    /// success. See the module docs for the exact ordering contract.
    pub async fn checkout(&self, request: PaymentRequest) -> SaleResult<PaymentOutcome> {
        let mut session = self.session.lock().await;

        // State conflicts and validation are rejected before the payment
        // engine is ever invoked.
        Self::require_pending(&session)?;
        if session.cart.is_empty() {
            return Err(SaleError::EmptyCart);
        }
        validate_payment_request(&request)?;

        let due = session.cart.cart().total();
        let outcome = self.payment.attempt(&request, due).await;

        if !outcome.is_success() {
            // Sale stays Pending, cart untouched: safely retryable. The
            // payment engine already published payment.failed.
            return Ok(outcome);
        }

        // Finalize exactly once.
        let mut sale = session.current.take().ok_or(SaleError::NoActiveSale)?;
        sale.items = session.cart.items().to_vec();
        let totals = session.cart.totals();
        sale.subtotal = totals.subtotal;
        sale.tax = totals.tax;
        sale.discount = totals.discount;
        sale.total = totals.total;
        sale.payment_method = Some(request.method);
        sale.customer_ref = request.customer_ref.clone();
        sale.status = SaleStatus::Completed;
        sale.receipt_number = Some(generate_receipt_number());
        sale.completed_at = Some(Utc::now());

        // Persist to the local sales history, then queue for upload.
        // An offline write queues itself; an online one is never confirmed
        // out-of-band, so it is queued explicitly. Either way the completed
        // sale ends up in the queue exactly once.
        let was_online = self.storage.raw().is_online();
        self.storage
            .set(SALES_COLLECTION, &sale.id, &sale, false)
            .await?;
        if was_online {
            self.storage
                .enqueue_sync(
                    SyncOperation::Create,
                    SALES_COLLECTION,
                    &sale.id,
                    Some(serde_json::to_value(&sale)?),
                )
                .await?;
        }

        session.cart.clear().await?;

        info!(
            sale_id = %sale.id,
            receipt = %sale.receipt_number.as_deref().unwrap_or(""),
            total = %sale.total,
            "Sale completed"
        );

        // Persisted first, published after: subscribers can rely on the
        // sale already being in the history.
        self.bus.publish(
            events::SALE_COMPLETED,
            CORE_MODULE_ID,
            json!({ "sale": sale, "payment": outcome }),
        );

        Ok(outcome)
    }

    /// Cancels the in-progress sale and clears the cart.
    pub async fn cancel_sale(&self) -> SaleResult<Sale> {
        let mut session = self.session.lock().await;

        let mut sale = session.current.take().ok_or(SaleError::NoActiveSale)?;
        sale.status = SaleStatus::Cancelled;
        session.cart.clear().await?;

        info!(sale_id = %sale.id, "Sale cancelled");
        self.bus.publish(
            events::SALE_CANCELLED,
            CORE_MODULE_ID,
            json!({ "sale": sale }),
        );

        Ok(sale)
    }

    // =========================================================================
    // History
    // =========================================================================

    /// Read-only rollup over the persisted sales history.
    pub async fn sales_stats(&self, window_days: u32) -> SaleResult<SalesStats> {
        let sales: Vec<Sale> = self.storage.get_all(SALES_COLLECTION).await?;
        let cutoff = Utc::now() - Duration::days(window_days as i64);

        let completed: Vec<&Sale> = sales
            .iter()
            .filter(|s| s.status == SaleStatus::Completed)
            .filter(|s| s.completed_at.map_or(false, |at| at >= cutoff))
            .collect();

        let count = completed.len() as u64;
        let total_amount = completed
            .iter()
            .fold(Money::zero(), |acc, s| acc + s.total);
        let average_ticket = if count > 0 {
            Money::from_cents(total_amount.cents() / count as i64)
        } else {
            Money::zero()
        };

        Ok(SalesStats {
            count,
            total_amount,
            average_ticket,
            window_days,
        })
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn require_pending(session: &Session) -> SaleResult<()> {
        match &session.current {
            None => Err(SaleError::NoActiveSale),
            Some(sale) if !sale.is_pending() => Err(SaleError::SaleNotPending {
                sale_id: sale.id.clone(),
                status: sale.status,
                action: "modify",
            }),
            Some(_) => Ok(()),
        }
    }

    /// Recomputes the pending sale's totals from cart state.
    fn refresh_sale_totals(session: &mut Session) {
        let items = session.cart.items().to_vec();
        let totals = session.cart.totals();
        if let Some(sale) = session.current.as_mut() {
            sale.items = items;
            sale.subtotal = totals.subtotal;
            sale.tax = totals.tax;
            sale.discount = totals.discount;
            sale.total = totals.total;
        }
    }

    fn view(session: &Session) -> CartStateView {
        let totals = session.cart.totals();
        CartStateView {
            items: session.cart.items().to_vec(),
            subtotal: totals.subtotal,
            tax: totals.tax,
            discount: totals.discount,
            total: totals.total,
            item_count: totals.item_count,
            is_empty: session.cart.is_empty(),
        }
    }
}

// =============================================================================
// Module Trait
// =============================================================================

#[async_trait]
impl Module for SaleModule {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    async fn install(&self, ctx: &ModuleContext) -> RuntimeResult<()> {
        // Seed the settings record once; an existing one survives
        // reinstallation.
        let existing: Option<SaleSettings> =
            ctx.storage.get(CONFIG_COLLECTION, SETTINGS_KEY).await?;
        if existing.is_none() {
            ctx.storage
                .set(CONFIG_COLLECTION, SETTINGS_KEY, &self.settings, false)
                .await?;
        }
        Ok(())
    }

    async fn uninstall(&self, _ctx: &ModuleContext) -> RuntimeResult<()> {
        // The cart snapshot is already persisted on every mutation; there
        // is nothing volatile to flush.
        info!("Sale module uninstalled");
        Ok(())
    }
}

/// Receipt reference in the `YYMMDD-HHMMSS-NNNN` shape.
fn generate_receipt_number() -> String {
    let now = Utc::now();
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let random: u16 = (nanos % 10000) as u16;
    format!("{}-{:04}", now.format("%y%m%d-%H%M%S"), random)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use almacen_core::PaymentMethod;
    use almacen_store::StoreConfig;

    fn product(id: &str, price_cents: i64, tax_bps: u32) -> Product {
        Product {
            id: id.to_string(),
            name: format!("Product {id}"),
            price: Money::from_cents(price_cents),
            tax_rate: TaxRate::from_bps(tax_bps),
            category: None,
            barcode: None,
            is_active: true,
        }
    }

    async fn module() -> SaleModule {
        let store = Arc::new(OfflineStore::open(StoreConfig::fallback_only()).await);
        SaleModule::new(
            EventBus::new(),
            store,
            SaleConfig {
                payment: PaymentConfig::instant(),
                ..SaleConfig::default()
            },
        )
        .await
        .unwrap()
    }

    fn cash(amount_cents: i64) -> PaymentRequest {
        PaymentRequest {
            method: PaymentMethod::Cash,
            amount: Money::from_cents(amount_cents),
            customer_ref: None,
        }
    }

    #[tokio::test]
    async fn test_cart_mutations_require_active_sale() {
        let module = module().await;
        let err = module
            .add_product(&product("bread", 85_000, 2100), 1)
            .await
            .unwrap_err();
        assert!(err.is_state_conflict());
    }

    #[tokio::test]
    async fn test_start_sale_resets_cart_and_totals() {
        let module = module().await;
        module.start_sale().await.unwrap();
        module
            .add_product(&product("bread", 85_000, 2100), 2)
            .await
            .unwrap();

        module.start_sale().await.unwrap();
        let view = module.cart_state().await;
        assert!(view.is_empty);
        assert!(module.current_sale().await.unwrap().total.is_zero());
    }

    #[tokio::test]
    async fn test_totals_follow_cart_into_current_sale() {
        let module = module().await;
        module.start_sale().await.unwrap();
        let view = module
            .add_product(&product("bread", 85_000, 2100), 3)
            .await
            .unwrap();

        let sale = module.current_sale().await.unwrap();
        assert_eq!(sale.subtotal, view.subtotal);
        assert_eq!(sale.tax, view.tax);
        assert_eq!(sale.total, view.total);
        assert_eq!(sale.items.len(), 1);
    }

    #[tokio::test]
    async fn test_checkout_empty_cart_is_state_conflict() {
        let bus = EventBus::new();
        let store = Arc::new(OfflineStore::open(StoreConfig::fallback_only()).await);
        let module = SaleModule::new(
            bus.clone(),
            store,
            SaleConfig {
                payment: PaymentConfig::instant(),
                ..SaleConfig::default()
            },
        )
        .await
        .unwrap();
        module.start_sale().await.unwrap();

        let err = module.checkout(cash(1000)).await.unwrap_err();
        assert!(matches!(err, SaleError::EmptyCart));
        // Sale untouched, still retryable after items are added.
        assert!(module.current_sale().await.unwrap().is_pending());

        // The payment engine was never invoked: no payment.* events.
        assert!(!bus
            .history(None, None)
            .iter()
            .any(|e| e.event_type.starts_with("payment.")));
    }

    #[tokio::test]
    async fn test_checkout_without_sale_is_state_conflict() {
        let module = module().await;
        let err = module.checkout(cash(1000)).await.unwrap_err();
        assert!(matches!(err, SaleError::NoActiveSale));
    }

    #[tokio::test]
    async fn test_failed_payment_leaves_cart_for_retry() {
        let module = module().await;
        module.start_sale().await.unwrap();
        module
            .add_product(&product("bread", 85_000, 2100), 1)
            .await
            .unwrap();
        let total = module.cart_state().await.total;

        // Short cash: settlement failure, not an Err.
        let outcome = module
            .checkout(cash(total.cents() - 100))
            .await
            .unwrap();
        assert!(!outcome.is_success());
        assert!(!module.cart_state().await.is_empty);
        assert!(module.current_sale().await.unwrap().is_pending());

        // Retry with enough cash succeeds.
        let outcome = module.checkout(cash(total.cents())).await.unwrap();
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn test_checkout_completes_exactly_once() {
        let module = module().await;
        module.start_sale().await.unwrap();
        module
            .add_product(&product("bread", 85_000, 2100), 1)
            .await
            .unwrap();
        let total = module.cart_state().await.total;

        let outcome = module.checkout(cash(total.cents())).await.unwrap();
        assert!(outcome.is_success());
        assert!(module.current_sale().await.is_none());
        assert!(module.cart_state().await.is_empty);

        // Re-invocation is rejected: the sale is no longer pending.
        let err = module.checkout(cash(total.cents())).await.unwrap_err();
        assert!(err.is_state_conflict());
    }

    #[tokio::test]
    async fn test_cancel_publishes_and_clears() {
        let module = module().await;
        module.start_sale().await.unwrap();
        module
            .add_product(&product("bread", 85_000, 2100), 1)
            .await
            .unwrap();

        let cancelled = module.cancel_sale().await.unwrap();
        assert_eq!(cancelled.status, SaleStatus::Cancelled);
        assert!(module.cart_state().await.is_empty);
        assert!(module.current_sale().await.is_none());

        // No sale to cancel twice.
        assert!(matches!(
            module.cancel_sale().await,
            Err(SaleError::NoActiveSale)
        ));
    }

    #[tokio::test]
    async fn test_sales_stats_rollup() {
        let module = module().await;

        for _ in 0..3 {
            module.start_sale().await.unwrap();
            module
                .add_product(&product("bread", 10_000, 0), 1)
                .await
                .unwrap();
            let outcome = module.checkout(cash(10_000)).await.unwrap();
            assert!(outcome.is_success());
        }

        let stats = module.sales_stats(30).await.unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.total_amount.cents(), 30_000);
        assert_eq!(stats.average_ticket.cents(), 10_000);
        assert_eq!(stats.window_days, 30);

        // A cancelled sale never enters the rollup.
        module.start_sale().await.unwrap();
        module
            .add_product(&product("bread", 10_000, 0), 1)
            .await
            .unwrap();
        module.cancel_sale().await.unwrap();
        assert_eq!(module.sales_stats(30).await.unwrap().count, 3);
    }

    #[tokio::test]
    async fn test_completed_sale_is_persisted_and_queued() {
        let store = Arc::new(OfflineStore::open(StoreConfig::fallback_only()).await);
        let module = SaleModule::new(
            EventBus::new(),
            store.clone(),
            SaleConfig {
                payment: PaymentConfig::instant(),
                ..SaleConfig::default()
            },
        )
        .await
        .unwrap();

        let sale_id = module.start_sale().await.unwrap();
        module
            .add_product(&product("bread", 10_000, 0), 1)
            .await
            .unwrap();
        module.checkout(cash(10_000)).await.unwrap();

        let col = almacen_store::Collection::new(CORE_MODULE_ID, SALES_COLLECTION);
        let persisted: Sale = store.get(&col, &sale_id).await.unwrap().unwrap();
        assert_eq!(persisted.status, SaleStatus::Completed);
        assert!(persisted.receipt_number.is_some());

        // The completed sale is queued for upload to the remote source.
        let pending = store.drain_sync_queue(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].key, sale_id);
    }

    #[test]
    fn test_receipt_number_shape() {
        let receipt = generate_receipt_number();
        // YYMMDD-HHMMSS-NNNN
        let parts: Vec<&str> = receipt.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 6);
        assert_eq!(parts[1].len(), 6);
        assert_eq!(parts[2].len(), 4);
    }
}
