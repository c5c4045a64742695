//! # almacen-customers: Customers Module for Almacén POS
//!
//! Optional paid module: customer accounts, the fiado (store credit)
//! ledger, and loyalty accrual.
//!
//! ## Fiado via Events
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Checkout with method = account_credit                                  │
//! │       │  the payment engine only records that the method was           │
//! │       │  requested; it does not know credit ceilings                   │
//! │       ▼                                                                 │
//! │  sale.completed ──► this module books the debt:                        │
//! │       balance += sale.total                                            │
//! │       │                                                                 │
//! │       └── balance > credit_limit ──► customers.credit_limit_exceeded   │
//! │                                                                         │
//! │  The debt is booked even over the ceiling: by the time the event       │
//! │  arrives the goods have already left the store, so losing the          │
//! │  receivable would be worse than flagging it. The alert event is the    │
//! │  owner's signal to stop extending credit.                              │
//! │                                                                         │
//! │  Any completed sale with a customer_ref also accrues loyalty points.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use almacen_core::{DomainEvent, Money, ModuleDescriptor, PaymentMethod, Sale};
use almacen_runtime::{
    events, EventBus, EventInbox, Module, ModuleContext, ModuleStore, RuntimeResult,
    SubscriptionId, CORE_MODULE_ID,
};
use almacen_store::OfflineStore;

/// This module's id (the namespace of its collections).
pub const MODULE_ID: &str = "customers";

/// Events this module publishes.
pub const FIADO_GRANTED: &str = "customers.fiado_granted";
pub const PAYMENT_RECEIVED: &str = "customers.payment_received";
pub const CREDIT_LIMIT_EXCEEDED: &str = "customers.credit_limit_exceeded";

const ACCOUNTS_COLLECTION: &str = "accounts";

/// Inbox poll interval for the background worker.
const WORKER_POLL_MS: u64 = 25;

// =============================================================================
// Records & Policy
// =============================================================================

/// A customer account with its running tab and loyalty balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerAccount {
    pub id: String,
    pub name: String,
    /// Ceiling for the running tab.
    pub credit_limit: Money,
    /// Current fiado debt.
    pub balance: Money,
    pub loyalty_points: i64,
    pub created_at: DateTime<Utc>,
}

impl CustomerAccount {
    pub fn new(id: impl Into<String>, name: impl Into<String>, credit_limit: Money) -> Self {
        CustomerAccount {
            id: id.into(),
            name: name.into(),
            credit_limit,
            balance: Money::zero(),
            loyalty_points: 0,
            created_at: Utc::now(),
        }
    }
}

/// Loyalty accrual policy.
#[derive(Debug, Clone)]
pub struct LoyaltyPolicy {
    /// One point per this many cents of completed sale total.
    pub cents_per_point: i64,
}

impl Default for LoyaltyPolicy {
    fn default() -> Self {
        // 1 point per $100 spent
        LoyaltyPolicy {
            cents_per_point: 10_000,
        }
    }
}

// =============================================================================
// Module
// =============================================================================

/// The customers module.
pub struct CustomersModule {
    descriptor: ModuleDescriptor,
    bus: EventBus,
    storage: ModuleStore,
    policy: LoyaltyPolicy,
    inbox: EventInbox,
    subscription: Mutex<Option<SubscriptionId>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Serializes inbox processing between drain() and the worker, so a
    /// drain() that returns means every buffered event is fully applied.
    work_lock: Arc<tokio::sync::Mutex<()>>,
}

impl CustomersModule {
    pub fn new(bus: EventBus, store: Arc<OfflineStore>) -> Self {
        Self::with_policy(bus, store, LoyaltyPolicy::default())
    }

    pub fn with_policy(bus: EventBus, store: Arc<OfflineStore>, policy: LoyaltyPolicy) -> Self {
        CustomersModule {
            descriptor: ModuleDescriptor {
                id: MODULE_ID.to_string(),
                name: "Customers & Fiado".to_string(),
                version: "1.0.0".to_string(),
                dependencies: vec![CORE_MODULE_ID.to_string()],
                optional: true,
                monthly_price: Money::from_cents(650_000), // $6,500/month
                trial_days: 15,
                description: "Customer accounts, fiado ledger and loyalty".to_string(),
            },
            bus,
            storage: ModuleStore::new(store, MODULE_ID),
            policy,
            inbox: EventInbox::new(),
            subscription: Mutex::new(None),
            worker: Mutex::new(None),
            work_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    // =========================================================================
    // Public API
    // =========================================================================

    /// Creates or replaces a customer account.
    pub async fn upsert_customer(&self, account: &CustomerAccount) -> RuntimeResult<()> {
        self.storage
            .set(ACCOUNTS_COLLECTION, &account.id, account, false)
            .await?;
        Ok(())
    }

    pub async fn customer(&self, customer_id: &str) -> RuntimeResult<Option<CustomerAccount>> {
        Ok(self.storage.get(ACCOUNTS_COLLECTION, customer_id).await?)
    }

    /// Current fiado debt for a customer (zero when unknown).
    pub async fn balance_of(&self, customer_id: &str) -> RuntimeResult<Money> {
        Ok(self
            .customer(customer_id)
            .await?
            .map(|a| a.balance)
            .unwrap_or_else(Money::zero))
    }

    pub async fn loyalty_points_of(&self, customer_id: &str) -> RuntimeResult<i64> {
        Ok(self
            .customer(customer_id)
            .await?
            .map(|a| a.loyalty_points)
            .unwrap_or(0))
    }

    /// Records a payment against a customer's tab, clamped at zero debt.
    pub async fn record_payment(
        &self,
        customer_id: &str,
        amount: Money,
    ) -> RuntimeResult<Money> {
        let Some(mut account) = self.customer(customer_id).await? else {
            warn!(customer = %customer_id, "Payment for unknown customer ignored");
            return Ok(Money::zero());
        };

        account.balance = (account.balance - amount).max(Money::zero());
        self.storage
            .set(ACCOUNTS_COLLECTION, customer_id, &account, false)
            .await?;

        info!(customer = %customer_id, amount = %amount, balance = %account.balance, "Fiado payment received");
        self.bus.publish(
            PAYMENT_RECEIVED,
            MODULE_ID,
            json!({ "account": account, "amount": amount }),
        );

        Ok(account.balance)
    }

    /// Processes every buffered event now. The background worker does the
    /// same on a timer; tests call this directly for determinism. When this
    /// returns, everything that was buffered has been fully applied.
    pub async fn drain(&self) -> RuntimeResult<()> {
        let _processing = self.work_lock.lock().await;
        while let Some(event) = self.inbox.pop() {
            process_sale_completed(&self.storage, &self.bus, &self.policy, &event).await?;
        }
        Ok(())
    }
}

// =============================================================================
// Event Processing
// =============================================================================

/// Applies one `sale.completed` event: fiado booking + loyalty accrual.
async fn process_sale_completed(
    storage: &ModuleStore,
    bus: &EventBus,
    policy: &LoyaltyPolicy,
    event: &DomainEvent,
) -> RuntimeResult<()> {
    let sale: Sale = match serde_json::from_value(event.payload["sale"].clone()) {
        Ok(sale) => sale,
        Err(e) => {
            warn!(event_id = %event.id, error = %e, "sale.completed payload without a readable sale");
            return Ok(());
        }
    };

    let Some(customer_id) = sale.customer_ref.as_deref() else {
        debug!(sale_id = %sale.id, "Anonymous sale, nothing to do");
        return Ok(());
    };

    let Some(mut account) = storage
        .get::<CustomerAccount>(ACCOUNTS_COLLECTION, customer_id)
        .await?
    else {
        warn!(customer = %customer_id, sale_id = %sale.id, "Sale references unknown customer");
        return Ok(());
    };

    if sale.payment_method == Some(PaymentMethod::AccountCredit) {
        // Book the debt. The goods already left the store, so the
        // receivable is recorded even past the ceiling; the alert event
        // below is the signal to stop extending credit.
        account.balance += sale.total;
        info!(
            customer = %customer_id,
            amount = %sale.total,
            balance = %account.balance,
            "Fiado granted"
        );
        bus.publish(
            FIADO_GRANTED,
            MODULE_ID,
            json!({ "account": account, "sale": sale }),
        );

        if account.balance > account.credit_limit {
            warn!(
                customer = %customer_id,
                balance = %account.balance,
                limit = %account.credit_limit,
                "Credit limit exceeded"
            );
            bus.publish(
                CREDIT_LIMIT_EXCEEDED,
                MODULE_ID,
                json!({
                    "account": account,
                    "saleId": sale.id,
                }),
            );
        }
    }

    let earned = sale.total.cents() / policy.cents_per_point;
    if earned > 0 {
        account.loyalty_points += earned;
        debug!(customer = %customer_id, earned, "Loyalty points accrued");
    }

    storage
        .set(ACCOUNTS_COLLECTION, customer_id, &account, false)
        .await?;

    Ok(())
}

// =============================================================================
// Module Trait
// =============================================================================

#[async_trait]
impl Module for CustomersModule {
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

        let inbox = self.inbox.clone();
        let storage = self.storage.clone();
        let bus = self.bus.clone();
        let policy = self.policy.clone();
        let work_lock = self.work_lock.clone();
        let handle = tokio::spawn(async move {
            loop {
                {
                    let _processing = work_lock.lock().await;
                    while let Some(event) = inbox.pop() {
                        if let Err(e) =
                            process_sale_completed(&storage, &bus, &policy, &event).await
                        {
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

#[cfg(test)]
mod tests {
    use super::*;
    use almacen_core::SaleStatus;
    use almacen_runtime::ModuleHost;
    use almacen_store::StoreConfig;
    use uuid::Uuid;

    fn completed_sale(
        total_cents: i64,
        method: PaymentMethod,
        customer: Option<&str>,
    ) -> Sale {
        let mut sale = Sale::new(Uuid::new_v4().to_string(), Utc::now());
        sale.total = Money::from_cents(total_cents);
        sale.subtotal = sale.total;
        sale.status = SaleStatus::Completed;
        sale.payment_method = Some(method);
        sale.customer_ref = customer.map(str::to_string);
        sale.completed_at = Some(Utc::now());
        sale
    }

    async fn installed_module() -> (EventBus, Arc<CustomersModule>, ModuleHost) {
        let bus = EventBus::new();
        let store = Arc::new(OfflineStore::open(StoreConfig::fallback_only()).await);
        let module = Arc::new(CustomersModule::new(bus.clone(), store.clone()));
        let host = ModuleHost::new(module.clone(), bus.clone(), store);
        host.activate().await.unwrap();
        (bus, module, host)
    }

    fn publish_sale(bus: &EventBus, sale: &Sale) {
        bus.publish(
            events::SALE_COMPLETED,
            CORE_MODULE_ID,
            json!({ "sale": sale }),
        );
    }

    #[tokio::test]
    async fn test_fiado_sale_books_debt() {
        let (bus, module, _host) = installed_module().await;
        module
            .upsert_customer(&CustomerAccount::new(
                "cust-1",
                "Doña Rosa",
                Money::from_cents(1_000_000),
            ))
            .await
            .unwrap();

        publish_sale(
            &bus,
            &completed_sale(250_000, PaymentMethod::AccountCredit, Some("cust-1")),
        );
        module.drain().await.unwrap();

        assert_eq!(
            module.balance_of("cust-1").await.unwrap(),
            Money::from_cents(250_000)
        );
        // Under the ceiling: no alert event.
        assert!(!bus
            .history(Some(MODULE_ID), None)
            .iter()
            .any(|e| e.event_type == CREDIT_LIMIT_EXCEEDED));
    }

    #[tokio::test]
    async fn test_over_ceiling_books_and_alerts() {
        let (bus, module, _host) = installed_module().await;
        module
            .upsert_customer(&CustomerAccount::new(
                "cust-1",
                "Doña Rosa",
                Money::from_cents(100_000),
            ))
            .await
            .unwrap();

        publish_sale(
            &bus,
            &completed_sale(150_000, PaymentMethod::AccountCredit, Some("cust-1")),
        );
        module.drain().await.unwrap();

        // The receivable is still booked...
        assert_eq!(
            module.balance_of("cust-1").await.unwrap(),
            Money::from_cents(150_000)
        );
        // ...and the ceiling breach was announced.
        assert!(bus
            .history(Some(MODULE_ID), None)
            .iter()
            .any(|e| e.event_type == CREDIT_LIMIT_EXCEEDED));
    }

    #[tokio::test]
    async fn test_cash_sale_accrues_loyalty_only() {
        let (bus, module, _host) = installed_module().await;
        module
            .upsert_customer(&CustomerAccount::new(
                "cust-1",
                "Doña Rosa",
                Money::from_cents(1_000_000),
            ))
            .await
            .unwrap();

        // $3085.50 at 1 point per $100 = 30 points
        publish_sale(
            &bus,
            &completed_sale(308_550, PaymentMethod::Cash, Some("cust-1")),
        );
        module.drain().await.unwrap();

        assert_eq!(module.loyalty_points_of("cust-1").await.unwrap(), 30);
        assert!(module.balance_of("cust-1").await.unwrap().is_zero());
    }

    #[tokio::test]
    async fn test_payment_reduces_debt_clamped_at_zero() {
        let (_bus, module, _host) = installed_module().await;
        let mut account =
            CustomerAccount::new("cust-1", "Doña Rosa", Money::from_cents(1_000_000));
        account.balance = Money::from_cents(80_000);
        module.upsert_customer(&account).await.unwrap();

        let balance = module
            .record_payment("cust-1", Money::from_cents(50_000))
            .await
            .unwrap();
        assert_eq!(balance, Money::from_cents(30_000));

        let balance = module
            .record_payment("cust-1", Money::from_cents(100_000))
            .await
            .unwrap();
        assert!(balance.is_zero());
    }

    #[tokio::test]
    async fn test_anonymous_and_unknown_customers_ignored() {
        let (bus, module, _host) = installed_module().await;

        publish_sale(&bus, &completed_sale(100_000, PaymentMethod::Cash, None));
        publish_sale(
            &bus,
            &completed_sale(100_000, PaymentMethod::AccountCredit, Some("ghost")),
        );
        module.drain().await.unwrap();

        assert!(module.customer("ghost").await.unwrap().is_none());
    }
}
