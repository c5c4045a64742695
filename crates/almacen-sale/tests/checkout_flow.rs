//! End-to-end platform tests: the sale module driving the event bus and
//! the offline store, with the paid modules reacting through their own
//! subscriptions.
//!
//! This file is also the event-name contract test: the inventory and
//! customers modules subscribe through the canonical constants, and a real
//! checkout here proves the events they listen for are the events the
//! orchestrator actually publishes.

use std::sync::Arc;
use std::time::Duration;

use almacen_core::{
    Money, PaymentMethod, PaymentOutcome, PaymentRequest, Product, SaleStatus, TaxRate,
};
use almacen_customers::{CustomerAccount, CustomersModule};
use almacen_inventory::InventoryModule;
use almacen_runtime::{events, EventBus, ModuleState, Platform, CORE_MODULE_ID};
use almacen_sale::{PaymentConfig, SaleConfig, SaleError, SaleModule};
use almacen_store::{OfflineStore, StoreConfig};
use almacen_sync::{MemoryRemote, Reconciler, SyncSettings};

struct Terminal {
    platform: Platform,
    sale: Arc<SaleModule>,
    inventory: Arc<InventoryModule>,
    customers: Arc<CustomersModule>,
}

async fn terminal() -> Terminal {
    terminal_with(PaymentConfig::instant()).await
}

async fn terminal_with(payment: PaymentConfig) -> Terminal {
    // RUST_LOG=debug makes a failing flow readable; repeated init is fine.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let bus = EventBus::new();
    let store = Arc::new(OfflineStore::open(StoreConfig::in_memory()).await);

    let sale = Arc::new(
        SaleModule::new(
            bus.clone(),
            store.clone(),
            SaleConfig {
                payment,
                ..SaleConfig::default()
            },
        )
        .await
        .expect("sale module"),
    );
    let inventory = Arc::new(InventoryModule::new(bus.clone(), store.clone()));
    let customers = Arc::new(CustomersModule::new(bus.clone(), store.clone()));

    let mut platform = Platform::new(bus, store);
    platform.register(sale.clone()).expect("register pos-core");
    platform
        .register(inventory.clone())
        .expect("register inventory");
    platform
        .register(customers.clone())
        .expect("register customers");
    platform.activate_all().await.expect("activate all");

    Terminal {
        platform,
        sale,
        inventory,
        customers,
    }
}

fn bread() -> Product {
    Product {
        id: "bread".to_string(),
        name: "Pan lactal".to_string(),
        price: Money::from_major_minor(850, 0),
        tax_rate: TaxRate::from_bps(2100), // 21% IVA
        category: Some("panaderia".to_string()),
        barcode: None,
        is_active: true,
    }
}

fn cash(amount: Money) -> PaymentRequest {
    PaymentRequest {
        method: PaymentMethod::Cash,
        amount,
        customer_ref: None,
    }
}

#[tokio::test]
async fn bread_scenario_totals_change_and_status() {
    let t = terminal().await;

    t.sale.start_sale().await.unwrap();
    t.sale.add_product(&bread(), 2).await.unwrap();
    let view = t.sale.add_product(&bread(), 1).await.unwrap();

    // One merged line, qty 3.
    assert_eq!(view.items.len(), 1);
    assert_eq!(view.items[0].quantity, 3);
    assert_eq!(view.item_count, 3);
    assert_eq!(view.subtotal, Money::from_major_minor(2550, 0));
    assert_eq!(view.tax, Money::from_major_minor(535, 50));
    assert_eq!(view.total, Money::from_major_minor(3085, 50));

    // Cash 3100.00: success with change 14.50.
    let outcome = t
        .sale
        .checkout(cash(Money::from_major_minor(3100, 0)))
        .await
        .unwrap();
    match outcome {
        PaymentOutcome::Success { change, .. } => {
            assert_eq!(change, Some(Money::from_major_minor(14, 50)));
        }
        other => panic!("expected success, got {other:?}"),
    }

    // The sale is completed, persisted, and the stats see it.
    let stats = t.sale.sales_stats(1).await.unwrap();
    assert_eq!(stats.count, 1);
    assert_eq!(stats.total_amount, Money::from_major_minor(3085, 50));
}

#[tokio::test]
async fn event_sequence_for_a_completed_sale() {
    let t = terminal().await;

    t.sale.start_sale().await.unwrap();
    t.sale.add_product(&bread(), 1).await.unwrap();
    let total = t.sale.cart_state().await.total;
    t.sale.checkout(cash(total)).await.unwrap();

    let names: Vec<String> = t
        .platform
        .bus()
        .history(Some(CORE_MODULE_ID), None)
        .into_iter()
        .map(|e| e.event_type)
        .collect();

    assert_eq!(
        names,
        vec![
            events::MODULE_INSTALLED,
            events::MODULE_ACTIVATED,
            events::SALE_STARTED,
            events::PAYMENT_STARTED,
            events::PAYMENT_COMPLETED,
            events::SALE_COMPLETED,
        ]
    );
}

/// The contract test for the event surface: a real checkout must actually
/// reach the modules that subscribe to `sale.completed`.
#[tokio::test]
async fn paid_modules_react_to_a_completed_sale() {
    let t = terminal().await;

    t.inventory
        .set_stock("bread", "Pan lactal", 10, 2)
        .await
        .unwrap();
    t.customers
        .upsert_customer(&CustomerAccount::new(
            "cust-1",
            "Doña Rosa",
            Money::from_major_minor(50_000, 0),
        ))
        .await
        .unwrap();

    t.sale.start_sale().await.unwrap();
    t.sale.add_product(&bread(), 3).await.unwrap();
    let total = t.sale.cart_state().await.total;

    let outcome = t
        .sale
        .checkout(PaymentRequest {
            method: PaymentMethod::AccountCredit,
            amount: total,
            customer_ref: Some("cust-1".to_string()),
        })
        .await
        .unwrap();
    assert!(outcome.is_success());

    // Side effects are asynchronous; drain deterministically.
    t.inventory.drain().await.unwrap();
    t.customers.drain().await.unwrap();

    // Stock decremented by the sold quantity.
    let level = t.inventory.stock_of("bread").await.unwrap().unwrap();
    assert_eq!(level.on_hand, 7);

    // Fiado debt booked for the full sale total.
    assert_eq!(t.customers.balance_of("cust-1").await.unwrap(), total);
    // $3085.50 at 1 point per $100 = 30 points.
    assert_eq!(t.customers.loyalty_points_of("cust-1").await.unwrap(), 30);
}

#[tokio::test]
async fn cancelled_sales_trigger_no_side_effects() {
    let t = terminal().await;
    t.inventory
        .set_stock("bread", "Pan lactal", 10, 2)
        .await
        .unwrap();

    t.sale.start_sale().await.unwrap();
    t.sale.add_product(&bread(), 3).await.unwrap();
    let cancelled = t.sale.cancel_sale().await.unwrap();
    assert_eq!(cancelled.status, SaleStatus::Cancelled);

    t.inventory.drain().await.unwrap();
    assert_eq!(
        t.inventory.stock_of("bread").await.unwrap().unwrap().on_hand,
        10
    );
}

#[tokio::test]
async fn modules_report_active_after_platform_start() {
    let t = terminal().await;
    for id in [CORE_MODULE_ID, "inventory", "customers"] {
        let host = t.platform.host(id).expect("registered");
        assert_eq!(host.state().await, ModuleState::Active);
    }

    // Licensing at the platform boundary.
    assert!(t.platform.host(CORE_MODULE_ID).unwrap().validate_license(""));
    assert!(t
        .platform
        .host("inventory")
        .unwrap()
        .validate_license("POS-INVENTORY-202608-A1B2C3"));
    assert!(!t.platform.host("inventory").unwrap().validate_license("nope"));
}

/// Selling with no network: the sale lands in the queue, reconnecting
/// drains it to the remote source in order.
#[tokio::test]
async fn offline_sale_reconciles_after_reconnect() {
    let t = terminal().await;
    let store = t.platform.store().clone();

    store.set_online(false);
    t.sale.start_sale().await.unwrap();
    t.sale.add_product(&bread(), 1).await.unwrap();
    let total = t.sale.cart_state().await.total;
    let outcome = t.sale.checkout(cash(total)).await.unwrap();
    assert!(outcome.is_success());

    // The completed sale (and the offline cart writes) are queued.
    let pending = store.drain_sync_queue(50).await.unwrap();
    assert!(!pending.is_empty());
    let sale_entries: Vec<_> = pending
        .iter()
        .filter(|e| e.collection == format!("{CORE_MODULE_ID}:sales"))
        .collect();
    assert_eq!(sale_entries.len(), 1);

    // Reconnect and drain everything.
    store.set_online(true);
    let remote = Arc::new(MemoryRemote::new());
    let (reconciler, _handle) = Reconciler::new(
        store.clone(),
        remote.clone(),
        SyncSettings::default(),
    );
    let report = reconciler.flush_once().await.unwrap();
    assert!(report.made_progress());
    assert_eq!(report.failed, 0);
    assert_eq!(store.pending_sync_count().await.unwrap(), 0);

    // The sale reached the authoritative store.
    let uploaded = remote
        .record(&format!("{CORE_MODULE_ID}:sales"), &sale_entries[0].key)
        .expect("sale uploaded");
    assert_eq!(uploaded["status"], "completed");
    assert!(store.sync_status().await.unwrap().last_sync_at.is_some());
}

/// Cancel during an in-flight checkout waits on the session and is then
/// rejected: the race is structurally disallowed.
#[tokio::test]
async fn cancel_during_checkout_is_rejected() {
    let t = terminal_with(PaymentConfig {
        cash_delay: Duration::from_millis(150),
        ..PaymentConfig::instant()
    })
    .await;

    t.sale.start_sale().await.unwrap();
    t.sale.add_product(&bread(), 1).await.unwrap();
    let total = t.sale.cart_state().await.total;

    let sale = t.sale.clone();
    let checkout = tokio::spawn(async move { sale.checkout(cash(total)).await });

    // Let the checkout take the session lock, then try to cancel.
    tokio::time::sleep(Duration::from_millis(30)).await;
    let cancel_result = t.sale.cancel_sale().await;

    let outcome = checkout.await.unwrap().unwrap();
    assert!(outcome.is_success());
    assert!(matches!(cancel_result, Err(SaleError::NoActiveSale)));
}

/// A fresh terminal process over the same store picks up the in-progress
/// cart (crash recovery inside the freshness window).
#[tokio::test]
async fn cart_survives_process_restart() {
    let bus = EventBus::new();
    let store = Arc::new(OfflineStore::open(StoreConfig::fallback_only()).await);

    {
        let sale = SaleModule::new(
            bus.clone(),
            store.clone(),
            SaleConfig {
                payment: PaymentConfig::instant(),
                ..SaleConfig::default()
            },
        )
        .await
        .unwrap();
        sale.start_sale().await.unwrap();
        sale.add_product(&bread(), 2).await.unwrap();
    }

    // "Restart": a new module over the same store.
    let sale = SaleModule::new(
        bus,
        store,
        SaleConfig {
            payment: PaymentConfig::instant(),
            ..SaleConfig::default()
        },
    )
    .await
    .unwrap();

    let view = sale.cart_state().await;
    assert_eq!(view.items.len(), 1);
    assert_eq!(view.items[0].quantity, 2);
    assert_eq!(view.total, Money::from_major_minor(2057, 0)); // 1700 + 21%
}
