//! # Module Runtime
//!
//! The abstract lifecycle every concrete module extends. A module brings
//! its own `install`/`uninstall` behavior; the host owns the state machine,
//! serializes transitions, and announces them on the bus.
//!
//! ## Lifecycle State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   Uninstalled ──activate()──► Installed ──────► Active                 │
//! │        ▲                         │                │  ▲                  │
//! │        │                         │          deactivate() activate()    │
//! │        │                         ▼                ▼  │                  │
//! │        └────────uninstall()── Deactivated ◄──────────┘                 │
//! │                                                                         │
//! │  • activate() installs first when needed (idempotent in effect)        │
//! │  • uninstall() is legal only from Installed / Deactivated              │
//! │  • deactivate() only flips the flag; subscriptions are NOT torn down   │
//! │                                                                         │
//! │  Transitions are serialized behind a per-module async mutex: two       │
//! │  concurrent activate() calls cannot both observe Uninstalled and       │
//! │  both run install().                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::info;

use almacen_core::ModuleDescriptor;
use almacen_store::{Collection, OfflineStore, StoreResult, SyncOperation, SyncQueueEntry};

use crate::bus::EventBus;
use crate::error::{RuntimeError, RuntimeResult};
use crate::{events, license};

// =============================================================================
// Module State
// =============================================================================

/// Lifecycle state of a module instance.
///
/// Owned exclusively by the module's host; transitions are driven only by
/// the host's lifecycle methods, never forced externally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Uninstalled,
    Installed,
    Active,
    Deactivated,
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModuleState::Uninstalled => "uninstalled",
            ModuleState::Installed => "installed",
            ModuleState::Active => "active",
            ModuleState::Deactivated => "deactivated",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Module Storage
// =============================================================================

/// A module's private, namespaced view of the shared offline store.
///
/// Collections are keyed by (module id, collection name) so two modules
/// can both have a `config` collection without colliding.
#[derive(Clone)]
pub struct ModuleStore {
    store: Arc<OfflineStore>,
    module_id: String,
}

impl ModuleStore {
    pub fn new(store: Arc<OfflineStore>, module_id: impl Into<String>) -> Self {
        ModuleStore {
            store,
            module_id: module_id.into(),
        }
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// The namespaced collection handle for this module.
    pub fn collection(&self, name: &str) -> Collection {
        Collection::new(self.module_id.clone(), name)
    }

    /// The shared store, for cross-cutting operations (sync status).
    pub fn raw(&self) -> &Arc<OfflineStore> {
        &self.store
    }

    pub async fn set<T: Serialize>(
        &self,
        collection: &str,
        key: &str,
        value: &T,
        from_remote: bool,
    ) -> StoreResult<()> {
        self.store
            .set(&self.collection(collection), key, value, from_remote)
            .await
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        collection: &str,
        key: &str,
    ) -> StoreResult<Option<T>> {
        self.store.get(&self.collection(collection), key).await
    }

    pub async fn get_record<T: DeserializeOwned>(
        &self,
        collection: &str,
        key: &str,
    ) -> StoreResult<Option<almacen_store::StoredRecord<T>>> {
        self.store
            .get_record(&self.collection(collection), key)
            .await
    }

    pub async fn get_all<T: DeserializeOwned>(&self, collection: &str) -> StoreResult<Vec<T>> {
        self.store.get_all(&self.collection(collection)).await
    }

    pub async fn delete(&self, collection: &str, key: &str) -> StoreResult<()> {
        self.store.delete(&self.collection(collection), key).await
    }

    pub async fn enqueue_sync(
        &self,
        operation: SyncOperation,
        collection: &str,
        key: &str,
        payload: Option<Value>,
    ) -> StoreResult<SyncQueueEntry> {
        self.store
            .enqueue_sync(operation, &self.collection(collection), key, payload)
            .await
    }
}

// =============================================================================
// Module Context
// =============================================================================

/// What the runtime hands a module: the shared bus and the module's
/// private storage namespace.
#[derive(Clone)]
pub struct ModuleContext {
    pub bus: EventBus,
    pub storage: ModuleStore,
}

// =============================================================================
// Module Trait
// =============================================================================

/// The capability set every module implements.
///
/// Lifecycle state does NOT live here: modules implement the hooks, the
/// [`ModuleHost`] drives them and owns the state machine.
#[async_trait]
pub trait Module: Send + Sync {
    /// The module's immutable descriptor.
    fn descriptor(&self) -> &ModuleDescriptor;

    /// Module version (from the descriptor by default).
    fn version(&self) -> &str {
        &self.descriptor().version
    }

    /// One-time setup: storage initialization, event subscriptions.
    async fn install(&self, ctx: &ModuleContext) -> RuntimeResult<()>;

    /// Teardown: unsubscribe, flush state.
    async fn uninstall(&self, ctx: &ModuleContext) -> RuntimeResult<()>;
}

// =============================================================================
// Module Host
// =============================================================================

/// Owns one module instance, its lifecycle state, and its context.
///
/// The async mutex around the state is the serialization the contract
/// requires: lifecycle transitions for one module never interleave.
pub struct ModuleHost {
    module: Arc<dyn Module>,
    ctx: ModuleContext,
    state: Mutex<ModuleState>,
}

impl std::fmt::Debug for ModuleHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleHost")
            .field("module_id", &self.module_id())
            .finish()
    }
}

impl ModuleHost {
    pub fn new(module: Arc<dyn Module>, bus: EventBus, store: Arc<OfflineStore>) -> Self {
        let module_id = module.descriptor().id.clone();
        ModuleHost {
            ctx: ModuleContext {
                bus,
                storage: ModuleStore::new(store, module_id),
            },
            module,
            state: Mutex::new(ModuleState::Uninstalled),
        }
    }

    pub fn module_id(&self) -> &str {
        &self.module.descriptor().id
    }

    /// The module's configuration descriptor (`getConfig` at the module
    /// boundary).
    pub fn descriptor(&self) -> &ModuleDescriptor {
        self.module.descriptor()
    }

    pub fn version(&self) -> &str {
        self.module.version()
    }

    pub fn context(&self) -> &ModuleContext {
        &self.ctx
    }

    pub async fn state(&self) -> ModuleState {
        *self.state.lock().await
    }

    /// Validates a license token against this module's id.
    /// Pure predicate; the core module is always valid.
    pub fn validate_license(&self, token: &str) -> bool {
        license::validate(self.module_id(), token)
    }

    /// Activates the module, installing it first when necessary.
    ///
    /// Idempotent in effect: activating an Active module is a no-op.
    pub async fn activate(&self) -> RuntimeResult<()> {
        let mut state = self.state.lock().await;

        if *state == ModuleState::Active {
            return Ok(());
        }

        if *state == ModuleState::Uninstalled {
            self.module.install(&self.ctx).await?;
            *state = ModuleState::Installed;
            info!(module = %self.module_id(), "Module installed");
            self.publish_lifecycle(events::MODULE_INSTALLED);
        }

        *state = ModuleState::Active;
        info!(module = %self.module_id(), "Module activated");
        self.publish_lifecycle(events::MODULE_ACTIVATED);
        Ok(())
    }

    /// Deactivates the module. Only flips the active flag and announces
    /// it; event subscriptions stay in place until uninstall.
    pub async fn deactivate(&self) -> RuntimeResult<()> {
        let mut state = self.state.lock().await;

        if *state != ModuleState::Active {
            return Err(RuntimeError::InvalidTransition {
                module: self.module_id().to_string(),
                from: *state,
                action: "deactivate",
            });
        }

        *state = ModuleState::Deactivated;
        info!(module = %self.module_id(), "Module deactivated");
        self.publish_lifecycle(events::MODULE_DEACTIVATED);
        Ok(())
    }

    /// Uninstalls the module. Legal only from Installed or Deactivated;
    /// an Active module must be deactivated first.
    pub async fn uninstall(&self) -> RuntimeResult<()> {
        let mut state = self.state.lock().await;

        match *state {
            ModuleState::Installed | ModuleState::Deactivated => {
                self.module.uninstall(&self.ctx).await?;
                *state = ModuleState::Uninstalled;
                info!(module = %self.module_id(), "Module uninstalled");
                self.publish_lifecycle(events::MODULE_UNINSTALLED);
                Ok(())
            }
            from => Err(RuntimeError::InvalidTransition {
                module: self.module_id().to_string(),
                from,
                action: "uninstall",
            }),
        }
    }

    fn publish_lifecycle(&self, event_type: &str) {
        self.ctx.bus.publish(
            event_type,
            self.module_id(),
            json!({
                "moduleId": self.module_id(),
                "descriptor": self.descriptor(),
            }),
        );
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use almacen_core::Money;
    use almacen_store::StoreConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingModule {
        descriptor: ModuleDescriptor,
        installs: AtomicUsize,
        uninstalls: AtomicUsize,
    }

    impl CountingModule {
        fn new(id: &str) -> Self {
            CountingModule {
                descriptor: ModuleDescriptor {
                    id: id.to_string(),
                    name: format!("Test {id}"),
                    version: "1.0.0".to_string(),
                    dependencies: vec![],
                    optional: true,
                    monthly_price: Money::from_cents(500_000),
                    trial_days: 30,
                    description: "test module".to_string(),
                },
                installs: AtomicUsize::new(0),
                uninstalls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Module for CountingModule {
        fn descriptor(&self) -> &ModuleDescriptor {
            &self.descriptor
        }

        async fn install(&self, _ctx: &ModuleContext) -> RuntimeResult<()> {
            self.installs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn uninstall(&self, _ctx: &ModuleContext) -> RuntimeResult<()> {
            self.uninstalls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn host_with(module: Arc<CountingModule>) -> ModuleHost {
        let store = Arc::new(OfflineStore::open(StoreConfig::fallback_only()).await);
        ModuleHost::new(module, EventBus::new(), store)
    }

    #[tokio::test]
    async fn test_activate_installs_first() {
        let module = Arc::new(CountingModule::new("inventory"));
        let host = host_with(module.clone()).await;

        assert_eq!(host.state().await, ModuleState::Uninstalled);
        host.activate().await.unwrap();
        assert_eq!(host.state().await, ModuleState::Active);
        assert_eq!(module.installs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_activate_is_idempotent_in_effect() {
        let module = Arc::new(CountingModule::new("inventory"));
        let host = host_with(module.clone()).await;

        host.activate().await.unwrap();
        host.activate().await.unwrap();
        host.activate().await.unwrap();
        assert_eq!(module.installs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_activation_installs_once() {
        let module = Arc::new(CountingModule::new("inventory"));
        let host = Arc::new(host_with(module.clone()).await);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let host = host.clone();
            tasks.push(tokio::spawn(async move { host.activate().await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(module.installs.load(Ordering::SeqCst), 1);
        assert_eq!(host.state().await, ModuleState::Active);
    }

    #[tokio::test]
    async fn test_deactivate_reactivate_cycle() {
        let module = Arc::new(CountingModule::new("inventory"));
        let host = host_with(module.clone()).await;

        host.activate().await.unwrap();
        host.deactivate().await.unwrap();
        assert_eq!(host.state().await, ModuleState::Deactivated);

        // Reactivation does not reinstall
        host.activate().await.unwrap();
        assert_eq!(host.state().await, ModuleState::Active);
        assert_eq!(module.installs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_uninstall_requires_inactive() {
        let module = Arc::new(CountingModule::new("inventory"));
        let host = host_with(module.clone()).await;

        host.activate().await.unwrap();
        assert!(matches!(
            host.uninstall().await,
            Err(RuntimeError::InvalidTransition { .. })
        ));

        host.deactivate().await.unwrap();
        host.uninstall().await.unwrap();
        assert_eq!(host.state().await, ModuleState::Uninstalled);
        assert_eq!(module.uninstalls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deactivate_from_uninstalled_is_invalid() {
        let host = host_with(Arc::new(CountingModule::new("inventory"))).await;
        assert!(matches!(
            host.deactivate().await,
            Err(RuntimeError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_lifecycle_events_published() {
        let module = Arc::new(CountingModule::new("inventory"));
        let store = Arc::new(OfflineStore::open(StoreConfig::fallback_only()).await);
        let bus = EventBus::new();
        let host = ModuleHost::new(module, bus.clone(), store);

        host.activate().await.unwrap();
        host.deactivate().await.unwrap();
        host.uninstall().await.unwrap();

        let names: Vec<String> = bus
            .history(Some("inventory"), None)
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(
            names,
            vec![
                events::MODULE_INSTALLED,
                events::MODULE_ACTIVATED,
                events::MODULE_DEACTIVATED,
                events::MODULE_UNINSTALLED,
            ]
        );
    }

    #[tokio::test]
    async fn test_module_store_namespacing() {
        let store = Arc::new(OfflineStore::open(StoreConfig::fallback_only()).await);
        let a = ModuleStore::new(store.clone(), "mod-a");
        let b = ModuleStore::new(store.clone(), "mod-b");

        a.set("config", "k", &1i64, false).await.unwrap();
        b.set("config", "k", &2i64, false).await.unwrap();

        assert_eq!(a.get::<i64>("config", "k").await.unwrap(), Some(1));
        assert_eq!(b.get::<i64>("config", "k").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_license_through_host() {
        let host = host_with(Arc::new(CountingModule::new("inventory"))).await;
        assert!(host.validate_license("POS-INVENTORY-202608-A1B2C3"));
        assert!(!host.validate_license("POS-INVENTORY-BAD"));
    }
}
