//! # Platform Composition Root
//!
//! Wires the single per-process event bus and offline store to the
//! registered module hosts. The bus and store are constructed once here and
//! injected everywhere; nothing in the workspace reaches for a global.
//!
//! ## Registration Rules
//! - Module ids are unique
//! - A module's declared dependencies must already be registered
//!   (dependents register after their dependencies, so `activate_all`
//!   activates them in a valid order)

use std::sync::Arc;

use tracing::info;

use almacen_core::ModuleDescriptor;
use almacen_store::OfflineStore;

use crate::bus::EventBus;
use crate::error::{RuntimeError, RuntimeResult};
use crate::module::{Module, ModuleHost};

/// The application composition root: one bus, one store, the module set.
pub struct Platform {
    bus: EventBus,
    store: Arc<OfflineStore>,
    hosts: Vec<Arc<ModuleHost>>,
}

impl Platform {
    pub fn new(bus: EventBus, store: Arc<OfflineStore>) -> Self {
        Platform {
            bus,
            store,
            hosts: Vec::new(),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn store(&self) -> &Arc<OfflineStore> {
        &self.store
    }

    /// Registers a module, validating id uniqueness and dependency edges.
    /// Returns the host that drives the module's lifecycle.
    pub fn register(&mut self, module: Arc<dyn Module>) -> RuntimeResult<Arc<ModuleHost>> {
        let descriptor = module.descriptor().clone();

        if self.host(&descriptor.id).is_some() {
            return Err(RuntimeError::AlreadyRegistered(descriptor.id));
        }

        for dependency in &descriptor.dependencies {
            if self.host(dependency).is_none() {
                return Err(RuntimeError::MissingDependency {
                    module: descriptor.id.clone(),
                    dependency: dependency.clone(),
                });
            }
        }

        info!(module = %descriptor.id, version = %descriptor.version, "Module registered");

        let host = Arc::new(ModuleHost::new(
            module,
            self.bus.clone(),
            self.store.clone(),
        ));
        self.hosts.push(host.clone());
        Ok(host)
    }

    /// The host for a module id, if registered.
    pub fn host(&self, module_id: &str) -> Option<&Arc<ModuleHost>> {
        self.hosts.iter().find(|h| h.module_id() == module_id)
    }

    /// Descriptors of every registered module, in registration order.
    pub fn descriptors(&self) -> Vec<&ModuleDescriptor> {
        self.hosts.iter().map(|h| h.descriptor()).collect()
    }

    /// Activates every registered module in registration order.
    ///
    /// Registration already guarantees dependencies come first.
    pub async fn activate_all(&self) -> RuntimeResult<()> {
        for host in &self.hosts {
            host.activate().await?;
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
