//! # Runtime Error Types

use thiserror::Error;

use crate::module::ModuleState;

/// Result type alias for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors from the module runtime and platform.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A module with this id is already registered.
    #[error("Module already registered: {0}")]
    AlreadyRegistered(String),

    /// A declared dependency is not registered on the platform.
    #[error("Module {module} depends on {dependency}, which is not registered")]
    MissingDependency { module: String, dependency: String },

    /// The requested lifecycle transition is not legal from the current
    /// state (e.g. uninstalling an Active module).
    #[error("Module {module} is {from}, cannot {action}")]
    InvalidTransition {
        module: String,
        from: ModuleState,
        action: &'static str,
    },

    /// A module's install/uninstall hook failed.
    #[error("Module {module} lifecycle hook failed: {reason}")]
    LifecycleFailed { module: String, reason: String },

    /// Persistence failure bubbled up from a module's storage.
    #[error("Storage error: {0}")]
    Storage(#[from] almacen_store::StoreError),

    /// Payload (de)serialization failure.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
