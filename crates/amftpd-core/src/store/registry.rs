//! Explicit registry of user-store backends.
//!
//! Backends never register themselves. The composition root creates a
//! registry, calls [`StoreRegistry::register`] for each backend it wants to
//! offer, and then opens the one named by configuration.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::StoreConfig;

use super::{MemoryUserStore, SqliteUserStore, StoreError, StoreResult, UserStore};

/// Builds a store from its configuration.
pub type StoreFactory = Arc<dyn Fn(&StoreConfig) -> StoreResult<Arc<dyn UserStore>> + Send + Sync>;

/// Name → factory map for store backends.
#[derive(Default)]
pub struct StoreRegistry {
    factories: HashMap<String, StoreFactory>,
}

impl std::fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("backends", &self.list())
            .finish()
    }
}

impl StoreRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend factory. Re-registering a name replaces it.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&StoreConfig) -> StoreResult<Arc<dyn UserStore>> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.factories.insert(name.clone(), Arc::new(factory)).is_some() {
            tracing::warn!(backend = %name, "replaced store backend registration");
        } else {
            tracing::debug!(backend = %name, "registered store backend");
        }
    }

    /// Register the backends shipped with this crate: `memory` and `sqlite`.
    pub fn register_builtin(&mut self) {
        self.register("memory", |_config: &StoreConfig| Ok(MemoryUserStore::shared()));
        self.register("sqlite", |config: &StoreConfig| {
            let path = config.path.as_ref().ok_or_else(|| {
                StoreError::InvalidConfig("sqlite backend requires a path".into())
            })?;
            Ok(SqliteUserStore::open(path)?.shared())
        });
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered backend names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Open the backend named by `config.backend`.
    pub fn open(&self, config: &StoreConfig) -> StoreResult<Arc<dyn UserStore>> {
        let factory = self
            .factories
            .get(&config.backend)
            .ok_or_else(|| StoreError::UnknownBackend(config.backend.clone()))?;
        let store = factory(config)?;
        tracing::info!(backend = %config.backend, "opened user store");
        Ok(store)
    }
}
