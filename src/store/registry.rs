use std::collections::HashMap;
use std::sync::Arc;

use super::{DataStore, MemoryStore};
use crate::error::StoreError;

/// Constructs a store from its configuration string.
pub type StoreFactory = Arc<dyn Fn(&str) -> Result<Box<dyn DataStore>, StoreError> + Send + Sync>;

/// Maps store type tags to constructors. The host builds one at startup and
/// resolves its configured stores through it.
#[derive(Clone)]
pub struct StoreRegistry {
    factories: HashMap<String, StoreFactory>,
}

impl StoreRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&str) -> Result<Box<dyn DataStore>, StoreError> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
        self
    }

    pub fn create(&self, kind: &str, config: &str) -> Result<Box<dyn DataStore>, StoreError> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| StoreError::UnknownType(kind.to_string()))?;
        factory(config)
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort();
        kinds
    }
}

impl Default for StoreRegistry {
    /// A registry knowing the built-in `memory` store.
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register("memory", |_| Ok(Box::new(MemoryStore::new())));
        registry
    }
}
