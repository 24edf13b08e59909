use std::any::Any;
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{DataStore, Version, Versioned};
use crate::core::Value;
use crate::error::StoreError;

/// In-memory store keeping every saved version of every channel.
///
/// Memory has nothing persisted behind it, so releasing a channel drops it
/// altogether.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<String, Vec<(Version, Value)>>>,
    counter: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a channel, typically a free input of the graph.
    pub fn with<T: Any + Send + Sync>(mut self, name: impl Into<String>, value: T) -> Self {
        let version = self.next_version();
        let data = match self.data.get_mut() {
            Ok(data) => data,
            Err(poisoned) => poisoned.into_inner(),
        };
        data.entry(name.into()).or_default().push((version, Value::new(value)));
        self
    }

    /// Saves `value` and returns the version it was saved under.
    pub fn insert(&self, name: &str, value: Value) -> Result<Version, StoreError> {
        if value.is_null() {
            return Err(StoreError::NullValue(name.to_string()));
        }

        let version = self.next_version();
        let mut data = self.data.write().map_err(|_| StoreError::Poisoned)?;
        data.entry(name.to_string()).or_default().push((version.clone(), value));
        Ok(version)
    }

    /// Names of all channels currently held.
    pub fn names(&self) -> Result<Vec<String>, StoreError> {
        let data = self.data.read().map_err(|_| StoreError::Poisoned)?;
        let mut names: Vec<String> = data.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn next_version(&self) -> Version {
        Version::new(format!("{:012}", self.counter.fetch_add(1, Ordering::Relaxed)))
    }
}

impl DataStore for MemoryStore {
    fn load(&self, name: &str) -> Result<Value, StoreError> {
        let data = self.data.read().map_err(|_| StoreError::Poisoned)?;
        data.get(name)
            .and_then(|history| history.last())
            .map(|(_, value)| value.clone())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    fn save(&self, name: &str, value: Value) -> Result<(), StoreError> {
        self.insert(name, value).map(|_| ())
    }

    fn exists(&self, name: &str) -> Result<bool, StoreError> {
        let data = self.data.read().map_err(|_| StoreError::Poisoned)?;
        Ok(data.get(name).is_some_and(|history| !history.is_empty()))
    }

    fn release(&self, name: &str) -> Result<(), StoreError> {
        let mut data = self.data.write().map_err(|_| StoreError::Poisoned)?;
        data.remove(name);
        Ok(())
    }

    fn confirm(&self, name: &str) -> Result<(), StoreError> {
        let mut data = self.data.write().map_err(|_| StoreError::Poisoned)?;
        let history = data
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;

        let keep = history.len().saturating_sub(1);
        history.drain(..keep);
        Ok(())
    }

    fn versioned(&self) -> Option<&dyn Versioned> {
        Some(self)
    }
}

impl Versioned for MemoryStore {
    fn load_version(&self, name: &str, version: &Version) -> Result<Value, StoreError> {
        let data = self.data.read().map_err(|_| StoreError::Poisoned)?;
        data.get(name)
            .and_then(|history| history.iter().find(|(v, _)| v == version))
            .map(|(_, value)| value.clone())
            .ok_or_else(|| StoreError::VersionNotFound {
                name: name.to_string(),
                version: version.to_string(),
            })
    }

    fn versions(&self, name: &str) -> Result<Vec<Version>, StoreError> {
        let data = self.data.read().map_err(|_| StoreError::Poisoned)?;
        data.get(name)
            .map(|history| history.iter().map(|(v, _)| v.clone()).collect())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_latest() {
        let store = MemoryStore::new().with("a", 1);
        store.save("a", Value::new(2)).unwrap();
        assert_eq!(store.load("a").unwrap().downcast_ref::<i32>(), Some(&2));
        assert_eq!(store.versions("a").unwrap().len(), 2);
    }

    #[test]
    fn test_missing() {
        let store = MemoryStore::new();
        assert!(!store.exists("a").unwrap());
        assert!(matches!(store.load("a"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_null_rejected() {
        let store = MemoryStore::new();
        assert!(matches!(store.save("a", Value::Null), Err(StoreError::NullValue(_))));
        assert!(!store.exists("a").unwrap());
    }

    #[test]
    fn test_release_drops() {
        let store = MemoryStore::new().with("a", 1);
        store.release("a").unwrap();
        assert!(!store.exists("a").unwrap());
        store.release("never_saved").unwrap();
    }

    #[test]
    fn test_confirm_keeps_latest() {
        let store = MemoryStore::new();
        let first = store.insert("a", Value::new(1)).unwrap();
        let second = store.insert("a", Value::new(2)).unwrap();
        assert!(first < second);

        store.confirm("a").unwrap();
        assert_eq!(store.versions("a").unwrap(), vec![second.clone()]);
        assert!(matches!(
            store.load_version("a", &first),
            Err(StoreError::VersionNotFound { .. })
        ));
        assert_eq!(store.load_version("a", &second).unwrap().downcast_ref::<i32>(), Some(&2));
        assert!(matches!(store.confirm("b"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_names() {
        let store = MemoryStore::new().with("b", 1).with("a", 2);
        assert_eq!(store.names().unwrap(), vec!["a", "b"]);
    }
}
