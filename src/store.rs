//! The storage contract between the executor and wherever data lives.
//!
//! The executor only ever talks to a [`DataStore`]. Versioned access is an
//! optional capability, exposed through [`DataStore::versioned`], so plain
//! stores don't have to pretend they keep a history.
mod memory;
mod registry;

use std::fmt::Display;

use crate::core::Value;
use crate::error::StoreError;

pub use memory::MemoryStore;
pub use registry::{StoreFactory, StoreRegistry};

/// Identifier of one saved version of a channel. Versions of the same
/// channel sort in the order they were saved.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(String);

impl Version {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Version {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Version {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Backing storage for channels.
///
/// Implementations must be safe to call concurrently for distinct channels.
/// The executor never releases a channel while it is being loaded.
pub trait DataStore: Send + Sync {
    /// Latest value of a channel.
    fn load(&self, name: &str) -> Result<Value, StoreError>;

    /// Saving [`Value::Null`] must fail with [`StoreError::NullValue`].
    fn save(&self, name: &str, value: Value) -> Result<(), StoreError>;

    fn exists(&self, name: &str) -> Result<bool, StoreError>;

    /// Drops any cached copy of the channel. Persisted data is kept.
    fn release(&self, name: &str) -> Result<(), StoreError>;

    /// Permanently retires the version history of a channel.
    fn confirm(&self, _name: &str) -> Result<(), StoreError> {
        Ok(())
    }

    /// The versioning capability of this store, if it has one.
    fn versioned(&self) -> Option<&dyn Versioned> {
        None
    }
}

/// Explicit access to the history of a channel.
pub trait Versioned: Send + Sync {
    fn load_version(&self, name: &str, version: &Version) -> Result<Value, StoreError>;

    /// All versions of a channel, oldest first.
    fn versions(&self, name: &str) -> Result<Vec<Version>, StoreError>;
}

/// Loads a channel, at `version` when one is given.
pub fn load_version(store: &dyn DataStore, name: &str, version: Option<&Version>) -> Result<Value, StoreError> {
    match version {
        None => store.load(name),
        Some(version) => store
            .versioned()
            .ok_or_else(|| StoreError::NotVersioned(name.to_string()))?
            .load_version(name, version),
    }
}
