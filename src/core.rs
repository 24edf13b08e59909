use std::any::{Any, type_name};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use anyhow::anyhow;

/// A type-erased, thread-safe container.
pub type Dynamic = Arc<dyn Any + Send + Sync>;

/// A unit of data flowing through a pipeline.
///
/// Task callables receive their inputs as values and return a value that
/// the engine maps onto the declared outputs. The store keeps values keyed
/// by channel name.
///
/// `Null` is the absence sentinel. It can be returned by a callable, but it
/// can never be saved to a channel: a task that legitimately produces no
/// data must declare zero outputs instead.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Data(Dynamic),
    Seq(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Wraps any thread-safe value.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Value::Data(Arc::new(value))
    }

    /// Builds a sequence, used for tasks declaring a list of outputs.
    pub fn seq(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Seq(items.into_iter().collect())
    }

    /// Builds a mapping, used for tasks declaring named outputs.
    pub fn map<K: Into<String>>(items: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Map(items.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Data(data) => data.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Like [`downcast_ref`](Self::downcast_ref), but with an error naming
    /// the expected type.
    pub fn get<T: Any>(&self) -> anyhow::Result<&T> {
        self.downcast_ref::<T>()
            .ok_or_else(|| anyhow!("expected a value of type {}, got {:?}", type_name::<T>(), self))
    }

    /// Number of elements a sequence or mapping holds.
    pub(crate) fn arity(&self) -> Option<usize> {
        match self {
            Value::Seq(items) => Some(items.len()),
            Value::Map(items) => Some(items.len()),
            _ => None,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Data(_) => "data",
            Value::Seq(_) => "sequence",
            Value::Map(_) => "mapping",
        }
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Data(_) => write!(f, "Data(*)"),
            Value::Seq(items) => f.debug_list().entries(items).finish(),
            Value::Map(items) => f.debug_map().entries(items).finish(),
        }
    }
}

/// Arguments handed to a task callable.
///
/// List and scalar input declarations fill `positional`, mapping
/// declarations fill `named` keyed by argument name.
#[derive(Clone, Debug, Default)]
pub struct Args {
    pub positional: Vec<Value>,
    pub named: BTreeMap<String, Value>,
}

impl Args {
    pub fn positional(values: impl IntoIterator<Item = Value>) -> Self {
        Self {
            positional: values.into_iter().collect(),
            named: BTreeMap::new(),
        }
    }

    pub fn named<K: Into<String>>(values: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self {
            positional: Vec::new(),
            named: values.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Typed access to the positional argument at `index`.
    pub fn arg<T: Any>(&self, index: usize) -> anyhow::Result<&T> {
        self.positional
            .get(index)
            .ok_or_else(|| anyhow!("missing positional argument {index}"))?
            .get::<T>()
    }

    /// Typed access to the keyword argument `name`.
    pub fn kwarg<T: Any>(&self, name: &str) -> anyhow::Result<&T> {
        self.named
            .get(name)
            .ok_or_else(|| anyhow!("missing keyword argument '{name}'"))?
            .get::<T>()
    }

    pub fn len(&self) -> usize {
        self.positional.len() + self.named.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downcast() {
        let value = Value::new(42_i64);
        assert_eq!(value.downcast_ref::<i64>(), Some(&42));
        assert!(value.downcast_ref::<String>().is_none());
        assert!(value.get::<String>().is_err());
    }

    #[test]
    fn test_null_default() {
        assert!(Value::default().is_null());
        assert!(!Value::new(()).is_null());
    }

    #[test]
    fn test_args_access() {
        let args = Args::positional([Value::new(1_i32), Value::new("two".to_string())]);
        assert_eq!(*args.arg::<i32>(0).unwrap(), 1);
        assert_eq!(args.arg::<String>(1).unwrap(), "two");
        assert!(args.arg::<i32>(2).is_err());

        let args = Args::named([("x", Value::new(3_u8))]);
        assert_eq!(*args.kwarg::<u8>("x").unwrap(), 3);
        assert!(args.kwarg::<u8>("y").is_err());
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn test_arity() {
        assert_eq!(Value::seq([Value::new(1), Value::new(2)]).arity(), Some(2));
        assert_eq!(Value::map([("a", Value::new(1))]).arity(), Some(1));
        assert_eq!(Value::new(1).arity(), None);
    }
}
