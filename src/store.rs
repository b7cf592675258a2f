//! Keyed state store contract.
//!
//! A processor declares the stores it needs by name when it is registered. The
//! store factory is called once per partition task, and the resulting instance
//! is owned by that task alone: stores are never shared across partitions or
//! partition groups, which is why store names take part in partition-group
//! computation.

use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Error type for state store operations.
#[derive(Error, Debug)]
pub enum StoreError {
  /// Serialization or deserialization failed.
  #[error("serialization error: {0}")]
  Serialization(String),
  /// Storage or I/O error.
  #[error("storage error: {0}")]
  Storage(String),
  /// The store was used after `close`.
  #[error("store {0} is closed")]
  Closed(String),
}

/// Keyed byte store owned by one partition task.
pub trait Store: Send {
  /// Returns the registered name of the store.
  fn name(&self) -> &str;

  /// Prepares the store before the first record of the partition task.
  fn init(&mut self) -> Result<(), StoreError> {
    Ok(())
  }

  /// Returns the value stored for `key`.
  fn get(&self, key: &[u8]) -> Result<Option<Bytes>, StoreError>;

  /// Stores `value` under `key`, replacing any previous value.
  fn set(&mut self, key: Bytes, value: Bytes) -> Result<(), StoreError>;

  /// Removes `key`.
  fn delete(&mut self, key: &[u8]) -> Result<(), StoreError>;

  /// Persists buffered writes.
  fn flush(&mut self) -> Result<(), StoreError> {
    Ok(())
  }

  /// Releases the store. No other method is called afterwards.
  fn close(&mut self) -> Result<(), StoreError> {
    Ok(())
  }
}

/// A store instance shared by the processors of one partition task.
pub type SharedStore = Arc<Mutex<Box<dyn Store>>>;

/// Zero-argument factory producing a fresh store instance.
pub type StoreFactory = Arc<dyn Fn() -> Result<Box<dyn Store>, StoreError> + Send + Sync>;

/// The stores a processor declared, handed to it on `init`.
#[derive(Clone, Default)]
pub struct StoreSet {
  stores: HashMap<String, SharedStore>,
}

impl StoreSet {
  pub(crate) fn insert(&mut self, name: impl Into<String>, store: SharedStore) {
    self.stores.insert(name.into(), store);
  }

  /// Returns the store registered as `name`, if the processor declared it.
  pub fn get(&self, name: &str) -> Option<SharedStore> {
    self.stores.get(name).cloned()
  }

  /// Returns the names of all stores in the set.
  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.stores.keys().map(String::as_str)
  }

  /// Returns the number of stores in the set.
  pub fn len(&self) -> usize {
    self.stores.len()
  }

  /// Returns `true` if the set holds no store.
  pub fn is_empty(&self) -> bool {
    self.stores.is_empty()
  }
}

/// Ordered in-memory store.
pub struct MemoryStore {
  name: String,
  entries: BTreeMap<Bytes, Bytes>,
  closed: bool,
}

impl MemoryStore {
  /// Creates an empty store.
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      entries: BTreeMap::new(),
      closed: false,
    }
  }

  /// Returns a factory producing empty stores named `name`.
  pub fn factory(name: impl Into<String>) -> impl Fn() -> Result<Box<dyn Store>, StoreError> + Send + Sync + 'static {
    let name = name.into();
    move || Ok(Box::new(MemoryStore::new(name.clone())) as Box<dyn Store>)
  }

  /// Returns the number of entries.
  pub fn len(&self) -> usize {
    self.entries.len()
  }

  /// Returns `true` if the store holds no entry.
  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  fn check_open(&self) -> Result<(), StoreError> {
    if self.closed {
      return Err(StoreError::Closed(self.name.clone()));
    }
    Ok(())
  }
}

impl Store for MemoryStore {
  fn name(&self) -> &str {
    &self.name
  }

  fn get(&self, key: &[u8]) -> Result<Option<Bytes>, StoreError> {
    self.check_open()?;
    Ok(self.entries.get(key).cloned())
  }

  fn set(&mut self, key: Bytes, value: Bytes) -> Result<(), StoreError> {
    self.check_open()?;
    self.entries.insert(key, value);
    Ok(())
  }

  fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
    self.check_open()?;
    self.entries.remove(key);
    Ok(())
  }

  fn close(&mut self) -> Result<(), StoreError> {
    self.closed = true;
    Ok(())
  }
}
