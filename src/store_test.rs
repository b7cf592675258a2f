//! Tests for the in-memory store and store sets.

use crate::store::{MemoryStore, SharedStore, Store, StoreError, StoreSet};
use bytes::Bytes;
use std::sync::{Arc, Mutex};

#[test]
fn test_memory_store_get_set_delete() {
  let mut store = MemoryStore::new("counts");
  assert!(store.is_empty());

  store
    .set(Bytes::from_static(b"a"), Bytes::from_static(b"1"))
    .unwrap();
  store
    .set(Bytes::from_static(b"a"), Bytes::from_static(b"2"))
    .unwrap();
  assert_eq!(store.len(), 1);
  assert_eq!(store.get(b"a").unwrap(), Some(Bytes::from_static(b"2")));
  assert_eq!(store.get(b"b").unwrap(), None);

  store.delete(b"a").unwrap();
  assert_eq!(store.get(b"a").unwrap(), None);
  assert_eq!(store.name(), "counts");
}

#[test]
fn test_memory_store_refuses_use_after_close() {
  let mut store = MemoryStore::new("counts");
  store.close().unwrap();
  let err = store.get(b"a").unwrap_err();
  assert!(matches!(err, StoreError::Closed(ref name) if name == "counts"));
  assert!(store.set(Bytes::new(), Bytes::new()).is_err());
}

#[test]
fn test_factory_returns_fresh_instances() {
  let factory = MemoryStore::factory("counts");
  let mut first = factory().unwrap();
  first
    .set(Bytes::from_static(b"k"), Bytes::from_static(b"v"))
    .unwrap();

  let second = factory().unwrap();
  assert_eq!(second.name(), "counts");
  assert_eq!(second.get(b"k").unwrap(), None);
}

#[test]
fn test_store_set_lookup() {
  let shared: SharedStore = Arc::new(Mutex::new(Box::new(MemoryStore::new("counts"))));
  let mut set = StoreSet::default();
  assert!(set.is_empty());

  set.insert("counts", shared.clone());
  assert_eq!(set.len(), 1);
  assert_eq!(set.names().collect::<Vec<_>>(), vec!["counts"]);
  assert!(set.get("other").is_none());

  let found = set.get("counts").unwrap();
  assert!(Arc::ptr_eq(&found, &shared));
}
