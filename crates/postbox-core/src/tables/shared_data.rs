//! Keyed shared-data CRUD with equality gating.
//!
//! A flat store over arbitrary `ValueBoxKey`s. Writes compare the incoming
//! value to the stored value and short-circuit when equal: no row write,
//! no updated-key entry, and therefore no observer notification.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::tables::Table;
use crate::valuebox::{ValueBox, ValueBoxKey, ValueBoxTable};

pub struct SharedDataTable {
    table: ValueBoxTable,
    /// Read-through cache; `None` records a known-absent key.
    cache: HashMap<ValueBoxKey, Option<serde_json::Value>>,
    dirty: HashSet<ValueBoxKey>,
}

impl SharedDataTable {
    pub fn new(table: ValueBoxTable) -> Self {
        Self {
            table,
            cache: HashMap::new(),
            dirty: HashSet::new(),
        }
    }

    pub fn get(&mut self, store: &ValueBox, key: &ValueBoxKey) -> Option<serde_json::Value> {
        if let Some(cached) = self.cache.get(key) {
            return cached.clone();
        }
        let loaded = store
            .get(self.table, key)
            .and_then(|bytes| match rmp_serde::from_slice(&bytes) {
                Ok(value) => Some(value),
                Err(error) => {
                    warn!(%error, "stored shared data failed to decode, treating as absent");
                    None
                }
            });
        self.cache.insert(key.clone(), loaded.clone());
        loaded
    }

    /// Stage `value` under `key` and add the key to `updated_keys`, unless
    /// the value equals the stored one.
    pub fn set(
        &mut self,
        store: &ValueBox,
        key: &ValueBoxKey,
        value: Option<serde_json::Value>,
        updated_keys: &mut HashSet<ValueBoxKey>,
    ) {
        if self.get(store, key) == value {
            return;
        }
        self.cache.insert(key.clone(), value);
        self.dirty.insert(key.clone());
        updated_keys.insert(key.clone());
    }
}

impl Table for SharedDataTable {
    fn before_commit(&mut self, store: &mut ValueBox) {
        for key in self.dirty.drain() {
            match self.cache.get(&key).and_then(|v| v.as_ref()) {
                Some(value) => match rmp_serde::to_vec(value) {
                    Ok(bytes) => store.set(self.table, &key, &bytes),
                    Err(error) => warn!(%error, "shared data failed to encode, skipping flush"),
                },
                None => store.remove(self.table, &key),
            }
        }
    }

    fn clear_memory_cache(&mut self) {
        self.cache.clear();
        self.dirty.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TABLE: ValueBoxTable = ValueBoxTable {
        id: 4,
        name: "sharedData",
    };

    fn key(name: &str) -> ValueBoxKey {
        ValueBoxKey::from_bytes(name.as_bytes().to_vec())
    }

    #[test]
    fn test_set_then_identical_set_records_one_updated_key() {
        let mut store = ValueBox::in_memory();
        store.begin();
        let mut table = SharedDataTable::new(TABLE);
        let mut updated = HashSet::new();

        table.set(&store, &key("k"), Some(json!(1)), &mut updated);
        table.set(&store, &key("k"), Some(json!(1)), &mut updated);
        assert_eq!(updated.len(), 1);
    }

    #[test]
    fn test_equal_write_across_transactions_is_dropped() {
        let mut store = ValueBox::in_memory();
        store.begin();
        let mut table = SharedDataTable::new(TABLE);
        let mut updated = HashSet::new();

        table.set(&store, &key("k"), Some(json!("v")), &mut updated);
        table.before_commit(&mut store);
        store.commit().unwrap();

        store.begin();
        let mut updated = HashSet::new();
        table.clear_memory_cache();
        table.set(&store, &key("k"), Some(json!("v")), &mut updated);
        assert!(updated.is_empty());
    }

    #[test]
    fn test_remove_roundtrip() {
        let mut store = ValueBox::in_memory();
        store.begin();
        let mut table = SharedDataTable::new(TABLE);
        let mut updated = HashSet::new();

        table.set(&store, &key("k"), Some(json!([1, 2])), &mut updated);
        table.before_commit(&mut store);
        store.commit().unwrap();

        store.begin();
        table.set(&store, &key("k"), None, &mut updated);
        table.before_commit(&mut store);
        store.commit().unwrap();

        table.clear_memory_cache();
        assert_eq!(table.get(&store, &key("k")), None);
        assert!(!store.exists(TABLE, &key("k")));
    }
}
