//! Item-collection infos table.
//!
//! One row per collection, keyed `[namespace(4 ord), collectionId(8 ord)]`
//! so the store's range order for a namespace is the native infos order.
//! Replacement is namespace-granular: a transaction stages the full new
//! sequence and the flush rewrites every row of that namespace.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::operations::ItemCollectionInfoOperation;
use crate::tables::Table;
use crate::types::{ItemCollectionId, ItemCollectionInfo};
use crate::valuebox::{ValueBox, ValueBoxKey, ValueBoxTable};

fn namespace_prefix(namespace: i32) -> ValueBoxKey {
    ValueBoxKey::new().with_i32_ord(namespace)
}

fn info_key(id: ItemCollectionId) -> ValueBoxKey {
    ValueBoxKey::new()
        .with_i32_ord(id.namespace)
        .with_i64_ord(id.id)
}

pub struct ItemCollectionInfosTable {
    table: ValueBoxTable,
    /// Per-namespace infos in native (id) order; read-through, staged
    /// replacements marked dirty.
    cache: HashMap<i32, Vec<(ItemCollectionId, ItemCollectionInfo)>>,
    dirty: HashSet<i32>,
}

impl ItemCollectionInfosTable {
    pub fn new(table: ValueBoxTable) -> Self {
        Self {
            table,
            cache: HashMap::new(),
            dirty: HashSet::new(),
        }
    }

    /// The infos of `namespace`, in native order.
    pub fn get_infos(
        &mut self,
        store: &ValueBox,
        namespace: i32,
    ) -> Vec<(ItemCollectionId, ItemCollectionInfo)> {
        if let Some(infos) = self.cache.get(&namespace) {
            return infos.clone();
        }
        let mut infos = Vec::new();
        for (_key, value) in store.scan_prefix(self.table, namespace_prefix(namespace).as_bytes()) {
            match rmp_serde::from_slice::<(ItemCollectionId, ItemCollectionInfo)>(&value) {
                Ok(entry) => infos.push(entry),
                Err(error) => {
                    warn!(%error, "stored collection info failed to decode, skipping");
                }
            }
        }
        self.cache.insert(namespace, infos.clone());
        infos
    }

    /// Stage the full replacement of `namespace`'s infos sequence and
    /// append a `ReplaceInfos` operation.
    pub fn replace_infos(
        &mut self,
        namespace: i32,
        mut infos: Vec<(ItemCollectionId, ItemCollectionInfo)>,
        operations: &mut Vec<ItemCollectionInfoOperation>,
    ) {
        debug_assert!(infos.iter().all(|(id, _)| id.namespace == namespace));
        infos.sort_by_key(|(id, _)| *id);
        self.cache.insert(namespace, infos);
        self.dirty.insert(namespace);
        operations.push(ItemCollectionInfoOperation::ReplaceInfos(namespace));
    }
}

impl Table for ItemCollectionInfosTable {
    fn before_commit(&mut self, store: &mut ValueBox) {
        for namespace in self.dirty.drain() {
            for key in store.keys_with_prefix(self.table, namespace_prefix(namespace).as_bytes()) {
                store.remove(self.table, &key);
            }
            let Some(infos) = self.cache.get(&namespace) else {
                continue;
            };
            for entry in infos {
                match rmp_serde::to_vec(entry) {
                    Ok(bytes) => store.set(self.table, &info_key(entry.0), &bytes),
                    Err(error) => {
                        warn!(%error, "collection info failed to encode, skipping flush");
                    }
                }
            }
        }
    }

    fn clear_memory_cache(&mut self) {
        self.cache.clear();
        self.dirty.clear();
    }
}
