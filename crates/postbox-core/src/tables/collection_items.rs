//! Item-collection items table.
//!
//! One row per item, keyed `[namespace(4 ord), collectionId(8 ord),
//! itemKey(8 ord)]`: the least-keyed row of a collection's range is its
//! first item. Replacement is collection-granular, mirroring
//! [`super::collection_infos`]. Only staged replacements are cached;
//! point reads of untouched collections go straight to the store.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::operations::ItemCollectionItemOperation;
use crate::tables::Table;
use crate::types::{ItemCollectionId, ItemCollectionItem};
use crate::valuebox::{ValueBox, ValueBoxKey, ValueBoxTable};

fn collection_prefix(id: ItemCollectionId) -> ValueBoxKey {
    ValueBoxKey::new()
        .with_i32_ord(id.namespace)
        .with_i64_ord(id.id)
}

fn item_key(id: ItemCollectionId, item: &ItemCollectionItem) -> ValueBoxKey {
    collection_prefix(id).with_i64_ord(item.key)
}

pub struct ItemCollectionItemsTable {
    table: ValueBoxTable,
    /// Staged full replacements, in item-key order.
    cache: HashMap<ItemCollectionId, Vec<ItemCollectionItem>>,
    dirty: HashSet<ItemCollectionId>,
}

impl ItemCollectionItemsTable {
    pub fn new(table: ValueBoxTable) -> Self {
        Self {
            table,
            cache: HashMap::new(),
            dirty: HashSet::new(),
        }
    }

    /// The least-keyed item of `collection_id`, if any.
    pub fn lowest_item(
        &self,
        store: &ValueBox,
        collection_id: ItemCollectionId,
    ) -> Option<ItemCollectionItem> {
        if let Some(items) = self.cache.get(&collection_id) {
            return items.first().cloned();
        }
        let (_key, value) =
            store.first_in_prefix(self.table, collection_prefix(collection_id).as_bytes())?;
        match rmp_serde::from_slice(&value) {
            Ok(item) => Some(item),
            Err(error) => {
                warn!(%error, "stored collection item failed to decode, treating as absent");
                None
            }
        }
    }

    /// Stage the full replacement of a collection's items and append a
    /// `ReplaceItems` operation.
    pub fn replace_items(
        &mut self,
        collection_id: ItemCollectionId,
        mut items: Vec<ItemCollectionItem>,
        operations: &mut Vec<ItemCollectionItemOperation>,
    ) {
        items.sort_by_key(|item| item.key);
        self.cache.insert(collection_id, items);
        self.dirty.insert(collection_id);
        operations.push(ItemCollectionItemOperation::ReplaceItems(collection_id));
    }
}

impl Table for ItemCollectionItemsTable {
    fn before_commit(&mut self, store: &mut ValueBox) {
        for collection_id in self.dirty.drain() {
            for key in
                store.keys_with_prefix(self.table, collection_prefix(collection_id).as_bytes())
            {
                store.remove(self.table, &key);
            }
            let Some(items) = self.cache.get(&collection_id) else {
                continue;
            };
            for item in items {
                match rmp_serde::to_vec(item) {
                    Ok(bytes) => store.set(self.table, &item_key(collection_id, item), &bytes),
                    Err(error) => {
                        warn!(%error, "collection item failed to encode, skipping flush");
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
