//! Live projection of item-collection infos for a set of namespaces.
//!
//! The snapshot maps each parameter namespace to its infos in native
//! order, each paired with the collection's least-keyed item. Replay is
//! two-tier: an infos replacement in any parameter namespace triggers a
//! full rebuild; item-only replacements patch the affected entries in
//! place, preserving positions. The worst case is therefore one full
//! reload per namespace, and item-level updates cost O(changed
//! collections).

use std::collections::{BTreeMap, HashSet};

use crate::operations::{ItemCollectionInfoOperation, ItemCollectionItemOperation};
use crate::tables::collection_infos::ItemCollectionInfosTable;
use crate::tables::collection_items::ItemCollectionItemsTable;
use crate::types::{ItemCollectionId, ItemCollectionInfo, ItemCollectionItem};
use crate::valuebox::ValueBox;

/// One entry of the projection: a collection, its info, and its
/// least-keyed item (if any).
#[derive(Debug, Clone, PartialEq)]
pub struct ItemCollectionEntry {
    pub id: ItemCollectionId,
    pub info: ItemCollectionInfo,
    pub first_item: Option<ItemCollectionItem>,
}

/// The emitted snapshot: namespace to entries in native infos order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ItemCollectionInfosState {
    pub entries: BTreeMap<i32, Vec<ItemCollectionEntry>>,
}

/// Mutable view over the infos projection.
pub struct ItemCollectionInfosView {
    namespaces: Vec<i32>,
    state: ItemCollectionInfosState,
}

impl ItemCollectionInfosView {
    /// Build the initial projection by reading the tables directly.
    pub fn new(
        store: &ValueBox,
        infos_table: &mut ItemCollectionInfosTable,
        items_table: &ItemCollectionItemsTable,
        namespaces: Vec<i32>,
    ) -> Self {
        let state = Self::build(store, infos_table, items_table, &namespaces);
        Self { namespaces, state }
    }

    fn build(
        store: &ValueBox,
        infos_table: &mut ItemCollectionInfosTable,
        items_table: &ItemCollectionItemsTable,
        namespaces: &[i32],
    ) -> ItemCollectionInfosState {
        let mut state = ItemCollectionInfosState::default();
        for &namespace in namespaces {
            let entries = infos_table
                .get_infos(store, namespace)
                .into_iter()
                .map(|(id, info)| ItemCollectionEntry {
                    id,
                    info,
                    first_item: items_table.lowest_item(store, id),
                })
                .collect();
            state.entries.insert(namespace, entries);
        }
        state
    }

    /// Apply one committed transaction's operation logs. Returns whether
    /// the snapshot changed and should be re-emitted.
    pub fn replay(
        &mut self,
        store: &ValueBox,
        infos_table: &mut ItemCollectionInfosTable,
        items_table: &ItemCollectionItemsTable,
        info_operations: &[ItemCollectionInfoOperation],
        item_operations: &[ItemCollectionItemOperation],
    ) -> bool {
        if info_operations.is_empty() && item_operations.is_empty() {
            return false;
        }

        let mut reload_infos_namespaces = HashSet::new();
        for operation in info_operations {
            let ItemCollectionInfoOperation::ReplaceInfos(namespace) = operation;
            if self.namespaces.contains(namespace) {
                reload_infos_namespaces.insert(*namespace);
            }
        }

        let mut reload_top_collection_ids = HashSet::new();
        for operation in item_operations {
            let ItemCollectionItemOperation::ReplaceItems(collection_id) = operation;
            if self.namespaces.contains(&collection_id.namespace) {
                reload_top_collection_ids.insert(*collection_id);
            }
        }

        if !reload_infos_namespaces.is_empty() {
            self.state = Self::build(store, infos_table, items_table, &self.namespaces);
            return true;
        }

        if !reload_top_collection_ids.is_empty() {
            let mut updated = false;
            for entries in self.state.entries.values_mut() {
                for entry in entries.iter_mut() {
                    if reload_top_collection_ids.contains(&entry.id) {
                        entry.first_item = items_table.lowest_item(store, entry.id);
                        updated = true;
                    }
                }
            }
            return updated;
        }

        false
    }

    /// The current snapshot.
    pub fn state(&self) -> ItemCollectionInfosState {
        self.state.clone()
    }
}
