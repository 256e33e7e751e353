//! Live projection of a fixed set of shared-data keys.

use std::collections::{BTreeMap, HashSet};

use crate::tables::shared_data::SharedDataTable;
use crate::valuebox::{ValueBox, ValueBoxKey};

/// The emitted snapshot: present keys mapped to their values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AccountSharedDataState {
    pub entries: BTreeMap<ValueBoxKey, serde_json::Value>,
}

/// Mutable view over the shared-data keys fixed at construction.
pub struct AccountSharedDataView {
    keys: Vec<ValueBoxKey>,
    state: AccountSharedDataState,
}

impl AccountSharedDataView {
    pub fn new(store: &ValueBox, table: &mut SharedDataTable, keys: Vec<ValueBoxKey>) -> Self {
        let mut state = AccountSharedDataState::default();
        for key in &keys {
            if let Some(value) = table.get(store, key) {
                state.entries.insert(key.clone(), value);
            }
        }
        Self { keys, state }
    }

    /// Re-read every parameter key that appears in `updated_keys`.
    /// Equality-gated writes never reach the updated set, so any
    /// intersection is a real change.
    pub fn replay(
        &mut self,
        store: &ValueBox,
        table: &mut SharedDataTable,
        updated_keys: &HashSet<ValueBoxKey>,
    ) -> bool {
        let mut updated = false;
        for key in &self.keys {
            if !updated_keys.contains(key) {
                continue;
            }
            match table.get(store, key) {
                Some(value) => {
                    self.state.entries.insert(key.clone(), value);
                }
                None => {
                    self.state.entries.remove(key);
                }
            }
            updated = true;
        }
        updated
    }

    pub fn state(&self) -> AccountSharedDataState {
        self.state.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::valuebox::ValueBoxTable;

    const TABLE: ValueBoxTable = ValueBoxTable {
        id: 4,
        name: "sharedData",
    };

    fn key(name: &str) -> ValueBoxKey {
        ValueBoxKey::from_bytes(name.as_bytes().to_vec())
    }

    #[test]
    fn test_initial_state_contains_only_present_keys() {
        let mut store = ValueBox::in_memory();
        store.begin();
        let mut table = SharedDataTable::new(TABLE);
        let mut updated = HashSet::new();
        table.set(&store, &key("a"), Some(json!(1)), &mut updated);

        let view = AccountSharedDataView::new(
            &store,
            &mut table,
            vec![key("a"), key("missing")],
        );
        assert_eq!(view.state().entries.len(), 1);
        assert_eq!(view.state().entries[&key("a")], json!(1));
    }

    #[test]
    fn test_replay_tracks_only_parameter_keys() {
        let mut store = ValueBox::in_memory();
        store.begin();
        let mut table = SharedDataTable::new(TABLE);
        let mut updated = HashSet::new();

        let mut view = AccountSharedDataView::new(&store, &mut table, vec![key("a")]);

        table.set(&store, &key("other"), Some(json!(2)), &mut updated);
        assert!(!view.replay(&store, &mut table, &updated));

        updated.clear();
        table.set(&store, &key("a"), Some(json!(3)), &mut updated);
        assert!(view.replay(&store, &mut table, &updated));
        assert_eq!(view.state().entries[&key("a")], json!(3));
    }

    #[test]
    fn test_replay_removes_deleted_keys() {
        let mut store = ValueBox::in_memory();
        store.begin();
        let mut table = SharedDataTable::new(TABLE);
        let mut updated = HashSet::new();
        table.set(&store, &key("a"), Some(json!(1)), &mut updated);

        let mut view = AccountSharedDataView::new(&store, &mut table, vec![key("a")]);
        updated.clear();
        table.set(&store, &key("a"), None, &mut updated);
        assert!(view.replay(&store, &mut table, &updated));
        assert!(view.state().entries.is_empty());
    }
}
