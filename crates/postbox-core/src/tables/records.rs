//! Account record table and account metadata table.
//!
//! Records are keyed by `AccountRecordId` in order-preserving encoding, so
//! a full scan yields records in id order. Every mutation appends an
//! operation describing the `(id, before, after)` transition; deleting is
//! setting the record to `None`.
//!
//! The account metadata table holds the single current-account-id row.

use std::collections::{BTreeMap, HashSet};

use tracing::warn;

use crate::operations::{AccountMetadataOperation, AccountRecordOperation};
use crate::tables::Table;
use crate::types::{AccountRecord, AccountRecordId};
use crate::valuebox::{ValueBox, ValueBoxKey, ValueBoxTable};

fn record_key(id: AccountRecordId) -> ValueBoxKey {
    ValueBoxKey::new().with_i64_ord(id.0)
}

/// CRUD over account records with operation-log emission.
pub struct AccountRecordTable {
    table: ValueBoxTable,
    records: Option<BTreeMap<AccountRecordId, AccountRecord>>,
    dirty: HashSet<AccountRecordId>,
}

impl AccountRecordTable {
    pub fn new(table: ValueBoxTable) -> Self {
        Self {
            table,
            records: None,
            dirty: HashSet::new(),
        }
    }

    fn loaded(&mut self, store: &ValueBox) -> &mut BTreeMap<AccountRecordId, AccountRecord> {
        if self.records.is_none() {
            let mut records = BTreeMap::new();
            for (_key, value) in store.scan_prefix(self.table, &[]) {
                match rmp_serde::from_slice::<AccountRecord>(&value) {
                    Ok(record) => {
                        records.insert(record.id, record);
                    }
                    Err(error) => {
                        warn!(%error, "stored account record failed to decode, skipping");
                    }
                }
            }
            self.records = Some(records);
        }
        self.records.as_mut().unwrap()
    }

    /// All records, in id order.
    pub fn get_records(&mut self, store: &ValueBox) -> Vec<AccountRecord> {
        self.loaded(store).values().cloned().collect()
    }

    pub fn get_record(&mut self, store: &ValueBox, id: AccountRecordId) -> Option<AccountRecord> {
        self.loaded(store).get(&id).cloned()
    }

    /// Stage the transition `(id, before, after)` and append a record
    /// operation describing it. A write equal to the current record is
    /// silently dropped.
    pub fn set_record(
        &mut self,
        store: &ValueBox,
        id: AccountRecordId,
        record: Option<AccountRecord>,
        operations: &mut Vec<AccountRecordOperation>,
    ) {
        let records = self.loaded(store);
        let previous = records.get(&id).cloned();
        if previous == record {
            return;
        }
        match &record {
            Some(new_record) => {
                records.insert(id, new_record.clone());
            }
            None => {
                records.remove(&id);
            }
        }
        self.dirty.insert(id);
        operations.push(AccountRecordOperation::Set {
            id,
            previous,
            record,
        });
    }
}

impl Table for AccountRecordTable {
    fn before_commit(&mut self, store: &mut ValueBox) {
        let Some(records) = &self.records else {
            debug_assert!(self.dirty.is_empty());
            return;
        };
        for id in self.dirty.drain() {
            let key = record_key(id);
            match records.get(&id) {
                Some(record) => match rmp_serde::to_vec(record) {
                    Ok(bytes) => store.set(self.table, &key, &bytes),
                    Err(error) => warn!(%error, "account record failed to encode, skipping flush"),
                },
                None => store.remove(self.table, &key),
            }
        }
    }

    fn clear_memory_cache(&mut self) {
        self.records = None;
        self.dirty.clear();
    }
}

fn current_account_id_key() -> ValueBoxKey {
    ValueBoxKey::new().with_u8(0)
}

/// The account-manager metadata singleton: the current account id.
pub struct AccountMetadataTable {
    table: ValueBoxTable,
    current_account_id: Option<Option<AccountRecordId>>,
    dirty: bool,
}

impl AccountMetadataTable {
    pub fn new(table: ValueBoxTable) -> Self {
        Self {
            table,
            current_account_id: None,
            dirty: false,
        }
    }

    pub fn get_current_account_id(&mut self, store: &ValueBox) -> Option<AccountRecordId> {
        if let Some(current) = self.current_account_id {
            return current;
        }
        let current = store
            .get(self.table, &current_account_id_key())
            .and_then(|bytes| match <[u8; 8]>::try_from(bytes.as_slice()) {
                Ok(bytes) => Some(AccountRecordId(i64::from_le_bytes(bytes))),
                Err(_) => {
                    warn!("stored current account id has wrong length, treating as absent");
                    None
                }
            });
        self.current_account_id = Some(current);
        current
    }

    /// A no-op when `id` equals the current value; otherwise stages the
    /// change and appends a metadata operation.
    pub fn set_current_account_id(
        &mut self,
        store: &ValueBox,
        id: Option<AccountRecordId>,
        operations: &mut Vec<AccountMetadataOperation>,
    ) {
        if self.get_current_account_id(store) == id {
            return;
        }
        self.current_account_id = Some(id);
        self.dirty = true;
        operations.push(AccountMetadataOperation::UpdatedCurrentAccountId(id));
    }
}

impl Table for AccountMetadataTable {
    fn before_commit(&mut self, store: &mut ValueBox) {
        if !self.dirty {
            return;
        }
        let key = current_account_id_key();
        match self.current_account_id {
            Some(Some(id)) => store.set(self.table, &key, &id.0.to_le_bytes()),
            Some(None) => store.remove(self.table, &key),
            None => {}
        }
        self.dirty = false;
    }

    fn clear_memory_cache(&mut self) {
        self.current_account_id = None;
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const RECORDS: ValueBoxTable = ValueBoxTable {
        id: 2,
        name: "accountRecords",
    };
    const METADATA: ValueBoxTable = ValueBoxTable {
        id: 3,
        name: "accountMetadata",
    };

    fn record(id: i64, label: &str) -> AccountRecord {
        AccountRecord {
            id: AccountRecordId(id),
            attributes: json!({ "label": label }),
            temporary_session_id: None,
        }
    }

    #[test]
    fn test_set_record_emits_transition_operations() {
        let mut store = ValueBox::in_memory();
        store.begin();
        let mut table = AccountRecordTable::new(RECORDS);
        let mut operations = Vec::new();

        table.set_record(&store, AccountRecordId(1), Some(record(1, "a")), &mut operations);
        table.set_record(&store, AccountRecordId(1), Some(record(1, "b")), &mut operations);
        table.set_record(&store, AccountRecordId(1), None, &mut operations);

        assert_eq!(operations.len(), 3);
        match &operations[1] {
            AccountRecordOperation::Set { previous, record, .. } => {
                assert_eq!(previous.as_ref().unwrap().attributes["label"], "a");
                assert_eq!(record.as_ref().unwrap().attributes["label"], "b");
            }
        }
        match &operations[2] {
            AccountRecordOperation::Set { record, .. } => assert!(record.is_none()),
        }
    }

    #[test]
    fn test_equal_record_write_is_dropped() {
        let mut store = ValueBox::in_memory();
        store.begin();
        let mut table = AccountRecordTable::new(RECORDS);
        let mut operations = Vec::new();

        table.set_record(&store, AccountRecordId(1), Some(record(1, "a")), &mut operations);
        table.set_record(&store, AccountRecordId(1), Some(record(1, "a")), &mut operations);
        assert_eq!(operations.len(), 1);
    }

    #[test]
    fn test_records_flush_and_reload_in_id_order() {
        let mut store = ValueBox::in_memory();
        store.begin();
        let mut table = AccountRecordTable::new(RECORDS);
        let mut operations = Vec::new();

        for id in [5i64, 1, 3] {
            table.set_record(&store, AccountRecordId(id), Some(record(id, "r")), &mut operations);
        }
        table.before_commit(&mut store);
        store.commit().unwrap();

        let mut fresh = AccountRecordTable::new(RECORDS);
        let ids: Vec<i64> = fresh
            .get_records(&store)
            .into_iter()
            .map(|r| r.id.0)
            .collect();
        assert_eq!(ids, vec![1, 3, 5]);
    }

    #[test]
    fn test_current_account_id_roundtrip_and_equality_gate() {
        let mut store = ValueBox::in_memory();
        store.begin();
        let mut table = AccountMetadataTable::new(METADATA);
        let mut operations = Vec::new();

        assert_eq!(table.get_current_account_id(&store), None);
        table.set_current_account_id(&store, Some(AccountRecordId(42)), &mut operations);
        table.set_current_account_id(&store, Some(AccountRecordId(42)), &mut operations);
        assert_eq!(operations.len(), 1);

        table.before_commit(&mut store);
        store.commit().unwrap();

        let mut fresh = AccountMetadataTable::new(METADATA);
        assert_eq!(
            fresh.get_current_account_id(&store),
            Some(AccountRecordId(42))
        );
    }
}
