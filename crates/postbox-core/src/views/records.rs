//! Live projections of the account record set and the current account id.

use std::collections::BTreeMap;

use crate::operations::{AccountMetadataOperation, AccountRecordOperation};
use crate::tables::records::{AccountMetadataTable, AccountRecordTable};
use crate::types::{AccountRecord, AccountRecordId};
use crate::valuebox::ValueBox;

/// The emitted snapshot: all records in id order plus the current id.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AccountRecordsState {
    pub records: Vec<AccountRecord>,
    pub current_id: Option<AccountRecordId>,
}

/// Mutable view over all account records.
///
/// Replay works purely from the operation logs; record operations carry
/// the full `(before, after)` transition so no table reads are needed.
pub struct AccountRecordsView {
    records: BTreeMap<AccountRecordId, AccountRecord>,
    current_id: Option<AccountRecordId>,
}

impl AccountRecordsView {
    pub fn new(
        store: &ValueBox,
        record_table: &mut AccountRecordTable,
        metadata_table: &mut AccountMetadataTable,
    ) -> Self {
        let records = record_table
            .get_records(store)
            .into_iter()
            .map(|record| (record.id, record))
            .collect();
        Self {
            records,
            current_id: metadata_table.get_current_account_id(store),
        }
    }

    pub fn replay(
        &mut self,
        record_operations: &[AccountRecordOperation],
        metadata_operations: &[AccountMetadataOperation],
    ) -> bool {
        let mut updated = false;
        for operation in record_operations {
            let AccountRecordOperation::Set { id, record, .. } = operation;
            match record {
                Some(record) => {
                    self.records.insert(*id, record.clone());
                }
                None => {
                    self.records.remove(id);
                }
            }
            updated = true;
        }
        for operation in metadata_operations {
            let AccountMetadataOperation::UpdatedCurrentAccountId(id) = operation;
            if self.current_id != *id {
                self.current_id = *id;
                updated = true;
            }
        }
        updated
    }

    pub fn state(&self) -> AccountRecordsState {
        AccountRecordsState {
            records: self.records.values().cloned().collect(),
            current_id: self.current_id,
        }
    }
}

/// Distinct stream of the current account id.
pub struct CurrentAccountIdView {
    current_id: Option<AccountRecordId>,
}

impl CurrentAccountIdView {
    pub fn new(current_id: Option<AccountRecordId>) -> Self {
        Self { current_id }
    }

    /// Returns `true` only when the id actually changed.
    pub fn replay(&mut self, metadata_operations: &[AccountMetadataOperation]) -> bool {
        let mut updated = false;
        for operation in metadata_operations {
            let AccountMetadataOperation::UpdatedCurrentAccountId(id) = operation;
            if self.current_id != *id {
                self.current_id = *id;
                updated = true;
            }
        }
        updated
    }

    pub fn current_id(&self) -> Option<AccountRecordId> {
        self.current_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: i64) -> AccountRecord {
        AccountRecord {
            id: AccountRecordId(id),
            attributes: json!({}),
            temporary_session_id: None,
        }
    }

    fn set_op(id: i64, record_value: Option<AccountRecord>) -> AccountRecordOperation {
        AccountRecordOperation::Set {
            id: AccountRecordId(id),
            previous: None,
            record: record_value,
        }
    }

    #[test]
    fn test_replay_applies_inserts_updates_and_deletes() {
        let mut view = AccountRecordsView {
            records: BTreeMap::new(),
            current_id: None,
        };

        assert!(view.replay(&[set_op(2, Some(record(2))), set_op(1, Some(record(1)))], &[]));
        let state = view.state();
        assert_eq!(state.records.len(), 2);
        assert_eq!(state.records[0].id, AccountRecordId(1));

        assert!(view.replay(&[set_op(1, None)], &[]));
        assert_eq!(view.state().records.len(), 1);
    }

    #[test]
    fn test_replay_updates_current_id() {
        let mut view = AccountRecordsView {
            records: BTreeMap::new(),
            current_id: None,
        };
        let ops = [AccountMetadataOperation::UpdatedCurrentAccountId(Some(
            AccountRecordId(7),
        ))];
        assert!(view.replay(&[], &ops));
        assert_eq!(view.state().current_id, Some(AccountRecordId(7)));
    }

    #[test]
    fn test_empty_logs_do_not_update() {
        let mut view = AccountRecordsView {
            records: BTreeMap::new(),
            current_id: None,
        };
        assert!(!view.replay(&[], &[]));
    }

    #[test]
    fn test_current_account_id_view_is_distinct() {
        let mut view = CurrentAccountIdView::new(None);
        let set_to_7 = [AccountMetadataOperation::UpdatedCurrentAccountId(Some(
            AccountRecordId(7),
        ))];
        assert!(view.replay(&set_to_7));
        assert!(!view.replay(&set_to_7));
        assert_eq!(view.current_id(), Some(AccountRecordId(7)));
    }
}
