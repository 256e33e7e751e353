//! Per-transaction operation logs.
//!
//! A transaction accumulates, per operation kind, an append-only sequence
//! of semantic deltas (not raw key writes). Registered views consume these
//! logs during the commit pipeline to decide whether to recompute; the
//! logs are cleared before the store commit returns.

use std::collections::HashSet;

use crate::types::{AccountRecord, AccountRecordId, ItemCollectionId};
use crate::valuebox::ValueBoxKey;

/// Deltas against the item-collection infos table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemCollectionInfoOperation {
    /// The full infos sequence of the given namespace was replaced.
    ReplaceInfos(i32),
}

/// Deltas against the item-collection items table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemCollectionItemOperation {
    /// The full item sequence of the given collection was replaced.
    ReplaceItems(ItemCollectionId),
}

/// Deltas against the account record table.
#[derive(Debug, Clone, PartialEq)]
pub enum AccountRecordOperation {
    /// A record transitioned from `previous` to `record` (either side may
    /// be absent: insert, update, or delete).
    Set {
        id: AccountRecordId,
        previous: Option<AccountRecord>,
        record: Option<AccountRecord>,
    },
}

/// Deltas against the account metadata table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountMetadataOperation {
    UpdatedCurrentAccountId(Option<AccountRecordId>),
}

/// All operation logs of one transaction.
#[derive(Debug, Default)]
pub struct TransactionOperations {
    pub item_collection_info_operations: Vec<ItemCollectionInfoOperation>,
    pub item_collection_item_operations: Vec<ItemCollectionItemOperation>,
    pub account_record_operations: Vec<AccountRecordOperation>,
    pub account_metadata_operations: Vec<AccountMetadataOperation>,
    pub updated_shared_data_keys: HashSet<ValueBoxKey>,
}

impl TransactionOperations {
    pub fn is_empty(&self) -> bool {
        self.item_collection_info_operations.is_empty()
            && self.item_collection_item_operations.is_empty()
            && self.account_record_operations.is_empty()
            && self.account_metadata_operations.is_empty()
            && self.updated_shared_data_keys.is_empty()
    }

    pub fn clear(&mut self) {
        self.item_collection_info_operations.clear();
        self.item_collection_item_operations.clear();
        self.account_record_operations.clear();
        self.account_metadata_operations.clear();
        self.updated_shared_data_keys.clear();
    }
}
