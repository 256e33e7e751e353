//! Live materialized projections and their subscriber registry.
//!
//! A view holds parameters fixed at construction, a current snapshot, and
//! a `replay` method that applies one committed transaction's operation
//! logs and reports whether the snapshot changed. The registry keeps
//! `(view, sink)` pairs per view kind in a [`bag::Bag`], whose stable
//! indices survive unrelated insertions and removals.

pub mod bag;
pub mod collection_infos;
pub mod records;
pub mod shared_data;

use crate::stream::ViewSink;
use crate::types::AccountRecordId;

use bag::Bag;
use collection_infos::{ItemCollectionInfosState, ItemCollectionInfosView};
use records::{AccountRecordsState, AccountRecordsView, CurrentAccountIdView};
use shared_data::{AccountSharedDataState, AccountSharedDataView};

/// All registered views, one bag per kind.
#[derive(Default)]
pub(crate) struct ViewRegistry {
    pub collection_infos: Bag<(ItemCollectionInfosView, ViewSink<ItemCollectionInfosState>)>,
    pub records: Bag<(AccountRecordsView, ViewSink<AccountRecordsState>)>,
    pub shared_data: Bag<(AccountSharedDataView, ViewSink<AccountSharedDataState>)>,
    pub current_account_id: Bag<(CurrentAccountIdView, ViewSink<Option<AccountRecordId>>)>,
}
