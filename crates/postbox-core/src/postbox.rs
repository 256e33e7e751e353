//! The top-level store: worker thread, commit pipeline, public facade.
//!
//! A single logical worker owns the underlying store, every table, the
//! operation logs, and the view registries. All transactions, view
//! constructions, and view disposals execute on that worker; the public
//! [`Postbox`] handle is `Send + Sync` because every request is enqueued
//! onto the worker's job channel. Transactions are totally ordered by
//! worker arrival, and a transaction in flight is not cancellable.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::error::{Error, Result, StorageError};
use crate::operations::TransactionOperations;
use crate::stream::{SubscriptionGuard, TransactionHandle, ViewSink, ViewStream};
use crate::tables::Table;
use crate::tables::collection_infos::ItemCollectionInfosTable;
use crate::tables::collection_items::ItemCollectionItemsTable;
use crate::tables::metadata::MessageHistoryMetadataTable;
use crate::tables::records::{AccountMetadataTable, AccountRecordTable};
use crate::tables::shared_data::SharedDataTable;
use crate::transaction::Modifier;
use crate::types::{AccountRecord, AccountRecordId};
use crate::valuebox::{ValueBox, ValueBoxKey, ValueBoxTable};
use crate::views::ViewRegistry;
use crate::views::bag::BagIndex;
use crate::views::collection_infos::{ItemCollectionInfosState, ItemCollectionInfosView};
use crate::views::records::{AccountRecordsState, AccountRecordsView, CurrentAccountIdView};
use crate::views::shared_data::{AccountSharedDataState, AccountSharedDataView};

const TABLE_MESSAGE_HISTORY_METADATA: ValueBoxTable = ValueBoxTable {
    id: 1,
    name: "messageHistoryMetadata",
};
const TABLE_ACCOUNT_RECORDS: ValueBoxTable = ValueBoxTable {
    id: 2,
    name: "accountRecords",
};
const TABLE_ACCOUNT_METADATA: ValueBoxTable = ValueBoxTable {
    id: 3,
    name: "accountMetadata",
};
const TABLE_SHARED_DATA: ValueBoxTable = ValueBoxTable {
    id: 4,
    name: "sharedData",
};
const TABLE_ITEM_COLLECTION_INFOS: ValueBoxTable = ValueBoxTable {
    id: 5,
    name: "itemCollectionInfos",
};
const TABLE_ITEM_COLLECTION_ITEMS: ValueBoxTable = ValueBoxTable {
    id: 6,
    name: "itemCollectionItems",
};

/// All persistent tables, created at open and living for the process.
pub(crate) struct Tables {
    pub metadata: MessageHistoryMetadataTable,
    pub records: AccountRecordTable,
    pub account_metadata: AccountMetadataTable,
    pub shared_data: SharedDataTable,
    pub collection_infos: ItemCollectionInfosTable,
    pub collection_items: ItemCollectionItemsTable,
}

impl Tables {
    fn new() -> Self {
        Self {
            metadata: MessageHistoryMetadataTable::new(TABLE_MESSAGE_HISTORY_METADATA),
            records: AccountRecordTable::new(TABLE_ACCOUNT_RECORDS),
            account_metadata: AccountMetadataTable::new(TABLE_ACCOUNT_METADATA),
            shared_data: SharedDataTable::new(TABLE_SHARED_DATA),
            collection_infos: ItemCollectionInfosTable::new(TABLE_ITEM_COLLECTION_INFOS),
            collection_items: ItemCollectionItemsTable::new(TABLE_ITEM_COLLECTION_ITEMS),
        }
    }

    /// Every table, in registration order.
    fn all_mut(&mut self) -> [&mut dyn Table; 6] {
        [
            &mut self.metadata,
            &mut self.records,
            &mut self.account_metadata,
            &mut self.shared_data,
            &mut self.collection_infos,
            &mut self.collection_items,
        ]
    }
}

/// Everything the worker owns.
pub(crate) struct PostboxState {
    pub store: ValueBox,
    pub tables: Tables,
    pub operations: TransactionOperations,
    pub views: ViewRegistry,
    pub temporary_session_id: i64,
}

impl PostboxState {
    pub(crate) fn new(store: ValueBox, temporary_session_id: i64) -> Self {
        Self {
            store,
            tables: Tables::new(),
            operations: TransactionOperations::default(),
            views: ViewRegistry::default(),
            temporary_session_id,
        }
    }

    /// Run a full transaction: begin, apply the modifier, run the commit
    /// pipeline. On a storage failure the transaction is aborted and every
    /// table's cache is invalidated before the next transaction runs.
    pub(crate) fn run_transaction<R>(
        &mut self,
        f: impl for<'a> FnOnce(&mut Modifier<'a>) -> R,
    ) -> std::result::Result<R, StorageError> {
        self.store.begin();
        let mut modifier = Modifier { state: &mut *self };
        let output = f(&mut modifier);
        match self.commit_transaction() {
            Ok(()) => Ok(output),
            Err(storage_error) => {
                error!(error = %storage_error, "commit failed, resetting caches");
                self.abort();
                Err(storage_error)
            }
        }
    }

    /// The commit pipeline, in order: replay operation logs against every
    /// registered view (emitting new snapshots where the projection
    /// changed), clear the logs, flush every dirty table, then commit the
    /// underlying store. Views are notified after tables have staged their
    /// final in-memory state, so the snapshot they read is exactly what a
    /// fresh view constructed after the commit would see.
    fn commit_transaction(&mut self) -> std::result::Result<(), StorageError> {
        let PostboxState {
            store,
            tables,
            operations,
            views,
            ..
        } = self;

        if !operations.is_empty() {
            debug!(
                record_ops = operations.account_record_operations.len(),
                metadata_ops = operations.account_metadata_operations.len(),
                info_ops = operations.item_collection_info_operations.len(),
                item_ops = operations.item_collection_item_operations.len(),
                updated_shared_keys = operations.updated_shared_data_keys.len(),
                "committing transaction"
            );
        }

        if !operations.account_record_operations.is_empty()
            || !operations.account_metadata_operations.is_empty()
        {
            for index in views.records.indices() {
                if let Some((view, sink)) = views.records.get_mut(index) {
                    if view.replay(
                        &operations.account_record_operations,
                        &operations.account_metadata_operations,
                    ) {
                        sink.emit(view.state());
                    }
                }
            }
            for index in views.current_account_id.indices() {
                if let Some((view, sink)) = views.current_account_id.get_mut(index) {
                    if view.replay(&operations.account_metadata_operations) {
                        sink.emit(view.current_id());
                    }
                }
            }
        }

        if !operations.item_collection_info_operations.is_empty()
            || !operations.item_collection_item_operations.is_empty()
        {
            for index in views.collection_infos.indices() {
                if let Some((view, sink)) = views.collection_infos.get_mut(index) {
                    if view.replay(
                        store,
                        &mut tables.collection_infos,
                        &tables.collection_items,
                        &operations.item_collection_info_operations,
                        &operations.item_collection_item_operations,
                    ) {
                        sink.emit(view.state());
                    }
                }
            }
        }

        if !operations.updated_shared_data_keys.is_empty() {
            for index in views.shared_data.indices() {
                if let Some((view, sink)) = views.shared_data.get_mut(index) {
                    if view.replay(
                        store,
                        &mut tables.shared_data,
                        &operations.updated_shared_data_keys,
                    ) {
                        sink.emit(view.state());
                    }
                }
            }
        }

        operations.clear();

        for table in tables.all_mut() {
            table.before_commit(store);
        }

        store.commit()
    }

    /// Reset after a failed commit: drop the store's staged writes, the
    /// operation logs, and every table's caches.
    fn abort(&mut self) {
        self.store.discard();
        self.operations.clear();
        for table in self.tables.all_mut() {
            table.clear_memory_cache();
        }
    }
}

enum Job {
    Exec(Box<dyn FnOnce(&mut PostboxState) + Send>),
    Shutdown,
}

fn worker_loop(mut state: PostboxState, queue: Receiver<Job>) {
    for job in queue.iter() {
        match job {
            Job::Exec(f) => f(&mut state),
            Job::Shutdown => break,
        }
    }
    debug!("postbox worker stopped");
}

struct PostboxInner {
    jobs: Sender<Job>,
    temporary_session_id: i64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for PostboxInner {
    fn drop(&mut self) {
        let _ = self.jobs.send(Job::Shutdown);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

/// The top-level embedded store.
///
/// `Postbox` is cheaply clonable (`Arc`-based) and `Send + Sync`. The last
/// clone to drop shuts the worker down and joins it, so the store
/// directory can be reopened immediately.
#[derive(Clone)]
pub struct Postbox {
    inner: Arc<PostboxInner>,
}

impl Postbox {
    /// Open (or create) a store under `base_path`, replaying the commit
    /// log into memory.
    pub fn open(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref();
        std::fs::create_dir_all(base_path).map_err(StorageError::Io)?;
        let store = ValueBox::open(&base_path.join("postbox.log"))?;
        Ok(Self::start(store))
    }

    /// Open a purely in-memory store (no durability). Used by tests.
    pub fn in_memory() -> Self {
        Self::start(ValueBox::in_memory())
    }

    fn start(store: ValueBox) -> Self {
        let temporary_session_id = rand::random::<i64>();
        info!(temporary_session_id, "starting postbox worker");
        let state = PostboxState::new(store, temporary_session_id);
        let (jobs, queue) = unbounded();
        let handle = thread::Builder::new()
            .name("postbox-worker".to_string())
            .spawn(move || worker_loop(state, queue))
            .expect("failed to spawn postbox worker");
        Self {
            inner: Arc::new(PostboxInner {
                jobs,
                temporary_session_id,
                worker: Mutex::new(Some(handle)),
            }),
        }
    }

    /// The random session id generated at open. Records tagged with it
    /// are ephemeral and eligible for reclamation on next open.
    pub fn temporary_session_id(&self) -> i64 {
        self.inner.temporary_session_id
    }

    fn enqueue(&self, f: impl FnOnce(&mut PostboxState) + Send + 'static) {
        let _ = self.inner.jobs.send(Job::Exec(Box::new(f)));
    }

    /// Submit a transaction. The modifier runs on the worker; the returned
    /// handle resolves once the commit pipeline completes. Enqueued
    /// transactions are not cancellable: dropping the handle drops
    /// interest in the result, but the commit proceeds.
    pub fn transaction<T, F>(&self, f: F) -> TransactionHandle<T>
    where
        F: for<'a> FnOnce(&mut Modifier<'a>) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (sink, handle) = TransactionHandle::new();
        self.enqueue(move |state| {
            let result = state.run_transaction(f).map_err(Error::from);
            sink.deliver(result);
        });
        handle
    }

    /// Subscribe to the item-collection infos projection for a set of
    /// namespaces. The stream emits the initial snapshot, then one
    /// snapshot per committed transaction whose replay changed it.
    pub fn item_collection_infos_view(
        &self,
        namespaces: Vec<i32>,
    ) -> ViewStream<ItemCollectionInfosState> {
        let (sink, receiver) = ViewSink::channel();
        let slot = Arc::new(AtomicUsize::new(usize::MAX));
        let register_slot = slot.clone();
        self.enqueue(move |state| {
            state.store.begin();
            let view = ItemCollectionInfosView::new(
                &state.store,
                &mut state.tables.collection_infos,
                &state.tables.collection_items,
                namespaces,
            );
            // Read-only: nothing staged, the commit cannot touch the log.
            state.store.commit().expect("read-only commit");
            let initial = view.state();
            let index = state.views.collection_infos.insert((view, sink.clone()));
            register_slot.store(index.into_raw(), Ordering::SeqCst);
            sink.emit(initial);
        });
        ViewStream::new(receiver, self.subscription_guard(slot, |state, index| {
            state.views.collection_infos.remove(index);
        }))
    }

    /// Subscribe to the full account record set (plus current id).
    pub fn account_records(&self) -> ViewStream<AccountRecordsState> {
        let (sink, receiver) = ViewSink::channel();
        let slot = Arc::new(AtomicUsize::new(usize::MAX));
        let register_slot = slot.clone();
        self.enqueue(move |state| {
            state.store.begin();
            let view = AccountRecordsView::new(
                &state.store,
                &mut state.tables.records,
                &mut state.tables.account_metadata,
            );
            state.store.commit().expect("read-only commit");
            let initial = view.state();
            let index = state.views.records.insert((view, sink.clone()));
            register_slot.store(index.into_raw(), Ordering::SeqCst);
            sink.emit(initial);
        });
        ViewStream::new(receiver, self.subscription_guard(slot, |state, index| {
            state.views.records.remove(index);
        }))
    }

    /// Subscribe to a fixed set of shared-data keys.
    pub fn shared_data(&self, keys: Vec<ValueBoxKey>) -> ViewStream<AccountSharedDataState> {
        let (sink, receiver) = ViewSink::channel();
        let slot = Arc::new(AtomicUsize::new(usize::MAX));
        let register_slot = slot.clone();
        self.enqueue(move |state| {
            state.store.begin();
            let view =
                AccountSharedDataView::new(&state.store, &mut state.tables.shared_data, keys);
            state.store.commit().expect("read-only commit");
            let initial = view.state();
            let index = state.views.shared_data.insert((view, sink.clone()));
            register_slot.store(index.into_raw(), Ordering::SeqCst);
            sink.emit(initial);
        });
        ViewStream::new(receiver, self.subscription_guard(slot, |state, index| {
            state.views.shared_data.remove(index);
        }))
    }

    /// Subscribe to the current account id (distinct: consecutive equal
    /// values are not re-emitted). With `allocate_if_not_exists`, a fresh
    /// record is created and made current when none is set; the allocation
    /// commits before the view registers, so the view never replays its
    /// own creating transaction.
    pub fn current_account_id(
        &self,
        allocate_if_not_exists: bool,
    ) -> ViewStream<Option<AccountRecordId>> {
        let (sink, receiver) = ViewSink::channel();
        let slot = Arc::new(AtomicUsize::new(usize::MAX));
        let register_slot = slot.clone();
        self.enqueue(move |state| {
            let result = state.run_transaction(|modifier| {
                let mut current = modifier.get_current_account_id();
                if current.is_none() && allocate_if_not_exists {
                    let id = modifier.create_record(serde_json::Value::Null);
                    modifier.set_current_account_id(Some(id));
                    current = Some(id);
                }
                current
            });
            let current = match result {
                Ok(current) => current,
                Err(storage_error) => {
                    error!(error = %storage_error, "current account id allocation failed");
                    state
                        .tables
                        .account_metadata
                        .get_current_account_id(&state.store)
                }
            };
            let view = CurrentAccountIdView::new(current);
            let index = state.views.current_account_id.insert((view, sink.clone()));
            register_slot.store(index.into_raw(), Ordering::SeqCst);
            sink.emit(current);
        });
        ViewStream::new(receiver, self.subscription_guard(slot, |state, index| {
            state.views.current_account_id.remove(index);
        }))
    }

    /// Create a fresh record tagged with this process's temporary session
    /// id and return its id.
    pub fn allocated_temporary_account_id(&self) -> TransactionHandle<AccountRecordId> {
        self.transaction(|modifier| modifier.create_temporary_record(serde_json::Value::Null))
    }

    /// One-shot read of all account records.
    pub fn all_account_records(&self) -> TransactionHandle<Vec<AccountRecord>> {
        self.transaction(|modifier| modifier.get_records())
    }

    /// Disposal guard for a subscription. Holds only the job sender; the
    /// removal job loads the slot at execution time, after the (earlier
    /// enqueued) registration job has run. If the worker is gone, disposal
    /// is a no-op.
    fn subscription_guard(
        &self,
        slot: Arc<AtomicUsize>,
        remove: fn(&mut PostboxState, BagIndex),
    ) -> SubscriptionGuard {
        let jobs = self.inner.jobs.clone();
        SubscriptionGuard::new(move || {
            let _ = jobs.send(Job::Exec(Box::new(move |state| {
                let raw = slot.load(Ordering::SeqCst);
                if raw != usize::MAX {
                    remove(state, BagIndex::from_raw(raw));
                }
            })));
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ItemCollectionId, ItemCollectionInfo, PeerId};
    use serde_json::json;

    #[test]
    fn test_operation_logs_cleared_after_commit() {
        let mut state = PostboxState::new(ValueBox::in_memory(), 0);
        state
            .run_transaction(|modifier| {
                modifier.replace_item_collection_infos(
                    0,
                    vec![(
                        ItemCollectionId { namespace: 0, id: 1 },
                        ItemCollectionInfo(json!("info")),
                    )],
                );
                modifier.set_shared_data(
                    &ValueBoxKey::from_bytes(b"k".to_vec()),
                    Some(json!(1)),
                );
                modifier.create_record(json!({}));
            })
            .unwrap();
        assert!(state.operations.is_empty());
    }

    #[test]
    fn test_read_only_transaction_stages_nothing() {
        let mut state = PostboxState::new(ValueBox::in_memory(), 0);
        state
            .run_transaction(|modifier| {
                modifier.get_records();
                modifier.get_chat_list_total_unread_state();
            })
            .unwrap();
        assert!(state.operations.is_empty());
        assert!(!state.store.in_transaction());
    }

    #[test]
    fn test_transactions_are_serialized_in_submission_order() {
        let postbox = Postbox::in_memory();
        let handles: Vec<_> = (0..10)
            .map(|_| postbox.transaction(|m| m.get_next_message_id(PeerId(1), 0).id))
            .collect();
        let ids: Vec<i32> = handles.into_iter().map(|h| h.wait().unwrap()).collect();
        assert_eq!(ids, (1..=10).collect::<Vec<i32>>());
    }

    #[test]
    fn test_temporary_session_id_tags_allocated_records() {
        let postbox = Postbox::in_memory();
        let id = postbox.allocated_temporary_account_id().wait().unwrap();
        let records = postbox.all_account_records().wait().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, id);
        assert_eq!(
            records[0].temporary_session_id,
            Some(postbox.temporary_session_id())
        );
    }

    #[test]
    fn test_view_disposal_removes_registry_entry() {
        let postbox = Postbox::in_memory();
        let stream = postbox.item_collection_infos_view(vec![0]);
        stream.recv().unwrap();
        drop(stream);

        // The disposal job runs before this transaction; a subsequent
        // replacement must not panic or emit anywhere.
        postbox
            .transaction(|modifier| {
                modifier.replace_item_collection_infos(
                    0,
                    vec![(
                        ItemCollectionId { namespace: 0, id: 1 },
                        ItemCollectionInfo(json!("x")),
                    )],
                );
            })
            .wait()
            .unwrap();
    }
}
