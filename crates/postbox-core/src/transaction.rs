//! The transaction modifier handle.
//!
//! A `Modifier` is handed to a transaction body and exposes every legal
//! mutation. It never suspends: all methods are pure computation over the
//! worker-owned state, staging changes into table caches and appending to
//! the per-kind operation logs. Reads are served from the caches first, so
//! a transaction always sees its own writes.

use crate::postbox::PostboxState;
use crate::types::{
    AccountRecord, AccountRecordId, ChatListTotalUnreadState, ItemCollectionId, ItemCollectionInfo,
    ItemCollectionItem, MessageId, MessageNamespace, PeerGroupId, PeerId,
};
use crate::valuebox::ValueBoxKey;

pub struct Modifier<'a> {
    pub(crate) state: &'a mut PostboxState,
}

impl Modifier<'_> {
    // -----------------------------------------------------------------------
    // Message-history metadata
    // -----------------------------------------------------------------------

    /// Allocate the next message id for `(peer_id, namespace)`.
    ///
    /// Ids are strictly monotonic across the process lifetime and across
    /// restarts for every id that belongs to a committed transaction; an
    /// aborted transaction may leak ids (monotonic, not gapless).
    pub fn get_next_message_id(
        &mut self,
        peer_id: PeerId,
        namespace: MessageNamespace,
    ) -> MessageId {
        let state = &mut *self.state;
        let id = state
            .tables
            .metadata
            .get_next_message_id_and_increment(&state.store, peer_id, namespace);
        MessageId {
            peer_id,
            namespace,
            id,
        }
    }

    pub fn get_next_stable_message_index_id(&mut self) -> i32 {
        let state = &mut *self.state;
        state
            .tables
            .metadata
            .get_next_stable_message_index_id(&state.store)
    }

    pub fn get_next_peer_operation_log_index(&mut self) -> i32 {
        let state = &mut *self.state;
        state
            .tables
            .metadata
            .get_next_peer_operation_log_index(&state.store)
    }

    pub fn is_chat_list_initialized(&mut self) -> bool {
        let state = &mut *self.state;
        state.tables.metadata.is_chat_list_initialized(&state.store)
    }

    pub fn set_chat_list_initialized(&mut self) {
        let state = &mut *self.state;
        state
            .tables
            .metadata
            .set_chat_list_initialized(&mut state.store);
    }

    pub fn is_peer_history_initialized(&mut self, peer_id: PeerId) -> bool {
        let state = &mut *self.state;
        state
            .tables
            .metadata
            .is_peer_history_initialized(&state.store, peer_id)
    }

    pub fn set_peer_history_initialized(&mut self, peer_id: PeerId) {
        let state = &mut *self.state;
        state
            .tables
            .metadata
            .set_peer_history_initialized(&mut state.store, peer_id);
    }

    pub fn is_chat_list_group_initialized(&mut self, group_id: PeerGroupId) -> bool {
        let state = &mut *self.state;
        state
            .tables
            .metadata
            .is_chat_list_group_initialized(&state.store, group_id)
    }

    pub fn set_chat_list_group_initialized(&mut self, group_id: PeerGroupId) {
        let state = &mut *self.state;
        state
            .tables
            .metadata
            .set_chat_list_group_initialized(&mut state.store, group_id);
    }

    pub fn is_group_feed_index_initialized(&mut self, group_id: PeerGroupId) -> bool {
        let state = &mut *self.state;
        state
            .tables
            .metadata
            .is_group_feed_index_initialized(&state.store, group_id)
    }

    pub fn set_group_feed_index_initialized(&mut self, group_id: PeerGroupId) {
        let state = &mut *self.state;
        state
            .tables
            .metadata
            .set_group_feed_index_initialized(&mut state.store, group_id);
    }

    pub fn get_chat_list_total_unread_state(&mut self) -> ChatListTotalUnreadState {
        let state = &mut *self.state;
        state
            .tables
            .metadata
            .get_chat_list_total_unread_state(&state.store)
    }

    pub fn set_chat_list_total_unread_state(&mut self, unread_state: ChatListTotalUnreadState) {
        let state = &mut *self.state;
        state
            .tables
            .metadata
            .set_chat_list_total_unread_state(&state.store, unread_state);
    }

    // -----------------------------------------------------------------------
    // Item collections
    // -----------------------------------------------------------------------

    pub fn get_item_collection_infos(
        &mut self,
        namespace: i32,
    ) -> Vec<(ItemCollectionId, ItemCollectionInfo)> {
        let state = &mut *self.state;
        state
            .tables
            .collection_infos
            .get_infos(&state.store, namespace)
    }

    pub fn replace_item_collection_infos(
        &mut self,
        namespace: i32,
        infos: Vec<(ItemCollectionId, ItemCollectionInfo)>,
    ) {
        let state = &mut *self.state;
        state.tables.collection_infos.replace_infos(
            namespace,
            infos,
            &mut state.operations.item_collection_info_operations,
        );
    }

    pub fn replace_item_collection_items(
        &mut self,
        collection_id: ItemCollectionId,
        items: Vec<ItemCollectionItem>,
    ) {
        let state = &mut *self.state;
        state.tables.collection_items.replace_items(
            collection_id,
            items,
            &mut state.operations.item_collection_item_operations,
        );
    }

    // -----------------------------------------------------------------------
    // Account records
    // -----------------------------------------------------------------------

    /// All account records, in id order.
    pub fn get_records(&mut self) -> Vec<AccountRecord> {
        let state = &mut *self.state;
        state.tables.records.get_records(&state.store)
    }

    pub fn get_record(&mut self, id: AccountRecordId) -> Option<AccountRecord> {
        let state = &mut *self.state;
        state.tables.records.get_record(&state.store, id)
    }

    /// Create a record under a fresh random id.
    pub fn create_record(&mut self, attributes: serde_json::Value) -> AccountRecordId {
        self.create_record_internal(attributes, None)
    }

    /// Create a record tagged with this process's temporary session id.
    pub fn create_temporary_record(&mut self, attributes: serde_json::Value) -> AccountRecordId {
        let session_id = self.state.temporary_session_id;
        self.create_record_internal(attributes, Some(session_id))
    }

    fn create_record_internal(
        &mut self,
        attributes: serde_json::Value,
        temporary_session_id: Option<i64>,
    ) -> AccountRecordId {
        let state = &mut *self.state;
        let id = loop {
            let candidate = AccountRecordId((rand::random::<u64>() >> 1) as i64);
            if state
                .tables
                .records
                .get_record(&state.store, candidate)
                .is_none()
            {
                break candidate;
            }
        };
        state.tables.records.set_record(
            &state.store,
            id,
            Some(AccountRecord {
                id,
                attributes,
                temporary_session_id,
            }),
            &mut state.operations.account_record_operations,
        );
        id
    }

    /// Update or delete (`record = None`) an existing record slot.
    pub fn update_record(&mut self, id: AccountRecordId, record: Option<AccountRecord>) {
        if let Some(record) = &record {
            assert_eq!(record.id, id, "record id does not match slot id");
        }
        let state = &mut *self.state;
        state.tables.records.set_record(
            &state.store,
            id,
            record,
            &mut state.operations.account_record_operations,
        );
    }

    pub fn get_current_account_id(&mut self) -> Option<AccountRecordId> {
        let state = &mut *self.state;
        state
            .tables
            .account_metadata
            .get_current_account_id(&state.store)
    }

    pub fn set_current_account_id(&mut self, id: Option<AccountRecordId>) {
        let state = &mut *self.state;
        state.tables.account_metadata.set_current_account_id(
            &state.store,
            id,
            &mut state.operations.account_metadata_operations,
        );
    }

    // -----------------------------------------------------------------------
    // Shared data
    // -----------------------------------------------------------------------

    pub fn get_shared_data(&mut self, key: &ValueBoxKey) -> Option<serde_json::Value> {
        let state = &mut *self.state;
        state.tables.shared_data.get(&state.store, key)
    }

    pub fn set_shared_data(&mut self, key: &ValueBoxKey, value: Option<serde_json::Value>) {
        let state = &mut *self.state;
        state.tables.shared_data.set(
            &state.store,
            key,
            value,
            &mut state.operations.updated_shared_data_keys,
        );
    }

    /// Read-modify-write over one shared-data key. Writing back an equal
    /// value is silently dropped and observers see no notification.
    pub fn update_shared_data(
        &mut self,
        key: &ValueBoxKey,
        f: impl FnOnce(Option<serde_json::Value>) -> Option<serde_json::Value>,
    ) {
        let current = self.get_shared_data(key);
        let next = f(current);
        self.set_shared_data(key, next);
    }
}
