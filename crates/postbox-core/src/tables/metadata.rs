//! Message-history metadata table.
//!
//! One underlying KV table holding a heterogeneous set of singletons,
//! initialization flags, and per-peer monotonic counters, distinguished
//! by a single-byte prefix:
//!
//! | Prefix | Category                    | Key layout                      | Value        |
//! |--------|-----------------------------|---------------------------------|--------------|
//! | 0      | ChatListInitialized         | `[0]`                           | empty        |
//! | 1      | PeerHistoryInitialized      | `[peerId(8), 1]`                | empty        |
//! | 2      | PeerNextMessageId           | `[peerId(8), 2, namespace(4)]`  | `i32` LE     |
//! | 3      | NextStableMessageId         | `[3]`                           | `i32` LE     |
//! | 4      | ChatListTotalUnreadState    | `[4]`                           | encoded      |
//! | 5      | NextPeerOperationLogIndex   | `[5]`                           | `i32` LE     |
//! | 6      | ChatListGroupInitialized    | `[groupId(4), 6]`               | empty        |
//! | 7      | GroupFeedIndexInitialized   | `[groupId(4), 7]`               | empty        |
//!
//! Integer key fields are little-endian; these rows are addressed
//! point-wise, never range-scanned. Counter values are 4-byte
//! little-endian on both read and write.
//!
//! Counters are cached as the *next value to return*, so dropping an
//! unflushed cache entry can only make the next read re-load an older
//! persisted value: ids stay monotonic (but not gapless) across rollbacks.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::tables::Table;
use crate::types::{ChatListTotalUnreadState, MessageNamespace, PeerGroupId, PeerId};
use crate::valuebox::{ValueBox, ValueBoxKey, ValueBoxTable};

const PREFIX_CHAT_LIST_INITIALIZED: u8 = 0;
const PREFIX_PEER_HISTORY_INITIALIZED: u8 = 1;
const PREFIX_PEER_NEXT_MESSAGE_ID: u8 = 2;
const PREFIX_NEXT_STABLE_MESSAGE_ID: u8 = 3;
const PREFIX_CHAT_LIST_TOTAL_UNREAD_STATE: u8 = 4;
const PREFIX_NEXT_PEER_OPERATION_LOG_INDEX: u8 = 5;
const PREFIX_CHAT_LIST_GROUP_INITIALIZED: u8 = 6;
const PREFIX_GROUP_FEED_INDEX_INITIALIZED: u8 = 7;

fn chat_list_initialized_key() -> ValueBoxKey {
    ValueBoxKey::new().with_u8(PREFIX_CHAT_LIST_INITIALIZED)
}

fn peer_history_initialized_key(peer_id: PeerId) -> ValueBoxKey {
    ValueBoxKey::new()
        .with_i64_le(peer_id.0)
        .with_u8(PREFIX_PEER_HISTORY_INITIALIZED)
}

fn peer_next_message_id_key(peer_id: PeerId, namespace: MessageNamespace) -> ValueBoxKey {
    ValueBoxKey::new()
        .with_i64_le(peer_id.0)
        .with_u8(PREFIX_PEER_NEXT_MESSAGE_ID)
        .with_i32_le(namespace)
}

fn next_stable_message_id_key() -> ValueBoxKey {
    ValueBoxKey::new().with_u8(PREFIX_NEXT_STABLE_MESSAGE_ID)
}

fn chat_list_total_unread_state_key() -> ValueBoxKey {
    ValueBoxKey::new().with_u8(PREFIX_CHAT_LIST_TOTAL_UNREAD_STATE)
}

fn next_peer_operation_log_index_key() -> ValueBoxKey {
    ValueBoxKey::new().with_u8(PREFIX_NEXT_PEER_OPERATION_LOG_INDEX)
}

fn chat_list_group_initialized_key(group_id: PeerGroupId) -> ValueBoxKey {
    ValueBoxKey::new()
        .with_i32_le(group_id.0)
        .with_u8(PREFIX_CHAT_LIST_GROUP_INITIALIZED)
}

fn group_feed_index_initialized_key(group_id: PeerGroupId) -> ValueBoxKey {
    ValueBoxKey::new()
        .with_i32_le(group_id.0)
        .with_u8(PREFIX_GROUP_FEED_INDEX_INITIALIZED)
}

fn decode_counter(bytes: &[u8]) -> Option<i32> {
    match <[u8; 4]>::try_from(bytes) {
        Ok(bytes) => Some(i32::from_le_bytes(bytes)),
        Err(_) => {
            warn!(len = bytes.len(), "counter value has wrong length, treating as absent");
            None
        }
    }
}

/// Singleton scalars, monotonic counters, and initialization flags for
/// message history.
pub struct MessageHistoryMetadataTable {
    table: ValueBoxTable,
    chat_list_initialized: bool,
    initialized_peer_histories: HashSet<PeerId>,
    initialized_chat_list_groups: HashSet<PeerGroupId>,
    initialized_group_feed_indices: HashSet<PeerGroupId>,
    /// Next message id to return, per `(peer, namespace)`.
    next_message_ids: HashMap<(PeerId, MessageNamespace), i32>,
    dirty_next_message_ids: HashSet<(PeerId, MessageNamespace)>,
    next_stable_message_id: Option<i32>,
    next_stable_message_id_dirty: bool,
    next_peer_operation_log_index: Option<i32>,
    next_peer_operation_log_index_dirty: bool,
    chat_list_total_unread_state: Option<ChatListTotalUnreadState>,
    chat_list_total_unread_state_dirty: bool,
}

impl MessageHistoryMetadataTable {
    pub fn new(table: ValueBoxTable) -> Self {
        Self {
            table,
            chat_list_initialized: false,
            initialized_peer_histories: HashSet::new(),
            initialized_chat_list_groups: HashSet::new(),
            initialized_group_feed_indices: HashSet::new(),
            next_message_ids: HashMap::new(),
            dirty_next_message_ids: HashSet::new(),
            next_stable_message_id: None,
            next_stable_message_id_dirty: false,
            next_peer_operation_log_index: None,
            next_peer_operation_log_index_dirty: false,
            chat_list_total_unread_state: None,
            chat_list_total_unread_state_dirty: false,
        }
    }

    // -----------------------------------------------------------------------
    // Initialization flags
    //
    // Idempotent booleans encoded as key existence with an empty value.
    // Only positive results are cached; a miss consults the store.
    // -----------------------------------------------------------------------

    pub fn is_chat_list_initialized(&mut self, store: &ValueBox) -> bool {
        if self.chat_list_initialized {
            return true;
        }
        if store.exists(self.table, &chat_list_initialized_key()) {
            self.chat_list_initialized = true;
            return true;
        }
        false
    }

    pub fn set_chat_list_initialized(&mut self, store: &mut ValueBox) {
        if !self.is_chat_list_initialized(store) {
            store.set(self.table, &chat_list_initialized_key(), &[]);
            self.chat_list_initialized = true;
        }
    }

    pub fn is_peer_history_initialized(&mut self, store: &ValueBox, peer_id: PeerId) -> bool {
        if self.initialized_peer_histories.contains(&peer_id) {
            return true;
        }
        if store.exists(self.table, &peer_history_initialized_key(peer_id)) {
            self.initialized_peer_histories.insert(peer_id);
            return true;
        }
        false
    }

    pub fn set_peer_history_initialized(&mut self, store: &mut ValueBox, peer_id: PeerId) {
        if !self.is_peer_history_initialized(store, peer_id) {
            store.set(self.table, &peer_history_initialized_key(peer_id), &[]);
            self.initialized_peer_histories.insert(peer_id);
        }
    }

    pub fn is_chat_list_group_initialized(
        &mut self,
        store: &ValueBox,
        group_id: PeerGroupId,
    ) -> bool {
        if self.initialized_chat_list_groups.contains(&group_id) {
            return true;
        }
        if store.exists(self.table, &chat_list_group_initialized_key(group_id)) {
            self.initialized_chat_list_groups.insert(group_id);
            return true;
        }
        false
    }

    pub fn set_chat_list_group_initialized(&mut self, store: &mut ValueBox, group_id: PeerGroupId) {
        if !self.is_chat_list_group_initialized(store, group_id) {
            store.set(self.table, &chat_list_group_initialized_key(group_id), &[]);
            self.initialized_chat_list_groups.insert(group_id);
        }
    }

    pub fn is_group_feed_index_initialized(
        &mut self,
        store: &ValueBox,
        group_id: PeerGroupId,
    ) -> bool {
        if self.initialized_group_feed_indices.contains(&group_id) {
            return true;
        }
        if store.exists(self.table, &group_feed_index_initialized_key(group_id)) {
            self.initialized_group_feed_indices.insert(group_id);
            return true;
        }
        false
    }

    pub fn set_group_feed_index_initialized(
        &mut self,
        store: &mut ValueBox,
        group_id: PeerGroupId,
    ) {
        if !self.is_group_feed_index_initialized(store, group_id) {
            store.set(self.table, &group_feed_index_initialized_key(group_id), &[]);
            self.initialized_group_feed_indices.insert(group_id);
        }
    }

    // -----------------------------------------------------------------------
    // Monotonic counters
    //
    // Each returns the next id and advances by one. The cache holds the
    // next value to return; the flush persists that cached next value.
    // Counters start at 1 when absent.
    // -----------------------------------------------------------------------

    pub fn get_next_message_id_and_increment(
        &mut self,
        store: &ValueBox,
        peer_id: PeerId,
        namespace: MessageNamespace,
    ) -> i32 {
        let slot = (peer_id, namespace);
        let next = match self.next_message_ids.get(&slot) {
            Some(next) => *next,
            None => store
                .get(self.table, &peer_next_message_id_key(peer_id, namespace))
                .and_then(|bytes| decode_counter(&bytes))
                .unwrap_or(1),
        };
        self.next_message_ids.insert(slot, next + 1);
        self.dirty_next_message_ids.insert(slot);
        next
    }

    pub fn get_next_stable_message_index_id(&mut self, store: &ValueBox) -> i32 {
        let next = match self.next_stable_message_id {
            Some(next) => next,
            None => store
                .get(self.table, &next_stable_message_id_key())
                .and_then(|bytes| decode_counter(&bytes))
                .unwrap_or(1),
        };
        self.next_stable_message_id = Some(next + 1);
        self.next_stable_message_id_dirty = true;
        next
    }

    pub fn get_next_peer_operation_log_index(&mut self, store: &ValueBox) -> i32 {
        let next = match self.next_peer_operation_log_index {
            Some(next) => next,
            None => store
                .get(self.table, &next_peer_operation_log_index_key())
                .and_then(|bytes| decode_counter(&bytes))
                .unwrap_or(1),
        };
        self.next_peer_operation_log_index = Some(next + 1);
        self.next_peer_operation_log_index_dirty = true;
        next
    }

    // -----------------------------------------------------------------------
    // Chat-list total unread state
    // -----------------------------------------------------------------------

    /// The current unread summary, lazily decoded from the store on first
    /// access. Absent or undecodable rows yield the empty state.
    pub fn get_chat_list_total_unread_state(&mut self, store: &ValueBox) -> ChatListTotalUnreadState {
        if let Some(state) = &self.chat_list_total_unread_state {
            return state.clone();
        }
        let state: ChatListTotalUnreadState = store
            .get(self.table, &chat_list_total_unread_state_key())
            .and_then(|bytes| match rmp_serde::from_slice(&bytes) {
                Ok(state) => Some(state),
                Err(error) => {
                    warn!(%error, "stored unread state failed to decode, treating as absent");
                    None
                }
            })
            .unwrap_or_default();
        self.chat_list_total_unread_state = Some(state.clone());
        state
    }

    /// A no-op when `state` equals the current value.
    pub fn set_chat_list_total_unread_state(
        &mut self,
        store: &ValueBox,
        state: ChatListTotalUnreadState,
    ) {
        let current = self.get_chat_list_total_unread_state(store);
        if current == state {
            return;
        }
        self.chat_list_total_unread_state = Some(state);
        self.chat_list_total_unread_state_dirty = true;
    }
}

impl Table for MessageHistoryMetadataTable {
    fn before_commit(&mut self, store: &mut ValueBox) {
        for slot in self.dirty_next_message_ids.drain() {
            let key = peer_next_message_id_key(slot.0, slot.1);
            match self.next_message_ids.get(&slot) {
                Some(next) => store.set(self.table, &key, &next.to_le_bytes()),
                None => store.remove(self.table, &key),
            }
        }
        if self.next_stable_message_id_dirty {
            let key = next_stable_message_id_key();
            match self.next_stable_message_id {
                Some(next) => store.set(self.table, &key, &next.to_le_bytes()),
                None => store.remove(self.table, &key),
            }
            self.next_stable_message_id_dirty = false;
        }
        if self.next_peer_operation_log_index_dirty {
            let key = next_peer_operation_log_index_key();
            match self.next_peer_operation_log_index {
                Some(next) => store.set(self.table, &key, &next.to_le_bytes()),
                None => store.remove(self.table, &key),
            }
            self.next_peer_operation_log_index_dirty = false;
        }
        if self.chat_list_total_unread_state_dirty {
            if let Some(state) = &self.chat_list_total_unread_state {
                match rmp_serde::to_vec(state) {
                    Ok(bytes) => {
                        store.set(self.table, &chat_list_total_unread_state_key(), &bytes)
                    }
                    Err(error) => warn!(%error, "unread state failed to encode, skipping flush"),
                }
            }
            self.chat_list_total_unread_state_dirty = false;
        }
    }

    fn clear_memory_cache(&mut self) {
        self.chat_list_initialized = false;
        self.initialized_peer_histories.clear();
        self.initialized_chat_list_groups.clear();
        self.initialized_group_feed_indices.clear();
        self.next_message_ids.clear();
        self.dirty_next_message_ids.clear();
        self.next_stable_message_id = None;
        self.next_stable_message_id_dirty = false;
        self.next_peer_operation_log_index = None;
        self.next_peer_operation_log_index_dirty = false;
        self.chat_list_total_unread_state = None;
        self.chat_list_total_unread_state_dirty = false;
    }
}
