//! Domain identifiers and encoded domain values.
//!
//! All identifiers are fixed-width integer tuples with a defined byte
//! layout; where the underlying store's index order is semantically
//! meaningful, the derived `Ord` matches the lexicographic order of the
//! encoded key bytes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A peer (chat partner, group, channel) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub i64);

/// A chat-list group identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerGroupId(pub i32);

/// Namespace of a message id (e.g. cloud vs. local messages).
pub type MessageNamespace = i32;

/// A message identifier: peer, namespace, and a per-`(peer, namespace)`
/// monotonically increasing id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId {
    pub peer_id: PeerId,
    pub namespace: MessageNamespace,
    pub id: i32,
}

/// An item collection identifier.
///
/// The derived ordering (namespace, then id) equals the lexicographic
/// order of the collection's encoded key bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemCollectionId {
    pub namespace: i32,
    pub id: i64,
}

/// Opaque per-collection metadata, supplied by upper layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemCollectionInfo(pub serde_json::Value);

/// A single item inside an item collection, ordered by `key` within its
/// collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemCollectionItem {
    pub key: i64,
    pub value: serde_json::Value,
}

/// An account record identifier (random, non-negative).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountRecordId(pub i64);

/// A stored account record.
///
/// Records carrying a `temporary_session_id` are understood by upper
/// layers to be ephemeral and eligible for reclamation on next open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: AccountRecordId,
    pub attributes: serde_json::Value,
    pub temporary_session_id: Option<i64>,
}

/// Bitmask tag selecting a class of peers in the total-unread summary.
pub type PeerSummaryCounterTags = i32;

/// Unread counters for one summary tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChatListTotalUnreadCounters {
    #[serde(rename = "m")]
    pub message_count: i32,
    #[serde(rename = "c")]
    pub chat_count: i32,
}

/// The chat-list-wide unread summary, keyed by summary tag.
///
/// The short field names are the persisted encoding's field keys; the tag
/// (`k` in the encoded form) is the map key.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChatListTotalUnreadState {
    #[serde(rename = "ad")]
    pub absolute_counters: BTreeMap<PeerSummaryCounterTags, ChatListTotalUnreadCounters>,
    #[serde(rename = "fd")]
    pub filtered_counters: BTreeMap<PeerSummaryCounterTags, ChatListTotalUnreadCounters>,
}
