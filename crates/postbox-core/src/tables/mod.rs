//! Persistent tables and the contract they share.
//!
//! Every table stages its writes in an in-memory cache and participates in
//! the commit pipeline through two hooks: `before_commit` flushes dirty
//! state into the store's active transaction, `clear_memory_cache` resets
//! the table after a rollback or external invalidation. Tables are purely
//! single-threaded; the transaction driver serializes all access.

pub mod collection_infos;
pub mod collection_items;
pub mod metadata;
pub mod records;
pub mod shared_data;

use crate::valuebox::ValueBox;

/// Hooks every persistent table implements.
///
/// A value present in a table's cache is authoritative for reads within
/// the same transaction; dirty entries must be flushed by `before_commit`,
/// which is idempotent when nothing is dirty.
pub trait Table {
    /// Flush all dirty in-memory state into the store's active transaction
    /// and clear the dirty flags.
    fn before_commit(&mut self, store: &mut ValueBox);

    /// Discard all read caches and pending dirty flags.
    ///
    /// On the normal path this is only called with no dirty state present.
    /// The abort path calls it after the store transaction has been
    /// discarded, which drops staged-but-unflushed values; counters remain
    /// monotonic because the next read re-loads the persisted value.
    fn clear_memory_cache(&mut self);
}
