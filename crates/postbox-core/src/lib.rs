//! # Postbox
//!
//! An embedded, transactional key/value store with atomic multi-table
//! updates, in-memory write buffering, and live reactive views that
//! recompute incrementally when committed transactions affect them.
//!
//! All state is owned by a single worker thread; the [`Postbox`] handle is
//! cheap to clone and safe to share. A transaction is a plain closure over
//! a [`Modifier`] handle, serialized onto the worker and committed through
//! a two-phase pipeline: registered views replay the transaction's
//! operation logs first, then dirty tables flush into the underlying
//! store's commit.
//!
//! ## Quick Start
//!
//! ```no_run
//! use postbox_core::{Postbox, PeerId};
//!
//! let postbox = Postbox::open("postbox-data").unwrap();
//!
//! // Allocate a message id inside a transaction.
//! let message_id = postbox
//!     .transaction(|modifier| modifier.get_next_message_id(PeerId(7), 0))
//!     .wait()
//!     .unwrap();
//! assert_eq!(message_id.id, 1);
//!
//! // Observe the account record set reactively.
//! let records = postbox.account_records();
//! let initial = records.recv().unwrap();
//! assert!(initial.records.is_empty());
//! ```

pub mod error;
pub mod operations;
pub mod postbox;
pub mod stream;
pub mod tables;
pub mod transaction;
pub mod types;
pub mod valuebox;
pub mod views;

pub use error::{Error, Result, StorageError};
pub use postbox::Postbox;
pub use stream::{TransactionHandle, ViewStream};
pub use transaction::Modifier;
pub use types::{
    AccountRecord, AccountRecordId, ChatListTotalUnreadCounters, ChatListTotalUnreadState,
    ItemCollectionId, ItemCollectionInfo, ItemCollectionItem, MessageId, MessageNamespace,
    PeerGroupId, PeerId, PeerSummaryCounterTags,
};
pub use valuebox::{ValueBox, ValueBoxKey, ValueBoxTable};
pub use views::collection_infos::{
    ItemCollectionEntry, ItemCollectionInfosState, ItemCollectionInfosView,
};
pub use views::records::{AccountRecordsState, AccountRecordsView, CurrentAccountIdView};
pub use views::shared_data::{AccountSharedDataState, AccountSharedDataView};
