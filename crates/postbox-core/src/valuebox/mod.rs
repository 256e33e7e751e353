//! The underlying ordered byte-level key/value store.
//!
//! A `ValueBox` keeps every table as an in-memory ordered map and gains
//! durability from an append-only commit log (the `log` module). Transactions
//! follow a begin/commit protocol: between `begin` and `commit` all writes
//! stage into an ordered overlay; `commit` appends the overlay to the log
//! as a single checksummed frame, fsyncs, and only then applies it to the
//! maps. `discard` drops the overlay without touching disk.
//!
//! Reads consult the overlay first, then the committed maps. Range
//! iteration covers committed rows only; callers that need
//! read-your-writes over ranges keep their own staged state (every table
//! in this crate does).

mod key;
mod log;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use tracing::info;

use crate::error::StorageError;

pub use self::key::ValueBoxKey;
pub(crate) use self::key::prefix_successor;

use self::log::{CommitLog, LogRecord};

/// Identifies one table inside the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueBoxTable {
    pub id: u32,
    pub name: &'static str,
}

/// Ordered byte-level KV store with begin/commit transactions.
pub struct ValueBox {
    tables: HashMap<u32, BTreeMap<Vec<u8>, Vec<u8>>>,
    /// Staged writes of the active transaction, in key order.
    /// `None` values are removals.
    txn: Option<BTreeMap<(u32, Vec<u8>), Option<Vec<u8>>>>,
    log: Option<CommitLog>,
}

impl ValueBox {
    /// Open a durable store backed by the commit log at `path`, replaying
    /// every committed transaction.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let (log, records) = CommitLog::open(path)?;
        let mut tables: HashMap<u32, BTreeMap<Vec<u8>, Vec<u8>>> = HashMap::new();
        let replayed = records.len();
        for record in records {
            let table = tables.entry(record.table).or_default();
            match record.value {
                Some(value) => {
                    table.insert(record.key, value);
                }
                None => {
                    table.remove(&record.key);
                }
            }
        }
        info!(path = %path.display(), replayed, "opened value box");
        Ok(Self {
            tables,
            txn: None,
            log: Some(log),
        })
    }

    /// Open a purely in-memory store (no durability). Used by tests.
    pub fn in_memory() -> Self {
        Self {
            tables: HashMap::new(),
            txn: None,
            log: None,
        }
    }

    /// Begin a transaction. Panics if one is already active.
    pub fn begin(&mut self) {
        assert!(self.txn.is_none(), "transaction already active");
        self.txn = Some(BTreeMap::new());
    }

    pub fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    /// Commit the active transaction: append its write set to the log,
    /// fsync, then apply to the in-memory maps. An empty write set touches
    /// neither the log nor the maps.
    pub fn commit(&mut self) -> Result<(), StorageError> {
        let staged = self.txn.take().expect("no active transaction");
        if staged.is_empty() {
            return Ok(());
        }
        if let Some(log) = self.log.as_mut() {
            let records: Vec<LogRecord> = staged
                .iter()
                .map(|((table, key), value)| LogRecord {
                    table: *table,
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect();
            log.append(&records)?;
        }
        for ((table, key), value) in staged {
            let rows = self.tables.entry(table).or_default();
            match value {
                Some(value) => {
                    rows.insert(key, value);
                }
                None => {
                    rows.remove(&key);
                }
            }
        }
        Ok(())
    }

    /// Drop the active transaction's staged writes.
    pub fn discard(&mut self) {
        self.txn = None;
    }

    /// Stage a write. Panics outside a transaction.
    pub fn set(&mut self, table: ValueBoxTable, key: &ValueBoxKey, value: &[u8]) {
        self.txn
            .as_mut()
            .expect("write outside transaction")
            .insert((table.id, key.as_bytes().to_vec()), Some(value.to_vec()));
    }

    /// Stage a removal. Panics outside a transaction.
    pub fn remove(&mut self, table: ValueBoxTable, key: &ValueBoxKey) {
        self.txn
            .as_mut()
            .expect("write outside transaction")
            .insert((table.id, key.as_bytes().to_vec()), None);
    }

    /// Read a value, staged writes first.
    pub fn get(&self, table: ValueBoxTable, key: &ValueBoxKey) -> Option<Vec<u8>> {
        if let Some(txn) = &self.txn {
            if let Some(staged) = txn.get(&(table.id, key.as_bytes().to_vec())) {
                return staged.clone();
            }
        }
        self.tables
            .get(&table.id)
            .and_then(|rows| rows.get(key.as_bytes()))
            .cloned()
    }

    pub fn exists(&self, table: ValueBoxTable, key: &ValueBoxKey) -> bool {
        self.get(table, key).is_some()
    }

    /// All committed rows whose key starts with `prefix`, in key order.
    /// An empty prefix scans the whole table.
    pub fn scan_prefix(&self, table: ValueBoxTable, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let Some(rows) = self.tables.get(&table.id) else {
            return Vec::new();
        };
        match prefix_successor(prefix) {
            Some(upper) => rows
                .range(prefix.to_vec()..upper)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            None => rows
                .range(prefix.to_vec()..)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// The least-keyed committed row with the given prefix.
    pub fn first_in_prefix(
        &self,
        table: ValueBoxTable,
        prefix: &[u8],
    ) -> Option<(Vec<u8>, Vec<u8>)> {
        let rows = self.tables.get(&table.id)?;
        let (key, value) = match prefix_successor(prefix) {
            Some(upper) => rows.range(prefix.to_vec()..upper).next()?,
            None => rows.range(prefix.to_vec()..).next()?,
        };
        Some((key.clone(), value.clone()))
    }

    /// Keys of all committed rows with the given prefix, in key order.
    pub fn keys_with_prefix(&self, table: ValueBoxTable, prefix: &[u8]) -> Vec<ValueBoxKey> {
        self.scan_prefix(table, prefix)
            .into_iter()
            .map(|(k, _)| ValueBoxKey::from_bytes(k))
            .collect()
    }
}
