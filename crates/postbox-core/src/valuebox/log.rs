//! Append-only commit log.
//!
//! Durability layer for the in-memory store: every committed transaction
//! appends exactly one checksummed frame containing its ordered write set,
//! followed by an fsync. On open the log is replayed front to back. An
//! append torn by a crash leaves a final frame that runs past end of file;
//! replay truncates it away, which is what makes a commit atomic across
//! crashes. A fully contained frame that fails its checksum or does not
//! decode is corruption rather than a torn append, and the open fails with
//! [`StorageError::CorruptedLog`].
//!
//! Frame layout:
//!
//! ```text
//! [payload_len: u32 LE][xxh64(payload): u64 LE][payload]
//! ```
//!
//! where `payload` is the MessagePack encoding of `Vec<LogRecord>`.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;
use xxhash_rust::xxh64::xxh64;

use crate::error::StorageError;

/// Seed for frame checksums. Arbitrary but fixed: changing it invalidates
/// every existing log.
const CHECKSUM_SEED: u64 = 0x706f_7374_626f_78;

/// Size of the fixed frame header (length + checksum).
const FRAME_HEADER_SIZE: usize = 4 + 8;

/// One key/value change inside a committed transaction.
/// `value: None` records a removal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct LogRecord {
    pub table: u32,
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
}

/// Append-only commit log backed by a single file.
pub(crate) struct CommitLog {
    file: File,
}

impl CommitLog {
    /// Open (or create) the log at `path` and replay every frame.
    ///
    /// Returns the log handle and the replayed records in commit order.
    /// A torn tail is truncated so subsequent appends start from the last
    /// intact frame; a fully contained frame that fails validation aborts
    /// the open with [`StorageError::CorruptedLog`].
    pub fn open(path: &Path) -> Result<(Self, Vec<LogRecord>), StorageError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;

        let mut records = Vec::new();
        let mut offset = 0usize;
        while offset + FRAME_HEADER_SIZE <= contents.len() {
            let payload_len =
                u32::from_le_bytes(contents[offset..offset + 4].try_into().unwrap()) as usize;
            let checksum =
                u64::from_le_bytes(contents[offset + 4..offset + 12].try_into().unwrap());
            let payload_start = offset + FRAME_HEADER_SIZE;
            let payload_end = match payload_start.checked_add(payload_len) {
                Some(end) if end <= contents.len() => end,
                // The frame claims more bytes than the file holds: an
                // append torn by a crash, truncated below.
                _ => break,
            };
            let payload = &contents[payload_start..payload_end];
            if xxh64(payload, CHECKSUM_SEED) != checksum {
                return Err(StorageError::CorruptedLog {
                    offset: offset as u64,
                });
            }
            let frame = rmp_serde::from_slice::<Vec<LogRecord>>(payload).map_err(|_| {
                StorageError::CorruptedLog {
                    offset: offset as u64,
                }
            })?;
            records.extend(frame);
            offset = payload_end;
        }

        let intact_end = offset;
        if intact_end < contents.len() {
            warn!(
                discarded = contents.len() - intact_end,
                offset = intact_end,
                "truncating torn commit log tail"
            );
            file.set_len(intact_end as u64)?;
            file.sync_all()?;
        }
        // Appends continue from the last intact frame.
        file.seek(SeekFrom::Start(intact_end as u64))?;

        Ok((Self { file }, records))
    }

    /// Append one frame with the given records and fsync.
    pub fn append(&mut self, records: &[LogRecord]) -> Result<(), StorageError> {
        let payload =
            rmp_serde::to_vec(records).map_err(|e| StorageError::Encoding(e.to_string()))?;
        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&xxh64(&payload, CHECKSUM_SEED).to_le_bytes());
        frame.extend_from_slice(&payload);
        self.file.write_all(&frame)?;
        self.file.sync_all()?;
        Ok(())
    }
}
