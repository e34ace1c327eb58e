//! # LogStore — Append-Only Durable Log
//!
//! All durable state on a WEFT node flows through this type. Records are
//! never mutated or deleted; a key's "current value" is simply the most
//! recently appended record for that key, served from a materialized
//! in-memory view.
//!
//! ## On-Disk Format
//!
//! One flat file (`weft.log`) of consecutive frames:
//!
//! ```text
//! | u32 BE body length | bincode(LogRecord) | 32-byte BLAKE3 of body |
//! ```
//!
//! ## Crash Consistency
//!
//! A crash mid-append leaves a torn frame at the tail: a short length
//! prefix, a short body, or a checksum that doesn't match. On open we
//! scan forward frame by frame; the first frame that fails any check ends
//! the scan and the file is truncated back to the last good offset. The
//! effect: a reopened store exposes either the full effect of the last
//! completed append or none of it — never half a record.
//!
//! ## Failure Latch
//!
//! If the medium rejects a write, the store poisons itself. Every later
//! `append` fails fast with [`StorageError::Poisoned`] instead of
//! guessing what state the file is in. Reads keep working — the view is
//! in memory and still reflects every acknowledged append.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during log operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The underlying medium rejected a read or write. Fatal for writes:
    /// the store latches poisoned and refuses further appends.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A previous append failed at the medium; the store refuses to write
    /// until reopened.
    #[error("store is poisoned after an earlier write failure")]
    Poisoned,

    /// A record failed to (de)serialize. Indicates a bug or corruption,
    /// not a transient condition.
    #[error("record serialization error: {0}")]
    Serialization(String),

    /// The record exceeds [`config::MAX_RECORD_SIZE`].
    #[error("record too large: {size} bytes (limit {limit})")]
    RecordTooLarge { size: usize, limit: usize },
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One immutable entry in the log.
///
/// Owned exclusively by [`LogStore`]; once committed a record is never
/// rewritten. Sequence numbers are assigned by the store and increase by
/// one per committed append, with no gaps while the file is healthy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Position in the global append order.
    pub seq: u64,
    /// UTF-8 key. Keys are namespaced by convention (`seed/…`, `tx/…`).
    pub key: String,
    /// Opaque value bytes. The store never interprets them.
    pub value: Vec<u8>,
}

// ---------------------------------------------------------------------------
// LogStore
// ---------------------------------------------------------------------------

/// Append-only durable log plus a materialized key→latest-value view.
///
/// # Thread Safety
///
/// `LogStore` is `Send + Sync` and is shared as `Arc<LogStore>`. Appends
/// are linearized by an internal mutex into one global sequence; reads go
/// through an `RwLock`-guarded view and reflect a consistent snapshot at
/// call time. A read concurrent with an in-flight append may or may not
/// see it — there are no cross-call read transactions.
pub struct LogStore {
    /// Appender state: the open file positioned at the tail, plus the
    /// next sequence number. One lock, one global order.
    writer: Mutex<Appender>,
    /// Latest committed value per key.
    view: RwLock<BTreeMap<String, Vec<u8>>>,
    /// Set after a failed write; checked before every append.
    poisoned: AtomicBool,
    /// Path of the log file, for diagnostics.
    path: PathBuf,
    /// Owns the backing directory for temporary stores so it is removed
    /// when the store is dropped. `None` for persistent stores.
    _tempdir: Option<tempfile::TempDir>,
}

struct Appender {
    file: File,
    next_seq: u64,
}

impl LogStore {
    /// Opens (or creates) the log inside `dir`, replaying every committed
    /// frame to rebuild the view and truncating any torn tail.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StorageError> {
        std::fs::create_dir_all(dir.as_ref())?;
        let path = dir.as_ref().join(config::LOG_FILE_NAME);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let (view, next_seq, valid_len) = Self::replay(&mut file)?;

        let actual_len = file.metadata()?.len();
        if valid_len < actual_len {
            warn!(
                path = %path.display(),
                torn_bytes = actual_len - valid_len,
                "truncating torn tail frame left by an interrupted append"
            );
            file.set_len(valid_len)?;
            file.sync_data()?;
        }
        file.seek(SeekFrom::Start(valid_len))?;

        debug!(
            path = %path.display(),
            records = next_seq,
            keys = view.len(),
            "log opened"
        );

        Ok(Self {
            writer: Mutex::new(Appender { file, next_seq }),
            view: RwLock::new(view),
            poisoned: AtomicBool::new(false),
            path,
            _tempdir: None,
        })
    }

    /// Opens a store in a fresh temporary directory that is removed when
    /// the store is dropped.
    ///
    /// Ideal for unit tests — no leftover filesystem state, no cleanup
    /// needed. The durability path is the real one: same file format,
    /// same replay, same fsync discipline as [`open`](Self::open).
    pub fn open_temporary() -> Result<Self, StorageError> {
        let dir = tempfile::tempdir()?;
        let mut store = Self::open(dir.path())?;
        store._tempdir = Some(dir);
        Ok(store)
    }

    /// Scans the file from the start, validating each frame. Returns the
    /// rebuilt view, the next sequence number, and the byte offset just
    /// past the last fully committed frame.
    fn replay(file: &mut File) -> Result<(BTreeMap<String, Vec<u8>>, u64, u64), StorageError> {
        file.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let mut view = BTreeMap::new();
        let mut next_seq: u64 = 0;
        let mut offset: usize = 0;

        loop {
            let remaining = buf.len() - offset;
            if remaining == 0 {
                break;
            }
            if remaining < 4 {
                break; // torn length prefix
            }

            let len =
                u32::from_be_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
                    as usize;
            // A corrupt length field can claim anything; bound it before
            // trusting it.
            if len > config::MAX_RECORD_SIZE + 1024 {
                break;
            }
            let frame_end = offset + 4 + len + config::CHECKSUM_LENGTH;
            if frame_end > buf.len() {
                break; // torn body or checksum
            }

            let body = &buf[offset + 4..offset + 4 + len];
            let stored_sum = &buf[offset + 4 + len..frame_end];
            if blake3::hash(body).as_bytes() != stored_sum {
                break; // torn or corrupted frame
            }

            let record: LogRecord = bincode::deserialize(body)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            next_seq = record.seq + 1;
            view.insert(record.key, record.value);
            offset = frame_end;
        }

        Ok((view, next_seq, offset as u64))
    }

    /// Durably commits a new record and returns its sequence number.
    ///
    /// The frame is written and `sync_data`'d before this returns —
    /// callers may acknowledge success to a remote peer the moment they
    /// get an `Ok`. Concurrent appends are linearized; each one observes
    /// the sequence number the global order gave it.
    pub fn append(&self, key: &str, value: &[u8]) -> Result<u64, StorageError> {
        if self.poisoned.load(Ordering::Acquire) {
            return Err(StorageError::Poisoned);
        }

        let size = key.len() + value.len();
        if size > config::MAX_RECORD_SIZE {
            return Err(StorageError::RecordTooLarge {
                size,
                limit: config::MAX_RECORD_SIZE,
            });
        }

        let mut w = self.writer.lock();
        let record = LogRecord {
            seq: w.next_seq,
            key: key.to_string(),
            value: value.to_vec(),
        };
        let body = bincode::serialize(&record)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let mut frame = Vec::with_capacity(4 + body.len() + config::CHECKSUM_LENGTH);
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(&body);
        frame.extend_from_slice(blake3::hash(&body).as_bytes());

        if let Err(e) = w.file.write_all(&frame).and_then(|_| w.file.sync_data()) {
            // The file may now hold a torn frame. Latch closed; the next
            // open will truncate whatever landed.
            self.poisoned.store(true, Ordering::Release);
            warn!(path = %self.path.display(), error = %e, "append failed, store poisoned");
            return Err(StorageError::Io(e));
        }

        let seq = w.next_seq;
        w.next_seq += 1;
        // Update the view before releasing the writer lock so the view's
        // order of latest-values matches the commit order.
        self.view.write().insert(record.key, record.value);
        Ok(seq)
    }

    /// Returns the latest committed value for `key`, if any.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.view.read().get(key).cloned()
    }

    /// Iterates `(key, value)` pairs whose key starts with `prefix`, in
    /// ascending key order.
    ///
    /// Each call takes a fresh, consistent snapshot of the view — the
    /// traversal is finite and restartable, and appends racing with it
    /// don't tear it.
    pub fn iter_prefix(&self, prefix: &str) -> impl Iterator<Item = (String, Vec<u8>)> {
        let view = self.view.read();
        let pairs: Vec<(String, Vec<u8>)> = view
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        pairs.into_iter()
    }

    /// Iterates every `(key, value)` pair in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (String, Vec<u8>)> {
        self.iter_prefix("")
    }

    /// Number of distinct keys in the view.
    pub fn key_count(&self) -> usize {
        self.view.read().len()
    }

    /// The sequence number the next append will receive.
    pub fn next_seq(&self) -> u64 {
        self.writer.lock().next_seq
    }

    /// True once a write failure has latched the store read-only.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// Path of the underlying log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for LogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStore")
            .field("path", &self.path)
            .field("keys", &self.key_count())
            .field("poisoned", &self.is_poisoned())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
