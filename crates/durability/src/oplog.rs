//! Replication log
//!
//! Two [`ReplicationLog`] implementations:
//!
//! - [`MemoryOplog`]: entries kept in a `Vec`, for tests and embedded use
//! - [`FileOplog`]: framed entries (see [`crate::encoding`]) appended to a
//!   file through a `BufWriter`; buffered bytes are flushed by the write
//!   barrier every `commit_every` appends, on [`FileOplog::flush`], and on drop
//!
//! Entries carry a per-log sequence number and a wall-clock timestamp.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace, warn};

use pagoda_core::{Document, Error, Namespace, OpKind, ReplicationLog, Result};

use crate::encoding::{decode_entry, encode_entry};

/// One replication record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OplogEntry {
    /// Position in the log, starting at 1
    pub seq: u64,
    /// Wall-clock time of the append
    pub wall: DateTime<Utc>,
    /// Insert or update
    pub op: OpKind,
    /// Target namespace
    pub ns: String,
    /// Inserted document, or the update expression to replay
    pub object: Document,
    /// Document selector for updates
    pub query: Option<Document>,
    /// True if the write came from a chunk migration
    pub from_migrate: bool,
}

impl OplogEntry {
    fn new(
        seq: u64,
        op: OpKind,
        ns: &Namespace,
        object: &Document,
        query: Option<&Document>,
        from_migrate: bool,
    ) -> Self {
        Self {
            seq,
            wall: Utc::now(),
            op,
            ns: ns.as_str().to_string(),
            object: object.clone(),
            query: query.cloned(),
            from_migrate,
        }
    }
}

/// In-memory replication log
#[derive(Debug, Default)]
pub struct MemoryOplog {
    entries: Mutex<Vec<OplogEntry>>,
    seq: AtomicU64,
}

impl MemoryOplog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all entries in append order
    pub fn entries(&self) -> Vec<OplogEntry> {
        self.entries.lock().clone()
    }

    /// Most recent entry
    pub fn last(&self) -> Option<OplogEntry> {
        self.entries.lock().last().cloned()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True if nothing has been logged
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop all entries
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl ReplicationLog for MemoryOplog {
    fn append(
        &self,
        op: OpKind,
        ns: &Namespace,
        object: &Document,
        query: Option<&Document>,
        from_migrate: bool,
    ) -> Result<()> {
        let seq = self.seq.fetch_add(1, Ordering::AcqRel) + 1;
        let entry = OplogEntry::new(seq, op, ns, object, query, from_migrate);
        trace!(target: "pagoda::oplog", seq, op = %op, ns = %ns, "Appended oplog entry");
        self.entries.lock().push(entry);
        Ok(())
    }
}

#[derive(Debug)]
struct FileOplogState {
    writer: BufWriter<File>,
    pending: usize,
}

/// File-backed replication log
#[derive(Debug)]
pub struct FileOplog {
    path: PathBuf,
    state: Mutex<FileOplogState>,
    seq: AtomicU64,
    commit_every: usize,
}

impl FileOplog {
    /// Open (or create) a log file for appending
    ///
    /// Sequence numbers continue after the last readable entry already in
    /// the file. `commit_every` is the number of appends between flushes
    /// performed by the write barrier (minimum 1).
    pub fn open<P: AsRef<Path>>(path: P, commit_every: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let last_seq = if path.exists() {
            read_entries(&path)?.last().map_or(0, |e| e.seq)
        } else {
            0
        };

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(target: "pagoda::oplog", path = %path.display(), last_seq, "Opened oplog");

        Ok(Self {
            path,
            state: Mutex::new(FileOplogState {
                writer: BufWriter::new(file),
                pending: 0,
            }),
            seq: AtomicU64::new(last_seq),
            commit_every: commit_every.max(1),
        })
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush buffered entries to the file
    pub fn flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.writer.flush()?;
        state.pending = 0;
        Ok(())
    }

    /// Flush and read back every entry
    pub fn read_all(&self) -> Result<Vec<OplogEntry>> {
        self.flush()?;
        read_entries(&self.path)
    }
}

impl ReplicationLog for FileOplog {
    fn append(
        &self,
        op: OpKind,
        ns: &Namespace,
        object: &Document,
        query: Option<&Document>,
        from_migrate: bool,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let seq = self.seq.load(Ordering::Acquire) + 1;
        let entry = OplogEntry::new(seq, op, ns, object, query, from_migrate);
        let bytes = encode_entry(&entry)?;
        state.writer.write_all(&bytes)?;
        state.pending += 1;
        self.seq.store(seq, Ordering::Release);
        trace!(target: "pagoda::oplog", seq, op = %op, ns = %ns, bytes = bytes.len(), "Appended oplog entry");
        Ok(())
    }

    fn commit_if_needed(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.pending >= self.commit_every {
            state.writer.flush()?;
            trace!(target: "pagoda::oplog", flushed = state.pending, "Oplog write barrier");
            state.pending = 0;
        }
        Ok(())
    }
}

impl Drop for FileOplog {
    fn drop(&mut self) {
        let _ = self.state.get_mut().writer.flush();
    }
}

/// Read every entry from a log file
///
/// A torn entry at the end of the file (partial write) is ignored. Any other
/// decoding failure is returned.
pub fn read_entries<P: AsRef<Path>>(path: P) -> Result<Vec<OplogEntry>> {
    let mut buf = Vec::new();
    BufReader::new(File::open(path.as_ref())?).read_to_end(&mut buf)?;

    let mut entries = Vec::new();
    let mut offset = 0usize;
    while offset < buf.len() {
        match decode_entry(&buf[offset..], offset as u64) {
            Ok((entry, consumed)) => {
                entries.push(entry);
                offset += consumed;
            }
            Err(Error::IncompleteEntry { offset, have, .. }) => {
                warn!(target: "pagoda::oplog", offset, have, "Ignoring torn entry at end of oplog");
                break;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(entries)
}
