//! Durability layer for Pagoda
//!
//! This crate handles the replication log:
//!
//! - Entry framing: `[length][type][payload][crc32]`, MessagePack payloads
//! - MemoryOplog: in-memory log for tests and embedded use
//! - FileOplog: append-only log file with a count-based write barrier
//! - read_entries: decode a log file, tolerating a torn final entry

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod encoding;
pub mod oplog;

pub use encoding::{decode_entry, encode_entry, TYPE_INSERT, TYPE_UPDATE};
pub use oplog::{read_entries, FileOplog, MemoryOplog, OplogEntry};
