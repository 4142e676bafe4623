//! Collaborator contracts for the update engine
//!
//! The update engine only talks to storage, indexes, matchers and the
//! replication log through these traits. Reference implementations live in
//! `pagoda-storage`, `pagoda-durability` and the engine's `query` module.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::document::Document;
use crate::error::Result;
use crate::locator::RecordLocator;
use crate::namespace::Namespace;

/// Per-candidate output of a match test
///
/// When `want_elem_match_key` is set, a successful match through an array
/// records the position of the matching array element, which resolves the
/// positional `$` segment of an update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchDetails {
    /// Ask the matcher to record the element match key
    pub want_elem_match_key: bool,
    /// Position of the array element that satisfied the filter
    pub elem_match_key: Option<usize>,
}

impl MatchDetails {
    /// Clear results while keeping the request flag
    pub fn reset(&mut self) {
        self.elem_match_key = None;
    }

    /// True if an element match key was recorded
    pub fn has_elem_match_key(&self) -> bool {
        self.elem_match_key.is_some()
    }
}

/// Filter evaluator
pub trait Matcher {
    /// Test a document against the filter
    fn matches(&self, doc: &Document, details: &mut MatchDetails) -> bool;

    /// True if the caller declared the whole operation must see one snapshot
    ///
    /// Atomic operations never suspend at yield points.
    fn is_atomic(&self) -> bool;
}

/// Physical record storage for one collection
pub trait RecordStorage {
    /// Read and decode the record a locator names
    ///
    /// # Errors
    ///
    /// Returns `Error::StaleLocator` if the locator no longer names a record.
    fn read(&self, loc: RecordLocator) -> Result<Document>;

    /// Replace a record, relocating it if it no longer fits
    ///
    /// Returns the record's locator after the write, which differs from
    /// `loc` when the record moved.
    fn overwrite(&self, loc: RecordLocator, doc: &Document) -> Result<RecordLocator>;

    /// Replace a record's bytes without changing its size or location
    fn write_in_place(&self, loc: RecordLocator, doc: &Document) -> Result<()>;

    /// Insert a new record
    fn insert(&self, doc: &Document) -> Result<RecordLocator>;

    /// True if the record's page is in memory
    fn is_resident(&self, loc: RecordLocator) -> bool;

    /// Page a record in
    fn touch(&self, loc: RecordLocator);
}

/// Unique-key index over the `_id` field
pub trait UniqueIndex {
    /// Find the record holding `key`
    fn find_by_key(&self, key: &Value) -> Option<RecordLocator>;
}

/// Kind of replicated operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    /// Document insert
    Insert,
    /// Document update (operator program or literal replacement)
    Update,
}

impl OpKind {
    /// Short wire name (`i` / `u`)
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Insert => "i",
            OpKind::Update => "u",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Replication log writer
pub trait ReplicationLog: Send + Sync {
    /// Append a record
    ///
    /// `object` is the inserted document, or the update expression to
    /// replay. `query` selects the document an update applies to.
    fn append(
        &self,
        op: OpKind,
        ns: &Namespace,
        object: &Document,
        query: Option<&Document>,
        from_migrate: bool,
    ) -> Result<()>;

    /// Write barrier: flush buffered records if enough have accumulated
    fn commit_if_needed(&self) -> Result<()> {
        Ok(())
    }
}
