//! Outcome of one update call

use pagoda_core::Document;

/// What an update did
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateResult {
    /// An existing document was matched and written
    pub existing: bool,
    /// The update was an operator program
    pub modified: bool,
    /// Documents written or inserted
    pub count: u64,
    /// The document inserted by an upsert
    pub upserted: Option<Document>,
}

impl UpdateResult {
    /// Nothing matched and nothing was inserted
    pub fn none(modified: bool) -> Self {
        Self {
            modified,
            ..Self::default()
        }
    }

    /// `count` existing documents were changed by an operator program
    pub fn modified(count: u64) -> Self {
        Self {
            existing: true,
            modified: true,
            count,
            upserted: None,
        }
    }

    /// One existing document was replaced by a literal
    pub fn replaced() -> Self {
        Self {
            existing: true,
            modified: false,
            count: 1,
            upserted: None,
        }
    }

    /// A new document was inserted
    pub fn upserted(doc: Document, modified: bool) -> Self {
        Self {
            existing: false,
            modified,
            count: 1,
            upserted: Some(doc),
        }
    }

    /// True if at least one document was written
    pub fn wrote(&self) -> bool {
        self.count > 0
    }
}
