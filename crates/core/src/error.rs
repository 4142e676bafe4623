//! Error types for the document store
//!
//! All fallible operations in the workspace return [`Result`]. Variants fall
//! into three families:
//!
//! - **Rejected requests**: the caller asked for something illegal. These are
//!   raised before the write they guard.
//! - **Recoverable faults**: [`Error::PageFault`] is handled by retrying the
//!   whole update call and never escapes unless retries are exhausted.
//! - **Storage failures**: propagated verbatim, never retried here.
//!
//! We use `thiserror` for `Display` and `Error` implementations.

use std::io;
use thiserror::Error;

use crate::locator::RecordLocator;

/// Result type alias for document store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the document store
#[derive(Debug, Error)]
pub enum Error {
    /// Target namespace is reserved or malformed
    #[error("illegal namespace '{namespace}': {reason}")]
    IllegalNamespace {
        /// The rejected namespace
        namespace: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// Update expression mixes operator fields and plain fields
    #[error("modifiers and non-modifiers cannot be mixed")]
    MixedModifiers,

    /// Multi-document update requested with a literal replacement
    #[error("multi update only works with $ operators")]
    MultiRequiresOperators,

    /// Multi-document update matched a document without an `_id` while logging
    #[error("multi-update requires all modified objects to have an _id")]
    MultiRequiresId,

    /// Matched document has no `_id` and the replication policy rejects it
    #[error("cannot log an update to a document without an _id")]
    MissingIdForReplication,

    /// Resulting document exceeds the maximum document size
    #[error("document size {size} exceeds maximum of {max} bytes")]
    DocumentTooLarge {
        /// Encoded size of the rejected document
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// Update would change a document's `_id`
    #[error("the _id field cannot be changed")]
    ImmutableId,

    /// Malformed or unsupported operator program
    #[error("invalid update: {0}")]
    InvalidUpdate(String),

    /// Malformed filter expression
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// Positional operator used without a positional match from the filter
    #[error("the positional operator did not find the match needed from the filter")]
    PositionalMatchMissing,

    /// Insert with an `_id` that already exists
    #[error("duplicate key: _id {0}")]
    DuplicateKey(String),

    /// Record is not resident; the caller should page it in and retry
    #[error("page fault on record {locator} in {namespace}")]
    PageFault {
        /// Namespace of the collection owning the record
        namespace: String,
        /// The non-resident record
        locator: RecordLocator,
    },

    /// Locator no longer names a live record
    #[error("stale record locator {0}")]
    StaleLocator(RecordLocator),

    /// Replicated operation did not apply to exactly one document
    #[error("replay mismatch in {namespace}: expected 1 document, matched {matched}")]
    ReplayMismatch {
        /// Namespace of the replayed entry
        namespace: String,
        /// Number of documents the entry applied to
        matched: u64,
    },

    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Log entry truncated at the end of the available bytes
    ///
    /// Distinct from corruption: a torn final write after a crash.
    #[error("incomplete entry at offset {offset}: have {have} bytes, need {needed}")]
    IncompleteEntry {
        /// Offset of the entry in the log
        offset: u64,
        /// Bytes available
        have: usize,
        /// Bytes required
        needed: usize,
    },

    /// Storage layer error
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Configuration could not be read or is invalid
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// True for errors the update engine recovers from by retrying the call
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::PageFault { .. })
    }

    /// True for errors caused by an illegal request rather than the storage layer
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::IllegalNamespace { .. }
                | Error::MixedModifiers
                | Error::MultiRequiresOperators
                | Error::MultiRequiresId
                | Error::MissingIdForReplication
                | Error::DocumentTooLarge { .. }
                | Error::ImmutableId
                | Error::InvalidUpdate(_)
                | Error::InvalidFilter(_)
                | Error::PositionalMatchMissing
                | Error::DuplicateKey(_)
        )
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_too_large() {
        let err = Error::DocumentTooLarge { size: 20, max: 10 };
        let msg = err.to_string();
        assert!(msg.contains("20"));
        assert!(msg.contains("10"));
    }

    #[test]
    fn test_error_display_page_fault() {
        let err = Error::PageFault {
            namespace: "test.docs".to_string(),
            locator: RecordLocator::new(3, 1),
        };
        assert!(err.to_string().contains("test.docs"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::IoError(_)));
    }

    #[test]
    fn test_error_from_decode() {
        let result: std::result::Result<String, rmp_serde::decode::Error> =
            rmp_serde::from_slice(&[0xc1]);
        let err: Error = result.unwrap_err().into();
        assert!(matches!(err, Error::SerializationError(_)));
    }

    #[test]
    fn test_classification() {
        let fault = Error::PageFault {
            namespace: "a.b".to_string(),
            locator: RecordLocator::new(0, 0),
        };
        assert!(fault.is_recoverable());
        assert!(!fault.is_rejection());

        assert!(Error::MixedModifiers.is_rejection());
        assert!(!Error::MixedModifiers.is_recoverable());
        assert!(!Error::StorageError("disk".to_string()).is_rejection());
    }
}
