//! Core types and traits for Pagoda
//!
//! This crate defines the foundational types used throughout the system:
//! - Document: JSON object documents and their stored encoding
//! - FieldPath: Dotted paths into documents, with positional placeholders
//! - Namespace: `<database>.<collection>` names and update-target legality
//! - RecordLocator: Generation-checked handles to stored records
//! - Error: Error type hierarchy
//! - Traits: Collaborator contracts (RecordStorage, UniqueIndex, Matcher, ReplicationLog)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod document;
pub mod error;
pub mod locator;
pub mod namespace;
pub mod path;
pub mod traits;

pub use document::{Document, ID_FIELD, MAX_DOCUMENT_SIZE, OPERATOR_PREFIX};
pub use error::{Error, Result};
pub use locator::RecordLocator;
pub use namespace::Namespace;
pub use path::{FieldPath, PathError, POSITIONAL};
pub use traits::{MatchDetails, Matcher, OpKind, RecordStorage, ReplicationLog, UniqueIndex};
