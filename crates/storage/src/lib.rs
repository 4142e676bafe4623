//! Storage layer for Pagoda
//!
//! This crate implements the record storage the update engine runs against:
//! - RecordStore: slot-addressed record heap with padding, relocation and
//!   per-record residency
//! - IdIndex: unique `_id` index
//! - Collection: records + `_id` index + declared index keys, behind one RwLock
//! - Catalog: DashMap of namespaces to `Arc<Collection>` with epochs
//! - Cursors: full collection scan and `_id` lookup
//!
//! # Relocation
//!
//! A record that outgrows its padded capacity moves to a new slot at the end
//! of the store and its old locator goes stale. A forward scan therefore
//! meets a relocated record twice; see [`cursor`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod catalog;
pub mod collection;
pub mod cursor;
pub mod id_index;
pub mod record_store;

pub use catalog::Catalog;
pub use collection::Collection;
pub use cursor::{CollectionScanCursor, Cursor, IdCursor};
pub use id_index::{id_key, IdIndex};
pub use record_store::{RecordStore, WriteOutcome};
