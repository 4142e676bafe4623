//! Pagoda - embedded document store with a cursor-safe update engine
//!
//! Pagoda stores schemaless documents in collections and applies updates to
//! them with either a literal replacement or a program of field-level
//! modifier operators (`$set`, `$inc`, `$push`, ...). Every mutation is
//! described in a replication log whose records replay to the same result on
//! another copy of the data.
//!
//! # Quick Start
//!
//! ```ignore
//! use pagoda::{Database, EngineConfig, UpdateRequest};
//! use serde_json::json;
//!
//! let db = Database::open(EngineConfig::default())?;
//! db.insert("app.users", json!({"_id": 7, "x": 5}))?;
//!
//! let request = UpdateRequest::parse("app.users", json!({"_id": 7}), json!({"$inc": {"x": 1}}))?;
//! let result = db.update(&request)?;
//! assert_eq!(result.count, 1);
//! ```
//!
//! # Architecture
//!
//! - `pagoda-core`: documents, field paths, locators, errors, collaborator traits
//! - `pagoda-storage`: record store, `_id` index, collections, cursors
//! - `pagoda-durability`: replication log entries and their on-disk framing
//! - `pagoda-engine`: matcher, modifier programs, the update engine, replay

pub use pagoda_core::{Document, Error, FieldPath, Namespace, RecordLocator, Result};
pub use pagoda_durability::{FileOplog, MemoryOplog, OplogEntry};
pub use pagoda_engine::{
    replay, Database, EngineConfig, MissingIdPolicy, OpContext, OpDebug, PlanPolicy, Scheduler,
    UpdateRequest, UpdateResult,
};
pub use pagoda_storage::{Catalog, Collection};
