//! Update engine
//!
//! This crate sits on top of storage and durability:
//! - Database: catalog, replication log and configuration behind one handle
//! - Query: the filter matcher and value comparison
//! - Modifier: parsed `$`-operator programs and their per-document results
//! - Update: fast path, cursor-driven scan, upsert, replication entries
//! - Replay: applying replication log entries to another database
//!
//! The engine is the only component that knows about:
//! - Yield points and cursor revalidation
//! - When an update may be applied in place
//! - How a logged update is made safe to re-apply

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod database;
pub mod modifier;
pub mod query;
pub mod replay;
pub mod update;

pub use context::{OpContext, OpDebug, PlanPolicy, Scheduler};
pub use database::{Database, EngineConfig, MissingIdPolicy, CONFIG_FILE_NAME, OPLOG_FILE_NAME};
pub use modifier::{ModSet, ModSetState};
pub use query::FilterMatcher;
pub use update::{update_objects, UpdateRequest, UpdateResult, YieldOutcome};
