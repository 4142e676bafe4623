//! Database facade
//!
//! A [`Database`] owns the catalog of collections, the replication log and
//! the engine configuration. It is the entry point for inserts, reads and
//! updates:
//!
//! ```ignore
//! let db = Database::open(EngineConfig::default())?;
//! db.insert("shop.orders", json!({"_id": 7, "x": 5}))?;
//! let result = db.update(&UpdateRequest::parse(
//!     "shop.orders",
//!     json!({"_id": 7}),
//!     json!({"$inc": {"x": 1}}),
//! )?)?;
//! assert_eq!(result.count, 1);
//! ```
//!
//! [`Database::open_dir`] keeps the configuration in `pagoda.toml` and the
//! replication log in `oplog.bin` under one directory.

pub mod config;

pub use config::{EngineConfig, MissingIdPolicy, CONFIG_FILE_NAME};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pagoda_core::{
    Document, FieldPath, MatchDetails, Matcher, Namespace, OpKind, RecordStorage, ReplicationLog,
    Result,
};
use pagoda_durability::{FileOplog, MemoryOplog};
use pagoda_storage::Catalog;
use serde_json::Value;
use tracing::info;

use crate::context::OpContext;
use crate::query::FilterMatcher;
use crate::update::{update_objects, upsert::ensure_id, UpdateRequest, UpdateResult};

/// Replication log file inside a database directory
pub const OPLOG_FILE_NAME: &str = "oplog.bin";

/// Catalog, replication log and configuration
pub struct Database {
    catalog: Catalog,
    oplog: Arc<dyn ReplicationLog>,
    config: EngineConfig,
    path: Option<PathBuf>,
}

impl Database {
    /// In-memory database with an in-memory replication log
    pub fn open(config: EngineConfig) -> Result<Self> {
        Self::with_oplog(config, Arc::new(MemoryOplog::new()))
    }

    /// In-memory database writing to the given replication log
    pub fn with_oplog(config: EngineConfig, oplog: Arc<dyn ReplicationLog>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            catalog: Catalog::new(config.padding_factor),
            oplog,
            config,
            path: None,
        })
    }

    /// Database backed by a directory
    ///
    /// Writes a default `pagoda.toml` on first open and appends the
    /// replication log to `oplog.bin`.
    pub fn open_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let config_path = dir.join(CONFIG_FILE_NAME);
        EngineConfig::write_default_if_missing(&config_path)?;
        let config = EngineConfig::from_file(&config_path)?;
        let oplog = FileOplog::open(dir.join(OPLOG_FILE_NAME), config.commit_every)?;
        info!(target: "pagoda::engine", path = %dir.display(), "Opened database directory");
        let mut db = Self::with_oplog(config, Arc::new(oplog))?;
        db.path = Some(dir.to_path_buf());
        Ok(db)
    }

    /// Collections
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Replication log
    pub fn oplog(&self) -> &Arc<dyn ReplicationLog> {
        &self.oplog
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Directory the database was opened from, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Declare a secondary index key on a collection
    pub fn declare_index(&self, ns: &str, field: &str) -> Result<()> {
        let ns = Namespace::parse(ns)?;
        let path = FieldPath::parse(field)?;
        self.catalog.get_or_create(&ns).declare_index(path);
        Ok(())
    }

    /// Insert a document, generating an `_id` if it has none
    ///
    /// The insert is appended to the replication log.
    pub fn insert(&self, ns: &str, doc: Value) -> Result<Document> {
        let ns = Namespace::parse(ns)?;
        let mut doc = Document::try_from(doc)?;
        doc.check_no_operators()?;
        ensure_id(&mut doc, None);
        doc.validate_size(self.config.max_document_size)?;
        self.catalog.get_or_create(&ns).insert(&doc)?;
        self.oplog.append(OpKind::Insert, &ns, &doc, None, false)?;
        Ok(doc)
    }

    /// All documents matching a filter, in storage order
    pub fn find(&self, ns: &str, filter: Value) -> Result<Vec<Document>> {
        let ns = Namespace::parse(ns)?;
        let matcher = FilterMatcher::new(&Document::try_from(filter)?)?;
        let Some(collection) = self.catalog.get(&ns) else {
            return Ok(Vec::new());
        };
        let mut details = MatchDetails::default();
        Ok(collection
            .documents()?
            .into_iter()
            .map(|(_, doc)| doc)
            .filter(|doc| matcher.matches(doc, &mut details))
            .collect())
    }

    /// First document matching a filter
    pub fn find_one(&self, ns: &str, filter: Value) -> Result<Option<Document>> {
        Ok(self.find(ns, filter)?.into_iter().next())
    }

    /// Run an update with a fresh context
    pub fn update(&self, request: &UpdateRequest) -> Result<UpdateResult> {
        self.update_with(&mut OpContext::new(), request)
    }

    /// Run an update with a caller-owned context
    pub fn update_with(
        &self,
        ctx: &mut OpContext<'_>,
        request: &UpdateRequest,
    ) -> Result<UpdateResult> {
        update_objects(ctx, &self.catalog, self.oplog.as_ref(), &self.config, request)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("collections", &self.catalog.namespaces())
            .field("config", &self.config)
            .field("path", &self.path)
            .finish()
    }
}
