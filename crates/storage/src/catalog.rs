//! Catalog: namespace → collection
//!
//! # Design
//!
//! - DashMap: 16-way sharded by default, lock-free reads
//! - Collections are shared as `Arc<Collection>` so a cursor can keep its
//!   collection alive across a yield and compare it with what the catalog
//!   returns afterwards
//! - Every creation draws a fresh epoch from an `AtomicU64`; a dropped and
//!   recreated collection is never mistaken for the old one
//!
//! # Thread Safety
//!
//! All operations are thread-safe. `get_or_create` only locks the shard
//! holding the target name.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use pagoda_core::{Error, Namespace, Result};

use crate::collection::Collection;

/// Registry of collections
#[derive(Debug)]
pub struct Catalog {
    collections: DashMap<String, Arc<Collection>>,
    next_epoch: AtomicU64,
    padding_factor: f64,
}

impl Catalog {
    /// Create an empty catalog
    ///
    /// `padding_factor` is the record padding given to every collection it
    /// creates.
    pub fn new(padding_factor: f64) -> Self {
        Self {
            collections: DashMap::new(),
            next_epoch: AtomicU64::new(1),
            padding_factor,
        }
    }

    /// Padding factor for new collections
    pub fn padding_factor(&self) -> f64 {
        self.padding_factor
    }

    /// Look up a collection
    #[inline]
    pub fn get(&self, ns: &Namespace) -> Option<Arc<Collection>> {
        self.collections.get(ns.as_str()).map(|c| Arc::clone(c.value()))
    }

    /// Look up a collection, creating it if absent
    pub fn get_or_create(&self, ns: &Namespace) -> Arc<Collection> {
        let entry = self
            .collections
            .entry(ns.as_str().to_string())
            .or_insert_with(|| {
                let epoch = self.next_epoch.fetch_add(1, Ordering::AcqRel);
                debug!(target: "pagoda::storage", ns = %ns, epoch, "Created collection");
                Arc::new(Collection::new(ns.clone(), epoch, self.padding_factor))
            });
        Arc::clone(entry.value())
    }

    /// Create a collection that must not exist yet
    pub fn create(&self, ns: &Namespace) -> Result<Arc<Collection>> {
        if self.collections.contains_key(ns.as_str()) {
            return Err(Error::StorageError(format!(
                "collection {} already exists",
                ns
            )));
        }
        Ok(self.get_or_create(ns))
    }

    /// Drop a collection
    ///
    /// Outstanding handles stay readable but report `is_dropped`.
    /// Returns false if the collection did not exist.
    pub fn drop_collection(&self, ns: &Namespace) -> bool {
        match self.collections.remove(ns.as_str()) {
            Some((_, coll)) => {
                coll.mark_dropped();
                info!(target: "pagoda::storage", ns = %ns, epoch = coll.epoch(), "Dropped collection");
                true
            }
            None => false,
        }
    }

    /// Names of all collections, sorted
    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of collections
    pub fn len(&self) -> usize {
        self.collections.len()
    }

    /// True if there are no collections
    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new(1.0)
    }
}
