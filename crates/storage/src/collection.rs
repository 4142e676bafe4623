//! Collection: records, `_id` index and declared index keys
//!
//! A collection owns its [`RecordStore`] and [`IdIndex`] behind one
//! `parking_lot::RwLock`, so every write updates both atomically. Lock
//! acquisitions are per operation; nothing here holds a lock across calls,
//! which is what lets a cooperative scheduler mutate the collection between
//! steps of a scan.
//!
//! Each collection carries an `epoch` assigned by the [`Catalog`]. A
//! collection that is dropped and recreated under the same name gets a new
//! epoch, which is how cursors detect that their position is gone.
//!
//! [`Catalog`]: crate::catalog::Catalog

use parking_lot::RwLock;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use pagoda_core::{
    Document, Error, FieldPath, Namespace, RecordLocator, RecordStorage, Result, UniqueIndex,
    ID_FIELD,
};

use crate::id_index::{id_key, IdIndex};
use crate::record_store::{RecordStore, WriteOutcome};

#[derive(Debug)]
struct CollectionInner {
    records: RecordStore,
    ids: IdIndex,
}

/// A named set of documents
#[derive(Debug)]
pub struct Collection {
    namespace: Namespace,
    epoch: u64,
    inner: RwLock<CollectionInner>,
    index_keys: RwLock<Vec<FieldPath>>,
    dropped: AtomicBool,
}

impl Collection {
    /// Create an empty collection
    pub fn new(namespace: Namespace, epoch: u64, padding_factor: f64) -> Self {
        Self {
            namespace,
            epoch,
            inner: RwLock::new(CollectionInner {
                records: RecordStore::new(padding_factor),
                ids: IdIndex::new(),
            }),
            index_keys: RwLock::new(Vec::new()),
            dropped: AtomicBool::new(false),
        }
    }

    /// Collection namespace
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Incarnation number assigned at creation
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// True once the catalog has dropped this collection
    pub fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::Acquire)
    }

    pub(crate) fn mark_dropped(&self) {
        self.dropped.store(true, Ordering::Release);
    }

    /// Declare a secondary index key
    ///
    /// Only the key set is tracked: updates touching these fields are
    /// "indexed" and never applied in place.
    pub fn declare_index(&self, key: FieldPath) {
        let mut keys = self.index_keys.write();
        if !keys.contains(&key) {
            keys.push(key);
        }
    }

    /// All index keys, `_id` first
    pub fn index_keys(&self) -> Vec<FieldPath> {
        let mut keys = Vec::with_capacity(1 + self.index_keys.read().len());
        if let Ok(id) = FieldPath::parse(ID_FIELD) {
            keys.push(id);
        }
        keys.extend(self.index_keys.read().iter().cloned());
        keys
    }

    /// Look up a record by `_id`
    pub fn find_by_id(&self, id: &Value) -> Option<RecordLocator> {
        self.inner.read().ids.get(id)
    }

    /// First live record in slot order
    pub fn first(&self) -> Option<RecordLocator> {
        self.inner.read().records.next_live(None)
    }

    /// First live record in a slot after `loc`'s slot
    pub fn next_after(&self, loc: RecordLocator) -> Option<RecordLocator> {
        self.inner.read().records.next_live(Some(loc.slot()))
    }

    /// True if the locator names a live record
    pub fn contains(&self, loc: RecordLocator) -> bool {
        self.inner.read().records.contains(loc)
    }

    /// Remove a record
    pub fn remove(&self, loc: RecordLocator) -> Result<Document> {
        let mut inner = self.inner.write();
        let bytes = inner.records.remove(loc)?;
        let doc = Document::decode(&bytes)?;
        if let Some(id) = doc.id() {
            inner.ids.remove(id);
        }
        Ok(doc)
    }

    /// Move a record to a new slot without changing it
    pub fn relocate(&self, loc: RecordLocator) -> Result<RecordLocator> {
        let mut inner = self.inner.write();
        let bytes = inner.records.remove(loc)?;
        let doc = Document::decode(&bytes)?;
        let to = inner.records.insert(bytes)?;
        if let Some(id) = doc.id() {
            inner.ids.insert(id, to);
        }
        debug!(target: "pagoda::storage", ns = %self.namespace, from = %loc, to = %to, "Record relocated");
        Ok(to)
    }

    /// Mark a record not resident
    pub fn evict(&self, loc: RecordLocator) {
        self.inner.write().records.evict(loc);
    }

    /// Number of live documents
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    /// True if the collection has no documents
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of relocations caused by growing records
    pub fn moves(&self) -> u64 {
        self.inner.read().records.moves()
    }

    /// All documents with their locators, in slot order
    pub fn documents(&self) -> Result<Vec<(RecordLocator, Document)>> {
        let inner = self.inner.read();
        inner
            .records
            .locators()
            .into_iter()
            .map(|loc| {
                let bytes = inner.records.get(loc).ok_or(Error::StaleLocator(loc))?;
                Ok((loc, Document::decode(bytes)?))
            })
            .collect()
    }
}

impl RecordStorage for Collection {
    fn read(&self, loc: RecordLocator) -> Result<Document> {
        let inner = self.inner.read();
        let bytes = inner.records.get(loc).ok_or(Error::StaleLocator(loc))?;
        Document::decode(bytes)
    }

    fn overwrite(&self, loc: RecordLocator, doc: &Document) -> Result<RecordLocator> {
        let bytes = doc.encode()?;
        let mut inner = self.inner.write();
        let old = inner
            .records
            .get(loc)
            .ok_or(Error::StaleLocator(loc))
            .and_then(Document::decode)?;
        let old_id = old.id().map(id_key);
        let new_id = doc.id().map(id_key);
        if new_id != old_id {
            if let Some(id) = doc.id() {
                if inner.ids.contains(id) {
                    return Err(Error::DuplicateKey(id.to_string()));
                }
            }
        }

        let outcome = inner.records.update(loc, bytes)?;
        if let Some(id) = old.id() {
            inner.ids.remove(id);
        }
        if let Some(id) = doc.id() {
            inner.ids.insert(id, outcome.locator());
        }
        if let WriteOutcome::Moved { from, to } = outcome {
            debug!(target: "pagoda::storage", ns = %self.namespace, from = %from, to = %to, "Record outgrew its slot");
        }
        Ok(outcome.locator())
    }

    fn write_in_place(&self, loc: RecordLocator, doc: &Document) -> Result<()> {
        let bytes = doc.encode()?;
        self.inner.write().records.write_in_place(loc, &bytes)
    }

    fn insert(&self, doc: &Document) -> Result<RecordLocator> {
        let bytes = doc.encode()?;
        let mut inner = self.inner.write();
        if let Some(id) = doc.id() {
            if inner.ids.contains(id) {
                return Err(Error::DuplicateKey(id.to_string()));
            }
        }
        let loc = inner.records.insert(bytes)?;
        if let Some(id) = doc.id() {
            inner.ids.insert(id, loc);
        }
        Ok(loc)
    }

    fn is_resident(&self, loc: RecordLocator) -> bool {
        self.inner.read().records.is_resident(loc)
    }

    fn touch(&self, loc: RecordLocator) {
        self.inner.write().records.touch(loc);
    }
}

impl UniqueIndex for Collection {
    fn find_by_key(&self, key: &Value) -> Option<RecordLocator> {
        self.find_by_id(key)
    }
}
