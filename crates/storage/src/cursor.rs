//! Cursors over candidate records
//!
//! Two strategies share the [`Cursor`] trait:
//!
//! - [`CollectionScanCursor`] walks live slots in slot order. A record that
//!   relocates during the scan lands after every live slot and is met again,
//!   so callers that must not revisit documents keep their own seen set.
//! - [`IdCursor`] resolves a single `_id` through the unique index. It
//!   deduplicates on its own (`is_auto_dedup`).
//!
//! Cursors hold no locks between calls. Across a yield the caller hands the
//! re-acquired collection to [`Cursor::restore_position`], which reports
//! whether the cursor could re-establish itself.

use rustc_hash::FxHashSet;
use serde_json::Value;
use std::sync::Arc;

use pagoda_core::{Document, Error, MatchDetails, Matcher, RecordLocator, RecordStorage, Result};

use crate::collection::Collection;

/// Iteration protocol over candidate records
pub trait Cursor {
    /// True while the cursor names a candidate
    fn ok(&self) -> bool;

    /// Move to the next candidate, returning `ok()`
    fn advance(&mut self) -> bool;

    /// Locator of the current candidate
    fn current(&self) -> Option<RecordLocator>;

    /// Collection the cursor reads
    fn collection(&self) -> &Arc<Collection>;

    /// Read the current candidate
    fn current_document(&self) -> Result<Document> {
        let loc = self
            .current()
            .ok_or_else(|| Error::StorageError("cursor is exhausted".to_string()))?;
        self.collection().read(loc)
    }

    /// Test the current candidate against a matcher
    ///
    /// A candidate whose record disappeared does not match.
    fn current_matches(&self, matcher: &dyn Matcher, details: &mut MatchDetails) -> Result<bool> {
        details.reset();
        match self.current_document() {
            Ok(doc) => Ok(matcher.matches(&doc, details)),
            Err(Error::StaleLocator(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// True if the cursor can return the same locator more than once and
    /// tracks what it has returned
    fn is_auto_dedup(&self) -> bool;

    /// Record a locator as returned; true if it had been returned before
    fn register_seen(&mut self, loc: RecordLocator) -> bool;

    /// Re-establish the cursor after a yield
    ///
    /// Returns false if the collection was dropped or replaced, in which case
    /// the cursor must not be used again.
    fn restore_position(&mut self, collection: &Arc<Collection>) -> bool;
}

fn same_incarnation(ours: &Collection, theirs: &Collection) -> bool {
    !theirs.is_dropped() && ours.epoch() == theirs.epoch()
}

/// Full collection scan in slot order
#[derive(Debug)]
pub struct CollectionScanCursor {
    collection: Arc<Collection>,
    current: Option<RecordLocator>,
}

impl CollectionScanCursor {
    /// Position a scan on the first live record
    pub fn new(collection: Arc<Collection>) -> Self {
        let current = collection.first();
        Self {
            collection,
            current,
        }
    }
}

impl Cursor for CollectionScanCursor {
    fn ok(&self) -> bool {
        self.current.is_some()
    }

    fn advance(&mut self) -> bool {
        self.current = self
            .current
            .and_then(|loc| self.collection.next_after(loc));
        self.ok()
    }

    fn current(&self) -> Option<RecordLocator> {
        self.current
    }

    fn collection(&self) -> &Arc<Collection> {
        &self.collection
    }

    fn is_auto_dedup(&self) -> bool {
        false
    }

    fn register_seen(&mut self, _loc: RecordLocator) -> bool {
        false
    }

    fn restore_position(&mut self, collection: &Arc<Collection>) -> bool {
        if !same_incarnation(&self.collection, collection) {
            return false;
        }
        self.collection = Arc::clone(collection);
        if let Some(loc) = self.current {
            if !self.collection.contains(loc) {
                // The record was removed or moved while we were away; resume at
                // the next live slot.
                self.current = self.collection.next_after(loc);
            }
        }
        true
    }
}

/// Single-key lookup through the `_id` index
#[derive(Debug)]
pub struct IdCursor {
    collection: Arc<Collection>,
    key: Value,
    current: Option<RecordLocator>,
    seen: FxHashSet<RecordLocator>,
}

impl IdCursor {
    /// Look up `key` and position on the record holding it, if any
    pub fn new(collection: Arc<Collection>, key: Value) -> Self {
        let current = collection.find_by_id(&key);
        Self {
            collection,
            key,
            current,
            seen: FxHashSet::default(),
        }
    }

    /// The `_id` value this cursor resolves
    pub fn key(&self) -> &Value {
        &self.key
    }
}

impl Cursor for IdCursor {
    fn ok(&self) -> bool {
        self.current.is_some()
    }

    fn advance(&mut self) -> bool {
        self.current = None;
        false
    }

    fn current(&self) -> Option<RecordLocator> {
        self.current
    }

    fn collection(&self) -> &Arc<Collection> {
        &self.collection
    }

    fn is_auto_dedup(&self) -> bool {
        true
    }

    fn register_seen(&mut self, loc: RecordLocator) -> bool {
        !self.seen.insert(loc)
    }

    fn restore_position(&mut self, collection: &Arc<Collection>) -> bool {
        if !same_incarnation(&self.collection, collection) {
            return false;
        }
        self.collection = Arc::clone(collection);
        if self.current.is_some() {
            self.current = self.collection.find_by_id(&self.key);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use pagoda_core::Namespace;
    use serde_json::json;

    struct FieldEquals(&'static str, Value);

    impl Matcher for FieldEquals {
        fn matches(&self, doc: &Document, _details: &mut MatchDetails) -> bool {
            doc.get(self.0) == Some(&self.1)
        }

        fn is_atomic(&self) -> bool {
            false
        }
    }

    fn setup(n: i64) -> (Catalog, Namespace, Vec<RecordLocator>) {
        let catalog = Catalog::new(1.0);
        let ns = Namespace::parse("test.cursor").unwrap();
        let coll = catalog.get_or_create(&ns);
        let locs = (0..n)
            .map(|i| {
                coll.insert(&Document::try_from(json!({"_id": i, "n": i})).unwrap())
                    .unwrap()
            })
            .collect();
        (catalog, ns, locs)
    }

    #[test]
    fn scan_visits_in_slot_order() {
        let (catalog, ns, locs) = setup(3);
        let mut cursor = CollectionScanCursor::new(catalog.get(&ns).unwrap());
        let mut visited = Vec::new();
        while cursor.ok() {
            visited.push(cursor.current().unwrap());
            cursor.advance();
        }
        assert_eq!(visited, locs);
        assert!(!cursor.is_auto_dedup());
    }

    #[test]
    fn scan_meets_relocated_record_again() {
        let (catalog, ns, locs) = setup(2);
        let coll = catalog.get(&ns).unwrap();
        let mut cursor = CollectionScanCursor::new(Arc::clone(&coll));
        let moved = coll.relocate(locs[0]).unwrap();
        assert!(cursor.restore_position(&coll));
        assert_eq!(cursor.current(), Some(locs[1]));
        cursor.advance();
        assert_eq!(cursor.current(), Some(moved));
    }

    #[test]
    fn scan_restore_fails_after_drop() {
        let (catalog, ns, _) = setup(2);
        let mut cursor = CollectionScanCursor::new(catalog.get(&ns).unwrap());
        catalog.drop_collection(&ns);
        let recreated = catalog.get_or_create(&ns);
        assert!(!cursor.restore_position(&recreated));
    }

    #[test]
    fn current_matches_uses_matcher() {
        let (catalog, ns, _) = setup(2);
        let cursor = CollectionScanCursor::new(catalog.get(&ns).unwrap());
        let mut details = MatchDetails::default();
        assert!(cursor
            .current_matches(&FieldEquals("n", json!(0)), &mut details)
            .unwrap());
        assert!(!cursor
            .current_matches(&FieldEquals("n", json!(1)), &mut details)
            .unwrap());
    }

    #[test]
    fn id_cursor_dedups_and_follows_relocation() {
        let (catalog, ns, locs) = setup(3);
        let coll = catalog.get(&ns).unwrap();
        let mut cursor = IdCursor::new(Arc::clone(&coll), json!(1));
        assert_eq!(cursor.current(), Some(locs[1]));
        assert!(!cursor.register_seen(locs[1]));
        assert!(cursor.register_seen(locs[1]));

        let moved = coll.relocate(locs[1]).unwrap();
        assert!(cursor.restore_position(&coll));
        assert_eq!(cursor.current(), Some(moved));
        assert!(!cursor.advance());
    }

    #[test]
    fn id_cursor_missing_key_is_exhausted() {
        let (catalog, ns, _) = setup(1);
        let cursor = IdCursor::new(catalog.get(&ns).unwrap(), json!("nope"));
        assert!(!cursor.ok());
    }
}
