//! Suspension points of the scan loop
//!
//! A yield runs the scheduler hook, then re-acquires the collection through
//! the catalog and asks the cursor to restore itself. The collection may have
//! been dropped or recreated meanwhile; the cursor then reports a lost
//! position and the scan ends with what it has written so far.

use pagoda_core::Namespace;
use pagoda_storage::{Catalog, Cursor};
use tracing::warn;

use crate::context::OpContext;

/// What happened at a suspension point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YieldOutcome {
    /// No suspension was taken
    Continue,
    /// Suspended and resumed with a valid cursor
    Resumed,
    /// Suspended and the cursor could not be restored
    LostPosition,
}

impl YieldOutcome {
    /// True if the scan must stop
    pub fn is_lost(self) -> bool {
        self == YieldOutcome::LostPosition
    }
}

/// Periodic yield counter for the top of the scan loop
#[derive(Debug)]
pub(super) struct Yielder {
    every: u64,
    since: u64,
}

impl Yielder {
    pub(super) fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            since: 0,
        }
    }

    /// Yield once every `every` calls
    pub(super) fn yield_sometimes(
        &mut self,
        ctx: &mut OpContext<'_>,
        catalog: &Catalog,
        ns: &Namespace,
        cursor: &mut dyn Cursor,
    ) -> YieldOutcome {
        self.since += 1;
        if self.since < self.every {
            return YieldOutcome::Continue;
        }
        self.since = 0;
        yield_now(ctx, catalog, ns, cursor)
    }
}

/// Suspend unconditionally and revalidate the cursor
pub(super) fn yield_now(
    ctx: &mut OpContext<'_>,
    catalog: &Catalog,
    ns: &Namespace,
    cursor: &mut dyn Cursor,
) -> YieldOutcome {
    ctx.suspend(catalog, ns);
    match catalog.get(ns) {
        Some(collection) if cursor.restore_position(&collection) => YieldOutcome::Resumed,
        _ => {
            warn!(
                target: "pagoda::update",
                namespace = %ns,
                scanned = ctx.debug.nscanned,
                "Cursor lost its position during yield"
            );
            YieldOutcome::LostPosition
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagoda_core::{Document, RecordStorage};
    use pagoda_storage::CollectionScanCursor;
    use serde_json::json;

    fn setup() -> (Catalog, Namespace) {
        let catalog = Catalog::default();
        let ns = Namespace::parse("test.docs").unwrap();
        let coll = catalog.get_or_create(&ns);
        for i in 0..3 {
            coll.insert(&Document::try_from(json!({"_id": i})).unwrap())
                .unwrap();
        }
        (catalog, ns)
    }

    #[test]
    fn yields_on_cadence() {
        let (catalog, ns) = setup();
        let mut cursor = CollectionScanCursor::new(catalog.get(&ns).unwrap());
        let mut ctx = OpContext::new();
        let mut yielder = Yielder::new(3);
        let outcomes: Vec<_> = (0..6)
            .map(|_| yielder.yield_sometimes(&mut ctx, &catalog, &ns, &mut cursor))
            .collect();
        assert_eq!(
            outcomes.iter().filter(|o| **o == YieldOutcome::Resumed).count(),
            2
        );
        assert_eq!(ctx.debug.nyields, 2);
    }

    #[test]
    fn dropped_collection_loses_position() {
        let (catalog, ns) = setup();
        let mut cursor = CollectionScanCursor::new(catalog.get(&ns).unwrap());
        let mut drop_it = |catalog: &Catalog, ns: &Namespace| {
            catalog.drop_collection(ns);
        };
        let mut ctx = OpContext::new().with_scheduler(&mut drop_it);
        assert!(yield_now(&mut ctx, &catalog, &ns, &mut cursor).is_lost());
    }

    #[test]
    fn recreated_collection_loses_position() {
        let (catalog, ns) = setup();
        let mut cursor = CollectionScanCursor::new(catalog.get(&ns).unwrap());
        let mut recreate = |catalog: &Catalog, ns: &Namespace| {
            catalog.drop_collection(ns);
            catalog.get_or_create(ns);
        };
        let mut ctx = OpContext::new().with_scheduler(&mut recreate);
        assert!(yield_now(&mut ctx, &catalog, &ns, &mut cursor).is_lost());
    }
}
