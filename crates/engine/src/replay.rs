//! Apply replication log entries to a database
//!
//! This is how a replica consumes the log: inserts are stored as given and
//! updates run through the regular update path with logging turned off.
//! Every update entry must apply to exactly one document; a size guard that
//! no longer holds, or a document that is missing, surfaces as
//! [`Error::ReplayMismatch`].

use pagoda_core::{Error, Namespace, OpKind, RecordStorage, Result};
use pagoda_durability::OplogEntry;
use tracing::{debug, warn};

use crate::database::Database;
use crate::update::UpdateRequest;

/// Apply one entry
pub fn apply_entry(db: &Database, entry: &OplogEntry) -> Result<()> {
    let ns = Namespace::parse(&entry.ns)?;
    match entry.op {
        OpKind::Insert => {
            db.catalog().get_or_create(&ns).insert(&entry.object)?;
        }
        OpKind::Update => {
            let filter = entry.query.clone().ok_or_else(|| {
                Error::Corruption(format!("update entry {} has no query", entry.seq))
            })?;
            let request = UpdateRequest::new(ns, filter, entry.object.clone())
                .log(false)
                .from_migrate(entry.from_migrate);
            let result = db.update(&request)?;
            if result.count != 1 {
                warn!(target: "pagoda::replay", seq = entry.seq, matched = result.count, "Replayed update did not apply to one document");
                return Err(Error::ReplayMismatch {
                    namespace: entry.ns.clone(),
                    matched: result.count,
                });
            }
        }
    }
    debug!(target: "pagoda::replay", seq = entry.seq, op = %entry.op, ns = %entry.ns, "Applied entry");
    Ok(())
}

/// Apply entries in order, stopping at the first failure
pub fn apply_all<'a, I>(db: &Database, entries: I) -> Result<usize>
where
    I: IntoIterator<Item = &'a OplogEntry>,
{
    let mut applied = 0;
    for entry in entries {
        apply_entry(db, entry)?;
        applied += 1;
    }
    Ok(applied)
}
