//! Replication log entries for updates and upserts
//!
//! An update entry is `(object, pattern)`. The pattern pins the document by
//! `_id`, plus a `$size` guard for every array the program's result depends
//! on. The object is either the request's program verbatim or, when
//! re-applying it on a replica could diverge, a `$set`/`$unset` rewrite that
//! pins final values.

use pagoda_core::{Document, Error, OpKind, Result, ID_FIELD};
use tracing::{debug, warn};

use super::UpdateCall;
use crate::database::config::MissingIdPolicy;
use crate::modifier::ModSetState;

/// Pattern identifying a stored document on a replica
///
/// # Errors
///
/// - `MultiRequiresId` for a multi-update of a document without `_id`
/// - `MissingIdForReplication` when the policy rejects such documents
pub(super) fn base_pattern(call: &UpdateCall<'_>, doc: &Document) -> Result<Document> {
    if let Some(id) = doc.id() {
        let mut pattern = Document::new();
        pattern.insert(ID_FIELD.to_string(), id.clone());
        return Ok(pattern);
    }
    if call.request.multi {
        return Err(Error::MultiRequiresId);
    }
    match call.config.missing_id_policy {
        MissingIdPolicy::LogOriginalFilter => {
            warn!(
                target: "pagoda::update",
                namespace = %call.request.namespace,
                "Logging update of a document without _id by its original filter"
            );
            Ok(call.request.filter.clone())
        }
        MissingIdPolicy::Reject => Err(Error::MissingIdForReplication),
    }
}

/// Log an operator update applied to one document
pub(super) fn log_modifier_update(
    call: &UpdateCall<'_>,
    state: &ModSetState,
    mut pattern: Document,
) -> Result<()> {
    if state.has_array_dependent_mods() {
        state.append_size_spec(&mut pattern);
    }
    if state.needs_oplog_rewrite() {
        let rewrite = state.oplog_rewrite();
        debug!(target: "pagoda::update", pattern = %pattern, rewrite = %rewrite, "Logging rewritten update");
        append(call, OpKind::Update, &rewrite, Some(&pattern))
    } else {
        append(call, OpKind::Update, &call.request.update, Some(&pattern))
    }
}

/// Log a literal replacement with the document as stored
pub(super) fn log_replacement(call: &UpdateCall<'_>, stored: &Document, pattern: &Document) -> Result<()> {
    append(call, OpKind::Update, stored, Some(pattern))
}

/// Log an inserted document
pub(super) fn log_insert(call: &UpdateCall<'_>, doc: &Document) -> Result<()> {
    append(call, OpKind::Insert, doc, None)
}

fn append(call: &UpdateCall<'_>, op: OpKind, object: &Document, query: Option<&Document>) -> Result<()> {
    call.oplog.append(
        op,
        &call.request.namespace,
        object,
        query,
        call.request.from_migrate,
    )
}

