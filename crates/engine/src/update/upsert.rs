//! Insert when nothing matched

use pagoda_core::{Document, Error, RecordStorage, Result, ID_FIELD};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use super::{replication, UpdateCall, UpdateResult};
use crate::context::OpContext;
use crate::query::id_equality;

/// Insert the document an upsert produces
///
/// An operator program is applied to the filter's equality constraints; a
/// literal is inserted as given.
pub(super) fn upsert(ctx: &mut OpContext<'_>, call: &UpdateCall<'_>) -> Result<UpdateResult> {
    let Some(mods) = call.mods.as_ref() else {
        return insert_literal(ctx, call, call.request.log);
    };
    let mut doc = mods.create_new_from_query(&call.request.filter)?;
    doc.check_no_operators()?;
    ensure_id(&mut doc, None);
    doc.validate_size(call.config.max_document_size)?;

    let collection = call.catalog.get_or_create(&call.request.namespace);
    collection.insert(&doc)?;
    ctx.debug.fastmodinsert = true;
    if call.request.log {
        replication::log_insert(call, &doc)?;
    }
    info!(target: "pagoda::update", namespace = %call.request.namespace, id = ?doc.id(), "Upserted document from operator program");
    Ok(UpdateResult::upserted(doc, true))
}

/// Insert a literal replacement as a new document
///
/// The `_id` comes from the literal, then from the filter, then is generated.
pub(super) fn insert_literal(
    ctx: &mut OpContext<'_>,
    call: &UpdateCall<'_>,
    log: bool,
) -> Result<UpdateResult> {
    if call.request.multi {
        return Err(Error::MultiRequiresOperators);
    }
    call.request.update.check_no_operators()?;
    let mut doc = call.request.update.clone();
    ensure_id(&mut doc, id_equality(&call.request.filter));
    doc.validate_size(call.config.max_document_size)?;

    let collection = call.catalog.get_or_create(&call.request.namespace);
    collection.insert(&doc)?;
    ctx.debug.upsert = true;
    if log {
        replication::log_insert(call, &doc)?;
    }
    info!(target: "pagoda::update", namespace = %call.request.namespace, id = ?doc.id(), "Upserted literal document");
    Ok(UpdateResult::upserted(doc, false))
}

/// Give a document an `_id` if it has none
pub(crate) fn ensure_id(doc: &mut Document, preferred: Option<&Value>) {
    if doc.id().is_some() {
        return;
    }
    let id = preferred
        .cloned()
        .unwrap_or_else(|| Value::String(Uuid::new_v4().to_string()));
    doc.insert(ID_FIELD.to_string(), id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ensure_id_prefers_existing_then_given() {
        let mut doc = Document::try_from(json!({"_id": 1, "a": 2})).unwrap();
        ensure_id(&mut doc, Some(&json!(5)));
        assert_eq!(doc.id(), Some(&json!(1)));

        let mut doc = Document::try_from(json!({"a": 2})).unwrap();
        ensure_id(&mut doc, Some(&json!(5)));
        assert_eq!(doc.id(), Some(&json!(5)));
    }

    #[test]
    fn ensure_id_generates_uuid() {
        let mut doc = Document::try_from(json!({"a": 2})).unwrap();
        ensure_id(&mut doc, None);
        let id = doc.id().and_then(Value::as_str).unwrap();
        assert!(Uuid::parse_str(id).is_ok());
    }
}
