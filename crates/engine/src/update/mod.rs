//! Update execution
//!
//! [`update_objects`] runs one [`UpdateRequest`] against the catalog:
//!
//! 1. Validate the target namespace and the shape of the update
//! 2. Try the unique-key fast path for `{_id: v}` filters
//! 3. Otherwise drive a cursor over the candidates (see `scan`)
//! 4. Upsert when nothing matched and the request asks for it
//!
//! A call that raises a page fault before writing anything is retried after
//! the record is paged in, up to `page_fault_retries` times.

mod fast_path;
mod replication;
mod request;
mod result;
mod scan;
pub(crate) mod upsert;
mod yielding;

pub use request::UpdateRequest;
pub use result::UpdateResult;
pub use yielding::YieldOutcome;

use pagoda_core::{
    Document, Error, FieldPath, RecordStorage, ReplicationLog, Result, ID_FIELD,
};
use pagoda_storage::Catalog;
use tracing::{debug, warn};

use crate::context::OpContext;
use crate::database::config::EngineConfig;
use crate::modifier::ModSet;
use crate::query::{compare::values_equal, is_simple_id_query, FilterMatcher};

/// Everything one attempt of an update call needs
pub(crate) struct UpdateCall<'c> {
    pub(crate) catalog: &'c Catalog,
    pub(crate) oplog: &'c dyn ReplicationLog,
    pub(crate) config: &'c EngineConfig,
    pub(crate) request: &'c UpdateRequest,
    /// Parsed program, `None` for a literal replacement
    pub(crate) mods: Option<ModSet>,
}

/// Run one update call
///
/// # Errors
///
/// An invalid `config` fails with `InvalidConfig` before anything runs.
/// Rejections (`IllegalNamespace`, `MixedModifiers`,
/// `MultiRequiresOperators`, `InvalidUpdate`, ...) leave every collection
/// untouched. Storage errors are returned as they occur; writes already made
/// by a multi-update stay.
pub fn update_objects(
    ctx: &mut OpContext<'_>,
    catalog: &Catalog,
    oplog: &dyn ReplicationLog,
    config: &EngineConfig,
    request: &UpdateRequest,
) -> Result<UpdateResult> {
    config.validate()?;
    let ns = &request.namespace;
    ns.check_update_target()?;
    ctx.debug.update_expression = Some(request.update.clone());

    let mut retries = 0;
    loop {
        match attempt(ctx, catalog, oplog, config, request) {
            Ok(result) => {
                ctx.debug.nupdated = result.count;
                debug!(target: "pagoda::update", namespace = %ns, result = ?result, stats = %ctx.debug, "Update finished");
                return Ok(result);
            }
            Err(Error::PageFault { namespace, locator }) if ctx.allowed_to_fault => {
                ctx.debug.page_faults += 1;
                if retries >= config.page_fault_retries {
                    return Err(Error::StorageError(format!(
                        "record {} in {} still not resident after {} retries",
                        locator, namespace, retries
                    )));
                }
                retries += 1;
                warn!(target: "pagoda::update", namespace = %namespace, locator = %locator, retry = retries, "Page fault, retrying update");
                if let Some(collection) = catalog.get(ns) {
                    collection.touch(locator);
                }
                ctx.debug.reset_for_retry();
                ctx.debug.update_expression = Some(request.update.clone());
            }
            Err(e) => return Err(e),
        }
    }
}

fn attempt(
    ctx: &mut OpContext<'_>,
    catalog: &Catalog,
    oplog: &dyn ReplicationLog,
    config: &EngineConfig,
    request: &UpdateRequest,
) -> Result<UpdateResult> {
    let collection = catalog.get(&request.namespace);
    let mods = if request.is_operator() {
        let index_keys = match &collection {
            Some(c) => c.index_keys(),
            None => vec![FieldPath::parse(ID_FIELD)?],
        };
        Some(ModSet::parse(&request.update, &index_keys)?)
    } else {
        request.update.check_no_operators()?;
        if request.multi {
            return Err(Error::MultiRequiresOperators);
        }
        None
    };
    let matcher = FilterMatcher::new(&request.filter)?;
    let call = UpdateCall {
        catalog,
        oplog,
        config,
        request,
        mods,
    };

    let indexed = call.mods.as_ref().map_or(false, ModSet::is_indexed);
    if let Some(collection) = collection {
        if request.policy.permit_optimal_id_plan
            && !request.multi
            && !indexed
            && is_simple_id_query(&request.filter)
        {
            ctx.debug.idhack = true;
            let result = fast_path::update_by_id(ctx, &call, &collection)?;
            if result.existing || !request.upsert {
                return Ok(result);
            }
            if call.mods.is_none() && !request.log {
                return upsert::insert_literal(ctx, &call, false);
            }
        }
    }

    scan::update_scan(ctx, &call, &matcher)
}

/// Stored form of a literal replacement
///
/// The replacement inherits the stored `_id` when it has none; a different
/// `_id` is rejected.
pub(crate) fn build_replacement(update: &Document, on_disk: &Document, max: usize) -> Result<Document> {
    update.check_no_operators()?;
    let mut stored = update.clone();
    match (on_disk.id(), update.id()) {
        (Some(old), Some(new)) if !values_equal(old, new) => return Err(Error::ImmutableId),
        (Some(old), None) => {
            stored.insert(ID_FIELD.to_string(), old.clone());
        }
        _ => {}
    }
    stored.validate_size(max)?;
    Ok(stored)
}

/// Reject a document whose encoded size exceeds `max`
pub(crate) fn check_size(size: usize, max: usize) -> Result<()> {
    if size > max {
        return Err(Error::DocumentTooLarge { size, max });
    }
    Ok(())
}
