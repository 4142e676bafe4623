//! Unique-key fast path for `{_id: v}` filters
//!
//! Looks the document up through the `_id` index, with no cursor, no yields
//! and no seen set. Only used when the program touches no indexed field, so
//! the document can never be met twice.

use std::sync::Arc;

use pagoda_core::{Error, RecordStorage, Result, UniqueIndex, ID_FIELD};
use pagoda_storage::Collection;
use tracing::debug;

use super::{build_replacement, check_size, replication, UpdateCall, UpdateResult};
use crate::context::OpContext;

pub(super) fn update_by_id(
    ctx: &mut OpContext<'_>,
    call: &UpdateCall<'_>,
    collection: &Arc<Collection>,
) -> Result<UpdateResult> {
    let request = call.request;
    let Some(key) = request.filter.get(ID_FIELD) else {
        return Ok(UpdateResult::none(false));
    };
    let Some(loc) = collection.find_by_key(key) else {
        return Ok(UpdateResult::none(false));
    };
    ctx.debug.nscanned += 1;
    if ctx.allowed_to_fault && !collection.is_resident(loc) {
        return Err(Error::PageFault {
            namespace: request.namespace.to_string(),
            locator: loc,
        });
    }
    let on_disk = collection.read(loc)?;

    let Some(mods) = call.mods.as_ref() else {
        let stored = build_replacement(&request.update, &on_disk, call.config.max_document_size)?;
        collection.overwrite(loc, &stored)?;
        if request.log {
            replication::log_replacement(call, &stored, &request.filter)?;
        }
        return Ok(UpdateResult::replaced());
    };

    let state = mods.prepare(&on_disk)?;
    if state.can_apply_in_place() {
        state.apply_in_place(collection.as_ref(), loc)?;
        ctx.debug.fastmod = true;
    } else {
        check_size(state.new_size(), call.config.max_document_size)?;
        let new_loc = collection.overwrite(loc, &state.rebuild())?;
        if new_loc != loc {
            ctx.debug.nmoved += 1;
        }
    }
    debug!(target: "pagoda::update", namespace = %request.namespace, locator = %loc, in_place = state.can_apply_in_place(), "Updated by _id");
    if request.log {
        replication::log_modifier_update(call, &state, request.filter.clone())?;
    }
    Ok(UpdateResult::modified(1))
}
