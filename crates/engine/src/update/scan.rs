//! Cursor-driven update loop
//!
//! Candidates come from an `_id` cursor when the filter pins `_id` by
//! equality and from a full collection scan otherwise. The loop yields
//! periodically (unless the filter is atomic), after runs of non-matching
//! candidates and after writes in a multi-update. Every document the update
//! may meet again is remembered in a seen set:
//!
//! - documents relocated by a rebuild land ahead of the scan position
//! - documents whose indexed fields changed are found again by an index scan
//!
//! A multi-update also remembers the `_id` of every document it changed, so a
//! document the scheduler relocates after its update is not updated twice.
//! Documents without `_id` rely on the locator set alone.

use std::sync::Arc;

use pagoda_core::{Error, MatchDetails, Matcher, RecordLocator, RecordStorage, Result};
use pagoda_storage::{id_key, CollectionScanCursor, Cursor, IdCursor};
use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use super::yielding::{yield_now, Yielder};
use super::{build_replacement, check_size, replication, upsert, UpdateCall, UpdateResult};
use crate::context::OpContext;
use crate::modifier::ModSet;
use crate::query::{id_equality, FilterMatcher};

pub(super) fn update_scan(
    ctx: &mut OpContext<'_>,
    call: &UpdateCall<'_>,
    matcher: &FilterMatcher,
) -> Result<UpdateResult> {
    let request = call.request;
    let config = call.config;
    let ns = &request.namespace;

    let Some(collection) = call.catalog.get(ns) else {
        return finish(ctx, call, 0);
    };
    let mut cursor: Box<dyn Cursor> = match id_equality(&request.filter) {
        Some(id) => Box::new(IdCursor::new(collection, id.clone())),
        None => Box::new(CollectionScanCursor::new(collection)),
    };

    let atomic = matcher.is_atomic();
    let auto_dedup = cursor.is_auto_dedup();
    let multi = request.multi;
    let indexed = call.mods.as_ref().map_or(false, ModSet::is_indexed);
    let dynamic = call.mods.as_ref().map_or(false, ModSet::has_dynamic_array);

    let mut yielder = Yielder::new(config.yield_every);
    let mut seen: FxHashSet<RecordLocator> = FxHashSet::default();
    let mut applied: FxHashSet<String> = FxHashSet::default();
    let mut details = MatchDetails::default();
    // Set once a yield checkpoint has been passed; faults are no longer raised
    let mut armed = false;
    let mut count: u64 = 0;

    while cursor.ok() {
        if !armed && count == 0 && ctx.allowed_to_fault {
            if let Some(loc) = cursor.current() {
                if !cursor.collection().is_resident(loc) {
                    return Err(Error::PageFault {
                        namespace: ns.to_string(),
                        locator: loc,
                    });
                }
            }
        }

        if !atomic && ctx.debug.nscanned > 0 {
            armed = true;
            let outcome = yielder.yield_sometimes(ctx, call.catalog, ns, cursor.as_mut());
            if outcome.is_lost() || !cursor.ok() {
                break;
            }
        }

        ctx.debug.nscanned += 1;
        details.want_elem_match_key = dynamic;

        if !cursor.current_matches(matcher, &mut details)? {
            cursor.advance();
            if !atomic && ctx.debug.nscanned % config.nonmatch_yield_every == 0 {
                armed = true;
                if yield_now(ctx, call.catalog, ns, cursor.as_mut()).is_lost() || !cursor.ok() {
                    break;
                }
            }
            continue;
        }

        let Some(loc) = cursor.current() else {
            break;
        };
        if cursor.register_seen(loc) && auto_dedup {
            cursor.advance();
            continue;
        }

        let collection = Arc::clone(cursor.collection());
        let on_disk = collection.read(loc)?;
        let pattern = if request.log {
            Some(replication::base_pattern(call, &on_disk)?)
        } else {
            None
        };

        let Some(mods) = call.mods.as_ref() else {
            if multi {
                return Err(Error::MultiRequiresOperators);
            }
            let stored = build_replacement(&request.update, &on_disk, config.max_document_size)?;
            collection.overwrite(loc, &stored)?;
            if let Some(pattern) = pattern {
                replication::log_replacement(call, &stored, &pattern)?;
            }
            return Ok(UpdateResult::replaced());
        };

        let applied_key = if multi { on_disk.id().map(id_key) } else { None };
        if multi {
            cursor.advance();
            if seen.contains(&loc) {
                trace!(target: "pagoda::update", locator = %loc, "Skipping document already updated");
                continue;
            }
            if applied_key.as_ref().map_or(false, |key| applied.contains(key)) {
                trace!(target: "pagoda::update", locator = %loc, "Skipping document moved after its update");
                continue;
            }
            if auto_dedup {
                while cursor.ok() && cursor.current() == Some(loc) {
                    cursor.advance();
                }
            }
        }

        let specialized;
        let program = if dynamic {
            let position = details
                .elem_match_key
                .ok_or(Error::PositionalMatchMissing)?;
            specialized = mods.fix_dynamic_array(position);
            &specialized
        } else {
            mods
        };

        let state = program.prepare(&on_disk)?;
        if !indexed && state.can_apply_in_place() {
            state.apply_in_place(collection.as_ref(), loc)?;
            if !multi {
                ctx.debug.fastmod = true;
            }
        } else {
            check_size(state.new_size(), config.max_document_size)?;
            let new_loc = collection.overwrite(loc, &state.rebuild())?;
            if new_loc != loc {
                ctx.debug.nmoved += 1;
                debug!(target: "pagoda::update", from = %loc, to = %new_loc, "Update relocated document");
            }
            if new_loc != loc || indexed {
                seen.insert(new_loc);
            }
        }

        if let Some(pattern) = pattern {
            replication::log_modifier_update(call, &state, pattern)?;
        }
        count += 1;
        if let Some(key) = applied_key {
            applied.insert(key);
        }

        if !multi {
            return Ok(UpdateResult::modified(count));
        }
        if !atomic && ctx.debug.nscanned % config.write_yield_every == 0 {
            armed = true;
            if yield_now(ctx, call.catalog, ns, cursor.as_mut()).is_lost() || !cursor.ok() {
                break;
            }
        }
        call.oplog.commit_if_needed()?;
    }

    finish(ctx, call, count)
}

/// Result once the cursor is exhausted or lost
fn finish(ctx: &mut OpContext<'_>, call: &UpdateCall<'_>, count: u64) -> Result<UpdateResult> {
    if count > 0 {
        return Ok(UpdateResult::modified(count));
    }
    if call.request.upsert {
        return upsert::upsert(ctx, call);
    }
    Ok(UpdateResult::none(call.mods.is_some()))
}
