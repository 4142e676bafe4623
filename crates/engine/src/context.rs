//! Per-call operation context
//!
//! An [`OpContext`] is owned by the caller of one update. It carries:
//! - whether the call may raise page faults (and be retried)
//! - the cooperative [`Scheduler`] hook run at every suspension point
//! - the [`OpDebug`] diagnostics record the engine fills in
//!
//! # Usage
//!
//! ```ignore
//! let mut yields = 0;
//! let mut scheduler = |_: &Catalog, _: &Namespace| yields += 1;
//! let mut ctx = OpContext::new().with_scheduler(&mut scheduler);
//! db.update_with(&mut ctx, request)?;
//! println!("{}", ctx.debug.summary());
//! ```

use std::fmt;

use pagoda_core::{Document, Namespace};
use pagoda_storage::Catalog;

/// Work run while an update is suspended
///
/// The scheduler may mutate any collection through the catalog: insert,
/// relocate and delete records, or drop collections. The engine revalidates
/// its cursor afterwards.
pub trait Scheduler {
    /// Called at each suspension point with the namespace being updated
    fn on_yield(&mut self, catalog: &Catalog, ns: &Namespace);
}

impl<F> Scheduler for F
where
    F: FnMut(&Catalog, &Namespace),
{
    fn on_yield(&mut self, catalog: &Catalog, ns: &Namespace) {
        self(catalog, ns)
    }
}

/// Diagnostics for one update call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpDebug {
    /// Candidates examined
    pub nscanned: u64,
    /// Documents modified or inserted
    pub nupdated: u64,
    /// Documents relocated by the update
    pub nmoved: u64,
    /// Suspensions taken
    pub nyields: u64,
    /// Page faults raised (each one retried the call)
    pub page_faults: u64,
    /// Resolved through the unique-key fast path
    pub idhack: bool,
    /// An operator program was applied in place
    pub fastmod: bool,
    /// An operator upsert inserted a new document
    pub fastmodinsert: bool,
    /// A literal upsert inserted a new document
    pub upsert: bool,
    /// The update expression as received
    pub update_expression: Option<Document>,
}

impl OpDebug {
    /// Clear everything except the fault counter, before a retry
    pub(crate) fn reset_for_retry(&mut self) {
        let page_faults = self.page_faults;
        *self = OpDebug {
            page_faults,
            ..OpDebug::default()
        };
    }

    /// Format as a one-line human-readable string
    pub fn summary(&self) -> String {
        format!(
            "scanned: {}, updated: {}, moved: {}, yields: {}, faults: {}{}{}{}{}",
            self.nscanned,
            self.nupdated,
            self.nmoved,
            self.nyields,
            self.page_faults,
            if self.idhack { ", idhack" } else { "" },
            if self.fastmod { ", fastmod" } else { "" },
            if self.fastmodinsert { ", fastmodinsert" } else { "" },
            if self.upsert { ", upsert" } else { "" },
        )
    }
}

impl fmt::Display for OpDebug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// Plan restrictions for one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanPolicy {
    /// Allow the unique-key fast path for simple `_id` queries
    pub permit_optimal_id_plan: bool,
}

impl Default for PlanPolicy {
    fn default() -> Self {
        Self {
            permit_optimal_id_plan: true,
        }
    }
}

/// Caller-owned context for one update call
#[derive(Default)]
pub struct OpContext<'a> {
    /// Raise `PageFault` for non-resident records instead of reading them
    pub allowed_to_fault: bool,
    /// Hook run at suspension points
    pub scheduler: Option<&'a mut dyn Scheduler>,
    /// Diagnostics filled in by the engine
    pub debug: OpDebug,
}

impl<'a> OpContext<'a> {
    /// Context that never faults and has no scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow page faults
    pub fn allow_faults(mut self) -> Self {
        self.allowed_to_fault = true;
        self
    }

    /// Install a scheduler hook
    pub fn with_scheduler(mut self, scheduler: &'a mut dyn Scheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Run the scheduler hook, if any, and count the suspension
    pub(crate) fn suspend(&mut self, catalog: &Catalog, ns: &Namespace) {
        self.debug.nyields += 1;
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.on_yield(catalog, ns);
        }
    }
}

impl fmt::Debug for OpContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpContext")
            .field("allowed_to_fault", &self.allowed_to_fault)
            .field("scheduler", &self.scheduler.is_some())
            .field("debug", &self.debug)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closure_scheduler_runs_on_suspend() {
        let catalog = Catalog::default();
        let ns = Namespace::parse("test.docs").unwrap();
        let mut calls = 0;
        let mut hook = |_: &Catalog, ns: &Namespace| {
            assert_eq!(ns.as_str(), "test.docs");
            calls += 1;
        };
        {
            let mut ctx = OpContext::new().with_scheduler(&mut hook);
            ctx.suspend(&catalog, &ns);
            ctx.suspend(&catalog, &ns);
            assert_eq!(ctx.debug.nyields, 2);
        }
        assert_eq!(calls, 2);
    }

    #[test]
    fn reset_for_retry_keeps_fault_count() {
        let mut debug = OpDebug {
            nscanned: 4,
            page_faults: 2,
            idhack: true,
            ..OpDebug::default()
        };
        debug.reset_for_retry();
        assert_eq!(debug.nscanned, 0);
        assert_eq!(debug.page_faults, 2);
        assert!(!debug.idhack);
    }

    #[test]
    fn summary_lists_flags() {
        let debug = OpDebug {
            nscanned: 3,
            idhack: true,
            fastmod: true,
            ..OpDebug::default()
        };
        assert_eq!(
            debug.summary(),
            "scanned: 3, updated: 0, moved: 0, yields: 0, faults: 0, idhack, fastmod"
        );
    }

    #[test]
    fn plan_policy_permits_id_plan_by_default() {
        assert!(PlanPolicy::default().permit_optimal_id_plan);
    }
}
