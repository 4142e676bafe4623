//! Update request builder

use serde_json::Value;

use pagoda_core::{Document, Namespace, Result};

use crate::context::PlanPolicy;

/// One update call: which documents, what to do, and how
///
/// ```ignore
/// let request = UpdateRequest::parse("shop.orders", json!({"status": "open"}),
///     json!({"$set": {"status": "closed"}}))?
///     .multi(true);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRequest {
    /// Target collection
    pub namespace: Namespace,
    /// Filter selecting the documents
    pub filter: Document,
    /// Operator program or literal replacement
    pub update: Document,
    /// Insert a document when nothing matches
    pub upsert: bool,
    /// Apply to every match instead of the first
    pub multi: bool,
    /// Append to the replication log
    pub log: bool,
    /// Tag log entries as produced by chunk migration
    pub from_migrate: bool,
    /// Plan restrictions
    pub policy: PlanPolicy,
}

impl UpdateRequest {
    /// Single-document, logged update with the default plan policy
    pub fn new(namespace: Namespace, filter: Document, update: Document) -> Self {
        Self {
            namespace,
            filter,
            update,
            upsert: false,
            multi: false,
            log: true,
            from_migrate: false,
            policy: PlanPolicy::default(),
        }
    }

    /// Build from a namespace string and JSON objects
    pub fn parse(namespace: &str, filter: Value, update: Value) -> Result<Self> {
        Ok(Self::new(
            Namespace::parse(namespace)?,
            Document::try_from(filter)?,
            Document::try_from(update)?,
        ))
    }

    /// Insert when nothing matches
    pub fn upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }

    /// Apply to every match
    pub fn multi(mut self, multi: bool) -> Self {
        self.multi = multi;
        self
    }

    /// Append to the replication log
    pub fn log(mut self, log: bool) -> Self {
        self.log = log;
        self
    }

    /// Tag log entries as migration traffic
    pub fn from_migrate(mut self, from_migrate: bool) -> Self {
        self.from_migrate = from_migrate;
        self
    }

    /// Restrict the plans the engine may use
    pub fn policy(mut self, policy: PlanPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// True if `update` is an operator program
    pub fn is_operator(&self) -> bool {
        self.update.is_operator_expression()
    }
}
