//! Collection namespaces
//!
//! A namespace is `<database>.<collection>`. The collection part may itself
//! contain dots (`app.system.users`). The `$` character is reserved for
//! internal collections and `system.` collections are reserved for the
//! database itself, except for a short allow-list of client-writable ones.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Character reserved for internal collection names
pub const RESERVED_CHAR: char = '$';

/// Infix marking a system collection
const SYSTEM_INFIX: &str = ".system.";

/// System collections clients are allowed to write to
const WRITABLE_SYSTEM_SUFFIXES: &[&str] = &[".system.users", ".system.js"];

/// Fully qualified system namespaces clients are allowed to write to
const WRITABLE_SYSTEM_NAMESPACES: &[&str] = &["local.system.replset"];

/// Fully qualified collection name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace {
    full: String,
    dot: usize,
}

impl Namespace {
    /// Parse a `<database>.<collection>` string
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalNamespace`] if either part is empty.
    pub fn parse(s: &str) -> Result<Self> {
        let dot = s.find('.').ok_or_else(|| Error::IllegalNamespace {
            namespace: s.to_string(),
            reason: "expected <database>.<collection>",
        })?;
        if dot == 0 || dot + 1 == s.len() {
            return Err(Error::IllegalNamespace {
                namespace: s.to_string(),
                reason: "empty database or collection name",
            });
        }
        Ok(Self {
            full: s.to_string(),
            dot,
        })
    }

    /// Database part
    pub fn database(&self) -> &str {
        &self.full[..self.dot]
    }

    /// Collection part
    pub fn collection(&self) -> &str {
        &self.full[self.dot + 1..]
    }

    /// Full `<database>.<collection>` string
    pub fn as_str(&self) -> &str {
        &self.full
    }

    /// True if this names a system collection
    pub fn is_system(&self) -> bool {
        self.full.contains(SYSTEM_INFIX) || self.collection().starts_with("system.")
    }

    /// True if clients may write to this system collection
    pub fn is_writable_system(&self) -> bool {
        WRITABLE_SYSTEM_NAMESPACES.contains(&self.full.as_str())
            || WRITABLE_SYSTEM_SUFFIXES
                .iter()
                .any(|suffix| self.full.contains(suffix))
    }

    /// Check that clients may update documents in this namespace
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalNamespace`] for namespaces containing the
    /// reserved character and for non-writable system collections.
    pub fn check_update_target(&self) -> Result<()> {
        if self.full.contains(RESERVED_CHAR) {
            return Err(Error::IllegalNamespace {
                namespace: self.full.clone(),
                reason: "cannot update reserved $ collection",
            });
        }
        if self.is_system() && !self.is_writable_system() {
            return Err(Error::IllegalNamespace {
                namespace: self.full.clone(),
                reason: "cannot update system collection",
            });
        }
        Ok(())
    }
}

impl FromStr for Namespace {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Namespace::parse(s)
    }
}

impl TryFrom<String> for Namespace {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Namespace::parse(&s)
    }
}

impl From<Namespace> for String {
    fn from(ns: Namespace) -> Self {
        ns.full
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_on_first_dot() {
        let ns = Namespace::parse("app.system.users").unwrap();
        assert_eq!(ns.database(), "app");
        assert_eq!(ns.collection(), "system.users");
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(Namespace::parse("nodot").is_err());
        assert!(Namespace::parse(".coll").is_err());
        assert!(Namespace::parse("db.").is_err());
    }

    #[test]
    fn reserved_char_is_rejected() {
        let ns = Namespace::parse("app.docs.$extra").unwrap();
        assert!(matches!(
            ns.check_update_target(),
            Err(Error::IllegalNamespace { .. })
        ));
    }

    #[test]
    fn system_collections_are_rejected() {
        let ns = Namespace::parse("app.system.indexes").unwrap();
        assert!(ns.check_update_target().is_err());
    }

    #[test]
    fn writable_system_collections_are_allowed() {
        for name in ["app.system.users", "app.system.js", "local.system.replset"] {
            let ns = Namespace::parse(name).unwrap();
            assert!(ns.check_update_target().is_ok(), "{name} should be writable");
        }
    }

    #[test]
    fn ordinary_collections_are_allowed() {
        let ns = Namespace::parse("app.orders").unwrap();
        assert!(ns.check_update_target().is_ok());
    }
}
