//! Dotted field paths
//!
//! A [`FieldPath`] addresses a value inside a document: `user.name`,
//! `items.3.qty`. A segment that is all digits indexes into an array when the
//! value at that point is an array and is a plain key otherwise. The segment
//! `$` is the positional placeholder; it is resolved to a concrete array index
//! per matched document before the path is used.
//!
//! # Path Operations
//!
//! | Operation | Missing intermediate | Non-container in the way |
//! |-----------|----------------------|--------------------------|
//! | [`FieldPath::get`] | `None` | `None` |
//! | [`FieldPath::set`] | created (objects; arrays padded with `null`) | error |
//! | [`FieldPath::unset`] | no-op | no-op |

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use smallvec::SmallVec;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::error::Error;

/// The positional placeholder segment
pub const POSITIONAL: &str = "$";

/// Maximum number of segments in a path
pub const MAX_PATH_DEPTH: usize = 100;

/// Error type for path parsing and path mutation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    /// Path string is empty
    #[error("empty field path")]
    Empty,

    /// Empty segment (`a..b`, leading or trailing dot)
    #[error("empty segment in field path '{0}'")]
    EmptySegment(String),

    /// Too many segments
    #[error("field path '{0}' is too deep")]
    TooDeep(String),

    /// Cannot descend into a scalar
    #[error("cannot create field '{field}' in element of type {found}")]
    NotTraversable {
        /// Segment that could not be created
        field: String,
        /// Type of the value in the way
        found: &'static str,
    },

    /// Array position is not a number
    #[error("cannot use the part '{0}' to traverse an array")]
    BadArrayIndex(String),

    /// Positional placeholder left unresolved
    #[error("unresolved positional segment in '{0}'")]
    UnresolvedPositional(String),
}

impl From<PathError> for Error {
    fn from(e: PathError) -> Self {
        match e {
            PathError::UnresolvedPositional(_) => Error::PositionalMatchMissing,
            other => Error::InvalidUpdate(other.to_string()),
        }
    }
}

/// A dotted path into a document
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath {
    segments: SmallVec<[String; 4]>,
}

impl FieldPath {
    /// Parse a dotted path
    pub fn parse(s: &str) -> Result<Self, PathError> {
        if s.is_empty() {
            return Err(PathError::Empty);
        }
        let segments: SmallVec<[String; 4]> = s.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(PathError::EmptySegment(s.to_string()));
        }
        if segments.len() > MAX_PATH_DEPTH {
            return Err(PathError::TooDeep(s.to_string()));
        }
        Ok(Self { segments })
    }

    /// Path segments
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Paths always have at least one segment
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// First segment (the top-level field name)
    pub fn head(&self) -> &str {
        &self.segments[0]
    }

    /// True if the path contains the positional placeholder
    pub fn is_positional(&self) -> bool {
        self.segments.iter().any(|s| s == POSITIONAL)
    }

    /// Replace the first positional placeholder with a concrete array index
    pub fn with_position(&self, position: usize) -> FieldPath {
        let mut segments = self.segments.clone();
        if let Some(seg) = segments.iter_mut().find(|s| *s == POSITIONAL) {
            *seg = position.to_string();
        }
        FieldPath { segments }
    }

    /// True if one path is a prefix of the other (including equality)
    ///
    /// Positional and numeric segments in either path match any segment,
    /// so `a.$.b` overlaps `a.2.b` and `a.b`.
    pub fn overlaps(&self, other: &FieldPath) -> bool {
        self.segments
            .iter()
            .zip(other.segments.iter())
            .all(|(a, b)| a == b || is_wildcard(a) || is_wildcard(b))
    }

    /// Get the value at this path
    pub fn get<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        let mut current = root;
        for seg in &self.segments {
            current = match current {
                Value::Object(obj) => obj.get(seg)?,
                Value::Array(arr) => arr.get(parse_index(seg)?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Get a mutable reference to the value at this path
    pub fn get_mut<'a>(&self, root: &'a mut Value) -> Option<&'a mut Value> {
        let mut current = root;
        for seg in &self.segments {
            current = match current {
                Value::Object(obj) => obj.get_mut(seg)?,
                Value::Array(arr) => arr.get_mut(parse_index(seg)?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Set the value at this path, creating intermediate objects as needed
    ///
    /// Setting past the end of an array pads it with `null`.
    pub fn set(&self, root: &mut Value, value: Value) -> Result<(), PathError> {
        if self.is_positional() {
            return Err(PathError::UnresolvedPositional(self.to_string()));
        }
        let (last, parents) = self
            .segments
            .split_last()
            .ok_or(PathError::Empty)?;

        let mut current = root;
        for seg in parents {
            current = child_or_create(current, seg)?;
        }

        match current {
            Value::Object(obj) => {
                obj.insert(last.clone(), value);
                Ok(())
            }
            Value::Array(arr) => {
                let idx = parse_index(last).ok_or_else(|| PathError::BadArrayIndex(last.clone()))?;
                if idx >= arr.len() {
                    arr.resize(idx + 1, Value::Null);
                }
                arr[idx] = value;
                Ok(())
            }
            other => Err(PathError::NotTraversable {
                field: last.clone(),
                found: type_name(other),
            }),
        }
    }

    /// Remove the value at this path
    ///
    /// Object fields are removed; array elements are replaced with `null` so
    /// the positions of later elements do not shift. Returns whether anything
    /// was present.
    pub fn unset(&self, root: &mut Value) -> bool {
        let Some((last, parents)) = self.segments.split_last() else {
            return false;
        };
        let mut current = root;
        for seg in parents {
            current = match current {
                Value::Object(obj) => match obj.get_mut(seg) {
                    Some(v) => v,
                    None => return false,
                },
                Value::Array(arr) => match parse_index(seg).and_then(|i| arr.get_mut(i)) {
                    Some(v) => v,
                    None => return false,
                },
                _ => return false,
            };
        }
        match current {
            Value::Object(obj) => obj.remove(last).is_some(),
            Value::Array(arr) => match parse_index(last).and_then(|i| arr.get_mut(i)) {
                Some(slot) => {
                    *slot = Value::Null;
                    true
                }
                None => false,
            },
            _ => false,
        }
    }
}

fn is_wildcard(seg: &str) -> bool {
    seg == POSITIONAL || parse_index(seg).is_some()
}

fn child_or_create<'a>(current: &'a mut Value, seg: &str) -> Result<&'a mut Value, PathError> {
    match current {
        Value::Object(obj) => Ok(obj
            .entry(seg.to_string())
            .or_insert_with(|| Value::Object(Map::new()))),
        Value::Array(arr) => {
            let idx = parse_index(seg).ok_or_else(|| PathError::BadArrayIndex(seg.to_string()))?;
            if idx >= arr.len() {
                arr.resize(idx + 1, Value::Null);
            }
            let slot = &mut arr[idx];
            if slot.is_null() {
                *slot = Value::Object(Map::new());
            }
            Ok(slot)
        }
        other => Err(PathError::NotTraversable {
            field: seg.to_string(),
            found: type_name(other),
        }),
    }
}

/// Parse an array index segment (digits only)
pub fn parse_index(seg: &str) -> Option<usize> {
    if seg.is_empty() || !seg.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    seg.parse().ok()
}

/// Type name used in error messages
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl FromStr for FieldPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldPath::parse(s)
    }
}

impl TryFrom<String> for FieldPath {
    type Error = PathError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        FieldPath::parse(&s)
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.to_string()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn p(s: &str) -> FieldPath {
        FieldPath::parse(s).unwrap()
    }

    #[test]
    fn parse_rejects_empty_segments() {
        assert_eq!(FieldPath::parse(""), Err(PathError::Empty));
        assert!(matches!(FieldPath::parse("a..b"), Err(PathError::EmptySegment(_))));
        assert!(matches!(FieldPath::parse("a."), Err(PathError::EmptySegment(_))));
    }

    #[test]
    fn get_traverses_objects_and_arrays() {
        let doc = json!({"user": {"tags": ["a", "b"]}});
        assert_eq!(p("user.tags.1").get(&doc), Some(&json!("b")));
        assert_eq!(p("user.missing").get(&doc), None);
        assert_eq!(p("user.tags.x").get(&doc), None);
    }

    #[test]
    fn set_creates_intermediate_objects() {
        let mut doc = json!({});
        p("a.b.c").set(&mut doc, json!(1)).unwrap();
        assert_eq!(doc, json!({"a": {"b": {"c": 1}}}));
    }

    #[test]
    fn set_pads_arrays_with_null() {
        let mut doc = json!({"a": [1]});
        p("a.3").set(&mut doc, json!(9)).unwrap();
        assert_eq!(doc, json!({"a": [1, null, null, 9]}));
    }

    #[test]
    fn set_through_scalar_fails() {
        let mut doc = json!({"a": 5});
        let err = p("a.b").set(&mut doc, json!(1)).unwrap_err();
        assert!(matches!(err, PathError::NotTraversable { found: "number", .. }));
    }

    #[test]
    fn set_rejects_unresolved_positional() {
        let mut doc = json!({"a": [1]});
        assert!(matches!(
            p("a.$").set(&mut doc, json!(2)),
            Err(PathError::UnresolvedPositional(_))
        ));
    }

    #[test]
    fn unset_object_field_and_array_element() {
        let mut doc = json!({"a": {"b": 1, "c": 2}, "arr": [1, 2, 3]});
        assert!(p("a.b").unset(&mut doc));
        assert!(p("arr.1").unset(&mut doc));
        assert!(!p("nope.x").unset(&mut doc));
        assert_eq!(doc, json!({"a": {"c": 2}, "arr": [1, null, 3]}));
    }

    #[test]
    fn positional_resolution() {
        let path = p("items.$.qty");
        assert!(path.is_positional());
        let fixed = path.with_position(2);
        assert_eq!(fixed.to_string(), "items.2.qty");
        assert!(!fixed.is_positional());
    }

    #[test]
    fn overlap_is_prefix_based() {
        assert!(p("a").overlaps(&p("a.b")));
        assert!(p("a.b").overlaps(&p("a")));
        assert!(p("a.$.b").overlaps(&p("a.1.b")));
        assert!(!p("a.b").overlaps(&p("a.c")));
        assert!(!p("ab").overlaps(&p("a")));
    }
}
