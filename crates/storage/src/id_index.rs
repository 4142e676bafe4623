//! Unique index over the `_id` field
//!
//! Maps the canonical form of an `_id` value to the locator of the record
//! holding it. The collection keeps it in step with every insert, relocation
//! and removal under the same write lock as the record store.

use rustc_hash::FxHashMap;
use serde_json::Value;

use pagoda_core::RecordLocator;

/// Canonical index key for an `_id` value
///
/// Compact JSON text of the value with integral floats written as integers,
/// so `7` and `7.0` share a key. Object keys are ordered, so equal values
/// always produce equal keys.
pub fn id_key(value: &Value) -> String {
    canonical(value).to_string()
}

fn canonical(value: &Value) -> Value {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() => integral(f).unwrap_or_else(|| value.clone()),
            _ => value.clone(),
        },
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), canonical(v)))
                .collect(),
        ),
        _ => value.clone(),
    }
}

/// Integer form of a float with no fractional part
fn integral(f: f64) -> Option<Value> {
    if f.fract() != 0.0 {
        return None;
    }
    // i64::MAX as f64 rounds up to 2^63, so the upper bounds are exclusive
    if f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(Value::from(f as i64))
    } else if f >= 0.0 && f < u64::MAX as f64 {
        Some(Value::from(f as u64))
    } else {
        None
    }
}

/// Unique `_id` → locator index
#[derive(Debug, Default)]
pub struct IdIndex {
    index: FxHashMap<String, RecordLocator>,
}

impl IdIndex {
    /// Create a new empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the locator for an `_id`
    pub fn get(&self, id: &Value) -> Option<RecordLocator> {
        self.index.get(&id_key(id)).copied()
    }

    /// True if the `_id` is present
    pub fn contains(&self, id: &Value) -> bool {
        self.index.contains_key(&id_key(id))
    }

    /// Point an `_id` at a locator, returning the previous locator
    pub fn insert(&mut self, id: &Value, loc: RecordLocator) -> Option<RecordLocator> {
        self.index.insert(id_key(id), loc)
    }

    /// Remove an `_id`
    pub fn remove(&mut self, id: &Value) -> Option<RecordLocator> {
        self.index.remove(&id_key(id))
    }

    /// Number of indexed documents
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Check if the index is empty
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn insert_get_remove() {
        let mut idx = IdIndex::new();
        let loc = RecordLocator::new(1, 0);
        assert_eq!(idx.insert(&json!(7), loc), None);
        assert_eq!(idx.get(&json!(7)), Some(loc));
        assert!(idx.contains(&json!(7)));
        assert_eq!(idx.remove(&json!(7)), Some(loc));
        assert!(idx.is_empty());
    }

    #[test]
    fn structured_ids_compare_by_value() {
        let mut idx = IdIndex::new();
        let loc = RecordLocator::new(0, 0);
        idx.insert(&json!({"a": 1, "b": 2}), loc);
        assert_eq!(idx.get(&json!({"b": 2, "a": 1})), Some(loc));
        assert_eq!(idx.get(&json!("7")), None);
    }

    #[test]
    fn integral_floats_share_integer_keys() {
        assert_eq!(id_key(&json!(7.0)), id_key(&json!(7)));
        assert_eq!(id_key(&json!(-0.0)), id_key(&json!(0)));
        assert_eq!(id_key(&json!({"k": [1.0, 2]})), id_key(&json!({"k": [1, 2.0]})));
        assert_ne!(id_key(&json!(7.5)), id_key(&json!(7)));

        let mut idx = IdIndex::new();
        let loc = RecordLocator::new(3, 0);
        idx.insert(&json!(7), loc);
        assert_eq!(idx.get(&json!(7.0)), Some(loc));
        assert_eq!(idx.insert(&json!(7.0), loc), Some(loc));
        assert_eq!(idx.len(), 1);
    }
}
