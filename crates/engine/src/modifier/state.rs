//! Per-document modifier state
//!
//! [`ModSetState`] is the result of applying a [`ModSet`] to one document.
//! It holds the post-image and what the engine needs to write and log it:
//! encoded sizes before and after (in-place is possible only when they are
//! equal), the array-length guards for `$push`/`$pop`, and the paths whose
//! final values make up the position-pinned replication rewrite.

use serde_json::{json, Map, Number, Value};

use pagoda_core::path::type_name;
use pagoda_core::{Document, Error, FieldPath, RecordLocator, RecordStorage, Result};

use super::{Mod, ModOp, ModSet};
use crate::query::compare::values_equal;

/// How a touched path appears in the rewrite
#[derive(Debug, Clone)]
enum RewriteStep {
    /// `$set` to its final value, or `$unset` if it ended up absent
    Final(FieldPath),
    /// Always `$unset`
    Unset(FieldPath),
}

/// Length of an array a length-dependent modifier applied to
#[derive(Debug, Clone, PartialEq, Eq)]
struct ArrayDep {
    path: FieldPath,
    /// Length before the update, `None` if the field was missing
    len: Option<usize>,
}

/// Prepared application of a modifier program to one document
#[derive(Debug, Clone)]
pub struct ModSetState {
    old_size: usize,
    new_doc: Document,
    new_size: usize,
    array_deps: Vec<ArrayDep>,
    rewrite: Vec<RewriteStep>,
    needs_rewrite: bool,
}

fn invalid(msg: String) -> Error {
    Error::InvalidUpdate(msg)
}

fn array_mut<'a>(
    root: &'a mut Value,
    path: &FieldPath,
    op: &str,
) -> Result<Option<&'a mut Vec<Value>>> {
    match path.get_mut(root) {
        None => Ok(None),
        Some(Value::Array(items)) => Ok(Some(items)),
        Some(other) => Err(invalid(format!(
            "cannot apply {} to '{}': expected an array, found {}",
            op,
            path,
            type_name(other)
        ))),
    }
}

fn add_numbers(a: &Number, b: &Number) -> Result<Number> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(sum) = x.checked_add(y) {
            return Ok(Number::from(sum));
        }
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        if let Some(sum) = x.checked_add(y) {
            return Ok(Number::from(sum));
        }
    }
    let sum = match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x + y,
        _ => return Err(invalid("$inc operand is not representable".to_string())),
    };
    Number::from_f64(sum).ok_or_else(|| invalid(format!("$inc produced {}", sum)))
}

fn apply_mod(m: &Mod, root: &mut Value, deps: &mut Vec<ArrayDep>) -> Result<()> {
    let path = &m.path;
    match &m.op {
        ModOp::Set(value) => path.set(root, value.clone())?,
        ModOp::Unset => {
            path.unset(root);
        }
        ModOp::Inc(by) => {
            let next = match path.get(root) {
                None => Number::clone(by),
                Some(Value::Number(current)) => add_numbers(current, by)?,
                Some(other) => {
                    return Err(invalid(format!(
                        "cannot apply $inc to '{}': expected a number, found {}",
                        path,
                        type_name(other)
                    )))
                }
            };
            path.set(root, Value::Number(next))?;
        }
        ModOp::Push(values) => match array_mut(root, path, "$push")? {
            Some(items) => {
                deps.push(ArrayDep {
                    path: path.clone(),
                    len: Some(items.len()),
                });
                items.extend(values.iter().cloned());
            }
            None => {
                deps.push(ArrayDep {
                    path: path.clone(),
                    len: None,
                });
                path.set(root, Value::Array(values.clone()))?;
            }
        },
        ModOp::Pop { first } => {
            let len = match array_mut(root, path, "$pop")? {
                Some(items) => {
                    let len = items.len();
                    if *first && !items.is_empty() {
                        items.remove(0);
                    } else {
                        items.pop();
                    }
                    Some(len)
                }
                None => None,
            };
            deps.push(ArrayDep {
                path: path.clone(),
                len,
            });
        }
        ModOp::Pull(condition) => {
            if let Some(items) = array_mut(root, path, "$pull")? {
                items.retain(|item| !condition.matches(item));
            }
        }
        ModOp::AddToSet(values) => match array_mut(root, path, "$addToSet")? {
            Some(items) => {
                for value in values {
                    if !items.iter().any(|item| values_equal(item, value)) {
                        items.push(value.clone());
                    }
                }
            }
            None => {
                let mut unique: Vec<Value> = Vec::with_capacity(values.len());
                for value in values {
                    if !unique.iter().any(|item| values_equal(item, value)) {
                        unique.push(value.clone());
                    }
                }
                path.set(root, Value::Array(unique))?;
            }
        },
        ModOp::Rename(to) => {
            if let Some(value) = path.get(root).cloned() {
                path.unset(root);
                to.set(root, value)?;
            }
        }
    }
    Ok(())
}

fn rewrite_steps(m: &Mod) -> Vec<RewriteStep> {
    match &m.op {
        ModOp::Unset => vec![RewriteStep::Unset(m.path.clone())],
        ModOp::Rename(to) => vec![
            RewriteStep::Unset(m.path.clone()),
            RewriteStep::Final(to.clone()),
        ],
        _ => vec![RewriteStep::Final(m.path.clone())],
    }
}

impl ModSetState {
    /// Apply `mods` to `doc`
    ///
    /// # Errors
    ///
    /// - `PositionalMatchMissing` if a positional path was not resolved
    /// - `InvalidUpdate` if an operator meets a value of the wrong type
    /// - `ImmutableId` if the document's `_id` would change
    pub(super) fn prepare(mods: &ModSet, doc: &Document) -> Result<Self> {
        if mods.has_dynamic_array() {
            return Err(Error::PositionalMatchMissing);
        }

        let mut root = doc.to_value();
        let mut array_deps = Vec::new();
        for m in mods.mods() {
            apply_mod(m, &mut root, &mut array_deps)?;
        }
        let new_doc = Document::try_from(root)?;

        if let Some(old_id) = doc.id() {
            match new_doc.id() {
                Some(new_id) if values_equal(old_id, new_id) => {}
                _ => return Err(Error::ImmutableId),
            }
        }

        let needs_rewrite =
            mods.force_rewrite() || mods.mods().iter().any(|m| m.op.is_non_idempotent());

        Ok(Self {
            old_size: doc.encoded_len()?,
            new_size: new_doc.encoded_len()?,
            new_doc,
            array_deps,
            rewrite: mods.mods().iter().flat_map(rewrite_steps).collect(),
            needs_rewrite,
        })
    }

    /// Encoded size of the document before the update
    pub fn old_size(&self) -> usize {
        self.old_size
    }

    /// Encoded size of the document after the update
    pub fn new_size(&self) -> usize {
        self.new_size
    }

    /// The post-image
    pub fn new_document(&self) -> &Document {
        &self.new_doc
    }

    /// Take the post-image
    pub fn into_document(self) -> Document {
        self.new_doc
    }

    /// True if the post-image can overwrite the record's bytes in place
    pub fn can_apply_in_place(&self) -> bool {
        self.new_size == self.old_size
    }

    /// Write the post-image over the record without moving it
    pub fn apply_in_place(&self, storage: &dyn RecordStorage, loc: RecordLocator) -> Result<()> {
        storage.write_in_place(loc, &self.new_doc)
    }

    /// The full post-image for a rebuild write
    pub fn rebuild(&self) -> Document {
        self.new_doc.clone()
    }

    /// True if the logged form must be [`ModSetState::oplog_rewrite`]
    pub fn needs_oplog_rewrite(&self) -> bool {
        self.needs_rewrite
    }

    /// Position-pinned equivalent of the program
    ///
    /// Every touched path becomes a `$set` of its final value, or an
    /// `$unset` if it is absent afterwards. The `$set` key is always present.
    pub fn oplog_rewrite(&self) -> Document {
        let root = self.new_doc.to_value();
        let mut set = Map::new();
        let mut unset = Map::new();
        for step in &self.rewrite {
            match step {
                RewriteStep::Final(path) => match path.get(&root) {
                    Some(value) => {
                        set.insert(path.to_string(), value.clone());
                    }
                    None => {
                        unset.insert(path.to_string(), json!(1));
                    }
                },
                RewriteStep::Unset(path) => {
                    unset.insert(path.to_string(), json!(1));
                }
            }
        }
        let mut rewrite = Map::new();
        rewrite.insert("$set".to_string(), Value::Object(set));
        if !unset.is_empty() {
            rewrite.insert("$unset".to_string(), Value::Object(unset));
        }
        Document::from(rewrite)
    }

    /// True if a `$push` or `$pop` applied
    pub fn has_array_dependent_mods(&self) -> bool {
        !self.array_deps.is_empty()
    }

    /// Add array-length guards to a replication filter
    ///
    /// `{field: {$size: n}}` for each array a `$push`/`$pop` applied to, or
    /// `{field: null}` if the field was missing. A field the pattern already
    /// constrains keeps its clause; both go under `$and`.
    pub fn append_size_spec(&self, pattern: &mut Document) {
        for dep in &self.array_deps {
            let key = dep.path.to_string();
            let guard = match dep.len {
                Some(n) => json!({ "$size": n }),
                None => Value::Null,
            };
            let Some(existing) = pattern.remove(&key) else {
                pattern.insert(key, guard);
                continue;
            };
            let clauses = pattern
                .entry("$and")
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(items) = clauses {
                items.push(single_clause(&key, existing));
                items.push(single_clause(&key, guard));
            }
        }
    }
}

fn single_clause(key: &str, value: Value) -> Value {
    let mut clause = Map::new();
    clause.insert(key.to_string(), value);
    Value::Object(clause)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: Value) -> Document {
        Document::try_from(v).unwrap()
    }

    fn prepare(update: Value, target: Value) -> Result<ModSetState> {
        ModSet::parse(&doc(update), &[])?.prepare(&doc(target))
    }

    fn applied(update: Value, target: Value) -> Value {
        prepare(update, target).unwrap().into_document().into_value()
    }

    #[test]
    fn inc_adds_and_creates() {
        assert_eq!(applied(json!({"$inc": {"x": 1}}), json!({"x": 5})), json!({"x": 6}));
        assert_eq!(applied(json!({"$inc": {"x": 2}}), json!({})), json!({"x": 2}));
        assert_eq!(applied(json!({"$inc": {"x": 0.5}}), json!({"x": 1})), json!({"x": 1.5}));
        assert!(matches!(
            prepare(json!({"$inc": {"x": 1}}), json!({"x": "a"})),
            Err(Error::InvalidUpdate(_))
        ));
    }

    #[test]
    fn array_operators() {
        assert_eq!(
            applied(json!({"$push": {"a": 3}}), json!({"a": [1, 2]})),
            json!({"a": [1, 2, 3]})
        );
        assert_eq!(
            applied(json!({"$pop": {"a": -1}}), json!({"a": [1, 2]})),
            json!({"a": [2]})
        );
        assert_eq!(
            applied(json!({"$pop": {"a": 1}}), json!({"a": [1, 2]})),
            json!({"a": [1]})
        );
        assert_eq!(
            applied(json!({"$pull": {"a": {"$lt": 3}}}), json!({"a": [1, 5, 2, 4]})),
            json!({"a": [5, 4]})
        );
        assert_eq!(
            applied(json!({"$addToSet": {"a": {"$each": [2, 3, 3]}}}), json!({"a": [1, 2]})),
            json!({"a": [1, 2, 3]})
        );
        assert_eq!(
            applied(json!({"$addToSet": {"a": {"$each": [1, 1]}}}), json!({})),
            json!({"a": [1]})
        );
        assert!(prepare(json!({"$push": {"a": 1}}), json!({"a": 1})).is_err());
    }

    #[test]
    fn rename_and_unset() {
        assert_eq!(
            applied(json!({"$rename": {"a": "b.c"}}), json!({"a": 1})),
            json!({"b": {"c": 1}})
        );
        assert_eq!(applied(json!({"$rename": {"a": "b"}}), json!({"z": 1})), json!({"z": 1}));
        assert_eq!(applied(json!({"$unset": {"a": 1}}), json!({"a": 1, "b": 2})), json!({"b": 2}));
    }

    #[test]
    fn id_cannot_change() {
        assert!(matches!(
            prepare(json!({"$set": {"_id": 2}}), json!({"_id": 1})),
            Err(Error::ImmutableId)
        ));
        assert!(matches!(
            prepare(json!({"$unset": {"_id": 1}}), json!({"_id": 1})),
            Err(Error::ImmutableId)
        ));
        assert!(prepare(json!({"$set": {"_id": 1}}), json!({"_id": 1})).is_ok());
    }

    #[test]
    fn unresolved_positional_is_rejected() {
        assert!(matches!(
            prepare(json!({"$set": {"a.$": 1}}), json!({"a": [0]})),
            Err(Error::PositionalMatchMissing)
        ));
    }

    #[test]
    fn in_place_requires_same_size() {
        let same = prepare(json!({"$inc": {"x": 1}}), json!({"_id": 1, "x": 5})).unwrap();
        assert!(same.can_apply_in_place());
        let grown = prepare(json!({"$set": {"s": "longer"}}), json!({"_id": 1, "s": "a"})).unwrap();
        assert!(!grown.can_apply_in_place());
        assert!(grown.new_size() > grown.old_size());
    }

    #[test]
    fn rewrite_pins_final_values() {
        let state = prepare(
            json!({"$inc": {"n": 2}, "$rename": {"a": "b"}, "$pull": {"gone": 1}}),
            json!({"_id": 1, "n": 1, "a": "v"}),
        )
        .unwrap();
        assert!(state.needs_oplog_rewrite());
        assert_eq!(
            state.oplog_rewrite(),
            doc(json!({"$set": {"n": 3, "b": "v"}, "$unset": {"a": 1, "gone": 1}}))
        );
    }

    #[test]
    fn idempotent_program_logs_verbatim() {
        let state = prepare(json!({"$set": {"a": 1}, "$push": {"l": 2}}), json!({"l": []})).unwrap();
        assert!(!state.needs_oplog_rewrite());
        assert_eq!(state.oplog_rewrite(), doc(json!({"$set": {"a": 1, "l": [2]}})));
    }

    #[test]
    fn size_guards_for_push_and_pop() {
        let state = prepare(
            json!({"$push": {"a": 1, "b": 2}, "$pop": {"c": 1}}),
            json!({"_id": 1, "a": [9, 9]}),
        )
        .unwrap();
        assert!(state.has_array_dependent_mods());
        let mut pattern = doc(json!({"_id": 1}));
        state.append_size_spec(&mut pattern);
        assert_eq!(
            pattern,
            doc(json!({"_id": 1, "a": {"$size": 2}, "b": null, "c": null}))
        );
    }

    #[test]
    fn size_guard_keeps_existing_clause() {
        let state = prepare(
            json!({"$push": {"a": 1, "b": 2}}),
            json!({"a": [9, 9], "b": [1]}),
        )
        .unwrap();
        let mut pattern = doc(json!({"a": {"$ne": []}, "b": [1], "$and": [{"k": 1}]}));
        state.append_size_spec(&mut pattern);
        assert_eq!(
            pattern,
            doc(json!({"$and": [
                {"k": 1},
                {"a": {"$ne": []}},
                {"a": {"$size": 2}},
                {"b": [1]},
                {"b": {"$size": 1}}
            ]}))
        );
    }

    #[test]
    fn forced_rewrite_after_position_fix() {
        let mods = ModSet::parse(&doc(json!({"$set": {"a.$.b": 1}})), &[]).unwrap();
        let state = mods
            .fix_dynamic_array(1)
            .prepare(&doc(json!({"a": [{"b": 0}, {"b": 0}]})))
            .unwrap();
        assert!(state.needs_oplog_rewrite());
        assert_eq!(state.oplog_rewrite(), doc(json!({"$set": {"a.1.b": 1}})));
        assert_eq!(
            state.new_document().to_value(),
            json!({"a": [{"b": 0}, {"b": 1}]})
        );
    }
}
