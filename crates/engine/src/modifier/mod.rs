//! Modifier programs
//!
//! A [`ModSet`] is an operator update expression compiled once per call:
//!
//! | Operator    | Argument                       | Logged as          |
//! |-------------|--------------------------------|--------------------|
//! | `$set`      | value                          | verbatim           |
//! | `$unset`    | ignored                        | verbatim           |
//! | `$inc`      | number                         | rewritten `$set`   |
//! | `$push`     | value or `{$each: [..]}`       | verbatim + size guard |
//! | `$pop`      | `1` (last) or `-1` (first)     | verbatim + size guard |
//! | `$pull`     | value, operators or sub-filter | rewritten `$set`   |
//! | `$addToSet` | value or `{$each: [..]}`       | rewritten `$set`   |
//! | `$rename`   | target path                    | rewritten `$set`/`$unset` |
//!
//! Field paths may contain one positional `$` segment, resolved per matched
//! document with [`ModSet::fix_dynamic_array`].
//!
//! [`ModSet::prepare`] applies the program to one document and returns a
//! [`ModSetState`] that decides between in-place application and rebuild and
//! produces the replication record.

mod state;

pub use state::ModSetState;

use serde_json::{Map, Number, Value};

use pagoda_core::{Document, Error, FieldPath, Result, OPERATOR_PREFIX};

use crate::query::{equality_fields, ElementMatcher};

/// One field-level operation
#[derive(Debug, Clone)]
pub enum ModOp {
    /// `$set`
    Set(Value),
    /// `$unset`
    Unset,
    /// `$inc`
    Inc(Number),
    /// `$push`
    Push(Vec<Value>),
    /// `$pop`
    Pop {
        /// Remove the first element instead of the last
        first: bool,
    },
    /// `$pull`
    Pull(ElementMatcher),
    /// `$addToSet`
    AddToSet(Vec<Value>),
    /// `$rename`, holding the target path
    Rename(FieldPath),
}

impl ModOp {
    /// Operator name as written in update expressions
    pub fn name(&self) -> &'static str {
        match self {
            ModOp::Set(_) => "$set",
            ModOp::Unset => "$unset",
            ModOp::Inc(_) => "$inc",
            ModOp::Push(_) => "$push",
            ModOp::Pop { .. } => "$pop",
            ModOp::Pull(_) => "$pull",
            ModOp::AddToSet(_) => "$addToSet",
            ModOp::Rename(_) => "$rename",
        }
    }

    /// True if replaying the operator can give a different result than the
    /// original application
    pub fn is_non_idempotent(&self) -> bool {
        matches!(
            self,
            ModOp::Inc(_) | ModOp::Rename(_) | ModOp::Pull(_) | ModOp::AddToSet(_)
        )
    }

    /// True if the operator's effect depends on the current array length
    pub fn is_array_dependent(&self) -> bool {
        matches!(self, ModOp::Push(_) | ModOp::Pop { .. })
    }
}

/// An operator applied at a path
#[derive(Debug, Clone)]
pub struct Mod {
    /// Target field
    pub path: FieldPath,
    /// Operation
    pub op: ModOp,
}

impl Mod {
    fn touched_paths(&self) -> impl Iterator<Item = &FieldPath> {
        let target = match &self.op {
            ModOp::Rename(to) => Some(to),
            _ => None,
        };
        std::iter::once(&self.path).chain(target)
    }
}

/// Compiled operator program
#[derive(Debug, Clone)]
pub struct ModSet {
    mods: Vec<Mod>,
    indexed: bool,
    dynamic_array: bool,
    force_rewrite: bool,
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidUpdate(msg.into())
}

fn each_or_single(op: &str, arg: &Value) -> Result<Vec<Value>> {
    match arg {
        Value::Object(map) if map.contains_key("$each") => {
            if map.len() != 1 {
                return Err(invalid(format!("{} with $each takes no other fields", op)));
            }
            map.get("$each")
                .and_then(Value::as_array)
                .cloned()
                .ok_or_else(|| invalid(format!("{} $each needs an array", op)))
        }
        other => Ok(vec![other.clone()]),
    }
}

fn parse_op(op: &str, path: &FieldPath, arg: &Value) -> Result<ModOp> {
    Ok(match op {
        "$set" => ModOp::Set(arg.clone()),
        "$unset" => ModOp::Unset,
        "$inc" => match arg {
            Value::Number(n) => ModOp::Inc(n.clone()),
            _ => return Err(invalid(format!("$inc of '{}' needs a number", path))),
        },
        "$push" => ModOp::Push(each_or_single(op, arg)?),
        "$pop" => match arg.as_f64() {
            Some(n) => ModOp::Pop { first: n < 0.0 },
            None => return Err(invalid(format!("$pop of '{}' needs a number", path))),
        },
        "$pull" => ModOp::Pull(
            ElementMatcher::new(arg).map_err(|e| invalid(format!("$pull of '{}': {}", path, e)))?,
        ),
        "$addToSet" => ModOp::AddToSet(each_or_single(op, arg)?),
        "$rename" => {
            let target = arg
                .as_str()
                .ok_or_else(|| invalid(format!("$rename of '{}' needs a string target", path)))?;
            let to = FieldPath::parse(target)?;
            if path.is_positional() || to.is_positional() {
                return Err(invalid("$rename does not take positional paths"));
            }
            ModOp::Rename(to)
        }
        other => return Err(invalid(format!("unknown modifier: {}", other))),
    })
}

impl ModSet {
    /// Compile an operator update expression
    ///
    /// `index_keys` are the collection's declared index keys (including
    /// `_id`); a program touching any of them is indexed.
    ///
    /// # Errors
    ///
    /// - `MixedModifiers` if a top-level field is not an operator
    /// - `InvalidUpdate` for unknown operators, bad arguments, or two
    ///   modifiers touching overlapping paths
    pub fn parse(update: &Document, index_keys: &[FieldPath]) -> Result<Self> {
        update.keys().try_for_each(|k| {
            if k.starts_with(OPERATOR_PREFIX) {
                Ok(())
            } else {
                Err(Error::MixedModifiers)
            }
        })?;

        let mut mods = Vec::new();
        for (op, fields) in update.iter() {
            let fields = fields
                .as_object()
                .ok_or_else(|| invalid(format!("{} needs an object of fields", op)))?;
            for (field, arg) in fields {
                let path = FieldPath::parse(field)?;
                let op = parse_op(op, &path, arg)?;
                mods.push(Mod { path, op });
            }
        }

        let touched: Vec<&FieldPath> = mods.iter().flat_map(Mod::touched_paths).collect();
        for (i, a) in touched.iter().enumerate() {
            if let Some(b) = touched[i + 1..].iter().find(|b| a.overlaps(b)) {
                return Err(invalid(format!(
                    "conflicting modifiers on '{}' and '{}'",
                    a, b
                )));
            }
        }

        let indexed = touched
            .iter()
            .any(|p| index_keys.iter().any(|k| p.overlaps(k)));
        let dynamic_array = mods.iter().any(|m| m.path.is_positional());

        Ok(Self {
            mods,
            indexed,
            dynamic_array,
            force_rewrite: false,
        })
    }

    /// Compiled modifiers in application order
    pub fn mods(&self) -> &[Mod] {
        &self.mods
    }

    /// Number of modifiers
    pub fn len(&self) -> usize {
        self.mods.len()
    }

    /// True if the program has no modifiers
    pub fn is_empty(&self) -> bool {
        self.mods.is_empty()
    }

    /// True if the program touches an indexed field
    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    /// True if some path has a positional `$` segment
    pub fn has_dynamic_array(&self) -> bool {
        self.dynamic_array
    }

    /// True if the logged form must be the rewrite regardless of operators
    pub fn force_rewrite(&self) -> bool {
        self.force_rewrite
    }

    /// Resolve positional segments to `position`
    ///
    /// The specialized program always logs its rewrite: the position is a
    /// property of this document, not of a replica's copy.
    pub fn fix_dynamic_array(&self, position: usize) -> ModSet {
        let mods = self
            .mods
            .iter()
            .map(|m| Mod {
                path: m.path.with_position(position),
                op: m.op.clone(),
            })
            .collect();
        ModSet {
            mods,
            indexed: self.indexed,
            dynamic_array: false,
            force_rewrite: true,
        }
    }

    /// Apply the program to a document
    pub fn prepare(&self, doc: &Document) -> Result<ModSetState> {
        ModSetState::prepare(self, doc)
    }

    /// Build the document an upsert inserts when nothing matched
    ///
    /// Starts from the filter's top-level equality constraints (dotted paths
    /// create nested objects) and applies the program.
    ///
    /// # Errors
    ///
    /// `PositionalMatchMissing` if the program has a positional path.
    pub fn create_new_from_query(&self, filter: &Document) -> Result<Document> {
        if self.dynamic_array {
            return Err(Error::PositionalMatchMissing);
        }
        let mut root = Value::Object(Map::new());
        for (field, value) in equality_fields(filter) {
            let path = FieldPath::parse(field)?;
            path.set(&mut root, value.clone())?;
        }
        let base = Document::try_from(root)?;
        Ok(self.prepare(&base)?.into_document())
    }
}
