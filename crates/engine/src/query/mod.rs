//! Filter matching
//!
//! [`FilterMatcher`] compiles a filter document once and evaluates it against
//! candidate documents. Supported:
//!
//! - field equality, with array containment (`{tags: "a"}` matches
//!   `{tags: ["a", "b"]}`) and `null` matching a missing field
//! - `$eq $ne $gt $gte $lt $lte $in $nin $exists $size $elemMatch`
//! - `$and` / `$or` over sub-filters
//! - dotted paths that descend through arrays of objects
//! - `$atomic` / `$isolated`, which mark the operation as not yieldable
//!
//! When a match goes through an array, the position of the first array
//! element that satisfied the filter is reported as the element match key.
//! The positional `$` segment of an update resolves to that position.

pub mod compare;

use serde_json::{Map, Value};

use pagoda_core::path::parse_index;
use pagoda_core::{
    Document, Error, FieldPath, MatchDetails, Matcher, Result, ID_FIELD, OPERATOR_PREFIX,
};

use compare::{compare_values, is_truthy, values_equal};

/// Range comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CmpOp {
    fn holds(self, candidate: &Value, operand: &Value) -> bool {
        use std::cmp::Ordering::*;
        match (self, compare_values(candidate, operand)) {
            (CmpOp::Gt, Some(Greater)) => true,
            (CmpOp::Gte, Some(Greater | Equal)) => true,
            (CmpOp::Lt, Some(Less)) => true,
            (CmpOp::Lte, Some(Less | Equal)) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
enum Pred {
    Eq(Value),
    Ne(Value),
    Cmp(CmpOp, Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    Size(usize),
    ElemMatch(ElemMatch),
}

#[derive(Debug, Clone)]
enum ElemMatch {
    /// Elements are sub-documents matched against a filter
    Document(Vec<Expr>),
    /// Elements are values tested with operators
    Value(Vec<Pred>),
}

#[derive(Debug, Clone)]
enum Expr {
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Field { path: FieldPath, preds: Vec<Pred> },
}

/// Outcome of one test: `None` = no match, `Some(pos)` = match, with the
/// array position it went through if any
type Hit = Option<Option<usize>>;

#[derive(Debug, Clone, Copy)]
struct Candidate<'a> {
    value: Option<&'a Value>,
    pos: Option<usize>,
}

/// Compiled filter
#[derive(Debug, Clone)]
pub struct FilterMatcher {
    clauses: Vec<Expr>,
    atomic: bool,
}

impl FilterMatcher {
    /// Compile a filter document
    ///
    /// # Errors
    ///
    /// Returns `InvalidFilter` for unknown operators, malformed operands,
    /// and positional paths.
    pub fn new(filter: &Document) -> Result<Self> {
        let (clauses, atomic) = parse_clauses(filter)?;
        Ok(Self { clauses, atomic })
    }

    /// Evaluate against a document, returning the element match key on success
    pub fn match_position(&self, doc: &Map<String, Value>) -> Hit {
        eval_all(&self.clauses, doc)
    }
}

impl Matcher for FilterMatcher {
    fn matches(&self, doc: &Document, details: &mut MatchDetails) -> bool {
        match self.match_position(doc) {
            Some(pos) => {
                if details.want_elem_match_key {
                    details.elem_match_key = pos;
                }
                true
            }
            None => false,
        }
    }

    fn is_atomic(&self) -> bool {
        self.atomic
    }
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidFilter(msg.into())
}

/// True if a value is an object whose first key is an operator
pub fn is_operator_object(value: &Value) -> bool {
    match value {
        Value::Object(map) => map
            .keys()
            .next()
            .map_or(false, |k| k.starts_with(OPERATOR_PREFIX)),
        _ => false,
    }
}

fn parse_clauses(map: &Map<String, Value>) -> Result<(Vec<Expr>, bool)> {
    let mut clauses = Vec::with_capacity(map.len());
    let mut atomic = false;
    for (key, value) in map {
        match key.as_str() {
            "$and" | "$or" => {
                let subs = value
                    .as_array()
                    .filter(|a| !a.is_empty())
                    .ok_or_else(|| invalid(format!("{} needs a non-empty array", key)))?;
                let mut children = Vec::with_capacity(subs.len());
                for sub in subs {
                    let obj = sub
                        .as_object()
                        .ok_or_else(|| invalid(format!("{} entries must be objects", key)))?;
                    let (exprs, sub_atomic) = parse_clauses(obj)?;
                    atomic |= sub_atomic;
                    children.push(Expr::And(exprs));
                }
                clauses.push(if key == "$and" {
                    Expr::And(children)
                } else {
                    Expr::Or(children)
                });
            }
            "$atomic" | "$isolated" => atomic |= is_truthy(value),
            k if k.starts_with(OPERATOR_PREFIX) => {
                return Err(invalid(format!("unknown top-level operator: {}", k)));
            }
            k => {
                let path = FieldPath::parse(k).map_err(|e| invalid(e.to_string()))?;
                if path.is_positional() {
                    return Err(invalid(format!("positional path '{}' in filter", k)));
                }
                clauses.push(Expr::Field {
                    path,
                    preds: parse_value_preds(value)?,
                });
            }
        }
    }
    Ok((clauses, atomic))
}

fn parse_value_preds(value: &Value) -> Result<Vec<Pred>> {
    match value {
        Value::Object(ops) if is_operator_object(value) => ops
            .iter()
            .map(|(op, arg)| parse_pred(op, arg))
            .collect(),
        _ => Ok(vec![Pred::Eq(value.clone())]),
    }
}

fn parse_pred(op: &str, arg: &Value) -> Result<Pred> {
    let list = |arg: &Value| -> Result<Vec<Value>> {
        arg.as_array()
            .cloned()
            .ok_or_else(|| invalid(format!("{} needs an array", op)))
    };
    Ok(match op {
        "$eq" => Pred::Eq(arg.clone()),
        "$ne" => Pred::Ne(arg.clone()),
        "$gt" => Pred::Cmp(CmpOp::Gt, arg.clone()),
        "$gte" => Pred::Cmp(CmpOp::Gte, arg.clone()),
        "$lt" => Pred::Cmp(CmpOp::Lt, arg.clone()),
        "$lte" => Pred::Cmp(CmpOp::Lte, arg.clone()),
        "$in" => Pred::In(list(arg)?),
        "$nin" => Pred::Nin(list(arg)?),
        "$exists" => Pred::Exists(is_truthy(arg)),
        "$size" => Pred::Size(
            arg.as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| invalid("$size needs a non-negative integer"))?,
        ),
        "$elemMatch" => {
            let obj = arg
                .as_object()
                .ok_or_else(|| invalid("$elemMatch needs an object"))?;
            let first_is_value_op = obj
                .keys()
                .next()
                .map_or(false, |k| k.starts_with(OPERATOR_PREFIX) && k != "$and" && k != "$or");
            if first_is_value_op {
                Pred::ElemMatch(ElemMatch::Value(parse_value_preds(arg)?))
            } else {
                Pred::ElemMatch(ElemMatch::Document(parse_clauses(obj)?.0))
            }
        }
        other => return Err(invalid(format!("unknown operator: {}", other))),
    })
}

fn eval_all(exprs: &[Expr], doc: &Map<String, Value>) -> Hit {
    let mut pos = None;
    for expr in exprs {
        let hit = eval(expr, doc)?;
        pos = pos.or(hit);
    }
    Some(pos)
}

fn eval(expr: &Expr, doc: &Map<String, Value>) -> Hit {
    match expr {
        Expr::And(children) => eval_all(children, doc),
        Expr::Or(children) => children.iter().find_map(|c| eval(c, doc)),
        Expr::Field { path, preds } => {
            let mut candidates = Vec::new();
            resolve_in_map(doc, path.segments(), None, &mut candidates);
            let mut pos = None;
            for pred in preds {
                let hit = eval_pred(pred, &candidates)?;
                pos = pos.or(hit);
            }
            Some(pos)
        }
    }
}

fn resolve_in_map<'a>(
    map: &'a Map<String, Value>,
    segs: &[String],
    pos: Option<usize>,
    out: &mut Vec<Candidate<'a>>,
) {
    let Some((first, rest)) = segs.split_first() else {
        return;
    };
    match map.get(first) {
        Some(child) => resolve(child, rest, pos, out),
        None => out.push(Candidate { value: None, pos }),
    }
}

fn resolve<'a>(current: &'a Value, segs: &[String], pos: Option<usize>, out: &mut Vec<Candidate<'a>>) {
    let Some((first, rest)) = segs.split_first() else {
        out.push(Candidate {
            value: Some(current),
            pos,
        });
        return;
    };
    match current {
        Value::Object(map) => resolve_in_map(map, segs, pos, out),
        Value::Array(items) => {
            if let Some(i) = parse_index(first) {
                match items.get(i) {
                    Some(child) => resolve(child, rest, pos, out),
                    None => out.push(Candidate { value: None, pos }),
                }
                return;
            }
            let before = out.len();
            for (i, item) in items.iter().enumerate() {
                if let Value::Object(map) = item {
                    resolve_in_map(map, segs, pos.or(Some(i)), out);
                }
            }
            if out.len() == before {
                out.push(Candidate { value: None, pos });
            }
        }
        _ => out.push(Candidate { value: None, pos }),
    }
}

/// Test `check` against a value and, if it is an array, each element
fn expand(cand: &Candidate<'_>, check: impl Fn(&Value) -> bool) -> Hit {
    let value = cand.value?;
    if check(value) {
        return Some(cand.pos);
    }
    if let Value::Array(items) = value {
        for (i, item) in items.iter().enumerate() {
            if check(item) {
                return Some(cand.pos.or(Some(i)));
            }
        }
    }
    None
}

fn eq_hit(cand: &Candidate<'_>, operand: &Value) -> Hit {
    if cand.value.is_none() {
        return operand.is_null().then_some(cand.pos);
    }
    expand(cand, |v| values_equal(v, operand))
}

fn any_candidate(candidates: &[Candidate<'_>], test: impl Fn(&Candidate<'_>) -> Hit) -> Hit {
    candidates.iter().find_map(test)
}

fn eval_pred(pred: &Pred, candidates: &[Candidate<'_>]) -> Hit {
    match pred {
        Pred::Eq(operand) => any_candidate(candidates, |c| eq_hit(c, operand)),
        Pred::Ne(operand) => match any_candidate(candidates, |c| eq_hit(c, operand)) {
            Some(_) => None,
            None => Some(None),
        },
        Pred::Cmp(op, operand) => any_candidate(candidates, |c| expand(c, |v| op.holds(v, operand))),
        Pred::In(operands) => any_candidate(candidates, |c| {
            operands.iter().find_map(|operand| eq_hit(c, operand))
        }),
        Pred::Nin(operands) => {
            let hit = any_candidate(candidates, |c| {
                operands.iter().find_map(|operand| eq_hit(c, operand))
            });
            match hit {
                Some(_) => None,
                None => Some(None),
            }
        }
        Pred::Exists(wanted) => {
            let present = candidates.iter().find(|c| c.value.is_some());
            match (present, wanted) {
                (Some(c), true) => Some(c.pos),
                (None, false) => Some(None),
                _ => None,
            }
        }
        Pred::Size(n) => any_candidate(candidates, |c| match c.value {
            Some(Value::Array(items)) if items.len() == *n => Some(c.pos),
            _ => None,
        }),
        Pred::ElemMatch(elem) => any_candidate(candidates, |c| {
            let Some(Value::Array(items)) = c.value else {
                return None;
            };
            items.iter().enumerate().find_map(|(i, item)| {
                let matched = match (elem, item) {
                    (ElemMatch::Document(exprs), Value::Object(map)) => {
                        eval_all(exprs, map).is_some()
                    }
                    (ElemMatch::Document(_), _) => false,
                    (ElemMatch::Value(preds), _) => {
                        let single = [Candidate {
                            value: Some(item),
                            pos: None,
                        }];
                        preds.iter().all(|p| eval_pred(p, &single).is_some())
                    }
                };
                matched.then_some(c.pos.or(Some(i)))
            })
        }),
    }
}

/// Test applied to individual array elements (`$pull` conditions)
///
/// An operator object tests the element's value, a plain object is a filter
/// over sub-document elements, anything else is equality.
#[derive(Debug, Clone)]
pub struct ElementMatcher(ElementTest);

#[derive(Debug, Clone)]
enum ElementTest {
    Equals(Value),
    Ops(Vec<Pred>),
    Filter(Vec<Expr>),
}

impl ElementMatcher {
    /// Compile an element condition
    pub fn new(condition: &Value) -> Result<Self> {
        let test = match condition {
            Value::Object(_) if is_operator_object(condition) => {
                ElementTest::Ops(parse_value_preds(condition)?)
            }
            Value::Object(map) => ElementTest::Filter(parse_clauses(map)?.0),
            other => ElementTest::Equals(other.clone()),
        };
        Ok(Self(test))
    }

    /// True if the element satisfies the condition
    pub fn matches(&self, item: &Value) -> bool {
        match (&self.0, item) {
            (ElementTest::Equals(v), _) => values_equal(v, item),
            (ElementTest::Ops(preds), _) => {
                let single = [Candidate {
                    value: Some(item),
                    pos: None,
                }];
                preds.iter().all(|p| eval_pred(p, &single).is_some())
            }
            (ElementTest::Filter(exprs), Value::Object(map)) => eval_all(exprs, map).is_some(),
            (ElementTest::Filter(_), _) => false,
        }
    }
}

/// True if the filter is exactly `{_id: <value>}` with a non-operator value
pub fn is_simple_id_query(filter: &Document) -> bool {
    filter.len() == 1
        && filter
            .get(ID_FIELD)
            .map_or(false, |v| !is_operator_object(v))
}

/// The `_id` value a filter pins by top-level equality, if any
///
/// Accepts `{_id: v, ...}` and `{_id: {$eq: v}, ...}`.
pub fn id_equality(filter: &Document) -> Option<&Value> {
    let value = filter.get(ID_FIELD)?;
    if !is_operator_object(value) {
        return Some(value);
    }
    match value.as_object() {
        Some(ops) if ops.len() == 1 => ops.get("$eq"),
        _ => None,
    }
}

/// Top-level equality constraints of a filter
///
/// Clauses whose name starts with `$` and fields whose value is an operator
/// object are skipped.
pub fn equality_fields(filter: &Document) -> Vec<(&str, &Value)> {
    filter
        .iter()
        .filter(|(k, v)| !k.starts_with(OPERATOR_PREFIX) && !is_operator_object(v))
        .map(|(k, v)| (k.as_str(), v))
        .collect()
}
