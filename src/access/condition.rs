//! Condition evaluation for access statements
//!
//! A statement's condition is a document query: given the predicate and a
//! sequence of documents, the evaluator returns the documents that satisfy it.
//! The engine only asks whether that subset is non-empty, so any query
//! language can be plugged in through [`ConditionEvaluator`].
//!
//! [`QueryEvaluator`] is the built-in implementation. It understands a
//! MongoDB-style vocabulary:
//! - Logical: `$and`, `$or`, `$nor`
//! - Equality and ordering: `$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`
//! - Membership: `$in`, `$nin`, `$all`
//! - Shape: `$exists`, `$size`, `$elemMatch`, `$regex` (with `$options: "i"`)
//! - Negation: `$not`
//!
//! Field keys may be dotted paths; a plain nested object is a nested query on
//! the sub-document.

use std::cmp::Ordering;

use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};
use thiserror::Error;

use super::normalize::as_sequence;

/// Malformed predicate
#[derive(Debug, Error)]
pub enum ConditionError {
    #[error("predicate must be an object, got {0}")]
    NotADocument(&'static str),

    #[error("unknown operator `{0}`")]
    UnknownOperator(String),

    #[error("operator `{operator}` {reason}")]
    InvalidOperand {
        operator: &'static str,
        reason: &'static str,
    },

    #[error("field `{0}` mixes operators and plain keys")]
    MixedOperators(String),

    #[error("invalid regex `{pattern}`: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Document query capability used for statement conditions
pub trait ConditionEvaluator: Send + Sync {
    /// Return the subset of `documents` that satisfies `predicate`
    fn filter<'d>(
        &self,
        predicate: &Value,
        documents: &[&'d Value],
    ) -> Result<Vec<&'d Value>, ConditionError>;

    /// True when at least one document satisfies `predicate`
    fn matches(&self, predicate: &Value, documents: &[&Value]) -> Result<bool, ConditionError> {
        Ok(!self.filter(predicate, documents)?.is_empty())
    }

    /// Compile `predicate` once when a policy is installed.
    ///
    /// `None` means the evaluator has no compiled form; the engine then
    /// calls [`matches`](Self::matches) on every request instead.
    fn compile(&self, _predicate: &Value) -> Option<Result<Condition, ConditionError>> {
        None
    }
}

/// Built-in MongoDB-style document query evaluator
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryEvaluator;

impl ConditionEvaluator for QueryEvaluator {
    fn filter<'d>(
        &self,
        predicate: &Value,
        documents: &[&'d Value],
    ) -> Result<Vec<&'d Value>, ConditionError> {
        let condition = Condition::compile(predicate)?;
        Ok(documents
            .iter()
            .copied()
            .filter(|doc| condition.matches(doc))
            .collect())
    }

    fn compile(&self, predicate: &Value) -> Option<Result<Condition, ConditionError>> {
        Some(Condition::compile(predicate))
    }
}

/// Field-level operator
#[derive(Debug, Clone)]
pub enum ConditionOperator {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    /// Array contains every listed value
    All(Vec<Value>),
    Exists(bool),
    Size(usize),
    Regex(Regex),
    ElemMatch(ElemMatch),
    Not(Vec<ConditionOperator>),
}

/// Query applied to each element by `$elemMatch`
#[derive(Debug, Clone)]
pub enum ElemMatch {
    /// Element is a document matched by a nested query
    Document(Condition),
    /// Element is tested directly, e.g. `{"$elemMatch": {"$gt": 3}}`
    Operators(Vec<ConditionOperator>),
}

#[derive(Debug, Clone)]
enum Clause {
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Nor(Vec<Condition>),
    Field { path: Vec<String>, test: FieldTest },
}

#[derive(Debug, Clone)]
enum FieldTest {
    Operators(Vec<ConditionOperator>),
    Nested(Condition),
}

/// A compiled predicate; all clauses must hold
#[derive(Debug, Clone, Default)]
pub struct Condition {
    clauses: Vec<Clause>,
}

impl Condition {
    /// Compile a predicate document
    pub fn compile(predicate: &Value) -> Result<Self, ConditionError> {
        match predicate {
            Value::Object(map) => Self::compile_map(map),
            other => Err(ConditionError::NotADocument(kind_of(other))),
        }
    }

    fn compile_map(map: &Map<String, Value>) -> Result<Self, ConditionError> {
        let mut clauses = Vec::with_capacity(map.len());

        for (key, value) in map {
            let clause = match key.as_str() {
                "$and" => Clause::And(compile_list("$and", value)?),
                "$or" => Clause::Or(compile_list("$or", value)?),
                "$nor" => Clause::Nor(compile_list("$nor", value)?),
                op if op.starts_with('$') => {
                    return Err(ConditionError::UnknownOperator(op.to_string()))
                }
                path => Clause::Field {
                    path: path.split('.').map(String::from).collect(),
                    test: compile_field_test(path, value)?,
                },
            };
            clauses.push(clause);
        }

        Ok(Condition { clauses })
    }

    /// Test a single document
    pub fn matches(&self, doc: &Value) -> bool {
        self.clauses.iter().all(|clause| match clause {
            Clause::And(conds) => conds.iter().all(|c| c.matches(doc)),
            Clause::Or(conds) => conds.iter().any(|c| c.matches(doc)),
            Clause::Nor(conds) => !conds.iter().any(|c| c.matches(doc)),
            Clause::Field { path, test } => {
                let values = resolve(doc, path);
                match test {
                    FieldTest::Operators(ops) => ops.iter().all(|op| op.test(&values)),
                    FieldTest::Nested(cond) => values.iter().any(|v| match v {
                        Value::Object(_) => cond.matches(v),
                        Value::Array(items) => items
                            .iter()
                            .any(|item| item.is_object() && cond.matches(item)),
                        _ => false,
                    }),
                }
            }
        })
    }
}

fn compile_list(operator: &'static str, value: &Value) -> Result<Vec<Condition>, ConditionError> {
    match value {
        Value::Array(items) if !items.is_empty() => items.iter().map(Condition::compile).collect(),
        _ => Err(ConditionError::InvalidOperand {
            operator,
            reason: "expects a non-empty array of predicates",
        }),
    }
}

fn is_operator_map(map: &Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|k| k.starts_with('$'))
}

fn compile_field_test(path: &str, value: &Value) -> Result<FieldTest, ConditionError> {
    match value {
        Value::Object(map) if is_operator_map(map) => {
            Ok(FieldTest::Operators(compile_operators(map)?))
        }
        Value::Object(map) if map.keys().any(|k| k.starts_with('$')) => {
            Err(ConditionError::MixedOperators(path.to_string()))
        }
        Value::Object(map) => Ok(FieldTest::Nested(Condition::compile_map(map)?)),
        plain => Ok(FieldTest::Operators(vec![ConditionOperator::Eq(plain.clone())])),
    }
}

fn compile_operators(map: &Map<String, Value>) -> Result<Vec<ConditionOperator>, ConditionError> {
    let case_insensitive = match map.get("$options") {
        None => false,
        Some(Value::String(opts)) => opts.contains('i'),
        Some(_) => {
            return Err(ConditionError::InvalidOperand {
                operator: "$options",
                reason: "expects a string",
            })
        }
    };

    let mut ops = Vec::with_capacity(map.len());
    for (key, operand) in map {
        let op = match key.as_str() {
            "$eq" => ConditionOperator::Eq(operand.clone()),
            "$ne" => ConditionOperator::Ne(operand.clone()),
            "$gt" => ConditionOperator::Gt(operand.clone()),
            "$gte" => ConditionOperator::Gte(operand.clone()),
            "$lt" => ConditionOperator::Lt(operand.clone()),
            "$lte" => ConditionOperator::Lte(operand.clone()),
            "$in" => ConditionOperator::In(expect_array("$in", operand)?),
            "$nin" => ConditionOperator::Nin(expect_array("$nin", operand)?),
            "$all" => ConditionOperator::All(expect_array("$all", operand)?),
            "$exists" => match operand {
                Value::Bool(b) => ConditionOperator::Exists(*b),
                _ => {
                    return Err(ConditionError::InvalidOperand {
                        operator: "$exists",
                        reason: "expects a boolean",
                    })
                }
            },
            "$size" => match operand.as_u64() {
                Some(n) => ConditionOperator::Size(n as usize),
                None => {
                    return Err(ConditionError::InvalidOperand {
                        operator: "$size",
                        reason: "expects a non-negative integer",
                    })
                }
            },
            "$regex" => ConditionOperator::Regex(compile_regex(operand, case_insensitive)?),
            "$options" => continue,
            "$elemMatch" => ConditionOperator::ElemMatch(compile_elem_match(operand)?),
            "$not" => match operand {
                Value::Object(inner) if is_operator_map(inner) => {
                    ConditionOperator::Not(compile_operators(inner)?)
                }
                _ => {
                    return Err(ConditionError::InvalidOperand {
                        operator: "$not",
                        reason: "expects an operator object",
                    })
                }
            },
            other => return Err(ConditionError::UnknownOperator(other.to_string())),
        };
        ops.push(op);
    }

    Ok(ops)
}

fn expect_array(operator: &'static str, operand: &Value) -> Result<Vec<Value>, ConditionError> {
    operand
        .as_array()
        .cloned()
        .ok_or(ConditionError::InvalidOperand {
            operator,
            reason: "expects an array",
        })
}

fn compile_regex(operand: &Value, case_insensitive: bool) -> Result<Regex, ConditionError> {
    let pattern = operand.as_str().ok_or(ConditionError::InvalidOperand {
        operator: "$regex",
        reason: "expects a string",
    })?;
    RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|source| ConditionError::InvalidRegex {
            pattern: pattern.to_string(),
            source,
        })
}

fn compile_elem_match(operand: &Value) -> Result<ElemMatch, ConditionError> {
    match operand {
        Value::Object(map) if is_operator_map(map) => {
            Ok(ElemMatch::Operators(compile_operators(map)?))
        }
        Value::Object(map) => Ok(ElemMatch::Document(Condition::compile_map(map)?)),
        _ => Err(ConditionError::InvalidOperand {
            operator: "$elemMatch",
            reason: "expects an object",
        }),
    }
}

impl ConditionOperator {
    /// Test the values a field path resolved to; an empty slice means the
    /// field is missing.
    fn test(&self, values: &[&Value]) -> bool {
        match self {
            ConditionOperator::Eq(expected) => field_equals(values, expected),
            ConditionOperator::Ne(expected) => !field_equals(values, expected),
            ConditionOperator::Gt(bound) => any_ordered(values, bound, |o| o == Ordering::Greater),
            ConditionOperator::Gte(bound) => any_ordered(values, bound, |o| o != Ordering::Less),
            ConditionOperator::Lt(bound) => any_ordered(values, bound, |o| o == Ordering::Less),
            ConditionOperator::Lte(bound) => any_ordered(values, bound, |o| o != Ordering::Greater),
            ConditionOperator::In(candidates) => field_in(values, candidates),
            ConditionOperator::Nin(candidates) => !field_in(values, candidates),
            ConditionOperator::All(required) => {
                !required.is_empty()
                    && values
                        .iter()
                        .any(|v| required.iter().all(|r| eq_match(v, r)))
            }
            ConditionOperator::Exists(should_exist) => values.is_empty() != *should_exist,
            ConditionOperator::Size(len) => values
                .iter()
                .any(|v| v.as_array().is_some_and(|items| items.len() == *len)),
            ConditionOperator::Regex(re) => values.iter().any(|v| {
                as_sequence(v)
                    .into_iter()
                    .any(|e| e.as_str().is_some_and(|s| re.is_match(s)))
            }),
            ConditionOperator::ElemMatch(query) => values.iter().any(|v| {
                v.as_array()
                    .is_some_and(|items| items.iter().any(|item| query.matches(item)))
            }),
            ConditionOperator::Not(ops) => !ops.iter().all(|op| op.test(values)),
        }
    }
}

impl ElemMatch {
    fn matches(&self, item: &Value) -> bool {
        match self {
            ElemMatch::Document(cond) => item.is_object() && cond.matches(item),
            ElemMatch::Operators(ops) => ops.iter().all(|op| op.test(&[item])),
        }
    }
}

/// Resolve a dotted path, fanning out across arrays of documents
fn resolve<'a>(doc: &'a Value, path: &[String]) -> Vec<&'a Value> {
    let mut current = vec![doc];

    for segment in path {
        let mut next = Vec::new();
        for value in current {
            match value {
                Value::Object(map) => next.extend(map.get(segment)),
                Value::Array(items) => {
                    if let Ok(index) = segment.parse::<usize>() {
                        next.extend(items.get(index));
                    }
                    next.extend(
                        items
                            .iter()
                            .filter_map(|item| item.as_object())
                            .filter_map(|map| map.get(segment)),
                    );
                }
                _ => {}
            }
        }
        if next.is_empty() {
            return next;
        }
        current = next;
    }

    current
}

/// A missing field equals only `null`
fn field_equals(values: &[&Value], expected: &Value) -> bool {
    if values.is_empty() {
        expected.is_null()
    } else {
        values.iter().any(|v| eq_match(v, expected))
    }
}

fn field_in(values: &[&Value], candidates: &[Value]) -> bool {
    if values.is_empty() {
        candidates.iter().any(Value::is_null)
    } else {
        values
            .iter()
            .any(|v| candidates.iter().any(|c| eq_match(v, c)))
    }
}

/// Field equality where an array field also matches on any element
fn eq_match(value: &Value, expected: &Value) -> bool {
    values_equal(value, expected)
        || value
            .as_array()
            .is_some_and(|items| items.iter().any(|item| values_equal(item, expected)))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xm), Value::Object(ym)) => {
            xm.len() == ym.len()
                && xm
                    .iter()
                    .all(|(k, x)| ym.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn any_ordered(values: &[&Value], bound: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    values.iter().any(|v| {
        as_sequence(v)
            .into_iter()
            .any(|e| compare(e, bound).is_some_and(&accept))
    })
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
