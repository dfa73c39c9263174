//! Shape normalization for statement fields and request documents
//!
//! All type discrimination lives here: the selector and the condition
//! evaluator only ever see ordered sequences.

use serde_json::Value;
use thiserror::Error;

use super::StringOrList;

/// A value could not be brought into the shape evaluation needs
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizationError {
    #[error("context document is null")]
    NullContext,

    #[error("context must normalize to exactly one document, got {0}")]
    NotSingleDocument(usize),
}

impl StringOrList {
    /// Patterns in declaration order; a scalar becomes a one-element sequence
    pub fn patterns(&self) -> Vec<&str> {
        match self {
            StringOrList::Single(s) => vec![s.as_str()],
            StringOrList::List(list) => list.iter().map(String::as_str).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            StringOrList::Single(_) => false,
            StringOrList::List(list) => list.is_empty(),
        }
    }
}

/// Normalize a request context into the document sequence handed to the
/// condition evaluator.
///
/// A one-element array is unwrapped; any other array length and `null` are
/// rejected so that a malformed context can never widen the match set.
pub fn normalize_context(context: &Value) -> Result<Vec<&Value>, NormalizationError> {
    match context {
        Value::Null => Err(NormalizationError::NullContext),
        Value::Array(items) if items.len() == 1 => Ok(vec![&items[0]]),
        Value::Array(items) => Err(NormalizationError::NotSingleDocument(items.len())),
        doc => Ok(vec![doc]),
    }
}

/// View an attribute value as a sequence: arrays yield their elements,
/// everything else yields itself.
pub fn as_sequence(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}
