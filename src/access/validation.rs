//! Create-time validation for policy and statement documents
//!
//! Mutations carry their fields as raw JSON so malformed shapes are reported
//! here instead of being rejected earlier by deserialization. A mutation that
//! passes validation converts into the typed [`Statement`] / [`AccessPolicy`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::{AccessPolicy, Effect, Statement, StringOrList};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("required field \"{0}\" not specified")]
    MissingField(&'static str),

    #[error("no statements were specified")]
    NoStatements,

    #[error("invalid access statement effect \"{0}\" (expected \"allow\" or \"deny\")")]
    InvalidEffect(String),

    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("statement {index}: {source}")]
    Statement {
        index: usize,
        source: Box<ValidationError>,
    },
}

impl ValidationError {
    /// Name of the offending field, looking through statement wrappers
    pub fn field(&self) -> Option<&'static str> {
        match self {
            ValidationError::MissingField(field) => Some(*field),
            ValidationError::NoStatements => Some("statement"),
            ValidationError::InvalidEffect(_) => Some("effect"),
            ValidationError::InvalidField { field, .. } => Some(*field),
            ValidationError::Statement { source, .. } => source.field(),
        }
    }

    /// Index of the offending statement, if the error is statement-scoped
    pub fn statement_index(&self) -> Option<usize> {
        match self {
            ValidationError::Statement { index, .. } => Some(*index),
            _ => None,
        }
    }
}

/// Statement create document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatementMutation {
    /// Optional; policies fill in `<policy id>:<index>` when empty
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub effect: String,
    #[serde(default)]
    pub action: Value,
    #[serde(default)]
    pub resource: Value,
    #[serde(default)]
    pub condition: Value,
}

impl StatementMutation {
    /// Validate a statement create document
    pub fn validate_create(&self) -> Result<(), ValidationError> {
        self.parse().map(|_| ())
    }

    /// Validate and convert into a typed statement
    pub fn into_statement(self, id: impl Into<String>) -> Result<Statement, ValidationError> {
        let (effect, action, resource) = self.parse()?;
        Ok(Statement {
            id: id.into(),
            effect,
            action,
            resource,
            condition: match self.condition {
                Value::Null => None,
                condition => Some(condition),
            },
        })
    }

    fn parse(&self) -> Result<(Effect, StringOrList, StringOrList), ValidationError> {
        let effect = parse_effect(&self.effect)?;
        let action = parse_patterns("action", &self.action)?;
        let resource = parse_patterns("resource", &self.resource)?;

        match &self.condition {
            Value::Null | Value::Object(_) => {}
            _ => {
                return Err(ValidationError::InvalidField {
                    field: "condition",
                    reason: "expected a document".to_string(),
                })
            }
        }

        Ok((effect, action, resource))
    }
}

/// Policy create document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyMutation {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub statement: Vec<StatementMutation>,
}

impl PolicyMutation {
    /// Validate a policy create document, reporting the first failing statement
    pub fn validate_create(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::MissingField("name"));
        }
        if self.version.is_empty() {
            return Err(ValidationError::MissingField("version"));
        }
        if self.statement.is_empty() {
            return Err(ValidationError::NoStatements);
        }

        for (index, statement) in self.statement.iter().enumerate() {
            statement
                .validate_create()
                .map_err(|source| ValidationError::Statement {
                    index,
                    source: Box::new(source),
                })?;
        }

        Ok(())
    }

    /// Validate and convert into a typed policy. Statements without an id
    /// get `<policy id>:<index>`.
    pub fn into_policy(self, id: impl Into<String>) -> Result<AccessPolicy, ValidationError> {
        self.validate_create()?;

        let id = id.into();
        let statement = self
            .statement
            .into_iter()
            .enumerate()
            .map(|(index, s)| {
                let statement_id = if s.id.is_empty() {
                    format!("{id}:{index}")
                } else {
                    s.id.clone()
                };
                s.into_statement(statement_id)
                    .map_err(|source| ValidationError::Statement {
                        index,
                        source: Box::new(source),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(AccessPolicy {
            id,
            name: self.name,
            version: self.version,
            statement,
        })
    }
}

/// Validate a statement create document
pub fn validate_statement_mutation(mutation: &StatementMutation) -> Result<(), ValidationError> {
    mutation.validate_create()
}

/// Validate a policy create document
pub fn validate_policy_mutation(mutation: &PolicyMutation) -> Result<(), ValidationError> {
    mutation.validate_create()
}

fn parse_effect(effect: &str) -> Result<Effect, ValidationError> {
    match effect {
        "allow" => Ok(Effect::Allow),
        "deny" => Ok(Effect::Deny),
        "" => Err(ValidationError::MissingField("effect")),
        other => Err(ValidationError::InvalidEffect(other.to_string())),
    }
}

fn parse_patterns(field: &'static str, value: &Value) -> Result<StringOrList, ValidationError> {
    let invalid = |reason: String| ValidationError::InvalidField { field, reason };

    match value {
        Value::Null => Err(ValidationError::MissingField(field)),
        Value::String(s) if s.is_empty() => Err(invalid("empty string".to_string())),
        Value::String(s) => Ok(StringOrList::Single(s.clone())),
        Value::Array(items) if items.is_empty() => Err(invalid("empty list".to_string())),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::String(s) if !s.is_empty() => Ok(s.clone()),
                Value::String(_) => Err(invalid(format!("element {i} is an empty string"))),
                _ => Err(invalid(format!("element {i} is not a string"))),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(StringOrList::List),
        _ => Err(invalid("expected a string or a list of strings".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn statement(v: Value) -> StatementMutation {
        serde_json::from_value(v).unwrap()
    }

    fn valid_statement() -> Value {
        json!({
            "effect": "allow",
            "action": ["read", "list"],
            "resource": "/api/*",
            "condition": { "claims.sub": { "$exists": true } }
        })
    }

    #[test]
    fn test_valid_statement() {
        assert!(statement(valid_statement()).validate_create().is_ok());

        let no_condition = json!({ "effect": "deny", "action": "*", "resource": "*" });
        assert!(statement(no_condition).validate_create().is_ok());
    }

    #[test]
    fn test_invalid_effect() {
        let mut v = valid_statement();
        v["effect"] = json!("maybe");
        let err = statement(v).validate_create().unwrap_err();

        assert_eq!(err, ValidationError::InvalidEffect("maybe".to_string()));
        assert_eq!(err.field(), Some("effect"));

        let missing = json!({ "action": "*", "resource": "*" });
        assert_eq!(
            statement(missing).validate_create(),
            Err(ValidationError::MissingField("effect"))
        );
    }

    #[test]
    fn test_invalid_patterns() {
        let cases = [
            ("action", json!([]), "invalid action: empty list"),
            ("action", json!(""), "invalid action: empty string"),
            ("action", json!(["read", ""]), "invalid action: element 1 is an empty string"),
            ("resource", json!(["/a", 3]), "invalid resource: element 1 is not a string"),
            ("resource", json!({ "a": 1 }), "invalid resource: expected a string or a list of strings"),
            ("resource", json!(true), "invalid resource: expected a string or a list of strings"),
        ];

        for (field, value, message) in cases {
            let mut v = valid_statement();
            v[field] = value;
            let err = statement(v).validate_create().unwrap_err();
            assert_eq!(err.to_string(), message);
            assert_eq!(err.field(), Some(field));
        }
    }

    #[test]
    fn test_missing_action() {
        let v = json!({ "effect": "allow", "resource": "*" });
        let err = statement(v).validate_create().unwrap_err();
        assert_eq!(err.to_string(), "required field \"action\" not specified");
    }

    #[test]
    fn test_condition_must_be_document() {
        let mut v = valid_statement();
        v["condition"] = json!(["root"]);
        let err = statement(v).validate_create().unwrap_err();
        assert_eq!(err.field(), Some("condition"));
    }

    #[test]
    fn test_policy_requires_metadata_and_statements() {
        let mut policy = PolicyMutation {
            name: String::new(),
            version: "1".to_string(),
            statement: vec![statement(valid_statement())],
        };
        assert_eq!(
            policy.validate_create(),
            Err(ValidationError::MissingField("name"))
        );

        policy.name = "readers".to_string();
        policy.version = String::new();
        assert_eq!(
            policy.validate_create(),
            Err(ValidationError::MissingField("version"))
        );

        policy.version = "1".to_string();
        policy.statement.clear();
        assert_eq!(policy.validate_create(), Err(ValidationError::NoStatements));
    }

    #[test]
    fn test_policy_reports_first_failing_index() {
        let mut bad_effect = valid_statement();
        bad_effect["effect"] = json!("maybe");
        let mut bad_action = valid_statement();
        bad_action["action"] = json!([]);

        let policy = PolicyMutation {
            name: "ops".to_string(),
            version: "1".to_string(),
            statement: vec![
                statement(valid_statement()),
                statement(bad_action),
                statement(bad_effect),
            ],
        };

        let err = validate_policy_mutation(&policy).unwrap_err();
        assert_eq!(err.statement_index(), Some(1));
        assert_eq!(err.field(), Some("action"));
        assert_eq!(err.to_string(), "statement 1: invalid action: empty list");
    }

    #[test]
    fn test_into_policy_assigns_statement_ids() {
        let policy = PolicyMutation {
            name: "ops".to_string(),
            version: "1".to_string(),
            statement: vec![
                statement(valid_statement()),
                statement(json!({ "effect": "deny", "action": "delete", "resource": "*" })),
            ],
        }
        .into_policy("ops-policy")
        .unwrap();

        assert_eq!(policy.id, "ops-policy");
        assert_eq!(policy.statement[0].id, "ops-policy:0");
        assert_eq!(policy.statement[1].id, "ops-policy:1");
        assert_eq!(policy.statement[1].effect, Effect::Deny);
        assert!(policy.statement[1].condition.is_none());
        assert_eq!(
            policy.statement[0].action,
            StringOrList::from(vec!["read", "list"])
        );
    }

    #[test]
    fn test_into_policy_keeps_authored_statement_ids() {
        let policy = PolicyMutation {
            name: "ops".to_string(),
            version: "1".to_string(),
            statement: vec![
                statement(json!({ "id": "deny-delete", "effect": "deny", "action": "delete", "resource": "*" })),
                statement(valid_statement()),
            ],
        }
        .into_policy("ops-policy")
        .unwrap();

        assert_eq!(policy.statement[0].id, "deny-delete");
        assert_eq!(policy.statement[1].id, "ops-policy:1");
    }

    #[test]
    fn test_validate_statement_mutation_wrapper() {
        assert!(validate_statement_mutation(&statement(valid_statement())).is_ok());
        assert!(validate_statement_mutation(&StatementMutation::default()).is_err());
    }
}
