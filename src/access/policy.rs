//! Access policy document structure
//!
//! Policies are ordered lists of allow/deny statements, shaped like AWS IAM
//! documents but with a document-query condition instead of IAM condition keys.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::PatternMatcher;

/// Effect of a policy statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    /// Allow the action
    Allow,
    /// Deny the action (takes precedence over Allow)
    Deny,
}

impl Effect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::Allow => "allow",
            Effect::Deny => "deny",
        }
    }
}

impl std::fmt::Display for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action or resource field: a single pattern or a list of patterns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringOrList {
    Single(String),
    List(Vec<String>),
}

impl From<&str> for StringOrList {
    fn from(s: &str) -> Self {
        StringOrList::Single(s.to_string())
    }
}

impl From<String> for StringOrList {
    fn from(s: String) -> Self {
        StringOrList::Single(s)
    }
}

impl From<Vec<String>> for StringOrList {
    fn from(v: Vec<String>) -> Self {
        StringOrList::List(v)
    }
}

impl From<Vec<&str>> for StringOrList {
    fn from(v: Vec<&str>) -> Self {
        StringOrList::List(v.into_iter().map(String::from).collect())
    }
}

/// A single policy statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    /// Statement ID, used in decision diagnostics
    #[serde(default)]
    pub id: String,

    pub effect: Effect,

    /// Action patterns (supports a trailing `*` wildcard)
    pub action: StringOrList,

    /// Resource patterns (supports a trailing `*` wildcard)
    pub resource: StringOrList,

    /// Condition predicate evaluated against the request context.
    /// `None` behaves like the empty predicate and matches any context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Value>,
}

impl Statement {
    /// Create a new unconditional statement
    pub fn new(
        effect: Effect,
        action: impl Into<StringOrList>,
        resource: impl Into<StringOrList>,
    ) -> Self {
        Statement {
            id: String::new(),
            effect,
            action: action.into(),
            resource: resource.into(),
            condition: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_condition(mut self, condition: Value) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Check if this statement's action and resource patterns cover the request
    pub fn applies_to(&self, action: &str, resource: &str) -> bool {
        PatternMatcher::matches(&self.action.patterns(), action)
            && PatternMatcher::matches(&self.resource.patterns(), resource)
    }
}

/// A named grouping of statements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessPolicy {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub statement: Vec<Statement>,
}

impl AccessPolicy {
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        AccessPolicy {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            statement: Vec::new(),
        }
    }

    /// Add a statement to this policy
    pub fn add_statement(&mut self, statement: Statement) {
        self.statement.push(statement);
    }

    /// Parse policy from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize policy to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Several policies evaluated together
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessPolicyCollection(pub Vec<AccessPolicy>);

impl AccessPolicyCollection {
    /// All statements in policy order, then statement order
    pub fn flatten_statements(&self) -> Vec<Statement> {
        self.0
            .iter()
            .flat_map(|policy| policy.statement.iter().cloned())
            .collect()
    }
}

impl From<Vec<AccessPolicy>> for AccessPolicyCollection {
    fn from(policies: Vec<AccessPolicy>) -> Self {
        AccessPolicyCollection(policies)
    }
}

fn empty_context() -> Value {
    Value::Object(serde_json::Map::new())
}

/// An incoming access request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub action: String,
    pub resource: String,
    /// Arbitrary document, typically authentication claims plus request metadata
    #[serde(default = "empty_context")]
    pub context: Value,
}

impl AccessRequest {
    /// Create a request with an empty context document
    pub fn new(action: impl Into<String>, resource: impl Into<String>) -> Self {
        AccessRequest {
            action: action.into(),
            resource: resource.into(),
            context: empty_context(),
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }
}
