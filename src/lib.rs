//! # pbac - Policy-Based Access Control
//!
//! `pbac` decides whether an access request is allowed by a set of
//! allow/deny statements:
//!
//! - **Deny overrides allow**, and a request no statement matches is denied
//! - **Action and resource patterns** with exact or trailing-`*` matching
//! - **Conditions** as document queries over the request context
//!   (authentication claims, HTTP metadata, ...)
//! - **Hot-swappable policies**: evaluation is lock-free and always sees one
//!   complete policy generation
//! - **Fail-closed**: malformed input never grants access
//!
//! ## Quick Start
//!
//! ```rust
//! use pbac::{AccessRequest, PolicyEngine, Statement};
//! use serde_json::json;
//!
//! let statements: Vec<Statement> = serde_json::from_value(json!([
//!     {
//!         "effect": "allow",
//!         "action": "*",
//!         "resource": "/api/service/*",
//!         "condition": { "claims.roles": { "$all": ["root"] } }
//!     },
//!     {
//!         "effect": "deny",
//!         "action": "*",
//!         "resource": "*",
//!         "condition": { "claims.roles": { "$all": ["disabled"] } }
//!     }
//! ]))
//! .unwrap();
//!
//! let engine = PolicyEngine::new(statements);
//!
//! let request = AccessRequest::new("read", "/api/service/foo")
//!     .with_context(json!({ "claims": { "roles": ["user", "root"] } }));
//! assert!(engine.evaluate(&request));
//!
//! let disabled = AccessRequest::new("read", "/api/service/foo")
//!     .with_context(json!({ "claims": { "roles": ["root", "disabled"] } }));
//! assert!(!engine.evaluate(&disabled));
//! ```
//!
//! ## Managed Policies
//!
//! ```rust,no_run
//! use pbac::{AccessRequest, EngineConfig, PolicyStore, Result};
//!
//! # fn main() -> Result<()> {
//! let config = EngineConfig::from_file("/etc/pbac/engine.toml")?;
//! let store = PolicyStore::from_config(&config)?;
//! let engine = store.engine();
//!
//! let allowed = engine.evaluate(&AccessRequest::new("read", "/api/service/foo"));
//!
//! // Later: pick up edited policy files without interrupting evaluations
//! store.reload(&config)?;
//! # let _ = allowed;
//! # Ok(())
//! # }
//! ```

pub mod access;
pub mod config;
pub mod error;
pub mod loader;

pub use crate::access::{
    validate_policy_mutation, validate_statement_mutation, AccessPolicy, AccessPolicyCollection,
    AccessRequest, ConditionEvaluator, Decision, Effect, PolicyEngine, PolicyMutation,
    PolicyStore, QueryEvaluator, Statement, StatementMutation, StringOrList, ValidationError,
};
pub use crate::config::EngineConfig;
pub use crate::error::{PbacError, Result};
