//! Policy-based access control for service requests
//!
//! Provides allow/deny decisions with:
//! - JSON/TOML policy documents made of allow/deny statements
//! - Deny precedence and default deny
//! - Exact or trailing-`*` matching for actions and resources
//! - Document-query conditions over the request context
//! - Lock-free evaluation with atomic policy hot-swap

mod condition;
mod engine;
mod normalize;
mod pattern;
mod policy;
mod store;
mod validation;

pub use condition::{
    Condition, ConditionError, ConditionEvaluator, ConditionOperator, ElemMatch, QueryEvaluator,
};
pub use engine::{Decision, MatchedStatement, PolicyEngine};
pub use normalize::{as_sequence, normalize_context, NormalizationError};
pub use pattern::PatternMatcher;
pub use policy::{
    AccessPolicy, AccessPolicyCollection, AccessRequest, Effect, Statement, StringOrList,
};
pub use store::PolicyStore;
pub use validation::{
    validate_policy_mutation, validate_statement_mutation, PolicyMutation, StatementMutation,
    ValidationError,
};
