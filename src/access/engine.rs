//! Policy evaluation engine with deny precedence
//!
//! Evaluates access requests against the active statement set.
//! Key features:
//! - Deny statements are checked first and always win
//! - No matching statement is a deny
//! - Policy replacement is a single atomic swap; reads take no lock
//! - Conditions are compiled once, when a policy is installed
//! - Every internal failure degrades to deny, including a malformed
//!   condition on any statement the request reaches

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde_json::Value;
use tracing::{debug, warn};

use super::normalize::normalize_context;
use super::{
    AccessRequest, Condition, ConditionError, ConditionEvaluator, Effect, QueryEvaluator,
    Statement,
};

/// Statement that decided an evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedStatement {
    /// Position in the active statement list
    pub index: usize,
    pub id: String,
    pub effect: Effect,
}

/// Outcome of [`PolicyEngine::explain`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// `None` when nothing matched, or evaluation was aborted, and the
    /// request fell through to default deny
    pub matched: Option<MatchedStatement>,
}

impl Decision {
    fn default_deny() -> Self {
        Decision {
            allowed: false,
            matched: None,
        }
    }
}

/// Condition of one installed statement, ready for evaluation
enum PreparedCondition {
    /// No condition; matches any context
    Always,
    Compiled(Condition),
    /// Rejected at install time
    Invalid(ConditionError),
    /// Evaluator has no compiled form; evaluated per request
    Deferred,
}

/// One installed policy generation
struct PolicySnapshot {
    statements: Arc<Vec<Statement>>,
    conditions: Vec<PreparedCondition>,
}

impl PolicySnapshot {
    fn prepare(statements: Arc<Vec<Statement>>, evaluator: &dyn ConditionEvaluator) -> Self {
        let conditions = statements
            .iter()
            .map(|statement| {
                let Some(predicate) = &statement.condition else {
                    return PreparedCondition::Always;
                };
                match evaluator.compile(predicate) {
                    None => PreparedCondition::Deferred,
                    Some(Ok(condition)) => PreparedCondition::Compiled(condition),
                    Some(Err(err)) => {
                        warn!(
                            statement = %statement.id,
                            error = %err,
                            "Condition failed to compile; requests reaching this statement are denied"
                        );
                        PreparedCondition::Invalid(err)
                    }
                }
            })
            .collect();

        PolicySnapshot {
            statements,
            conditions,
        }
    }
}

/// Result of scanning the statements of one effect
enum Scan {
    Matched(MatchedStatement),
    NoMatch,
    /// A reached statement's condition could not be evaluated
    Aborted,
}

/// Policy evaluation engine
pub struct PolicyEngine {
    policy: ArcSwap<PolicySnapshot>,
    conditions: Arc<dyn ConditionEvaluator>,
}

impl PolicyEngine {
    /// Create an engine over `statements` using the built-in query evaluator
    pub fn new(statements: Vec<Statement>) -> Self {
        Self::with_evaluator(statements, Arc::new(QueryEvaluator))
    }

    /// Create an engine with a custom condition evaluator
    pub fn with_evaluator(
        statements: Vec<Statement>,
        conditions: Arc<dyn ConditionEvaluator>,
    ) -> Self {
        let snapshot = PolicySnapshot::prepare(Arc::new(statements), conditions.as_ref());
        PolicyEngine {
            policy: ArcSwap::from_pointee(snapshot),
            conditions,
        }
    }

    /// Replace the active statements.
    ///
    /// Conditions are compiled before the swap. Evaluations already running
    /// keep the snapshot they loaded; later ones see the new statements in
    /// full.
    pub fn set_policy(&self, statements: impl Into<Arc<Vec<Statement>>>) {
        let snapshot = PolicySnapshot::prepare(statements.into(), self.conditions.as_ref());
        self.policy.store(Arc::new(snapshot));
    }

    /// Current statement snapshot
    pub fn policy(&self) -> Arc<Vec<Statement>> {
        Arc::clone(&self.policy.load().statements)
    }

    /// Evaluate if the request is allowed by the active policy
    ///
    /// # Examples
    ///
    /// ```
    /// use pbac::access::{AccessRequest, Effect, PolicyEngine, Statement};
    ///
    /// let engine = PolicyEngine::new(vec![
    ///     Statement::new(Effect::Allow, "read", "/public/*"),
    ///     Statement::new(Effect::Deny, "*", "/public/secret"),
    /// ]);
    ///
    /// assert!(engine.evaluate(&AccessRequest::new("read", "/public/file.txt")));
    /// assert!(!engine.evaluate(&AccessRequest::new("read", "/public/secret")));
    /// assert!(!engine.evaluate(&AccessRequest::new("write", "/public/file.txt")));
    /// ```
    pub fn evaluate(&self, request: &AccessRequest) -> bool {
        self.explain(request).allowed
    }

    /// Evaluate and report which statement decided the outcome
    pub fn explain(&self, request: &AccessRequest) -> Decision {
        // One snapshot for both scans, so a concurrent swap cannot mix generations.
        let snapshot = self.policy.load();

        let documents = match normalize_context(&request.context) {
            Ok(docs) => docs,
            Err(err) => {
                warn!(
                    action = %request.action,
                    resource = %request.resource,
                    error = %err,
                    "Request context rejected, denying"
                );
                return Decision::default_deny();
            }
        };

        let decision = match self.select(&snapshot, Effect::Deny, request, &documents) {
            Scan::Matched(m) => Decision {
                allowed: false,
                matched: Some(m),
            },
            Scan::Aborted => Decision::default_deny(),
            Scan::NoMatch => match self.select(&snapshot, Effect::Allow, request, &documents) {
                Scan::Matched(m) => Decision {
                    allowed: true,
                    matched: Some(m),
                },
                Scan::NoMatch | Scan::Aborted => Decision::default_deny(),
            },
        };

        debug!(
            action = %request.action,
            resource = %request.resource,
            allowed = decision.allowed,
            statement = decision.matched.as_ref().map(|m| m.id.as_str()).unwrap_or("<default>"),
            "Access evaluated"
        );

        decision
    }

    /// Whether at least one statement with `effect` matches the request.
    /// An aborted scan counts as no match.
    pub fn matches_effect(&self, effect: Effect, request: &AccessRequest) -> bool {
        let snapshot = self.policy.load();
        match normalize_context(&request.context) {
            Ok(documents) => matches!(
                self.select(&snapshot, effect, request, &documents),
                Scan::Matched(_)
            ),
            Err(_) => false,
        }
    }

    /// First statement with `effect` matching on action, resource and
    /// condition. Stops at the first condition that cannot be evaluated.
    fn select(
        &self,
        snapshot: &PolicySnapshot,
        effect: Effect,
        request: &AccessRequest,
        documents: &[&Value],
    ) -> Scan {
        let candidates = snapshot
            .statements
            .iter()
            .zip(&snapshot.conditions)
            .enumerate()
            .filter(|(_, (statement, _))| {
                statement.effect == effect
                    && statement.applies_to(&request.action, &request.resource)
            });

        for (index, (statement, condition)) in candidates {
            match self.condition_holds(statement, condition, documents) {
                Some(true) => {
                    return Scan::Matched(MatchedStatement {
                        index,
                        id: statement.id.clone(),
                        effect,
                    })
                }
                Some(false) => {}
                None => return Scan::Aborted,
            }
        }

        Scan::NoMatch
    }

    /// `None` when the condition cannot be evaluated
    fn condition_holds(
        &self,
        statement: &Statement,
        condition: &PreparedCondition,
        documents: &[&Value],
    ) -> Option<bool> {
        let err = match condition {
            PreparedCondition::Always => return Some(true),
            PreparedCondition::Compiled(compiled) => {
                return Some(documents.iter().any(|doc| compiled.matches(doc)))
            }
            PreparedCondition::Invalid(err) => err.to_string(),
            PreparedCondition::Deferred => {
                let Some(predicate) = &statement.condition else {
                    return Some(true);
                };
                match self.conditions.matches(predicate, documents) {
                    Ok(matched) => return Some(matched),
                    Err(err) => err.to_string(),
                }
            }
        };

        warn!(statement = %statement.id, error = %err, "Malformed condition, denying request");
        None
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl std::fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("statements", &self.policy.load().statements.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{Condition, ConditionError};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn req(action: &str, resource: &str) -> AccessRequest {
        AccessRequest::new(action, resource)
    }

    #[test]
    fn test_simple_allow() {
        let engine = PolicyEngine::new(vec![Statement::new(Effect::Allow, "read", "/public/*")]);

        assert!(engine.evaluate(&req("read", "/public/file.txt")));
        assert!(!engine.evaluate(&req("write", "/public/file.txt")));
        assert!(!engine.evaluate(&req("read", "/private/file.txt")));
    }

    #[test]
    fn test_deny_precedence() {
        let engine = PolicyEngine::new(vec![
            Statement::new(Effect::Allow, "read", "/*").with_id("allow-all"),
            Statement::new(Effect::Deny, "read", "/secret/*").with_id("deny-secret"),
        ]);

        assert!(engine.evaluate(&req("read", "/public/file.txt")));
        assert!(!engine.evaluate(&req("read", "/secret/password.txt")));

        let decision = engine.explain(&req("read", "/secret/password.txt"));
        assert_eq!(
            decision.matched,
            Some(MatchedStatement {
                index: 1,
                id: "deny-secret".to_string(),
                effect: Effect::Deny,
            })
        );
    }

    #[test]
    fn test_empty_policy_denies() {
        let engine = PolicyEngine::default();
        let decision = engine.explain(&req("read", "/any"));

        assert!(!decision.allowed);
        assert!(decision.matched.is_none());
    }

    #[test]
    fn test_empty_action_never_matches_wildcard() {
        let engine = PolicyEngine::new(vec![Statement::new(Effect::Allow, "*", "*")]);

        assert!(engine.evaluate(&req("read", "/x")));
        assert!(!engine.evaluate(&req("", "/x")));
        assert!(!engine.evaluate(&req("read", "")));
    }

    #[test]
    fn test_null_context_fails_closed() {
        let engine = PolicyEngine::new(vec![Statement::new(Effect::Allow, "*", "*")]);
        let request = req("read", "/x").with_context(Value::Null);

        assert!(!engine.evaluate(&request));
        assert!(!engine.matches_effect(Effect::Allow, &request));
    }

    #[test]
    fn test_multi_document_context_fails_closed() {
        let engine = PolicyEngine::new(vec![Statement::new(Effect::Allow, "*", "*")]);
        let request = req("read", "/x").with_context(json!([{}, {}]));

        assert!(!engine.evaluate(&request));
    }

    #[test]
    fn test_malformed_deny_condition_denies() {
        let engine = PolicyEngine::new(vec![
            Statement::new(Effect::Allow, "*", "*").with_id("allow-all"),
            Statement::new(Effect::Deny, "*", "*")
                .with_id("disabled")
                .with_condition(json!({ "claims.roles": { "$al": ["disabled"] } })),
        ]);
        let request =
            req("read", "/x").with_context(json!({ "claims": { "roles": ["disabled"] } }));

        let decision = engine.explain(&request);
        assert!(!decision.allowed);
        assert!(decision.matched.is_none());
        assert!(!engine.matches_effect(Effect::Deny, &request));
    }

    #[test]
    fn test_malformed_allow_condition_aborts_scan() {
        let engine = PolicyEngine::new(vec![
            Statement::new(Effect::Allow, "*", "*")
                .with_id("broken")
                .with_condition(json!({ "roles": { "$bogus": 1 } })),
            Statement::new(Effect::Allow, "read", "*").with_id("fallback"),
        ]);

        let decision = engine.explain(&req("read", "/x"));
        assert!(!decision.allowed);
        assert!(decision.matched.is_none());
    }

    #[test]
    fn test_malformed_condition_on_unreached_statement() {
        let engine = PolicyEngine::new(vec![
            Statement::new(Effect::Deny, "*", "/locked/*").with_condition(json!("not a document")),
            Statement::new(Effect::Allow, "*", "*").with_id("allow-all"),
        ]);

        assert!(engine.evaluate(&req("read", "/open")));
        assert!(!engine.evaluate(&req("read", "/locked/file")));
    }

    #[test]
    fn test_conditions_compiled_once_per_install() {
        struct Compiling {
            compiled: AtomicUsize,
            filtered: AtomicUsize,
        }

        impl ConditionEvaluator for Compiling {
            fn filter<'d>(
                &self,
                _predicate: &Value,
                documents: &[&'d Value],
            ) -> Result<Vec<&'d Value>, ConditionError> {
                self.filtered.fetch_add(1, Ordering::SeqCst);
                Ok(documents.to_vec())
            }

            fn compile(&self, predicate: &Value) -> Option<Result<Condition, ConditionError>> {
                self.compiled.fetch_add(1, Ordering::SeqCst);
                Some(Condition::compile(predicate))
            }
        }

        let evaluator = Arc::new(Compiling {
            compiled: AtomicUsize::new(0),
            filtered: AtomicUsize::new(0),
        });
        let engine = PolicyEngine::with_evaluator(
            vec![
                Statement::new(Effect::Deny, "*", "*")
                    .with_condition(json!({ "email": { "$regex": "@blocked\\.example$" } })),
                Statement::new(Effect::Allow, "*", "*").with_condition(json!({ "active": true })),
            ],
            evaluator.clone(),
        );

        let request = req("read", "/x").with_context(json!({ "email": "a@ok.example", "active": true }));
        for _ in 0..10 {
            assert!(engine.evaluate(&request));
        }
        assert_eq!(evaluator.compiled.load(Ordering::SeqCst), 2);
        assert_eq!(evaluator.filtered.load(Ordering::SeqCst), 0);

        engine.set_policy(vec![Statement::new(Effect::Allow, "*", "*")
            .with_condition(json!({ "active": false }))]);
        assert!(!engine.evaluate(&request));
        assert_eq!(evaluator.compiled.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_set_policy_replaces_statements() {
        let engine = PolicyEngine::new(vec![Statement::new(Effect::Allow, "read", "*")]);
        assert!(engine.evaluate(&req("read", "/x")));

        engine.set_policy(vec![Statement::new(Effect::Deny, "read", "*")]);
        assert!(!engine.evaluate(&req("read", "/x")));
        assert_eq!(engine.policy().len(), 1);

        engine.set_policy(Vec::new());
        assert!(engine.policy().is_empty());
    }

    #[test]
    fn test_matches_effect() {
        let engine = PolicyEngine::new(vec![
            Statement::new(Effect::Allow, "read", "*"),
            Statement::new(Effect::Deny, "delete", "*"),
        ]);

        assert!(engine.matches_effect(Effect::Allow, &req("read", "/x")));
        assert!(!engine.matches_effect(Effect::Deny, &req("read", "/x")));
        assert!(engine.matches_effect(Effect::Deny, &req("delete", "/x")));
    }

    #[test]
    fn test_first_matching_statement_short_circuits() {
        struct Counting(AtomicUsize);

        impl ConditionEvaluator for Counting {
            fn filter<'d>(
                &self,
                _predicate: &Value,
                documents: &[&'d Value],
            ) -> Result<Vec<&'d Value>, ConditionError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(documents.to_vec())
            }
        }

        let counter = Arc::new(Counting(AtomicUsize::new(0)));
        let engine = PolicyEngine::with_evaluator(
            vec![
                Statement::new(Effect::Allow, "*", "*").with_condition(json!({})),
                Statement::new(Effect::Allow, "*", "*").with_condition(json!({})),
            ],
            counter.clone(),
        );

        assert!(engine.evaluate(&req("read", "/x")));
        // no deny statements, one allow condition evaluated
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_repeated_evaluation_is_stable() {
        let engine = PolicyEngine::new(vec![Statement::new(Effect::Allow, "read", "/a/*")]);
        let request = req("read", "/a/b");

        let first = engine.explain(&request);
        for _ in 0..10 {
            assert_eq!(engine.explain(&request), first);
        }
    }
}
