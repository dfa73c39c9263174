//! Named policy groupings published to a [`PolicyEngine`]
//!
//! Writers serialize on a mutex; every change flattens all groupings and
//! publishes the result with one atomic swap. Readers go through the engine
//! and never touch the mutex.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use super::{
    AccessPolicy, AccessPolicyCollection, ConditionEvaluator, PolicyEngine, PolicyMutation,
    ValidationError,
};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::loader;

#[derive(Debug, Default)]
struct StoreState {
    policies: AccessPolicyCollection,
    generation: u64,
}

/// Owner of the active policy groupings
#[derive(Debug)]
pub struct PolicyStore {
    engine: Arc<PolicyEngine>,
    state: Mutex<StoreState>,
}

impl PolicyStore {
    /// Empty store with the built-in condition evaluator
    pub fn new() -> Self {
        Self::with_engine(PolicyEngine::default())
    }

    pub fn with_evaluator(conditions: Arc<dyn ConditionEvaluator>) -> Self {
        Self::with_engine(PolicyEngine::with_evaluator(Vec::new(), conditions))
    }

    fn with_engine(engine: PolicyEngine) -> Self {
        PolicyStore {
            engine: Arc::new(engine),
            state: Mutex::new(StoreState::default()),
        }
    }

    /// Build a store from the policy files listed in `config`
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let store = Self::new();
        store.reload(config)?;
        Ok(store)
    }

    /// Re-read every configured policy file and swap them in.
    ///
    /// Nothing is published unless all files load.
    pub fn reload(&self, config: &EngineConfig) -> Result<u64> {
        let mut policies = Vec::new();
        for path in &config.engine.policies {
            policies.extend(loader::load_policies(path, config.engine.validate_on_load)?);
        }
        Ok(self.replace_all(policies))
    }

    /// Engine to evaluate requests against; shares this store's snapshots
    pub fn engine(&self) -> Arc<PolicyEngine> {
        Arc::clone(&self.engine)
    }

    /// Insert a policy, replacing any existing policy with the same id.
    /// Returns the new generation.
    pub fn upsert(&self, policy: AccessPolicy) -> u64 {
        let mut state = self.state.lock();
        match state.policies.0.iter().position(|p| p.id == policy.id) {
            Some(index) => state.policies.0[index] = policy,
            None => state.policies.0.push(policy),
        }
        self.publish(&mut state)
    }

    /// Validate a create document and insert it under `id`
    pub fn create(
        &self,
        id: impl Into<String>,
        mutation: PolicyMutation,
    ) -> std::result::Result<u64, ValidationError> {
        let policy = mutation.into_policy(id)?;
        Ok(self.upsert(policy))
    }

    /// Remove a policy by id
    pub fn remove(&self, id: &str) -> Option<AccessPolicy> {
        let mut state = self.state.lock();
        let index = state.policies.0.iter().position(|p| p.id == id)?;
        let removed = state.policies.0.remove(index);
        self.publish(&mut state);
        Some(removed)
    }

    /// Replace every policy at once
    pub fn replace_all(&self, policies: Vec<AccessPolicy>) -> u64 {
        let mut state = self.state.lock();
        state.policies = AccessPolicyCollection::from(policies);
        self.publish(&mut state)
    }

    pub fn policies(&self) -> Vec<AccessPolicy> {
        self.state.lock().policies.0.clone()
    }

    /// Number of publishes so far
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    fn publish(&self, state: &mut StoreState) -> u64 {
        let statements = state.policies.flatten_statements();
        let count = statements.len();

        self.engine.set_policy(statements);
        state.generation += 1;

        info!(
            generation = state.generation,
            policies = state.policies.0.len(),
            statements = count,
            "Published policy snapshot"
        );
        state.generation
    }
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new()
    }
}
