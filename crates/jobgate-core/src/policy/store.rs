//! The policy registry.
//!
//! Readers take an `Arc` to an immutable [`PolicySnapshot`] and evaluate it
//! without holding any lock; writers compile the change up front, then swap in
//! a new snapshot. An evaluation therefore always sees either all or none of a
//! concurrent update.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use super::builtin;
use super::error::PolicyResult;
use super::evaluator::CompiledPolicy;
use super::model::Policy;

/// An immutable, ordered set of compiled policies.
#[derive(Debug, Default)]
pub struct PolicySnapshot {
    policies: Vec<Arc<CompiledPolicy>>,
}

impl PolicySnapshot {
    pub fn iter(&self) -> impl Iterator<Item = &CompiledPolicy> {
        self.policies.iter().map(Arc::as_ref)
    }

    pub fn get(&self, name: &str) -> Option<&CompiledPolicy> {
        self.iter().find(|p| p.name() == name)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    fn with_upserted(&self, incoming: Vec<CompiledPolicy>) -> Self {
        let mut policies = self.policies.clone();
        for policy in incoming {
            let policy = Arc::new(policy);
            match policies.iter().position(|p| p.name() == policy.name()) {
                Some(idx) => policies[idx] = policy,
                None => policies.push(policy),
            }
        }
        Self { policies }
    }
}

/// Shared handle to the policy registry. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct PolicyStore {
    current: Arc<RwLock<Arc<PolicySnapshot>>>,
}

impl PolicyStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store preloaded with the built-in baseline policies.
    pub fn with_builtin() -> PolicyResult<Self> {
        let store = Self::new();
        store.register_all(builtin::all())?;
        Ok(store)
    }

    /// The current snapshot. Later registrations do not affect it.
    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Add a policy, replacing any existing policy with the same name in
    /// place.
    pub fn register(&self, policy: Policy) -> PolicyResult<()> {
        self.register_all(std::iter::once(policy))
    }

    /// Add several policies. Nothing is registered if any of them is
    /// malformed.
    pub fn register_all(&self, policies: impl IntoIterator<Item = Policy>) -> PolicyResult<()> {
        let compiled = policies
            .into_iter()
            .map(CompiledPolicy::compile)
            .collect::<PolicyResult<Vec<_>>>()?;
        let names: Vec<String> = compiled.iter().map(|p| p.name().to_string()).collect();

        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let next = current.with_upserted(compiled);
        *current = Arc::new(next);
        drop(current);

        for name in names {
            info!(event = "policy.registered", policy = %name, "policy registered");
        }
        Ok(())
    }

    /// Remove a policy by name, returning it if present.
    pub fn remove(&self, name: &str) -> Option<Policy> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let idx = current.policies.iter().position(|p| p.name() == name)?;
        let mut policies = current.policies.clone();
        let removed = policies.remove(idx);
        *current = Arc::new(PolicySnapshot { policies });
        drop(current);

        info!(event = "policy.removed", policy = %name, "policy removed");
        Some(removed.policy().clone())
    }

    pub fn get(&self, name: &str) -> Option<Policy> {
        self.snapshot().get(name).map(|p| p.policy().clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.snapshot().iter().map(|p| p.name().to_string()).collect()
    }

    pub fn list(&self) -> Vec<Policy> {
        self.snapshot().iter().map(|p| p.policy().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
