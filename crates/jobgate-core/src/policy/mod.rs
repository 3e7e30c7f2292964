//! Declarative security policies.
//!
//! - [`model`]: `Policy`, `Rule`, `Predicate`, `EnforcementMode`
//! - [`pattern`]: anchored glob compiler shared by resources and conditions
//! - [`matcher`]: per-rule resource/action/condition matching
//! - [`evaluator`]: per-policy decisions and the conjunctive aggregate
//! - [`store`]: copy-on-write policy registry
//! - [`builtin`]: baseline policies

pub mod builtin;
pub mod error;
pub mod evaluator;
pub mod matcher;
pub mod model;
pub mod pattern;
pub mod store;

pub use error::{PolicyError, PolicyResult};
pub use evaluator::{
    evaluate_policy, evaluate_snapshot, CompiledPolicy, PolicyDecision, PolicyEvaluator,
    Validation,
};
pub use matcher::{rule_matches, CompiledRule, ResourcePattern};
pub use model::{EnforcementMode, Policy, Predicate, Rule, RuleType};
pub use pattern::{Pattern, MAX_PATTERN_LEN};
pub use store::{PolicySnapshot, PolicyStore};
