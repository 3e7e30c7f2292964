//! Policy evaluation: per-policy decisions and their conjunctive aggregate.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::events::{
    EventAction, SecurityEvent, SecurityEventLog, SecurityEventType, Severity, Violation,
};
use crate::job::JobDescriptor;

use super::error::{PolicyError, PolicyResult};
use super::matcher::CompiledRule;
use super::model::{EnforcementMode, Policy, RuleType};
use super::store::{PolicySnapshot, PolicyStore};

/// A validated policy with every rule compiled.
#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    policy: Policy,
    rules: Vec<CompiledRule>,
}

impl CompiledPolicy {
    pub fn compile(policy: Policy) -> PolicyResult<Self> {
        if policy.name.trim().is_empty() {
            return Err(PolicyError::EmptyPolicyName);
        }

        let mut rules = Vec::with_capacity(policy.rules.len());
        for rule in &policy.rules {
            if rules
                .iter()
                .any(|r: &CompiledRule| r.rule().id == rule.id)
            {
                return Err(PolicyError::DuplicateRuleId {
                    policy: policy.name.clone(),
                    rule_id: rule.id.clone(),
                });
            }
            rules.push(CompiledRule::compile(&policy.name, rule)?);
        }

        Ok(Self { policy, rules })
    }

    pub fn name(&self) -> &str {
        &self.policy.name
    }

    pub fn mode(&self) -> EnforcementMode {
        self.policy.enforcement_mode
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }
}

/// One policy's verdict on one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub policy: String,
    pub mode: EnforcementMode,
    pub admitted: bool,
    pub violations: Vec<Violation>,
}

/// Evaluate every rule of `policy` against `job`.
pub fn evaluate_policy(policy: &CompiledPolicy, job: &JobDescriptor) -> PolicyDecision {
    let mode = policy.mode();
    let mut has_allow = false;
    let mut has_deny = false;
    let mut violations = Vec::new();

    for compiled in policy.rules() {
        if !compiled.matches(job) {
            continue;
        }
        let rule = compiled.rule();
        match rule.rule_type {
            RuleType::Allow => has_allow = true,
            RuleType::Deny => {
                has_deny = true;
                let action = match mode {
                    EnforcementMode::Audit => EventAction::Logged,
                    EnforcementMode::Strict | EnforcementMode::Permissive => EventAction::Blocked,
                };
                let reason = rule.description.as_deref().unwrap_or(&rule.resource);
                violations.push(
                    Violation::new(
                        SecurityEventType::PolicyViolation,
                        rule.effective_severity(),
                        action,
                        format!(
                            "rule '{}' of policy '{}' denies {} job: {}",
                            rule.id,
                            policy.name(),
                            job.kind(),
                            reason
                        ),
                    )
                    .with_policy(policy.name())
                    .with_rule(rule.id.clone()),
                );
            }
        }
    }

    let admitted = match mode {
        EnforcementMode::Strict => has_allow && !has_deny,
        EnforcementMode::Permissive => !has_deny,
        EnforcementMode::Audit => true,
    };

    if mode == EnforcementMode::Strict && !has_allow {
        violations.push(
            Violation::new(
                SecurityEventType::PolicyViolation,
                Severity::Medium,
                EventAction::Blocked,
                format!(
                    "no rule of strict policy '{}' allows {} job",
                    policy.name(),
                    job.kind()
                ),
            )
            .with_policy(policy.name()),
        );
    }

    PolicyDecision {
        policy: policy.name().to_string(),
        mode,
        admitted,
        violations,
    }
}

/// The aggregate verdict across every policy in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    pub allowed: bool,
    pub violations: Vec<Violation>,
    /// Policies that refused the job, in store order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub denied_by: Vec<String>,
}

impl Validation {
    /// The first violation of the highest severity present.
    pub fn most_severe(&self) -> Option<&Violation> {
        self.violations.iter().fold(None, |best: Option<&Violation>, v| match best {
            Some(b) if b.severity >= v.severity => Some(b),
            _ => Some(v),
        })
    }

    /// Human-readable reason for a rejection.
    pub fn summary(&self) -> String {
        match self.most_severe() {
            Some(v) => format!("rejected by policy: {}", v.details),
            None if self.allowed => "admitted".to_string(),
            None => "rejected by policy".to_string(),
        }
    }

    /// Hex SHA-256 of the canonical JSON encoding of this decision.
    ///
    /// Equal for equal decisions; violations carry no timestamps.
    pub fn digest(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }
}

/// Evaluate `job` against every policy in `snapshot`. Pure: records nothing.
pub fn evaluate_snapshot(snapshot: &PolicySnapshot, job: &JobDescriptor) -> Validation {
    let mut allowed = true;
    let mut violations = Vec::new();
    let mut denied_by = Vec::new();

    // No rule can vouch for a path that cannot be resolved.
    if let Some(Err(escape)) = job.effective_path() {
        allowed = false;
        violations.push(Violation::new(
            SecurityEventType::PolicyViolation,
            Severity::High,
            EventAction::Blocked,
            format!("{} job refused: {escape}", job.kind()),
        ));
    }

    for policy in snapshot.iter() {
        let decision = evaluate_policy(policy, job);
        debug!(
            policy = %decision.policy,
            mode = %decision.mode,
            admitted = decision.admitted,
            violations = decision.violations.len(),
            "policy evaluated"
        );
        if !decision.admitted {
            allowed = false;
            denied_by.push(decision.policy);
        }
        violations.extend(decision.violations);
    }

    Validation {
        allowed,
        violations,
        denied_by,
    }
}

/// Evaluates jobs against the current policy snapshot and records the
/// resulting violations.
#[derive(Debug, Clone, Default)]
pub struct PolicyEvaluator {
    store: PolicyStore,
    events: SecurityEventLog,
}

impl PolicyEvaluator {
    pub fn new(store: PolicyStore, events: SecurityEventLog) -> Self {
        Self { store, events }
    }

    pub fn store(&self) -> &PolicyStore {
        &self.store
    }

    pub fn events(&self) -> &SecurityEventLog {
        &self.events
    }

    /// Evaluate without touching the event log.
    pub fn evaluate(&self, job: &JobDescriptor) -> Validation {
        evaluate_snapshot(&self.store.snapshot(), job)
    }

    /// Evaluate and append every violation to the event log.
    pub fn validate_job(&self, job: &JobDescriptor) -> Validation {
        self.validate_and_record(job).0
    }

    /// Like [`validate_job`](Self::validate_job), also returning the events
    /// as stamped by the log.
    pub fn validate_and_record(&self, job: &JobDescriptor) -> (Validation, Vec<SecurityEvent>) {
        let validation = self.evaluate(job);
        let recorded = if validation.violations.is_empty() {
            Vec::new()
        } else {
            self.events.record_all(&validation.violations, Some(&job.id))
        };
        crate::obs::emit_job_validated(&job.id, &validation);
        (validation, recorded)
    }
}
