//! Security events and the append-only log that records them.
//!
//! Policy evaluation produces [`Violation`]s, which carry no timestamp so that
//! decisions stay deterministic. The [`SecurityEventLog`] stamps them with a
//! sequence number and UTC time on append, turning them into
//! [`SecurityEvent`]s.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::JobId;

/// Severity of a security event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    PolicyViolation,
    ExecutionTimeout,
    ExecutionFailure,
    SandboxUnavailable,
}

impl fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PolicyViolation => write!(f, "policy_violation"),
            Self::ExecutionTimeout => write!(f, "execution_timeout"),
            Self::ExecutionFailure => write!(f, "execution_failure"),
            Self::SandboxUnavailable => write!(f, "sandbox_unavailable"),
        }
    }
}

/// What the engine did about the observed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    Blocked,
    /// Recorded only; audit-mode policies never block.
    Logged,
    Terminated,
    Failed,
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocked => write!(f, "blocked"),
            Self::Logged => write!(f, "logged"),
            Self::Terminated => write!(f, "terminated"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// An observation produced by evaluation or execution, not yet stamped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Violation {
    pub event_type: SecurityEventType,
    pub severity: Severity,
    pub details: String,
    pub action: EventAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
}

impl Violation {
    pub fn new(
        event_type: SecurityEventType,
        severity: Severity,
        action: EventAction,
        details: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            severity,
            details: details.into(),
            action,
            policy: None,
            rule_id: None,
        }
    }

    pub fn with_policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = Some(policy.into());
        self
    }

    pub fn with_rule(mut self, rule_id: impl Into<String>) -> Self {
        self.rule_id = Some(rule_id.into());
        self
    }

    /// Whether this observation stopped (or would stop) the job.
    pub fn is_blocking(&self) -> bool {
        matches!(self.action, EventAction::Blocked)
    }
}

/// A recorded security event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// Position in the log's append order.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: SecurityEventType,
    pub severity: Severity,
    pub details: String,
    pub action: EventAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
}

impl SecurityEvent {
    /// Strip the stamp, leaving the underlying observation.
    pub fn violation(&self) -> Violation {
        Violation {
            event_type: self.event_type,
            severity: self.severity,
            details: self.details.clone(),
            action: self.action,
            policy: self.policy.clone(),
            rule_id: self.rule_id.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct LogInner {
    events: VecDeque<SecurityEvent>,
    next_sequence: u64,
}

/// Shared, append-only security event log.
///
/// Cloning yields another handle to the same log. A single mutex serializes
/// writers, so each append (including a batch) lands contiguously and in
/// order. With a capacity set, the oldest events are evicted first.
#[derive(Debug, Clone, Default)]
pub struct SecurityEventLog {
    inner: Arc<Mutex<LogInner>>,
    capacity: Option<usize>,
}

impl SecurityEventLog {
    /// Unbounded log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Log retaining at most `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LogInner::default())),
            capacity: Some(capacity.max(1)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogInner> {
        // Appends never leave the deque half-written, so a poisoned lock is
        // still consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append one observation, returning the stamped event.
    pub fn record(&self, violation: Violation, job_id: Option<&JobId>) -> SecurityEvent {
        let mut batch = self.record_all(std::slice::from_ref(&violation), job_id);
        batch.remove(0)
    }

    /// Append a batch atomically; no other writer interleaves with it.
    pub fn record_all(&self, violations: &[Violation], job_id: Option<&JobId>) -> Vec<SecurityEvent> {
        let now = Utc::now();
        let mut inner = self.lock();
        let mut stamped = Vec::with_capacity(violations.len());

        for v in violations {
            let event = SecurityEvent {
                sequence: inner.next_sequence,
                timestamp: now,
                event_type: v.event_type,
                severity: v.severity,
                details: v.details.clone(),
                action: v.action,
                policy: v.policy.clone(),
                rule_id: v.rule_id.clone(),
                job_id: job_id.cloned(),
            };
            inner.next_sequence += 1;
            inner.events.push_back(event.clone());
            stamped.push(event);
        }

        if let Some(cap) = self.capacity {
            while inner.events.len() > cap {
                inner.events.pop_front();
            }
        }

        stamped
    }

    /// Most-recent-first when `limit` is given; full chronological history
    /// otherwise.
    pub fn query(&self, limit: Option<usize>) -> Vec<SecurityEvent> {
        let inner = self.lock();
        match limit {
            Some(n) => inner.events.iter().rev().take(n).cloned().collect(),
            None => inner.events.iter().cloned().collect(),
        }
    }

    /// Administrative reset. Sequence numbers keep increasing afterwards.
    pub fn clear(&self) {
        self.lock().events.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
