//! Declarative policy data: policies, rules and condition predicates.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::Severity;

use super::error::PolicyResult;

/// How a policy turns matching rules into an admit/deny decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementMode {
    /// Default-deny: an allow rule must match and no deny rule may match.
    Strict,
    /// Default-allow: only a matching deny rule blocks.
    Permissive,
    /// Never blocks; matching deny rules are recorded only.
    Audit,
}

impl fmt::Display for EnforcementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strict => write!(f, "strict"),
            Self::Permissive => write!(f, "permissive"),
            Self::Audit => write!(f, "audit"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Allow,
    Deny,
}

/// A condition predicate over a resolved job field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// True when the field's text matches any glob pattern.
    Matches(Vec<String>),
    /// True when the field's value is not in the list.
    Not(Vec<Value>),
    /// True when the field, coerced to a number, exceeds the threshold.
    #[serde(alias = "greaterThan")]
    GreaterThan(f64),
}

/// An allow/deny predicate over resource, action and conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    /// `"*"` or `"<resource_type>:<glob>"`.
    #[serde(alias = "resourcePattern")]
    pub resource: String,
    pub actions: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub conditions: BTreeMap<String, Predicate>,
    /// Severity of the event a matching deny emits. Defaults to high.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Rule {
    fn new(id: &str, rule_type: RuleType, resource: &str, actions: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            rule_type,
            resource: resource.to_string(),
            actions: actions.iter().map(|a| (*a).to_string()).collect(),
            conditions: BTreeMap::new(),
            severity: None,
            description: None,
        }
    }

    pub fn allow(id: &str, resource: &str, actions: &[&str]) -> Self {
        Self::new(id, RuleType::Allow, resource, actions)
    }

    pub fn deny(id: &str, resource: &str, actions: &[&str]) -> Self {
        Self::new(id, RuleType::Deny, resource, actions)
    }

    pub fn with_condition(mut self, field: &str, predicate: Predicate) -> Self {
        self.conditions.insert(field.to_string(), predicate);
        self
    }

    /// Shorthand for a `matches` condition.
    pub fn when_matches(self, field: &str, patterns: &[&str]) -> Self {
        let patterns = patterns.iter().map(|p| (*p).to_string()).collect();
        self.with_condition(field, Predicate::Matches(patterns))
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn effective_severity(&self) -> Severity {
        self.severity.unwrap_or(Severity::High)
    }
}

/// A named group of rules plus the enforcement mode applied to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(alias = "enforcementMode")]
    pub enforcement_mode: EnforcementMode,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl Policy {
    pub fn new(name: impl Into<String>, enforcement_mode: EnforcementMode) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            enforcement_mode,
            rules: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Parse a single policy from JSON.
    pub fn from_json(json: &str) -> PolicyResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parse a JSON array of policies.
    pub fn list_from_json(json: &str) -> PolicyResult<Vec<Self>> {
        Ok(serde_json::from_str(json)?)
    }
}
