//! Decides whether a single rule applies to a job.

use serde_json::Value;

use crate::job::{JobDescriptor, ResourceType};

use super::error::{PolicyError, PolicyResult};
use super::model::{Predicate, Rule};
use super::pattern::Pattern;

/// The parsed form of a rule's `resource` string.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourcePattern {
    /// `"*"`: every job.
    Any,
    Typed {
        resource_type: ResourceType,
        subject: Pattern,
    },
}

impl ResourcePattern {
    /// Parse `"*"` or `"<type>:<glob>"`.
    pub fn parse(resource: &str) -> Result<Self, String> {
        if resource == "*" {
            return Ok(Self::Any);
        }
        let (ty, glob) = resource
            .split_once(':')
            .ok_or_else(|| "expected '*' or '<type>:<pattern>'".to_string())?;
        let resource_type: ResourceType = ty.parse()?;
        let subject = Pattern::compile(glob).map_err(|e| e.to_string())?;
        Ok(Self::Typed {
            resource_type,
            subject,
        })
    }

    pub fn matches(&self, job: &JobDescriptor) -> bool {
        match self {
            Self::Any => true,
            Self::Typed {
                resource_type: ResourceType::System,
                ..
            } => true,
            Self::Typed {
                resource_type,
                subject,
            } => resource_type.applies_to(job.kind()) && subject.is_match(&job.resource_subject()),
        }
    }
}

#[derive(Debug, Clone)]
enum Condition {
    Matches(Vec<Pattern>),
    Not(Vec<String>),
    GreaterThan(f64),
}

impl Condition {
    fn holds(&self, value: &Value) -> bool {
        match self {
            Condition::Matches(patterns) => match value_text(value) {
                Some(text) => patterns.iter().any(|p| p.is_match(&text)),
                None => false,
            },
            Condition::Not(excluded) => match value_text(value) {
                Some(text) => !excluded.iter().any(|e| *e == text),
                None => false,
            },
            Condition::GreaterThan(threshold) => {
                value_number(value).is_some_and(|n| n > *threshold)
            }
        }
    }
}

/// Textual form used by `matches` and `not`. Strings are taken verbatim.
fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

fn value_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

/// A rule with its resource pattern and conditions compiled.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    rule: Rule,
    resource: ResourcePattern,
    conditions: Vec<(String, Condition)>,
}

impl CompiledRule {
    /// Validate and compile `rule`. `policy` is used for error context only.
    pub fn compile(policy: &str, rule: &Rule) -> PolicyResult<Self> {
        if rule.id.trim().is_empty() {
            return Err(PolicyError::EmptyRuleId {
                policy: policy.to_string(),
            });
        }

        let resource =
            ResourcePattern::parse(&rule.resource).map_err(|reason| PolicyError::InvalidResource {
                policy: policy.to_string(),
                rule_id: rule.id.clone(),
                resource: rule.resource.clone(),
                reason,
            })?;

        if rule.actions.is_empty() || rule.actions.iter().any(|a| a.trim().is_empty()) {
            return Err(PolicyError::EmptyActions {
                policy: policy.to_string(),
                rule_id: rule.id.clone(),
            });
        }

        let invalid = |field: &str, reason: &str| PolicyError::InvalidCondition {
            policy: policy.to_string(),
            rule_id: rule.id.clone(),
            field: field.to_string(),
            reason: reason.to_string(),
        };

        let mut conditions = Vec::with_capacity(rule.conditions.len());
        for (field, predicate) in &rule.conditions {
            let condition = match predicate {
                Predicate::Matches(globs) => {
                    if globs.is_empty() {
                        return Err(invalid(field, "has an empty 'matches' list"));
                    }
                    let patterns = globs
                        .iter()
                        .map(|g| Pattern::compile(g))
                        .collect::<PolicyResult<Vec<_>>>()?;
                    Condition::Matches(patterns)
                }
                Predicate::Not(values) => {
                    if values.is_empty() {
                        return Err(invalid(field, "has an empty 'not' list"));
                    }
                    Condition::Not(values.iter().filter_map(value_text).collect())
                }
                Predicate::GreaterThan(threshold) => {
                    if !threshold.is_finite() {
                        return Err(invalid(field, "has a non-finite threshold"));
                    }
                    Condition::GreaterThan(*threshold)
                }
            };
            conditions.push((field.clone(), condition));
        }

        Ok(Self {
            rule: rule.clone(),
            resource,
            conditions,
        })
    }

    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    pub fn resource_matches(&self, job: &JobDescriptor) -> bool {
        self.resource.matches(job)
    }

    pub fn action_matches(&self, job: &JobDescriptor) -> bool {
        let implicit = job.kind().implicit_actions();
        self.rule
            .actions
            .iter()
            .any(|a| a == "*" || implicit.contains(&a.as_str()))
    }

    /// Every condition holds. A field the job cannot resolve fails its
    /// condition.
    pub fn conditions_match(&self, job: &JobDescriptor) -> bool {
        self.conditions.iter().all(|(field, condition)| {
            job.resolve_field(field)
                .is_some_and(|value| condition.holds(&value))
        })
    }

    pub fn matches(&self, job: &JobDescriptor) -> bool {
        self.resource_matches(job) && self.action_matches(job) && self.conditions_match(job)
    }
}

/// Compile `rule` and test it against `job` in one step.
pub fn rule_matches(rule: &Rule, job: &JobDescriptor) -> PolicyResult<bool> {
    Ok(CompiledRule::compile("<adhoc>", rule)?.matches(job))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::FileOperationKind;
    use serde_json::json;

    #[test]
    fn test_wildcard_resource_matches_every_kind() {
        let rule = Rule::deny("all", "*", &["*"]);
        assert!(rule_matches(&rule, &JobDescriptor::shell("ls")).unwrap());
        assert!(rule_matches(&rule, &JobDescriptor::api_call("GET", "https://a.b")).unwrap());
    }

    #[test]
    fn test_resource_type_must_correspond() {
        let rule = Rule::deny("etc", "file:/etc/*", &["write"]);
        let shell = JobDescriptor::shell("/etc/passwd");
        assert!(!rule_matches(&rule, &shell).unwrap());

        let file = JobDescriptor::file(FileOperationKind::Write, "/etc/passwd", None);
        assert!(rule_matches(&rule, &file).unwrap());
    }

    #[test]
    fn test_script_subject_is_interpreter() {
        let rule = Rule::allow("py", "process:python*", &["execute"]);
        let job = JobDescriptor::script("print(1)", Some("python3".into()));
        assert!(rule_matches(&rule, &job).unwrap());
        let job = JobDescriptor::script("echo 1", None);
        assert!(!rule_matches(&rule, &job).unwrap());
    }

    #[test]
    fn test_system_resource_ignores_subject() {
        let rule = Rule::deny("cpu", "system:cpu", &["*"]);
        assert!(rule_matches(&rule, &JobDescriptor::shell("ls")).unwrap());
    }

    #[test]
    fn test_action_intersection() {
        let job = JobDescriptor::shell("ls");
        assert!(!rule_matches(&Rule::deny("r", "process:*", &["read"]), &job).unwrap());
        assert!(rule_matches(&Rule::deny("r", "process:*", &["read", "execute"]), &job).unwrap());
    }

    #[test]
    fn test_greater_than_coerces_and_fails_closed_on_missing() {
        let rule = Rule::deny("cpu", "system:cpu", &["*"])
            .with_condition("usage", Predicate::GreaterThan(80.0));
        let hot = JobDescriptor::shell("ls").with_attribute("usage", 95);
        let cool = JobDescriptor::shell("ls").with_attribute("usage", "70");
        let textual = JobDescriptor::shell("ls").with_attribute("usage", "81.5");
        let unknown = JobDescriptor::shell("ls");
        assert!(rule_matches(&rule, &hot).unwrap());
        assert!(!rule_matches(&rule, &cool).unwrap());
        assert!(rule_matches(&rule, &textual).unwrap());
        assert!(!rule_matches(&rule, &unknown).unwrap());
    }

    #[test]
    fn test_not_compares_textual_form() {
        let rule = Rule::deny("m", "network:*", &["request"])
            .with_condition("method", Predicate::Not(vec![json!("GET"), json!("HEAD")]));
        assert!(!rule_matches(&rule, &JobDescriptor::api_call("get", "https://x.io")).unwrap());
        assert!(rule_matches(&rule, &JobDescriptor::api_call("DELETE", "https://x.io")).unwrap());

        let numeric = Rule::deny("n", "*", &["*"])
            .with_condition("retries", Predicate::Not(vec![json!(3)]));
        let job = JobDescriptor::shell("ls").with_attribute("retries", "3");
        assert!(!rule_matches(&numeric, &job).unwrap());
    }

    #[test]
    fn test_all_conditions_must_hold() {
        let rule = Rule::deny("r", "file:*", &["write"])
            .when_matches("path", &["/etc/*"])
            .when_matches("operation", &["write"]);
        let write = JobDescriptor::file(FileOperationKind::Write, "/etc/hosts", None);
        let read = JobDescriptor::file(FileOperationKind::Read, "/etc/hosts", None);
        assert!(rule_matches(&rule, &write).unwrap());
        assert!(!rule_matches(&rule, &read).unwrap());
    }

    #[test]
    fn test_compile_rejects_bad_rules() {
        let unknown = Rule::deny("r", "filesystem:/etc/*", &["write"]);
        assert!(matches!(
            CompiledRule::compile("p", &unknown),
            Err(PolicyError::InvalidResource { .. })
        ));

        let missing_colon = Rule::deny("r", "file", &["write"]);
        assert!(CompiledRule::compile("p", &missing_colon).is_err());

        let no_actions = Rule::deny("r", "*", &[]);
        assert!(matches!(
            CompiledRule::compile("p", &no_actions),
            Err(PolicyError::EmptyActions { .. })
        ));

        let empty_matches = Rule::deny("r", "*", &["*"]).when_matches("path", &[]);
        assert!(matches!(
            CompiledRule::compile("p", &empty_matches),
            Err(PolicyError::InvalidCondition { .. })
        ));

        let nan = Rule::deny("r", "*", &["*"]).with_condition("x", Predicate::GreaterThan(f64::NAN));
        assert!(CompiledRule::compile("p", &nan).is_err());

        let blank_id = Rule::deny(" ", "*", &["*"]);
        assert!(matches!(
            CompiledRule::compile("p", &blank_id),
            Err(PolicyError::EmptyRuleId { .. })
        ));
    }
}
