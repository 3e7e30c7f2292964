//! Configuration faults raised when policies are registered.

/// A malformed policy, rule or pattern. Always rejected at registration time.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("policy name must not be empty")]
    EmptyPolicyName,

    #[error("policy '{policy}' has a rule with an empty id")]
    EmptyRuleId { policy: String },

    #[error("policy '{policy}' declares rule id '{rule_id}' more than once")]
    DuplicateRuleId { policy: String, rule_id: String },

    #[error("rule '{rule_id}' in policy '{policy}' has invalid resource '{resource}': {reason}")]
    InvalidResource {
        policy: String,
        rule_id: String,
        resource: String,
        reason: String,
    },

    #[error("rule '{rule_id}' in policy '{policy}' lists no actions")]
    EmptyActions { policy: String, rule_id: String },

    #[error("rule '{rule_id}' in policy '{policy}': condition on '{field}' {reason}")]
    InvalidCondition {
        policy: String,
        rule_id: String,
        field: String,
        reason: String,
    },

    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("pattern of {len} bytes exceeds the {max}-byte limit")]
    PatternTooLong { len: usize, max: usize },

    #[error("policy document is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for policy configuration.
pub type PolicyResult<T> = std::result::Result<T, PolicyError>;
