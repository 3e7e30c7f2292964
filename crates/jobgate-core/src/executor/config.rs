//! Executor limits and defaults.

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::sandbox::SandboxProfile;

/// How many jobs run at once, and how each attempt is bounded and retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Worker slots; admitted jobs beyond this wait in FIFO order.
    pub max_concurrent_jobs: usize,
    /// Per-attempt timeout when the job sets none.
    pub default_timeout_ms: u64,
    /// Extra attempts after a failed run (0 = run once).
    pub max_retries: u32,
    /// Fixed delay between attempts.
    pub retry_delay_ms: u64,
    /// Whether a timed-out attempt is retried like a crash.
    pub retry_timeouts: bool,
    /// Finished jobs kept for `job_history`.
    pub history_limit: usize,
    /// Security events kept in the log; unbounded when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_log_capacity: Option<usize>,
    /// Profile used when a submission carries no override. Configured
    /// through the `[sandbox]` section of the engine configuration.
    #[serde(skip)]
    pub default_profile: SandboxProfile,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            default_timeout_ms: 30_000,
            max_retries: 0,
            retry_delay_ms: 1_000,
            retry_timeouts: false,
            history_limit: 1_000,
            event_log_capacity: None,
            default_profile: SandboxProfile::default(),
        }
    }
}

impl ExecutorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_jobs == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_jobs must be at least 1".into(),
            ));
        }
        if self.default_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "default_timeout_ms must be at least 1".into(),
            ));
        }
        if self.history_limit == 0 {
            return Err(ConfigError::Invalid("history_limit must be at least 1".into()));
        }
        if self.event_log_capacity == Some(0) {
            return Err(ConfigError::Invalid(
                "event_log_capacity must be at least 1 when set".into(),
            ));
        }
        self.default_profile.validate()?;
        Ok(())
    }
}
