//! What a submission returns, and what history remembers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::SecurityEvent;
use crate::job::{JobId, JobKind};

use super::state::JobState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failure,
}

/// The outcome of `submit` or `dry_run`. Every outcome, including
/// rejection, is reported through this shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub job_id: JobId,
    pub status: ExecutionStatus,
    /// Terminal state reached: rejected, completed, timed_out or crashed.
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub security_events: Vec<SecurityEvent>,
    pub duration_ms: u64,
    pub attempts: u32,
    #[serde(default)]
    pub dry_run: bool,
    /// Digest of the policy decision; set for dry runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_digest: Option<String>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    pub fn is_rejected(&self) -> bool {
        self.state == JobState::Rejected
    }

    pub fn is_timeout(&self) -> bool {
        self.state == JobState::TimedOut
    }
}

/// The trace of a finished job kept in the executor's bounded history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: JobId,
    pub kind: JobKind,
    pub status: ExecutionStatus,
    pub state: JobState,
    pub attempts: u32,
    pub duration_ms: u64,
    pub security_events: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl JobSummary {
    pub fn from_result(kind: JobKind, result: &ExecutionResult) -> Self {
        Self {
            job_id: result.job_id.clone(),
            kind,
            status: result.status,
            state: result.state,
            attempts: result.attempts,
            duration_ms: result.duration_ms,
            security_events: result.security_events.len(),
            error: result.error.clone(),
            finished_at: Utc::now(),
        }
    }
}
