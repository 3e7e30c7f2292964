//! The job lifecycle state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{JobId, JobKind};

/// `Pending → Validating → {Rejected | Admitted} → Running →
/// {Completed | TimedOut | Crashed} → Finalized`.
///
/// A retry moves a crashed (or, if enabled, timed-out) job back to
/// `Validating`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Validating,
    Rejected,
    Admitted,
    Running,
    Completed,
    TimedOut,
    Crashed,
    Finalized,
}

impl JobState {
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Validating)
                | (Validating, Rejected)
                | (Validating, Admitted)
                | (Admitted, Running)
                | (Admitted, Crashed)
                | (Running, Completed)
                | (Running, TimedOut)
                | (Running, Crashed)
                | (TimedOut, Validating)
                | (Crashed, Validating)
                | (Rejected, Finalized)
                | (Completed, Finalized)
                | (TimedOut, Finalized)
                | (Crashed, Finalized)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Validating => "validating",
            JobState::Rejected => "rejected",
            JobState::Admitted => "admitted",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::TimedOut => "timed_out",
            JobState::Crashed => "crashed",
            JobState::Finalized => "finalized",
        };
        f.write_str(s)
    }
}

/// A job currently inside the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveJob {
    pub job_id: JobId,
    pub kind: JobKind,
    pub state: JobState,
    pub attempt: u32,
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        use JobState::*;
        let path = [Pending, Validating, Admitted, Running, Completed, Finalized];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_rejected_never_runs() {
        assert!(!JobState::Rejected.can_transition_to(JobState::Running));
        assert!(!JobState::Rejected.can_transition_to(JobState::Admitted));
        assert!(JobState::Rejected.can_transition_to(JobState::Finalized));
    }

    #[test]
    fn test_retry_reenters_validation() {
        assert!(JobState::Crashed.can_transition_to(JobState::Validating));
        assert!(JobState::TimedOut.can_transition_to(JobState::Validating));
        assert!(!JobState::Completed.can_transition_to(JobState::Validating));
    }

    #[test]
    fn test_state_serde_names() {
        assert_eq!(
            serde_json::to_string(&JobState::TimedOut).unwrap(),
            "\"timed_out\""
        );
    }
}
