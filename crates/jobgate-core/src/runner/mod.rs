//! Job runners: perform an admitted job inside its sandbox.
//!
//! - [`local`]: `LocalRunner` (host processes, files, HTTP) and the
//!   `DatabaseBackend` seam for database jobs

pub mod local;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::job::{DatabaseOperationPayload, JobDescriptor};
use crate::sandbox::Sandbox;

pub use local::LocalRunner;

/// Captured output of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

/// Why a run did not complete successfully. Always retryable.
#[derive(Debug, thiserror::Error)]
pub enum RunFault {
    #[error("process exited with status {}", exit_label(.code))]
    NonZeroExit {
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("write of {size} bytes exceeds the {limit}-byte disk ceiling")]
    DiskLimit { size: u64, limit: u64 },

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("http status {status}")]
    HttpStatus { status: u16, body: String },

    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error("no database backend configured")]
    NoDatabaseBackend,

    #[error("database operation failed: {0}")]
    Database(String),
}

fn exit_label(code: &Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| c.to_string())
}

impl RunFault {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Output captured before the fault, if any.
    pub fn captured(&self) -> Option<(&str, &str)> {
        match self {
            Self::NonZeroExit { stdout, stderr, .. } => Some((stdout, stderr)),
            Self::HttpStatus { body, .. } => Some((body, "")),
            _ => None,
        }
    }
}

/// Executes an admitted job inside a provisioned sandbox.
///
/// `timeout` is the attempt's wall-clock budget; the executor enforces it,
/// runners may use it to derive CPU ceilings.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(
        &self,
        job: &JobDescriptor,
        sandbox: &Sandbox,
        timeout: Duration,
    ) -> Result<RunOutput, RunFault>;
}

/// Performs database jobs on behalf of the runner.
#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    async fn execute(
        &self,
        operation: &DatabaseOperationPayload,
    ) -> Result<serde_json::Value, String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_display() {
        let fault = RunFault::NonZeroExit {
            code: Some(2),
            stdout: String::new(),
            stderr: "boom".into(),
        };
        assert_eq!(fault.to_string(), "process exited with status 2");
        assert_eq!(fault.captured(), Some(("", "boom")));

        let killed = RunFault::NonZeroExit {
            code: None,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert!(killed.to_string().contains("signal"));
        assert!(RunFault::NoDatabaseBackend.captured().is_none());
    }
}
