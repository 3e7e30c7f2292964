//! Structured observability hooks for the job lifecycle.
//!
//! Every lifecycle step emits one `info!` (or `warn!`) event carrying an
//! `event = "job.<step>"` field so log pipelines can filter on it. Verbosity
//! follows `JOBGATE_LOG` / `RUST_LOG`, see [`crate::telemetry`].

use tracing::{info, warn};

use crate::job::{JobId, JobKind};
use crate::policy::Validation;

/// RAII guard that enters a job-scoped tracing span.
///
/// ```ignore
/// let _span = JobSpan::enter(&job.id, job.kind());
/// // every event below carries job_id and kind
/// ```
pub struct JobSpan {
    _span: tracing::span::EnteredSpan,
}

impl JobSpan {
    pub fn enter(job_id: &JobId, kind: JobKind) -> Self {
        let span = tracing::info_span!("jobgate.job", job_id = %job_id, kind = %kind);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_job_submitted(job_id: &JobId, kind: JobKind, dry_run: bool) {
    info!(event = "job.submitted", job_id = %job_id, kind = %kind, dry_run);
}

/// Emit event: policy evaluation finished.
pub fn emit_job_validated(job_id: &JobId, validation: &Validation) {
    info!(
        event = "job.validated",
        job_id = %job_id,
        allowed = validation.allowed,
        violations = validation.violations.len(),
        blocking = validation.violations.iter().filter(|v| v.is_blocking()).count(),
    );
}

pub fn emit_job_rejected(job_id: &JobId, reason: &str) {
    warn!(event = "job.rejected", job_id = %job_id, reason = %reason);
}

/// Emit event: an attempt started inside a sandbox.
pub fn emit_job_started(job_id: &JobId, attempt: u32, sandbox_id: &str, timeout_ms: u64) {
    info!(
        event = "job.started",
        job_id = %job_id,
        attempt,
        sandbox_id = %sandbox_id,
        timeout_ms,
    );
}

pub fn emit_job_timed_out(job_id: &JobId, attempt: u32, timeout_ms: u64) {
    warn!(event = "job.timed_out", job_id = %job_id, attempt, timeout_ms);
}

pub fn emit_job_retry(job_id: &JobId, attempt: u32, error: &dyn std::fmt::Display) {
    warn!(event = "job.retry", job_id = %job_id, attempt, error = %error);
}

/// Emit event: the job reached a final status.
pub fn emit_job_finished(job_id: &JobId, success: bool, attempts: u32, duration_ms: u64) {
    info!(
        event = "job.finished",
        job_id = %job_id,
        success,
        attempts,
        duration_ms,
    );
}

pub fn emit_sandbox_error(job_id: &JobId, error: &dyn std::fmt::Display) {
    warn!(event = "job.sandbox_error", job_id = %job_id, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_span_create() {
        let _span = JobSpan::enter(&JobId::from("job-1"), JobKind::ShellCommand);
    }
}
