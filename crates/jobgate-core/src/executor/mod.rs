//! The job executor: validation, worker slots, sandboxing, timeout and retry.
//!
//! - [`config`]: `ExecutorConfig`
//! - [`state`]: `JobState` machine and `ActiveJob`
//! - [`result`]: `ExecutionResult`, `JobSummary`
//! - [`registry`]: active jobs and bounded history

pub mod config;
pub mod registry;
pub mod result;
pub mod state;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use crate::config::ConfigError;
use crate::events::{
    EventAction, SecurityEvent, SecurityEventLog, SecurityEventType, Severity, Violation,
};
use crate::job::JobDescriptor;
use crate::metrics::METRICS;
use crate::obs;
use crate::policy::{PolicyEvaluator, PolicyStore};
use crate::runner::{JobRunner, LocalRunner, RunFault, RunOutput};
use crate::sandbox::{LocalProvisioner, SandboxProfile, SandboxProvisioner};

pub use config::ExecutorConfig;
pub use registry::JobRegistry;
pub use result::{ExecutionResult, ExecutionStatus, JobSummary};
pub use state::{ActiveJob, JobState};

/// Error string reported for a timed-out job.
pub const TIMEOUT_ERROR: &str = "timeout";

enum AttemptOutcome {
    Completed(RunOutput),
    Crashed(RunFault),
    TimedOut,
    /// No sandbox could be provisioned; never retried.
    Unprovisioned(String),
}

struct ExecutorInner {
    config: ExecutorConfig,
    evaluator: PolicyEvaluator,
    provisioner: Arc<dyn SandboxProvisioner>,
    runner: Arc<dyn JobRunner>,
    slots: Arc<Semaphore>,
    registry: JobRegistry,
}

/// Assembles a [`JobExecutor`]. Unset collaborators fall back to the local
/// provisioner and runner, an empty policy store and a fresh event log.
pub struct ExecutorBuilder {
    config: ExecutorConfig,
    policies: Option<PolicyStore>,
    events: Option<SecurityEventLog>,
    provisioner: Option<Arc<dyn SandboxProvisioner>>,
    runner: Option<Arc<dyn JobRunner>>,
}

impl ExecutorBuilder {
    pub fn policies(mut self, store: PolicyStore) -> Self {
        self.policies = Some(store);
        self
    }

    pub fn event_log(mut self, log: SecurityEventLog) -> Self {
        self.events = Some(log);
        self
    }

    pub fn provisioner(mut self, provisioner: Arc<dyn SandboxProvisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    pub fn runner(mut self, runner: Arc<dyn JobRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn build(self) -> Result<JobExecutor, ConfigError> {
        self.config.validate()?;

        let events = self.events.unwrap_or_else(|| match self.config.event_log_capacity {
            Some(cap) => SecurityEventLog::with_capacity(cap),
            None => SecurityEventLog::new(),
        });
        let evaluator = PolicyEvaluator::new(self.policies.unwrap_or_default(), events);
        let provisioner = self
            .provisioner
            .unwrap_or_else(|| Arc::new(LocalProvisioner::in_temp_dir()));
        let runner = self.runner.unwrap_or_else(|| Arc::new(LocalRunner::new()));

        Ok(JobExecutor {
            inner: Arc::new(ExecutorInner {
                slots: Arc::new(Semaphore::new(self.config.max_concurrent_jobs)),
                registry: JobRegistry::new(self.config.history_limit),
                config: self.config,
                evaluator,
                provisioner,
                runner,
            }),
        })
    }
}

/// Runs jobs through the full policy-gated lifecycle.
///
/// Cloning yields another handle to the same executor; submissions from any
/// handle share the worker slots, policy store and event log.
#[derive(Clone)]
pub struct JobExecutor {
    inner: Arc<ExecutorInner>,
}

impl std::fmt::Debug for JobExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobExecutor")
            .field("config", &self.inner.config)
            .field("provisioner", &self.inner.provisioner.name())
            .finish()
    }
}

impl JobExecutor {
    pub fn builder(config: ExecutorConfig) -> ExecutorBuilder {
        ExecutorBuilder {
            config,
            policies: None,
            events: None,
            provisioner: None,
            runner: None,
        }
    }

    /// Executor with the local provisioner and runner over `policies`.
    pub fn new(config: ExecutorConfig, policies: PolicyStore) -> Result<Self, ConfigError> {
        Self::builder(config).policies(policies).build()
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.config
    }

    /// Run `job` to completion. Never fails: rejections, crashes and
    /// timeouts are all reported in the returned result.
    #[instrument(skip_all, fields(job_id = %job.id, kind = %job.kind()))]
    pub async fn submit(
        &self,
        job: JobDescriptor,
        sandbox_override: Option<SandboxProfile>,
    ) -> ExecutionResult {
        let started = Instant::now();
        METRICS.inc_submitted();
        obs::emit_job_submitted(&job.id, job.kind(), false);

        let uncovered = job.uncovered_actions();
        if !uncovered.is_empty() {
            debug!(?uncovered, "requested permissions do not cover derived actions");
        }

        if !self.inner.registry.begin(&job) {
            let reason = format!("job id '{}' is already active", job.id);
            warn!(job_id = %job.id, "refusing submission: {reason}");
            return Outcome::failure(JobState::Rejected, reason).into_result(
                &job,
                Vec::new(),
                started,
                0,
            );
        }
        let profile =
            sandbox_override.unwrap_or_else(|| self.inner.config.default_profile.clone());

        let result = self.run_lifecycle(&job, &profile, started).await;
        self.finalize(&job, &result);
        result
    }

    async fn run_lifecycle(
        &self,
        job: &JobDescriptor,
        profile: &SandboxProfile,
        started: Instant,
    ) -> ExecutionResult {
        let inner = &self.inner;
        let events_log = inner.evaluator.events();
        let max_attempts = inner.config.max_retries.saturating_add(1);
        let timeout_ms = job
            .timeout_ms
            .unwrap_or(inner.config.default_timeout_ms)
            .max(1);
        let timeout = Duration::from_millis(timeout_ms);

        let mut events: Vec<SecurityEvent> = Vec::new();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            inner.registry.transition(&job.id, JobState::Validating);

            let (validation, recorded) = inner.evaluator.validate_and_record(job);
            events.extend(recorded);
            if !validation.allowed {
                let reason = validation.summary();
                METRICS.inc_rejected();
                obs::emit_job_rejected(&job.id, &reason);
                inner.registry.transition(&job.id, JobState::Rejected);
                return Outcome::failure(JobState::Rejected, reason).into_result(
                    job, events, started, attempt,
                );
            }
            inner.registry.transition(&job.id, JobState::Admitted);

            let retry_error = match self.attempt(job, profile, timeout, attempt).await {
                AttemptOutcome::Completed(output) => {
                    return Outcome {
                        status: ExecutionStatus::Success,
                        state: JobState::Completed,
                        stdout: Some(output.stdout),
                        stderr: Some(output.stderr),
                        error: None,
                    }
                    .into_result(job, events, started, attempt);
                }
                AttemptOutcome::Unprovisioned(reason) => {
                    events.push(events_log.record(
                        Violation::new(
                            SecurityEventType::SandboxUnavailable,
                            Severity::High,
                            EventAction::Failed,
                            format!("sandbox could not be provisioned: {reason}"),
                        ),
                        Some(&job.id),
                    ));
                    return Outcome::failure(JobState::Crashed, reason)
                        .into_result(job, events, started, attempt);
                }
                AttemptOutcome::Crashed(fault) => {
                    events.push(events_log.record(
                        Violation::new(
                            SecurityEventType::ExecutionFailure,
                            Severity::Medium,
                            EventAction::Failed,
                            format!("attempt {attempt} failed: {fault}"),
                        ),
                        Some(&job.id),
                    ));
                    if attempt >= max_attempts {
                        let (stdout, stderr) = match fault.captured() {
                            Some((out, err)) => (Some(out.to_string()), Some(err.to_string())),
                            None => (None, None),
                        };
                        return Outcome {
                            status: ExecutionStatus::Failure,
                            state: JobState::Crashed,
                            stdout,
                            stderr,
                            error: Some(fault.to_string()),
                        }
                        .into_result(job, events, started, attempt);
                    }
                    fault.to_string()
                }
                AttemptOutcome::TimedOut => {
                    METRICS.inc_timed_out();
                    obs::emit_job_timed_out(&job.id, attempt, timeout_ms);
                    events.push(events_log.record(
                        Violation::new(
                            SecurityEventType::ExecutionTimeout,
                            Severity::High,
                            EventAction::Terminated,
                            format!("attempt {attempt} exceeded the {timeout_ms}ms timeout"),
                        ),
                        Some(&job.id),
                    ));
                    if !inner.config.retry_timeouts || attempt >= max_attempts {
                        return Outcome::failure(JobState::TimedOut, TIMEOUT_ERROR.to_string())
                            .into_result(job, events, started, attempt);
                    }
                    TIMEOUT_ERROR.to_string()
                }
            };

            METRICS.inc_retries();
            obs::emit_job_retry(&job.id, attempt, &retry_error);
            tokio::time::sleep(Duration::from_millis(inner.config.retry_delay_ms)).await;
        }
    }

    /// One admitted attempt: slot, sandbox, bounded run, release.
    async fn attempt(
        &self,
        job: &JobDescriptor,
        profile: &SandboxProfile,
        timeout: Duration,
        attempt: u32,
    ) -> AttemptOutcome {
        let inner = &self.inner;

        // Held until the sandbox is released.
        let _permit = match inner.slots.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return AttemptOutcome::Unprovisioned("worker pool closed".into()),
        };

        let provisioned = match profile.validate() {
            Ok(()) => inner.provisioner.provision(job, profile).await,
            Err(e) => Err(e),
        };
        let sandbox = match provisioned {
            Ok(sandbox) => sandbox,
            Err(e) => {
                obs::emit_sandbox_error(&job.id, &e);
                inner.registry.transition(&job.id, JobState::Crashed);
                return AttemptOutcome::Unprovisioned(e.to_string());
            }
        };

        inner.registry.set_running(&job.id, &sandbox.id);
        obs::emit_job_started(&job.id, attempt, &sandbox.id, timeout.as_millis() as u64);

        // Dropping the run future on timeout drops the child process, which
        // is spawned with kill_on_drop.
        let run = tokio::time::timeout(timeout, inner.runner.run(job, &sandbox, timeout)).await;
        let (outcome, state) = match run {
            Ok(Ok(output)) => (AttemptOutcome::Completed(output), JobState::Completed),
            Ok(Err(fault)) => (AttemptOutcome::Crashed(fault), JobState::Crashed),
            Err(_elapsed) => (AttemptOutcome::TimedOut, JobState::TimedOut),
        };
        inner.registry.transition(&job.id, state);

        let succeeded = state == JobState::Completed;
        if let Err(e) = inner.provisioner.release(sandbox, succeeded).await {
            obs::emit_sandbox_error(&job.id, &e);
        }
        outcome
    }

    fn finalize(&self, job: &JobDescriptor, result: &ExecutionResult) {
        match (result.status, result.state) {
            (ExecutionStatus::Success, _) => METRICS.inc_succeeded(),
            (_, JobState::Rejected) => {}
            _ => METRICS.inc_failed(),
        }
        obs::emit_job_finished(
            &job.id,
            result.is_success(),
            result.attempts,
            result.duration_ms,
        );
        self.inner.registry.transition(&job.id, JobState::Finalized);
        self.inner
            .registry
            .finish(JobSummary::from_result(job.kind(), result));
    }

    /// Evaluate `job` without running it. Violations are still recorded in
    /// the event log; the decision digest is identical for identical
    /// decisions.
    pub fn dry_run(&self, job: &JobDescriptor) -> ExecutionResult {
        let started = Instant::now();
        let _span = obs::JobSpan::enter(&job.id, job.kind());
        obs::emit_job_submitted(&job.id, job.kind(), true);

        let (validation, events) = self.inner.evaluator.validate_and_record(job);
        let (status, state, error) = if validation.allowed {
            (ExecutionStatus::Success, JobState::Admitted, None)
        } else {
            (
                ExecutionStatus::Failure,
                JobState::Rejected,
                Some(validation.summary()),
            )
        };

        ExecutionResult {
            job_id: job.id.clone(),
            status,
            state,
            stdout: None,
            stderr: None,
            error,
            security_events: events,
            duration_ms: elapsed_ms(started),
            attempts: 0,
            dry_run: true,
            decision_digest: Some(validation.digest()),
        }
    }

    pub fn list_active_jobs(&self) -> Vec<ActiveJob> {
        self.inner.registry.active()
    }

    /// Finished jobs, most recent first.
    pub fn job_history(&self, limit: Option<usize>) -> Vec<JobSummary> {
        self.inner.registry.history(limit)
    }

    /// Most recent first with a limit, full chronological log without.
    pub fn security_events(&self, limit: Option<usize>) -> Vec<SecurityEvent> {
        self.inner.evaluator.events().query(limit)
    }

    pub fn clear_security_events(&self) {
        self.inner.evaluator.events().clear();
    }

    /// The live policy store; registrations apply to later evaluations.
    pub fn policies(&self) -> &PolicyStore {
        self.inner.evaluator.store()
    }

    /// Worker slots not currently held.
    pub fn available_slots(&self) -> usize {
        self.inner.slots.available_permits()
    }
}

struct Outcome {
    status: ExecutionStatus,
    state: JobState,
    stdout: Option<String>,
    stderr: Option<String>,
    error: Option<String>,
}

impl Outcome {
    fn failure(state: JobState, error: String) -> Self {
        Self {
            status: ExecutionStatus::Failure,
            state,
            stdout: None,
            stderr: None,
            error: Some(error),
        }
    }

    fn into_result(
        self,
        job: &JobDescriptor,
        security_events: Vec<SecurityEvent>,
        started: Instant,
        attempts: u32,
    ) -> ExecutionResult {
        ExecutionResult {
            job_id: job.id.clone(),
            status: self.status,
            state: self.state,
            stdout: self.stdout,
            stderr: self.stderr,
            error: self.error,
            security_events,
            duration_ms: elapsed_ms(started),
            attempts,
            dry_run: false,
            decision_digest: None,
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{EnforcementMode, Policy, Rule};

    fn executor(dir: &std::path::Path, store: PolicyStore) -> JobExecutor {
        JobExecutor::builder(ExecutorConfig::default())
            .policies(store)
            .provisioner(Arc::new(LocalProvisioner::new(dir)))
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let cfg = ExecutorConfig {
            max_concurrent_jobs: 0,
            ..ExecutorConfig::default()
        };
        assert!(JobExecutor::builder(cfg).build().is_err());
    }

    #[tokio::test]
    async fn test_submit_success_records_history() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path(), PolicyStore::new());
        let result = exec.submit(JobDescriptor::shell("echo hi"), None).await;
        assert!(result.is_success(), "{result:?}");
        assert_eq!(result.stdout.as_deref().map(str::trim), Some("hi"));
        assert_eq!(result.attempts, 1);
        assert!(exec.list_active_jobs().is_empty());
        assert_eq!(exec.job_history(None)[0].job_id, result.job_id);
        assert_eq!(exec.available_slots(), 4);
    }

    #[tokio::test]
    async fn test_rejection_summarises_most_severe() {
        let dir = tempfile::tempdir().unwrap();
        let store = PolicyStore::new();
        store
            .register(
                Policy::new("p", EnforcementMode::Permissive)
                    .with_rule(Rule::deny("any", "*", &["*"]))
                    .with_rule(
                        Rule::deny("critical", "process:*", &["execute"])
                            .with_severity(Severity::Critical),
                    ),
            )
            .unwrap();
        let exec = executor(dir.path(), store);
        let result = exec.submit(JobDescriptor::shell("ls"), None).await;
        assert!(result.is_rejected());
        assert_eq!(result.status, ExecutionStatus::Failure);
        assert_eq!(result.security_events.len(), 2);
        assert!(result.error.unwrap().contains("'critical'"));
        assert!(result.stdout.is_none());
    }

    #[tokio::test]
    async fn test_vm_isolation_fails_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let exec = JobExecutor::builder(ExecutorConfig {
            max_retries: 3,
            retry_delay_ms: 1,
            ..ExecutorConfig::default()
        })
        .provisioner(Arc::new(LocalProvisioner::new(dir.path())))
        .build()
        .unwrap();
        let profile = SandboxProfile::default().with_isolation(crate::sandbox::IsolationType::Vm);
        let result = exec.submit(JobDescriptor::shell("echo hi"), Some(profile)).await;
        assert_eq!(result.state, JobState::Crashed);
        assert_eq!(result.attempts, 1);
        assert_eq!(
            result.security_events[0].event_type,
            SecurityEventType::SandboxUnavailable
        );
    }

    #[test]
    fn test_dry_run_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path(), PolicyStore::with_builtin().unwrap());
        let job = JobDescriptor::shell("rm -rf /");
        let first = exec.dry_run(&job);
        let second = exec.dry_run(&job);
        assert!(first.dry_run);
        assert!(first.is_rejected());
        assert_eq!(first.decision_digest, second.decision_digest);
        assert!(first.stdout.is_none());
        assert!(exec.job_history(None).is_empty());
    }
}
