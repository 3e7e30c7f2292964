//! Active-job table and bounded history.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tracing::trace;

use crate::job::{JobDescriptor, JobId};

use super::result::JobSummary;
use super::state::{ActiveJob, JobState};

#[derive(Debug, Default)]
struct RegistryInner {
    active: HashMap<JobId, ActiveJob>,
    history: VecDeque<JobSummary>,
}

/// Shared record of in-flight and finished jobs.
#[derive(Debug, Clone)]
pub struct JobRegistry {
    inner: Arc<Mutex<RegistryInner>>,
    history_limit: usize,
}

impl JobRegistry {
    pub fn new(history_limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner::default())),
            history_limit: history_limit.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track `job` as pending. Returns `false`, leaving the table untouched,
    /// when a job with the same id is already active.
    #[must_use]
    pub fn begin(&self, job: &JobDescriptor) -> bool {
        let entry = ActiveJob {
            job_id: job.id.clone(),
            kind: job.kind(),
            state: JobState::Pending,
            attempt: 0,
            submitted_at: Utc::now(),
            sandbox_id: None,
        };
        match self.lock().active.entry(job.id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(entry);
                true
            }
        }
    }

    /// Move an active job to `state`. Illegal transitions are traced and
    /// applied anyway; the executor drives the machine.
    pub fn transition(&self, job_id: &JobId, state: JobState) {
        if let Some(entry) = self.lock().active.get_mut(job_id) {
            if !entry.state.can_transition_to(state) {
                trace!(job_id = %job_id, from = %entry.state, to = %state, "unexpected transition");
            }
            if state == JobState::Validating {
                entry.attempt += 1;
            }
            entry.state = state;
            if !matches!(state, JobState::Running) {
                entry.sandbox_id = None;
            }
        }
    }

    pub fn set_running(&self, job_id: &JobId, sandbox_id: &str) {
        if let Some(entry) = self.lock().active.get_mut(job_id) {
            entry.state = JobState::Running;
            entry.sandbox_id = Some(sandbox_id.to_string());
        }
    }

    /// Drop the job from the active table and append its summary.
    pub fn finish(&self, summary: JobSummary) {
        let mut inner = self.lock();
        inner.active.remove(&summary.job_id);
        inner.history.push_back(summary);
        while inner.history.len() > self.history_limit {
            inner.history.pop_front();
        }
    }

    /// Active jobs, oldest submission first.
    pub fn active(&self) -> Vec<ActiveJob> {
        let mut jobs: Vec<_> = self.lock().active.values().cloned().collect();
        jobs.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        jobs
    }

    /// Most-recent-first.
    pub fn history(&self, limit: Option<usize>) -> Vec<JobSummary> {
        let inner = self.lock();
        let iter = inner.history.iter().rev().cloned();
        match limit {
            Some(n) => iter.take(n).collect(),
            None => iter.collect(),
        }
    }
}
