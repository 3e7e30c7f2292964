//! Provisioning and release of per-job sandboxes.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::job::{JobDescriptor, JobId};

use super::error::{SandboxError, SandboxResult};
use super::limits;
use super::profile::{IsolationType, SandboxProfile};

/// A provisioned execution context for exactly one job attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sandbox {
    pub id: String,
    pub job_id: JobId,
    /// Strategy actually in effect; never `Auto`.
    pub isolation: IsolationType,
    pub workdir: PathBuf,
    pub profile: SandboxProfile,
    pub created_at: DateTime<Utc>,
}

impl Sandbox {
    /// Environment variables every job process in this sandbox receives.
    pub fn env(&self) -> Vec<(&'static str, String)> {
        let mut env = vec![
            (limits::ENV_SANDBOX_ID, self.id.clone()),
            (limits::ENV_JOB_ID, self.job_id.to_string()),
        ];
        env.extend(limits::limit_env(&self.profile.limits));
        env
    }

    /// Shell prelude enforcing this sandbox's ceilings for a run of
    /// `timeout`.
    pub fn prelude(&self, timeout: Duration) -> String {
        limits::ulimit_prelude(&self.profile.limits, timeout)
    }
}

/// What release did with a sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub sandbox_id: String,
    pub removed: bool,
    /// Set when the sandbox was kept for inspection.
    pub retained_until: Option<DateTime<Utc>>,
    /// Previously retained sandboxes whose window had elapsed.
    pub swept: usize,
}

/// Creates and tears down sandboxes.
#[async_trait]
pub trait SandboxProvisioner: Send + Sync {
    fn name(&self) -> &str;

    async fn provision(
        &self,
        job: &JobDescriptor,
        profile: &SandboxProfile,
    ) -> SandboxResult<Sandbox>;

    /// Release after an attempt, honouring the profile's cleanup policy.
    async fn release(&self, sandbox: Sandbox, succeeded: bool) -> SandboxResult<CleanupReport>;
}

#[derive(Debug)]
struct Retained {
    id: String,
    workdir: PathBuf,
    expires_at: DateTime<Utc>,
}

/// Process isolation on the local host: one scratch directory per sandbox
/// plus the soft limits from [`limits`].
#[derive(Debug)]
pub struct LocalProvisioner {
    root: PathBuf,
    retained: Mutex<Vec<Retained>>,
}

impl LocalProvisioner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            retained: Mutex::new(Vec::new()),
        }
    }

    /// Sandboxes under `$TMPDIR/jobgate`.
    pub fn in_temp_dir() -> Self {
        Self::new(std::env::temp_dir().join("jobgate"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ids of sandboxes currently kept for inspection.
    pub fn retained(&self) -> Vec<String> {
        self.retained
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|r| r.id.clone())
            .collect()
    }

    fn resolve_isolation(&self, requested: IsolationType) -> SandboxResult<IsolationType> {
        match requested {
            IsolationType::Process | IsolationType::Auto => Ok(IsolationType::Process),
            other => Err(SandboxError::IsolationUnavailable {
                isolation: other,
                provisioner: self.name().to_string(),
            }),
        }
    }

    /// Remove retained sandboxes whose window ended before `now`.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<Retained> = {
            let mut retained = self.retained.lock().unwrap_or_else(PoisonError::into_inner);
            let (expired, keep): (Vec<Retained>, Vec<Retained>) =
                retained.drain(..).partition(|r| r.expires_at <= now);
            *retained = keep;
            expired
        };

        let count = expired.len();
        for r in expired {
            if let Err(e) = remove_dir(&r.workdir).await {
                warn!(sandbox_id = %r.id, error = %e, "failed to sweep retained sandbox");
            } else {
                debug!(sandbox_id = %r.id, "swept retained sandbox");
            }
        }
        count
    }
}

async fn remove_dir(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[async_trait]
impl SandboxProvisioner for LocalProvisioner {
    fn name(&self) -> &str {
        "local"
    }

    #[instrument(skip_all, fields(job_id = %job.id))]
    async fn provision(
        &self,
        job: &JobDescriptor,
        profile: &SandboxProfile,
    ) -> SandboxResult<Sandbox> {
        profile.validate()?;
        let isolation = self.resolve_isolation(profile.isolation)?;

        let id = format!("sbx-{}", uuid::Uuid::new_v4());
        let workdir = self.root.join(&id);
        tokio::fs::create_dir_all(&workdir)
            .await
            .map_err(|e| SandboxError::io(format!("create {}", workdir.display()), e))?;

        info!(
            event = "sandbox.provisioned",
            sandbox_id = %id,
            isolation = %isolation,
            workdir = %workdir.display(),
        );

        Ok(Sandbox {
            id,
            job_id: job.id.clone(),
            isolation,
            workdir,
            profile: profile.clone(),
            created_at: Utc::now(),
        })
    }

    #[instrument(skip_all, fields(sandbox_id = %sandbox.id))]
    async fn release(&self, sandbox: Sandbox, succeeded: bool) -> SandboxResult<CleanupReport> {
        let now = Utc::now();
        let cleanup = &sandbox.profile.cleanup;

        let retained_until = if cleanup.removes_immediately(succeeded) {
            remove_dir(&sandbox.workdir)
                .await
                .map_err(|e| SandboxError::io(format!("remove {}", sandbox.workdir.display()), e))?;
            None
        } else {
            let expires_at = i64::try_from(cleanup.retention_minutes)
                .ok()
                .and_then(chrono::Duration::try_minutes)
                .and_then(|window| now.checked_add_signed(window))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            self.retained
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(Retained {
                    id: sandbox.id.clone(),
                    workdir: sandbox.workdir.clone(),
                    expires_at,
                });
            Some(expires_at)
        };

        let swept = self.sweep_expired(now).await;

        info!(
            event = "sandbox.released",
            sandbox_id = %sandbox.id,
            succeeded,
            removed = retained_until.is_none(),
            swept,
        );

        Ok(CleanupReport {
            sandbox_id: sandbox.id,
            removed: retained_until.is_none(),
            retained_until,
            swept,
        })
    }
}
