//! Worker-slot ceiling and FIFO admission.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use jobgate_core::{
    ExecutorConfig, JobDescriptor, JobExecutor, JobRunner, LocalProvisioner, PolicyStore,
    RunFault, RunOutput, Sandbox,
};

/// Records how many runs overlap and the order runs begin in.
#[derive(Default)]
struct GaugeRunner {
    current: AtomicUsize,
    peak: AtomicUsize,
    started: Mutex<Vec<String>>,
    hold: Duration,
}

impl GaugeRunner {
    fn holding(hold: Duration) -> Self {
        Self {
            hold,
            ..Self::default()
        }
    }
}

#[async_trait]
impl JobRunner for GaugeRunner {
    async fn run(
        &self,
        job: &JobDescriptor,
        _sandbox: &Sandbox,
        _timeout: Duration,
    ) -> Result<RunOutput, RunFault> {
        self.started.lock().unwrap().push(job.id.to_string());
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(RunOutput::default())
    }
}

fn executor(max: usize, runner: Arc<GaugeRunner>, dir: &std::path::Path) -> JobExecutor {
    JobExecutor::builder(ExecutorConfig {
        max_concurrent_jobs: max,
        ..ExecutorConfig::default()
    })
    .policies(PolicyStore::new())
    .provisioner(Arc::new(LocalProvisioner::new(dir)))
    .runner(runner)
    .build()
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_running_jobs_never_exceed_ceiling() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(GaugeRunner::holding(Duration::from_millis(40)));
    let exec = executor(3, runner.clone(), dir.path());

    let mut set = tokio::task::JoinSet::new();
    for i in 0..12 {
        let exec = exec.clone();
        set.spawn(async move {
            exec.submit(JobDescriptor::shell(format!("job {i}")), None)
                .await
        });
    }

    let mut succeeded = 0;
    while let Some(joined) = set.join_next().await {
        if joined.unwrap().is_success() {
            succeeded += 1;
        }
    }

    assert_eq!(succeeded, 12);
    assert!(runner.peak.load(Ordering::SeqCst) <= 3);
    assert!(runner.peak.load(Ordering::SeqCst) >= 2);
    assert_eq!(exec.available_slots(), 3);
    assert_eq!(exec.job_history(None).len(), 12);
}

#[tokio::test]
async fn test_waiting_jobs_admitted_in_arrival_order() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(GaugeRunner::holding(Duration::from_millis(20)));
    let exec = executor(1, runner.clone(), dir.path());

    let mut handles = Vec::new();
    for i in 0..5 {
        let exec = exec.clone();
        let job = JobDescriptor::shell("queued").with_id(format!("job-{i}"));
        handles.push(tokio::spawn(async move { exec.submit(job, None).await }));
        // Let the task reach the slot queue before the next arrives.
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    for h in handles {
        assert!(h.await.unwrap().is_success());
    }

    let order = runner.started.lock().unwrap().clone();
    assert_eq!(order, vec!["job-0", "job-1", "job-2", "job-3", "job-4"]);
    assert_eq!(runner.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rejected_jobs_do_not_hold_slots() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(GaugeRunner::holding(Duration::from_millis(1)));
    let exec = executor(1, runner.clone(), dir.path());
    exec.policies()
        .register(jobgate_core::policy::builtin::process_execution())
        .unwrap();

    let rejected = exec.submit(JobDescriptor::shell("sudo reboot"), None).await;
    assert!(rejected.is_rejected());
    assert_eq!(exec.available_slots(), 1);
    assert!(runner.started.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_duplicate_active_id_refused_without_disturbing_first() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(GaugeRunner::holding(Duration::from_millis(300)));
    let exec = executor(2, runner.clone(), dir.path());

    let first = {
        let exec = exec.clone();
        tokio::spawn(async move {
            exec.submit(JobDescriptor::shell("long").with_id("same"), None)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = exec
        .submit(JobDescriptor::shell("short").with_id("same"), None)
        .await;
    assert!(!second.is_success());
    assert_eq!(second.state, jobgate_core::JobState::Rejected);
    assert_eq!(second.attempts, 0);
    assert!(second.error.unwrap().contains("already active"));

    let active = exec.list_active_jobs();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].job_id.as_str(), "same");

    assert!(first.await.unwrap().is_success());
    assert!(exec.list_active_jobs().is_empty());
    assert_eq!(exec.job_history(None).len(), 1);
    assert_eq!(*runner.started.lock().unwrap(), vec!["same".to_string()]);
}
