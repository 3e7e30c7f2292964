//! Runs jobs as host processes, file operations and HTTP calls.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::job::{
    ApiCallPayload, FileOperationKind, FileOperationPayload, JobDescriptor, JobPayload,
};
use crate::sandbox::{limits, Sandbox};

use super::{DatabaseBackend, JobRunner, RunFault, RunOutput};

const SCRIPT_FILE: &str = "job-script";

/// SIGKILLs a job's whole process group when dropped, so nothing the shell
/// forked outlives the attempt.
#[cfg(unix)]
struct ProcessGroup(nix::unistd::Pid);

#[cfg(unix)]
impl ProcessGroup {
    fn new(leader: u32) -> Self {
        Self(nix::unistd::Pid::from_raw(leader as i32))
    }
}

#[cfg(unix)]
impl Drop for ProcessGroup {
    fn drop(&mut self) {
        use nix::sys::signal::{killpg, Signal};

        match killpg(self.0, Signal::SIGKILL) {
            Ok(()) => debug!(pgid = self.0.as_raw(), "killed job process group"),
            Err(nix::errno::Errno::ESRCH) => {}
            Err(e) => warn!(pgid = self.0.as_raw(), error = %e, "failed to kill job process group"),
        }
    }
}

/// The default runner: everything executes on the local host inside the
/// sandbox's scratch directory.
#[derive(Clone, Default)]
pub struct LocalRunner {
    http: reqwest::Client,
    database: Option<Arc<dyn DatabaseBackend>>,
}

impl std::fmt::Debug for LocalRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalRunner")
            .field("database", &self.database.is_some())
            .finish()
    }
}

impl LocalRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_database(mut self, backend: Arc<dyn DatabaseBackend>) -> Self {
        self.database = Some(backend);
        self
    }

    /// The job's working directory, else the sandbox's scratch directory.
    fn cwd(job: &JobDescriptor, sandbox: &Sandbox) -> PathBuf {
        job.working_directory
            .clone()
            .unwrap_or_else(|| sandbox.workdir.clone())
    }

    /// Run `sh -c <script> <args..>` under the sandbox's limits.
    async fn run_shell(
        &self,
        label: &str,
        script: String,
        args: &[String],
        cwd: &Path,
        sandbox: &Sandbox,
    ) -> Result<RunOutput, RunFault> {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(script)
            .args(args)
            .current_dir(cwd)
            .envs(sandbox.env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        debug!(command = %label, workdir = %cwd.display(), "spawning job process");
        let child = command.spawn().map_err(|source| {
            warn!(command = %label, error = %source, "failed to spawn job process");
            RunFault::Spawn {
                program: label.to_string(),
                source,
            }
        })?;
        // Dropped on completion and when a timeout abandons this future.
        #[cfg(unix)]
        let _group = child.id().map(ProcessGroup::new);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| RunFault::io(format!("wait for {label}"), e))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let code = output.status.code();

        if output.status.success() {
            Ok(RunOutput {
                stdout,
                stderr,
                exit_code: code,
            })
        } else {
            Err(RunFault::NonZeroExit {
                code,
                stdout,
                stderr,
            })
        }
    }

    async fn run_file(
        &self,
        job: &JobDescriptor,
        op: &FileOperationPayload,
        sandbox: &Sandbox,
    ) -> Result<RunOutput, RunFault> {
        let path = match job.effective_path() {
            Some(Ok(path)) if path.is_relative() && job.working_directory.is_none() => {
                sandbox.workdir.join(path)
            }
            Some(Ok(path)) => path,
            Some(Err(escape)) => return Err(RunFault::InvalidJob(escape.to_string())),
            None => return Err(RunFault::InvalidJob(format!("{} job has no path", job.kind()))),
        };
        let shown = path.display().to_string();

        let stdout = match op.operation {
            FileOperationKind::Read => {
                let bytes = tokio::fs::read(&path)
                    .await
                    .map_err(|e| RunFault::io(format!("read {shown}"), e))?;
                String::from_utf8_lossy(&bytes).into_owned()
            }
            FileOperationKind::Write | FileOperationKind::Create => {
                let content = op.content.as_deref().unwrap_or_default();
                let limit = limits::max_file_bytes(&sandbox.profile.limits);
                let size = content.len() as u64;
                if size > limit {
                    return Err(RunFault::DiskLimit { size, limit });
                }

                if op.operation == FileOperationKind::Create {
                    if let Some(parent) = path.parent() {
                        tokio::fs::create_dir_all(parent)
                            .await
                            .map_err(|e| RunFault::io(format!("create {}", parent.display()), e))?;
                    }
                    let mut file = tokio::fs::OpenOptions::new()
                        .write(true)
                        .create_new(true)
                        .open(&path)
                        .await
                        .map_err(|e| RunFault::io(format!("create {shown}"), e))?;
                    file.write_all(content.as_bytes())
                        .await
                        .map_err(|e| RunFault::io(format!("write {shown}"), e))?;
                    file.flush()
                        .await
                        .map_err(|e| RunFault::io(format!("write {shown}"), e))?;
                } else {
                    tokio::fs::write(&path, content)
                        .await
                        .map_err(|e| RunFault::io(format!("write {shown}"), e))?;
                }
                format!("wrote {size} bytes to {shown}")
            }
            FileOperationKind::Delete => {
                tokio::fs::remove_file(&path)
                    .await
                    .map_err(|e| RunFault::io(format!("delete {shown}"), e))?;
                format!("deleted {shown}")
            }
        };

        Ok(RunOutput {
            stdout,
            stderr: String::new(),
            exit_code: None,
        })
    }

    async fn run_api_call(&self, call: &ApiCallPayload) -> Result<RunOutput, RunFault> {
        let method = reqwest::Method::from_bytes(call.method.to_uppercase().as_bytes())
            .map_err(|_| RunFault::InvalidJob(format!("unsupported HTTP method '{}'", call.method)))?;

        let mut request = self.http.request(method, &call.url);
        for (name, value) in &call.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &call.body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(RunFault::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(RunOutput {
            stdout: body,
            stderr: String::new(),
            exit_code: None,
        })
    }
}

#[async_trait]
impl JobRunner for LocalRunner {
    async fn run(
        &self,
        job: &JobDescriptor,
        sandbox: &Sandbox,
        timeout: Duration,
    ) -> Result<RunOutput, RunFault> {
        let cwd = Self::cwd(job, sandbox);

        match &job.payload {
            JobPayload::ShellCommand(p) => {
                let script = format!("{}{}", sandbox.prelude(timeout), p.command);
                self.run_shell(&p.command, script, &[], &cwd, sandbox).await
            }
            JobPayload::Script(p) => {
                let script_path = sandbox.workdir.join(SCRIPT_FILE);
                tokio::fs::write(&script_path, &p.body)
                    .await
                    .map_err(|e| RunFault::io(format!("write {}", script_path.display()), e))?;

                // $0 is the interpreter, "$@" the script path and its args.
                let script = format!("{}exec \"$0\" \"$@\"", sandbox.prelude(timeout));
                let mut args = vec![
                    p.interpreter().to_string(),
                    script_path.display().to_string(),
                ];
                args.extend(p.args.iter().cloned());
                self.run_shell(p.interpreter(), script, &args, &cwd, sandbox)
                    .await
            }
            JobPayload::FileOperation(p) => self.run_file(job, p, sandbox).await,
            JobPayload::ApiCall(p) => self.run_api_call(p).await,
            JobPayload::DatabaseOperation(p) => {
                let backend = self.database.as_ref().ok_or(RunFault::NoDatabaseBackend)?;
                let value = backend.execute(p).await.map_err(RunFault::Database)?;
                Ok(RunOutput {
                    stdout: value.to_string(),
                    stderr: String::new(),
                    exit_code: None,
                })
            }
        }
    }
}
