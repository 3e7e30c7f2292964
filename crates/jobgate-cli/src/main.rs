//! jobgate - policy-gated job execution from the command line
//!
//! ## Commands
//!
//! - `run`: run a shell command
//! - `script`: run a script file under an interpreter
//! - `file`: perform a file operation
//! - `check`: evaluate a job request against the policies without running it
//! - `policies`: print the active policy set
//! - `batch`: submit a JSON array of job requests concurrently
//!
//! Exit status is 0 on success, 1 on failure and 2 when a policy rejected
//! the job.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tracing::{debug, Level};

use jobgate_core::config::load_policy_file;
use jobgate_core::metrics::METRICS;
use jobgate_core::telemetry::init_tracing;
use jobgate_core::{
    EngineConfig, ExecutionResult, FileOperationKind, JobDescriptor, JobExecutor, JobRequest,
    LocalProvisioner, PolicyStore,
};

#[derive(Parser)]
#[command(name = "jobgate")]
#[command(author = "Stevedores Org")]
#[command(version = jobgate_core::VERSION)]
#[command(about = "Policy-gated job execution", long_about = None)]
struct Cli {
    /// Engine configuration file (TOML)
    #[arg(short, long, global = true, env = "JOBGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Extra policy file(s) (JSON), registered after the configured set
    #[arg(short, long = "policies", global = true)]
    policies: Vec<PathBuf>,

    /// Emit results and log lines as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a shell command
    Run {
        /// Command line, passed to `sh -c`
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,

        #[command(flatten)]
        opts: JobOpts,
    },

    /// Run a script file
    Script {
        /// Script file to read
        path: PathBuf,

        /// Interpreter (default: sh)
        #[arg(short, long)]
        interpreter: Option<String>,

        /// Arguments passed to the script
        #[arg(last = true)]
        args: Vec<String>,

        #[command(flatten)]
        opts: JobOpts,
    },

    /// Perform a file operation
    File {
        #[arg(value_enum)]
        operation: FileOp,

        path: String,

        /// Content for write/create
        #[arg(long)]
        content: Option<String>,

        #[command(flatten)]
        opts: JobOpts,
    },

    /// Evaluate a job request (JSON file, or `-` for stdin) without running it
    Check {
        request: PathBuf,
    },

    /// Print the active policy set as JSON
    Policies,

    /// Submit a JSON array of job requests concurrently
    Batch {
        /// File holding the requests, or `-` for stdin
        requests: PathBuf,
    },
}

#[derive(clap::Args)]
struct JobOpts {
    /// Per-attempt timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Working directory for the job
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Attribute visible to policy conditions, as key=value (value parsed
    /// as JSON when possible)
    #[arg(long = "attr", value_parser = parse_attr)]
    attrs: Vec<(String, Value)>,

    /// Evaluate only; do not run
    #[arg(long)]
    dry_run: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum FileOp {
    Read,
    Write,
    Create,
    Delete,
}

impl From<FileOp> for FileOperationKind {
    fn from(op: FileOp) -> Self {
        match op {
            FileOp::Read => FileOperationKind::Read,
            FileOp::Write => FileOperationKind::Write,
            FileOp::Create => FileOperationKind::Create,
            FileOp::Delete => FileOperationKind::Delete,
        }
    }
}

fn parse_attr(raw: &str) -> std::result::Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    if key.is_empty() {
        return Err("attribute key must not be empty".into());
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

impl JobOpts {
    fn apply(&self, mut job: JobDescriptor) -> JobDescriptor {
        if let Some(ms) = self.timeout_ms {
            job = job.with_timeout_ms(ms);
        }
        if let Some(dir) = &self.cwd {
            job = job.with_working_directory(dir);
        }
        for (key, value) in &self.attrs {
            job = job.with_attribute(key.clone(), value.clone());
        }
        job
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => EngineConfig::from_env().context("Invalid JOBGATE_* environment")?,
    };

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        config.logging.level()
    };
    init_tracing(cli.json || config.logging.json, level);

    let executor = build_executor(&config, &cli.policies)?;
    let code = dispatch(&cli, &executor).await?;
    METRICS.flush();
    Ok(code)
}

fn build_executor(config: &EngineConfig, extra_policies: &[PathBuf]) -> Result<JobExecutor> {
    let store = PolicyStore::new();
    store
        .register_all(config.load_policies()?)
        .context("Failed to register configured policies")?;
    for path in extra_policies {
        let policies = load_policy_file(path)?;
        store
            .register_all(policies)
            .with_context(|| format!("Failed to register policies from {}", path.display()))?;
    }
    debug!(policies = ?store.names(), "policy store ready");

    let provisioner = match &config.sandbox.root {
        Some(root) => LocalProvisioner::new(root),
        None => LocalProvisioner::in_temp_dir(),
    };

    let executor = JobExecutor::builder(config.executor_config())
        .policies(store)
        .provisioner(Arc::new(provisioner))
        .build()?;
    Ok(executor)
}

async fn dispatch(cli: &Cli, executor: &JobExecutor) -> Result<ExitCode> {
    match &cli.command {
        Commands::Run { command, opts } => {
            let job = opts.apply(JobDescriptor::shell(command.join(" ")));
            cmd_submit(executor, job, opts.dry_run, cli.json).await
        }
        Commands::Script {
            path,
            interpreter,
            args,
            opts,
        } => {
            let body = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read script {}", path.display()))?;
            let mut job = JobDescriptor::script(body, interpreter.clone());
            if let jobgate_core::JobPayload::Script(p) = &mut job.payload {
                p.args = args.clone();
            }
            cmd_submit(executor, opts.apply(job), opts.dry_run, cli.json).await
        }
        Commands::File {
            operation,
            path,
            content,
            opts,
        } => {
            let job = JobDescriptor::file((*operation).into(), path.clone(), content.clone());
            cmd_submit(executor, opts.apply(job), opts.dry_run, cli.json).await
        }
        Commands::Check { request } => {
            let job = read_request(request)?;
            cmd_submit(executor, job, true, cli.json).await
        }
        Commands::Policies => {
            let policies = executor.policies().list();
            println!("{}", serde_json::to_string_pretty(&policies)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Batch { requests } => cmd_batch(executor, requests, cli.json).await,
    }
}

async fn cmd_submit(
    executor: &JobExecutor,
    job: JobDescriptor,
    dry_run: bool,
    json: bool,
) -> Result<ExitCode> {
    let result = if dry_run {
        executor.dry_run(&job)
    } else {
        executor.submit(job, None).await
    };
    report(&result, json)?;
    Ok(ExitCode::from(exit_status(std::slice::from_ref(&result))))
}

async fn cmd_batch(executor: &JobExecutor, source: &Path, json: bool) -> Result<ExitCode> {
    let text = read_source(source)?;
    let requests: Vec<JobRequest> =
        serde_json::from_str(&text).context("Batch input must be a JSON array of job requests")?;
    let jobs = requests
        .into_iter()
        .map(JobDescriptor::try_from)
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("Invalid job request in batch")?;

    let results =
        futures::future::join_all(jobs.into_iter().map(|job| executor.submit(job, None))).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for result in &results {
            report(result, false)?;
        }
    }
    Ok(ExitCode::from(exit_status(&results)))
}

fn read_source(source: &Path) -> Result<String> {
    if source == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read stdin")?;
        Ok(text)
    } else {
        std::fs::read_to_string(source)
            .with_context(|| format!("Failed to read {}", source.display()))
    }
}

fn read_request(source: &Path) -> Result<JobDescriptor> {
    let text = read_source(source)?;
    let request: JobRequest = serde_json::from_str(&text).context("Invalid job request JSON")?;
    Ok(JobDescriptor::try_from(request)?)
}

fn report(result: &ExecutionResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    if let Some(out) = &result.stdout {
        print!("{out}");
    }
    if let Some(err) = &result.stderr {
        eprint!("{err}");
    }

    let label = if result.dry_run { "check" } else { "job" };
    if result.is_success() {
        if result.dry_run {
            eprintln!("{label} {}: admitted", result.job_id);
        }
    } else {
        let error = result.error.as_deref().unwrap_or("failed");
        eprintln!("{label} {}: {} ({})", result.job_id, result.state, error);
    }
    for event in &result.security_events {
        eprintln!(
            "  [{}] {} {}: {}",
            event.severity, event.event_type, event.action, event.details
        );
    }
    if let Some(digest) = &result.decision_digest {
        eprintln!("  decision {digest}");
    }
    Ok(())
}

/// 2 if any job was rejected, else 1 if any failed, else 0.
fn exit_status(results: &[ExecutionResult]) -> u8 {
    if results.iter().any(ExecutionResult::is_rejected) {
        2
    } else if results.iter().any(|r| !r.is_success()) {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobgate_core::{ExecutionStatus, JobId, JobState};

    fn result(status: ExecutionStatus, state: JobState) -> ExecutionResult {
        ExecutionResult {
            job_id: JobId::from("j"),
            status,
            state,
            stdout: None,
            stderr: None,
            error: None,
            security_events: vec![],
            duration_ms: 0,
            attempts: 1,
            dry_run: false,
            decision_digest: None,
        }
    }

    #[test]
    fn test_parse_attr() {
        assert_eq!(
            parse_attr("usage=95").unwrap(),
            ("usage".to_string(), serde_json::json!(95))
        );
        assert_eq!(
            parse_attr("owner=ops team").unwrap(),
            ("owner".to_string(), serde_json::json!("ops team"))
        );
        assert!(parse_attr("novalue").is_err());
        assert!(parse_attr("=1").is_err());
    }

    #[test]
    fn test_exit_code_precedence() {
        let ok = result(ExecutionStatus::Success, JobState::Completed);
        let failed = result(ExecutionStatus::Failure, JobState::Crashed);
        let rejected = result(ExecutionStatus::Failure, JobState::Rejected);
        assert_eq!(exit_status(&[ok.clone()]), 0);
        assert_eq!(exit_status(&[ok.clone(), failed.clone()]), 1);
        assert_eq!(exit_status(&[failed, rejected, ok]), 2);
    }

    #[test]
    fn test_cli_parses_run_with_options() {
        let cli = Cli::try_parse_from([
            "jobgate",
            "--json",
            "run",
            "--timeout-ms",
            "500",
            "--attr",
            "usage=10",
            "echo",
            "hello",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Run { command, opts } => {
                assert_eq!(command, vec!["echo", "hello"]);
                assert_eq!(opts.timeout_ms, Some(500));
                assert_eq!(opts.attrs.len(), 1);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_cli_parses_file_and_batch() {
        let cli = Cli::try_parse_from(["jobgate", "file", "write", "/tmp/x", "--content", "hi"])
            .unwrap();
        assert!(matches!(cli.command, Commands::File { .. }));

        let cli = Cli::try_parse_from(["jobgate", "-p", "extra.json", "batch", "-"]).unwrap();
        assert_eq!(cli.policies, vec![PathBuf::from("extra.json")]);
        assert!(matches!(cli.command, Commands::Batch { .. }));
    }
}
