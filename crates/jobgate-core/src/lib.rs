//! jobgate core library
//!
//! Decides whether a job may run under declarative security policies, then
//! runs it inside a resource-constrained sandbox.
//!
//! ```ignore
//! let store = PolicyStore::with_builtin()?;
//! let executor = JobExecutor::new(ExecutorConfig::default(), store)?;
//! let result = executor.submit(JobDescriptor::shell("echo hi"), None).await;
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod job;
pub mod metrics;
pub mod obs;
pub mod policy;
pub mod runner;
pub mod sandbox;
pub mod telemetry;

pub use config::{ConfigError, EngineConfig};
pub use error::{JobgateError, Result};

pub use events::{
    EventAction, SecurityEvent, SecurityEventLog, SecurityEventType, Severity, Violation,
};

pub use executor::{
    ActiveJob, ExecutionResult, ExecutionStatus, ExecutorBuilder, ExecutorConfig, JobExecutor,
    JobState, JobSummary,
};

pub use job::{
    DatabaseOperationKind, FileOperationKind, JobDescriptor, JobId, JobKind, JobPayload,
    JobRequest, ResourceType,
};

pub use policy::{
    rule_matches, EnforcementMode, Pattern, Policy, PolicyError, PolicyEvaluator, PolicyStore,
    Predicate, Rule, RuleType, Validation,
};

pub use runner::{DatabaseBackend, JobRunner, LocalRunner, RunFault, RunOutput};

pub use sandbox::{
    CleanupPolicy, IsolationType, LocalProvisioner, ResourceLimits, Sandbox, SandboxError,
    SandboxProfile, SandboxProvisioner,
};

/// Crate version, as reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
