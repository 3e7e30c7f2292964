//! Crate-level error taxonomy.
//!
//! Policy violations, run faults and timeouts are not errors here: they are
//! reported as data inside an `ExecutionResult`. What remains are
//! configuration faults, raised when policies, profiles or engine settings
//! are registered or loaded.

use crate::config::ConfigError;
use crate::job::JobRequestError;
use crate::policy::PolicyError;
use crate::sandbox::SandboxError;

#[derive(Debug, thiserror::Error)]
pub enum JobgateError {
    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid job request: {0}")]
    Request(#[from] JobRequestError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for jobgate operations.
pub type Result<T> = std::result::Result<T, JobgateError>;
