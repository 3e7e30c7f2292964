//! Error types for the sandbox module.

use super::profile::IsolationType;

/// Errors produced while validating profiles or provisioning sandboxes.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("invalid sandbox profile: {0}")]
    InvalidProfile(String),

    #[error("isolation '{isolation}' is not available from the {provisioner} provisioner")]
    IsolationUnavailable {
        isolation: IsolationType,
        provisioner: String,
    },

    #[error("sandbox I/O failed ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl SandboxError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = std::result::Result<T, SandboxError>;
