//! Job model: the unit of work submitted for policy-gated execution.
//!
//! - [`kind`]: `JobKind`, `ResourceType`, implicit action sets
//! - [`descriptor`]: `JobDescriptor`, `JobPayload` and per-kind payloads
//! - [`request`]: `JobRequest`, the external submission shape

pub mod descriptor;
pub mod kind;
pub mod request;

pub use descriptor::{
    ApiCallPayload, DatabaseOperationKind, DatabaseOperationPayload, FileOperationKind,
    FileOperationPayload, JobDescriptor, JobId, JobPayload, PathEscape, ScriptPayload,
    ShellCommandPayload,
};
pub use kind::{JobKind, ResourceType};
pub use request::{JobRequest, JobRequestError};
