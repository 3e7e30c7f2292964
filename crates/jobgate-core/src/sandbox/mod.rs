//! Sandboxes: the resource-constrained context an admitted job runs in.
//!
//! - [`profile`]: `SandboxProfile`, `IsolationType`, limits, cleanup
//! - [`limits`]: soft limits (`ulimit` prelude, advertised environment)
//! - [`provision`]: `SandboxProvisioner` trait and the `LocalProvisioner`
//! - [`error`]: `SandboxError` / `SandboxResult`

pub mod error;
pub mod limits;
pub mod profile;
pub mod provision;

pub use error::{SandboxError, SandboxResult};
pub use profile::{CleanupPolicy, IsolationType, ResourceLimits, SandboxProfile};
pub use provision::{CleanupReport, LocalProvisioner, Sandbox, SandboxProvisioner};
