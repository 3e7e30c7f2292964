//! Soft resource limits for host-process sandboxes.
//!
//! The local provisioner has no cgroups, so ceilings are applied with a
//! `ulimit` prelude in the job's shell and advertised through environment
//! variables. Network bandwidth is advisory only.

use std::time::Duration;

use super::profile::ResourceLimits;

pub const ENV_SANDBOX_ID: &str = "JOBGATE_SANDBOX_ID";
pub const ENV_JOB_ID: &str = "JOBGATE_JOB_ID";
pub const ENV_CPU_PERCENT: &str = "JOBGATE_CPU_PERCENT";
pub const ENV_MEMORY_MB: &str = "JOBGATE_MEMORY_MB";
pub const ENV_DISK_MB: &str = "JOBGATE_DISK_MB";
pub const ENV_NETWORK_MBPS: &str = "JOBGATE_NETWORK_MBPS";

/// CPU seconds granted to a job: its wall-clock budget scaled by the CPU
/// share, at least one second.
pub fn cpu_seconds(limits: &ResourceLimits, timeout: Duration) -> u64 {
    let millis = timeout.as_millis() as u64 * u64::from(limits.cpu_percent) / 100;
    millis.div_ceil(1000).max(1)
}

/// Shell prelude applying the memory, file-size and CPU ceilings.
///
/// `ulimit -v` takes KiB; `ulimit -f` takes 512-byte blocks. Failures are
/// ignored so shells lacking a flag still run the job.
pub fn ulimit_prelude(limits: &ResourceLimits, timeout: Duration) -> String {
    let memory_kib = limits.memory_mb.saturating_mul(1024);
    let file_blocks = limits.disk_mb.saturating_mul(2048);
    format!(
        "ulimit -v {memory_kib} 2>/dev/null; ulimit -f {file_blocks} 2>/dev/null; ulimit -t {} 2>/dev/null; ",
        cpu_seconds(limits, timeout)
    )
}

/// Environment advertised to the job process.
pub fn limit_env(limits: &ResourceLimits) -> Vec<(&'static str, String)> {
    vec![
        (ENV_CPU_PERCENT, limits.cpu_percent.to_string()),
        (ENV_MEMORY_MB, limits.memory_mb.to_string()),
        (ENV_DISK_MB, limits.disk_mb.to_string()),
        (ENV_NETWORK_MBPS, limits.network_bandwidth_mbps.to_string()),
    ]
}

/// Largest byte count a file job may write.
pub fn max_file_bytes(limits: &ResourceLimits) -> u64 {
    limits.disk_mb.saturating_mul(1024 * 1024)
}
