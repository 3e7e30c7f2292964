//! Sandbox resource profiles: isolation strategy, ceilings, cleanup.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{SandboxError, SandboxResult};

pub const MAX_MEMORY_MB: u64 = 1 << 20;
pub const MAX_DISK_MB: u64 = 1 << 24;
pub const MAX_NETWORK_MBPS: u32 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationType {
    Process,
    Vm,
    Container,
    /// Let the provisioner pick the strongest strategy it supports.
    Auto,
}

impl fmt::Display for IsolationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Process => write!(f, "process"),
            Self::Vm => write!(f, "vm"),
            Self::Container => write!(f, "container"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Share of one CPU, 1-100.
    pub cpu_percent: u8,
    pub memory_mb: u64,
    pub disk_mb: u64,
    pub network_bandwidth_mbps: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_percent: 50,
            memory_mb: 512,
            disk_mb: 1024,
            network_bandwidth_mbps: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupPolicy {
    /// Remove the sandbox as soon as a job succeeds.
    pub on_success: bool,
    /// Remove the sandbox as soon as a job fails. When false it is kept for
    /// `retention_minutes` for inspection.
    pub on_failure: bool,
    pub retention_minutes: u64,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self {
            on_success: true,
            on_failure: false,
            retention_minutes: 60,
        }
    }
}

impl CleanupPolicy {
    /// Whether a sandbox that finished with `succeeded` is removed at once.
    pub fn removes_immediately(&self, succeeded: bool) -> bool {
        if succeeded {
            self.on_success
        } else {
            self.on_failure
        }
    }
}

/// The execution envelope a job runs under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxProfile {
    pub isolation: IsolationType,
    pub limits: ResourceLimits,
    pub cleanup: CleanupPolicy,
}

impl Default for SandboxProfile {
    fn default() -> Self {
        Self {
            isolation: IsolationType::Auto,
            limits: ResourceLimits::default(),
            cleanup: CleanupPolicy::default(),
        }
    }
}

impl SandboxProfile {
    pub fn with_isolation(mut self, isolation: IsolationType) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_cleanup(mut self, cleanup: CleanupPolicy) -> Self {
        self.cleanup = cleanup;
        self
    }

    /// Reject zero or out-of-range ceilings.
    pub fn validate(&self) -> SandboxResult<()> {
        let l = &self.limits;
        if !(1..=100).contains(&l.cpu_percent) {
            return Err(SandboxError::InvalidProfile(format!(
                "cpu_percent must be within 1-100, got {}",
                l.cpu_percent
            )));
        }
        if l.memory_mb == 0 || l.memory_mb > MAX_MEMORY_MB {
            return Err(SandboxError::InvalidProfile(format!(
                "memory_mb must be within 1-{MAX_MEMORY_MB}, got {}",
                l.memory_mb
            )));
        }
        if l.disk_mb == 0 || l.disk_mb > MAX_DISK_MB {
            return Err(SandboxError::InvalidProfile(format!(
                "disk_mb must be within 1-{MAX_DISK_MB}, got {}",
                l.disk_mb
            )));
        }
        if l.network_bandwidth_mbps == 0 || l.network_bandwidth_mbps > MAX_NETWORK_MBPS {
            return Err(SandboxError::InvalidProfile(format!(
                "network_bandwidth_mbps must be within 1-{MAX_NETWORK_MBPS}, got {}",
                l.network_bandwidth_mbps
            )));
        }
        Ok(())
    }
}
