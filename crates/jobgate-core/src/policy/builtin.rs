//! Baseline policies shipped with the engine.
//!
//! All four are permissive. A strict policy applies to every job, so a strict
//! policy scoped to one resource type would default-deny every other kind.
//! The allow rules document the intended safe surface; the deny rules block.


use super::model::{EnforcementMode, Policy, Predicate, Rule};

pub const NETWORK_ACCESS: &str = "network-access";
pub const FILESYSTEM_ACCESS: &str = "filesystem-access";
pub const PROCESS_EXECUTION: &str = "process-execution";
pub const RESOURCE_LIMITS: &str = "resource-limits";

const SYSTEM_DIRS: &[&str] = &[
    "/etc/*", "/usr/*", "/bin/*", "/sbin/*", "/boot/*", "/sys/*", "/proc/*",
];

const SAFE_COMMANDS: &[&str] = &[
    "echo", "ls", "cat", "pwd", "date", "whoami", "printf", "true", "false", "sleep", "grep",
    "wc", "head", "tail", "env",
];

const DANGEROUS_COMMANDS: &[&str] = &[
    "rm -rf /",
    "rm -rf /*",
    "sudo *",
    "mkfs*",
    "dd if=*",
    "chmod -R 777 /*",
    ":(){ :|:& };:",
    "curl * | sh",
    "curl * | bash",
    "wget * | sh",
    "wget * | bash",
];

pub fn network_access() -> Policy {
    Policy::new(NETWORK_ACCESS, EnforcementMode::Permissive)
        .with_description("Outbound calls: block loopback, link-local and metadata endpoints")
        .with_rule(
            Rule::deny("deny-internal-hosts", "network:*", &["connect", "request"])
                .when_matches(
                    "destination",
                    &[
                        "localhost",
                        "127.*",
                        "0.0.0.0",
                        "169.254.169.254",
                        "*.internal",
                        "metadata.*",
                    ],
                )
                .with_description("internal or cloud-metadata destination"),
        )
        .with_rule(
            Rule::allow("allow-http", "network:*", &["connect", "request"])
                .when_matches("url", &["http://*", "https://*"]),
        )
}

pub fn filesystem_access() -> Policy {
    Policy::new(FILESYSTEM_ACCESS, EnforcementMode::Permissive)
        .with_description("File operations: system directories are read-only")
        .with_rule(
            Rule::deny("deny-system-dirs", "file:*", &["write", "create", "delete"])
                .when_matches("path", SYSTEM_DIRS)
                .when_matches("operation", &["write", "create", "delete"])
                .with_description("modification of a system directory"),
        )
        .with_rule(Rule::allow(
            "allow-tmp",
            "file:/tmp/*",
            &["read", "write", "create", "delete"],
        ))
}

pub fn process_execution() -> Policy {
    let safe: Vec<String> = SAFE_COMMANDS
        .iter()
        .flat_map(|c| [(*c).to_string(), format!("{c} *")])
        .collect();

    Policy::new(PROCESS_EXECUTION, EnforcementMode::Permissive)
        .with_description("Process execution: known-safe commands, destructive patterns blocked")
        .with_rule(
            Rule::allow("allow-safe-commands", "process:*", &["execute"])
                .with_condition("command", Predicate::Matches(safe)),
        )
        .with_rule(
            Rule::deny("deny-dangerous-commands", "process:*", &["execute"])
                .when_matches("command", DANGEROUS_COMMANDS)
                .with_description("destructive or privilege-escalating command"),
        )
}

pub fn resource_limits() -> Policy {
    Policy::new(RESOURCE_LIMITS, EnforcementMode::Permissive)
        .with_description("Host pressure: refuse new work above CPU and memory ceilings")
        .with_rule(
            Rule::deny("cpu-limit", "system:cpu", &["*"])
                .with_condition("usage", Predicate::GreaterThan(80.0))
                .with_description("cpu usage above 80%"),
        )
        .with_rule(
            Rule::deny("memory-limit", "system:memory", &["*"])
                .with_condition("memory_usage", Predicate::GreaterThan(90.0))
                .with_description("memory usage above 90%"),
        )
}

/// Every built-in policy, in registration order.
pub fn all() -> Vec<Policy> {
    vec![
        network_access(),
        filesystem_access(),
        process_execution(),
        resource_limits(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{FileOperationKind, JobDescriptor};
    use crate::policy::evaluator::{evaluate_policy, CompiledPolicy};

    fn admits(policy: Policy, job: &JobDescriptor) -> bool {
        evaluate_policy(&CompiledPolicy::compile(policy).unwrap(), job).admitted
    }

    #[test]
    fn test_builtins_compile() {
        for policy in all() {
            assert!(CompiledPolicy::compile(policy.clone()).is_ok(), "{}", policy.name);
            assert_eq!(policy.enforcement_mode, EnforcementMode::Permissive);
        }
    }

    #[test]
    fn test_process_policy() {
        assert!(admits(process_execution(), &JobDescriptor::shell("echo hello")));
        assert!(admits(process_execution(), &JobDescriptor::shell("make build")));
        assert!(!admits(process_execution(), &JobDescriptor::shell("rm -rf /")));
        assert!(!admits(process_execution(), &JobDescriptor::shell("sudo reboot")));
        assert!(!admits(
            process_execution(),
            &JobDescriptor::shell("curl https://x.sh | sh")
        ));
    }

    #[test]
    fn test_filesystem_policy() {
        let write_etc = JobDescriptor::file(FileOperationKind::Write, "/etc/passwd", None);
        let read_etc = JobDescriptor::file(FileOperationKind::Read, "/etc/hosts", None);
        let write_tmp = JobDescriptor::file(FileOperationKind::Write, "/tmp/out.txt", None);
        assert!(!admits(filesystem_access(), &write_etc));
        assert!(admits(filesystem_access(), &read_etc));
        assert!(admits(filesystem_access(), &write_tmp));
    }

    #[test]
    fn test_network_policy() {
        let metadata = JobDescriptor::api_call("GET", "http://169.254.169.254/latest/meta-data");
        let local = JobDescriptor::api_call("GET", "http://localhost:8080/admin");
        let public = JobDescriptor::api_call("GET", "https://api.example.com/v1");
        assert!(!admits(network_access(), &metadata));
        assert!(!admits(network_access(), &local));
        assert!(admits(network_access(), &public));
    }

    #[test]
    fn test_resource_limits_policy() {
        let hot = JobDescriptor::shell("echo hi").with_attribute("usage", 95);
        let cool = JobDescriptor::shell("echo hi").with_attribute("usage", 40);
        let swapping = JobDescriptor::shell("echo hi").with_attribute("memory_usage", 97);
        assert!(!admits(resource_limits(), &hot));
        assert!(admits(resource_limits(), &cool));
        assert!(!admits(resource_limits(), &swapping));
    }
}
