//! Job kinds and the resource/action axes the rule matcher reasons about.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The closed set of job kinds.
///
/// A kind fixes both the resource type a rule must name to apply and the
/// implicit action set the evaluator derives for the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    ShellCommand,
    Script,
    FileOperation,
    ApiCall,
    DatabaseOperation,
}

impl JobKind {
    pub const ALL: [JobKind; 5] = [
        JobKind::ShellCommand,
        JobKind::Script,
        JobKind::FileOperation,
        JobKind::ApiCall,
        JobKind::DatabaseOperation,
    ];

    /// Actions implied by running a job of this kind.
    ///
    /// The caller's requested permissions are never consulted; this set is
    /// what rules are matched against.
    pub fn implicit_actions(self) -> &'static [&'static str] {
        match self {
            JobKind::ShellCommand | JobKind::Script => &["execute"],
            JobKind::FileOperation => &["read", "write", "create", "delete"],
            JobKind::ApiCall => &["connect", "request"],
            JobKind::DatabaseOperation => &["query", "read", "write"],
        }
    }

    /// The resource type a rule pattern must name to address this kind.
    pub fn resource_type(self) -> ResourceType {
        match self {
            JobKind::ShellCommand | JobKind::Script => ResourceType::Process,
            JobKind::FileOperation => ResourceType::File,
            JobKind::ApiCall => ResourceType::Network,
            JobKind::DatabaseOperation => ResourceType::Database,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::ShellCommand => "shell_command",
            JobKind::Script => "script",
            JobKind::FileOperation => "file_operation",
            JobKind::ApiCall => "api_call",
            JobKind::DatabaseOperation => "database_operation",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource namespaces addressable by a rule's `resource` pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    File,
    Process,
    Network,
    Database,
    /// Host-level resources (cpu, memory) consumed by every job.
    System,
}

impl ResourceType {
    /// Whether a rule addressing this resource type can apply to `kind`.
    ///
    /// The correspondence is exact; there is no aliasing between types.
    pub fn applies_to(self, kind: JobKind) -> bool {
        match self {
            ResourceType::System => true,
            other => kind.resource_type() == other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceType::File => "file",
            ResourceType::Process => "process",
            ResourceType::Network => "network",
            ResourceType::Database => "database",
            ResourceType::System => "system",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(ResourceType::File),
            "process" => Ok(ResourceType::Process),
            "network" => Ok(ResourceType::Network),
            "database" => Ok(ResourceType::Database),
            "system" => Ok(ResourceType::System),
            other => Err(format!("unknown resource type '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_implicit_actions_per_kind() {
        assert_eq!(JobKind::ShellCommand.implicit_actions(), &["execute"]);
        assert_eq!(JobKind::Script.implicit_actions(), &["execute"]);
        assert!(JobKind::FileOperation.implicit_actions().contains(&"delete"));
        assert_eq!(JobKind::ApiCall.implicit_actions(), &["connect", "request"]);
        assert!(JobKind::DatabaseOperation
            .implicit_actions()
            .contains(&"query"));
    }

    #[test]
    fn test_resource_correspondence_is_exact() {
        assert!(ResourceType::Process.applies_to(JobKind::ShellCommand));
        assert!(ResourceType::Process.applies_to(JobKind::Script));
        assert!(!ResourceType::Process.applies_to(JobKind::FileOperation));
        assert!(ResourceType::Network.applies_to(JobKind::ApiCall));
        assert!(!ResourceType::Network.applies_to(JobKind::DatabaseOperation));
        assert!(ResourceType::Database.applies_to(JobKind::DatabaseOperation));
    }

    #[test]
    fn test_system_applies_to_every_kind() {
        for kind in JobKind::ALL {
            assert!(ResourceType::System.applies_to(kind), "{kind}");
        }
    }

    #[test]
    fn test_resource_type_parse() {
        assert_eq!("file".parse::<ResourceType>(), Ok(ResourceType::File));
        assert!("filesystem".parse::<ResourceType>().is_err());
    }

    #[test]
    fn test_kind_serde_names() {
        let json = serde_json::to_string(&JobKind::DatabaseOperation).unwrap();
        assert_eq!(json, "\"database_operation\"");
    }
}
