//! The job descriptor: what to run, with which constraints.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::kind::JobKind;

/// Opaque, immutable job identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

/// A file path whose `..` components climb above its root.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("path '{path}' climbs above its root")]
pub struct PathEscape {
    pub path: String,
}

/// Lexically normalise `path`, joining it onto `base` when relative.
///
/// `.` is dropped and `..` removes the previous component. No filesystem
/// access, so symlinks are not followed.
pub fn normalize_path(path: &Path, base: Option<&Path>) -> Result<PathBuf, PathEscape> {
    let joined = match base {
        Some(base) if path.is_relative() => base.join(path),
        _ => path.to_path_buf(),
    };

    let mut out = PathBuf::new();
    let mut depth = 0usize;
    for component in joined.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err(PathEscape {
                        path: path.display().to_string(),
                    });
                }
                out.pop();
                depth -= 1;
            }
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
        }
    }
    Ok(out)
}

impl JobId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellCommandPayload {
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptPayload {
    pub body: String,
    /// Interpreter executable; `sh` when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl ScriptPayload {
    pub fn interpreter(&self) -> &str {
        self.interpreter.as_deref().unwrap_or("sh")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOperationKind {
    Read,
    Write,
    Create,
    Delete,
}

impl FileOperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FileOperationKind::Read => "read",
            FileOperationKind::Write => "write",
            FileOperationKind::Create => "create",
            FileOperationKind::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOperationPayload {
    pub operation: FileOperationKind,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiCallPayload {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl ApiCallPayload {
    /// Host portion of the URL, if it parses.
    pub fn host(&self) -> Option<String> {
        reqwest::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseOperationKind {
    Query,
    Read,
    Write,
}

impl DatabaseOperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DatabaseOperationKind::Query => "query",
            DatabaseOperationKind::Read => "read",
            DatabaseOperationKind::Write => "write",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseOperationPayload {
    pub operation: DatabaseOperationKind,
    /// Table, collection or logical database the operation addresses.
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement: Option<String>,
}

/// Kind-specific job payload. The variant *is* the job kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    ShellCommand(ShellCommandPayload),
    Script(ScriptPayload),
    FileOperation(FileOperationPayload),
    ApiCall(ApiCallPayload),
    DatabaseOperation(DatabaseOperationPayload),
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::ShellCommand(_) => JobKind::ShellCommand,
            JobPayload::Script(_) => JobKind::Script,
            JobPayload::FileOperation(_) => JobKind::FileOperation,
            JobPayload::ApiCall(_) => JobKind::ApiCall,
            JobPayload::DatabaseOperation(_) => JobKind::DatabaseOperation,
        }
    }
}

/// A single unit of work submitted for policy-gated execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    #[serde(default)]
    pub id: JobId,
    pub payload: JobPayload,
    /// Capabilities the caller claims to need. Never trusted by evaluation.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub requested_permissions: BTreeSet<String>,
    /// Free-form keys visible to rule conditions (e.g. `usage`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
}

impl JobDescriptor {
    pub fn new(payload: JobPayload) -> Self {
        Self {
            id: JobId::new(),
            payload,
            requested_permissions: BTreeSet::new(),
            attributes: BTreeMap::new(),
            timeout_ms: None,
            working_directory: None,
        }
    }

    pub fn shell(command: impl Into<String>) -> Self {
        Self::new(JobPayload::ShellCommand(ShellCommandPayload {
            command: command.into(),
        }))
    }

    pub fn script(body: impl Into<String>, interpreter: Option<String>) -> Self {
        Self::new(JobPayload::Script(ScriptPayload {
            body: body.into(),
            interpreter,
            args: Vec::new(),
        }))
    }

    pub fn file(
        operation: FileOperationKind,
        path: impl Into<String>,
        content: Option<String>,
    ) -> Self {
        Self::new(JobPayload::FileOperation(FileOperationPayload {
            operation,
            path: path.into(),
            content,
        }))
    }

    pub fn api_call(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(JobPayload::ApiCall(ApiCallPayload {
            method: method.into(),
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
        }))
    }

    pub fn database(
        operation: DatabaseOperationKind,
        target: impl Into<String>,
        statement: Option<String>,
    ) -> Self {
        Self::new(JobPayload::DatabaseOperation(DatabaseOperationPayload {
            operation,
            target: target.into(),
            statement,
        }))
    }

    pub fn with_id(mut self, id: impl Into<JobId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.requested_permissions.insert(permission.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> JobKind {
        self.payload.kind()
    }

    /// The path a file job actually touches: joined onto
    /// `working_directory` when relative, with `.` and `..` collapsed.
    ///
    /// `None` for every other kind. A relative result is resolved against
    /// the sandbox's scratch directory at run time.
    pub fn effective_path(&self) -> Option<Result<PathBuf, PathEscape>> {
        match &self.payload {
            JobPayload::FileOperation(p) => Some(normalize_path(
                Path::new(&p.path),
                self.working_directory.as_deref(),
            )),
            _ => None,
        }
    }

    /// The string a rule's resource glob is matched against.
    ///
    /// Shell jobs expose the command, scripts their interpreter, file jobs the
    /// effective path (raw path when it escapes its root), API calls the URL host (raw URL when it does not parse) and
    /// database jobs the target.
    pub fn resource_subject(&self) -> String {
        match &self.payload {
            JobPayload::ShellCommand(p) => p.command.clone(),
            JobPayload::Script(p) => p.interpreter().to_string(),
            JobPayload::FileOperation(p) => match self.effective_path() {
                Some(Ok(path)) => path.display().to_string(),
                _ => p.path.clone(),
            },
            JobPayload::ApiCall(p) => p.host().unwrap_or_else(|| p.url.clone()),
            JobPayload::DatabaseOperation(p) => p.target.clone(),
        }
    }

    /// Resolve a condition field to a value on this job.
    ///
    /// Named fields come from the payload; anything else is looked up in
    /// `attributes`. Returns `None` when the job carries no such value.
    pub fn resolve_field(&self, field: &str) -> Option<Value> {
        let working_dir = || {
            self.working_directory
                .as_ref()
                .map(|d| Value::String(d.display().to_string()))
        };

        let from_payload = match (field, &self.payload) {
            ("command", JobPayload::ShellCommand(p)) => Some(Value::String(p.command.clone())),
            ("command", JobPayload::Script(p)) => Some(Value::String(p.body.clone())),
            ("interpreter", JobPayload::Script(p)) => {
                Some(Value::String(p.interpreter().to_string()))
            }
            ("path", JobPayload::FileOperation(_)) => match self.effective_path() {
                Some(Ok(path)) => Some(Value::String(path.display().to_string())),
                _ => None,
            },
            ("path", _) | ("working_directory", _) | ("workingDirectory", _) => working_dir(),
            ("operation", JobPayload::FileOperation(p)) => {
                Some(Value::String(p.operation.as_str().to_string()))
            }
            ("operation", JobPayload::DatabaseOperation(p)) => {
                Some(Value::String(p.operation.as_str().to_string()))
            }
            ("destination", JobPayload::ApiCall(p)) | ("host", JobPayload::ApiCall(p)) => {
                p.host().map(Value::String)
            }
            ("url", JobPayload::ApiCall(p)) => Some(Value::String(p.url.clone())),
            ("method", JobPayload::ApiCall(p)) => Some(Value::String(p.method.to_uppercase())),
            ("target", JobPayload::DatabaseOperation(p)) => Some(Value::String(p.target.clone())),
            ("statement", JobPayload::DatabaseOperation(p)) => {
                p.statement.clone().map(Value::String)
            }
            _ => None,
        };

        from_payload.or_else(|| self.attributes.get(field).cloned())
    }

    /// Requested permissions that do not cover any implicit action.
    ///
    /// Purely informative: surfaced in logs, never in decisions.
    pub fn uncovered_actions(&self) -> Vec<&'static str> {
        let kind = self.kind();
        let resource = kind.resource_type().as_str();
        kind.implicit_actions()
            .iter()
            .copied()
            .filter(|action| {
                !self.requested_permissions.iter().any(|p| {
                    p == resource
                        || p == action
                        || *p == format!("{resource}:{action}")
                        || *p == format!("{resource}:*")
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_derived_from_payload() {
        assert_eq!(JobDescriptor::shell("ls").kind(), JobKind::ShellCommand);
        assert_eq!(
            JobDescriptor::file(FileOperationKind::Read, "/tmp/a", None).kind(),
            JobKind::FileOperation
        );
        assert_eq!(
            JobDescriptor::api_call("GET", "https://example.com").kind(),
            JobKind::ApiCall
        );
    }

    #[test]
    fn test_ids_are_unique() {
        let a = JobDescriptor::shell("ls");
        let b = JobDescriptor::shell("ls");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_resolve_named_fields() {
        let job = JobDescriptor::shell("echo hi").with_working_directory("/srv");
        assert_eq!(job.resolve_field("command"), Some(json!("echo hi")));
        assert_eq!(job.resolve_field("path"), Some(json!("/srv")));

        let file = JobDescriptor::file(FileOperationKind::Write, "/tmp/x", None);
        assert_eq!(file.resolve_field("path"), Some(json!("/tmp/x")));
        assert_eq!(file.resolve_field("operation"), Some(json!("write")));
    }

    #[test]
    fn test_file_path_resolved_against_working_directory() {
        let job = JobDescriptor::file(FileOperationKind::Write, "passwd", None)
            .with_working_directory("/etc");
        assert_eq!(job.resolve_field("path"), Some(json!("/etc/passwd")));
        assert_eq!(job.resource_subject(), "/etc/passwd");

        let absolute = JobDescriptor::file(FileOperationKind::Write, "/tmp/x", None)
            .with_working_directory("/etc");
        assert_eq!(absolute.resource_subject(), "/tmp/x");
    }

    #[test]
    fn test_dot_segments_collapse() {
        let job =
            JobDescriptor::file(FileOperationKind::Write, "/tmp/./a/../../etc/passwd", None);
        assert_eq!(job.resource_subject(), "/etc/passwd");
        assert_eq!(job.resolve_field("path"), Some(json!("/etc/passwd")));

        let relative = JobDescriptor::file(FileOperationKind::Read, "a/./b/../c.txt", None);
        assert_eq!(relative.effective_path(), Some(Ok(PathBuf::from("a/c.txt"))));
    }

    #[test]
    fn test_path_climbing_above_root_is_refused() {
        let job = JobDescriptor::file(FileOperationKind::Write, "/tmp/../../etc/passwd", None);
        assert!(matches!(job.effective_path(), Some(Err(PathEscape { .. }))));
        assert_eq!(job.resolve_field("path"), None);

        let relative = JobDescriptor::file(FileOperationKind::Read, "../secret", None);
        assert!(matches!(relative.effective_path(), Some(Err(_))));

        assert_eq!(
            normalize_path(Path::new(".."), Some(Path::new("/srv"))),
            Ok(PathBuf::from("/"))
        );
        assert!(JobDescriptor::shell("ls").effective_path().is_none());
    }

    #[test]
    fn test_resolve_destination_is_host() {
        let job = JobDescriptor::api_call("post", "https://api.example.com:8443/v1/items");
        assert_eq!(job.resolve_field("destination"), Some(json!("api.example.com")));
        assert_eq!(job.resolve_field("method"), Some(json!("POST")));
        assert_eq!(job.resource_subject(), "api.example.com");
    }

    #[test]
    fn test_resolve_falls_back_to_attributes() {
        let job = JobDescriptor::shell("ls").with_attribute("usage", 95);
        assert_eq!(job.resolve_field("usage"), Some(json!(95)));
        assert_eq!(job.resolve_field("missing"), None);
    }

    #[test]
    fn test_payload_wire_shape() {
        let job = JobDescriptor::shell("ls").with_id("job-1");
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["id"], "job-1");
        assert_eq!(value["payload"]["kind"], "shell_command");
        assert_eq!(value["payload"]["command"], "ls");
    }

    #[test]
    fn test_uncovered_actions() {
        let job = JobDescriptor::shell("ls").with_permission("process:execute");
        assert!(job.uncovered_actions().is_empty());

        let job = JobDescriptor::file(FileOperationKind::Write, "/tmp/x", None)
            .with_permission("file:write");
        let uncovered = job.uncovered_actions();
        assert!(uncovered.contains(&"delete"));
        assert!(!uncovered.contains(&"write"));
    }
}
