//! The external submission shape and its conversion into a descriptor.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::descriptor::{JobDescriptor, JobId, JobPayload};
use super::kind::JobKind;

/// Errors converting an external [`JobRequest`] into a [`JobDescriptor`].
#[derive(Debug, thiserror::Error)]
pub enum JobRequestError {
    #[error("payload for kind '{kind}' must be a JSON object")]
    PayloadNotObject { kind: JobKind },

    #[error("invalid payload for kind '{kind}': {source}")]
    InvalidPayload {
        kind: JobKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("job id must not be empty")]
    EmptyId,
}

/// Job submission as supplied by front ends:
/// `{ id?, kind, payload, requested_permissions[], timeout_ms?, working_directory? }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub kind: JobKind,
    pub payload: Value,
    #[serde(default, alias = "requestedPermissions")]
    pub requested_permissions: BTreeSet<String>,
    #[serde(default, alias = "timeoutMs", skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(
        default,
        alias = "workingDirectory",
        skip_serializing_if = "Option::is_none"
    )]
    pub working_directory: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
}

impl TryFrom<JobRequest> for JobDescriptor {
    type Error = JobRequestError;

    fn try_from(request: JobRequest) -> Result<Self, Self::Error> {
        let kind = request.kind;
        let mut fields = match request.payload {
            Value::Object(map) => map,
            _ => return Err(JobRequestError::PayloadNotObject { kind }),
        };

        // Payload keys the typed variant does not know become attributes, so
        // conditions can still see them.
        fields.insert("kind".to_string(), Value::String(kind.as_str().to_string()));
        let payload: JobPayload = serde_json::from_value(Value::Object(fields.clone()))
            .map_err(|source| JobRequestError::InvalidPayload { kind, source })?;
        let known = serde_json::to_value(&payload)
            .map_err(|source| JobRequestError::InvalidPayload { kind, source })?;

        let mut attributes = request.attributes;
        for (key, value) in fields {
            if known.get(&key).is_none() && key != "kind" {
                attributes.entry(key).or_insert(value);
            }
        }

        let id = match request.id {
            Some(id) if id.trim().is_empty() => return Err(JobRequestError::EmptyId),
            Some(id) => JobId::from(id),
            None => JobId::new(),
        };

        Ok(JobDescriptor {
            id,
            payload,
            requested_permissions: request.requested_permissions,
            attributes,
            timeout_ms: request.timeout_ms,
            working_directory: request.working_directory,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(value: Value) -> JobRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_request_converts_and_generates_id() {
        let req = request(json!({
            "kind": "shell_command",
            "payload": {"command": "echo hello"},
            "requestedPermissions": ["process:execute"],
            "timeoutMs": 500
        }));
        let job = JobDescriptor::try_from(req).unwrap();
        assert_eq!(job.kind(), JobKind::ShellCommand);
        assert_eq!(job.timeout_ms, Some(500));
        assert!(!job.id.as_str().is_empty());
        assert!(job.requested_permissions.contains("process:execute"));
    }

    #[test]
    fn test_request_keeps_supplied_id() {
        let req = request(json!({
            "id": "nightly-42",
            "kind": "file_operation",
            "payload": {"operation": "write", "path": "/tmp/out", "content": "x"}
        }));
        let job = JobDescriptor::try_from(req).unwrap();
        assert_eq!(job.id.as_str(), "nightly-42");
    }

    #[test]
    fn test_unknown_payload_keys_become_attributes() {
        let req = request(json!({
            "kind": "shell_command",
            "payload": {"command": "stress", "usage": 95}
        }));
        let job = JobDescriptor::try_from(req).unwrap();
        assert_eq!(job.resolve_field("usage"), Some(json!(95)));
        assert!(!job.attributes.contains_key("command"));
    }

    #[test]
    fn test_payload_must_fit_kind() {
        let req = request(json!({
            "kind": "file_operation",
            "payload": {"command": "ls"}
        }));
        let err = JobDescriptor::try_from(req).unwrap_err();
        assert!(matches!(err, JobRequestError::InvalidPayload { .. }));
    }

    #[test]
    fn test_non_object_payload_rejected() {
        let req = request(json!({"kind": "script", "payload": "echo"}));
        assert!(matches!(
            JobDescriptor::try_from(req),
            Err(JobRequestError::PayloadNotObject { .. })
        ));
    }

    #[test]
    fn test_empty_id_rejected() {
        let req = request(json!({
            "id": " ",
            "kind": "shell_command",
            "payload": {"command": "ls"}
        }));
        assert!(matches!(
            JobDescriptor::try_from(req),
            Err(JobRequestError::EmptyId)
        ));
    }
}
