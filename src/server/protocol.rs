use serde::{Deserialize, Serialize};

use crate::git::{
    BranchList, ErrorKind, FileStatusEntry, GitOpError, MergeOutcome, Opened, RefUpdate,
    StatusReport,
};
use crate::transport::{backend_available, CredentialReference, SshBackend};

/// Protocol version: 1 (MessagePack, named fields)
pub const PROTOCOL_VERSION: u32 = 1;

/// A client frame with an optional correlation id.
///
/// The body is flattened, so a bare [`ClientMessage`] parses too (id = None).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(flatten)]
    pub body: ClientMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    GitOperation {
        path: String,
        request: GitOperationRequest,
    },
}

/// One git operation against the repository at `path` (relative to the gateway root)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitRequest {
    pub path: String,
    pub request: GitOperationRequest,
}

impl From<GitRequest> for ClientMessage {
    fn from(r: GitRequest) -> Self {
        ClientMessage::GitOperation {
            path: r.path,
            request: r.request,
        }
    }
}

/// Operation kind plus its parameters. Credentials travel by reference only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation_kind", rename_all = "snake_case")]
pub enum GitOperationRequest {
    /// Open the repository, cloning `remote_url` first when there is none
    #[serde(alias = "open")]
    Clone {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        remote_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branch: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        credential: Option<CredentialReference>,
    },
    Fetch {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        remote: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        credential: Option<CredentialReference>,
    },
    Pull {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        remote: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branch: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        credential: Option<CredentialReference>,
    },
    Push {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        remote: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branch: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        credential: Option<CredentialReference>,
    },
    Commit {
        message: String,
        #[serde(default)]
        author_name: String,
        #[serde(default)]
        author_email: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        paths: Vec<String>,
    },
    Status,
    Branches,
    Close,
}

impl GitOperationRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            GitOperationRequest::Clone { .. } => "clone",
            GitOperationRequest::Fetch { .. } => "fetch",
            GitOperationRequest::Pull { .. } => "pull",
            GitOperationRequest::Push { .. } => "push",
            GitOperationRequest::Commit { .. } => "commit",
            GitOperationRequest::Status => "status",
            GitOperationRequest::Branches => "branches",
            GitOperationRequest::Close => "close",
        }
    }
}

/// Success payload, one shape per operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GitOperationResult {
    Opened {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        head: Option<String>,
        cloned: bool,
    },
    Status {
        entries: Vec<FileStatusEntry>,
        has_staged_changes: bool,
    },
    Committed {
        commit: String,
    },
    Fetched {
        updates: Vec<RefUpdate>,
    },
    Pulled {
        outcome: MergeOutcome,
        updates: Vec<RefUpdate>,
    },
    Pushed {
        updates: Vec<RefUpdate>,
    },
    Branches {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current: Option<String>,
        local: Vec<String>,
        remote: Vec<String>,
    },
    Closed {
        evicted: bool,
    },
}

impl From<Opened> for GitOperationResult {
    fn from(o: Opened) -> Self {
        GitOperationResult::Opened {
            path: o.path,
            head: o.head,
            cloned: o.cloned,
        }
    }
}

impl From<StatusReport> for GitOperationResult {
    fn from(s: StatusReport) -> Self {
        GitOperationResult::Status {
            entries: s.entries,
            has_staged_changes: s.has_staged_changes,
        }
    }
}

impl From<BranchList> for GitOperationResult {
    fn from(b: BranchList) -> Self {
        GitOperationResult::Branches {
            current: b.current,
            local: b.local,
            remote: b.remote,
        }
    }
}

/// `{status: success, payload}` or `{status: failure, error_kind, error_message}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GitResponse {
    Success {
        payload: GitOperationResult,
    },
    Failure {
        error_kind: ErrorKind,
        error_message: String,
    },
}

impl GitResponse {
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        GitResponse::Failure {
            error_kind: kind,
            error_message: message.into(),
        }
    }

    pub fn into_result(self) -> Result<GitOperationResult, (ErrorKind, String)> {
        match self {
            GitResponse::Success { payload } => Ok(payload),
            GitResponse::Failure {
                error_kind,
                error_message,
            } => Err((error_kind, error_message)),
        }
    }
}

impl From<Result<GitOperationResult, GitOpError>> for GitResponse {
    fn from(result: Result<GitOperationResult, GitOpError>) -> Self {
        match result {
            Ok(payload) => GitResponse::Success { payload },
            Err(e) => GitResponse::failure(e.kind(), e.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Hello {
        version: u32,
        capabilities: Vec<String>,
    },
    Pong,
    GitResult {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        response: GitResponse,
    },
    Error {
        code: String,
        message: String,
    },
}

pub fn capabilities() -> Vec<String> {
    let mut caps: Vec<String> = [
        "git_clone",
        "git_fetch",
        "git_pull_ff_only",
        "git_push",
        "git_commit",
        "git_status",
        "git_branches",
        "git_close",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect();
    for backend in [SshBackend::OpenSsh, SshBackend::Libssh2] {
        if backend_available(backend) {
            caps.push(format!("transport_{}", backend));
        }
    }
    caps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_round_trip_msgpack() {
        let envelope = RequestEnvelope {
            id: Some(7),
            body: ClientMessage::GitOperation {
                path: "projects/alpha".to_string(),
                request: GitOperationRequest::Push {
                    remote: None,
                    branch: Some("main".to_string()),
                    credential: Some(CredentialReference::new("deploy")),
                },
            },
        };
        let bytes = rmp_serde::to_vec_named(&envelope).unwrap();
        let decoded: RequestEnvelope = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded.id, Some(7));
        match decoded.body {
            ClientMessage::GitOperation { path, request } => {
                assert_eq!(path, "projects/alpha");
                assert_eq!(
                    request,
                    GitOperationRequest::Push {
                        remote: None,
                        branch: Some("main".to_string()),
                        credential: Some(CredentialReference::new("deploy")),
                    }
                );
            }
            other => panic!("Unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_bare_ping_parses_without_id() {
        let json = r#"{"type":"ping"}"#;
        let envelope: RequestEnvelope = serde_json::from_str(json).unwrap();
        assert!(envelope.id.is_none());
        assert!(matches!(envelope.body, ClientMessage::Ping));
    }

    #[test]
    fn test_failure_wire_shape() {
        let response: GitResponse = Err(GitOpError::NothingToCommit).into();
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"], "failure");
        assert_eq!(value["error_kind"], "NothingToCommitError");
        assert!(value["error_message"].as_str().unwrap().contains("No staged"));
    }

    #[test]
    fn test_open_alias_and_defaults() {
        let json = r#"{"operation_kind":"open"}"#;
        let request: GitOperationRequest = serde_json::from_str(json).unwrap();
        assert_eq!(
            request,
            GitOperationRequest::Clone {
                remote_url: None,
                branch: None,
                credential: None
            }
        );
        let commit: GitOperationRequest =
            serde_json::from_str(r#"{"operation_kind":"commit","message":"m"}"#).unwrap();
        assert_eq!(commit.kind(), "commit");
    }

    #[test]
    fn test_result_payload_msgpack() {
        let response = GitResponse::Success {
            payload: GitOperationResult::Pulled {
                outcome: MergeOutcome::FastForward {
                    from: Some("a".into()),
                    to: "b".into(),
                },
                updates: vec![],
            },
        };
        let msg = ServerMessage::GitResult {
            id: Some(1),
            response: response.clone(),
        };
        let bytes = rmp_serde::to_vec_named(&msg).unwrap();
        match rmp_serde::from_slice::<ServerMessage>(&bytes).unwrap() {
            ServerMessage::GitResult { id, response: got } => {
                assert_eq!(id, Some(1));
                assert_eq!(got, response);
            }
            other => panic!("Unexpected message: {:?}", other),
        }
    }
}
