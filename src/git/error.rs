//! Error taxonomy for gateway git operations
//!
//! Every failure raised by the repository manager or the transport selector is a
//! [`GitOpError`]. Each variant maps onto exactly one [`ErrorKind`], which is what
//! travels over the wire and what scripts branch on.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire-level failure kind, named the way scripts see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ErrorKind {
    RepositoryNotFound,
    RepositoryBusy,
    InvalidPath,
    InvalidRequest,
    NothingToCommit,
    IdentityRequired,
    RemoteUnreachable,
    Authentication,
    NonFastForward,
    RemoteRejected,
    CredentialResolution,
    UnsupportedTransport,
    OperationTimeout,
    /// Only raised on the calling side of the bridge
    GatewayUnavailable,
    InternalOperation,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 15] = [
        ErrorKind::RepositoryNotFound,
        ErrorKind::RepositoryBusy,
        ErrorKind::InvalidPath,
        ErrorKind::InvalidRequest,
        ErrorKind::NothingToCommit,
        ErrorKind::IdentityRequired,
        ErrorKind::RemoteUnreachable,
        ErrorKind::Authentication,
        ErrorKind::NonFastForward,
        ErrorKind::RemoteRejected,
        ErrorKind::CredentialResolution,
        ErrorKind::UnsupportedTransport,
        ErrorKind::OperationTimeout,
        ErrorKind::GatewayUnavailable,
        ErrorKind::InternalOperation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RepositoryNotFound => "RepositoryNotFoundError",
            ErrorKind::RepositoryBusy => "RepositoryBusyError",
            ErrorKind::InvalidPath => "InvalidPathError",
            ErrorKind::InvalidRequest => "InvalidRequestError",
            ErrorKind::NothingToCommit => "NothingToCommitError",
            ErrorKind::IdentityRequired => "IdentityRequiredError",
            ErrorKind::RemoteUnreachable => "RemoteUnreachableError",
            ErrorKind::Authentication => "AuthenticationError",
            ErrorKind::NonFastForward => "NonFastForwardError",
            ErrorKind::RemoteRejected => "RemoteRejectedError",
            ErrorKind::CredentialResolution => "CredentialResolutionError",
            ErrorKind::UnsupportedTransport => "UnsupportedTransportError",
            ErrorKind::OperationTimeout => "OperationTimeoutError",
            ErrorKind::GatewayUnavailable => "GatewayUnavailableError",
            ErrorKind::InternalOperation => "InternalOperationError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ErrorKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown error kind '{}'", s))
    }
}

impl TryFrom<String> for ErrorKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ErrorKind> for String {
    fn from(kind: ErrorKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Error type for every repository and transport operation
#[derive(Error, Debug)]
pub enum GitOpError {
    #[error("No git repository at '{0}'")]
    RepositoryNotFound(String),

    #[error("Repository '{0}' is busy")]
    RepositoryBusy(String),

    #[error("Path '{0}' is outside the repository root")]
    InvalidPath(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No staged changes to commit")]
    NothingToCommit,

    #[error("Author name and email are required")]
    IdentityRequired,

    #[error("Remote unreachable: {0}")]
    RemoteUnreachable(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Cannot fast-forward {branch}: local {local} and remote {remote} have diverged")]
    NonFastForward {
        branch: String,
        local: String,
        remote: String,
    },

    #[error("Remote rejected {reference}: {reason}")]
    RemoteRejected { reference: String, reason: String },

    #[error("Credential '{0}' could not be resolved")]
    CredentialResolution(String),

    #[error("Transport backend '{0}' is not available")]
    UnsupportedTransport(String),

    #[error("Operation did not finish within {0:?}")]
    OperationTimeout(Duration),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GitOpError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GitOpError::RepositoryNotFound(_) => ErrorKind::RepositoryNotFound,
            GitOpError::RepositoryBusy(_) => ErrorKind::RepositoryBusy,
            GitOpError::InvalidPath(_) => ErrorKind::InvalidPath,
            GitOpError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            GitOpError::NothingToCommit => ErrorKind::NothingToCommit,
            GitOpError::IdentityRequired => ErrorKind::IdentityRequired,
            GitOpError::RemoteUnreachable(_) => ErrorKind::RemoteUnreachable,
            GitOpError::Authentication(_) => ErrorKind::Authentication,
            GitOpError::NonFastForward { .. } => ErrorKind::NonFastForward,
            GitOpError::RemoteRejected { .. } => ErrorKind::RemoteRejected,
            GitOpError::CredentialResolution(_) => ErrorKind::CredentialResolution,
            GitOpError::UnsupportedTransport(_) => ErrorKind::UnsupportedTransport,
            GitOpError::OperationTimeout(_) => ErrorKind::OperationTimeout,
            GitOpError::Internal(_) => ErrorKind::InternalOperation,
        }
    }
}

impl From<std::io::Error> for GitOpError {
    fn from(e: std::io::Error) -> Self {
        GitOpError::Internal(format!("IO error: {}", e))
    }
}

impl From<tokio::task::JoinError> for GitOpError {
    fn from(e: tokio::task::JoinError) -> Self {
        GitOpError::Internal(format!("Task failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_round_trip() {
        for kind in ErrorKind::ALL {
            assert!(kind.as_str().ends_with("Error"));
            assert_eq!(kind.as_str().parse::<ErrorKind>(), Ok(kind));
        }
        assert!("NoSuchError".parse::<ErrorKind>().is_err());
    }

    #[test]
    fn rejection_keeps_reason_verbatim() {
        let err = GitOpError::RemoteRejected {
            reference: "refs/heads/main".to_string(),
            reason: "protected branch hook declined".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::RemoteRejected);
        assert!(err.to_string().contains("protected branch hook declined"));
    }

    #[test]
    fn io_errors_become_internal() {
        let err: GitOpError = std::io::Error::new(std::io::ErrorKind::Other, "disk gone").into();
        assert_eq!(err.kind(), ErrorKind::InternalOperation);
        assert!(err.to_string().contains("disk gone"));
    }
}
