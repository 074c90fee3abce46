//! Scope bridge: the calling side of a gateway git operation
//!
//! Scripts in client or designer scope call [`ScopeBridge::invoke`], which blocks on
//! a [`GatewayChannel`] round trip and turns every failure, gateway-side or
//! channel-side, into a [`GitFailure`] carrying a typed [`ErrorKind`].

pub mod channel;
pub mod script;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::git::ErrorKind;
use crate::server::protocol::{GitOperationRequest, GitOperationResult, GitRequest};

pub use channel::{ChannelError, GatewayChannel, LocalChannel, WebSocketChannel};
pub use script::GitScriptModule;

/// Extra time the caller waits beyond the gateway's own operation timeout, so a
/// gateway-side timeout arrives as a response rather than a channel timeout
pub const RESPONSE_GRACE: Duration = Duration::from_secs(5);

/// Typed failure surfaced to scripts
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct GitFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl GitFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<ChannelError> for GitFailure {
    fn from(e: ChannelError) -> Self {
        let kind = match &e {
            ChannelError::Unavailable(_) => ErrorKind::GatewayUnavailable,
            ChannelError::Timeout(_) => ErrorKind::OperationTimeout,
            ChannelError::Protocol(_) => ErrorKind::InternalOperation,
        };
        GitFailure::new(kind, e.to_string())
    }
}

#[derive(Clone)]
pub struct ScopeBridge {
    channel: Arc<dyn GatewayChannel>,
    call_timeout: Duration,
}

impl ScopeBridge {
    /// Bridge for a gateway whose per-operation timeout is `gateway_timeout`
    pub fn new(channel: Arc<dyn GatewayChannel>, gateway_timeout: Duration) -> Self {
        Self {
            channel,
            call_timeout: gateway_timeout + RESPONSE_GRACE,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Run `request` against the repository at `path` and wait for the outcome.
    pub fn invoke(
        &self,
        path: &str,
        request: GitOperationRequest,
    ) -> Result<GitOperationResult, GitFailure> {
        let kind = request.kind();
        let request = GitRequest {
            path: path.to_string(),
            request,
        };
        let response = self.channel.call(&request, self.call_timeout)?;
        let result = response
            .into_result()
            .map_err(|(kind, message)| GitFailure::new(kind, message));
        if let Err(failure) = &result {
            debug!(operation = kind, path, kind = %failure.kind, "gateway reported failure");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::protocol::GitResponse;
    use std::sync::Mutex;

    /// Channel that replays a canned outcome and records what it was asked
    struct Scripted {
        reply: Mutex<Option<Result<GitResponse, ChannelError>>>,
        seen: Mutex<Vec<(GitRequest, Duration)>>,
    }

    impl GatewayChannel for Scripted {
        fn call(
            &self,
            request: &GitRequest,
            timeout: Duration,
        ) -> Result<GitResponse, ChannelError> {
            self.seen.lock().unwrap().push((request.clone(), timeout));
            self.reply.lock().unwrap().take().unwrap()
        }
    }

    fn bridge(reply: Result<GitResponse, ChannelError>) -> (ScopeBridge, Arc<Scripted>) {
        let channel = Arc::new(Scripted {
            reply: Mutex::new(Some(reply)),
            seen: Mutex::new(Vec::new()),
        });
        (
            ScopeBridge::new(channel.clone(), Duration::from_secs(10)),
            channel,
        )
    }

    #[test]
    fn test_gateway_failure_keeps_kind() {
        let (bridge, channel) = bridge(Ok(GitResponse::failure(
            ErrorKind::NonFastForward,
            "diverged",
        )));
        let err = bridge
            .invoke("repo", GitOperationRequest::Status)
            .unwrap_err();
        assert_eq!(err, GitFailure::new(ErrorKind::NonFastForward, "diverged"));

        let seen = channel.seen.lock().unwrap();
        assert_eq!(seen[0].0.path, "repo");
        assert_eq!(seen[0].1, Duration::from_secs(10) + RESPONSE_GRACE);
    }

    #[test]
    fn test_channel_errors_map_to_kinds() {
        let (b, _) = bridge(Err(ChannelError::Unavailable("refused".into())));
        assert_eq!(
            b.invoke("r", GitOperationRequest::Status).unwrap_err().kind,
            ErrorKind::GatewayUnavailable
        );
        let (b, _) = bridge(Err(ChannelError::Timeout(Duration::from_secs(1))));
        assert_eq!(
            b.invoke("r", GitOperationRequest::Status).unwrap_err().kind,
            ErrorKind::OperationTimeout
        );
        let (b, _) = bridge(Err(ChannelError::Protocol("garbage".into())));
        assert_eq!(
            b.invoke("r", GitOperationRequest::Status).unwrap_err().kind,
            ErrorKind::InternalOperation
        );
    }

    #[test]
    fn test_success_payload_passes_through() {
        let (b, _) = bridge(Ok(GitResponse::Success {
            payload: GitOperationResult::Closed { evicted: true },
        }));
        assert_eq!(
            b.invoke("r", GitOperationRequest::Close).unwrap(),
            GitOperationResult::Closed { evicted: true }
        );
    }
}
