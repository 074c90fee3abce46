//! Gateway operation handler
//!
//! Every request moves through `Received -> Validated -> Dispatched` and ends in
//! `Completed` or `Failed`. Dispatch runs the blocking git work on `spawn_blocking`
//! under a per-operation deadline; the repository manager bounds how many run at once.
//! When the deadline passes the caller gets `OperationTimeoutError` while the work
//! itself is left to finish; its ticket is marked abandoned so the repository
//! manager keeps the handle busy until it does.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info_span, warn, Instrument};

use super::protocol::{GitOperationRequest, GitOperationResult, GitRequest, GitResponse};
use crate::git::utils::validate_ref_component;
use crate::git::{CommitParams, GitOpError, OperationTicket, RepositoryManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestState {
    Received,
    Validated,
    Dispatched,
    Completed,
    Failed,
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestState::Received => "received",
            RequestState::Validated => "validated",
            RequestState::Dispatched => "dispatched",
            RequestState::Completed => "completed",
            RequestState::Failed => "failed",
        };
        f.write_str(s)
    }
}

pub struct OperationHandler {
    manager: Arc<RepositoryManager>,
    timeout: Duration,
}

impl OperationHandler {
    pub fn new(manager: Arc<RepositoryManager>, timeout: Duration) -> Self {
        Self { manager, timeout }
    }

    pub fn manager(&self) -> &Arc<RepositoryManager> {
        &self.manager
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one request to a wire response
    pub async fn handle(&self, id: Option<u64>, request: GitRequest) -> GitResponse {
        let span = info_span!(
            "git_op",
            id = ?id,
            operation = request.request.kind(),
            path = %request.path
        );
        self.execute(request).instrument(span).await.into()
    }

    pub async fn execute(&self, request: GitRequest) -> Result<GitOperationResult, GitOpError> {
        debug!(state = %RequestState::Received);

        if let Err(e) = self.validate(&request) {
            debug!(state = %RequestState::Failed, "validation failed");
            warn!(kind = %e.kind(), "{}", e);
            return Err(e);
        }
        debug!(state = %RequestState::Validated);

        let ticket = OperationTicket::new();
        debug!(state = %RequestState::Dispatched);
        let result = match tokio::time::timeout(
            self.timeout,
            self.run_on_worker(request, ticket.clone()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                ticket.abandon();
                warn!(timeout = ?self.timeout, "operation timed out; left running in the background");
                Err(GitOpError::OperationTimeout(self.timeout))
            }
        };

        match &result {
            Ok(_) => debug!(state = %RequestState::Completed),
            Err(e) => {
                debug!(state = %RequestState::Failed);
                warn!(kind = %e.kind(), "{}", e);
            }
        }
        result
    }

    /// Request shape and path confinement, checked before any work is queued
    fn validate(&self, request: &GitRequest) -> Result<(), GitOpError> {
        self.manager.resolve_path(&request.path)?;

        let check_remote = |remote: &Option<String>| match remote {
            Some(r) => validate_ref_component("remote", r),
            None => Ok(()),
        };
        let check_branch = |branch: &Option<String>| match branch {
            Some(b) => validate_ref_component("branch", b),
            None => Ok(()),
        };

        match &request.request {
            GitOperationRequest::Clone {
                remote_url, branch, ..
            } => {
                if remote_url.as_deref().is_some_and(|u| u.trim().is_empty()) {
                    return Err(GitOpError::InvalidRequest("remote URL is empty".to_string()));
                }
                check_branch(branch)
            }
            GitOperationRequest::Fetch { remote, .. } => check_remote(remote),
            GitOperationRequest::Pull { remote, branch, .. }
            | GitOperationRequest::Push { remote, branch, .. } => {
                check_remote(remote)?;
                check_branch(branch)
            }
            GitOperationRequest::Commit { message, paths, .. } => {
                if message.trim().is_empty() {
                    return Err(GitOpError::InvalidRequest(
                        "commit message cannot be empty".to_string(),
                    ));
                }
                if paths.iter().any(|p| p.trim().is_empty()) {
                    return Err(GitOpError::InvalidRequest("empty path in commit".to_string()));
                }
                Ok(())
            }
            GitOperationRequest::Status
            | GitOperationRequest::Branches
            | GitOperationRequest::Close => Ok(()),
        }
    }

    async fn run_on_worker(
        &self,
        request: GitRequest,
        ticket: OperationTicket,
    ) -> Result<GitOperationResult, GitOpError> {
        let manager = self.manager.clone();
        let span = tracing::Span::current();

        tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            dispatch(&manager, request, &ticket)
        })
        .await?
    }
}

fn dispatch(
    manager: &RepositoryManager,
    request: GitRequest,
    ticket: &OperationTicket,
) -> Result<GitOperationResult, GitOpError> {
    let path = request.path.as_str();
    match request.request {
        GitOperationRequest::Clone {
            remote_url,
            branch,
            credential,
        } => manager
            .open_or_clone(
                path,
                remote_url.as_deref(),
                branch.as_deref(),
                credential.as_ref(),
                ticket,
            )
            .map(Into::into),
        GitOperationRequest::Fetch { remote, credential } => manager
            .fetch(path, remote.as_deref(), credential.as_ref(), ticket)
            .map(|updates| GitOperationResult::Fetched { updates }),
        GitOperationRequest::Pull {
            remote,
            branch,
            credential,
        } => manager
            .pull(
                path,
                remote.as_deref(),
                branch.as_deref(),
                credential.as_ref(),
                ticket,
            )
            .map(|(outcome, updates)| GitOperationResult::Pulled { outcome, updates }),
        GitOperationRequest::Push {
            remote,
            branch,
            credential,
        } => manager
            .push(
                path,
                remote.as_deref(),
                branch.as_deref(),
                credential.as_ref(),
                ticket,
            )
            .map(|updates| GitOperationResult::Pushed { updates }),
        GitOperationRequest::Commit {
            message,
            author_name,
            author_email,
            paths,
        } => {
            let params = CommitParams {
                message,
                author_name,
                author_email,
                paths,
            };
            manager
                .commit(path, &params, ticket)
                .map(|commit| GitOperationResult::Committed { commit })
        }
        GitOperationRequest::Status => manager.status(path, ticket).map(Into::into),
        GitOperationRequest::Branches => manager.branches(path, ticket).map(Into::into),
        GitOperationRequest::Close => manager
            .close(path)
            .map(|evicted| GitOperationResult::Closed { evicted }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::{BusyMode, ErrorKind};
    use crate::transport::{ConfigCredentialStore, TransportConfig, TransportSelector};

    fn handler(root: &std::path::Path, timeout: Duration) -> OperationHandler {
        let manager = RepositoryManager::new(
            root,
            BusyMode::Wait,
            TransportConfig::default(),
            TransportSelector::new(Arc::new(ConfigCredentialStore::default())),
        )
        .unwrap()
        .with_worker_limit(2);
        OperationHandler::new(Arc::new(manager), timeout)
    }

    fn init_repo(h: &OperationHandler, name: &str) {
        let repo = h.manager().root().join(name);
        std::fs::create_dir_all(&repo).unwrap();
        assert!(std::process::Command::new("git")
            .args(["init", "--quiet"])
            .current_dir(&repo)
            .status()
            .unwrap()
            .success());
    }

    fn request(path: &str, request: GitOperationRequest) -> GitRequest {
        GitRequest {
            path: path.to_string(),
            request,
        }
    }

    #[tokio::test]
    async fn test_path_outside_root_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let h = handler(dir.path(), Duration::from_secs(5));
        let response = h
            .handle(Some(1), request("../escape", GitOperationRequest::Status))
            .await;
        assert_eq!(
            response.into_result().unwrap_err().0,
            ErrorKind::InvalidPath
        );
    }

    #[tokio::test]
    async fn test_missing_repository() {
        let dir = tempfile::tempdir().unwrap();
        let h = handler(dir.path(), Duration::from_secs(5));
        let err = h
            .execute(request("nothing-here", GitOperationRequest::Status))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RepositoryNotFound);
    }

    #[tokio::test]
    async fn test_empty_commit_message_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let h = handler(dir.path(), Duration::from_secs(5));
        let err = h
            .execute(request(
                "repo",
                GitOperationRequest::Commit {
                    message: "  ".to_string(),
                    author_name: "A".to_string(),
                    author_email: "a@example.com".to_string(),
                    paths: vec![],
                },
            ))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn test_timeout_abandons_queued_operation() {
        let dir = tempfile::tempdir().unwrap();
        let h = handler(dir.path(), Duration::from_millis(200));
        init_repo(&h, "repo");

        let guard = h.manager().lock("repo", &OperationTicket::new()).unwrap();
        let err = h
            .execute(request("repo", GitOperationRequest::Status))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OperationTimeout);
        drop(guard);

        let ok = h.execute(request("repo", GitOperationRequest::Status)).await;
        assert!(ok.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_waiters_on_busy_repository_do_not_starve_others() {
        let dir = tempfile::tempdir().unwrap();
        let h = Arc::new(handler(dir.path(), Duration::from_millis(800)));
        init_repo(&h, "a");
        init_repo(&h, "b");

        let guard = h.manager().lock("a", &OperationTicket::new()).unwrap();
        let queued: Vec<_> = (0..2)
            .map(|_| {
                let h = h.clone();
                tokio::spawn(async move { h.execute(request("a", GitOperationRequest::Status)).await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let other = h.execute(request("b", GitOperationRequest::Status)).await;
        assert!(other.is_ok(), "{:?}", other.err());

        for waiter in queued {
            let err = waiter.await.unwrap().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::OperationTimeout);
        }
        drop(guard);
        assert!(h.execute(request("a", GitOperationRequest::Status)).await.is_ok());
    }
}
