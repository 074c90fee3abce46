//! Repository manager: handle registry and per-repository serialization
//!
//! Each canonical working-copy path under the configured root maps to exactly one
//! [`RepositoryHandle`]. Every operation (reads included) holds the handle's
//! operation slot for its whole duration, so git never runs twice at once in the
//! same working copy.
//!
//! Operations carry an [`OperationTicket`]. When the caller stops waiting it
//! abandons the ticket; a handle whose running operation was abandoned refuses new
//! work with [`GitOpError::RepositoryBusy`] until that operation actually finishes,
//! and a queued operation whose ticket was abandoned is never started.
//!
//! With a worker limit set, a slot on the shared worker pool is taken only after
//! the repository's own slot, so callers queued on one busy repository never hold
//! pool capacity that work on other repositories needs.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use super::commit::{git_commit, CommitParams};
use super::error::GitOpError;
use super::remote;
use super::status::{git_status, has_staged_changes};
use super::utils::*;
use crate::transport::{CredentialReference, Transport, TransportConfig, TransportSelector};

/// What a caller gets when the repository is already in use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyMode {
    /// Queue behind the running operation
    #[default]
    Wait,
    /// Fail immediately with `RepositoryBusyError`
    Reject,
}

#[derive(Debug)]
struct TicketState {
    started: Instant,
    abandoned: AtomicBool,
}

/// Shared marker between a caller and the operation it requested
#[derive(Debug, Clone)]
pub struct OperationTicket(Arc<TicketState>);

impl OperationTicket {
    pub fn new() -> Self {
        Self(Arc::new(TicketState {
            started: Instant::now(),
            abandoned: AtomicBool::new(false),
        }))
    }

    /// The caller stopped waiting for this operation
    pub fn abandon(&self) {
        self.0.abandoned.store(true, Ordering::SeqCst);
    }

    pub fn is_abandoned(&self) -> bool {
        self.0.abandoned.load(Ordering::SeqCst)
    }

    pub fn elapsed(&self) -> Duration {
        self.0.started.elapsed()
    }
}

impl Default for OperationTicket {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct HandleState {
    busy: bool,
    in_flight: Option<OperationTicket>,
    last_used: Instant,
}

/// Live handle for one working copy
#[derive(Debug)]
pub struct RepositoryHandle {
    path: PathBuf,
    origin_url: Option<String>,
    transport: TransportConfig,
    state: Mutex<HandleState>,
    released: Condvar,
}

impl RepositoryHandle {
    fn new(path: PathBuf, origin_url: Option<String>, transport: TransportConfig) -> Self {
        Self {
            path,
            origin_url,
            transport,
            state: Mutex::new(HandleState {
                busy: false,
                in_flight: None,
                last_used: Instant::now(),
            }),
            released: Condvar::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn origin_url(&self) -> Option<&str> {
        self.origin_url.as_deref()
    }

    pub fn transport_config(&self) -> &TransportConfig {
        &self.transport
    }

    fn state(&self) -> MutexGuard<'_, HandleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_busy(&self) -> bool {
        self.state().busy
    }

    fn idle_for(&self) -> Option<Duration> {
        let state = self.state();
        (!state.busy).then(|| state.last_used.elapsed())
    }
}

/// Exclusive right to run one operation on a handle; released on drop
#[derive(Debug)]
pub struct OperationGuard {
    handle: Arc<RepositoryHandle>,
    worker: Option<OwnedSemaphorePermit>,
}

impl OperationGuard {
    pub fn handle(&self) -> &RepositoryHandle {
        &self.handle
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.worker.take();
        let mut state = self.handle.state();
        if state.in_flight.as_ref().is_some_and(OperationTicket::is_abandoned) {
            info!(path = %self.handle.path.display(), "abandoned operation finished");
        }
        state.busy = false;
        state.in_flight = None;
        state.last_used = Instant::now();
        drop(state);
        // waiters whose callers gave up leave without taking the slot
        self.handle.released.notify_all();
    }
}

/// Result of open-or-clone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opened {
    /// Path relative to the repository root
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head: Option<String>,
    pub cloned: bool,
}

/// Working-tree status plus whether anything is staged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub entries: Vec<FileStatusEntry>,
    pub has_staged_changes: bool,
}

pub struct RepositoryManager {
    root: PathBuf,
    busy_mode: BusyMode,
    default_transport: TransportConfig,
    selector: TransportSelector,
    workers: Option<Arc<Semaphore>>,
    handles: Mutex<HashMap<PathBuf, Arc<RepositoryHandle>>>,
}

impl RepositoryManager {
    /// Create a manager for `root`, creating the directory if needed.
    pub fn new(
        root: &Path,
        busy_mode: BusyMode,
        default_transport: TransportConfig,
        selector: TransportSelector,
    ) -> Result<Self, GitOpError> {
        fs::create_dir_all(root)?;
        let root = root.canonicalize()?;
        info!(root = %root.display(), ?busy_mode, "repository manager ready");
        Ok(Self {
            root,
            busy_mode,
            default_transport,
            selector,
            workers: None,
            handles: Mutex::new(HashMap::new()),
        })
    }

    /// Run at most `workers` operations at once across all repositories.
    pub fn with_worker_limit(mut self, workers: usize) -> Self {
        self.workers = Some(Arc::new(Semaphore::new(workers.max(1))));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn busy_mode(&self) -> BusyMode {
        self.busy_mode
    }

    /// Canonical location of a request path, refusing anything outside the root
    pub fn resolve_path(&self, requested: &str) -> Result<PathBuf, GitOpError> {
        resolve_under_root(&self.root, requested)
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .display()
            .to_string()
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<PathBuf, Arc<RepositoryHandle>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn handle_count(&self) -> usize {
        self.registry().len()
    }

    fn lookup(&self, path: &Path) -> Option<Arc<RepositoryHandle>> {
        self.registry().get(path).cloned()
    }

    /// Register a handle for a clone target, refusing a path that overlaps
    /// another registered working copy
    fn register_clone_target(
        &self,
        handle: RepositoryHandle,
    ) -> Result<Arc<RepositoryHandle>, GitOpError> {
        let mut registry = self.registry();
        if let Some(existing) = registry.get(&handle.path) {
            return Ok(existing.clone());
        }
        if let Some(other) = registry
            .keys()
            .find(|p| p.starts_with(&handle.path) || handle.path.starts_with(p))
        {
            return Err(GitOpError::InvalidPath(format!(
                "{} (overlaps {})",
                self.relative(&handle.path),
                self.relative(other)
            )));
        }
        let path = handle.path.clone();
        Ok(registry.entry(path).or_insert_with(|| Arc::new(handle)).clone())
    }

    /// Working copy below the root that already contains `path`
    fn enclosing_repository(&self, path: &Path) -> Option<PathBuf> {
        path.ancestors()
            .skip(1)
            .take_while(|p| *p != self.root && p.starts_with(&self.root))
            .find(|p| p.join(".git").exists() || is_repository(p))
            .map(Path::to_path_buf)
    }

    /// Register `handle` unless another caller got there first
    fn register(&self, handle: RepositoryHandle) -> Arc<RepositoryHandle> {
        self.registry()
            .entry(handle.path.clone())
            .or_insert_with(|| Arc::new(handle))
            .clone()
    }

    fn transport_config(&self, credential: Option<&CredentialReference>) -> TransportConfig {
        self.default_transport
            .clone()
            .with_credential(credential.cloned())
    }

    fn check_credential(
        handle: &RepositoryHandle,
        credential: Option<&CredentialReference>,
    ) -> Result<(), GitOpError> {
        match credential {
            Some(requested) if handle.transport.credential.as_ref() != Some(requested) => {
                Err(GitOpError::InvalidRequest(format!(
                    "repository is open with a different credential than '{}'; close it first",
                    requested
                )))
            }
            _ => Ok(()),
        }
    }

    /// Existing handle for `path`, or a new one if it holds a repository
    fn handle_for(
        &self,
        path: &Path,
        credential: Option<&CredentialReference>,
    ) -> Result<Arc<RepositoryHandle>, GitOpError> {
        if let Some(handle) = self.lookup(path) {
            Self::check_credential(&handle, credential)?;
            return Ok(handle);
        }
        if !is_repository(path) {
            return Err(GitOpError::RepositoryNotFound(self.relative(path)));
        }
        let handle = self.register(RepositoryHandle::new(
            path.to_path_buf(),
            remote_url(path, DEFAULT_REMOTE),
            self.transport_config(credential),
        ));
        Self::check_credential(&handle, credential)?;
        debug!(path = %path.display(), "opened repository handle");
        Ok(handle)
    }

    /// Take the handle's operation slot according to the busy mode
    fn acquire(
        &self,
        handle: &Arc<RepositoryHandle>,
        ticket: &OperationTicket,
    ) -> Result<OperationGuard, GitOpError> {
        let busy = || GitOpError::RepositoryBusy(self.relative(&handle.path));
        let mut state = handle.state();
        while state.busy {
            if state
                .in_flight
                .as_ref()
                .is_some_and(OperationTicket::is_abandoned)
            {
                warn!(path = %handle.path.display(), "refusing work behind an abandoned operation");
                return Err(busy());
            }
            if self.busy_mode == BusyMode::Reject {
                return Err(busy());
            }
            state = handle
                .released
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }

        if ticket.is_abandoned() {
            debug!(path = %handle.path.display(), "caller gave up before the operation started");
            return Err(GitOpError::OperationTimeout(ticket.elapsed()));
        }

        state.busy = true;
        state.in_flight = Some(ticket.clone());
        drop(state);
        let mut guard = OperationGuard {
            handle: handle.clone(),
            worker: None,
        };

        if let Some(workers) = &self.workers {
            let permit = futures::executor::block_on(workers.clone().acquire_owned())
                .map_err(|_| GitOpError::Internal("worker pool closed".to_string()))?;
            guard.worker = Some(permit);
            if ticket.is_abandoned() {
                debug!(path = %handle.path.display(), "caller gave up waiting for a worker");
                return Err(GitOpError::OperationTimeout(ticket.elapsed()));
            }
        }
        Ok(guard)
    }

    /// Hold the operation slot of an open repository until the guard drops.
    pub fn lock(
        &self,
        requested: &str,
        ticket: &OperationTicket,
    ) -> Result<OperationGuard, GitOpError> {
        let path = self.resolve_path(requested)?;
        let handle = self.handle_for(&path, None)?;
        self.acquire(&handle, ticket)
    }

    fn with_repository<T>(
        &self,
        requested: &str,
        credential: Option<&CredentialReference>,
        ticket: &OperationTicket,
        op: impl FnOnce(&RepositoryHandle) -> Result<T, GitOpError>,
    ) -> Result<T, GitOpError> {
        let path = self.resolve_path(requested)?;
        let handle = self.handle_for(&path, credential)?;
        let guard = self.acquire(&handle, ticket)?;
        // A failed clone can leave a registered handle with nothing on disk
        if !is_repository(&handle.path) {
            return Err(GitOpError::RepositoryNotFound(self.relative(&handle.path)));
        }
        op(guard.handle())
    }

    fn transport(&self, handle: &RepositoryHandle) -> Result<Arc<dyn Transport>, GitOpError> {
        self.selector.resolve(&handle.transport)
    }

    /// Open the repository at `requested`, cloning `remote_url` into it if there is none.
    pub fn open_or_clone(
        &self,
        requested: &str,
        remote_url: Option<&str>,
        branch: Option<&str>,
        credential: Option<&CredentialReference>,
        ticket: &OperationTicket,
    ) -> Result<Opened, GitOpError> {
        let path = self.resolve_path(requested)?;

        if self.lookup(&path).is_some() || is_repository(&path) {
            return self.with_repository(requested, credential, ticket, |handle| {
                Ok(Opened {
                    path: self.relative(&handle.path),
                    head: rev_parse(&handle.path, "HEAD"),
                    cloned: false,
                })
            });
        }

        let Some(url) = remote_url else {
            return Err(GitOpError::RepositoryNotFound(self.relative(&path)));
        };
        if url.trim().is_empty() {
            return Err(GitOpError::InvalidRequest("remote URL is empty".to_string()));
        }
        if let Some(branch) = branch {
            validate_ref_component("branch", branch)?;
        }
        if let Some(enclosing) = self.enclosing_repository(&path) {
            return Err(GitOpError::InvalidPath(format!(
                "{} is inside the working copy {}",
                self.relative(&path),
                self.relative(&enclosing)
            )));
        }
        if path.exists() && !is_empty_dir(&path) {
            return Err(GitOpError::InvalidRequest(format!(
                "'{}' exists and is not an empty directory",
                self.relative(&path)
            )));
        }

        let config = self.transport_config(credential);
        let transport = self.selector.resolve(&config)?;
        let handle = self.register_clone_target(RepositoryHandle::new(
            path.clone(),
            Some(url.to_string()),
            config,
        ))?;
        Self::check_credential(&handle, credential)?;
        let _guard = self.acquire(&handle, ticket)?;

        // Someone else may have cloned while we queued
        if is_repository(&path) {
            return Ok(Opened {
                path: self.relative(&path),
                head: rev_parse(&path, "HEAD"),
                cloned: false,
            });
        }

        let created_from = first_missing_ancestor(&path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        info!(path = %path.display(), backend = %transport.backend(), "cloning");
        if let Err(e) = transport.clone_repository(url, &path, branch) {
            warn!(path = %path.display(), error = %e, "clone failed, cleaning up");
            undo_clone(&path, created_from.as_deref());
            self.forget(&handle);
            return Err(e);
        }

        Ok(Opened {
            path: self.relative(&path),
            head: rev_parse(&path, "HEAD"),
            cloned: true,
        })
    }

    fn forget(&self, handle: &Arc<RepositoryHandle>) {
        let mut registry = self.registry();
        if registry
            .get(&handle.path)
            .is_some_and(|h| Arc::ptr_eq(h, handle))
        {
            registry.remove(&handle.path);
        }
    }

    pub fn status(
        &self,
        requested: &str,
        ticket: &OperationTicket,
    ) -> Result<StatusReport, GitOpError> {
        self.with_repository(requested, None, ticket, |handle| {
            Ok(StatusReport {
                entries: git_status(&handle.path)?,
                has_staged_changes: has_staged_changes(&handle.path)?,
            })
        })
    }

    pub fn commit(
        &self,
        requested: &str,
        params: &CommitParams,
        ticket: &OperationTicket,
    ) -> Result<String, GitOpError> {
        self.with_repository(requested, None, ticket, |handle| {
            let sha = git_commit(&handle.path, params)?;
            info!(path = %handle.path.display(), commit = %sha, "committed");
            Ok(sha)
        })
    }

    pub fn fetch(
        &self,
        requested: &str,
        remote_name: Option<&str>,
        credential: Option<&CredentialReference>,
        ticket: &OperationTicket,
    ) -> Result<Vec<RefUpdate>, GitOpError> {
        let remote_name = remote_name.unwrap_or(DEFAULT_REMOTE);
        self.with_repository(requested, credential, ticket, |handle| {
            let transport = self.transport(handle)?;
            remote::fetch(&handle.path, transport.as_ref(), remote_name)
        })
    }

    pub fn pull(
        &self,
        requested: &str,
        remote_name: Option<&str>,
        branch: Option<&str>,
        credential: Option<&CredentialReference>,
        ticket: &OperationTicket,
    ) -> Result<(MergeOutcome, Vec<RefUpdate>), GitOpError> {
        let remote_name = remote_name.unwrap_or(DEFAULT_REMOTE);
        self.with_repository(requested, credential, ticket, |handle| {
            let transport = self.transport(handle)?;
            remote::pull(&handle.path, transport.as_ref(), remote_name, branch)
        })
    }

    pub fn push(
        &self,
        requested: &str,
        remote_name: Option<&str>,
        branch: Option<&str>,
        credential: Option<&CredentialReference>,
        ticket: &OperationTicket,
    ) -> Result<Vec<RefUpdate>, GitOpError> {
        let remote_name = remote_name.unwrap_or(DEFAULT_REMOTE);
        self.with_repository(requested, credential, ticket, |handle| {
            let transport = self.transport(handle)?;
            remote::push(&handle.path, transport.as_ref(), remote_name, branch)
        })
    }

    pub fn branches(
        &self,
        requested: &str,
        ticket: &OperationTicket,
    ) -> Result<BranchList, GitOpError> {
        self.with_repository(requested, None, ticket, |handle| {
            remote::branches(&handle.path)
        })
    }

    /// Drop the handle for `requested`. Returns whether one was registered.
    pub fn close(&self, requested: &str) -> Result<bool, GitOpError> {
        let path = self.resolve_path(requested)?;
        let mut registry = self.registry();
        match registry.get(&path) {
            None => Ok(false),
            // running, or about to be locked by a caller that already holds it
            Some(handle) if handle.is_busy() || Arc::strong_count(handle) > 1 => {
                Err(GitOpError::RepositoryBusy(self.relative(&path)))
            }
            Some(_) => {
                registry.remove(&path);
                info!(path = %path.display(), "closed repository handle");
                Ok(true)
            }
        }
    }

    /// Drop handles that have been idle for at least `max_idle`; returns how many.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut registry = self.registry();
        let before = registry.len();
        registry.retain(|_, handle| {
            // held elsewhere (e.g. a waiter about to lock it)
            if Arc::strong_count(handle) > 1 {
                return true;
            }
            !handle.idle_for().is_some_and(|idle| idle >= max_idle)
        });
        let evicted = before - registry.len();
        if evicted > 0 {
            debug!(evicted, "evicted idle repository handles");
        }
        evicted
    }
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}

/// Outermost directory on the way to `path` that does not exist yet
fn first_missing_ancestor(path: &Path) -> Option<PathBuf> {
    let mut missing = None;
    let mut current = Some(path);
    while let Some(p) = current {
        if p.exists() {
            break;
        }
        missing = Some(p.to_path_buf());
        current = p.parent();
    }
    missing
}

/// Put the filesystem back the way it was before a failed clone
fn undo_clone(path: &Path, created_from: Option<&Path>) {
    let result = match created_from {
        Some(created) => fs::remove_dir_all(created),
        // pre-existing empty directory: empty it again
        None => fs::read_dir(path).and_then(|entries| {
            for entry in entries {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    fs::remove_dir_all(entry.path())?;
                } else {
                    fs::remove_file(entry.path())?;
                }
            }
            Ok(())
        }),
    };
    if let Err(e) = result {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to clean up after clone into {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ConfigCredentialStore;

    fn manager(root: &Path, mode: BusyMode) -> RepositoryManager {
        RepositoryManager::new(
            root,
            mode,
            TransportConfig::default(),
            TransportSelector::new(Arc::new(ConfigCredentialStore::default())),
        )
        .unwrap()
    }

    fn init_repo(path: &Path) {
        fs::create_dir_all(path).unwrap();
        let status = std::process::Command::new("git")
            .args(["init", "--quiet"])
            .current_dir(path)
            .status()
            .unwrap();
        assert!(status.success());
    }

    #[test]
    fn test_ticket_abandon() {
        let ticket = OperationTicket::new();
        let shared = ticket.clone();
        assert!(!shared.is_abandoned());
        ticket.abandon();
        assert!(shared.is_abandoned());
    }

    #[test]
    fn test_one_handle_per_canonical_path() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), BusyMode::Wait);
        init_repo(&m.root().join("alpha"));

        let ticket = OperationTicket::new();
        m.status("alpha", &ticket).unwrap();
        m.status("./alpha/", &ticket).unwrap();
        m.status(&m.root().join("alpha").display().to_string(), &ticket)
            .unwrap();
        assert_eq!(m.handle_count(), 1);
    }

    #[test]
    fn test_reject_mode_and_abandoned_predecessor() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), BusyMode::Reject);
        init_repo(&m.root().join("repo"));

        let running = OperationTicket::new();
        let guard = m.lock("repo", &running).unwrap();
        assert!(matches!(
            m.status("repo", &OperationTicket::new()),
            Err(GitOpError::RepositoryBusy(_))
        ));

        running.abandon();
        assert!(matches!(
            m.status("repo", &OperationTicket::new()),
            Err(GitOpError::RepositoryBusy(_))
        ));

        drop(guard);
        assert!(m.status("repo", &OperationTicket::new()).is_ok());
    }

    #[test]
    fn test_wait_mode_serializes() {
        let dir = tempfile::tempdir().unwrap();
        let m = Arc::new(manager(dir.path(), BusyMode::Wait));
        init_repo(&m.root().join("repo"));

        let guard = m.lock("repo", &OperationTicket::new()).unwrap();
        let waiter = {
            let m = m.clone();
            std::thread::spawn(move || m.status("repo", &OperationTicket::new()).is_ok())
        };
        std::thread::sleep(Duration::from_millis(100));
        assert!(!waiter.is_finished());
        drop(guard);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_abandoned_ticket_is_not_started() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), BusyMode::Wait);
        init_repo(&m.root().join("repo"));

        let ticket = OperationTicket::new();
        ticket.abandon();
        assert!(matches!(
            m.status("repo", &ticket),
            Err(GitOpError::OperationTimeout(_))
        ));
        assert!(!m.lookup(&m.root().join("repo")).unwrap().is_busy());
    }

    #[test]
    fn test_close_and_evict() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), BusyMode::Wait);
        init_repo(&m.root().join("a"));
        init_repo(&m.root().join("b"));

        m.status("a", &OperationTicket::new()).unwrap();
        m.status("b", &OperationTicket::new()).unwrap();
        assert!(m.close("a").unwrap());
        assert!(!m.close("a").unwrap());

        assert_eq!(m.evict_idle(Duration::from_secs(3600)), 0);
        assert_eq!(m.evict_idle(Duration::ZERO), 1);
        assert_eq!(m.handle_count(), 0);
    }

    #[test]
    fn test_close_refuses_handle_held_by_another_caller() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), BusyMode::Wait);
        init_repo(&m.root().join("repo"));
        m.status("repo", &OperationTicket::new()).unwrap();

        // looked up but not locked yet
        let held = m.lookup(&m.root().join("repo")).unwrap();
        assert!(!held.is_busy());
        assert!(matches!(m.close("repo"), Err(GitOpError::RepositoryBusy(_))));
        assert_eq!(m.handle_count(), 1);

        drop(held);
        assert!(m.close("repo").unwrap());
        assert_eq!(m.handle_count(), 0);
    }

    #[test]
    fn test_worker_permit_taken_after_repository_slot() {
        let dir = tempfile::tempdir().unwrap();
        let m = Arc::new(manager(dir.path(), BusyMode::Wait).with_worker_limit(1));
        init_repo(&m.root().join("a"));
        init_repo(&m.root().join("b"));

        let guard = m.lock("a", &OperationTicket::new()).unwrap();
        let queued = {
            let m = m.clone();
            std::thread::spawn(move || m.status("a", &OperationTicket::new()).is_ok())
        };
        std::thread::sleep(Duration::from_millis(100));
        // the queued caller waits on the slot, not the single worker
        drop(guard);
        assert!(queued.join().unwrap());
        assert!(m.status("b", &OperationTicket::new()).is_ok());
    }

    #[test]
    fn test_failed_clone_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), BusyMode::Wait);
        let missing_remote = dir.path().join("no-such-remote.git");

        let result = m.open_or_clone(
            "nested/target",
            Some(&missing_remote.display().to_string()),
            None,
            None,
            &OperationTicket::new(),
        );
        assert!(result.is_err());
        assert!(!m.root().join("nested").exists());
        assert_eq!(m.handle_count(), 0);
    }

    #[test]
    fn test_first_missing_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path();
        assert_eq!(
            first_missing_ancestor(&base.join("x/y/z")),
            Some(base.join("x"))
        );
        assert_eq!(first_missing_ancestor(base), None);
    }
}
