//! In-process transport through libgit2 (libssh2 for SSH remotes).
//!
//! Credentials are handed to libgit2 from memory, so passphrase-protected keys work
//! here. Host keys are checked against the known-hosts file by [`KnownHosts`]
//! since libgit2 leaves that decision to the caller.

use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};

use git2::build::RepoBuilder;
use git2::{
    CertificateCheckStatus, Cred, CredentialType, ErrorClass, ErrorCode, FetchOptions,
    PushOptions, RemoteCallbacks, Repository,
};
use tracing::{debug, info, warn};

use super::known_hosts::{HostKeyMatch, KnownHosts};
use super::{ssh_endpoint, Credential, KnownHostsPolicy, SshBackend, Transport, TransportConfig};
use crate::git::GitOpError;

/// libgit2 keeps asking while the server keeps refusing
const MAX_AUTH_ATTEMPTS: u32 = 3;

#[derive(Debug)]
pub struct Libssh2Transport {
    policy: KnownHostsPolicy,
    known_hosts_file: Option<PathBuf>,
    credential: Option<Credential>,
}

/// What the callbacks observed during one remote call
#[derive(Default)]
struct CallState {
    auth_attempts: Cell<u32>,
    auth_exhausted: Cell<bool>,
    host_key_error: RefCell<Option<String>>,
    rejections: RefCell<Vec<(String, String)>>,
    remote_output: RefCell<String>,
}

impl CallState {
    fn remote_messages(&self) -> Vec<String> {
        self.remote_output
            .borrow()
            .split(['\n', '\r'])
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl Libssh2Transport {
    pub fn new(config: &TransportConfig, credential: Option<Credential>) -> Self {
        Self {
            policy: config.known_hosts,
            known_hosts_file: config.effective_known_hosts_file(),
            credential,
        }
    }

    fn callbacks<'a>(&'a self, url: &'a str, state: &'a CallState) -> RemoteCallbacks<'a> {
        let mut callbacks = RemoteCallbacks::new();

        callbacks.credentials(move |_url, username_from_url, allowed| {
            self.credential_for(username_from_url, allowed, state)
        });

        callbacks.certificate_check(move |cert, hostname| {
            let Some(hostkey) = cert.as_hostkey() else {
                // TLS certificates are validated by libgit2 itself
                return Ok(CertificateCheckStatus::CertificatePassthrough);
            };
            let Some(key) = hostkey.hostkey() else {
                return Err(git2::Error::from_str("server presented no host key"));
            };
            match self.check_host_key(url, hostname, key) {
                Ok(()) => Ok(CertificateCheckStatus::CertificateOk),
                Err(reason) => {
                    warn!(host = hostname, "{}", reason);
                    *state.host_key_error.borrow_mut() = Some(reason.clone());
                    Err(git2::Error::new(
                        ErrorCode::Certificate,
                        ErrorClass::Ssh,
                        reason,
                    ))
                }
            }
        });

        callbacks.sideband_progress(move |data| {
            state
                .remote_output
                .borrow_mut()
                .push_str(&String::from_utf8_lossy(data));
            true
        });

        callbacks.push_update_reference(move |reference, status| {
            if let Some(status) = status {
                state
                    .rejections
                    .borrow_mut()
                    .push((reference.to_string(), status.to_string()));
            }
            Ok(())
        });

        callbacks
    }

    fn credential_for(
        &self,
        username_from_url: Option<&str>,
        allowed: CredentialType,
        state: &CallState,
    ) -> Result<Cred, git2::Error> {
        let attempt = state.auth_attempts.get() + 1;
        state.auth_attempts.set(attempt);
        if attempt > MAX_AUTH_ATTEMPTS {
            state.auth_exhausted.set(true);
            return Err(git2::Error::new(
                ErrorCode::Auth,
                ErrorClass::Ssh,
                "credentials rejected by remote",
            ));
        }

        let user = self
            .credential
            .as_ref()
            .and_then(Credential::username)
            .or(username_from_url)
            .unwrap_or("git");

        if allowed.contains(CredentialType::USERNAME) {
            return Cred::username(user);
        }

        let wants_key =
            allowed.contains(CredentialType::SSH_KEY) || allowed.contains(CredentialType::SSH_MEMORY);
        match &self.credential {
            Some(Credential::SshKey {
                private_key,
                passphrase,
                ..
            }) if wants_key => {
                Cred::ssh_key_from_memory(user, None, private_key, passphrase.as_deref())
            }
            Some(Credential::Agent { .. }) | None
                if allowed.contains(CredentialType::SSH_KEY) =>
            {
                Cred::ssh_key_from_agent(user)
            }
            Some(Credential::UserPassword { username, password })
                if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) =>
            {
                Cred::userpass_plaintext(username, password)
            }
            _ => {
                state.auth_exhausted.set(true);
                Err(git2::Error::new(
                    ErrorCode::Auth,
                    ErrorClass::Callback,
                    "no credential suitable for this remote",
                ))
            }
        }
    }

    fn check_host_key(&self, url: &str, hostname: &str, key: &[u8]) -> Result<(), String> {
        if self.policy == KnownHostsPolicy::AcceptAny {
            return Ok(());
        }
        let port = ssh_endpoint(url)
            .filter(|(host, _)| host.eq_ignore_ascii_case(hostname))
            .map(|(_, port)| port)
            .unwrap_or(22);

        let Some(file) = &self.known_hosts_file else {
            return Err(format!("no known_hosts file to verify {}", hostname));
        };
        let known = KnownHosts::load(file)
            .map_err(|e| format!("cannot read {}: {}", file.display(), e))?;

        match known.check(hostname, port, key) {
            HostKeyMatch::Known => Ok(()),
            HostKeyMatch::Revoked => Err(format!("host key for {} is revoked", hostname)),
            HostKeyMatch::Mismatch => Err(format!(
                "host key for {} does not match {}",
                hostname,
                file.display()
            )),
            HostKeyMatch::Unknown if self.policy == KnownHostsPolicy::AcceptNew => {
                KnownHosts::append(file, hostname, port, key)
                    .map_err(|e| format!("cannot record host key for {}: {}", hostname, e))?;
                info!(host = hostname, port, "recorded new host key");
                Ok(())
            }
            HostKeyMatch::Unknown => Err(format!(
                "host key verification failed: {} is not in {}",
                hostname,
                file.display()
            )),
        }
    }
}

/// Map a libgit2 failure onto the error taxonomy, preferring what the callbacks saw
fn map_error(err: git2::Error, state: &CallState) -> GitOpError {
    if let Some(reason) = state.host_key_error.borrow_mut().take() {
        return GitOpError::Authentication(reason);
    }
    let message = err.message().to_string();
    if state.auth_exhausted.get()
        || matches!(err.code(), ErrorCode::Auth | ErrorCode::Certificate)
        || message.to_ascii_lowercase().contains("authenticat")
    {
        return GitOpError::Authentication(message);
    }
    match (err.class(), err.code()) {
        (ErrorClass::Reference, ErrorCode::NotFound) => GitOpError::InvalidRequest(message),
        (ErrorClass::Net | ErrorClass::Ssh | ErrorClass::Http | ErrorClass::Os, _)
        | (_, ErrorCode::NotFound) => GitOpError::RemoteUnreachable(message),
        _ => GitOpError::Internal(message),
    }
}

fn open(repo: &Path) -> Result<Repository, GitOpError> {
    Repository::open(repo)
        .map_err(|e| GitOpError::Internal(format!("cannot open {}: {}", repo.display(), e)))
}

fn find_remote<'r>(repository: &'r Repository, name: &str) -> Result<git2::Remote<'r>, GitOpError> {
    repository
        .find_remote(name)
        .map_err(|_| GitOpError::InvalidRequest(format!("unknown remote '{}'", name)))
}

impl Transport for Libssh2Transport {
    fn backend(&self) -> SshBackend {
        SshBackend::Libssh2
    }

    fn clone_repository(
        &self,
        url: &str,
        dest: &Path,
        branch: Option<&str>,
    ) -> Result<(), GitOpError> {
        let state = CallState::default();
        let mut fetch = FetchOptions::new();
        fetch.remote_callbacks(self.callbacks(url, &state));

        let mut builder = RepoBuilder::new();
        builder.fetch_options(fetch);
        if let Some(branch) = branch {
            builder.branch(branch);
        }
        debug!(url, dest = %dest.display(), "libgit2 clone");
        builder
            .clone(url, dest)
            .map(|_| ())
            .map_err(|e| map_error(e, &state))
    }

    fn fetch(&self, repo: &Path, remote: &str) -> Result<(), GitOpError> {
        let repository = open(repo)?;
        let mut remote = find_remote(&repository, remote)?;
        let url = remote.url().unwrap_or_default().to_string();

        let state = CallState::default();
        let mut options = FetchOptions::new();
        options.remote_callbacks(self.callbacks(&url, &state));
        remote
            .fetch(&[] as &[&str], Some(&mut options), None)
            .map_err(|e| map_error(e, &state))
    }

    fn push(&self, repo: &Path, remote: &str, refspec: &str) -> Result<(), GitOpError> {
        let repository = open(repo)?;
        let mut remote = find_remote(&repository, remote)?;
        let url = remote.url().unwrap_or_default().to_string();
        let destination = refspec.rsplit(':').next().unwrap_or(refspec).to_string();

        let state = CallState::default();
        let mut options = PushOptions::new();
        options.remote_callbacks(self.callbacks(&url, &state));
        let result = remote.push(&[refspec], Some(&mut options));

        if let Err(e) = result {
            if e.code() == ErrorCode::NotFastForward {
                return Err(GitOpError::RemoteRejected {
                    reference: destination,
                    reason: format!("[rejected] (non-fast-forward): {}", e.message()),
                });
            }
            return Err(map_error(e, &state));
        }

        let rejection = state.rejections.borrow().first().cloned();
        if let Some((reference, status)) = rejection {
            let messages = state.remote_messages();
            let reason = if messages.is_empty() {
                status
            } else {
                format!("{}: {}", status, messages.join("\n"))
            };
            warn!(reference = %reference, "push rejected by remote");
            return Err(GitOpError::RemoteRejected { reference, reason });
        }
        Ok(())
    }
}
