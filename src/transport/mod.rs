//! Transport selection for remote git operations.
//!
//! Two interchangeable SSH stacks sit behind the [`Transport`] trait:
//! - [`openssh`]: the `git` executable driving the system OpenSSH client
//! - [`libssh2`]: libgit2's in-process transport (libssh2 for SSH)
//!
//! [`TransportSelector::resolve`] picks one per [`TransportConfig`], resolves the
//! credential reference through the gateway's [`CredentialStore`] and hands back a
//! stateless adapter. Network I/O only happens when the repository manager calls it.

pub mod credentials;
pub mod known_hosts;
pub mod libssh2;
pub mod openssh;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::git::GitOpError;

pub use credentials::{
    ConfigCredentialStore, Credential, CredentialEntry, CredentialReference, CredentialStore,
};

/// SSH stack used for remote operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SshBackend {
    #[default]
    #[serde(rename = "openssh", alias = "open_ssh")]
    OpenSsh,
    #[serde(rename = "libssh2")]
    Libssh2,
}

impl SshBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            SshBackend::OpenSsh => "openssh",
            SshBackend::Libssh2 => "libssh2",
        }
    }
}

impl fmt::Display for SshBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host key verification policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KnownHostsPolicy {
    #[default]
    Strict,
    AcceptNew,
    AcceptAny,
}

/// Per-repository transport settings, fixed for the lifetime of a handle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub backend: SshBackend,
    #[serde(default)]
    pub known_hosts: KnownHostsPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_hosts_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<CredentialReference>,
}

impl TransportConfig {
    pub fn with_credential(mut self, credential: Option<CredentialReference>) -> Self {
        if credential.is_some() {
            self.credential = credential;
        }
        self
    }

    /// Known-hosts file to verify against (explicit, else `~/.ssh/known_hosts`)
    pub fn effective_known_hosts_file(&self) -> Option<PathBuf> {
        self.known_hosts_file
            .clone()
            .or_else(|| dirs::home_dir().map(|h| h.join(".ssh").join("known_hosts")))
    }
}

/// Remote capability shared by both backends
pub trait Transport: Send + Sync + fmt::Debug {
    fn backend(&self) -> SshBackend;

    /// Clone `url` into `dest`, which must not exist yet.
    fn clone_repository(&self, url: &str, dest: &Path, branch: Option<&str>)
        -> Result<(), GitOpError>;

    /// Fetch `remote` using its configured refspecs.
    fn fetch(&self, repo: &Path, remote: &str) -> Result<(), GitOpError>;

    /// Push a single refspec to `remote`.
    fn push(&self, repo: &Path, remote: &str, refspec: &str) -> Result<(), GitOpError>;
}

/// Whether `backend` can run in this process
pub fn backend_available(backend: SshBackend) -> bool {
    match backend {
        SshBackend::OpenSsh => which::which("git").is_ok(),
        SshBackend::Libssh2 => git2::Version::get().ssh(),
    }
}

/// Builds transport adapters from configuration
#[derive(Clone)]
pub struct TransportSelector {
    store: Arc<dyn CredentialStore>,
}

impl fmt::Debug for TransportSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSelector").finish_non_exhaustive()
    }
}

impl TransportSelector {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    pub fn resolve(&self, config: &TransportConfig) -> Result<Arc<dyn Transport>, GitOpError> {
        if !backend_available(config.backend) {
            return Err(GitOpError::UnsupportedTransport(
                config.backend.as_str().to_string(),
            ));
        }

        let credential = config
            .credential
            .as_ref()
            .map(|reference| self.store.resolve(reference))
            .transpose()?;

        debug!(
            backend = %config.backend,
            credential = ?config.credential,
            "resolved transport"
        );

        Ok(match config.backend {
            SshBackend::OpenSsh => Arc::new(openssh::OpenSshTransport::new(config, credential)?),
            SshBackend::Libssh2 => Arc::new(libssh2::Libssh2Transport::new(config, credential)),
        })
    }
}

/// Host and port of an SSH remote, `None` for local paths and non-SSH URLs
pub fn ssh_endpoint(remote: &str) -> Option<(String, u16)> {
    if remote.contains("://") {
        let parsed = url::Url::parse(remote).ok()?;
        return match parsed.scheme() {
            "ssh" | "git+ssh" | "ssh+git" => {
                let host = parsed.host_str()?.trim_matches(|c| c == '[' || c == ']');
                Some((host.to_string(), parsed.port().unwrap_or(22)))
            }
            _ => None,
        };
    }
    // scp-like syntax: [user@]host:path
    let (before_colon, _) = remote.split_once(':')?;
    if before_colon.contains('/') || before_colon.is_empty() {
        return None;
    }
    let host = before_colon.rsplit('@').next()?;
    Some((host.to_string(), 22))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssh_endpoint_forms() {
        assert_eq!(
            ssh_endpoint("ssh://git@git.example.com:2222/team/repo.git"),
            Some(("git.example.com".to_string(), 2222))
        );
        assert_eq!(
            ssh_endpoint("git@github.com:team/repo.git"),
            Some(("github.com".to_string(), 22))
        );
        assert_eq!(ssh_endpoint("https://example.com/repo.git"), None);
        assert_eq!(ssh_endpoint("/srv/git/repo.git"), None);
        assert_eq!(ssh_endpoint("./relative/repo"), None);
        assert_eq!(
            ssh_endpoint("git.example.com:team/repo"),
            Some(("git.example.com".to_string(), 22))
        );
    }

    #[test]
    fn test_transport_config_from_toml() {
        let config: TransportConfig = toml::from_str(
            r#"
            backend = "libssh2"
            known_hosts = "accept-new"
            credential = "deploy"
            "#,
        )
        .unwrap();
        assert_eq!(config.backend, SshBackend::Libssh2);
        assert_eq!(config.known_hosts, KnownHostsPolicy::AcceptNew);
        assert_eq!(config.credential, Some(CredentialReference::new("deploy")));
    }

    #[test]
    fn test_resolve_unknown_credential() {
        let selector = TransportSelector::new(Arc::new(ConfigCredentialStore::default()));
        let config = TransportConfig {
            credential: Some(CredentialReference::new("nobody")),
            ..TransportConfig::default()
        };
        match selector.resolve(&config) {
            Err(GitOpError::CredentialResolution(name)) => assert_eq!(name, "nobody"),
            // A host without git cannot get past the availability check
            Err(GitOpError::UnsupportedTransport(_)) => assert!(!backend_available(SshBackend::OpenSsh)),
            other => panic!("unexpected {:?}", other),
        }
    }
}
