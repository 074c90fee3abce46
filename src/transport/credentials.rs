//! Gateway-side credential store.
//!
//! Requests only ever carry a [`CredentialReference`] (a name). The secret material
//! behind it lives in the gateway configuration and is resolved here, inside the
//! gateway process, right before a transport is built.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::git::GitOpError;

/// Opaque name of a credential held by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialReference(pub String);

impl CredentialReference {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CredentialReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Credential entry as written in the `[credentials.<name>]` config table
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CredentialEntry {
    SshKey {
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        private_key: Option<String>,
        #[serde(default)]
        private_key_file: Option<PathBuf>,
        #[serde(default)]
        passphrase: Option<String>,
    },
    UserPassword {
        username: String,
        password: String,
    },
    Agent {
        #[serde(default)]
        username: Option<String>,
    },
}

impl fmt::Debug for CredentialEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialEntry::SshKey {
                username,
                private_key_file,
                ..
            } => f
                .debug_struct("SshKey")
                .field("username", username)
                .field("private_key_file", private_key_file)
                .finish_non_exhaustive(),
            CredentialEntry::UserPassword { username, .. } => f
                .debug_struct("UserPassword")
                .field("username", username)
                .finish_non_exhaustive(),
            CredentialEntry::Agent { username } => {
                f.debug_struct("Agent").field("username", username).finish()
            }
        }
    }
}

/// Resolved secret material, ready for a transport backend
#[derive(Clone)]
pub enum Credential {
    SshKey {
        username: Option<String>,
        private_key: String,
        passphrase: Option<String>,
    },
    UserPassword {
        username: String,
        password: String,
    },
    Agent {
        username: Option<String>,
    },
}

impl Credential {
    pub fn username(&self) -> Option<&str> {
        match self {
            Credential::SshKey { username, .. } | Credential::Agent { username } => {
                username.as_deref()
            }
            Credential::UserPassword { username, .. } => Some(username),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::SshKey {
                username,
                passphrase,
                ..
            } => f
                .debug_struct("SshKey")
                .field("username", username)
                .field("private_key", &"<redacted>")
                .field("has_passphrase", &passphrase.is_some())
                .finish(),
            Credential::UserPassword { username, .. } => f
                .debug_struct("UserPassword")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Credential::Agent { username } => {
                f.debug_struct("Agent").field("username", username).finish()
            }
        }
    }
}

/// Source of secrets for credential references
pub trait CredentialStore: Send + Sync {
    fn resolve(&self, reference: &CredentialReference) -> Result<Credential, GitOpError>;
}

/// Credential store backed by the gateway configuration
#[derive(Debug, Clone, Default)]
pub struct ConfigCredentialStore {
    entries: HashMap<String, CredentialEntry>,
}

impl ConfigCredentialStore {
    pub fn new(entries: HashMap<String, CredentialEntry>) -> Self {
        Self { entries }
    }
}

impl CredentialStore for ConfigCredentialStore {
    fn resolve(&self, reference: &CredentialReference) -> Result<Credential, GitOpError> {
        let unresolved = || GitOpError::CredentialResolution(reference.to_string());
        let entry = self.entries.get(reference.name()).ok_or_else(unresolved)?;
        debug!(credential = %reference, "resolving credential");

        match entry {
            CredentialEntry::SshKey {
                username,
                private_key,
                private_key_file,
                passphrase,
            } => {
                let private_key = match (private_key, private_key_file) {
                    (Some(inline), _) => inline.clone(),
                    (None, Some(file)) => std::fs::read_to_string(file).map_err(|e| {
                        GitOpError::CredentialResolution(format!(
                            "{} (cannot read {}: {})",
                            reference,
                            file.display(),
                            e
                        ))
                    })?,
                    (None, None) => return Err(unresolved()),
                };
                if private_key.trim().is_empty() {
                    return Err(unresolved());
                }
                Ok(Credential::SshKey {
                    username: username.clone(),
                    private_key,
                    passphrase: passphrase.clone().filter(|p| !p.is_empty()),
                })
            }
            CredentialEntry::UserPassword { username, password } => Ok(Credential::UserPassword {
                username: username.clone(),
                password: password.clone(),
            }),
            CredentialEntry::Agent { username } => Ok(Credential::Agent {
                username: username.clone(),
            }),
        }
    }
}
