//! Gateway configuration (`~/.gitbridge/config.toml`)

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::git::BusyMode;
use crate::transport::{CredentialEntry, TransportConfig};

pub const DEFAULT_PORT: u16 = 47800;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),
    #[error("Failed to read config: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub repositories: RepositoriesSection,
    #[serde(default)]
    pub operations: OperationsSection,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub credentials: HashMap<String, CredentialEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoriesSection {
    #[serde(default = "default_repos_root")]
    pub root: PathBuf,
    #[serde(default)]
    pub busy_mode: BusyMode,
    /// 0 disables idle eviction
    #[serde(default = "default_idle_eviction")]
    pub idle_eviction_secs: u64,
}

impl Default for RepositoriesSection {
    fn default() -> Self {
        Self {
            root: default_repos_root(),
            busy_mode: BusyMode::default(),
            idle_eviction_secs: default_idle_eviction(),
        }
    }
}

fn default_repos_root() -> PathBuf {
    gitbridge_home().join("repos")
}

fn default_idle_eviction() -> u64 {
    1800
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationsSection {
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for OperationsSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            workers: default_workers(),
        }
    }
}

fn default_timeout() -> u64 {
    120
}

fn default_workers() -> usize {
    4
}

/// `~/.gitbridge` (falls back to the working directory without a home)
pub fn gitbridge_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".gitbridge")
}

pub fn default_config_path() -> PathBuf {
    gitbridge_home().join("config.toml")
}

impl GatewayConfig {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    /// Environment overrides are applied either way.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) if !p.exists() => return Err(ConfigError::NotFound(p.display().to_string())),
            Some(p) => Self::from_file(p)?,
            None => {
                let p = default_config_path();
                if p.exists() {
                    Self::from_file(&p)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Apply `GITBRIDGE_PORT`, `GITBRIDGE_REPOS_ROOT` and `GITBRIDGE_TIMEOUT_SECS`
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        fn parse<T: std::str::FromStr>(name: &str, value: String) -> Result<T, ConfigError> {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue {
                    name: name.to_string(),
                    value,
                })
        }

        if let Some(port) = var("GITBRIDGE_PORT") {
            self.server.port = parse("GITBRIDGE_PORT", port)?;
        }
        if let Some(root) = var("GITBRIDGE_REPOS_ROOT").filter(|r| !r.trim().is_empty()) {
            self.repositories.root = PathBuf::from(root);
        }
        if let Some(timeout) = var("GITBRIDGE_TIMEOUT_SECS") {
            self.operations.timeout_secs = parse("GITBRIDGE_TIMEOUT_SECS", timeout)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.operations.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                name: "operations.timeout_secs".to_string(),
                value: "0".to_string(),
            });
        }
        if self.operations.workers == 0 {
            return Err(ConfigError::InvalidValue {
                name: "operations.workers".to_string(),
                value: "0".to_string(),
            });
        }
        if let Some(reference) = &self.transport.credential {
            if !self.credentials.contains_key(reference.name()) {
                return Err(ConfigError::InvalidValue {
                    name: "transport.credential".to_string(),
                    value: reference.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operations.timeout_secs)
    }

    /// `None` when idle eviction is disabled
    pub fn idle_eviction(&self) -> Option<Duration> {
        (self.repositories.idle_eviction_secs > 0)
            .then(|| Duration::from_secs(self.repositories.idle_eviction_secs))
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.bind, self.server.port)
    }
}
