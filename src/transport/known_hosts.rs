//! Minimal OpenSSH `known_hosts` handling for the in-process backend.
//!
//! Supports plain host patterns (comma separated), `[host]:port` entries and the
//! `@revoked` marker. Hashed (`|1|...`) entries and `@cert-authority` lines are
//! skipped.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

/// Outcome of looking a presented host key up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyMatch {
    Known,
    Unknown,
    Mismatch,
    Revoked,
}

#[derive(Debug, Clone)]
struct Entry {
    revoked: bool,
    hosts: Vec<String>,
    key: Vec<u8>,
}

/// Parsed known-hosts file
#[derive(Debug, Clone, Default)]
pub struct KnownHosts {
    entries: Vec<Entry>,
}

/// Host pattern as written in known_hosts: bare for port 22, bracketed otherwise
pub fn host_pattern(host: &str, port: u16) -> String {
    if port == 22 {
        host.to_string()
    } else {
        format!("[{}]:{}", host, port)
    }
}

/// Algorithm name embedded at the start of an SSH public key blob
pub fn key_type_of(blob: &[u8]) -> Option<&str> {
    let len_bytes: [u8; 4] = blob.get(..4)?.try_into().ok()?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    std::str::from_utf8(blob.get(4..4 + len)?).ok()
}

impl KnownHosts {
    pub fn parse(content: &str) -> Self {
        let entries = content
            .lines()
            .filter_map(|line| {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    return None;
                }
                let mut fields = line.split_whitespace().peekable();
                let mut revoked = false;
                let marker = fields.peek().copied().filter(|f| f.starts_with('@'));
                if let Some(marker) = marker {
                    match marker {
                        "@revoked" => revoked = true,
                        _ => return None,
                    }
                    fields.next();
                }
                let hosts = fields.next()?;
                if hosts.starts_with('|') {
                    return None;
                }
                let _key_type = fields.next()?;
                let key = BASE64.decode(fields.next()?).ok()?;
                Some(Entry {
                    revoked,
                    hosts: hosts.split(',').map(|h| h.to_ascii_lowercase()).collect(),
                    key,
                })
            })
            .collect();
        Self { entries }
    }

    /// Load a known-hosts file; a missing file is an empty set
    pub fn load(path: &Path) -> std::io::Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Self::parse(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    pub fn check(&self, host: &str, port: u16, key: &[u8]) -> HostKeyMatch {
        let pattern = host_pattern(&host.to_ascii_lowercase(), port);
        let mut seen_host = false;
        let mut known = false;
        for entry in self.entries.iter().filter(|e| e.hosts.contains(&pattern)) {
            if entry.key == key {
                if entry.revoked {
                    return HostKeyMatch::Revoked;
                }
                known = true;
            } else if !entry.revoked {
                seen_host = true;
            }
        }
        if known {
            HostKeyMatch::Known
        } else if seen_host {
            HostKeyMatch::Mismatch
        } else {
            HostKeyMatch::Unknown
        }
    }

    /// Append a new host key line to `path`, creating the file if needed.
    pub fn append(path: &Path, host: &str, port: u16, key: &[u8]) -> std::io::Result<()> {
        let key_type = key_type_of(key).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "malformed host key blob")
        })?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(
            file,
            "{} {} {}",
            host_pattern(&host.to_ascii_lowercase(), port),
            key_type,
            BASE64.encode(key)
        )
    }
}
