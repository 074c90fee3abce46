//! Shared fixtures: a temporary repository root plus a local bare "remote"
//! seeded with one commit on `main`.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use gitbridge_core::git::{BusyMode, CommitParams, OperationTicket, RepositoryManager};
use gitbridge_core::server::OperationHandler;
use gitbridge_core::transport::{
    ConfigCredentialStore, SshBackend, TransportConfig, TransportSelector,
};

pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub root: PathBuf,
    pub remote: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("repos");
        fs::create_dir_all(&root).unwrap();
        let remote = dir.path().join("remote.git");
        git(dir.path(), &["init", "--quiet", "--bare", "--initial-branch=main", "remote.git"]);

        let seed = dir.path().join("seed");
        fs::create_dir_all(&seed).unwrap();
        git(&seed, &["init", "--quiet", "--initial-branch=main"]);
        fs::write(seed.join("README.md"), "seed\n").unwrap();
        git(&seed, &["add", "README.md"]);
        git(
            &seed,
            &[
                "-c",
                "user.name=Seed",
                "-c",
                "user.email=seed@example.com",
                "commit",
                "--quiet",
                "-m",
                "initial",
            ],
        );
        git(&seed, &["push", "--quiet", remote.to_str().unwrap(), "main"]);

        Self { dir, root, remote }
    }

    pub fn remote_url(&self) -> String {
        self.remote.display().to_string()
    }

    /// Same remote as a `file://` URL, which both transport backends accept
    pub fn remote_file_url(&self) -> String {
        format!("file://{}", self.remote.display())
    }

    pub fn manager(&self, mode: BusyMode) -> Arc<RepositoryManager> {
        self.manager_with(mode, SshBackend::default())
    }

    pub fn manager_with(&self, mode: BusyMode, backend: SshBackend) -> Arc<RepositoryManager> {
        let transport = TransportConfig {
            backend,
            ..TransportConfig::default()
        };
        Arc::new(
            RepositoryManager::new(
                &self.root,
                mode,
                transport,
                TransportSelector::new(Arc::new(ConfigCredentialStore::default())),
            )
            .expect("manager")
            .with_worker_limit(4),
        )
    }

    pub fn handler(&self, mode: BusyMode, timeout: Duration) -> Arc<OperationHandler> {
        Arc::new(OperationHandler::new(self.manager(mode), timeout))
    }

    /// Clone the remote into `name` through its `file://` URL
    pub fn clone_file_url_into(&self, manager: &RepositoryManager, name: &str) -> PathBuf {
        manager
            .open_or_clone(name, Some(&self.remote_file_url()), None, None, &OperationTicket::new())
            .expect("clone");
        manager.root().join(name)
    }

    /// Clone the remote into `name` under the repository root
    pub fn clone_into(&self, manager: &RepositoryManager, name: &str) -> PathBuf {
        manager
            .open_or_clone(name, Some(&self.remote_url()), None, None, &OperationTicket::new())
            .expect("clone");
        manager.root().join(name)
    }

    /// Head of `main` in the bare remote
    pub fn remote_head(&self) -> String {
        rev_parse(&self.remote, "refs/heads/main")
    }

    /// Install an executable hook script in the bare remote
    #[cfg(unix)]
    pub fn install_hook(&self, name: &str, body: &str) {
        use std::os::unix::fs::PermissionsExt;
        let path = self.remote.join("hooks").join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }
}

pub fn git(cwd: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .current_dir(cwd)
        .args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("spawn git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

pub fn rev_parse(repo: &Path, rev: &str) -> String {
    git(repo, &["rev-parse", rev])
}

pub fn commit_params(message: &str, paths: &[&str]) -> CommitParams {
    CommitParams {
        message: message.to_string(),
        author_name: "Ada Lovelace".to_string(),
        author_email: "ada@example.com".to_string(),
        paths: paths.iter().map(|p| p.to_string()).collect(),
    }
}
