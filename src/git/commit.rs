//! Commit with an explicit author identity
//!
//! Optional paths are staged first. The index file is snapshotted before staging
//! and put back if no commit results, so a failed commit leaves the index as the
//! caller found it.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::error::GitOpError;
use super::status::has_staged_changes;
use super::utils::*;

/// Parameters of a commit
#[derive(Debug, Clone, Default)]
pub struct CommitParams {
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    /// Repository-relative paths to stage before committing
    pub paths: Vec<String>,
}

/// Saved copy of `.git/index` (absent if the repository had none yet)
struct IndexSnapshot {
    path: PathBuf,
    contents: Option<Vec<u8>>,
}

impl IndexSnapshot {
    fn take(repo: &Path) -> Result<Self, GitOpError> {
        let output = run_git_checked(repo, ["rev-parse", "--git-path", "index"], "rev-parse")?;
        let git_path = PathBuf::from(stdout_trimmed(&output));
        let path = if git_path.is_absolute() {
            git_path
        } else {
            repo.join(git_path)
        };
        let contents = match fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, contents })
    }

    fn restore(self) {
        let result = match &self.contents {
            Some(bytes) => fs::write(&self.path, bytes),
            None => match fs::remove_file(&self.path) {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                other => other,
            },
        };
        if let Err(e) = result {
            warn!("Failed to restore index {}: {}", self.path.display(), e);
        }
    }
}

/// Commit the staged changes and return the full id of the new commit.
pub fn git_commit(repo: &Path, params: &CommitParams) -> Result<String, GitOpError> {
    let author_name = params.author_name.trim();
    let author_email = params.author_email.trim();
    if author_name.is_empty() || author_email.is_empty() {
        return Err(GitOpError::IdentityRequired);
    }

    let message = params.message.trim();
    if message.is_empty() {
        return Err(GitOpError::InvalidRequest(
            "commit message cannot be empty".to_string(),
        ));
    }

    for path in &params.paths {
        confine_lexically(repo, path)?;
    }

    let snapshot = IndexSnapshot::take(repo)?;
    match stage_and_commit(repo, params, message, author_name, author_email) {
        Ok(sha) => Ok(sha),
        Err(e) => {
            if !params.paths.is_empty() {
                debug!("Commit failed, restoring index snapshot");
                snapshot.restore();
            }
            Err(e)
        }
    }
}

fn stage_and_commit(
    repo: &Path,
    params: &CommitParams,
    message: &str,
    author_name: &str,
    author_email: &str,
) -> Result<String, GitOpError> {
    if !params.paths.is_empty() {
        let output = git_command(repo)
            .args(["add", "-A", "--"])
            .args(&params.paths)
            .output()?;
        if !output.status.success() {
            return Err(GitOpError::InvalidRequest(format!(
                "cannot stage paths: {}",
                stderr_message(&output)
            )));
        }
    }

    if !has_staged_changes(repo)? {
        return Err(GitOpError::NothingToCommit);
    }

    let output = git_command(repo)
        .arg("-c")
        .arg(format!("user.name={}", author_name))
        .arg("-c")
        .arg(format!("user.email={}", author_email))
        .args(["commit", "--quiet", "--cleanup=strip", "-m", message])
        .env("GIT_AUTHOR_NAME", author_name)
        .env("GIT_AUTHOR_EMAIL", author_email)
        .env("GIT_COMMITTER_NAME", author_name)
        .env("GIT_COMMITTER_EMAIL", author_email)
        .output()?;

    if !output.status.success() {
        let stderr = stderr_message(&output);
        return Err(if stderr.contains("pre-commit") || stderr.contains("hook") {
            GitOpError::Internal(format!("Pre-commit hook failed: {}", stderr))
        } else {
            GitOpError::Internal(format!("Commit failed: {}", stderr))
        });
    }

    rev_parse(repo, "HEAD")
        .ok_or_else(|| GitOpError::Internal("HEAD missing after commit".to_string()))
}
