//! Git utilities - shared types, path confinement, and command helpers
//!
//! Every local git operation shells out to the `git` executable; the helpers here
//! build those commands with a non-interactive environment and turn their output
//! into [`GitOpError`]s.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Output, Stdio};

use serde::{Deserialize, Serialize};

use super::error::GitOpError;

/// Default remote used when a request names none
pub const DEFAULT_REMOTE: &str = "origin";

/// Git status entry (porcelain v1: X=index/staged, Y=worktree/unstaged)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStatusEntry {
    pub path: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orig_path: Option<String>,
    /// Whether this entry describes the index (X) rather than the working tree (Y)
    pub staged: bool,
}

/// Before/after pair of a reference touched by fetch or push.
/// `None` on either side means the ref did not exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefUpdate {
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<String>,
}

/// Result of the merge half of a pull
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MergeOutcome {
    UpToDate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        head: Option<String>,
    },
    FastForward {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        to: String,
    },
}

/// Branch listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchList {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<String>,
    pub local: Vec<String>,
    pub remote: Vec<String>,
}

/// Build a `git` command rooted at `repo` that never prompts.
pub fn git_command(repo: &Path) -> Command {
    let mut cmd = Command::new("git");
    cmd.arg("-C")
        .arg(repo)
        .env("GIT_TERMINAL_PROMPT", "0")
        .env("LC_ALL", "C")
        .stdin(Stdio::null());
    cmd
}

/// Run a git command to completion, mapping spawn failures to internal errors.
pub fn run_git<I, S>(repo: &Path, args: I) -> Result<Output, GitOpError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    git_command(repo)
        .args(args)
        .output()
        .map_err(|e| GitOpError::Internal(format!("Failed to run git: {}", e)))
}

/// Run a git command that is expected to succeed; a failure becomes an internal error
/// carrying git's own message.
pub fn run_git_checked<I, S>(repo: &Path, args: I, what: &str) -> Result<Output, GitOpError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_git(repo, args)?;
    if output.status.success() {
        Ok(output)
    } else {
        Err(GitOpError::Internal(format!(
            "{} failed: {}",
            what,
            stderr_message(&output)
        )))
    }
}

pub fn stdout_trimmed(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Trimmed stderr, or a generic message when git printed nothing
pub fn stderr_message(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        format!("git exited with {}", output.status)
    } else {
        stderr
    }
}

/// Whether `path` is the top level of a git working copy.
///
/// A directory nested inside some other repository does not count.
pub fn is_repository(path: &Path) -> bool {
    if !path.is_dir() {
        return false;
    }
    let output = match run_git(path, ["rev-parse", "--show-toplevel"]) {
        Ok(o) if o.status.success() => o,
        _ => return false,
    };
    let toplevel = PathBuf::from(stdout_trimmed(&output));
    match (toplevel.canonicalize(), path.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Resolve a revision to a full object id, `None` if it does not exist
pub fn rev_parse(repo: &Path, rev: &str) -> Option<String> {
    let commitish = format!("{}^{{commit}}", rev);
    let output = run_git(repo, ["rev-parse", "--verify", "--quiet", commitish.as_str()]).ok()?;
    if output.status.success() {
        Some(stdout_trimmed(&output))
    } else {
        None
    }
}

/// Short name of the checked-out branch, `None` when HEAD is detached
pub fn current_branch(repo: &Path) -> Option<String> {
    let output = run_git(repo, ["symbolic-ref", "--quiet", "--short", "HEAD"]).ok()?;
    if output.status.success() {
        Some(stdout_trimmed(&output))
    } else {
        None
    }
}

/// URL configured for `remote`, `None` if the remote does not exist
pub fn remote_url(repo: &Path, remote: &str) -> Option<String> {
    let output = run_git(repo, ["remote", "get-url", remote]).ok()?;
    if output.status.success() {
        Some(stdout_trimmed(&output))
    } else {
        None
    }
}

/// `git merge-base --is-ancestor`: exit 0 = ancestor, 1 = not, anything else is an error
pub fn is_ancestor(repo: &Path, ancestor: &str, descendant: &str) -> Result<bool, GitOpError> {
    let output = run_git(repo, ["merge-base", "--is-ancestor", ancestor, descendant])?;
    match output.status.code() {
        Some(0) => Ok(true),
        Some(1) => Ok(false),
        _ => Err(GitOpError::Internal(format!(
            "merge-base failed: {}",
            stderr_message(&output)
        ))),
    }
}

/// Snapshot `refname -> objectname` for every ref under `prefix`
pub fn snapshot_refs(repo: &Path, prefix: &str) -> Result<BTreeMap<String, String>, GitOpError> {
    let output = run_git_checked(
        repo,
        ["for-each-ref", "--format=%(objectname) %(refname)", prefix],
        "for-each-ref",
    )?;
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| {
            let (oid, name) = line.split_once(' ')?;
            Some((name.to_string(), oid.to_string()))
        })
        .collect())
}

/// Compare two ref snapshots, yielding created, moved and deleted refs
pub fn diff_refs(
    before: &BTreeMap<String, String>,
    after: &BTreeMap<String, String>,
) -> Vec<RefUpdate> {
    let mut updates = Vec::new();
    for (name, new) in after {
        match before.get(name) {
            Some(old) if old == new => {}
            old => updates.push(RefUpdate {
                reference: name.clone(),
                old: old.cloned(),
                new: Some(new.clone()),
            }),
        }
    }
    for (name, old) in before {
        if !after.contains_key(name) {
            updates.push(RefUpdate {
                reference: name.clone(),
                old: Some(old.clone()),
                new: None,
            });
        }
    }
    updates
}

/// Validate a branch or remote name supplied by a caller
pub fn validate_ref_component(kind: &str, name: &str) -> Result<(), GitOpError> {
    let bad = name.is_empty()
        || name.starts_with('-')
        || name.starts_with('/')
        || name.ends_with('/')
        || name.ends_with(".lock")
        || name.contains("..")
        || name.contains("@{")
        || name
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || "~^:?*[\\".contains(c));
    if bad {
        Err(GitOpError::InvalidRequest(format!(
            "invalid {} name '{}'",
            kind, name
        )))
    } else {
        Ok(())
    }
}

/// Lexically normalize `requested` against `base`, refusing anything that leaves it.
///
/// Relative paths are joined onto `base`; absolute paths must already lie under it.
/// Returns the normalized absolute path (which may not exist yet).
pub fn confine_lexically(base: &Path, requested: &str) -> Result<PathBuf, GitOpError> {
    let escape = || GitOpError::InvalidPath(requested.to_string());
    if requested.trim().is_empty() || requested.contains('\0') {
        return Err(escape());
    }

    let requested_path = Path::new(requested);
    let relative = if requested_path.is_absolute() {
        requested_path.strip_prefix(base).map_err(|_| escape())?
    } else {
        requested_path
    };

    let mut parts: Vec<&OsStr> = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(escape());
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(escape()),
        }
    }

    if parts.is_empty() {
        return Err(escape());
    }

    let mut resolved = base.to_path_buf();
    resolved.extend(parts);
    Ok(resolved)
}

/// Canonicalize the deepest existing ancestor of `path` and re-append the rest.
pub fn canonicalize_existing_prefix(path: &Path) -> std::io::Result<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut rest: Vec<std::ffi::OsString> = Vec::new();
    loop {
        if existing.exists() {
            break;
        }
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                rest.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => break,
        }
    }
    let mut canonical = existing.canonicalize()?;
    for part in rest.into_iter().rev() {
        canonical.push(part);
    }
    Ok(canonical)
}

/// Resolve a request path to a canonical location strictly inside `root`.
///
/// `root` must already be canonical. Symlinks that point outside the root are
/// rejected the same way as `..` escapes. Nothing on disk is modified.
pub fn resolve_under_root(root: &Path, requested: &str) -> Result<PathBuf, GitOpError> {
    let lexical = confine_lexically(root, requested)?;
    let canonical = canonicalize_existing_prefix(&lexical)
        .map_err(|_| GitOpError::InvalidPath(requested.to_string()))?;
    if canonical == root || !canonical.starts_with(root) {
        return Err(GitOpError::InvalidPath(requested.to_string()));
    }
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confine_rejects_escapes() {
        let root = Path::new("/srv/repos");
        assert!(matches!(
            confine_lexically(root, "../etc"),
            Err(GitOpError::InvalidPath(_))
        ));
        assert!(confine_lexically(root, "a/../../b").is_err());
        assert!(confine_lexically(root, "/etc/passwd").is_err());
        assert!(confine_lexically(root, "").is_err());
        assert!(confine_lexically(root, ".").is_err());
    }

    #[test]
    fn test_confine_accepts_nested_paths() {
        let root = Path::new("/srv/repos");
        assert_eq!(
            confine_lexically(root, "projects/./alpha").unwrap(),
            PathBuf::from("/srv/repos/projects/alpha")
        );
        assert_eq!(
            confine_lexically(root, "a/b/../c").unwrap(),
            PathBuf::from("/srv/repos/a/c")
        );
        assert_eq!(
            confine_lexically(root, "/srv/repos/alpha").unwrap(),
            PathBuf::from("/srv/repos/alpha")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_symlink_escape() {
        let outside = tempfile::tempdir().unwrap();
        let root_dir = tempfile::tempdir().unwrap();
        let root = root_dir.path().canonicalize().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("link")).unwrap();

        assert!(matches!(
            resolve_under_root(&root, "link/repo"),
            Err(GitOpError::InvalidPath(_))
        ));
        let ok = resolve_under_root(&root, "fresh/repo").unwrap();
        assert_eq!(ok, root.join("fresh").join("repo"));
        assert!(!root.join("fresh").exists());
    }

    #[test]
    fn test_diff_refs() {
        let before: BTreeMap<String, String> = [
            ("refs/remotes/origin/main".to_string(), "a".to_string()),
            ("refs/remotes/origin/old".to_string(), "b".to_string()),
            ("refs/remotes/origin/same".to_string(), "c".to_string()),
        ]
        .into_iter()
        .collect();
        let after: BTreeMap<String, String> = [
            ("refs/remotes/origin/main".to_string(), "d".to_string()),
            ("refs/remotes/origin/new".to_string(), "e".to_string()),
            ("refs/remotes/origin/same".to_string(), "c".to_string()),
        ]
        .into_iter()
        .collect();

        let updates = diff_refs(&before, &after);
        assert_eq!(updates.len(), 3);
        assert!(updates.contains(&RefUpdate {
            reference: "refs/remotes/origin/main".into(),
            old: Some("a".into()),
            new: Some("d".into()),
        }));
        assert!(updates.contains(&RefUpdate {
            reference: "refs/remotes/origin/new".into(),
            old: None,
            new: Some("e".into()),
        }));
        assert!(updates.contains(&RefUpdate {
            reference: "refs/remotes/origin/old".into(),
            old: Some("b".into()),
            new: None,
        }));
    }

    #[test]
    fn test_validate_ref_component() {
        assert!(validate_ref_component("branch", "feature/login").is_ok());
        assert!(validate_ref_component("branch", "-delete").is_err());
        assert!(validate_ref_component("branch", "a..b").is_err());
        assert!(validate_ref_component("branch", "has space").is_err());
        assert!(validate_ref_component("remote", "").is_err());
    }
}
