//! Remote-facing operations: fetch, fast-forward pull, push, plus branch listing
//!
//! Network I/O goes through a [`Transport`]; everything that inspects or moves refs
//! locally uses the git executable, so the reported [`RefUpdate`]s look the same
//! whichever backend carried the bytes.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, info};

use super::error::GitOpError;
use super::utils::*;
use crate::transport::Transport;

fn require_remote(repo: &Path, remote: &str) -> Result<(), GitOpError> {
    validate_ref_component("remote", remote)?;
    if remote_url(repo, remote).is_none() {
        return Err(GitOpError::InvalidRequest(format!(
            "unknown remote '{}'",
            remote
        )));
    }
    Ok(())
}

fn fetched_refs(repo: &Path, remote: &str) -> Result<BTreeMap<String, String>, GitOpError> {
    let mut refs = snapshot_refs(repo, &format!("refs/remotes/{}/", remote))?;
    refs.extend(snapshot_refs(repo, "refs/tags/")?);
    Ok(refs)
}

/// Fetch `remote` and report every remote-tracking ref or tag that moved
pub fn fetch(
    repo: &Path,
    transport: &dyn Transport,
    remote: &str,
) -> Result<Vec<RefUpdate>, GitOpError> {
    require_remote(repo, remote)?;
    let before = fetched_refs(repo, remote)?;
    debug!(remote, backend = %transport.backend(), "fetching");
    transport.fetch(repo, remote)?;
    let after = fetched_refs(repo, remote)?;

    let updates = diff_refs(&before, &after);
    info!(remote, updated = updates.len(), "fetch complete");
    Ok(updates)
}

/// Branch a pull or push acts on: the requested one, else the checked-out one
fn target_branch(repo: &Path, requested: Option<&str>) -> Result<String, GitOpError> {
    let branch = match requested {
        Some(branch) => branch.to_string(),
        None => current_branch(repo).ok_or_else(|| {
            GitOpError::InvalidRequest("HEAD is detached; name a branch".to_string())
        })?,
    };
    validate_ref_component("branch", &branch)?;
    Ok(branch)
}

/// Fetch, then fast-forward the checked-out branch to its remote-tracking ref.
///
/// Diverged histories fail with [`GitOpError::NonFastForward`] before the working
/// copy is touched.
pub fn pull(
    repo: &Path,
    transport: &dyn Transport,
    remote: &str,
    branch: Option<&str>,
) -> Result<(MergeOutcome, Vec<RefUpdate>), GitOpError> {
    let branch = target_branch(repo, branch)?;
    match current_branch(repo) {
        Some(current) if current == branch => {}
        Some(current) => {
            return Err(GitOpError::InvalidRequest(format!(
                "can only pull the checked-out branch '{}', not '{}'",
                current, branch
            )))
        }
        None => {
            return Err(GitOpError::InvalidRequest(
                "HEAD is detached; nothing to fast-forward".to_string(),
            ))
        }
    }

    let updates = fetch(repo, transport, remote)?;

    let tracking = format!("refs/remotes/{}/{}", remote, branch);
    let upstream = rev_parse(repo, &tracking).ok_or_else(|| {
        GitOpError::InvalidRequest(format!("remote has no branch '{}/{}'", remote, branch))
    })?;
    let head = rev_parse(repo, "HEAD");

    let outcome = match head {
        Some(head) if head == upstream || is_ancestor(repo, &upstream, &head)? => {
            MergeOutcome::UpToDate { head: Some(head) }
        }
        Some(head) if !is_ancestor(repo, &head, &upstream)? => {
            return Err(GitOpError::NonFastForward {
                branch,
                local: head,
                remote: upstream,
            });
        }
        from => {
            let output = run_git(repo, ["merge", "--ff-only", "--quiet", upstream.as_str()])?;
            if !output.status.success() {
                return Err(GitOpError::Internal(format!(
                    "fast-forward failed: {}",
                    stderr_message(&output)
                )));
            }
            MergeOutcome::FastForward { from, to: upstream }
        }
    };

    debug!(branch = %branch, ?outcome, "pull finished");
    Ok((outcome, updates))
}

/// Push one branch to the same-named branch on `remote`.
///
/// On success the remote-tracking ref is moved to the pushed commit. The update
/// reports the previously known remote position as `old`.
pub fn push(
    repo: &Path,
    transport: &dyn Transport,
    remote: &str,
    branch: Option<&str>,
) -> Result<Vec<RefUpdate>, GitOpError> {
    require_remote(repo, remote)?;
    let branch = target_branch(repo, branch)?;

    let local_ref = format!("refs/heads/{}", branch);
    let local = rev_parse(repo, &local_ref).ok_or_else(|| {
        GitOpError::InvalidRequest(format!("branch '{}' has no commits", branch))
    })?;
    let tracking = format!("refs/remotes/{}/{}", remote, branch);
    let old = rev_parse(repo, &tracking);

    let refspec = format!("{}:{}", local_ref, local_ref);
    debug!(remote, refspec = %refspec, backend = %transport.backend(), "pushing");
    transport.push(repo, remote, &refspec)?;

    run_git_checked(
        repo,
        ["update-ref", tracking.as_str(), local.as_str()],
        "update-ref",
    )?;
    info!(remote, branch = %branch, "push complete");

    Ok(vec![RefUpdate {
        reference: local_ref,
        old,
        new: Some(local),
    }])
}

fn ref_names(repo: &Path, prefix: &str) -> Result<Vec<String>, GitOpError> {
    let output = run_git_checked(
        repo,
        ["for-each-ref", "--format=%(refname)", prefix],
        "for-each-ref",
    )?;
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| line.trim().strip_prefix(prefix))
        .filter(|name| !name.is_empty() && !name.ends_with("/HEAD"))
        .map(str::to_string)
        .collect())
}

/// Current, local and remote-tracking branch names
pub fn branches(repo: &Path) -> Result<BranchList, GitOpError> {
    Ok(BranchList {
        current: current_branch(repo),
        local: ref_names(repo, "refs/heads/")?,
        remote: ref_names(repo, "refs/remotes/")?,
    })
}
