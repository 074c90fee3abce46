//! Working-tree status queries

use std::path::Path;

use super::error::GitOpError;
use super::utils::*;

/// Single status character (X or Y) to an entry code
fn char_to_code(c: char) -> String {
    match c {
        '?' => "??".to_string(),
        '!' => "!!".to_string(),
        _ => c.to_string(),
    }
}

/// Parse `git status --porcelain=v1 -z` output
///
/// Format: `XY PATH\0`, or `XY NEW\0ORIG\0` for renames and copies.
/// X = index (staged), Y = work tree (unstaged). A line yields one entry per
/// non-blank side so staged and unstaged changes stay distinguishable.
pub(super) fn parse_porcelain_status(output: &str) -> Vec<FileStatusEntry> {
    let mut items = Vec::new();
    let parts: Vec<&str> = output.split('\0').collect();

    let mut i = 0;
    while i < parts.len() {
        let part = parts[i];
        if part.len() < 4 {
            i += 1;
            continue;
        }

        let mut chars = part.chars();
        let x = chars.next().unwrap_or(' ');
        let y = chars.next().unwrap_or(' ');
        let path = part[3..].to_string();

        let renamed = matches!(x, 'R' | 'C') || matches!(y, 'R' | 'C');
        let (orig_path, advance) = if renamed && i + 1 < parts.len() && !parts[i + 1].is_empty() {
            (Some(parts[i + 1].to_string()), 2)
        } else {
            (None, 1)
        };

        if (x == '?' && y == '?') || (x == '!' && y == '!') {
            items.push(FileStatusEntry {
                path,
                code: char_to_code(x),
                orig_path,
                staged: false,
            });
            i += advance;
            continue;
        }

        if x != ' ' {
            items.push(FileStatusEntry {
                path: path.clone(),
                code: char_to_code(x),
                orig_path: orig_path.clone(),
                staged: true,
            });
        }
        if y != ' ' {
            items.push(FileStatusEntry {
                path,
                code: char_to_code(y),
                orig_path,
                staged: false,
            });
        }

        i += advance;
    }

    items
}

/// Working tree vs index vs HEAD. Never mutates the repository.
pub fn git_status(repo: &Path) -> Result<Vec<FileStatusEntry>, GitOpError> {
    let output = run_git_checked(
        repo,
        [
            "-c",
            "core.quotepath=off",
            "status",
            "--porcelain=v1",
            "-z",
            "--untracked-files=all",
        ],
        "status",
    )?;
    Ok(parse_porcelain_status(&String::from_utf8_lossy(
        &output.stdout,
    )))
}

/// Whether the index differs from HEAD (or holds anything at all on an unborn branch)
pub fn has_staged_changes(repo: &Path) -> Result<bool, GitOpError> {
    let output = run_git(repo, ["diff", "--cached", "--quiet"])?;
    match output.status.code() {
        Some(0) => Ok(false),
        Some(1) => Ok(true),
        _ => Err(GitOpError::Internal(format!(
            "diff --cached failed: {}",
            stderr_message(&output)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_splits_index_and_worktree() {
        let items = parse_porcelain_status("MM src/lib.rs\0?? notes.txt\0A  added.rs\0");
        assert_eq!(items.len(), 4);
        assert_eq!(items[0].path, "src/lib.rs");
        assert!(items[0].staged);
        assert_eq!(items[1].code, "M");
        assert!(!items[1].staged);
        assert_eq!(items[2].code, "??");
        assert!(!items[2].staged);
        assert_eq!(items[3].code, "A");
        assert!(items[3].staged);
    }

    #[test]
    fn test_parse_rename_orders_new_then_orig() {
        let items = parse_porcelain_status("R  new.rs\0old.rs\0 D gone.rs\0");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].path, "new.rs");
        assert_eq!(items[0].orig_path.as_deref(), Some("old.rs"));
        assert_eq!(items[1].path, "gone.rs");
        assert_eq!(items[1].code, "D");
        assert!(!items[1].staged);
    }

    #[test]
    fn test_parse_empty() {
        assert!(parse_porcelain_status("").is_empty());
    }
}
