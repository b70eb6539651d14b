//! Git working-tree operations used when applying a triage patch.

use std::path::Path;
use std::process::Command;

use crate::domain::error::{Result, TriageError};

/// Apply a unified diff file to the working tree with `git apply`.
pub fn apply_patch(repo_dir: &Path, patch_path: &Path) -> Result<()> {
    run_apply(repo_dir, patch_path, false)
}

/// Undo a previously applied diff file with `git apply -R`.
pub fn reverse_patch(repo_dir: &Path, patch_path: &Path) -> Result<()> {
    run_apply(repo_dir, patch_path, true)
}

fn run_apply(repo_dir: &Path, patch_path: &Path, reverse: bool) -> Result<()> {
    let command = if reverse { "git apply -R" } else { "git apply" };
    let output = Command::new("git")
        .arg("apply")
        .args(reverse.then_some("-R"))
        .arg("--whitespace=nowarn")
        .arg(patch_path)
        .current_dir(repo_dir)
        .output()
        .map_err(|e| TriageError::GitError(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TriageError::GitError(format!(
            "{command} failed: {}",
            stderr.trim()
        )));
    }

    Ok(())
}

/// Paths with unstaged modifications, as reported by `git diff --name-only`.
pub fn changed_files(repo_dir: &Path) -> Result<Vec<String>> {
    let output = Command::new("git")
        .args(["diff", "--name-only"])
        .current_dir(repo_dir)
        .output()
        .map_err(|e| TriageError::GitError(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TriageError::GitError(format!(
            "git diff --name-only failed: {}",
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// Check whether a directory is inside a git work tree.
pub fn is_git_repo(dir: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(dir)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
