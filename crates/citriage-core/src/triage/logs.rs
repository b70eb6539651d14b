//! Collecting CI log text for triage.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::domain::Result;
use crate::github::truncate_chars;

const MAX_DISCOVERED_FILES: usize = 60;
const MAX_READ_FILES: usize = 50;
const MAX_CHARS_PER_FILE: usize = 20_000;
const MAX_TOTAL_CHARS: usize = 160_000;

/// Read a text file, replacing invalid UTF-8, truncated to `max_chars`.
pub fn read_truncated(path: &Path, max_chars: usize) -> Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(truncate_chars(&String::from_utf8_lossy(&bytes), max_chars))
}

/// Concatenate the files under a downloaded log directory.
///
/// Each file is prefixed with a `===== path =====` header. Discovery, read
/// count, per-file size and total size are all bounded. A missing directory
/// yields an empty string.
pub fn collect_log_dir(root: &Path) -> Result<String> {
    if !root.exists() {
        return Ok(String::new());
    }

    let mut stack = vec![root.to_path_buf()];
    let mut files: Vec<PathBuf> = Vec::new();

    while let Some(dir) = stack.pop() {
        if files.len() >= MAX_DISCOVERED_FILES {
            break;
        }
        let mut entries: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .collect();
        entries.sort();

        for path in entries {
            if path.is_dir() {
                stack.push(path);
            } else if path.is_file() {
                files.push(path);
            }
        }
    }

    let mut output = String::new();
    let mut total_chars = 0usize;
    for path in files.iter().take(MAX_READ_FILES) {
        let content = read_truncated(path, MAX_CHARS_PER_FILE)?;
        let section = format!("\n\n===== {} =====\n{}", path.display(), content);
        total_chars += section.chars().count();
        output.push_str(&section);
        if total_chars >= MAX_TOTAL_CHARS {
            break;
        }
    }

    debug!(root = %root.display(), files = files.len(), "collected logs");
    Ok(truncate_chars(&output, MAX_TOTAL_CHARS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let logs = collect_log_dir(&dir.path().join("absent")).unwrap();
        assert!(logs.is_empty());
    }

    #[test]
    fn test_collects_nested_files_with_headers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("lint")).unwrap();
        std::fs::write(dir.path().join("lint/1_eslint.txt"), "ESLint found 2 errors").unwrap();
        std::fs::write(dir.path().join("build.txt"), "Build failed").unwrap();

        let logs = collect_log_dir(dir.path()).unwrap();
        assert!(logs.contains("build.txt ====="));
        assert!(logs.contains("1_eslint.txt ====="));
        assert!(logs.contains("ESLint found 2 errors"));
        assert!(logs.contains("Build failed"));
    }

    #[test]
    fn test_per_file_truncation() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("huge.txt"), "x".repeat(MAX_CHARS_PER_FILE + 500)).unwrap();

        let logs = collect_log_dir(dir.path()).unwrap();
        let (_, body) = logs.split_once("=====\n").unwrap();
        assert_eq!(body.len(), MAX_CHARS_PER_FILE);
    }

    #[test]
    fn test_read_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.txt");
        std::fs::write(&path, "abcdef").unwrap();
        assert_eq!(read_truncated(&path, 3).unwrap(), "abc");
    }
}
