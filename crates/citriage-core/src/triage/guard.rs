//! Pure validation of a model reply before anything touches the tree.
//!
//! Each step either passes, declines softly (nothing to apply, not an error)
//! or rejects with a [`TriageError`] that fails the run.

use serde::{Deserialize, Serialize};

use crate::autofix_policy::check_files;
use crate::domain::{Result, TriageError};

use super::client::TriageReply;
use super::config::TriageConfig;
use super::patch::{is_binary, touched_files};

const WORKFLOW_PREFIX: &str = ".github/workflows/";

/// Reasons for not applying anything that are not failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Decline {
    LowConfidenceOrEmptyPatch,
    PatchHasNoFiles,
    NoEffectiveChange,
}

impl Decline {
    pub fn reason_code(self) -> &'static str {
        match self {
            Self::LowConfidenceOrEmptyPatch => "low-confidence-or-empty-patch",
            Self::PatchHasNoFiles => "patch-has-no-files",
            Self::NoEffectiveChange => "no-effective-change",
        }
    }
}

/// A patch that passed every guard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovedPatch {
    pub patch: String,
    pub files: Vec<String>,
    pub confidence: f64,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Approved(ApprovedPatch),
    Declined(Decline),
}

/// Run every guard over the reply.
///
/// `file_size` reports the current size of an existing file, or `None` for
/// a file the patch creates.
pub fn validate_reply<F>(
    reply: &TriageReply,
    config: &TriageConfig,
    file_size: F,
) -> Result<Verdict>
where
    F: Fn(&str) -> Option<u64>,
{
    let patch = reply.patch.trim();
    if patch.is_empty() || reply.confidence < config.confidence_threshold {
        return Ok(Verdict::Declined(Decline::LowConfidenceOrEmptyPatch));
    }

    check_not_binary(patch)?;

    let files = touched_files(patch);
    if files.is_empty() {
        return Ok(Verdict::Declined(Decline::PatchHasNoFiles));
    }

    check_file_count(&files, config.max_files)?;
    for file in &files {
        check_path(file, config.forbid_workflow_edits)?;
        check_size(file, file_size(file), config.max_file_bytes)?;
    }

    Ok(Verdict::Approved(ApprovedPatch {
        patch: patch.to_string(),
        files,
        confidence: reply.confidence,
        rationale: reply.rationale.clone(),
    }))
}

pub fn check_not_binary(patch: &str) -> Result<()> {
    if is_binary(patch) {
        return Err(TriageError::BinaryPatch);
    }
    Ok(())
}

pub fn check_file_count(files: &[String], max: usize) -> Result<()> {
    if files.len() > max {
        return Err(TriageError::TooManyFiles {
            count: files.len(),
            max,
        });
    }
    Ok(())
}

/// Workflow ban first, then the autofix allow/deny rules.
pub fn check_path(file: &str, forbid_workflow_edits: bool) -> Result<()> {
    if forbid_workflow_edits && file.starts_with(WORKFLOW_PREFIX) {
        return Err(TriageError::ForbiddenPath {
            path: file.to_string(),
            reason: "workflow definitions are gated".to_string(),
        });
    }
    let policy = check_files(&[file]);
    if !policy.allowed {
        return Err(TriageError::ForbiddenPath {
            path: file.to_string(),
            reason: policy.violations.join("; "),
        });
    }
    Ok(())
}

/// New files (`size == None`) always pass.
pub fn check_size(file: &str, size: Option<u64>, max: u64) -> Result<()> {
    match size {
        Some(bytes) if bytes > max => Err(TriageError::FileTooLarge {
            path: file.to_string(),
            bytes,
            max,
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(confidence: f64, patch: &str) -> TriageReply {
        TriageReply {
            confidence,
            rationale: "fix".to_string(),
            patch: patch.to_string(),
        }
    }

    fn diff_for(files: &[&str]) -> String {
        files
            .iter()
            .map(|f| format!("diff --git a/{f} b/{f}\n--- a/{f}\n+++ b/{f}\n@@ -1 +1 @@\n-a\n+b\n"))
            .collect()
    }

    fn no_sizes(_: &str) -> Option<u64> {
        None
    }

    #[test]
    fn test_low_confidence_declines() {
        let patch = diff_for(&["src/a.ts"]);
        let verdict =
            validate_reply(&reply(0.5, &patch), &TriageConfig::default(), no_sizes).unwrap();
        assert_eq!(verdict, Verdict::Declined(Decline::LowConfidenceOrEmptyPatch));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let patch = diff_for(&["src/a.ts"]);
        let verdict =
            validate_reply(&reply(0.75, &patch), &TriageConfig::default(), no_sizes).unwrap();
        assert!(matches!(verdict, Verdict::Approved(_)));
    }

    #[test]
    fn test_empty_patch_declines() {
        let verdict =
            validate_reply(&reply(0.99, "   \n"), &TriageConfig::default(), no_sizes).unwrap();
        assert_eq!(verdict, Verdict::Declined(Decline::LowConfidenceOrEmptyPatch));
    }

    #[test]
    fn test_patch_without_files_declines() {
        let verdict =
            validate_reply(&reply(0.9, "just some words"), &TriageConfig::default(), no_sizes)
                .unwrap();
        assert_eq!(verdict, Verdict::Declined(Decline::PatchHasNoFiles));
    }

    #[test]
    fn test_binary_patch_rejected() {
        let patch = format!("{}\0", diff_for(&["src/a.ts"]));
        let err = validate_reply(&reply(0.9, &patch), &TriageConfig::default(), no_sizes)
            .unwrap_err();
        assert!(matches!(err, TriageError::BinaryPatch));
    }

    #[test]
    fn test_too_many_files_rejected() {
        let names: Vec<String> = (0..9).map(|i| format!("src/f{i}.ts")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let err = validate_reply(&reply(0.9, &diff_for(&refs)), &TriageConfig::default(), no_sizes)
            .unwrap_err();
        assert!(matches!(err, TriageError::TooManyFiles { count: 9, max: 8 }));
    }

    #[test]
    fn test_workflow_edit_gated() {
        let patch = diff_for(&[".github/workflows/ci.yml"]);
        let err = validate_reply(&reply(0.9, &patch), &TriageConfig::default(), no_sizes)
            .unwrap_err();
        assert_eq!(err.reason_code(), "forbidden-path");

        let open = TriageConfig {
            forbid_workflow_edits: false,
            ..TriageConfig::default()
        };
        assert!(matches!(
            validate_reply(&reply(0.9, &patch), &open, no_sizes).unwrap(),
            Verdict::Approved(_)
        ));
    }

    #[test]
    fn test_blocked_and_unlisted_paths_rejected() {
        for file in [".env.production", "prisma/migrations/1/migration.sql", "app/page.tsx"] {
            let patch = diff_for(&[file]);
            let err = validate_reply(&reply(0.9, &patch), &TriageConfig::default(), no_sizes)
                .unwrap_err();
            match err {
                TriageError::ForbiddenPath { path, .. } => assert_eq!(path, file),
                other => panic!("expected ForbiddenPath, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_file_size_guard() {
        let patch = diff_for(&["src/big.ts", "src/new.ts"]);
        let sizes = |path: &str| (path == "src/big.ts").then_some(300_000);
        let err = validate_reply(&reply(0.9, &patch), &TriageConfig::default(), sizes).unwrap_err();
        assert!(matches!(err, TriageError::FileTooLarge { bytes: 300_000, .. }));

        let small = |path: &str| (path == "src/big.ts").then_some(10);
        match validate_reply(&reply(0.9, &patch), &TriageConfig::default(), small).unwrap() {
            Verdict::Approved(approved) => {
                assert_eq!(approved.files, vec!["src/big.ts", "src/new.ts"]);
                assert_eq!(approved.confidence, 0.9);
            }
            other => panic!("expected approval, got {other:?}"),
        }
    }

    #[test]
    fn test_deleting_a_blocked_file_rejected() {
        let patch = format!(
            "{}diff --git a/.github/CODEOWNERS b/.github/CODEOWNERS\n\
             deleted file mode 100644\n\
             --- a/.github/CODEOWNERS\n\
             +++ /dev/null\n\
             @@ -1 +0,0 @@\n\
             -* @org/maintainers\n",
            diff_for(&["src/a.ts"])
        );
        let err = validate_reply(&reply(0.9, &patch), &TriageConfig::default(), no_sizes)
            .unwrap_err();
        match err {
            TriageError::ForbiddenPath { path, .. } => assert_eq!(path, ".github/CODEOWNERS"),
            other => panic!("expected ForbiddenPath, got {other:?}"),
        }
    }

    #[test]
    fn test_rename_into_workflows_rejected() {
        let patch = format!(
            "{}diff --git a/src/tool.yml b/.github/workflows/evil.yml\n\
             similarity index 100%\n\
             rename from src/tool.yml\n\
             rename to .github/workflows/evil.yml\n",
            diff_for(&["src/a.ts"])
        );
        let err = validate_reply(&reply(0.9, &patch), &TriageConfig::default(), no_sizes)
            .unwrap_err();
        match err {
            TriageError::ForbiddenPath { path, .. } => {
                assert_eq!(path, ".github/workflows/evil.yml")
            }
            other => panic!("expected ForbiddenPath, got {other:?}"),
        }
    }
}
