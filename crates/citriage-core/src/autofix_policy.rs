//! Autofix policy engine.
//!
//! Decides whether an automated patch may be applied. Every check returns a
//! [`PolicyCheckResult`]; none of them fail or short-circuit, so a reviewer
//! always sees the complete list of violations.
//!
//! The file check is default-deny: a path must be on the allowlist and must
//! not match any blocked pattern.

use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::diff::{diff_lines, DiffLine};

/// Maximum number of files an autofix change may touch.
pub const MAX_CHANGED_FILES: usize = 20;

/// Maximum diff size in changed lines (inclusive).
pub const MAX_DIFF_LINES: usize = 500;

/// Minimum hours between two automated fixes of the same commit.
pub const COOLDOWN_HOURS: u32 = 6;

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// Outcome of one policy check, or of [`full_check`].
///
/// `allowed` is derived from `violations` and cannot disagree with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyCheckResult {
    pub allowed: bool,
    pub violations: Vec<String>,
}

impl PolicyCheckResult {
    fn from_violations(violations: Vec<String>) -> Self {
        Self {
            allowed: violations.is_empty(),
            violations,
        }
    }
}

/// Inputs to [`full_check`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutofixCandidate {
    pub files: Vec<String>,
    pub diff_lines: usize,
    /// Unix epoch milliseconds of the last automated fix, if any.
    pub last_fix_timestamp: Option<i64>,
}

// ---------------------------------------------------------------------------
// Path patterns
// ---------------------------------------------------------------------------

const ALLOWED_PATTERNS: &[&str] = &[
    r"^src/",
    r"^tests/",
    r"^tools/",
    r"^\.eslintrc",
    r"^\.prettierrc",
    r"^tsconfig.*\.json$",
    r"^vitest\.config\.",
    r"^tailwind\.config\.",
    r"^postcss\.config\.",
    r"^next\.config\.",
];

const BLOCKED_PATTERNS: &[&str] = &[
    r"^prisma/migrations/",
    r"^supabase/migrations/",
    r"\.env",
    r"(?i)secret",
    r"^\.github/CODEOWNERS$",
    r"package-lock\.json$",
];

// Root-level configs are acceptable targets for lint/format fixes.
const ROOT_CONFIG_PATTERNS: &[&str] = &[r"^\.[a-z]", r"^[a-z]+\.config\."];

struct PathRules {
    allowed: Vec<Regex>,
    blocked: Vec<Regex>,
    root_config: Vec<Regex>,
}

fn compile(sources: &[&str]) -> Vec<Regex> {
    sources
        .iter()
        .map(|s| Regex::new(s).expect("built-in pattern compiles"))
        .collect()
}

fn rules() -> &'static PathRules {
    static RULES: OnceLock<PathRules> = OnceLock::new();
    RULES.get_or_init(|| PathRules {
        allowed: compile(ALLOWED_PATTERNS),
        blocked: compile(BLOCKED_PATTERNS),
        root_config: compile(ROOT_CONFIG_PATTERNS),
    })
}

/// Blocked patterns the path matches, in declaration order.
pub fn blocked_matches(path: &str) -> Vec<&'static str> {
    rules()
        .blocked
        .iter()
        .filter(|re| re.is_match(path))
        .map(|re| re.as_str())
        .collect()
}

/// Whether the path is on the allowlist (prefix or root config).
pub fn is_allowlisted(path: &str) -> bool {
    let rules = rules();
    rules.allowed.iter().any(|re| re.is_match(path))
        || rules.root_config.iter().any(|re| re.is_match(path))
}

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

/// Check a set of changed paths against the file-count limit, the blocklist
/// and the allowlist.
pub fn check_files<S: AsRef<str>>(paths: &[S]) -> PolicyCheckResult {
    let mut violations = Vec::new();

    if paths.len() > MAX_CHANGED_FILES {
        violations.push(format!(
            "Too many files changed: {} (max {})",
            paths.len(),
            MAX_CHANGED_FILES
        ));
    }

    for path in paths {
        let path = path.as_ref();
        let blocked = blocked_matches(path);
        if blocked.is_empty() {
            if !is_allowlisted(path) {
                violations.push(format!("File not in allowlist: {path}"));
            }
        } else {
            for pattern in blocked {
                violations.push(format!("Blocked file: {path} (matches {pattern})"));
            }
        }
    }

    PolicyCheckResult::from_violations(violations)
}

/// Check the diff size; exactly [`MAX_DIFF_LINES`] is allowed.
pub fn check_diff_size(line_count: usize) -> PolicyCheckResult {
    let mut violations = Vec::new();
    if line_count > MAX_DIFF_LINES {
        violations.push(format!(
            "Diff too large: {line_count} lines (max {MAX_DIFF_LINES})"
        ));
    }
    PolicyCheckResult::from_violations(violations)
}

/// Check the cooldown since the last automated fix at an explicit `now_ms`.
///
/// No previous fix is always allowed; exactly [`COOLDOWN_HOURS`] is allowed.
pub fn check_cooldown(last_fix_ms: Option<i64>, now_ms: i64) -> PolicyCheckResult {
    let mut violations = Vec::new();
    if let Some(last) = last_fix_ms {
        let elapsed_hours = now_ms.saturating_sub(last) as f64 / MILLIS_PER_HOUR;
        if elapsed_hours < f64::from(COOLDOWN_HOURS) {
            violations.push(format!(
                "Cooldown active: {elapsed_hours:.1}h elapsed (min {COOLDOWN_HOURS}h)"
            ));
        }
    }
    PolicyCheckResult::from_violations(violations)
}

/// [`check_cooldown`] against the current UTC clock.
pub fn check_cooldown_now(last_fix_ms: Option<i64>) -> PolicyCheckResult {
    check_cooldown(last_fix_ms, Utc::now().timestamp_millis())
}

/// Run every check against the current clock.
pub fn full_check(candidate: &AutofixCandidate) -> PolicyCheckResult {
    full_check_at(candidate, Utc::now().timestamp_millis())
}

/// Run every check unconditionally and concatenate violations in the order
/// files, diff size, cooldown.
pub fn full_check_at(candidate: &AutofixCandidate, now_ms: i64) -> PolicyCheckResult {
    let checks = [
        check_files(&candidate.files),
        check_diff_size(candidate.diff_lines),
        check_cooldown(candidate.last_fix_timestamp, now_ms),
    ];
    let violations = checks.into_iter().flat_map(|c| c.violations).collect();
    PolicyCheckResult::from_violations(violations)
}

/// Count added and removed lines in a unified diff.
///
/// Only hunk bodies count, so file headers are skipped while content lines
/// that happen to start with `---` or `+++` are not.
pub fn count_diff_lines(patch: &str) -> usize {
    diff_lines(patch)
        .filter(|line| matches!(line, DiffLine::Added | DiffLine::Removed))
        .count()
}
