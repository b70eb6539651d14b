//! Deterministic CI failure classification.
//!
//! Maps raw CI log text onto a fixed [`FailureClass`] taxonomy using an
//! ordered table of patterns. The first matching pattern wins, so network
//! and registry hiccups are checked before the generic test-failure
//! patterns that could otherwise swallow them.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Failure taxonomy for CI logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureClass {
    Lint,
    Format,
    Typecheck,
    TestFlaky,
    TestDeterministic,
    Build,
    Deps,
    NetworkTransient,
    RegistryTimeout,
    Unknown,
}

impl FailureClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lint => "lint",
            Self::Format => "format",
            Self::Typecheck => "typecheck",
            Self::TestFlaky => "test-flaky",
            Self::TestDeterministic => "test-deterministic",
            Self::Build => "build",
            Self::Deps => "deps",
            Self::NetworkTransient => "network-transient",
            Self::RegistryTimeout => "registry-timeout",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How sure the classifier is about a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// Outcome of classifying one log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifyResult {
    pub failure_class: FailureClass,
    pub retryable: bool,
    pub confidence: Confidence,
    /// The text that triggered the match; empty for [`FailureClass::Unknown`].
    pub matched_pattern: String,
}

impl ClassifyResult {
    fn unknown() -> Self {
        Self {
            failure_class: FailureClass::Unknown,
            retryable: false,
            confidence: Confidence::Low,
            matched_pattern: String::new(),
        }
    }
}

struct Pattern {
    failure_class: FailureClass,
    regex: Regex,
    retryable: bool,
    confidence: Confidence,
}

// Evaluated top to bottom.
const PATTERN_TABLE: &[(FailureClass, &str, bool, Confidence)] = &[
    (
        FailureClass::NetworkTransient,
        r"ETIMEDOUT|ECONNRESET|ECONNREFUSED|EAI_AGAIN|socket hang up|network timeout",
        true,
        Confidence::High,
    ),
    (
        FailureClass::RegistryTimeout,
        r"ERR_PNPM_FETCH_\d+|npm ERR! network|ERR_PNPM_REGISTRIES|registry\.npmjs\.org.*timeout|fetch failed",
        true,
        Confidence::High,
    ),
    (
        FailureClass::Lint,
        r"ESLint.*found \d+ (error|problem)|eslint.*--fix|Lint error|✖ \d+ problem",
        false,
        Confidence::High,
    ),
    (
        FailureClass::Format,
        r"Prettier.*check.*failed|Code style issues found|prettier --write",
        false,
        Confidence::High,
    ),
    (
        FailureClass::Typecheck,
        r"TS\d{4,5}:|error TS\d+|Type '.*' is not assignable|tsc.*--noEmit.*failed",
        false,
        Confidence::High,
    ),
    (
        FailureClass::TestFlaky,
        r"RETRY|flaky|timed?\s*out.*test|test.*timed?\s*out|Exceeded timeout|socket hang up.*test",
        true,
        Confidence::Medium,
    ),
    (
        FailureClass::TestDeterministic,
        r"FAIL\s+tests/|AssertionError|expect\(.*\)\.(toBe|toEqual|toMatch)|Test Suites:.*failed|vitest.*failed",
        false,
        Confidence::High,
    ),
    (
        FailureClass::Build,
        r"Build (error|failed)|next build.*failed|Module not found|Cannot find module",
        false,
        Confidence::High,
    ),
    (
        FailureClass::Deps,
        r"npm ERR! code EUSAGE|npm ci.*failed|package-lock\.json.*missing|ERR_PNPM_OUTDATED_LOCKFILE|ERR_PNPM_NO_MATCHING_VERSION|ERR_PNPM_FETCH_FAIL",
        false,
        Confidence::High,
    ),
];

fn patterns() -> &'static [Pattern] {
    static PATTERNS: OnceLock<Vec<Pattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        PATTERN_TABLE
            .iter()
            .map(|&(failure_class, source, retryable, confidence)| Pattern {
                failure_class,
                regex: Regex::new(&format!("(?i){source}")).expect("built-in pattern compiles"),
                retryable,
                confidence,
            })
            .collect()
    })
}

/// Classify a CI log. Never fails; unmatched text is [`FailureClass::Unknown`].
pub fn classify(log_text: &str) -> ClassifyResult {
    for pattern in patterns() {
        if let Some(m) = pattern.regex.find(log_text) {
            return ClassifyResult {
                failure_class: pattern.failure_class,
                retryable: pattern.retryable,
                confidence: pattern.confidence,
                matched_pattern: m.as_str().to_string(),
            };
        }
    }
    ClassifyResult::unknown()
}

/// Whether re-running the job unchanged is likely to succeed.
pub fn is_transient(result: &ClassifyResult) -> bool {
    result.retryable && result.confidence != Confidence::Low
}

/// Issue-tracker labels to attach for a classified failure.
pub fn suggested_labels(result: &ClassifyResult) -> Vec<&'static str> {
    match result.failure_class {
        FailureClass::Lint | FailureClass::Format => vec!["autofix-candidate", "ci-failure"],
        FailureClass::TestFlaky => vec!["flaky-test", "ci-failure"],
        FailureClass::Deps => vec!["ci-failure", "autofix-candidate"],
        FailureClass::NetworkTransient | FailureClass::RegistryTimeout => {
            vec!["ci-failure", "transient"]
        }
        FailureClass::Typecheck
        | FailureClass::TestDeterministic
        | FailureClass::Build
        | FailureClass::Unknown => vec!["ci-failure", "needs-human"],
    }
}

// ---------------------------------------------------------------------------
// Environment hints
// ---------------------------------------------------------------------------

/// Runner-environment problems that no code patch can fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvironmentHint {
    MissingTool,
    NodeTooling,
    MissingSecret,
    Permissions,
}

impl EnvironmentHint {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingTool => "missing-tool",
            Self::NodeTooling => "node-tooling",
            Self::MissingSecret => "missing-secret",
            Self::Permissions => "permissions",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::MissingTool => "ripgrep missing",
            Self::NodeTooling => "pnpm/corepack missing",
            Self::MissingSecret => "required env/secret missing",
            Self::Permissions => "token/permissions issue",
        }
    }
}

const HINT_TABLE: &[(EnvironmentHint, &str)] = &[
    (EnvironmentHint::MissingTool, r"command not found: rg|rg: not found"),
    (EnvironmentHint::NodeTooling, r"pnpm: command not found|corepack"),
    (EnvironmentHint::MissingSecret, r"Missing .*_API_KEY|Missing env:"),
    (
        EnvironmentHint::Permissions,
        r"permission denied|Resource not accessible by integration",
    ),
];

fn hint_patterns() -> &'static [(EnvironmentHint, Regex)] {
    static HINTS: OnceLock<Vec<(EnvironmentHint, Regex)>> = OnceLock::new();
    HINTS.get_or_init(|| {
        HINT_TABLE
            .iter()
            .map(|&(hint, source)| {
                (
                    hint,
                    Regex::new(&format!("(?i){source}")).expect("built-in pattern compiles"),
                )
            })
            .collect()
    })
}

/// Detect a runner-environment problem in the log, if any.
pub fn environment_hint(log_text: &str) -> Option<EnvironmentHint> {
    hint_patterns()
        .iter()
        .find(|(_, re)| re.is_match(log_text))
        .map(|(hint, _)| *hint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_errors_are_transient() {
        for log in [
            "Error: connect ETIMEDOUT 10.0.0.1:443",
            "read ECONNRESET",
            "getaddrinfo EAI_AGAIN registry.npmjs.org",
            "Error: socket hang up",
        ] {
            let result = classify(log);
            assert_eq!(result.failure_class, FailureClass::NetworkTransient, "{log}");
            assert!(result.retryable);
            assert!(is_transient(&result));
        }
    }

    #[test]
    fn test_network_wins_over_test_timeout() {
        let log = "FAIL tests/api.test.ts\n  test timed out: ECONNRESET while calling api";
        let result = classify(log);
        assert_eq!(result.failure_class, FailureClass::NetworkTransient);
        assert_eq!(result.matched_pattern, "ECONNRESET");
    }

    #[test]
    fn test_eslint_error_count_is_lint() {
        let result = classify("ESLint found 3 errors in src/app/page.tsx");
        assert_eq!(result.failure_class, FailureClass::Lint);
        assert!(!result.retryable);
        assert_eq!(result.confidence, Confidence::High);
        assert_eq!(result.matched_pattern, "ESLint found 3 error");
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        let result = classify("code style issues found in 2 files");
        assert_eq!(result.failure_class, FailureClass::Format);
        assert_eq!(result.matched_pattern, "code style issues found");
    }

    #[test]
    fn test_typecheck_and_build() {
        assert_eq!(
            classify("src/lib/cart.ts(12,5): error TS2322: bad").failure_class,
            FailureClass::Typecheck
        );
        assert_eq!(
            classify("Module not found: Can't resolve '@/components/Hero'").failure_class,
            FailureClass::Build
        );
    }

    #[test]
    fn test_flaky_before_deterministic() {
        let result = classify("Test Suites: 1 failed\nExceeded timeout of 5000 ms");
        assert_eq!(result.failure_class, FailureClass::TestFlaky);
        assert_eq!(result.confidence, Confidence::Medium);
        assert!(is_transient(&result));
    }

    #[test]
    fn test_deterministic_test_failure() {
        let result = classify("AssertionError: expected 2 to equal 3");
        assert_eq!(result.failure_class, FailureClass::TestDeterministic);
        assert!(!is_transient(&result));
    }

    #[test]
    fn test_outdated_lockfile_is_deps() {
        let result = classify("ERR_PNPM_OUTDATED_LOCKFILE Cannot install with frozen-lockfile");
        assert_eq!(result.failure_class, FailureClass::Deps);
        assert_eq!(
            suggested_labels(&result),
            vec!["ci-failure", "autofix-candidate"]
        );
    }

    #[test]
    fn test_unknown_fallback() {
        let result = classify("everything is fine, nothing to see");
        assert_eq!(result.failure_class, FailureClass::Unknown);
        assert_eq!(result.confidence, Confidence::Low);
        assert!(!result.retryable);
        assert!(result.matched_pattern.is_empty());
        assert!(!is_transient(&result));
        assert_eq!(suggested_labels(&result), vec!["ci-failure", "needs-human"]);
    }

    #[test]
    fn test_suggested_labels_mapping() {
        let lint = classify("Lint error in file");
        assert_eq!(suggested_labels(&lint), vec!["autofix-candidate", "ci-failure"]);

        let flaky = classify("marked as flaky");
        assert_eq!(suggested_labels(&flaky), vec!["flaky-test", "ci-failure"]);

        let registry = classify("npm ERR! network request failed");
        assert_eq!(registry.failure_class, FailureClass::RegistryTimeout);
        assert_eq!(suggested_labels(&registry), vec!["ci-failure", "transient"]);
    }

    #[test]
    fn test_failure_class_serializes_kebab_case() {
        let json = serde_json::to_string(&FailureClass::TestDeterministic).unwrap();
        assert_eq!(json, "\"test-deterministic\"");
        assert_eq!(FailureClass::NetworkTransient.to_string(), "network-transient");
    }

    #[test]
    fn test_environment_hint() {
        assert_eq!(
            environment_hint("Error: Missing env: DEEPSEEK_API_KEY"),
            Some(EnvironmentHint::MissingSecret)
        );
        assert_eq!(
            environment_hint("HttpError: Resource not accessible by integration"),
            Some(EnvironmentHint::Permissions)
        );
        assert_eq!(
            environment_hint("sh: 1: pnpm: command not found"),
            Some(EnvironmentHint::NodeTooling)
        );
        assert_eq!(environment_hint("ESLint found 1 error"), None);
    }
}
