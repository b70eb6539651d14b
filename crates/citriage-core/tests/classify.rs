use citriage_core::{
    classify, environment_hint, is_transient, suggested_labels, Confidence, EnvironmentHint,
    FailureClass,
};

#[test]
fn network_errors_are_transient() {
    for log in [
        "npm ERR! request to https://registry.example failed, reason: connect ETIMEDOUT 1.2.3.4:443",
        "Error: read ECONNRESET\n    at TLSWrap.onStreamRead",
        "getaddrinfo EAI_AGAIN github.com",
    ] {
        let result = classify(log);
        assert_eq!(result.failure_class, FailureClass::NetworkTransient, "{log}");
        assert!(result.retryable);
        assert!(is_transient(&result));
        assert_eq!(suggested_labels(&result), vec!["ci-failure", "transient"]);
    }
}

#[test]
fn eslint_error_count_is_lint() {
    let result = classify("✖ ESLint found 3 errors in src/app/page.tsx");
    assert_eq!(result.failure_class, FailureClass::Lint);
    assert!(!result.retryable);
    assert_eq!(result.confidence, Confidence::High);
    assert_eq!(suggested_labels(&result), vec!["autofix-candidate", "ci-failure"]);
}

#[test]
fn network_patterns_win_over_test_patterns() {
    let log = "FAIL tests/api.test.ts\n  socket hang up while calling upstream";
    assert_eq!(classify(log).failure_class, FailureClass::NetworkTransient);
}

#[test]
fn unmatched_log_is_unknown_low_confidence() {
    let result = classify("Process completed with exit code 1.");
    assert_eq!(result.failure_class, FailureClass::Unknown);
    assert_eq!(result.confidence, Confidence::Low);
    assert!(!result.retryable);
    assert!(result.matched_pattern.is_empty());
    assert!(!is_transient(&result));
    assert_eq!(suggested_labels(&result), vec!["ci-failure", "needs-human"]);
}

#[test]
fn deps_failures_are_not_retryable() {
    let result = classify("ERR_PNPM_OUTDATED_LOCKFILE Cannot install with frozen-lockfile");
    assert_eq!(result.failure_class, FailureClass::Deps);
    assert!(!is_transient(&result));
    assert_eq!(suggested_labels(&result), vec!["ci-failure", "autofix-candidate"]);
}

#[test]
fn classification_serializes_kebab_case() {
    let result = classify("error TS2322: Type 'string' is not assignable");
    let json = serde_json::to_value(result).unwrap();
    assert_eq!(json["failure_class"], "typecheck");
    assert_eq!(json["confidence"], "high");
}

#[test]
fn environment_hints_detected() {
    assert_eq!(
        environment_hint("/bin/sh: pnpm: command not found"),
        Some(EnvironmentHint::NodeTooling)
    );
    assert_eq!(
        environment_hint("HttpError: Resource not accessible by integration"),
        Some(EnvironmentHint::Permissions)
    );
    assert_eq!(environment_hint("all good"), None);
}
