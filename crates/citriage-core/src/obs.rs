//! Structured observability hooks for triage decisions.
//!
//! Every decision point emits one `info!` event with an `event` field so CI
//! log collectors can filter on it. Set `RUST_LOG` to adjust verbosity.

use tracing::info;

use crate::autofix_policy::PolicyCheckResult;
use crate::classify::ClassifyResult;

/// Run-scoped span; every event emitted inside it carries `run_id`.
///
/// ```ignore
/// pipeline.instrument(triage_span("run-12345")).await
/// ```
pub fn triage_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("citriage.triage", run_id = %run_id)
}

/// Emit event: a log was classified.
pub fn emit_classified(result: &ClassifyResult) {
    info!(
        event = "failure.classified",
        failure_class = %result.failure_class,
        retryable = result.retryable,
        confidence = ?result.confidence,
        matched = %result.matched_pattern,
    );
}

/// Emit event: a policy check finished.
pub fn emit_policy_checked(scope: &str, result: &PolicyCheckResult) {
    info!(
        event = "policy.checked",
        scope = %scope,
        allowed = result.allowed,
        violations = result.violations.len(),
    );
}

/// Emit event: one model call was consumed from the budget.
pub fn emit_call_consumed(used: u32, max: u32) {
    info!(event = "budget.consumed", used = used, max = max);
}

/// Emit event: the model replied.
pub fn emit_reply_received(confidence: f64, patch_bytes: usize) {
    info!(
        event = "model.replied",
        confidence = confidence,
        patch_bytes = patch_bytes,
    );
}

/// Emit event: triage finished, successfully or not.
pub fn emit_triage_finished(success: bool, reason: &str, files: usize) {
    info!(
        event = "triage.finished",
        success = success,
        reason = %reason,
        files = files,
    );
}

/// Emit event: triage failed hard (warning level).
pub fn emit_triage_error(reason: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "triage.error", reason = %reason, error = %error);
}

/// Emit event: the backlog document was synced.
pub fn emit_backlog_synced(path: &str, issues: usize, changed: bool) {
    info!(
        event = "backlog.synced",
        path = %path,
        issues = issues,
        changed = changed,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triage_span_create() {
        let _entered = triage_span("test-run-id").entered();
        emit_triage_finished(false, "low-confidence-or-empty-patch", 0);
    }
}
