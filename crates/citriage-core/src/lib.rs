//! citriage core library
//!
//! CI failure classification, autofix policy gating, backlog sync and the
//! AI-assisted triage pipeline.

pub mod autofix_policy;
pub mod backlog;
pub mod classify;
mod diff;
pub mod domain;
pub mod git;
pub mod github;
pub mod obs;
pub mod telemetry;
pub mod triage;

pub use autofix_policy::{
    check_cooldown, check_cooldown_now, check_diff_size, check_files, count_diff_lines,
    full_check, full_check_at, AutofixCandidate, PolicyCheckResult, COOLDOWN_HOURS,
    MAX_CHANGED_FILES, MAX_DIFF_LINES,
};

pub use backlog::{
    append_investigation_entry, format_issues_block, format_issues_block_at, investigation_entry,
    sync_backlog_file, update_backlog_content, AUTO_BLOCK_END, AUTO_BLOCK_START,
};

pub use classify::{
    classify, environment_hint, is_transient, suggested_labels, ClassifyResult, Confidence,
    EnvironmentHint, FailureClass,
};

pub use domain::{Assignee, BacklogError, Issue, Label, Result, TriageError};

pub use github::{GitHubClient, GitHubConfig};

pub use triage::{
    ChatConfig, GitPatchApplier, HttpChatClient, SupabaseBudgetStore, SupabaseConfig,
    TriageConfig, TriageInput, TriageOrchestrator, TriageOutcome, TriageStatus,
};

pub use obs::{
    emit_backlog_synced, emit_classified, emit_policy_checked, emit_triage_error,
    emit_triage_finished, triage_span,
};
pub use telemetry::init_tracing;

/// citriage version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
