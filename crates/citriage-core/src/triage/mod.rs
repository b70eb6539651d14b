//! AI-assisted CI triage.
//!
//! A strictly sequential pipeline: collect logs, classify, consume the call
//! budget, ask the model for a patch, validate it, then apply it or record
//! why not. Validation is a chain of pure steps in [`guard`]; the only side
//! effects are the model call, the patch application behind
//! [`PatchApplier`] and the status artifact.

pub mod budget;
pub mod client;
pub mod config;
pub mod fakes;
pub mod guard;
pub mod logs;
pub mod orchestrator;
pub mod patch;
pub mod prompt;
pub mod status;

pub use budget::{
    parse_ledger_id, BudgetDecision, BudgetStore, CallBudget, RemotePolicy, SupabaseBudgetStore,
};
pub use client::{
    parse_triage_reply, ChatClient, ChatMessage, ChatRole, HttpChatClient, TriageReply,
};
pub use config::{ChatConfig, SupabaseConfig, TriageConfig};
pub use guard::{validate_reply, ApprovedPatch, Decline, Verdict};
pub use logs::{collect_log_dir, read_truncated};
pub use orchestrator::{
    record_setup_failure, GitPatchApplier, PatchApplier, TriageInput, TriageOrchestrator,
    TriageOutcome, TRIAGE_TOOL,
};
pub use patch::{is_binary, patch_digest, touched_files};
pub use prompt::build_messages;
pub use status::{read_status, write_status, TriageStatus};
