//! Prompt construction for the triage model.

use crate::classify::{ClassifyResult, EnvironmentHint};
use crate::github::truncate_chars;

use super::client::ChatMessage;
use super::config::TriageConfig;
use super::orchestrator::TriageInput;

fn system_prompt(config: &TriageConfig) -> String {
    [
        "You are a cautious CI triage assistant.".to_string(),
        "Reply ONLY with a JSON object with the fields confidence (0..1), rationale (short) and patch (a git-apply compatible unified diff, or an empty string).".to_string(),
        "Only touch files under src/, tests/ or tools/, or root-level config files.".to_string(),
        "Never modify workflow definitions, secrets, .env files, database migrations, CODEOWNERS or lockfiles.".to_string(),
        format!(
            "Touch at most {} file(s). Prefer the smallest fix over refactors.",
            config.max_files
        ),
        format!(
            "If you are unsure, answer with confidence below {} and an empty patch.",
            config.confidence_threshold
        ),
    ]
    .join("\n")
}

/// Build the bounded system + user conversation for one triage call.
pub fn build_messages(
    input: &TriageInput,
    classification: &ClassifyResult,
    hint: Option<EnvironmentHint>,
    config: &TriageConfig,
) -> Vec<ChatMessage> {
    let mut user = Vec::new();
    if let Some(workflow) = &input.workflow {
        user.push(format!("Workflow: {workflow}"));
    }
    user.push(format!("Run ID: {}", input.run_id));
    if let Some(sha) = &input.head_sha {
        user.push(format!("Head SHA: {sha}"));
    }
    user.push(format!(
        "Classification: {} (confidence {:?}, retryable {})",
        classification.failure_class, classification.confidence, classification.retryable
    ));
    if let Some(hint) = hint {
        user.push(format!(
            "Environment hint: {} ({})",
            hint.as_str(),
            hint.description()
        ));
    }

    let summary = truncate_chars(&input.failure_summary, config.summary_char_limit);
    let logs = truncate_chars(&input.failed_logs, config.logs_char_limit);
    user.push(String::new());
    user.push(format!("Failed workflow context:\n{summary}"));
    user.push(String::new());
    user.push(format!(
        "Failed logs:\n{}",
        if logs.is_empty() { "(no logs found)" } else { logs.as_str() }
    ));

    vec![
        ChatMessage::system(system_prompt(config)),
        ChatMessage::user(user.join("\n")),
    ]
}
