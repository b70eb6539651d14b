//! The triage pipeline.
//!
//! ```text
//! classify ─► remote policy ─► call budget ─► model ─► parse ─► guard ─► apply ─► verify
//!                                                                                   │
//!                                             status artifact (every outcome) ◄─────┘
//! ```
//!
//! With a remote store configured, each run is also opened and closed in its
//! run ledger. Ledger writes are best-effort and never change the outcome.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{warn, Instrument};

use crate::classify::{classify, environment_hint, ClassifyResult, EnvironmentHint};
use crate::domain::{Result, TriageError};
use crate::git;
use crate::obs;

use super::budget::{BudgetStore, CallBudget};
use super::client::{parse_triage_reply, ChatClient};
use super::config::TriageConfig;
use super::guard::{check_path, validate_reply, Decline, Verdict};
use super::patch::patch_digest;
use super::prompt::build_messages;
use super::status::{write_status, TriageStatus};

/// Tool name used for the remote policy row and call budget.
pub const TRIAGE_TOOL: &str = "failure_orchestrator";

pub const DEFAULT_STATUS_PATH: &str = ".tmp/triage-status.json";
pub const DEFAULT_PATCH_PATH: &str = ".tmp/ai.patch";

// ---------------------------------------------------------------------------
// Input and outcome
// ---------------------------------------------------------------------------

/// What one CI run hands to triage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriageInput {
    pub run_id: String,
    pub workflow: Option<String>,
    pub head_sha: Option<String>,
    pub failure_summary: String,
    pub failed_logs: String,
}

impl TriageInput {
    /// Input with a fresh random run id.
    pub fn new(failure_summary: impl Into<String>, failed_logs: impl Into<String>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            workflow: None,
            head_sha: None,
            failure_summary: failure_summary.into(),
            failed_logs: failed_logs.into(),
        }
    }

    pub fn with_run_id(mut self, run_id: &str) -> Self {
        self.run_id = run_id.to_string();
        self
    }

    pub fn with_workflow(mut self, workflow: &str) -> Self {
        self.workflow = Some(workflow.to_string());
        self
    }

    pub fn with_head_sha(mut self, sha: &str) -> Self {
        self.head_sha = Some(sha.to_string());
        self
    }

    fn classification_text(&self) -> String {
        format!("{}\n{}", self.failure_summary, self.failed_logs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TriageOutcome {
    Applied {
        files: Vec<String>,
        confidence: f64,
        rationale: String,
    },
    Declined {
        reason: Decline,
        confidence: Option<f64>,
    },
}

impl TriageOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }

    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Applied { .. } => "applied",
            Self::Declined { reason, .. } => reason.reason_code(),
        }
    }
}

// ---------------------------------------------------------------------------
// Applying patches
// ---------------------------------------------------------------------------

/// The only component that mutates the working tree.
pub trait PatchApplier: Send + Sync {
    fn apply(&self, patch: &str) -> Result<()>;

    /// Undo a patch previously passed to [`PatchApplier::apply`].
    fn revert(&self, patch: &str) -> Result<()>;

    /// Paths the working tree reports as modified.
    fn changed_files(&self) -> Result<Vec<String>>;

    /// Size of an existing file, `None` when it does not exist yet.
    fn file_size(&self, path: &str) -> Option<u64>;
}

/// [`PatchApplier`] that writes the patch to disk and runs `git apply`.
#[derive(Debug, Clone)]
pub struct GitPatchApplier {
    repo_dir: PathBuf,
    patch_path: PathBuf,
}

impl GitPatchApplier {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        let repo_dir = repo_dir.into();
        let patch_path = repo_dir.join(DEFAULT_PATCH_PATH);
        Self {
            repo_dir,
            patch_path,
        }
    }

    pub fn with_patch_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.patch_path = path.into();
        self
    }

    pub fn patch_path(&self) -> &Path {
        &self.patch_path
    }

    fn write_patch(&self, patch: &str) -> Result<()> {
        if let Some(parent) = self.patch_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // git apply rejects a diff whose last hunk lacks a trailing newline
        std::fs::write(&self.patch_path, format!("{patch}\n"))?;
        Ok(())
    }
}

impl PatchApplier for GitPatchApplier {
    fn apply(&self, patch: &str) -> Result<()> {
        self.write_patch(patch)?;
        git::apply_patch(&self.repo_dir, &self.patch_path)
    }

    fn revert(&self, patch: &str) -> Result<()> {
        self.write_patch(patch)?;
        git::reverse_patch(&self.repo_dir, &self.patch_path)
    }

    fn changed_files(&self) -> Result<Vec<String>> {
        git::changed_files(&self.repo_dir)
    }

    fn file_size(&self, path: &str) -> Option<u64> {
        std::fs::metadata(self.repo_dir.join(path))
            .ok()
            .filter(|m| m.is_file())
            .map(|m| m.len())
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

fn initial_status(input: &TriageInput) -> (ClassifyResult, Option<EnvironmentHint>, TriageStatus) {
    let text = input.classification_text();
    let classification = classify(&text);
    let hint = environment_hint(&text);
    let status = TriageStatus::new(
        &input.run_id,
        input.workflow.as_deref(),
        classification.failure_class,
        hint,
    );
    (classification, hint, status)
}

/// Record a run that failed before an orchestrator could be built, such as
/// missing credentials, so the status artifact exists for every invocation.
pub fn record_setup_failure(
    input: &TriageInput,
    status_path: &Path,
    error: &TriageError,
) -> Result<TriageStatus> {
    let (_, _, mut status) = initial_status(input);
    status.reason = error.reason_code().to_string();
    status.error = Some(error.to_string());
    obs::emit_triage_error(error.reason_code(), error);
    obs::emit_triage_finished(false, &status.reason, 0);
    write_status(status_path, &status)?;
    Ok(status)
}

pub struct TriageOrchestrator {
    config: TriageConfig,
    client: Box<dyn ChatClient>,
    applier: Box<dyn PatchApplier>,
    remote: Option<Box<dyn BudgetStore>>,
    budget: CallBudget,
    status_path: PathBuf,
}

impl TriageOrchestrator {
    pub fn new(
        config: TriageConfig,
        client: Box<dyn ChatClient>,
        applier: Box<dyn PatchApplier>,
    ) -> Self {
        let budget = CallBudget::new(config.max_calls);
        Self {
            config,
            client,
            applier,
            remote: None,
            budget,
            status_path: PathBuf::from(DEFAULT_STATUS_PATH),
        }
    }

    /// Consult a shared policy and call budget before every model call.
    pub fn with_budget_store(mut self, store: Box<dyn BudgetStore>) -> Self {
        self.remote = Some(store);
        self
    }

    pub fn with_status_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.status_path = path.into();
        self
    }

    pub fn status_path(&self) -> &Path {
        &self.status_path
    }

    pub fn calls_used(&self) -> u32 {
        self.budget.used()
    }

    /// Run the pipeline once and record the result in the status artifact.
    ///
    /// Soft declines are `Ok`. Every hard failure still writes the artifact,
    /// with the error's reason code, before the error is returned.
    pub async fn run(&self, input: &TriageInput) -> Result<TriageOutcome> {
        let (classification, hint, mut status) = initial_status(input);

        let span = obs::triage_span(&input.run_id);
        let ledger = self.open_ledger(input).instrument(span.clone()).await;
        let result = self
            .pipeline(input, &classification, hint, ledger.as_deref(), &mut status)
            .instrument(span.clone())
            .await;

        match &result {
            Ok(outcome) => {
                status.success = outcome.is_applied();
                status.reason = outcome.reason_code().to_string();
            }
            Err(e) => {
                status.success = false;
                status.reason = e.reason_code().to_string();
                status.error = Some(e.to_string());
                obs::emit_triage_error(e.reason_code(), e);
            }
        }
        status.evaluated_at = chrono::Utc::now();
        obs::emit_triage_finished(status.success, &status.reason, status.files.len());
        if let Some(ledger_id) = &ledger {
            self.close_ledger(ledger_id, input, &classification, &status)
                .instrument(span)
                .await;
        }

        let written = write_status(&self.status_path, &status);
        if let Err(e) = &written {
            warn!(path = %self.status_path.display(), error = %e, "failed to write triage status");
        }
        let outcome = result?;
        written?;
        Ok(outcome)
    }

    async fn pipeline(
        &self,
        input: &TriageInput,
        classification: &ClassifyResult,
        hint: Option<EnvironmentHint>,
        ledger: Option<&str>,
        status: &mut TriageStatus,
    ) -> Result<TriageOutcome> {
        obs::emit_classified(classification);

        let config = self.effective_config(ledger).await?;
        let used = self.budget.consume()?;
        obs::emit_call_consumed(used, self.budget.max());
        self.consume_remote().await?;

        let messages = build_messages(input, classification, hint, &config);
        let content = self.client.complete(&messages).await?;
        let reply = parse_triage_reply(&content)?;
        obs::emit_reply_received(reply.confidence, reply.patch.len());

        status.confidence = Some(reply.confidence);
        status.rationale = Some(reply.rationale.clone()).filter(|r| !r.is_empty());
        let trimmed = reply.patch.trim();
        if !trimmed.is_empty() {
            status.patch_digest = Some(patch_digest(trimmed));
        }

        let approved = match validate_reply(&reply, &config, |path| self.applier.file_size(path))? {
            Verdict::Approved(approved) => approved,
            Verdict::Declined(reason) => {
                return Ok(TriageOutcome::Declined {
                    reason,
                    confidence: Some(reply.confidence),
                })
            }
        };
        status.files = approved.files.clone();

        self.applier.apply(&approved.patch)?;
        if self.verify_applied(&approved.patch, &config)?.is_empty() {
            return Ok(TriageOutcome::Declined {
                reason: Decline::NoEffectiveChange,
                confidence: Some(approved.confidence),
            });
        }

        Ok(TriageOutcome::Applied {
            files: approved.files,
            confidence: approved.confidence,
            rationale: approved.rationale,
        })
    }

    /// Local limits, overridden by the remote policy when one is reachable.
    ///
    /// An unreachable policy store falls back to local limits; an explicit
    /// `enabled = false` stops the run.
    async fn effective_config(&self, ledger: Option<&str>) -> Result<TriageConfig> {
        let Some(store) = &self.remote else {
            return Ok(self.config.clone());
        };
        let policy = match store.load_policy(TRIAGE_TOOL).await {
            Ok(policy) => policy,
            Err(e) => {
                warn!(
                    event = "policy.unavailable",
                    tool = TRIAGE_TOOL,
                    error = %e,
                    "using local triage limits"
                );
                None
            }
        };
        if let Some(ledger_id) = ledger {
            let details = match &policy {
                Some(policy) => serde_json::to_value(policy)?,
                None => json!({ "tool": TRIAGE_TOOL, "enabled": true }),
            };
            self.record_event(ledger_id, "policy_loaded", &details).await;
        }
        match policy {
            Some(policy) if !policy.enabled => Err(TriageError::Disabled(TRIAGE_TOOL.into())),
            Some(policy) => Ok(self.config.with_remote(&policy)),
            None => Ok(self.config.clone()),
        }
    }

    /// Re-check the paths the tree reports as changed after an apply.
    ///
    /// A path the guards would have refused reverses the patch and fails the
    /// run, whatever the patch headers claimed.
    fn verify_applied(&self, patch: &str, config: &TriageConfig) -> Result<Vec<String>> {
        let checked = self.applier.changed_files().and_then(|changed| {
            for file in &changed {
                check_path(file, config.forbid_workflow_edits)?;
            }
            Ok(changed)
        });
        if let Err(e) = &checked {
            match self.applier.revert(patch) {
                Ok(()) => warn!(event = "patch.reverted", error = %e, "reverted applied patch"),
                Err(revert_error) => warn!(
                    event = "patch.revert_failed",
                    error = %e,
                    revert_error = %revert_error,
                    "applied patch could not be reverted"
                ),
            }
        }
        checked
    }

    async fn open_ledger(&self, input: &TriageInput) -> Option<String> {
        let store = self.remote.as_ref()?;
        match store.start_run(TRIAGE_TOOL, Some(&input.run_id)).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(event = "ledger.unavailable", error = %e, "run ledger not recorded");
                None
            }
        }
    }

    async fn record_event(&self, ledger_id: &str, kind: &str, details: &Value) {
        let Some(store) = &self.remote else {
            return;
        };
        if let Err(e) = store.record_event(ledger_id, kind, details).await {
            warn!(event = "ledger.event_failed", kind = %kind, error = %e);
        }
    }

    async fn close_ledger(
        &self,
        ledger_id: &str,
        input: &TriageInput,
        classification: &ClassifyResult,
        status: &TriageStatus,
    ) {
        let Some(store) = &self.remote else {
            return;
        };
        let meta = json!({
            "run_id": input.run_id,
            "workflow": input.workflow,
            "classification": classification,
            "reason": status.reason,
        });
        if let Err(e) = store.finish_run(ledger_id, status.success, &meta).await {
            warn!(event = "ledger.finish_failed", error = %e);
        }
    }

    async fn consume_remote(&self) -> Result<()> {
        let Some(store) = &self.remote else {
            return Ok(());
        };
        let decision = store.consume_calls(TRIAGE_TOOL, 1).await?;
        if !decision.allowed {
            return Err(TriageError::BudgetDenied {
                tool: TRIAGE_TOOL.to_string(),
                remaining: decision.remaining,
            });
        }
        Ok(())
    }
}
