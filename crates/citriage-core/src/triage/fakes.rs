//! In-memory fakes for the triage collaborators (testing only)
//!
//! Provides `ScriptedChatClient`, `MemoryBudgetStore` (with its run ledger)
//! and `RecordingApplier`.
//! Each is cheap to clone and clones share state, so a test can hand one copy
//! to the orchestrator and inspect the other afterwards.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{Result, TriageError};

use super::budget::{BudgetDecision, BudgetStore, RemotePolicy};
use super::client::{ChatClient, ChatMessage};
use super::orchestrator::PatchApplier;
use super::patch::touched_files;

// ---------------------------------------------------------------------------
// ScriptedChatClient
// ---------------------------------------------------------------------------

/// Chat client that answers from a queue of canned replies.
#[derive(Debug, Clone, Default)]
pub struct ScriptedChatClient {
    replies: Arc<Mutex<VecDeque<String>>>,
    requests: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
}

impl ScriptedChatClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw reply body.
    pub fn with_reply(self, content: impl Into<String>) -> Self {
        self.replies.lock().unwrap().push_back(content.into());
        self
    }

    /// Queue a well-formed JSON reply.
    pub fn with_json_reply(self, confidence: f64, rationale: &str, patch: &str) -> Self {
        let body = serde_json::json!({
            "confidence": confidence,
            "rationale": rationale,
            "patch": patch,
        });
        self.with_reply(body.to_string())
    }

    /// Every conversation sent so far.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatClient for ScriptedChatClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.requests.lock().unwrap().push(messages.to_vec());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| TriageError::Http {
                status: None,
                message: "no scripted reply left".to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// MemoryBudgetStore
// ---------------------------------------------------------------------------

/// One run-ledger row as the memory store recorded it.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerRun {
    pub id: String,
    pub tool: String,
    pub github_run_id: Option<String>,
    pub events: Vec<(String, Value)>,
    /// `(success, meta)` once the run was closed.
    pub finished: Option<(bool, Value)>,
}

#[derive(Debug, Default)]
struct BudgetState {
    policy: Option<RemotePolicy>,
    policy_unavailable: bool,
    ledger_unavailable: bool,
    remaining: i64,
    consumed: u32,
    runs: Vec<LedgerRun>,
}

/// Budget store holding one policy row, a call counter and the run ledger
/// in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryBudgetStore {
    state: Arc<Mutex<BudgetState>>,
}

impl MemoryBudgetStore {
    pub fn new(remaining: i64) -> Self {
        let store = Self::default();
        store.state.lock().unwrap().remaining = remaining;
        store
    }

    pub fn with_policy(self, policy: RemotePolicy) -> Self {
        self.state.lock().unwrap().policy = Some(policy);
        self
    }

    /// Make `load_policy` fail as if the store were unreachable.
    pub fn with_policy_unavailable(self) -> Self {
        self.state.lock().unwrap().policy_unavailable = true;
        self
    }

    /// Make every ledger write fail.
    pub fn with_ledger_unavailable(self) -> Self {
        self.state.lock().unwrap().ledger_unavailable = true;
        self
    }

    pub fn consumed(&self) -> u32 {
        self.state.lock().unwrap().consumed
    }

    pub fn runs(&self) -> Vec<LedgerRun> {
        self.state.lock().unwrap().runs.clone()
    }

    pub fn remaining(&self) -> i64 {
        self.state.lock().unwrap().remaining
    }
}

#[async_trait]
impl BudgetStore for MemoryBudgetStore {
    async fn load_policy(&self, tool: &str) -> Result<Option<RemotePolicy>> {
        let state = self.state.lock().unwrap();
        if state.policy_unavailable {
            return Err(TriageError::Http {
                status: Some(503),
                message: "policy store unavailable".to_string(),
            });
        }
        Ok(state.policy.clone().filter(|p| p.tool == tool))
    }

    async fn consume_calls(&self, _tool: &str, n: u32) -> Result<BudgetDecision> {
        let mut state = self.state.lock().unwrap();
        if state.remaining < i64::from(n) {
            return Ok(BudgetDecision {
                allowed: false,
                remaining: state.remaining,
            });
        }
        state.remaining -= i64::from(n);
        state.consumed += n;
        Ok(BudgetDecision {
            allowed: true,
            remaining: state.remaining,
        })
    }

    async fn start_run(&self, tool: &str, github_run_id: Option<&str>) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        if state.ledger_unavailable {
            return Err(ledger_unavailable());
        }
        let id = format!("ledger-{}", state.runs.len() + 1);
        state.runs.push(LedgerRun {
            id: id.clone(),
            tool: tool.to_string(),
            github_run_id: github_run_id.map(str::to_string),
            events: Vec::new(),
            finished: None,
        });
        Ok(id)
    }

    async fn record_event(&self, ledger_id: &str, kind: &str, details: &Value) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.ledger_unavailable {
            return Err(ledger_unavailable());
        }
        let run = state
            .runs
            .iter_mut()
            .find(|r| r.id == ledger_id)
            .ok_or_else(ledger_unavailable)?;
        run.events.push((kind.to_string(), details.clone()));
        Ok(())
    }

    async fn finish_run(&self, ledger_id: &str, success: bool, meta: &Value) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.ledger_unavailable {
            return Err(ledger_unavailable());
        }
        let run = state
            .runs
            .iter_mut()
            .find(|r| r.id == ledger_id)
            .ok_or_else(ledger_unavailable)?;
        run.finished = Some((success, meta.clone()));
        Ok(())
    }
}

fn ledger_unavailable() -> TriageError {
    TriageError::Http {
        status: Some(503),
        message: "run ledger unavailable".to_string(),
    }
}

// ---------------------------------------------------------------------------
// RecordingApplier
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ApplierState {
    applied: Vec<String>,
    reverted: Vec<String>,
    sizes: HashMap<String, u64>,
    extra_changes: Vec<String>,
    no_effect: bool,
    failure: Option<String>,
}

/// Patch applier that records patches instead of touching a working tree.
///
/// After an apply, `changed_files` reports the files the applied patches
/// touched plus any [`RecordingApplier::with_extra_change`] paths, unless
/// [`RecordingApplier::with_no_effect`] was set. A revert drops the patch
/// again.
#[derive(Debug, Clone, Default)]
pub struct RecordingApplier {
    state: Arc<Mutex<ApplierState>>,
}

impl RecordingApplier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `path` as an existing file of `bytes` bytes.
    pub fn with_file_size(self, path: &str, bytes: u64) -> Self {
        self.state
            .lock()
            .unwrap()
            .sizes
            .insert(path.to_string(), bytes);
        self
    }

    /// Accept patches but leave the tree unchanged.
    pub fn with_no_effect(self) -> Self {
        self.state.lock().unwrap().no_effect = true;
        self
    }

    /// Report `path` as changed by any apply, as if git wrote a file the
    /// patch headers never named.
    pub fn with_extra_change(self, path: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .extra_changes
            .push(path.to_string());
        self
    }

    /// Fail every apply as `git apply` would.
    pub fn with_failure(self, message: &str) -> Self {
        self.state.lock().unwrap().failure = Some(message.to_string());
        self
    }

    pub fn applied(&self) -> Vec<String> {
        self.state.lock().unwrap().applied.clone()
    }

    pub fn reverted(&self) -> Vec<String> {
        self.state.lock().unwrap().reverted.clone()
    }
}

impl PatchApplier for RecordingApplier {
    fn apply(&self, patch: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = &state.failure {
            return Err(TriageError::GitError(message.clone()));
        }
        state.applied.push(patch.to_string());
        Ok(())
    }

    fn revert(&self, patch: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let Some(idx) = state.applied.iter().position(|p| p == patch) else {
            return Err(TriageError::GitError("patch was never applied".to_string()));
        };
        let patch = state.applied.remove(idx);
        state.reverted.push(patch);
        Ok(())
    }

    fn changed_files(&self) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        if state.no_effect || state.applied.is_empty() {
            return Ok(Vec::new());
        }
        Ok(state
            .applied
            .iter()
            .flat_map(|p| touched_files(p))
            .chain(state.extra_changes.iter().cloned())
            .collect())
    }

    fn file_size(&self, path: &str) -> Option<u64> {
        self.state.lock().unwrap().sizes.get(path).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_client_drains_queue() {
        let client = ScriptedChatClient::new().with_reply("first");
        let messages = vec![ChatMessage::user("hello")];

        assert_eq!(client.complete(&messages).await.unwrap(), "first");
        assert!(client.complete(&messages).await.is_err());
        assert_eq!(client.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_memory_budget_store_denies_when_empty() {
        let store = MemoryBudgetStore::new(1);
        assert!(store.consume_calls("t", 1).await.unwrap().allowed);
        let denied = store.consume_calls("t", 1).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(store.consumed(), 1);
    }

    #[test]
    fn test_recording_applier_shares_state_between_clones() {
        let applier = RecordingApplier::new();
        let handle = applier.clone();
        applier
            .apply("--- a/src/a.ts\n+++ b/src/a.ts\n@@ -1 +1 @@\n-a\n+b\n")
            .unwrap();
        assert_eq!(handle.applied().len(), 1);
        assert_eq!(handle.changed_files().unwrap(), vec!["src/a.ts"]);
    }

    #[test]
    fn test_recording_applier_revert_clears_changes() {
        let patch = "--- a/src/a.ts\n+++ b/src/a.ts\n@@ -1 +1 @@\n-a\n+b\n";
        let applier = RecordingApplier::new().with_extra_change("package-lock.json");
        applier.apply(patch).unwrap();
        assert_eq!(
            applier.changed_files().unwrap(),
            vec!["src/a.ts", "package-lock.json"]
        );

        applier.revert(patch).unwrap();
        assert!(applier.changed_files().unwrap().is_empty());
        assert_eq!(applier.reverted(), vec![patch]);
        assert!(applier.revert(patch).is_err());
    }

    #[tokio::test]
    async fn test_memory_ledger_records_runs() {
        let store = MemoryBudgetStore::new(1);
        let id = store.start_run("t", Some("42")).await.unwrap();
        store
            .record_event(&id, "policy_loaded", &serde_json::json!({ "enabled": true }))
            .await
            .unwrap();
        store
            .finish_run(&id, false, &serde_json::json!({ "reason": "x" }))
            .await
            .unwrap();

        let runs = store.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].github_run_id.as_deref(), Some("42"));
        assert_eq!(runs[0].events[0].0, "policy_loaded");
        assert_eq!(runs[0].finished.as_ref().map(|f| f.0), Some(false));
        assert!(store.finish_run("missing", true, &Value::Null).await.is_err());
    }
}
