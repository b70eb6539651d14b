//! Model-call budgets.
//!
//! Two layers bound the cost of triage: an in-process [`CallBudget`] that
//! caps calls per invocation, and an optional remote [`BudgetStore`] that
//! holds the kill switch and a budget shared across CI runs. The remote
//! consume call is a single RPC and is treated as atomic.
//!
//! The remote store also keeps a run ledger: one row per triage run, opened
//! before the policy is read and closed with the outcome, plus events.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::domain::{Result, TriageError};
use crate::github::truncate_chars;

use super::config::SupabaseConfig;

const POLICY_COLUMNS: &str =
    "tool,enabled,max_ai_calls,max_conflict_files,max_file_bytes,forbid_workflows";

/// Per-invocation cap on model calls.
#[derive(Debug)]
pub struct CallBudget {
    max: u32,
    used: AtomicU32,
}

impl CallBudget {
    pub fn new(max: u32) -> Self {
        Self {
            max,
            used: AtomicU32::new(0),
        }
    }

    /// Take one call from the budget, returning the number used so far.
    ///
    /// Exceeding the cap is an error, never a silent skip.
    pub fn consume(&self) -> Result<u32> {
        self.used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used < self.max).then_some(used + 1)
            })
            .map(|previous| previous + 1)
            .map_err(|used| TriageError::BudgetExhausted {
                used,
                max: self.max,
            })
    }

    pub fn used(&self) -> u32 {
        self.used.load(Ordering::SeqCst)
    }

    pub fn max(&self) -> u32 {
        self.max
    }
}

/// Remote per-tool policy row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePolicy {
    pub tool: String,
    pub enabled: bool,
    #[serde(default)]
    pub max_ai_calls: Option<u32>,
    #[serde(default)]
    pub max_conflict_files: Option<usize>,
    #[serde(default)]
    pub max_file_bytes: Option<u64>,
    #[serde(default)]
    pub forbid_workflows: Option<bool>,
}

/// Answer of the remote budget to a consume request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetDecision {
    pub allowed: bool,
    pub remaining: i64,
}

/// Shared policy and call budget across CI runs.
#[async_trait]
pub trait BudgetStore: Send + Sync {
    /// Load the policy row for a tool, if one exists.
    async fn load_policy(&self, tool: &str) -> Result<Option<RemotePolicy>>;

    /// Atomically consume `n` calls from the tool's budget.
    async fn consume_calls(&self, tool: &str, n: u32) -> Result<BudgetDecision>;

    /// Open a ledger row for one run and return its id.
    async fn start_run(&self, tool: &str, github_run_id: Option<&str>) -> Result<String>;

    async fn record_event(&self, ledger_id: &str, kind: &str, details: &Value) -> Result<()>;

    /// Close a ledger row with the run's outcome.
    async fn finish_run(&self, ledger_id: &str, success: bool, meta: &Value) -> Result<()>;
}

/// [`BudgetStore`] backed by Supabase PostgREST (`oracle_policies`,
/// `oracle_runs` and `oracle_events` tables and the `oracle_consume_calls`
/// RPC).
pub struct SupabaseBudgetStore {
    config: SupabaseConfig,
    http_client: reqwest::Client,
}

impl SupabaseBudgetStore {
    pub fn new(config: SupabaseConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("citriage/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            config,
            http_client,
        })
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.config.service_key)
            .bearer_auth(&self.config.service_key)
    }

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TriageError::Http {
                status: Some(status.as_u16()),
                message: truncate_chars(&body, 240),
            });
        }
        Ok(response)
    }

    async fn json_or_error(response: reqwest::Response) -> Result<Value> {
        Ok(Self::ensure_success(response).await?.json().await?)
    }
}

#[async_trait]
impl BudgetStore for SupabaseBudgetStore {
    async fn load_policy(&self, tool: &str) -> Result<Option<RemotePolicy>> {
        let url = format!(
            "{}/rest/v1/oracle_policies?tool=eq.{tool}&select={POLICY_COLUMNS}",
            self.config.url
        );
        debug!(%tool, "loading remote policy");
        let response = self.authorized(self.http_client.get(&url)).send().await?;
        let body = Self::json_or_error(response).await?;
        let rows: Vec<RemotePolicy> = serde_json::from_value(body)?;
        Ok(rows.into_iter().next())
    }

    async fn consume_calls(&self, tool: &str, n: u32) -> Result<BudgetDecision> {
        let url = format!("{}/rest/v1/rpc/oracle_consume_calls", self.config.url);
        let response = self
            .authorized(self.http_client.post(&url))
            .json(&serde_json::json!({ "p_tool": tool, "p_n": n }))
            .send()
            .await?;
        let body = Self::json_or_error(response).await?;
        Ok(parse_budget_decision(&body))
    }

    async fn start_run(&self, tool: &str, github_run_id: Option<&str>) -> Result<String> {
        let url = format!("{}/rest/v1/oracle_runs?select=id", self.config.url);
        let row = serde_json::json!({
            "tool": tool,
            "run_source": self.config.run_source,
            "github_run_id": github_run_id,
            "github_ref": self.config.github_ref,
            "meta": {},
        });
        let response = self
            .authorized(self.http_client.post(&url))
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await?;
        let body = Self::json_or_error(response).await?;
        let id = parse_ledger_id(&body)?;
        debug!(%tool, ledger_id = %id, "opened run ledger row");
        Ok(id)
    }

    async fn record_event(&self, ledger_id: &str, kind: &str, details: &Value) -> Result<()> {
        let url = format!("{}/rest/v1/oracle_events", self.config.url);
        let row = serde_json::json!({ "run_id": ledger_id, "kind": kind, "details": details });
        let response = self
            .authorized(self.http_client.post(&url))
            .header("Prefer", "return=minimal")
            .json(&row)
            .send()
            .await?;
        Self::ensure_success(response).await.map(drop)
    }

    async fn finish_run(&self, ledger_id: &str, success: bool, meta: &Value) -> Result<()> {
        let url = format!("{}/rest/v1/oracle_runs?id=eq.{ledger_id}", self.config.url);
        let row = serde_json::json!({
            "finished_at": chrono::Utc::now().to_rfc3339(),
            "success": success,
            "meta": meta,
        });
        let response = self
            .authorized(self.http_client.patch(&url))
            .header("Prefer", "return=minimal")
            .json(&row)
            .send()
            .await?;
        Self::ensure_success(response).await.map(drop)
    }
}

/// Id of the row PostgREST returns for an insert, as a string.
pub fn parse_ledger_id(body: &Value) -> Result<String> {
    let row = match body {
        Value::Array(rows) => rows.first(),
        other => Some(other),
    };
    match row.and_then(|r| r.get("id")) {
        Some(Value::String(id)) => Ok(id.clone()),
        Some(Value::Number(id)) => Ok(id.to_string()),
        _ => Err(TriageError::InvalidReply(
            "run ledger insert returned no id".to_string(),
        )),
    }
}

/// The RPC may answer with a row or a one-row array; anything missing is
/// read as a denial.
pub fn parse_budget_decision(body: &Value) -> BudgetDecision {
    let row = match body {
        Value::Array(rows) => rows.first(),
        other => Some(other),
    };
    BudgetDecision {
        allowed: row
            .and_then(|r| r.get("allowed"))
            .and_then(Value::as_bool)
            .unwrap_or(false),
        remaining: row
            .and_then(|r| r.get("remaining"))
            .and_then(Value::as_i64)
            .unwrap_or(0),
    }
}
