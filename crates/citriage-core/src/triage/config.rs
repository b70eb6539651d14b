//! Triage configuration.
//!
//! Every knob has a default and an environment variable, so the same binary
//! runs unchanged across CI providers.

use serde::{Deserialize, Serialize};

use crate::autofix_policy::MAX_CHANGED_FILES;
use crate::domain::{Result, TriageError};

use super::budget::RemotePolicy;

const DEFAULT_BASE_URL: &str = "https://api.deepseek.com";
const DEFAULT_MODEL: &str = "deepseek-chat";
pub const DEFAULT_RUN_SOURCE: &str = "citriage";

/// Guardrails for one triage invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageConfig {
    /// Model calls allowed per invocation.
    pub max_calls: u32,
    /// Files a patch may touch.
    pub max_files: usize,
    /// Largest existing file a patch may modify.
    pub max_file_bytes: u64,
    /// Reject patches touching `.github/workflows/`.
    pub forbid_workflow_edits: bool,
    /// Replies below this confidence are never applied.
    pub confidence_threshold: f64,
    /// Characters of failure summary sent to the model.
    pub summary_char_limit: usize,
    /// Characters of failed logs sent to the model.
    pub logs_char_limit: usize,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            max_calls: 1,
            max_files: 8,
            max_file_bytes: 200_000,
            forbid_workflow_edits: true,
            confidence_threshold: 0.75,
            summary_char_limit: 16_000,
            logs_char_limit: 50_000,
        }
    }
}

impl TriageConfig {
    /// Read `AI_MAX_CALLS`, `MAX_PATCH_FILES`, `MAX_FILE_BYTES` and
    /// `FORBID_WORKFLOW_EDITS` through `lookup` (the process environment in
    /// the binary), falling back to defaults when unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let max_calls = positive(&lookup, "AI_MAX_CALLS")?
            .map(u32::try_from)
            .transpose()
            .map_err(|_| TriageError::InvalidConfig("AI_MAX_CALLS is too large".into()))?
            .unwrap_or(defaults.max_calls);
        let max_files = positive(&lookup, "MAX_PATCH_FILES")?
            .map(|v| v as usize)
            .unwrap_or(defaults.max_files);
        let max_file_bytes =
            positive(&lookup, "MAX_FILE_BYTES")?.unwrap_or(defaults.max_file_bytes);
        // Anything but an explicit "false" keeps workflow edits forbidden.
        let forbid_workflow_edits = lookup("FORBID_WORKFLOW_EDITS")
            .map(|v| !v.trim().eq_ignore_ascii_case("false"))
            .unwrap_or(true);

        Self {
            max_calls,
            max_files,
            max_file_bytes,
            forbid_workflow_edits,
            ..defaults
        }
        .validated()
    }

    /// Clamp and sanity-check the configuration.
    pub fn validated(mut self) -> Result<Self> {
        if self.max_calls == 0 {
            return Err(TriageError::InvalidConfig(
                "max_calls must be a positive integer".into(),
            ));
        }
        if self.max_files == 0 {
            return Err(TriageError::InvalidConfig(
                "max_files must be a positive integer".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(TriageError::InvalidConfig(format!(
                "confidence_threshold {} is outside 0..=1",
                self.confidence_threshold
            )));
        }
        self.max_files = self.max_files.min(MAX_CHANGED_FILES);
        Ok(self)
    }

    /// Apply the file guardrail overrides of a remote policy.
    ///
    /// The call count is not overridden: the remote store enforces its own
    /// budget through the consume RPC.
    pub fn with_remote(&self, policy: &RemotePolicy) -> Self {
        let mut next = self.clone();
        if let Some(max_files) = policy.max_conflict_files.filter(|v| *v > 0) {
            next.max_files = max_files.min(MAX_CHANGED_FILES);
        }
        if let Some(max_bytes) = policy.max_file_bytes.filter(|v| *v > 0) {
            next.max_file_bytes = max_bytes;
        }
        if let Some(forbid) = policy.forbid_workflows {
            next.forbid_workflow_edits = forbid;
        }
        next
    }
}

fn positive<F>(lookup: &F, name: &str) -> Result<Option<u64>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    match raw.parse::<u64>() {
        Ok(v) if v > 0 => Ok(Some(v)),
        _ => Err(TriageError::InvalidConfig(format!(
            "{name} must be a positive integer"
        ))),
    }
}

/// Chat-completion endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Base URL without the `/v1/chat/completions` suffix
    pub base_url: String,
    /// Bearer token
    pub api_key: String,
    /// Model name
    pub model: String,
    pub temperature: f32,
    /// Extra header some gateways require, as `(name, value)`
    pub extra_header: Option<(String, String)>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl ChatConfig {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        ChatConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.0,
            extra_header: None,
            timeout_secs: 120,
        }
    }

    /// Read `AI_API_KEY` (required), `AI_BASE_URL`, `AI_MODEL` and the
    /// optional `AI_EXTRA_HEADER_NAME` / `AI_EXTRA_HEADER_VALUE` pair.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let api_key = non_empty("AI_API_KEY")
            .ok_or_else(|| TriageError::MissingCredentials("AI_API_KEY".into()))?;
        let base_url = non_empty("AI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let mut config = ChatConfig::new(&base_url, &api_key);
        if let Some(model) = non_empty("AI_MODEL") {
            config.model = model;
        }
        if let Some(name) = non_empty("AI_EXTRA_HEADER_NAME") {
            let value = non_empty("AI_EXTRA_HEADER_VALUE").ok_or_else(|| {
                TriageError::MissingCredentials("AI_EXTRA_HEADER_VALUE".into())
            })?;
            config.extra_header = Some((name, value));
        }
        Ok(config)
    }

    /// Set the model name
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }
}

/// Remote policy and budget store (Supabase PostgREST).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupabaseConfig {
    pub url: String,
    pub service_key: String,
    /// Recorded on each run-ledger row.
    pub run_source: String,
    pub github_ref: Option<String>,
}

impl SupabaseConfig {
    /// Read `SUPABASE_URL` and `SUPABASE_SERVICE_ROLE_KEY`; `None` unless
    /// both are set, in which case the remote store is disabled.
    /// `ORACLE_RUN_SOURCE` and `GITHUB_REF` tag the run ledger.
    pub fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("SUPABASE_URL").filter(|v| !v.trim().is_empty())?;
        let service_key = lookup("SUPABASE_SERVICE_ROLE_KEY").filter(|v| !v.trim().is_empty())?;
        let optional = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Some(SupabaseConfig {
            url: url.trim().trim_end_matches('/').to_string(),
            service_key: service_key.trim().to_string(),
            run_source: optional("ORACLE_RUN_SOURCE")
                .unwrap_or_else(|| DEFAULT_RUN_SOURCE.to_string()),
            github_ref: optional("GITHUB_REF"),
        })
    }
}
