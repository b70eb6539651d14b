//! The triage status artifact.
//!
//! Written for every run, including failed ones, so CI can tell "triage
//! could not safely act" apart from success.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::{EnvironmentHint, FailureClass};
use crate::domain::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageStatus {
    pub run_id: String,
    pub workflow: Option<String>,
    pub success: bool,
    /// `applied`, a decline code or an error code.
    pub reason: String,
    pub failure_class: FailureClass,
    pub environment_hint: Option<EnvironmentHint>,
    pub confidence: Option<f64>,
    pub rationale: Option<String>,
    pub files: Vec<String>,
    pub patch_digest: Option<String>,
    /// Error message for hard failures.
    pub error: Option<String>,
    pub evaluated_at: DateTime<Utc>,
}

impl TriageStatus {
    pub fn new(
        run_id: &str,
        workflow: Option<&str>,
        failure_class: FailureClass,
        environment_hint: Option<EnvironmentHint>,
    ) -> Self {
        Self {
            run_id: run_id.to_string(),
            workflow: workflow.map(str::to_string),
            success: false,
            reason: "pending".to_string(),
            failure_class,
            environment_hint,
            confidence: None,
            rationale: None,
            files: Vec::new(),
            patch_digest: None,
            error: None,
            evaluated_at: Utc::now(),
        }
    }
}

/// Write the status as pretty JSON, creating parent directories.
pub fn write_status(path: &Path, status: &TriageStatus) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_vec_pretty(status)?;
    std::fs::write(path, json)?;
    Ok(())
}

pub fn read_status(path: &Path) -> Result<TriageStatus> {
    let json = std::fs::read(path)?;
    Ok(serde_json::from_slice(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_creates_parent_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".tmp/triage-status.json");

        let mut status = TriageStatus::new("77", Some("CI"), FailureClass::Lint, None);
        status.reason = "low-confidence-or-empty-patch".to_string();
        status.confidence = Some(0.4);
        write_status(&path, &status).unwrap();

        let loaded = read_status(&path).unwrap();
        assert_eq!(loaded, status);

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["failure_class"], "lint");
        assert_eq!(raw["success"], false);
    }
}
