//! citriage - CI failure triage CLI
//!
//! ## Commands
//!
//! - `classify`: Classify a CI log into the failure taxonomy
//! - `policy`: Check a candidate autofix against the policy engine
//! - `backlog sync`: Merge open GitHub issues into the backlog document
//! - `triage`: Ask the model for a guarded patch and apply it

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn, Level};

use citriage_core::triage::{
    collect_log_dir, read_truncated, record_setup_failure, BudgetStore, ChatClient,
    GitPatchApplier,
};
use citriage_core::{
    append_investigation_entry, classify, count_diff_lines, emit_backlog_synced,
    emit_classified, emit_policy_checked, environment_hint, full_check, investigation_entry,
    is_transient, suggested_labels, sync_backlog_file, AutofixCandidate, ChatConfig,
    ClassifyResult, EnvironmentHint, GitHubClient, GitHubConfig, HttpChatClient, Issue,
    PolicyCheckResult, SupabaseBudgetStore, SupabaseConfig, TriageConfig, TriageError,
    TriageInput, TriageOrchestrator, TriageOutcome,
};

/// Upper bound for a log read from a file or stdin.
const MAX_LOG_CHARS: usize = 200_000;

#[derive(Parser)]
#[command(name = "citriage")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "CI failure classification, autofix guardrails and AI triage", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a CI failure log
    Classify {
        /// Log file to read (default: stdin)
        #[arg(short, long)]
        log: Option<PathBuf>,

        /// Print the result as JSON
        #[arg(long)]
        format_json: bool,
    },

    /// Check whether an automated change may be applied
    Policy {
        /// Changed file paths
        #[arg(short, long, num_args = 1..)]
        files: Vec<String>,

        /// Changed line count
        #[arg(long, conflicts_with = "patch")]
        diff_lines: Option<usize>,

        /// Unified diff to count changed lines from
        #[arg(long)]
        patch: Option<PathBuf>,

        /// Unix epoch milliseconds of the last automated fix
        #[arg(long)]
        last_fix_ms: Option<i64>,

        /// Print the result as JSON
        #[arg(long)]
        format_json: bool,
    },

    /// Manage the backlog document
    Backlog {
        #[command(subcommand)]
        action: BacklogAction,
    },

    /// Run AI triage for a failed CI run
    Triage {
        /// Failure summary written by the CI job
        #[arg(long, default_value = ".tmp/failure-summary.txt")]
        summary: PathBuf,

        /// Concatenated failed-step logs
        #[arg(long, default_value = ".tmp/failed-logs.txt")]
        logs: PathBuf,

        /// Directory of downloaded job logs, used when --logs is missing
        #[arg(long)]
        logs_dir: Option<PathBuf>,

        /// Status artifact path
        #[arg(long, default_value = ".tmp/triage-status.json")]
        status: PathBuf,

        /// Repository working tree to patch
        #[arg(long, default_value = ".")]
        repo: PathBuf,

        /// CI run id (random when unset)
        #[arg(long, env = "GITHUB_RUN_ID")]
        run_id: Option<String>,

        /// Workflow name
        #[arg(long, env = "GITHUB_WORKFLOW")]
        workflow: Option<String>,

        /// Commit under test
        #[arg(long, env = "GITHUB_SHA")]
        head_sha: Option<String>,

        /// Model name override
        #[arg(long, env = "AI_MODEL")]
        model: Option<String>,

        /// Backlog document to record an investigation entry in when no fix
        /// is applied
        #[arg(long)]
        backlog: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum BacklogAction {
    /// Replace the auto-generated issues block with the open issues
    Sync {
        /// Backlog document
        #[arg(long, default_value = "NOTES/backlog.md")]
        path: PathBuf,

        /// Read issues from a JSON file instead of the GitHub API
        #[arg(long)]
        issues_json: Option<PathBuf>,

        /// Repository as owner/name
        #[arg(long, env = "GITHUB_REPOSITORY")]
        repo: Option<String>,

        /// GitHub token
        #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// API base URL for GitHub Enterprise
        #[arg(long, env = "GITHUB_API_URL")]
        api_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    citriage_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Classify { log, format_json } => cmd_classify(log.as_deref(), format_json),
        Commands::Policy {
            files,
            diff_lines,
            patch,
            last_fix_ms,
            format_json,
        } => cmd_policy(files, diff_lines, patch.as_deref(), last_fix_ms, format_json),
        Commands::Backlog { action } => match action {
            BacklogAction::Sync {
                path,
                issues_json,
                repo,
                token,
                api_url,
            } => cmd_backlog_sync(&path, issues_json.as_deref(), repo, token, api_url).await,
        },
        Commands::Triage {
            summary,
            logs,
            logs_dir,
            status,
            repo,
            run_id,
            workflow,
            head_sha,
            model,
            backlog,
        } => {
            let input = load_triage_input(
                &summary,
                &logs,
                logs_dir.as_deref(),
                run_id.as_deref(),
                workflow.as_deref(),
                head_sha.as_deref(),
            )?;
            cmd_triage(&input, &repo, &status, model.as_deref(), backlog.as_deref()).await
        }
    }
}

// ---------------------------------------------------------------------------
// classify
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ClassifyReport {
    #[serde(flatten)]
    result: ClassifyResult,
    transient: bool,
    labels: Vec<&'static str>,
    environment_hint: Option<EnvironmentHint>,
}

fn classify_report(log_text: &str) -> ClassifyReport {
    let result = classify(log_text);
    emit_classified(&result);
    ClassifyReport {
        transient: is_transient(&result),
        labels: suggested_labels(&result),
        environment_hint: environment_hint(log_text),
        result,
    }
}

fn cmd_classify(log: Option<&Path>, format_json: bool) -> Result<()> {
    let text = match log {
        Some(path) => read_truncated(path, MAX_LOG_CHARS)
            .with_context(|| format!("Failed to read log: {:?}", path))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read log from stdin")?;
            buf
        }
    };

    let report = classify_report(&text);
    if format_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Class:      {}", report.result.failure_class);
    println!("Retryable:  {}", report.result.retryable);
    println!("Confidence: {:?}", report.result.confidence);
    println!("Transient:  {}", report.transient);
    println!("Labels:     {}", report.labels.join(", "));
    if !report.result.matched_pattern.is_empty() {
        println!("Matched:    {}", report.result.matched_pattern);
    }
    if let Some(hint) = report.environment_hint {
        println!("Hint:       {} ({})", hint.as_str(), hint.description());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// policy
// ---------------------------------------------------------------------------

fn policy_verdict(
    files: Vec<String>,
    diff_lines: Option<usize>,
    patch: Option<&Path>,
    last_fix_ms: Option<i64>,
) -> Result<PolicyCheckResult> {
    let diff_lines = match (diff_lines, patch) {
        (Some(lines), _) => lines,
        (None, Some(path)) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read patch: {:?}", path))?;
            count_diff_lines(&text)
        }
        (None, None) => 0,
    };
    let candidate = AutofixCandidate {
        files,
        diff_lines,
        last_fix_timestamp: last_fix_ms,
    };
    let result = full_check(&candidate);
    emit_policy_checked("autofix", &result);
    Ok(result)
}

fn cmd_policy(
    files: Vec<String>,
    diff_lines: Option<usize>,
    patch: Option<&Path>,
    last_fix_ms: Option<i64>,
    format_json: bool,
) -> Result<()> {
    let result = policy_verdict(files, diff_lines, patch, last_fix_ms)?;

    if format_json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if result.allowed {
        println!("Autofix allowed");
    } else {
        println!("Autofix denied:");
        for violation in &result.violations {
            println!("  - {}", violation);
        }
    }

    if !result.allowed {
        anyhow::bail!(
            "Autofix policy denied the change ({} violation(s))",
            result.violations.len()
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// backlog sync
// ---------------------------------------------------------------------------

fn read_issues_json(path: &Path) -> Result<Vec<Issue>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read issues: {:?}", path))?;
    let issues: Vec<Issue> = serde_json::from_str(&raw)
        .with_context(|| format!("Issues file is not a JSON array of issues: {:?}", path))?;
    Ok(issues.into_iter().filter(|i| !i.is_pull_request()).collect())
}

async fn cmd_backlog_sync(
    path: &Path,
    issues_json: Option<&Path>,
    repo: Option<String>,
    token: Option<String>,
    api_url: Option<String>,
) -> Result<()> {
    let issues = match issues_json {
        Some(file) => read_issues_json(file)?,
        None => {
            let repo = repo.context("GITHUB_REPOSITORY (or --repo) is required to fetch issues")?;
            let mut config = GitHubConfig::new(&repo);
            if let Some(api_url) = api_url.filter(|u| !u.trim().is_empty()) {
                config.api_url = api_url;
            }
            if let Some(token) = token.as_deref().filter(|t| !t.trim().is_empty()) {
                config = config.with_token(token);
            }
            GitHubClient::new(config)?
                .list_open_issues()
                .await
                .context("Failed to fetch open issues")?
        }
    };

    let changed = sync_backlog_file(path, &issues)
        .with_context(|| format!("Failed to sync backlog: {:?}", path))?;
    emit_backlog_synced(&path.display().to_string(), issues.len(), changed);

    if changed {
        println!("Updated {:?} with {} open issue(s)", path, issues.len());
    } else {
        println!("{:?} already up to date", path);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// triage
// ---------------------------------------------------------------------------

fn read_optional(path: &Path, max_chars: usize) -> Result<String> {
    if !path.exists() {
        return Ok(String::new());
    }
    read_truncated(path, max_chars).with_context(|| format!("Failed to read {:?}", path))
}

fn load_triage_input(
    summary: &Path,
    logs: &Path,
    logs_dir: Option<&Path>,
    run_id: Option<&str>,
    workflow: Option<&str>,
    head_sha: Option<&str>,
) -> Result<TriageInput> {
    let failure_summary = read_optional(summary, MAX_LOG_CHARS)?;
    let mut failed_logs = read_optional(logs, MAX_LOG_CHARS)?;
    if failed_logs.trim().is_empty() {
        if let Some(dir) = logs_dir {
            failed_logs = collect_log_dir(dir)
                .with_context(|| format!("Failed to collect logs from {:?}", dir))?;
        }
    }

    let mut input = TriageInput::new(failure_summary, failed_logs);
    if let Some(run_id) = run_id.filter(|r| !r.is_empty()) {
        input = input.with_run_id(run_id);
    }
    if let Some(workflow) = workflow.filter(|w| !w.is_empty()) {
        input = input.with_workflow(workflow);
    }
    if let Some(sha) = head_sha.filter(|s| !s.is_empty()) {
        input = input.with_head_sha(sha);
    }
    Ok(input)
}

async fn cmd_triage(
    input: &TriageInput,
    repo: &Path,
    status: &Path,
    model: Option<&str>,
    backlog: Option<&Path>,
) -> Result<()> {
    run_triage(input, repo, status, model, backlog, |name| std::env::var(name).ok()).await
}

/// Orchestrator for `repo`, configured from `lookup` (the process
/// environment outside tests).
fn build_orchestrator<F>(
    repo: &Path,
    status: &Path,
    model: Option<&str>,
    lookup: F,
) -> citriage_core::Result<TriageOrchestrator>
where
    F: Fn(&str) -> Option<String>,
{
    if !citriage_core::git::is_git_repo(repo) {
        return Err(TriageError::GitError(format!(
            "not a git work tree: {}",
            repo.display()
        )));
    }
    let config = TriageConfig::from_lookup(&lookup)?;
    let mut chat = ChatConfig::from_lookup(&lookup)?;
    if let Some(model) = model {
        chat = chat.with_model(model);
    }
    let client: Box<dyn ChatClient> = Box::new(HttpChatClient::new(chat)?);

    let mut orchestrator =
        TriageOrchestrator::new(config, client, Box::new(GitPatchApplier::new(repo)))
            .with_status_path(status);
    if let Some(supabase) = SupabaseConfig::from_lookup(&lookup) {
        info!(url = %supabase.url, "using remote triage budget");
        let store: Box<dyn BudgetStore> = Box::new(SupabaseBudgetStore::new(supabase)?);
        orchestrator = orchestrator.with_budget_store(store);
    }
    Ok(orchestrator)
}

async fn run_triage<F>(
    input: &TriageInput,
    repo: &Path,
    status: &Path,
    model: Option<&str>,
    backlog: Option<&Path>,
    lookup: F,
) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let orchestrator = match build_orchestrator(repo, status, model, lookup) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            match record_setup_failure(input, status, &e) {
                Ok(_) => println!("Status written to {:?}", status),
                Err(write_error) => {
                    warn!(path = ?status, error = %write_error, "failed to write triage status")
                }
            }
            record_investigation(input, backlog, e.reason_code())?;
            return Err(e).context("Triage setup failed");
        }
    };

    let result = orchestrator.run(input).await;
    let kind = match &result {
        Ok(TriageOutcome::Applied { files, confidence, .. }) => {
            println!(
                "Applied patch to {} file(s) (confidence {:.2}):",
                files.len(),
                confidence
            );
            for file in files {
                println!("  {}", file);
            }
            None
        }
        Ok(outcome @ TriageOutcome::Declined { .. }) => {
            println!("No patch applied: {}", outcome.reason_code());
            Some(outcome.reason_code())
        }
        Err(e) => Some(e.reason_code()),
    };
    println!("Status written to {:?}", orchestrator.status_path());

    if let Some(kind) = kind {
        record_investigation(input, backlog, kind)?;
    }

    result.context("Triage failed")?;
    Ok(())
}

/// Append a follow-up entry to the backlog, when one was given.
fn record_investigation(input: &TriageInput, backlog: Option<&Path>, kind: &str) -> Result<()> {
    let Some(path) = backlog else {
        return Ok(());
    };
    let entry = investigation_entry(
        chrono::Utc::now().date_naive(),
        input.workflow.as_deref().unwrap_or("CI"),
        &input.run_id,
        kind,
    );
    append_investigation_entry(path, &entry)
        .with_context(|| format!("Failed to append to backlog: {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_backlog_sync_defaults() {
        let cli = Cli::try_parse_from(["citriage", "backlog", "sync", "--issues-json", "i.json"])
            .unwrap();
        match cli.command {
            Commands::Backlog {
                action: BacklogAction::Sync {
                    path, issues_json, ..
                },
            } => {
                assert_eq!(path, PathBuf::from("NOTES/backlog.md"));
                assert_eq!(issues_json, Some(PathBuf::from("i.json")));
            }
            _ => panic!("expected backlog sync"),
        }
    }

    #[test]
    fn test_policy_rejects_diff_lines_with_patch() {
        let parsed = Cli::try_parse_from([
            "citriage",
            "policy",
            "--files",
            "src/a.ts",
            "--diff-lines",
            "3",
            "--patch",
            "fix.patch",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_classify_report_includes_labels() {
        let report = classify_report("Error: connect ECONNREFUSED 127.0.0.1:5432");
        assert!(report.transient);
        assert_eq!(report.labels, vec!["ci-failure", "transient"]);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["failure_class"], "network-transient");
        assert_eq!(json["transient"], true);
    }

    #[test]
    fn test_policy_counts_patch_lines() {
        let dir = tempfile::tempdir().unwrap();
        let patch = dir.path().join("fix.patch");
        let lines: String = (0..501).map(|i| format!("+line {i}\n")).collect();
        let header = "--- a/src/a.ts\n+++ b/src/a.ts\n@@ -0,0 +1,501 @@\n";
        std::fs::write(&patch, format!("{header}{lines}")).unwrap();

        let files = vec!["src/a.ts".to_string()];
        let result = policy_verdict(files, None, Some(patch.as_path()), None).unwrap();
        assert!(!result.allowed);
        assert_eq!(result.violations, vec!["Diff too large: 501 lines (max 500)"]);

        assert!(cmd_policy(vec![".env".to_string()], Some(1), None, None, true).is_err());
    }

    #[test]
    fn test_backlog_sync_from_issues_file() {
        let dir = tempfile::tempdir().unwrap();
        let issues = dir.path().join("issues.json");
        std::fs::write(
            &issues,
            r#"[
                {"number": 5, "title": "Broken build", "html_url": "https://github.com/acme/web/issues/5",
                 "labels": [{"name": "priority:high"}], "assignees": [{"login": "dev"}]},
                {"number": 6, "title": "A PR", "html_url": "https://github.com/acme/web/pull/6",
                 "pull_request": {"url": "https://api.github.com/repos/acme/web/pulls/6"}}
            ]"#,
        )
        .unwrap();

        let parsed = read_issues_json(&issues).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].number, 5);
    }

    #[test]
    fn test_load_triage_input_falls_back_to_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let logs_dir = dir.path().join("logs");
        std::fs::create_dir_all(&logs_dir).unwrap();
        std::fs::write(logs_dir.join("1_lint.txt"), "ESLint found 2 errors").unwrap();

        let input = load_triage_input(
            &dir.path().join("missing-summary.txt"),
            &dir.path().join("missing-logs.txt"),
            Some(logs_dir.as_path()),
            Some("555"),
            Some("CI"),
            None,
        )
        .unwrap();

        assert_eq!(input.run_id, "555");
        assert!(input.failure_summary.is_empty());
        assert!(input.failed_logs.contains("ESLint found 2 errors"));
        assert!(input.failed_logs.contains("1_lint.txt"));
    }

    fn lint_input() -> TriageInput {
        TriageInput::new("job lint failed", "ESLint found 1 error")
            .with_run_id("808")
            .with_workflow("CI")
    }

    #[tokio::test]
    async fn test_triage_without_credentials_still_records_run() {
        let dir = tempfile::tempdir().unwrap();
        let init = std::process::Command::new("git")
            .arg("init")
            .current_dir(dir.path())
            .output()
            .unwrap();
        assert!(init.status.success());
        let status = dir.path().join(".tmp/triage-status.json");
        let backlog = dir.path().join("NOTES/backlog.md");

        let err = run_triage(
            &lint_input(),
            dir.path(),
            &status,
            None,
            Some(backlog.as_path()),
            |_| None,
        )
        .await
        .unwrap_err();
        assert!(format!("{err:#}").contains("AI_API_KEY"));

        let written = citriage_core::triage::read_status(&status).unwrap();
        assert!(!written.success);
        assert_eq!(written.reason, "missing-credentials");
        assert_eq!(written.run_id, "808");
        assert_eq!(written.workflow.as_deref(), Some("CI"));

        let notes = std::fs::read_to_string(&backlog).unwrap();
        assert!(notes.contains("Investigate CI run 808 — missing-credentials"));
    }

    #[tokio::test]
    async fn test_triage_outside_git_repo_still_records_status() {
        let dir = tempfile::tempdir().unwrap();
        let status = dir.path().join("status.json");

        let err = run_triage(
            &lint_input(),
            dir.path(),
            &status,
            None,
            None,
            |name| (name == "AI_API_KEY").then(|| "sk-test".to_string()),
        )
        .await
        .unwrap_err();
        assert!(format!("{err:#}").contains("not a git work tree"));

        let written = citriage_core::triage::read_status(&status).unwrap();
        assert_eq!(written.reason, "git-error");
    }
}
