//! Backlog sync.
//!
//! Renders open issues into a markdown block bounded by sentinel comments and
//! merges that block into a hand-edited backlog document. Everything outside
//! the sentinel pair belongs to humans and is preserved byte for byte.

use std::path::Path;

use chrono::{NaiveDate, Utc};
use tracing::debug;

use crate::domain::{BacklogError, Issue, Result};

pub const AUTO_BLOCK_START: &str = "<!-- AUTO:LIVE_ISSUES_START -->";
pub const AUTO_BLOCK_END: &str = "<!-- AUTO:LIVE_ISSUES_END -->";

/// Content of a freshly created backlog document.
pub const BACKLOG_TEMPLATE: &str = "# Backlog\n\n";

const UNRANKED: u32 = 99;
const PLACEHOLDER: &str = "—";

/// Lower rank sorts first.
const LABEL_PRIORITY: &[(&str, u32)] = &[
    ("priority:critical", 0),
    ("security", 1),
    ("priority:high", 2),
    ("ci-failure", 3),
    ("type:bug", 4),
    ("priority:medium", 5),
    ("type:feature", 6),
    ("priority:low", 7),
];

/// Best (lowest) rank across the issue's labels.
pub fn issue_priority(issue: &Issue) -> u32 {
    issue
        .labels
        .iter()
        .filter_map(|label| {
            LABEL_PRIORITY
                .iter()
                .find(|(name, _)| *name == label.name)
                .map(|(_, rank)| *rank)
        })
        .min()
        .unwrap_or(UNRANKED)
}

/// Render the auto-generated block stamped with today's UTC date.
pub fn format_issues_block(issues: &[Issue]) -> String {
    format_issues_block_at(issues, Utc::now().date_naive())
}

/// Render the auto-generated block stamped with `date`.
pub fn format_issues_block_at(issues: &[Issue], date: NaiveDate) -> String {
    let mut sorted: Vec<&Issue> = issues.iter().collect();
    sorted.sort_by_key(|issue| (issue_priority(issue), issue.number));

    let mut lines = vec![
        AUTO_BLOCK_START.to_string(),
        String::new(),
        "## Live Issues Index".to_string(),
        String::new(),
        "> Auto-generated — do not edit this section manually.".to_string(),
        format!("> Last updated: {}", date.format("%Y-%m-%d")),
        String::new(),
        "| # | Title | Labels | Assignees |".to_string(),
        "|---|-------|--------|-----------|".to_string(),
    ];

    for issue in &sorted {
        let labels = issue
            .labels
            .iter()
            .map(|l| format!("`{}`", escape_cell(&l.name)))
            .collect::<Vec<_>>()
            .join(" ");
        let assignees = if issue.assignees.is_empty() {
            PLACEHOLDER.to_string()
        } else {
            issue
                .assignees
                .iter()
                .map(|a| format!("@{}", a.login))
                .collect::<Vec<_>>()
                .join(", ")
        };
        lines.push(format!(
            "| [#{}]({}) | {} | {} | {} |",
            issue.number,
            issue.html_url,
            escape_cell(&issue.title),
            labels,
            assignees
        ));
    }

    if sorted.is_empty() {
        lines.push(format!(
            "| {PLACEHOLDER} | No open issues | {PLACEHOLDER} | {PLACEHOLDER} |"
        ));
    }

    lines.push(String::new());
    lines.push(AUTO_BLOCK_END.to_string());
    lines.join("\n")
}

/// Escape issue text for a table cell so it cannot split the row or be
/// read as a sentinel comment.
fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|")
        .replace('<', "&lt;")
        .replace(['\r', '\n'], " ")
}

/// Replace the auto block inside `existing`, or append it when absent.
///
/// The end marker is the first one after the start marker. A lone start or
/// end marker, or an end marker only before the start marker, is a caller
/// error and is rejected rather than risking manual content.
pub fn update_backlog_content(
    existing: &str,
    issues_block: &str,
) -> std::result::Result<String, BacklogError> {
    let Some(start) = existing.find(AUTO_BLOCK_START) else {
        if existing.contains(AUTO_BLOCK_END) {
            return Err(BacklogError::MissingStartMarker);
        }
        return Ok(format!("{}\n\n{}\n", existing.trim_end(), issues_block));
    };

    let body = start + AUTO_BLOCK_START.len();
    match existing[body..].find(AUTO_BLOCK_END) {
        Some(offset) => {
            let before = &existing[..start];
            let after = &existing[body + offset + AUTO_BLOCK_END.len()..];
            Ok(format!("{before}{issues_block}{after}"))
        }
        None => match existing[..start].find(AUTO_BLOCK_END) {
            Some(end) => Err(BacklogError::MarkersOutOfOrder { start, end }),
            None => Err(BacklogError::MissingEndMarker),
        },
    }
}

/// Merge `issues` into the backlog file at `path`, creating it if needed.
///
/// The file is only rewritten when its content changes. Returns whether it
/// changed.
pub fn sync_backlog_file(path: &Path, issues: &[Issue]) -> Result<bool> {
    let existing = if path.exists() {
        std::fs::read_to_string(path)?
    } else {
        BACKLOG_TEMPLATE.to_string()
    };

    let block = format_issues_block(issues);
    let updated = update_backlog_content(&existing, &block)?;

    if path.exists() && updated == existing {
        debug!(path = %path.display(), "backlog unchanged");
        return Ok(false);
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, updated)?;
    Ok(true)
}

/// Checklist entry recorded when a failed run could not be fixed
/// automatically.
pub fn investigation_entry(date: NaiveDate, workflow: &str, run_id: &str, kind: &str) -> String {
    format!(
        "\n- [ ] ({}) Investigate {workflow} run {run_id} — {kind}\n  - Acceptance: CI green for affected workflow\n  - Source: Actions run {run_id}\n",
        date.format("%Y-%m-%d")
    )
}

/// Append an entry to the backlog file, creating it from the template.
pub fn append_investigation_entry(path: &Path, entry: &str) -> Result<()> {
    let mut content = if path.exists() {
        std::fs::read_to_string(path)?
    } else {
        BACKLOG_TEMPLATE.to_string()
    };
    content.push_str(entry);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, content)?;
    Ok(())
}
