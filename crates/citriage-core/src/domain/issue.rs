//! Issue tracker records consumed by the backlog sync.

use serde::{Deserialize, Serialize};

/// A label attached to an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
}

/// A user assigned to an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignee {
    pub login: String,
}

/// An issue in the shape of the GitHub REST API.
///
/// Only the fields the backlog sync needs are modelled; everything else in
/// the payload is ignored on deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub html_url: String,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub assignees: Vec<Assignee>,
    #[serde(default)]
    pub created_at: String,
    /// Present only when the entry is a pull request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<serde_json::Value>,
}

impl Issue {
    /// Create an open issue with no labels or assignees.
    pub fn new(number: u64, title: impl Into<String>, html_url: impl Into<String>) -> Self {
        Self {
            number,
            title: title.into(),
            html_url: html_url.into(),
            labels: Vec::new(),
            state: "open".to_string(),
            assignees: Vec::new(),
            created_at: String::new(),
            pull_request: None,
        }
    }

    /// Builder: attach a label.
    pub fn with_label(mut self, name: impl Into<String>) -> Self {
        self.labels.push(Label { name: name.into() });
        self
    }

    /// Builder: attach an assignee.
    pub fn with_assignee(mut self, login: impl Into<String>) -> Self {
        self.assignees.push(Assignee {
            login: login.into(),
        });
        self
    }

    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_github_payload_ignores_extra_fields() {
        let json = r#"{
            "number": 42,
            "title": "Fix bug",
            "html_url": "https://github.com/org/repo/issues/42",
            "labels": [{"name": "type:bug", "color": "d73a4a"}],
            "state": "open",
            "assignees": [{"login": "dev1", "id": 7}],
            "created_at": "2026-01-01T00:00:00Z",
            "comments": 3
        }"#;
        let issue: Issue = serde_json::from_str(json).expect("deserialize");
        assert_eq!(issue.number, 42);
        assert_eq!(issue.labels[0].name, "type:bug");
        assert_eq!(issue.assignees[0].login, "dev1");
        assert!(!issue.is_pull_request());
    }

    #[test]
    fn test_pull_request_marker() {
        let json = r#"{
            "number": 7,
            "title": "Bump deps",
            "html_url": "https://github.com/org/repo/pull/7",
            "state": "open",
            "created_at": "2026-01-01T00:00:00Z",
            "pull_request": {"url": "https://api.github.com/repos/org/repo/pulls/7"}
        }"#;
        let issue: Issue = serde_json::from_str(json).expect("deserialize");
        assert!(issue.is_pull_request());
        assert!(issue.labels.is_empty());
    }
}
