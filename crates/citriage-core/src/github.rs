//! GitHub issues client used by the backlog sync.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::{Issue, Result, TriageError};

const DEFAULT_API_URL: &str = "https://api.github.com";
const PER_PAGE: usize = 100;
const MAX_PAGES: usize = 10;

/// GitHub API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// API base URL (GitHub Enterprise installs differ)
    pub api_url: String,
    /// Repository as `owner/name`
    pub repository: String,
    /// Token; public repositories work without one, rate limits permitting
    pub token: Option<String>,
}

impl GitHubConfig {
    /// Create config for a repository against the public API.
    pub fn new(repository: &str) -> Self {
        GitHubConfig {
            api_url: DEFAULT_API_URL.to_string(),
            repository: repository.to_string(),
            token: None,
        }
    }

    /// Set authentication token
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    /// URL of one page of open issues.
    pub fn issues_url(&self, page: usize) -> String {
        format!(
            "{}/repos/{}/issues?state=open&per_page={PER_PAGE}&page={page}",
            self.api_url.trim_end_matches('/'),
            self.repository
        )
    }
}

/// Read-only client for the GitHub issues API.
pub struct GitHubClient {
    config: GitHubConfig,
    http_client: reqwest::Client,
}

impl GitHubClient {
    pub fn new(config: GitHubConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("citriage/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(GitHubClient {
            config,
            http_client,
        })
    }

    /// Fetch all open issues, excluding pull requests.
    pub async fn list_open_issues(&self) -> Result<Vec<Issue>> {
        let mut issues = Vec::new();

        for page in 1..=MAX_PAGES {
            let url = self.config.issues_url(page);
            debug!(%url, "fetching issues page");

            let mut request = self
                .http_client
                .get(&url)
                .header("Accept", "application/vnd.github+json");
            if let Some(token) = &self.config.token {
                request = request.bearer_auth(token);
            }

            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(TriageError::Http {
                    status: Some(status.as_u16()),
                    message: truncate_chars(&body, 240),
                });
            }

            let batch: Vec<Issue> = response.json().await?;
            let fetched = batch.len();
            issues.extend(batch.into_iter().filter(|i| !i.is_pull_request()));

            if fetched < PER_PAGE {
                break;
            }
        }

        info!(
            repository = %self.config.repository,
            count = issues.len(),
            "fetched open issues"
        );
        Ok(issues)
    }
}

/// Truncate to at most `max` characters without splitting a code point.
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issues_url() {
        let config = GitHubConfig {
            api_url: "https://github.example.com/api/v3/".to_string(),
            repository: "org/shop".to_string(),
            token: None,
        };
        assert_eq!(
            config.issues_url(2),
            "https://github.example.com/api/v3/repos/org/shop/issues?state=open&per_page=100&page=2"
        );
    }

    #[test]
    fn test_with_token() {
        let config = GitHubConfig::new("org/shop").with_token("ghp_test");
        assert_eq!(config.token.as_deref(), Some("ghp_test"));
        assert_eq!(config.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn test_truncate_chars_respects_code_points() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
