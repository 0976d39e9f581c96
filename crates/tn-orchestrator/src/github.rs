//! Repository listing against the source-hosting API

use serde::Deserialize;
use thiserror::Error;

const PER_PAGE: usize = 100;
/// Longest account name the hosting service accepts
const MAX_USERNAME_LEN: usize = 39;
/// Upper bound on pages fetched for one user
const MAX_PAGES: usize = 10;

#[derive(Error, Debug)]
pub enum GithubError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned {status} for {url}")]
    Status { status: u16, url: String },

    #[error("invalid account name '{0}': use letters, digits and single hyphens")]
    InvalidUser(String),
}

/// Check `user` against the account-name grammar: ASCII alphanumerics and
/// single hyphens, neither leading nor trailing
pub fn validate_username(user: &str) -> Result<(), GithubError> {
    let valid = !user.is_empty()
        && user.len() <= MAX_USERNAME_LEN
        && user.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        && !user.starts_with('-')
        && !user.ends_with('-')
        && !user.contains("--");
    if valid {
        Ok(())
    } else {
        Err(GithubError::InvalidUser(user.to_string()))
    }
}

/// One repository as listed by the API
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RepoSummary {
    pub name: String,
    pub html_url: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub fork: bool,
}

/// Minimal client for the public repositories endpoint
#[derive(Debug, Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    base_url: String,
}

impl GithubClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, GithubError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("tenantry/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// URL of one page of a user's repositories
    pub fn repos_url(&self, user: &str, page: usize) -> String {
        format!(
            "{}/users/{}/repos?per_page={}&page={}",
            self.base_url, user, PER_PAGE, page
        )
    }

    /// All public repositories of `user`, sorted by name
    pub async fn list_user_repos(&self, user: &str) -> Result<Vec<RepoSummary>, GithubError> {
        validate_username(user)?;
        let mut repos = Vec::new();
        for page in 1..=MAX_PAGES {
            let url = self.repos_url(user, page);
            tracing::debug!("GET {}", url);
            let response = self
                .http
                .get(&url)
                .header("Accept", "application/vnd.github+json")
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(GithubError::Status {
                    status: response.status().as_u16(),
                    url,
                });
            }
            let batch: Vec<RepoSummary> = response.json().await?;
            let done = batch.len() < PER_PAGE;
            repos.extend(batch);
            if done {
                break;
            }
        }
        repos.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(repos)
    }
}
