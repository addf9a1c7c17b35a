// src/vcs/github.rs

//! Pull request creation on the hosting provider

use crate::error::{Error, Result};
use crate::http::HttpClient;
use serde::{Deserialize, Serialize};
use tracing::info;

pub const GITHUB_API_URL: &str = "https://api.github.com";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullRequest {
    pub title: String,
    /// Branch holding the changes
    pub head: String,
    /// Branch the changes go into
    pub base: String,
    pub body: String,
}

/// Opens pull requests for pushed branches
pub trait ReviewProvider: Send + Sync {
    /// Returns the URL of the created pull request
    fn create_pull_request(&self, repo_url: &str, pr: &PullRequest) -> Result<String>;
}

#[derive(Deserialize)]
struct PullResponse {
    html_url: String,
}

pub struct GithubProvider {
    client: HttpClient,
    api_url: String,
    token: String,
}

impl GithubProvider {
    pub fn new(client: HttpClient, api_url: Option<&str>, token: &str) -> Result<Self> {
        if token.is_empty() {
            return Err(Error::PushAuth("a GitHub token is needed to open pull requests".to_string()));
        }
        Ok(Self {
            client,
            api_url: api_url.unwrap_or(GITHUB_API_URL).trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }
}

/// `(owner, repo)` of a GitHub clone URL
pub fn parse_github_repo(url: &str) -> Result<(String, String)> {
    let trimmed = url.trim_end_matches('/').trim_end_matches(".git");
    let path = if let Some(rest) = trimmed.strip_prefix("git@github.com:") {
        rest.to_string()
    } else {
        url::Url::parse(trimmed)
            .map_err(|e| Error::PullRequest(format!("Invalid repository URL {}: {}", url, e)))?
            .path()
            .trim_start_matches('/')
            .to_string()
    };

    match path.split('/').collect::<Vec<_>>().as_slice() {
        [owner, repo] if !owner.is_empty() && !repo.is_empty() => {
            Ok((owner.to_string(), repo.to_string()))
        }
        _ => Err(Error::PullRequest(format!("Cannot find owner/repo in {}", url))),
    }
}

impl ReviewProvider for GithubProvider {
    fn create_pull_request(&self, repo_url: &str, pr: &PullRequest) -> Result<String> {
        let (owner, repo) = parse_github_repo(repo_url)?;
        let url = format!("{}/repos/{}/{}/pulls", self.api_url, owner, repo);
        let headers = vec![
            ("Authorization".to_string(), format!("Bearer {}", self.token)),
            ("Accept".to_string(), "application/vnd.github+json".to_string()),
        ];

        let response: PullResponse = self
            .client
            .post_json(&url, pr, &headers)
            .map_err(|e| Error::PullRequest(format!("{}: {}", pr.head, e)))?;
        info!("Opened {}", response.html_url);
        Ok(response.html_url)
    }
}
