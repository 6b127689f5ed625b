//! GitHub Actions host access.
//!
//! The triage pipeline only talks to GitHub through [`WorkflowHost`], so tests
//! can drive every branch with an in-memory fake while production uses the
//! REST-backed [`GitHubClient`].

pub mod client;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use client::GitHubClient;

/// Errors surfaced by the GitHub host.
#[derive(Debug, thiserror::Error)]
pub enum GitHubError {
    /// Transport-level failure (DNS, TLS, connection reset, ...).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// GitHub answered with a non-success status.
    #[error("GitHub API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Response body could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Client could not be built.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl GitHubError {
    /// HTTP status code, when the error came from an API response.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

pub type GitHubResult<T> = Result<T, GitHubError>;

/// Repository identity (`owner/name`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

/// Repository URL did not contain an owner and a name.
#[derive(Debug, thiserror::Error)]
#[error("Invalid GitHub repository URL: {0}")]
pub struct InvalidRepoUrl(pub String);

impl RepoRef {
    #[must_use]
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parse `https://github.com/<owner>/<name>[/...]`.
    ///
    /// The first two non-empty path segments are the owner and the name; a
    /// trailing `.git` on the name is dropped.
    pub fn from_url(repo_url: &str) -> Result<Self, InvalidRepoUrl> {
        let parsed =
            url::Url::parse(repo_url.trim()).map_err(|_| InvalidRepoUrl(repo_url.to_string()))?;
        let mut segments = parsed
            .path_segments()
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty());

        match (segments.next(), segments.next()) {
            (Some(owner), Some(name)) => {
                let name = name.strip_suffix(".git").unwrap_or(name);
                if name.is_empty() {
                    return Err(InvalidRepoUrl(repo_url.to_string()));
                }
                Ok(Self::new(owner, name))
            }
            _ => Err(InvalidRepoUrl(repo_url.to_string())),
        }
    }

    /// `owner/name`
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// A workflow run as returned by `/actions/runs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    /// queued, in_progress, completed, ...
    #[serde(default)]
    pub status: Option<String>,
    /// success, failure, cancelled, skipped, ... (only set once completed)
    #[serde(default)]
    pub conclusion: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Workflow definition path, e.g. `.github/workflows/ci.yml`.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
}

impl WorkflowRun {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status.as_deref() == Some("completed")
    }

    #[must_use]
    pub fn concluded(&self, conclusion: &str) -> bool {
        self.conclusion.as_deref() == Some(conclusion)
    }
}

/// A job within a workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowJob {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub conclusion: Option<String>,
}

/// Decoded file content from `/contents/{path}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub path: String,
    /// Blob sha, required to update the file in place.
    pub sha: String,
    pub content: String,
}

/// Directory listing entry from `/contents/{dir}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentEntry {
    pub name: String,
    pub path: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub sha: Option<String>,
}

/// Query for listing workflow runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunQuery {
    pub per_page: u32,
    /// Only runs created at or after this instant.
    pub created_since: Option<DateTime<Utc>>,
}

/// Create-or-update request for a repository file.
#[derive(Debug, Clone)]
pub struct PutFile<'a> {
    pub path: &'a str,
    pub message: &'a str,
    pub content: &'a str,
    /// Current blob sha; `None` creates the file.
    pub sha: Option<&'a str>,
}

/// New issue request.
#[derive(Debug, Clone)]
pub struct NewIssue<'a> {
    pub title: &'a str,
    pub body: &'a str,
    pub labels: &'a [String],
}

/// Operations the triage pipeline needs from the VCS host.
///
/// Credentials belong to the implementation instance, never to process state.
#[async_trait]
pub trait WorkflowHost: Send + Sync {
    /// Recent workflow runs, newest first as GitHub returns them.
    async fn list_workflow_runs(&self, repo: &RepoRef, query: RunQuery)
        -> GitHubResult<Vec<WorkflowRun>>;

    async fn list_run_jobs(&self, repo: &RepoRef, run_id: u64) -> GitHubResult<Vec<WorkflowJob>>;

    async fn get_workflow_run(&self, repo: &RepoRef, run_id: u64) -> GitHubResult<WorkflowRun>;

    /// Raw (plain text) logs for a job.
    async fn fetch_job_logs(&self, repo: &RepoRef, job_id: u64) -> GitHubResult<String>;

    /// File content on the default branch; `Ok(None)` if the file does not exist.
    async fn get_file(&self, repo: &RepoRef, path: &str) -> GitHubResult<Option<FileContent>>;

    async fn list_directory(&self, repo: &RepoRef, path: &str) -> GitHubResult<Vec<ContentEntry>>;

    /// Create or update a file, returning the resulting commit sha.
    async fn put_file(&self, repo: &RepoRef, file: PutFile<'_>) -> GitHubResult<String>;

    /// Create an issue, returning its `html_url`.
    async fn create_issue(&self, repo: &RepoRef, issue: NewIssue<'_>) -> GitHubResult<String>;
}
