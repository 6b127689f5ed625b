//! REST client for the GitHub Actions, contents and issues APIs.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{
    ContentEntry, FileContent, GitHubError, GitHubResult, NewIssue, PutFile, RepoRef, RunQuery,
    WorkflowHost, WorkflowJob, WorkflowRun,
};

/// Public GitHub API endpoint.
pub const GITHUB_API_URL: &str = "https://api.github.com";

/// GitHub REST client bound to a single access token.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct RunsPage {
    #[serde(default)]
    workflow_runs: Vec<WorkflowRun>,
}

#[derive(Debug, Deserialize)]
struct JobsPage {
    #[serde(default)]
    jobs: Vec<WorkflowJob>,
}

#[derive(Debug, Deserialize)]
struct ContentsFile {
    path: String,
    sha: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Serialize)]
struct PutFileRequest<'a> {
    message: &'a str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CommitRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PutFileResponse {
    commit: CommitRef,
}

#[derive(Debug, Serialize)]
struct CreateIssueRequest<'a> {
    title: &'a str,
    body: &'a str,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    labels: &'a [String],
}

#[derive(Debug, Deserialize)]
struct IssueResponse {
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

impl GitHubClient {
    /// Create a client against the public API.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(token: &str) -> GitHubResult<Self> {
        Self::with_base_url(GITHUB_API_URL, token)
    }

    /// Create a client against a custom API root (GitHub Enterprise, test servers).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_base_url(base_url: &str, token: &str) -> GitHubResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("medic/", env!("CARGO_PKG_VERSION"))),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| GitHubError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn repo_url(&self, repo: &RepoRef, tail: &str) -> String {
        format!(
            "{}/repos/{}/{}/{tail}",
            self.base_url,
            urlencoding::encode(&repo.owner),
            urlencoding::encode(&repo.name)
        )
    }

    fn contents_url(&self, repo: &RepoRef, path: &str) -> String {
        let encoded = path
            .trim_matches('/')
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        self.repo_url(repo, &format!("contents/{encoded}"))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        if self.token.is_empty() {
            request
        } else {
            request.header(AUTHORIZATION, format!("Bearer {}", self.token))
        }
    }

    /// Send a request and fail on non-success statuses.
    async fn send(&self, request: RequestBuilder) -> GitHubResult<Response> {
        let response = self.authorized(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|e| e.message)
            .unwrap_or(body);
        Err(GitHubError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> GitHubResult<T> {
        let response = self.send(request).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| GitHubError::Decode(e.to_string()))
    }
}

/// Decode GitHub's base64 payload (wrapped at 60 columns).
fn decode_content(encoded: &str) -> GitHubResult<String> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = BASE64
        .decode(compact)
        .map_err(|e| GitHubError::Decode(format!("invalid base64 content: {e}")))?;
    String::from_utf8(bytes).map_err(|e| GitHubError::Decode(format!("content is not UTF-8: {e}")))
}

#[async_trait]
impl WorkflowHost for GitHubClient {
    #[instrument(skip(self), fields(repo = %repo))]
    async fn list_workflow_runs(
        &self,
        repo: &RepoRef,
        query: RunQuery,
    ) -> GitHubResult<Vec<WorkflowRun>> {
        let mut params = vec![("per_page", query.per_page.to_string())];
        if let Some(since) = query.created_since {
            params.push(("created", format!(">={}", since.format("%Y-%m-%dT%H:%M:%SZ"))));
        }

        let request = self
            .client
            .get(self.repo_url(repo, "actions/runs"))
            .query(&params);
        let page: RunsPage = self.send_json(request).await?;
        debug!(count = page.workflow_runs.len(), "Listed workflow runs");
        Ok(page.workflow_runs)
    }

    #[instrument(skip(self), fields(repo = %repo))]
    async fn list_run_jobs(&self, repo: &RepoRef, run_id: u64) -> GitHubResult<Vec<WorkflowJob>> {
        let request = self
            .client
            .get(self.repo_url(repo, &format!("actions/runs/{run_id}/jobs")));
        let page: JobsPage = self.send_json(request).await?;
        Ok(page.jobs)
    }

    #[instrument(skip(self), fields(repo = %repo))]
    async fn get_workflow_run(&self, repo: &RepoRef, run_id: u64) -> GitHubResult<WorkflowRun> {
        let request = self
            .client
            .get(self.repo_url(repo, &format!("actions/runs/{run_id}")));
        self.send_json(request).await
    }

    #[instrument(skip(self), fields(repo = %repo))]
    async fn fetch_job_logs(&self, repo: &RepoRef, job_id: u64) -> GitHubResult<String> {
        // GitHub answers with a redirect to blob storage; reqwest follows it and
        // drops the Authorization header on the cross-origin hop.
        let request = self
            .client
            .get(self.repo_url(repo, &format!("actions/jobs/{job_id}/logs")));
        let response = self.send(request).await?;
        Ok(response.text().await?)
    }

    #[instrument(skip(self), fields(repo = %repo))]
    async fn get_file(&self, repo: &RepoRef, path: &str) -> GitHubResult<Option<FileContent>> {
        let request = self.client.get(self.contents_url(repo, path));
        let file: ContentsFile = match self.send_json(request).await {
            Ok(file) => file,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        let content = match (file.content.as_deref(), file.encoding.as_deref()) {
            (Some(encoded), Some("base64") | None) => decode_content(encoded)?,
            (Some(_), Some(other)) => {
                return Err(GitHubError::Decode(format!(
                    "unsupported content encoding: {other}"
                )))
            }
            (None, _) => String::new(),
        };

        Ok(Some(FileContent {
            path: file.path,
            sha: file.sha,
            content,
        }))
    }

    #[instrument(skip(self), fields(repo = %repo))]
    async fn list_directory(&self, repo: &RepoRef, path: &str) -> GitHubResult<Vec<ContentEntry>> {
        let request = self.client.get(self.contents_url(repo, path));
        self.send_json(request).await
    }

    #[instrument(skip(self, file), fields(repo = %repo, path = %file.path))]
    async fn put_file(&self, repo: &RepoRef, file: PutFile<'_>) -> GitHubResult<String> {
        let body = PutFileRequest {
            message: file.message,
            content: BASE64.encode(file.content.as_bytes()),
            sha: file.sha,
        };
        let request = self
            .client
            .put(self.contents_url(repo, file.path))
            .json(&body);
        let response: PutFileResponse = self.send_json(request).await?;
        Ok(response.commit.sha)
    }

    #[instrument(skip(self, issue), fields(repo = %repo))]
    async fn create_issue(&self, repo: &RepoRef, issue: NewIssue<'_>) -> GitHubResult<String> {
        let body = CreateIssueRequest {
            title: issue.title,
            body: issue.body,
            labels: issue.labels,
        };
        let request = self.client.post(self.repo_url(repo, "issues")).json(&body);
        let response: IssueResponse = self.send_json(request).await?;
        Ok(response.html_url)
    }
}
