//! In-memory host and generator fakes for triage tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use super::resolver::WORKFLOWS_DIR;
use crate::github::{
    ContentEntry, FileContent, GitHubError, GitHubResult, NewIssue, PutFile, RepoRef, RunQuery,
    WorkflowHost, WorkflowJob, WorkflowRun,
};
use crate::llm::{ChatMessage, ChatRole, LlmError, LlmResult, TextGenerator};

pub fn run(id: u64, status: &str, conclusion: Option<&str>, created_at: &str) -> WorkflowRun {
    WorkflowRun {
        id,
        name: Some("CI".to_string()),
        status: Some(status.to_string()),
        conclusion: conclusion.map(str::to_string),
        created_at: created_at.parse().expect("timestamp"),
        path: None,
        html_url: None,
    }
}

pub fn job(id: u64, conclusion: Option<&str>) -> WorkflowJob {
    WorkflowJob {
        id,
        name: Some(format!("job-{id}")),
        status: Some("completed".to_string()),
        conclusion: conclusion.map(str::to_string),
    }
}

pub fn entry(name: &str, kind: &str) -> ContentEntry {
    ContentEntry {
        name: name.to_string(),
        path: format!("{WORKFLOWS_DIR}/{name}"),
        kind: kind.to_string(),
        sha: None,
    }
}

#[derive(Debug, Clone)]
pub struct RecordedCommit {
    pub path: String,
    pub message: String,
    pub content: String,
    pub sha: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RecordedIssue {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

/// Scriptable [`WorkflowHost`].
///
/// Runs listed with a `created_since` bound come from `recent_runs`, the
/// unbounded listing from `all_runs`.
#[derive(Default)]
pub struct FakeHost {
    pub recent_runs: Vec<WorkflowRun>,
    pub all_runs: Vec<WorkflowRun>,
    pub runs_error: Option<u16>,
    pub jobs: Vec<WorkflowJob>,
    pub jobs_error: bool,
    pub run_path: Option<String>,
    pub directory: Vec<ContentEntry>,
    pub logs: String,
    pub logs_status: Option<u16>,
    pub logs_broken: bool,
    pub reject_put: bool,
    /// Status returned for updates (puts carrying a sha); creates still succeed.
    pub reject_update: Option<u16>,
    pub reject_issue: bool,
    pub files: Mutex<HashMap<String, FileContent>>,
    pub run_queries: Mutex<Vec<RunQuery>>,
    pub put_attempts: Mutex<usize>,
    pub commits: Mutex<Vec<RecordedCommit>>,
    pub issues: Mutex<Vec<RecordedIssue>>,
    pub log_fetches: Mutex<Vec<u64>>,
}

impl FakeHost {
    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.files.lock().unwrap().insert(
            path.to_string(),
            FileContent {
                path: path.to_string(),
                sha: format!("blob-{}", path.len()),
                content: content.to_string(),
            },
        );
        self
    }

    pub fn put_attempts(&self) -> usize {
        *self.put_attempts.lock().unwrap()
    }

    pub fn run_queries(&self) -> Vec<RunQuery> {
        self.run_queries.lock().unwrap().clone()
    }

    pub fn commits(&self) -> Vec<RecordedCommit> {
        self.commits.lock().unwrap().clone()
    }

    pub fn issues(&self) -> Vec<RecordedIssue> {
        self.issues.lock().unwrap().clone()
    }

    pub fn log_fetches(&self) -> Vec<u64> {
        self.log_fetches.lock().unwrap().clone()
    }
}

fn api_error(status: u16, message: &str) -> GitHubError {
    GitHubError::Api {
        status,
        message: message.to_string(),
    }
}

#[async_trait]
impl WorkflowHost for FakeHost {
    async fn list_workflow_runs(
        &self,
        _repo: &RepoRef,
        query: RunQuery,
    ) -> GitHubResult<Vec<WorkflowRun>> {
        self.run_queries.lock().unwrap().push(query);
        if let Some(status) = self.runs_error {
            return Err(api_error(status, "Bad credentials"));
        }
        Ok(if query.created_since.is_some() {
            self.recent_runs.clone()
        } else {
            self.all_runs.clone()
        })
    }

    async fn list_run_jobs(&self, _repo: &RepoRef, _run_id: u64) -> GitHubResult<Vec<WorkflowJob>> {
        if self.jobs_error {
            return Err(api_error(500, "Server Error"));
        }
        Ok(self.jobs.clone())
    }

    async fn get_workflow_run(&self, _repo: &RepoRef, run_id: u64) -> GitHubResult<WorkflowRun> {
        let mut found = run(run_id, "completed", Some("failure"), "2026-03-01T11:00:00Z");
        found.path.clone_from(&self.run_path);
        Ok(found)
    }

    async fn fetch_job_logs(&self, _repo: &RepoRef, job_id: u64) -> GitHubResult<String> {
        self.log_fetches.lock().unwrap().push(job_id);
        if let Some(status) = self.logs_status {
            return Err(api_error(status, "Forbidden"));
        }
        if self.logs_broken {
            return Err(GitHubError::Decode("connection reset".to_string()));
        }
        Ok(self.logs.clone())
    }

    async fn get_file(&self, _repo: &RepoRef, path: &str) -> GitHubResult<Option<FileContent>> {
        Ok(self.files.lock().unwrap().get(path).cloned())
    }

    async fn list_directory(&self, _repo: &RepoRef, _path: &str) -> GitHubResult<Vec<ContentEntry>> {
        Ok(self.directory.clone())
    }

    async fn put_file(&self, _repo: &RepoRef, file: PutFile<'_>) -> GitHubResult<String> {
        *self.put_attempts.lock().unwrap() += 1;
        if self.reject_put {
            return Err(api_error(409, "sha does not match"));
        }
        if let (Some(status), Some(_)) = (self.reject_update, file.sha) {
            return Err(api_error(status, "update rejected"));
        }
        let mut commits = self.commits.lock().unwrap();
        commits.push(RecordedCommit {
            path: file.path.to_string(),
            message: file.message.to_string(),
            content: file.content.to_string(),
            sha: file.sha.map(str::to_string),
        });
        Ok(format!("commit-{}", commits.len()))
    }

    async fn create_issue(&self, repo: &RepoRef, issue: NewIssue<'_>) -> GitHubResult<String> {
        if self.reject_issue {
            return Err(api_error(410, "Issues are disabled for this repo"));
        }
        let mut issues = self.issues.lock().unwrap();
        issues.push(RecordedIssue {
            title: issue.title.to_string(),
            body: issue.body.to_string(),
            labels: issue.labels.to_vec(),
        });
        Ok(format!(
            "https://github.com/{}/{}/issues/{}",
            repo.owner,
            repo.name,
            issues.len()
        ))
    }
}

/// [`TextGenerator`] replaying canned responses in order.
pub struct ScriptedGenerator {
    responses: Mutex<VecDeque<LlmResult<String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(responses: Vec<LlmResult<String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    /// User message of each call.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, messages: &[ChatMessage]) -> LlmResult<String> {
        let prompt = messages
            .iter()
            .filter(|m| m.role == ChatRole::User)
            .map(|m| m.content.clone())
            .collect::<Vec<_>>()
            .join("\n");
        self.prompts.lock().unwrap().push(prompt);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(LlmError::EmptyResponse))
    }
}
