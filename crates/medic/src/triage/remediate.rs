//! Remediation actions: commit a fix or open an issue.

use std::fmt::Write as _;

use tracing::{info, warn};

use super::types::Classification;
use crate::github::{GitHubError, NewIssue, PutFile, RepoRef, WorkflowHost};

/// Host rejected a remediation write.
#[derive(Debug, thiserror::Error)]
pub enum RemediationError {
    #[error("Failed to commit fix to {path}: {source}")]
    Commit {
        path: String,
        #[source]
        source: GitHubError,
    },

    #[error("Failed to create issue: {0}")]
    Issue(#[source] GitHubError),
}

/// Characters of log excerpt quoted in issue bodies.
const ISSUE_LOG_CHARS: usize = 1_000;

fn root_cause_or_unknown(classification: Option<&Classification>) -> &str {
    classification
        .map(|c| c.root_cause.as_str())
        .filter(|r| !r.is_empty())
        .unwrap_or("Unknown")
}

#[must_use]
pub fn commit_message(classification: Option<&Classification>) -> String {
    format!(
        "Fix workflow failure: {}",
        root_cause_or_unknown(classification)
    )
}

#[must_use]
pub fn issue_title(classification: Option<&Classification>) -> String {
    format!("Workflow Failure: {}", root_cause_or_unknown(classification))
}

/// Markdown body for a failure issue.
#[must_use]
pub fn issue_body(
    classification: Option<&Classification>,
    failed_run_id: Option<u64>,
    logs: Option<&str>,
) -> String {
    let mut body = String::from("## Workflow Failure Detected\n\n");

    let _ = writeln!(
        body,
        "**Root Cause:** {}\n",
        root_cause_or_unknown(classification)
    );
    if let Some(c) = classification.filter(|c| !c.error_message.is_empty()) {
        let _ = writeln!(body, "**Error Message:** {}\n", c.error_message);
    }
    if let Some(run_id) = failed_run_id {
        let _ = writeln!(body, "**Run ID:** {run_id}\n");
    }
    if let Some(logs) = logs.filter(|l| !l.is_empty()) {
        let snippet: String = logs.chars().take(ISSUE_LOG_CHARS).collect();
        let _ = writeln!(body, "### Log Snippet\n\n```\n{snippet}\n```\n");
    }

    let suggestion = classification
        .map(|c| c.fix_suggestion.as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("Manual review required");
    let _ = writeln!(body, "### Suggested Action\n\n{suggestion}\n");
    body.push_str("---\n*This issue was created automatically by Medic.*\n");

    body
}

/// Commit `content` to `path`, updating the file if it exists.
///
/// The current blob sha is read immediately before the write. The file is
/// created instead only when it is missing, including when it disappears
/// between the read and the update.
///
/// # Errors
///
/// Returns [`RemediationError::Commit`] carrying the host error of the write
/// (or read) that failed.
pub async fn commit_fix(
    host: &dyn WorkflowHost,
    repo: &RepoRef,
    path: &str,
    content: &str,
    message: &str,
) -> Result<String, RemediationError> {
    let commit_error = |source: GitHubError| RemediationError::Commit {
        path: path.to_string(),
        source,
    };

    if let Some(current) = host.get_file(repo, path).await.map_err(commit_error)? {
        let file = PutFile {
            path,
            message,
            content,
            sha: Some(&current.sha),
        };
        match host.put_file(repo, file).await {
            Ok(sha) => {
                info!(%repo, path, commit = %sha, "Committed workflow fix");
                return Ok(sha);
            }
            Err(e) if e.is_not_found() => {
                warn!(%repo, path, "Workflow file vanished before update, creating it");
            }
            Err(e) => return Err(commit_error(e)),
        }
    }

    let file = PutFile {
        path,
        message,
        content,
        sha: None,
    };
    let sha = host.put_file(repo, file).await.map_err(commit_error)?;
    info!(%repo, path, commit = %sha, "Created workflow file with fix");
    Ok(sha)
}

/// Open an issue, returning its URL.
///
/// # Errors
///
/// Returns [`RemediationError::Issue`] when the host rejects the request.
pub async fn create_issue(
    host: &dyn WorkflowHost,
    repo: &RepoRef,
    title: &str,
    body: &str,
    labels: &[String],
) -> Result<String, RemediationError> {
    let url = host
        .create_issue(repo, NewIssue {
            title,
            body,
            labels,
        })
        .await
        .map_err(RemediationError::Issue)?;
    info!(%repo, issue = %url, "Created workflow failure issue");
    Ok(url)
}
