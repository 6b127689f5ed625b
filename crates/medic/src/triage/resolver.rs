//! Locate the workflow definition behind a failed run.

use tracing::{debug, warn};

use crate::github::{GitHubResult, RepoRef, WorkflowHost};

/// Conventional workflow directory.
pub const WORKFLOWS_DIR: &str = ".github/workflows";

/// Resolved workflow file, or a diagnostic when none could be found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowSource {
    /// Empty when unresolved.
    pub path: String,
    /// File content, or a diagnostic message when unresolved.
    pub content: String,
}

impl WorkflowSource {
    fn not_found(diagnostic: impl Into<String>) -> Self {
        Self {
            path: String::new(),
            content: diagnostic.into(),
        }
    }

    #[must_use]
    pub fn is_found(&self) -> bool {
        !self.path.is_empty()
    }
}

fn is_workflow_file(name: &str) -> bool {
    name.ends_with(".yml") || name.ends_with(".yaml")
}

/// Resolve the workflow file for `run_id`.
///
/// Prefers the path recorded on the run. If that is missing or unreadable,
/// uses the first YAML file under [`WORKFLOWS_DIR`].
pub async fn resolve_workflow_source(
    host: &dyn WorkflowHost,
    repo: &RepoRef,
    run_id: u64,
) -> WorkflowSource {
    match from_run_path(host, repo, run_id).await {
        Ok(Some(source)) => return source,
        Ok(None) => debug!(run_id, "Run carries no readable workflow path"),
        Err(e) => warn!(run_id, error = %e, "Failed to read workflow from run path"),
    }

    match first_workflow_file(host, repo).await {
        Ok(Some(source)) => source,
        Ok(None) => WorkflowSource::not_found("No workflow files found"),
        Err(e) => WorkflowSource::not_found(format!("Error finding workflow files: {e}")),
    }
}

async fn from_run_path(
    host: &dyn WorkflowHost,
    repo: &RepoRef,
    run_id: u64,
) -> GitHubResult<Option<WorkflowSource>> {
    let run = host.get_workflow_run(repo, run_id).await?;
    // Reusable workflow paths carry a ref suffix: `.github/workflows/ci.yml@refs/heads/main`
    let Some(path) = run
        .path
        .as_deref()
        .and_then(|p| p.split('@').next())
        .filter(|p| !p.is_empty())
    else {
        return Ok(None);
    };

    Ok(host
        .get_file(repo, path)
        .await?
        .filter(|file| !file.content.is_empty())
        .map(|file| WorkflowSource {
            path: file.path,
            content: file.content,
        }))
}

async fn first_workflow_file(
    host: &dyn WorkflowHost,
    repo: &RepoRef,
) -> GitHubResult<Option<WorkflowSource>> {
    let entries = host.list_directory(repo, WORKFLOWS_DIR).await?;
    let Some(entry) = entries
        .into_iter()
        .find(|e| e.kind != "dir" && is_workflow_file(&e.name))
    else {
        return Ok(None);
    };

    Ok(host.get_file(repo, &entry.path).await?.map(|file| WorkflowSource {
        path: file.path,
        content: file.content,
    }))
}
