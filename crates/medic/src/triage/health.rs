//! Workflow health check.
//!
//! Decides whether a repository's CI is currently failing and, if so, which
//! run (and job) to triage.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::github::{GitHubResult, RepoRef, RunQuery, WorkflowHost, WorkflowRun};

/// Run selection parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    /// How far back the recent-run listing reaches.
    pub recent_window: Duration,
    pub recent_per_page: u32,
    pub fallback_per_page: u32,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            recent_window: Duration::minutes(120),
            recent_per_page: 10,
            fallback_per_page: 5,
        }
    }
}

/// Verdict of the health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthOutcome {
    Success,
    Failure { run_id: u64, job_id: Option<u64> },
}

/// Most recent completed run that concluded `success` or `failure`.
///
/// Other conclusions (cancelled, skipped, ...) and unfinished runs are not
/// decisive and are passed over.
#[must_use]
pub fn select_decisive_run(runs: &[WorkflowRun]) -> Option<&WorkflowRun> {
    let mut completed: Vec<&WorkflowRun> = runs.iter().filter(|r| r.is_completed()).collect();
    completed.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    completed
        .into_iter()
        .find(|r| r.concluded("failure") || r.concluded("success"))
}

fn most_recent_completed(runs: &[WorkflowRun]) -> Option<&WorkflowRun> {
    runs.iter()
        .filter(|r| r.is_completed())
        .max_by_key(|r| r.created_at)
}

/// Inspect recent runs of `repo`.
///
/// Looks at runs created within the policy window first; if none of them is
/// decisive, falls back to the single most recent completed run regardless
/// of age. No runs at all counts as healthy.
///
/// # Errors
///
/// Returns the host error when listing runs fails.
pub async fn check_workflow_health(
    host: &dyn WorkflowHost,
    repo: &RepoRef,
    policy: &HealthPolicy,
    now: DateTime<Utc>,
) -> GitHubResult<HealthOutcome> {
    let recent = host
        .list_workflow_runs(
            repo,
            RunQuery {
                per_page: policy.recent_per_page,
                created_since: Some(now - policy.recent_window),
            },
        )
        .await?;

    let decisive = match select_decisive_run(&recent) {
        Some(run) => Some(run.clone()),
        None => {
            debug!("No decisive recent run, checking latest completed run");
            let latest = host
                .list_workflow_runs(
                    repo,
                    RunQuery {
                        per_page: policy.fallback_per_page,
                        created_since: None,
                    },
                )
                .await?;
            most_recent_completed(&latest).cloned()
        }
    };

    match decisive {
        Some(run) if run.concluded("failure") => {
            let job_id = first_failed_job(host, repo, run.id).await;
            Ok(HealthOutcome::Failure {
                run_id: run.id,
                job_id,
            })
        }
        _ => Ok(HealthOutcome::Success),
    }
}

/// Best-effort lookup of the first failed job in a run.
async fn first_failed_job(host: &dyn WorkflowHost, repo: &RepoRef, run_id: u64) -> Option<u64> {
    match host.list_run_jobs(repo, run_id).await {
        Ok(jobs) => jobs
            .into_iter()
            .find(|job| job.conclusion.as_deref() == Some("failure"))
            .map(|job| job.id),
        Err(e) => {
            warn!(run_id, error = %e, "Failed to list jobs for failed run");
            None
        }
    }
}
