//! Triage state machine.

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use super::classifier::{FailureClassifier, LOG_FETCH_ERROR, LOG_FETCH_FAILED};
use super::health::{check_workflow_health, HealthOutcome, HealthPolicy};
use super::logs::{filter_log_window, DEFAULT_LOG_BUDGET};
use super::remediate::{commit_fix, commit_message, create_issue, issue_body, issue_title};
use super::resolver::resolve_workflow_source;
use super::synthesizer::FixSynthesizer;
use super::types::{HealthStatus, RunContext, TriageRecord};
use super::TriageError;
use crate::github::{GitHubError, RepoRef, WorkflowHost};
use crate::llm::TextGenerator;

/// Upper bound on transitions; the graph is acyclic so this is never reached
/// by a correct machine.
const MAX_TRANSITIONS: usize = 16;

/// States of a triage run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriageState {
    HealthCheck,
    FetchLogs,
    Classify,
    ResolveSource,
    SynthesizeFix,
    CommitFix,
    CreateIssue,
    MarkSuccess,
    Done,
}

/// Tunables for one run.
#[derive(Debug, Clone)]
pub struct TriageOptions {
    pub log_budget_chars: usize,
    pub health: HealthPolicy,
    /// Open an issue when a fixable failure yields no usable fix.
    pub issue_on_unusable_fix: bool,
    pub issue_labels: Vec<String>,
}

impl Default for TriageOptions {
    fn default() -> Self {
        Self {
            log_budget_chars: DEFAULT_LOG_BUDGET,
            health: HealthPolicy::default(),
            issue_on_unusable_fix: true,
            issue_labels: Vec::new(),
        }
    }
}

/// After the health check: triage a failure, confirm success, or stop.
#[must_use]
pub fn after_health_check(ctx: &RunContext) -> TriageState {
    if ctx.failed_run_id().is_some() {
        TriageState::FetchLogs
    } else if ctx.health() == HealthStatus::Success {
        TriageState::MarkSuccess
    } else {
        TriageState::Done
    }
}

#[must_use]
pub fn after_classify(ctx: &RunContext) -> TriageState {
    if ctx.is_flagged_fixable() {
        TriageState::ResolveSource
    } else {
        TriageState::CreateIssue
    }
}

#[must_use]
pub fn after_resolve(ctx: &RunContext, options: &TriageOptions) -> TriageState {
    if ctx.has_workflow_source() {
        TriageState::SynthesizeFix
    } else {
        unusable_fix(options)
    }
}

#[must_use]
pub fn after_synthesize(ctx: &RunContext, options: &TriageOptions) -> TriageState {
    if ctx.has_workflow_source() && ctx.has_proposed_fix() {
        TriageState::CommitFix
    } else {
        unusable_fix(options)
    }
}

fn unusable_fix(options: &TriageOptions) -> TriageState {
    if options.issue_on_unusable_fix {
        TriageState::CreateIssue
    } else {
        TriageState::Done
    }
}

/// Drives one repository through the triage graph.
pub struct TriageMachine<'a> {
    host: &'a dyn WorkflowHost,
    generator: &'a dyn TextGenerator,
    options: &'a TriageOptions,
}

impl<'a> TriageMachine<'a> {
    #[must_use]
    pub fn new(
        host: &'a dyn WorkflowHost,
        generator: &'a dyn TextGenerator,
        options: &'a TriageOptions,
    ) -> Self {
        Self {
            host,
            generator,
            options,
        }
    }

    /// Run triage for `repo` to a terminal record. Never fails: anything
    /// that aborts the run becomes an `error` record.
    #[instrument(skip(self), fields(repo = %repo))]
    pub async fn run(&self, repo: RepoRef) -> TriageRecord {
        let mut ctx = RunContext::new(repo);
        match self.drive(&mut ctx).await {
            Ok(()) => {
                let record = ctx.into_record();
                info!(
                    status = record.status.as_str(),
                    failed_run_id = ?record.failed_run_id,
                    fix_applied = record.fix_applied,
                    "Triage finished"
                );
                record
            }
            Err(e) => {
                error!(error = %e, "Triage aborted");
                TriageRecord::error(e.to_string())
            }
        }
    }

    async fn drive(&self, ctx: &mut RunContext) -> Result<(), TriageError> {
        let mut state = TriageState::HealthCheck;
        for _ in 0..MAX_TRANSITIONS {
            if state == TriageState::Done {
                return Ok(());
            }
            let next = self.step(state, ctx).await?;
            debug!(from = ?state, to = ?next, "Transition");
            state = next;
        }
        Err(TriageError::Invariant("transition limit exceeded"))
    }

    async fn step(&self, state: TriageState, ctx: &mut RunContext) -> Result<TriageState, TriageError> {
        match state {
            TriageState::HealthCheck => {
                self.health_check(ctx).await?;
                Ok(after_health_check(ctx))
            }
            TriageState::FetchLogs => {
                self.fetch_logs(ctx).await?;
                Ok(TriageState::Classify)
            }
            TriageState::Classify => {
                self.classify(ctx).await?;
                Ok(after_classify(ctx))
            }
            TriageState::ResolveSource => {
                self.resolve_source(ctx).await?;
                Ok(after_resolve(ctx, self.options))
            }
            TriageState::SynthesizeFix => {
                self.synthesize_fix(ctx).await;
                Ok(after_synthesize(ctx, self.options))
            }
            TriageState::CommitFix => {
                self.commit_fix(ctx).await?;
                Ok(TriageState::Done)
            }
            TriageState::CreateIssue => {
                self.create_issue(ctx).await?;
                Ok(TriageState::Done)
            }
            TriageState::MarkSuccess => {
                ctx.mark_success();
                Ok(TriageState::Done)
            }
            TriageState::Done => Ok(TriageState::Done),
        }
    }

    async fn health_check(&self, ctx: &mut RunContext) -> Result<(), TriageError> {
        let outcome =
            check_workflow_health(self.host, ctx.repo(), &self.options.health, Utc::now()).await;

        match outcome {
            Ok(HealthOutcome::Failure { run_id, job_id }) => {
                info!(run_id, job_id = ?job_id, "Failed workflow run detected");
                ctx.record_failed_run(run_id, job_id)?;
                ctx.set_health(HealthStatus::Failure)
            }
            Ok(HealthOutcome::Success) => ctx.set_health(HealthStatus::Success),
            Err(e) => {
                warn!(error = %e, "Health check failed");
                ctx.set_health(HealthStatus::Error)?;
                ctx.record_error(e.to_string());
                Ok(())
            }
        }
    }

    async fn fetch_logs(&self, ctx: &mut RunContext) -> Result<(), TriageError> {
        let Some(job_id) = ctx.failed_job_id() else {
            debug!("No failed job recorded, skipping log fetch");
            return Ok(());
        };

        let full = match self.host.fetch_job_logs(ctx.repo(), job_id).await {
            Ok(text) => text,
            Err(GitHubError::Api { status, .. }) => {
                warn!(job_id, status, "Log download refused");
                format!("{LOG_FETCH_FAILED}. Status: {status}")
            }
            Err(e) => {
                warn!(job_id, error = %e, "Log download failed");
                format!("{LOG_FETCH_ERROR}: {e}")
            }
        };

        ctx.record_logs(filter_log_window(&full, self.options.log_budget_chars))
    }

    async fn classify(&self, ctx: &mut RunContext) -> Result<(), TriageError> {
        let Some(logs) = ctx.raw_logs() else {
            debug!("No logs to classify");
            return Ok(());
        };

        let classification = FailureClassifier::new(self.generator).classify(logs).await;
        info!(
            root_cause = %classification.root_cause,
            is_fixable = classification.is_fixable,
            "Failure classified"
        );
        ctx.record_classification(classification)
    }

    async fn resolve_source(&self, ctx: &mut RunContext) -> Result<(), TriageError> {
        let Some(run_id) = ctx.failed_run_id() else {
            return Ok(());
        };

        let source = resolve_workflow_source(self.host, ctx.repo(), run_id).await;
        if source.is_found() && !source.content.is_empty() {
            ctx.record_workflow_source(source.path, source.content)
        } else {
            warn!(diagnostic = %source.content, "Workflow source unresolved");
            Ok(())
        }
    }

    async fn synthesize_fix(&self, ctx: &mut RunContext) {
        let (Some(original), Some(classification)) = (ctx.workflow_content(), ctx.classification())
        else {
            return;
        };

        let synthesized = FixSynthesizer::new(self.generator)
            .synthesize(original, &classification.fix_suggestion)
            .await;
        match synthesized {
            Ok(fix) => ctx.record_proposed_fix(fix),
            Err(e) => warn!(error = %e, "Fix synthesis produced no usable fix"),
        }
    }

    async fn commit_fix(&self, ctx: &mut RunContext) -> Result<(), TriageError> {
        let (Some(path), Some(fix)) = (ctx.workflow_path(), ctx.proposed_fix()) else {
            debug!("No fix to commit");
            return Ok(());
        };

        let message = commit_message(ctx.classification());
        let sha = commit_fix(self.host, ctx.repo(), path, fix, &message).await?;
        ctx.record_commit(sha)
    }

    async fn create_issue(&self, ctx: &mut RunContext) -> Result<(), TriageError> {
        let title = issue_title(ctx.classification());
        let body = issue_body(ctx.classification(), ctx.failed_run_id(), ctx.raw_logs());

        let created = create_issue(
            self.host,
            ctx.repo(),
            &title,
            &body,
            &self.options.issue_labels,
        )
        .await;
        match created {
            Ok(url) => ctx.record_issue(url),
            Err(e) => {
                warn!(error = %e, "Issue creation failed");
                ctx.fail(e.to_string());
                Ok(())
            }
        }
    }
}
