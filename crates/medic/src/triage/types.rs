//! Core types for a single triage run.
//!
//! This module defines:
//! - The classification verdict produced from failure logs
//! - The per-run [`RunContext`] and the invariants its setters enforce
//! - The [`TriageRecord`] terminal projection handed to persistence

use serde::{Deserialize, Deserializer, Serialize};

use super::TriageError;
use crate::github::RepoRef;

/// Characters of raw logs carried into the terminal record.
pub const LOGS_SNIPPET_CHARS: usize = 500;

/// Workflow health as observed by the health check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Unknown,
    Success,
    Failure,
    Error,
}

/// Authoritative outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalStatus {
    Success,
    Failure,
    Error,
}

impl TerminalStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Error => "error",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Structured verdict about a failure.
///
/// `is_fixable` is advisory; the state machine only acts on it when the
/// workflow source was resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    #[serde(default)]
    pub root_cause: String,
    #[serde(default)]
    pub error_message: String,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_fixable: bool,
    #[serde(default)]
    pub fix_suggestion: String,
}

impl Classification {
    /// Verdict used when log retrieval itself failed.
    #[must_use]
    pub fn logs_unavailable(excerpt: &str) -> Self {
        Self {
            root_cause: "Logs unavailable - authentication or API issue".to_string(),
            error_message: excerpt.to_string(),
            is_fixable: false,
            fix_suggestion: "Check GitHub token permissions and repository access".to_string(),
        }
    }

    /// Conservative verdict when the classifier output is unusable.
    #[must_use]
    pub fn classification_failed(detail: impl Into<String>) -> Self {
        Self {
            root_cause: "Classification failed".to_string(),
            error_message: detail.into(),
            is_fixable: false,
            fix_suggestion: "Manual review required".to_string(),
        }
    }

    /// Fixed record attached to runs that found nothing wrong.
    #[must_use]
    pub fn no_failures() -> Self {
        Self {
            root_cause: "No workflow failures detected".to_string(),
            error_message: String::new(),
            is_fixable: false,
            fix_suggestion: "All workflows are running successfully".to_string(),
        }
    }
}

/// Models sometimes answer `"is_fixable": "true"`.
fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
        Null(()),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Text(s) => s.trim().eq_ignore_ascii_case("true"),
        Flag::Null(()) => false,
    })
}

/// Mutable state owned by one triage execution.
///
/// Created fresh per invocation and consumed into a [`TriageRecord`].
#[derive(Debug)]
pub struct RunContext {
    repo: RepoRef,
    failed_run_id: Option<u64>,
    failed_job_id: Option<u64>,
    raw_logs: Option<String>,
    classification: Option<Classification>,
    workflow_path: Option<String>,
    workflow_content: Option<String>,
    proposed_fix: Option<String>,
    commit_sha: Option<String>,
    issue_url: Option<String>,
    error_message: Option<String>,
    health: HealthStatus,
    terminal: Option<TerminalStatus>,
}

impl RunContext {
    #[must_use]
    pub fn new(repo: RepoRef) -> Self {
        Self {
            repo,
            failed_run_id: None,
            failed_job_id: None,
            raw_logs: None,
            classification: None,
            workflow_path: None,
            workflow_content: None,
            proposed_fix: None,
            commit_sha: None,
            issue_url: None,
            error_message: None,
            health: HealthStatus::Unknown,
            terminal: None,
        }
    }

    pub fn repo(&self) -> &RepoRef {
        &self.repo
    }

    pub fn failed_run_id(&self) -> Option<u64> {
        self.failed_run_id
    }

    pub fn failed_job_id(&self) -> Option<u64> {
        self.failed_job_id
    }

    pub fn raw_logs(&self) -> Option<&str> {
        self.raw_logs.as_deref()
    }

    pub fn classification(&self) -> Option<&Classification> {
        self.classification.as_ref()
    }

    pub fn workflow_path(&self) -> Option<&str> {
        self.workflow_path.as_deref()
    }

    pub fn workflow_content(&self) -> Option<&str> {
        self.workflow_content.as_deref()
    }

    pub fn proposed_fix(&self) -> Option<&str> {
        self.proposed_fix.as_deref()
    }

    pub fn commit_sha(&self) -> Option<&str> {
        self.commit_sha.as_deref()
    }

    pub fn issue_url(&self) -> Option<&str> {
        self.issue_url.as_deref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn health(&self) -> HealthStatus {
        self.health
    }

    pub fn terminal(&self) -> Option<TerminalStatus> {
        self.terminal
    }

    /// Classifier says fixable.
    pub fn is_flagged_fixable(&self) -> bool {
        self.classification.as_ref().is_some_and(|c| c.is_fixable)
    }

    /// Both halves of the workflow source are present and non-empty.
    pub fn has_workflow_source(&self) -> bool {
        self.workflow_path.as_deref().is_some_and(|p| !p.is_empty())
            && self.workflow_content.as_deref().is_some_and(|c| !c.is_empty())
    }

    pub fn has_proposed_fix(&self) -> bool {
        self.proposed_fix.as_deref().is_some_and(|f| !f.trim().is_empty())
    }

    /// Record the health verdict. Only the first verdict sticks.
    pub fn set_health(&mut self, status: HealthStatus) -> Result<(), TriageError> {
        if self.health != HealthStatus::Unknown {
            return Err(TriageError::Invariant("health status already set"));
        }
        self.health = status;
        Ok(())
    }

    pub fn record_failed_run(&mut self, run_id: u64, job_id: Option<u64>) -> Result<(), TriageError> {
        if self.failed_run_id.is_some() {
            return Err(TriageError::Invariant("failed run already recorded"));
        }
        self.failed_run_id = Some(run_id);
        self.failed_job_id = job_id;
        Ok(())
    }

    pub fn record_logs(&mut self, logs: String) -> Result<(), TriageError> {
        if self.failed_job_id.is_none() {
            return Err(TriageError::Invariant("logs recorded without a failed job"));
        }
        if self.raw_logs.is_some() {
            return Err(TriageError::Invariant("logs already recorded"));
        }
        self.raw_logs = Some(logs);
        Ok(())
    }

    pub fn record_classification(&mut self, classification: Classification) -> Result<(), TriageError> {
        if self.classification.is_some() {
            return Err(TriageError::Invariant("classification already recorded"));
        }
        self.classification = Some(classification);
        Ok(())
    }

    pub fn record_workflow_source(&mut self, path: String, content: String) -> Result<(), TriageError> {
        if self.workflow_path.is_some() {
            return Err(TriageError::Invariant("workflow source already recorded"));
        }
        self.workflow_path = Some(path);
        self.workflow_content = Some(content);
        Ok(())
    }

    pub fn record_proposed_fix(&mut self, fix: String) {
        self.proposed_fix = Some(fix);
    }

    pub fn record_commit(&mut self, sha: String) -> Result<(), TriageError> {
        if self.issue_url.is_some() {
            return Err(TriageError::Invariant("commit recorded after issue"));
        }
        if self.commit_sha.is_some() {
            return Err(TriageError::Invariant("commit already recorded"));
        }
        self.commit_sha = Some(sha);
        Ok(())
    }

    pub fn record_issue(&mut self, url: String) -> Result<(), TriageError> {
        if self.commit_sha.is_some() {
            return Err(TriageError::Invariant("issue recorded after commit"));
        }
        if self.issue_url.is_some() {
            return Err(TriageError::Invariant("issue already recorded"));
        }
        self.issue_url = Some(url);
        Ok(())
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.error_message = Some(message.into());
    }

    /// Terminate as error with `message`.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.record_error(message);
        self.terminal = Some(TerminalStatus::Error);
    }

    /// No failure found: success, with the fixed classification so consumers
    /// always see one.
    pub fn mark_success(&mut self) {
        self.health = HealthStatus::Success;
        self.terminal = Some(TerminalStatus::Success);
        self.classification = Some(Classification::no_failures());
    }

    /// Derive the terminal status if no step set it.
    pub fn finalize(&mut self) -> TerminalStatus {
        if let Some(status) = self.terminal {
            return status;
        }

        let status = if self.health == HealthStatus::Success {
            TerminalStatus::Success
        } else if self.failed_run_id.is_some() {
            TerminalStatus::Failure
        } else if self.error_message.is_some() {
            TerminalStatus::Error
        } else {
            TerminalStatus::Success
        };
        self.terminal = Some(status);
        status
    }

    /// Project the context onto the persisted record shape.
    pub fn into_record(mut self) -> TriageRecord {
        let status = self.finalize();
        let logs_snippet = self
            .raw_logs
            .as_deref()
            .filter(|logs| !logs.is_empty())
            .map(|logs| logs.chars().take(LOGS_SNIPPET_CHARS).collect());

        TriageRecord {
            status,
            failed_run_id: self.failed_run_id,
            failed_job_id: self.failed_job_id,
            root_cause: self.classification.as_ref().map(|c| c.root_cause.clone()),
            fix_applied: self.commit_sha.is_some(),
            commit_sha: self.commit_sha,
            issue_url: self.issue_url,
            error_message: self.error_message,
            logs_snippet,
            analysis_data: self.classification,
        }
    }
}

/// Terminal record of one triage invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriageRecord {
    pub status: TerminalStatus,
    pub failed_run_id: Option<u64>,
    pub failed_job_id: Option<u64>,
    pub root_cause: Option<String>,
    pub fix_applied: bool,
    pub commit_sha: Option<String>,
    pub issue_url: Option<String>,
    pub error_message: Option<String>,
    pub logs_snippet: Option<String>,
    pub analysis_data: Option<Classification>,
}

impl TriageRecord {
    /// Record for a run that failed outside the normal paths.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: TerminalStatus::Error,
            failed_run_id: None,
            failed_job_id: None,
            root_cause: None,
            fix_applied: false,
            commit_sha: None,
            issue_url: None,
            error_message: Some(message.into()),
            logs_snippet: None,
            analysis_data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RunContext {
        RunContext::new(RepoRef::new("octo", "hello"))
    }

    #[test]
    fn test_classification_lenient_flag() {
        let c: Classification = serde_json::from_str(
            r#"{"root_cause":"yaml","error_message":"bad indent","is_fixable":"True","fix_suggestion":"indent"}"#,
        )
        .expect("parse");
        assert!(c.is_fixable);

        let c: Classification =
            serde_json::from_str(r#"{"root_cause":"x","is_fixable":null}"#).expect("parse");
        assert!(!c.is_fixable);
        assert!(c.fix_suggestion.is_empty());
    }

    #[test]
    fn test_failed_run_set_once() {
        let mut ctx = ctx();
        ctx.record_failed_run(1, Some(2)).expect("first");
        assert!(ctx.record_failed_run(3, None).is_err());
        assert_eq!(ctx.failed_run_id(), Some(1));
        assert_eq!(ctx.failed_job_id(), Some(2));
    }

    #[test]
    fn test_logs_require_failed_job() {
        let mut ctx = ctx();
        assert!(ctx.record_logs("boom".to_string()).is_err());
        ctx.record_failed_run(1, None).expect("run");
        assert!(ctx.record_logs("boom".to_string()).is_err());

        let mut ctx = RunContext::new(RepoRef::new("o", "r"));
        ctx.record_failed_run(1, Some(9)).expect("run");
        ctx.record_logs("boom".to_string()).expect("logs");
        assert_eq!(ctx.raw_logs(), Some("boom"));
    }

    #[test]
    fn test_commit_and_issue_are_exclusive() {
        let mut ctx = ctx();
        ctx.record_commit("abc".to_string()).expect("commit");
        assert!(ctx.record_issue("https://x/1".to_string()).is_err());

        let mut ctx = RunContext::new(RepoRef::new("o", "r"));
        ctx.record_issue("https://x/1".to_string()).expect("issue");
        assert!(ctx.record_commit("abc".to_string()).is_err());
    }

    #[test]
    fn test_health_is_monotonic() {
        let mut ctx = ctx();
        ctx.set_health(HealthStatus::Failure).expect("first");
        assert!(ctx.set_health(HealthStatus::Success).is_err());
        assert_eq!(ctx.health(), HealthStatus::Failure);
    }

    #[test]
    fn test_finalize_derivation_order() {
        let mut success = ctx();
        success.set_health(HealthStatus::Success).expect("health");
        assert_eq!(success.finalize(), TerminalStatus::Success);

        let mut failure = ctx();
        failure.record_failed_run(7, None).expect("run");
        failure.record_error("ignored by precedence");
        assert_eq!(failure.finalize(), TerminalStatus::Failure);

        let mut error = ctx();
        error.record_error("boom");
        assert_eq!(error.finalize(), TerminalStatus::Error);

        assert_eq!(ctx().finalize(), TerminalStatus::Success);
    }

    #[test]
    fn test_explicit_terminal_wins() {
        let mut ctx = ctx();
        ctx.record_failed_run(7, None).expect("run");
        ctx.fail("issue rejected");
        assert_eq!(ctx.finalize(), TerminalStatus::Error);
    }

    #[test]
    fn test_into_record_projection() {
        let mut ctx = ctx();
        ctx.set_health(HealthStatus::Failure).expect("health");
        ctx.record_failed_run(10, Some(20)).expect("run");
        ctx.record_logs("é".repeat(600)).expect("logs");
        ctx.record_classification(Classification::classification_failed("nope"))
            .expect("classification");
        ctx.record_issue("https://github.com/octo/hello/issues/1".to_string())
            .expect("issue");

        let record = ctx.into_record();
        assert_eq!(record.status, TerminalStatus::Failure);
        assert_eq!(record.failed_run_id, Some(10));
        assert_eq!(record.failed_job_id, Some(20));
        assert_eq!(record.root_cause.as_deref(), Some("Classification failed"));
        assert!(!record.fix_applied);
        assert!(record.commit_sha.is_none());
        assert_eq!(
            record.logs_snippet.as_deref().map(|s| s.chars().count()),
            Some(LOGS_SNIPPET_CHARS)
        );
    }

    #[test]
    fn test_record_serializes_lowercase_status() {
        let value = serde_json::to_value(TriageRecord::error("boom")).expect("serialize");
        assert_eq!(value["status"], "error");
        assert_eq!(value["fix_applied"], false);
        assert_eq!(value["error_message"], "boom");
    }
}
