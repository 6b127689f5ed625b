//! Workflow failure triage.
//!
//! One invocation inspects a repository's recent CI runs and ends in exactly
//! one terminal outcome:
//!
//! ```text
//! HealthCheck ─┬─ failure ─► FetchLogs ─► Classify ─┬─ fixable ─► ResolveSource ─► SynthesizeFix ─► CommitFix
//!              │                                    └─ not fixable ─────────────► CreateIssue
//!              ├─ success ─► MarkSuccess
//!              └─ error   ─► Done
//! ```
//!
//! Everything the pipeline touches outside the process goes through
//! [`crate::github::WorkflowHost`] and [`crate::llm::TextGenerator`].

pub mod classifier;
pub mod health;
pub mod logs;
pub mod machine;
pub mod remediate;
pub mod resolver;
pub mod synthesizer;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use classifier::FailureClassifier;
pub use health::{HealthOutcome, HealthPolicy};
pub use machine::{TriageMachine, TriageOptions, TriageState};
pub use remediate::RemediationError;
pub use synthesizer::FixSynthesizer;
pub use types::{Classification, HealthStatus, RunContext, TerminalStatus, TriageRecord};

use crate::github::GitHubError;

/// Errors that abort a triage run and surface as an `error` record.
#[derive(Debug, thiserror::Error)]
pub enum TriageError {
    #[error(transparent)]
    Host(#[from] GitHubError),

    #[error(transparent)]
    Remediation(#[from] RemediationError),

    #[error("Invalid triage state: {0}")]
    Invariant(&'static str),
}
