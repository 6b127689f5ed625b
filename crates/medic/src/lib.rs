//! Medic: GitHub Actions failure triage.
//!
//! Watches registered repositories for failed workflow runs, classifies the
//! failure from its logs, and either commits a corrected workflow file or
//! opens an issue.
//!
//! - [`triage`]: the per-run state machine
//! - [`github`], [`llm`]: external collaborators behind traits
//! - [`store`], [`monitor`], [`server`]: registry, trigger layer, and HTTP API

pub mod config;
pub mod github;
pub mod llm;
pub mod monitor;
pub mod server;
pub mod store;
pub mod triage;
pub mod webhook;

pub use config::AppConfig;
pub use github::{GitHubClient, RepoRef, WorkflowHost};
pub use llm::{ChatCompletionsClient, TextGenerator};
pub use monitor::Monitor;
pub use store::Store;
pub use triage::{TriageMachine, TriageOptions, TriageRecord};
