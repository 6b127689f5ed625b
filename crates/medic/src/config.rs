//! Service configuration.
//!
//! Loaded from an optional JSON file; every field has a default so an empty
//! object (or no file at all) yields a working local configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::github::client::GITHUB_API_URL;
use crate::llm::client::{DEFAULT_API_URL, DEFAULT_MODEL};
use crate::triage::{HealthPolicy, TriageOptions};

/// Errors loading the configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub triage: TriageConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl AppConfig {
    /// Load from `path`, or defaults when no path is given.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// fails [`AppConfig::validate`].
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that cannot drive the service.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitor.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "monitor.poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.triage.run_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "triage.run_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_addr")]
    pub addr: String,
}

fn default_addr() -> String {
    "0.0.0.0:8000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
        }
    }
}

/// GitHub API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// API root (override for GitHub Enterprise)
    #[serde(default = "default_github_api_url")]
    pub api_url: String,
}

fn default_github_api_url() -> String {
    GITHUB_API_URL.to_string()
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_github_api_url(),
        }
    }
}

/// Text-generation service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible chat completions endpoint
    #[serde(default = "default_llm_api_url")]
    pub api_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

fn default_llm_api_url() -> String {
    DEFAULT_API_URL.to_string()
}
fn default_llm_model() -> String {
    DEFAULT_MODEL.to_string()
}
fn default_api_key_env() -> String {
    "GROQ_API_KEY".to_string()
}
fn default_llm_timeout() -> u64 {
    120
}

impl LlmConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: default_llm_api_url(),
            model: default_llm_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

/// Triage run settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageConfig {
    /// Character budget for the log excerpt sent to the classifier
    #[serde(default = "default_log_budget")]
    pub log_budget_chars: usize,
    /// How far back the health check looks (minutes)
    #[serde(default = "default_recent_window")]
    pub recent_window_mins: i64,
    #[serde(default = "default_recent_per_page")]
    pub recent_runs_per_page: u32,
    #[serde(default = "default_fallback_per_page")]
    pub fallback_runs_per_page: u32,
    /// Open an issue when a fixable failure yields no usable fix
    #[serde(default = "default_true")]
    pub issue_on_unusable_fix: bool,
    /// Labels to add to created issues
    #[serde(default)]
    pub issue_labels: Vec<String>,
    /// Deadline for one run (seconds)
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,
}

fn default_log_budget() -> usize {
    crate::triage::logs::DEFAULT_LOG_BUDGET
}
fn default_recent_window() -> i64 {
    120
}
fn default_recent_per_page() -> u32 {
    10
}
fn default_fallback_per_page() -> u32 {
    5
}
fn default_true() -> bool {
    true
}
fn default_run_timeout() -> u64 {
    600
}

impl TriageConfig {
    #[must_use]
    pub fn options(&self) -> TriageOptions {
        TriageOptions {
            log_budget_chars: self.log_budget_chars,
            health: HealthPolicy {
                recent_window: chrono::Duration::minutes(self.recent_window_mins),
                recent_per_page: self.recent_runs_per_page,
                fallback_per_page: self.fallback_runs_per_page,
            },
            issue_on_unusable_fix: self.issue_on_unusable_fix,
            issue_labels: self.issue_labels.clone(),
        }
    }

    #[must_use]
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            log_budget_chars: default_log_budget(),
            recent_window_mins: default_recent_window(),
            recent_runs_per_page: default_recent_per_page(),
            fallback_runs_per_page: default_fallback_per_page(),
            issue_on_unusable_fix: default_true(),
            issue_labels: vec![],
            run_timeout_secs: default_run_timeout(),
        }
    }
}

/// Background poller settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Poll interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_true")]
    pub poll_enabled: bool,
}

fn default_poll_interval() -> u64 {
    300
}

impl MonitorConfig {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            poll_enabled: true,
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("medic.db")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_uses_defaults() {
        let config: AppConfig = serde_json::from_str("{}").expect("parse");
        assert_eq!(config.server.addr, "0.0.0.0:8000");
        assert_eq!(config.llm.model, DEFAULT_MODEL);
        assert_eq!(config.llm.api_key_env, "GROQ_API_KEY");
        assert_eq!(config.triage.log_budget_chars, 10_000);
        assert!(config.triage.issue_on_unusable_fix);
        assert_eq!(config.monitor.poll_interval(), Duration::from_secs(300));
        assert_eq!(config.store.path, PathBuf::from("medic.db"));
    }

    #[test]
    fn test_partial_section_override() {
        let config: AppConfig = serde_json::from_str(
            r#"{"triage": {"recent_window_mins": 30, "issue_labels": ["ci"]}, "monitor": {"poll_enabled": false}}"#,
        )
        .expect("parse");

        assert_eq!(config.triage.recent_window_mins, 30);
        assert_eq!(config.triage.recent_runs_per_page, 10);
        assert!(!config.monitor.poll_enabled);

        let options = config.triage.options();
        assert_eq!(options.health.recent_window, chrono::Duration::minutes(30));
        assert_eq!(options.issue_labels, vec!["ci".to_string()]);
    }

    #[test]
    fn test_zero_intervals_rejected() {
        let config: AppConfig =
            serde_json::from_str(r#"{"monitor": {"poll_interval_secs": 0}}"#).expect("parse");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid(msg)) if msg.contains("poll_interval_secs")
        ));

        let mut config = AppConfig::default();
        assert!(config.validate().is_ok());
        config.triage.run_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_without_path() {
        let config = AppConfig::load(None).expect("defaults");
        assert_eq!(config.github.api_url, GITHUB_API_URL);
    }

    #[test]
    fn test_load_missing_file() {
        let err = AppConfig::load(Some(Path::new("/nonexistent/medic.json"))).expect_err("missing");
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
