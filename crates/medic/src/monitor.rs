//! Trigger layer: runs triage for registered repositories and records results.
//!
//! Webhooks, the poller, and manual triggers all end up in [`Monitor::trigger`],
//! which runs at most one triage per repository at a time within this process.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::FutureExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::github::{GitHubClient, GitHubResult, WorkflowHost};
use crate::llm::TextGenerator;
use crate::store::{MonitoringResult, Repository, Store};
use crate::triage::{TerminalStatus, TriageMachine, TriageOptions, TriageRecord};

const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Builds a host client for one run from the repository's own credentials.
pub type HostFactory =
    Arc<dyn Fn(&Repository) -> GitHubResult<Box<dyn WorkflowHost>> + Send + Sync>;

/// Host factory producing REST clients against `api_url`.
#[must_use]
pub fn github_host_factory(api_url: String) -> HostFactory {
    Arc::new(move |repo: &Repository| {
        let client = GitHubClient::with_base_url(&api_url, &repo.access_token)?;
        Ok(Box::new(client) as Box<dyn WorkflowHost>)
    })
}

struct Inner {
    store: Arc<Store>,
    generator: Arc<dyn TextGenerator>,
    hosts: HostFactory,
    options: TriageOptions,
    run_timeout: Duration,
    in_flight: Mutex<HashSet<Uuid>>,
}

/// Removes the repository from the in-flight set when the run ends, even if
/// it panicked.
struct InFlightGuard {
    inner: Arc<Inner>,
    repo_id: Uuid,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut running) = self.inner.in_flight.lock() {
            running.remove(&self.repo_id);
        }
    }
}

/// Shared handle to the trigger layer.
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<Inner>,
}

impl Monitor {
    #[must_use]
    pub fn new(
        store: Arc<Store>,
        generator: Arc<dyn TextGenerator>,
        hosts: HostFactory,
        config: &AppConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                generator,
                hosts,
                options: config.triage.options(),
                run_timeout: config.triage.run_timeout(),
                in_flight: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.inner.store
    }

    /// True while a run for `repo_id` is executing.
    pub fn is_running(&self, repo_id: Uuid) -> bool {
        self.inner
            .in_flight
            .lock()
            .is_ok_and(|running| running.contains(&repo_id))
    }

    fn claim(&self, repo_id: Uuid) -> Option<InFlightGuard> {
        let mut running = self.inner.in_flight.lock().ok()?;
        if !running.insert(repo_id) {
            return None;
        }
        Some(InFlightGuard {
            inner: Arc::clone(&self.inner),
            repo_id,
        })
    }

    /// Start a background run for `repo_id`.
    ///
    /// Returns `false` without spawning when a run for the repository is
    /// already in flight.
    pub fn trigger(&self, repo_id: Uuid) -> bool {
        let Some(guard) = self.claim(repo_id) else {
            info!(%repo_id, "Triage already running, skipping trigger");
            return false;
        };

        let monitor = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            monitor.monitor_repository(repo_id).await;
        });
        true
    }

    /// Run triage for `repo_id` and persist the outcome.
    ///
    /// Returns the stored result, or `None` when the repository is unknown or
    /// paused. Failures of this layer are stored as `Critical error` results.
    pub async fn monitor_repository(&self, repo_id: Uuid) -> Option<MonitoringResult> {
        match self.run_once(repo_id).await {
            Ok(result) => result,
            Err(e) => {
                error!(%repo_id, error = %format!("{e:#}"), "Critical error monitoring repository");
                let record = TriageRecord::error(format!("Critical error: {e:#}"));
                match self.inner.store.insert_result(repo_id, &record, Utc::now()) {
                    Ok(result) => Some(result),
                    Err(store_err) => {
                        error!(%repo_id, error = %store_err, "Failed to persist error result");
                        None
                    }
                }
            }
        }
    }

    async fn run_once(&self, repo_id: Uuid) -> Result<Option<MonitoringResult>> {
        let inner = &self.inner;
        let Some(repo) = inner
            .store
            .get_repository(repo_id)
            .context("Failed to load repository")?
        else {
            warn!(%repo_id, "Repository not found");
            return Ok(None);
        };

        if !repo.is_active {
            info!(repo = %repo.repo_ref(), "Skipping paused repository");
            return Ok(None);
        }

        info!(repo = %repo.repo_ref(), "Starting triage");
        let host = (inner.hosts)(&repo).context("Failed to build GitHub client")?;
        let record = self.triage(host.as_ref(), &repo).await;

        let result = inner
            .store
            .insert_result(repo.id, &record, Utc::now())
            .context("Failed to store monitoring result")?;
        inner
            .store
            .set_last_monitored(repo.id, Utc::now())
            .context("Failed to update last_monitored")?;

        match record.status {
            TerminalStatus::Success => {
                info!(repo = %repo.repo_ref(), "Monitoring completed successfully");
            }
            status => {
                warn!(repo = %repo.repo_ref(), status = status.as_str(), "Monitoring completed with issues");
            }
        }
        Ok(Some(result))
    }

    /// Run the state machine under the deadline; panics and timeouts become
    /// error records.
    async fn triage(&self, host: &dyn WorkflowHost, repo: &Repository) -> TriageRecord {
        let inner = &self.inner;
        let machine = TriageMachine::new(host, inner.generator.as_ref(), &inner.options);
        let run = AssertUnwindSafe(machine.run(repo.repo_ref())).catch_unwind();

        match tokio::time::timeout(inner.run_timeout, run).await {
            Ok(Ok(record)) => record,
            Ok(Err(_)) => {
                error!(repo = %repo.repo_ref(), "Triage panicked");
                TriageRecord::error("Triage panicked")
            }
            Err(_) => {
                warn!(repo = %repo.repo_ref(), timeout_secs = inner.run_timeout.as_secs(), "Triage timed out");
                TriageRecord::error(format!(
                    "Triage timed out after {}s",
                    inner.run_timeout.as_secs()
                ))
            }
        }
    }

    /// Trigger every active repository.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository list cannot be loaded.
    pub fn trigger_all_active(&self) -> Result<usize> {
        let repos = self
            .inner
            .store
            .active_repositories()
            .context("Failed to list active repositories")?;
        let started = repos.iter().filter(|r| self.trigger(r.id)).count();
        debug!(active = repos.len(), started, "Poll cycle dispatched");
        Ok(started)
    }

    /// Poll all active repositories every `interval` (at least one second),
    /// forever.
    pub async fn run_poller(self, interval: Duration) {
        let interval = interval.max(MIN_POLL_INTERVAL);
        info!(interval_secs = interval.as_secs(), "Starting repository poller");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.trigger_all_active() {
                error!("Poll cycle failed: {e:#}");
            }
        }
    }
}
