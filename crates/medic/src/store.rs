//! SQLite persistence for monitored repositories and their triage results.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::github::{InvalidRepoUrl, RepoRef};
use crate::triage::{Classification, TerminalStatus, TriageRecord};

const SCHEMA: &str = include_str!("../migrations/0001_init.sql");

const REPO_COLUMNS: &str =
    "id, url, name, owner, access_token, created_at, is_active, last_monitored";

const RESULT_COLUMNS: &str = "id, repo_id, timestamp, status, failed_run_id, failed_job_id, \
     root_cause, fix_applied, commit_sha, issue_url, error_message, logs_snippet, analysis_data";

/// Persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Repository already exists")]
    Duplicate,

    #[error("Repository not found: {0}")]
    NotFound(Uuid),

    #[error(transparent)]
    InvalidUrl(#[from] InvalidRepoUrl),

    #[error("Failed to encode analysis data: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Database connection poisoned")]
    Poisoned,

    #[error("Failed to create database directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A repository under monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Repository {
    pub id: Uuid,
    pub url: String,
    pub name: String,
    pub owner: String,
    #[serde(skip_serializing)]
    pub access_token: String,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
    pub last_monitored: Option<DateTime<Utc>>,
}

impl Repository {
    #[must_use]
    pub fn repo_ref(&self) -> RepoRef {
        RepoRef::new(&self.owner, &self.name)
    }
}

/// Registration request.
#[derive(Debug, Clone, Deserialize)]
pub struct NewRepository {
    pub url: String,
    pub access_token: String,
}

/// Partial update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepositoryUpdate {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// A persisted terminal record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitoringResult {
    pub id: Uuid,
    pub repo_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub record: TriageRecord,
}

/// Aggregate counters for the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub total_repositories: u64,
    pub active_repositories: u64,
    pub total_monitoring_runs: u64,
    pub successful_fixes: u64,
    pub failures_detected: u64,
    pub recent_activity_24h: u64,
}

/// Repository and result store.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (and migrate) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema applied.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        Self::init(Connection::open(path)?)
    }

    /// Fresh in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be applied.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Round-trip query used by health checks.
    pub fn ping(&self) -> StoreResult<()> {
        self.conn()?.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))?;
        Ok(())
    }

    /// All repositories, newest first.
    pub fn list_repositories(&self) -> StoreResult<Vec<Repository>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {REPO_COLUMNS} FROM repositories ORDER BY created_at DESC, rowid DESC"
        ))?;
        let rows = stmt.query_map([], repository_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn active_repositories(&self) -> StoreResult<Vec<Repository>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {REPO_COLUMNS} FROM repositories WHERE is_active = 1 ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map([], repository_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_repository(&self, id: Uuid) -> StoreResult<Option<Repository>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                &format!("SELECT {REPO_COLUMNS} FROM repositories WHERE id = ?1"),
                params![id.to_string()],
                repository_from_row,
            )
            .optional()?)
    }

    /// Look up by owner and name, ignoring case.
    pub fn find_repository(&self, owner: &str, name: &str) -> StoreResult<Option<Repository>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {REPO_COLUMNS} FROM repositories \
                     WHERE lower(owner) = lower(?1) AND lower(name) = lower(?2)"
                ),
                params![owner, name],
                repository_from_row,
            )
            .optional()?)
    }

    /// Register a repository; owner and name are parsed from the URL.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidUrl`] for unparseable URLs, [`StoreError::Duplicate`]
    /// when the URL is already registered.
    pub fn create_repository(&self, new: NewRepository) -> StoreResult<Repository> {
        let url = new.url.trim().to_string();
        let parsed = RepoRef::from_url(&url)?;
        let repo = Repository {
            id: Uuid::new_v4(),
            url,
            name: parsed.name,
            owner: parsed.owner,
            access_token: new.access_token,
            created_at: Utc::now(),
            is_active: true,
            last_monitored: None,
        };

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO repositories(id, url, name, owner, access_token, created_at, is_active, last_monitored) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                repo.id.to_string(),
                repo.url,
                repo.name,
                repo.owner,
                repo.access_token,
                repo.created_at,
                repo.is_active,
                repo.last_monitored,
            ],
        )
        .map_err(map_unique_violation)?;

        debug!(id = %repo.id, repo = %repo.repo_ref(), "Registered repository");
        Ok(repo)
    }

    /// Apply `update`; returns `None` for unknown ids.
    pub fn update_repository(
        &self,
        id: Uuid,
        update: RepositoryUpdate,
    ) -> StoreResult<Option<Repository>> {
        let Some(mut repo) = self.get_repository(id)? else {
            return Ok(None);
        };

        if let Some(url) = update.url {
            let url = url.trim().to_string();
            let parsed = RepoRef::from_url(&url)?;
            repo.url = url;
            repo.owner = parsed.owner;
            repo.name = parsed.name;
        }
        if let Some(token) = update.access_token {
            repo.access_token = token;
        }
        if let Some(active) = update.is_active {
            repo.is_active = active;
        }

        let conn = self.conn()?;
        conn.execute(
            "UPDATE repositories SET url = ?2, name = ?3, owner = ?4, access_token = ?5, is_active = ?6 \
             WHERE id = ?1",
            params![
                id.to_string(),
                repo.url,
                repo.name,
                repo.owner,
                repo.access_token,
                repo.is_active,
            ],
        )
        .map_err(map_unique_violation)?;
        Ok(Some(repo))
    }

    /// Delete a repository and its results. Returns `false` for unknown ids.
    pub fn delete_repository(&self, id: Uuid) -> StoreResult<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM repositories WHERE id = ?1", params![id.to_string()])?;
        Ok(deleted > 0)
    }

    pub fn set_last_monitored(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE repositories SET last_monitored = ?2 WHERE id = ?1",
            params![id.to_string(), at],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    /// Persist a terminal record for `repo_id`.
    pub fn insert_result(
        &self,
        repo_id: Uuid,
        record: &TriageRecord,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<MonitoringResult> {
        let analysis = record
            .analysis_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let result = MonitoringResult {
            id: Uuid::new_v4(),
            repo_id,
            timestamp,
            record: record.clone(),
        };

        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO monitoring_results({RESULT_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
            ),
            params![
                result.id.to_string(),
                repo_id.to_string(),
                timestamp,
                record.status.as_str(),
                record.failed_run_id.and_then(|v| i64::try_from(v).ok()),
                record.failed_job_id.and_then(|v| i64::try_from(v).ok()),
                record.root_cause,
                record.fix_applied,
                record.commit_sha,
                record.issue_url,
                record.error_message,
                record.logs_snippet,
                analysis,
            ],
        )?;
        Ok(result)
    }

    /// Results, newest first; all repositories when `repo_id` is `None`.
    pub fn list_results(
        &self,
        repo_id: Option<Uuid>,
        limit: u32,
    ) -> StoreResult<Vec<MonitoringResult>> {
        let conn = self.conn()?;
        let rows = match repo_id {
            Some(id) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {RESULT_COLUMNS} FROM monitoring_results WHERE repo_id = ?1 \
                     ORDER BY timestamp DESC, rowid DESC LIMIT ?2"
                ))?;
                let rows = stmt.query_map(params![id.to_string(), limit], result_from_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {RESULT_COLUMNS} FROM monitoring_results \
                     ORDER BY timestamp DESC, rowid DESC LIMIT ?1"
                ))?;
                let rows = stmt.query_map(params![limit], result_from_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(rows)
    }

    pub fn stats(&self, now: DateTime<Utc>) -> StoreResult<Stats> {
        let conn = self.conn()?;
        let count = |sql: &str| -> StoreResult<u64> {
            let n: i64 = conn.query_row(sql, [], |r| r.get(0))?;
            Ok(u64::try_from(n).unwrap_or_default())
        };

        let since = now - Duration::hours(24);
        let recent: i64 = conn.query_row(
            "SELECT COUNT(*) FROM monitoring_results WHERE timestamp >= ?1",
            params![since],
            |r| r.get(0),
        )?;

        Ok(Stats {
            total_repositories: count("SELECT COUNT(*) FROM repositories")?,
            active_repositories: count("SELECT COUNT(*) FROM repositories WHERE is_active = 1")?,
            total_monitoring_runs: count("SELECT COUNT(*) FROM monitoring_results")?,
            successful_fixes: count("SELECT COUNT(*) FROM monitoring_results WHERE fix_applied = 1")?,
            failures_detected: count(
                "SELECT COUNT(*) FROM monitoring_results WHERE status = 'failure'",
            )?,
            recent_activity_24h: u64::try_from(recent).unwrap_or_default(),
        })
    }
}

fn map_unique_violation(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::SqliteFailure(ref err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            StoreError::Duplicate
        }
        other => StoreError::Sqlite(other),
    }
}

fn uuid_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn id_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<u64>> {
    Ok(row
        .get::<_, Option<i64>>(idx)?
        .and_then(|v| u64::try_from(v).ok()))
}

fn repository_from_row(row: &Row<'_>) -> rusqlite::Result<Repository> {
    Ok(Repository {
        id: uuid_column(row, 0)?,
        url: row.get(1)?,
        name: row.get(2)?,
        owner: row.get(3)?,
        access_token: row.get(4)?,
        created_at: row.get(5)?,
        is_active: row.get(6)?,
        last_monitored: row.get(7)?,
    })
}

fn result_from_row(row: &Row<'_>) -> rusqlite::Result<MonitoringResult> {
    let status: String = row.get(3)?;
    let analysis: Option<String> = row.get(12)?;
    let analysis_data = analysis
        .as_deref()
        .and_then(|raw| serde_json::from_str::<Classification>(raw).ok());

    Ok(MonitoringResult {
        id: uuid_column(row, 0)?,
        repo_id: uuid_column(row, 1)?,
        timestamp: row.get(2)?,
        record: TriageRecord {
            status: TerminalStatus::parse(&status).unwrap_or(TerminalStatus::Error),
            failed_run_id: id_column(row, 4)?,
            failed_job_id: id_column(row, 5)?,
            root_cause: row.get(6)?,
            fix_applied: row.get(7)?,
            commit_sha: row.get(8)?,
            issue_url: row.get(9)?,
            error_message: row.get(10)?,
            logs_snippet: row.get(11)?,
            analysis_data,
        },
    })
}
