//! HTTP API for repository management, results, and GitHub webhooks.

use std::future::Future;

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::monitor::Monitor;
use crate::store::{MonitoringResult, NewRepository, Repository, RepositoryUpdate, StoreError};
use crate::webhook::{decode_payload, summarize, WebhookEvent};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub monitor: Monitor,
}

/// Error response with a `{"detail": ...}` body.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
    Unavailable(String),
}

impl ApiError {
    fn repository_not_found() -> Self {
        Self::NotFound("Repository not found".to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            Self::BadRequest(d) => (StatusCode::BAD_REQUEST, d),
            Self::NotFound(d) => (StatusCode::NOT_FOUND, d),
            Self::Internal(d) => (StatusCode::INTERNAL_SERVER_ERROR, d),
            Self::Unavailable(d) => (StatusCode::SERVICE_UNAVAILABLE, d),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate | StoreError::InvalidUrl(_) => Self::BadRequest(e.to_string()),
            StoreError::NotFound(_) => Self::repository_not_found(),
            other => {
                error!(error = %other, "Store operation failed");
                Self::Internal(other.to_string())
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Unknown and malformed ids are both "not found".
fn parse_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::repository_not_found())
}

fn load_repository(state: &AppState, raw_id: &str) -> ApiResult<Repository> {
    let id = parse_id(raw_id)?;
    state
        .monitor
        .store()
        .get_repository(id)?
        .ok_or_else(ApiError::repository_not_found)
}

/// Build the HTTP router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/api/health", get(health_handler))
        .route(
            "/api/repositories",
            get(list_repositories_handler).post(create_repository_handler),
        )
        .route(
            "/api/repositories/{id}",
            get(get_repository_handler)
                .put(update_repository_handler)
                .delete(delete_repository_handler),
        )
        .route("/api/repositories/{id}/results", get(repository_results_handler))
        .route("/api/repositories/{id}/status", get(repository_status_handler))
        .route("/api/repositories/{id}/monitor", post(trigger_monitoring_handler))
        .route("/api/monitoring/results", get(monitoring_results_handler))
        .route("/api/stats", get(stats_handler))
        .route("/webhook", post(webhook_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Serve until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if binding or serving fails.
pub async fn run_server<F>(state: AppState, addr: &str, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Medic server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

async fn root_handler() -> Json<Value> {
    Json(json!({
        "message": "Medic workflow triage API",
        "version": VERSION,
        "docs": "/",
        "health": "/api/health",
    }))
}

async fn health_handler(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let store = state.monitor.store();
    let stats = store
        .ping()
        .and_then(|()| store.stats(Utc::now()))
        .map_err(|e| {
            error!(error = %e, "Health check failed");
            ApiError::Unavailable(format!("Database connection failed: {e}"))
        })?;

    Ok(Json(json!({
        "status": "healthy",
        "database": "connected",
        "repositories": {
            "total": stats.total_repositories,
            "active": stats.active_repositories,
            "paused": stats.total_repositories - stats.active_repositories,
        },
        "timestamp": Utc::now(),
    })))
}

async fn list_repositories_handler(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<Repository>>> {
    let repos = state.monitor.store().list_repositories()?;
    info!(count = repos.len(), "Listed repositories");
    Ok(Json(repos))
}

async fn create_repository_handler(
    State(state): State<AppState>,
    payload: Result<Json<NewRepository>, JsonRejection>,
) -> ApiResult<Json<Repository>> {
    let Json(request) = payload?;
    let repo = state.monitor.store().create_repository(request)?;
    info!(id = %repo.id, repo = %repo.repo_ref(), "Added repository");
    state.monitor.trigger(repo.id);
    Ok(Json(repo))
}

async fn get_repository_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Repository>> {
    load_repository(&state, &id).map(Json)
}

async fn update_repository_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<RepositoryUpdate>, JsonRejection>,
) -> ApiResult<Json<Repository>> {
    let Json(update) = payload?;
    let id = parse_id(&id)?;
    if let Some(active) = update.is_active {
        info!(%id, action = if active { "activated" } else { "paused" }, "Repository state change");
    }

    state
        .monitor
        .store()
        .update_repository(id, update)?
        .map(Json)
        .ok_or_else(ApiError::repository_not_found)
}

async fn delete_repository_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = parse_id(&id)?;
    if !state.monitor.store().delete_repository(id)? {
        warn!(%id, "Repository not found for deletion");
        return Err(ApiError::repository_not_found());
    }
    info!(%id, "Deleted repository");
    Ok(Json(json!({ "message": "Repository deleted successfully" })))
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<u32>,
}

async fn repository_results_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<Vec<MonitoringResult>>> {
    let repo = load_repository(&state, &id)?;
    let results = state
        .monitor
        .store()
        .list_results(Some(repo.id), query.limit.unwrap_or(50))?;
    Ok(Json(results))
}

async fn repository_status_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let repo = load_repository(&state, &id)?;
    let recent = state.monitor.store().list_results(Some(repo.id), 5)?;

    Ok(Json(json!({
        "id": repo.id,
        "name": repo.name,
        "is_active": repo.is_active,
        "last_monitored": repo.last_monitored,
        "monitoring_status": if repo.is_active { "active" } else { "paused" },
        "running": state.monitor.is_running(repo.id),
        "recent_results_count": recent.len(),
        "created_at": repo.created_at,
    })))
}

async fn trigger_monitoring_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let repo = load_repository(&state, &id)?;
    if !repo.is_active {
        return Err(ApiError::BadRequest(
            "Cannot monitor paused repository. Please resume monitoring first.".to_string(),
        ));
    }

    info!(repo = %repo.repo_ref(), "Manual monitoring triggered");
    let message = if state.monitor.trigger(repo.id) {
        "Monitoring triggered successfully"
    } else {
        "Monitoring already in progress"
    };
    Ok(Json(json!({ "message": message })))
}

#[derive(Debug, Deserialize)]
struct ResultsQuery {
    limit: Option<u32>,
    repo_id: Option<String>,
}

async fn monitoring_results_handler(
    State(state): State<AppState>,
    Query(query): Query<ResultsQuery>,
) -> ApiResult<Json<Vec<MonitoringResult>>> {
    let limit = query.limit.unwrap_or(100);
    let repo_id = match query.repo_id.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(load_repository(&state, raw)?.id),
        None => None,
    };
    Ok(Json(state.monitor.store().list_results(repo_id, limit)?))
}

async fn stats_handler(State(state): State<AppState>) -> ApiResult<Json<crate::store::Stats>> {
    Ok(Json(state.monitor.store().stats(Utc::now())?))
}

fn webhook_reply(status: &str, message: impl Into<String>) -> Json<Value> {
    Json(json!({ "status": status, "message": message.into() }))
}

/// GitHub webhook receiver. Always answers 200 so GitHub does not retry
/// deliveries the service has decided to ignore.
async fn webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Value> {
    let event_header = headers
        .get("x-github-event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let Some(event) = WebhookEvent::from_header(event_header) else {
        info!(event = event_header, "Ignoring unsupported webhook event");
        return webhook_reply(
            "ignored",
            format!("Event type '{event_header}' not supported"),
        );
    };

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let summary = match decode_payload(content_type, &body).and_then(|p| summarize(event, p)) {
        Ok(summary) => summary,
        Err(e) => {
            warn!(event = event.as_str(), error = %e, "Rejected webhook payload");
            return webhook_reply("error", e.to_string());
        }
    };

    let repo = match state.monitor.store().find_repository(&summary.owner, &summary.name) {
        Ok(Some(repo)) => repo,
        Ok(None) => {
            warn!(owner = %summary.owner, repo = %summary.name, "Webhook for unregistered repository");
            return webhook_reply("ignored", "Repository not configured for monitoring");
        }
        Err(e) => {
            error!(error = %e, "Webhook repository lookup failed");
            return webhook_reply("error", format!("Webhook processing error: {e}"));
        }
    };

    if !repo.is_active {
        info!(repo = %repo.repo_ref(), "Repository monitoring is paused");
        return webhook_reply("ignored", "Repository monitoring is paused");
    }

    if !summary.completed {
        return webhook_reply("ignored", "Event doesn't require monitoring");
    }

    info!(
        repo = %repo.repo_ref(),
        event = event.as_str(),
        conclusion = ?summary.conclusion,
        "Triggering triage from webhook"
    );
    state.monitor.trigger(repo.id);

    Json(json!({
        "status": "accepted",
        "message": "Monitoring agent triggered",
        "repository_id": repo.id,
        "repository_name": repo.name,
        "event_type": event.as_str(),
    }))
}
