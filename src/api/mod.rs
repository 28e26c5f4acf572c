//! HTTP surface: admin routes, worker callbacks and health.

pub mod callbacks;
pub mod envelope;
pub mod folders;
pub mod jobs;
pub mod settings;
pub mod tasks;

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::Query;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::response::Response;
use axum::routing::get;
use serde_json::json;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::agent::{AgentClient, DispatchClient};
use crate::folders::FolderService;
use crate::jobs::{CallbackIngest, JobStore};
use crate::settings::AgentSettings;
use crate::store::Database;
use crate::tasks::TaskService;

use self::envelope::{ApiError, ok};

/// Shared state for every route.
#[derive(Clone)]
pub struct AppState {
    pub folders: FolderService,
    pub tasks: TaskService,
    pub jobs: JobStore,
    pub callbacks: Arc<CallbackIngest>,
    pub dispatch: DispatchClient,
    pub settings: AgentSettings,
}

impl AppState {
    pub fn new(db: Arc<dyn Database>, agent: AgentClient, public_url: impl Into<String>) -> Self {
        let jobs = JobStore::new(Arc::clone(&db));
        let settings = AgentSettings::new(Arc::clone(&db));
        Self {
            folders: FolderService::new(Arc::clone(&db)),
            tasks: TaskService::new(Arc::clone(&db)),
            callbacks: Arc::new(CallbackIngest::new(jobs.clone())),
            dispatch: DispatchClient::new(agent, jobs.clone(), settings.clone(), public_url),
            jobs,
            settings,
        }
    }
}

/// Unwrap a JSON body, turning extractor rejections into envelopes.
pub(crate) fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

pub(crate) fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    query
        .map(|Query(value)| value)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

pub(crate) fn parse_id(raw: &str, what: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim()).map_err(|_| ApiError::BadRequest(format!("invalid {what} id: {raw}")))
}

/// Optional id from a query string; empty means absent.
pub(crate) fn parse_opt_id(raw: Option<&str>, what: &str) -> Result<Option<Uuid>, ApiError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => parse_id(s, what).map(Some),
        None => Ok(None),
    }
}

async fn health() -> Response {
    ok(json!({ "status": "ok", "service": env!("CARGO_PKG_NAME"), "version": env!("CARGO_PKG_VERSION") }))
}

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(folders::folder_routes(state.clone()))
        .merge(tasks::task_routes(state.clone()))
        .merge(jobs::job_routes(state.clone()))
        .merge(settings::settings_routes(state.clone()))
        .merge(callbacks::callback_routes(state))
        .layer(CorsLayer::permissive())
}
