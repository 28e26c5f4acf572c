//! Job admin endpoints.

use axum::Json;
use axum::Router;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use super::envelope::{ApiError, ApiResult, failure, ok};
use super::{AppState, json_body, parse_id, parse_opt_id, query_params};
use crate::agent::DispatchOutcome;
use crate::error::{Error, JobError};
use crate::jobs::model::{JobFilter, JobStatus};

#[derive(Debug, Default, Deserialize)]
pub struct JobParams {
    pub task_id: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DetailParams {
    #[serde(default)]
    pub full: bool,
}

/// Body of job creation and run requests.
#[derive(Debug, Deserialize)]
pub struct JobRequest {
    pub task_id: Uuid,
    #[serde(default)]
    pub config: Option<Value>,
}

/// GET /api/admin/jobs
///
/// Newest first.
async fn list_jobs(
    State(state): State<AppState>,
    params: Result<Query<JobParams>, QueryRejection>,
) -> ApiResult {
    let params = query_params(params)?;
    let status = match params.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Some(raw.parse::<JobStatus>().map_err(Error::from)?),
        None => None,
    };
    let filter = JobFilter {
        task_id: parse_opt_id(params.task_id.as_deref(), "task")?,
        status,
        limit: params.limit,
        offset: params.offset,
    };
    Ok(ok(state.jobs.list(&filter).await?))
}

/// POST /api/admin/jobs
///
/// Creates a pending job without contacting the worker.
async fn create_job(
    State(state): State<AppState>,
    body: Result<Json<JobRequest>, JsonRejection>,
) -> ApiResult {
    let req = json_body(body)?;
    let config = match req.config {
        Some(config) => config,
        None => state.settings.agent_config().await?,
    };
    let detail = state.jobs.create_job(req.task_id, config).await?;
    Ok(ok(detail.lite()))
}

/// POST /api/admin/jobs/run
///
/// Probe the worker, create the job and dispatch it. A failed dispatch
/// answers 503 carrying the already-failed job.
async fn run_job(
    State(state): State<AppState>,
    body: Result<Json<JobRequest>, JsonRejection>,
) -> ApiResult {
    let req = json_body(body)?;
    match state.dispatch.run(req.task_id, req.config).await? {
        DispatchOutcome::Accepted(detail) => Ok(ok(detail.lite())),
        DispatchOutcome::Failed { detail, cause } => Ok(failure(
            StatusCode::SERVICE_UNAVAILABLE,
            cause.to_string(),
            Some(detail.lite()),
        )),
    }
}

/// GET /api/admin/jobs/{id}
///
/// Units carry only their result summary unless `full=true`.
async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    params: Result<Query<DetailParams>, QueryRejection>,
) -> ApiResult {
    let id = parse_id(&id, "job")?;
    if query_params(params)?.full {
        Ok(ok(state.jobs.detail(id).await?))
    } else {
        Ok(ok(state.jobs.snapshot(id).await?))
    }
}

async fn delete_job(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let id = parse_id(&id, "job")?;
    state.jobs.delete(id).await?;
    Ok(ok(json!({ "id": id })))
}

/// GET /api/admin/jobs/{id}/units/{position}
async fn get_unit(
    State(state): State<AppState>,
    Path((id, position)): Path<(String, String)>,
) -> ApiResult {
    let id = parse_id(&id, "job")?;
    let position: i64 = position
        .trim()
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid unit position: {position}")))?;
    if position < 0 {
        return Err(Error::from(JobError::InvalidPosition(position)).into());
    }
    Ok(ok(state.jobs.get_unit(id, position).await?))
}

/// GET /api/admin/agent/status
///
/// Always 200; `connected` says whether the worker answered.
async fn agent_status(State(state): State<AppState>) -> ApiResult {
    let agent = state.dispatch.agent();
    let url = agent.endpoint().base_url.clone();
    let body = match agent.probe().await {
        Ok(info) => json!({ "connected": true, "url": url, "info": info }),
        Err(e) => json!({ "connected": false, "url": url, "reason": e.to_string() }),
    };
    Ok(ok(body))
}

pub fn job_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/admin/jobs", get(list_jobs).post(create_job))
        .route("/api/admin/jobs/run", post(run_job))
        .route("/api/admin/jobs/{id}", get(get_job).delete(delete_job))
        .route("/api/admin/jobs/{id}/units/{position}", get(get_unit))
        .route("/api/admin/agent/status", get(agent_status))
        .with_state(state)
}
