//! Task admin endpoints.

use std::collections::BTreeMap;

use axum::Json;
use axum::Router;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::routing::get;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use super::envelope::{ApiError, ApiResult, ok};
use super::{AppState, json_body, parse_id, parse_opt_id, query_params};
use crate::jobs::model::TaskJobStats;
use crate::tasks::TaskQuery;
use crate::tasks::model::{NewTask, TaskPatch};

#[derive(Debug, Default, Deserialize)]
pub struct TaskParams {
    pub folder_id: Option<String>,
    #[serde(default)]
    pub subtree: bool,
    pub q: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatsParams {
    /// Comma-separated task ids.
    #[serde(default)]
    pub ids: String,
}

/// GET /api/admin/tasks
async fn list_tasks(
    State(state): State<AppState>,
    params: Result<Query<TaskParams>, QueryRejection>,
) -> ApiResult {
    let params = query_params(params)?;
    let query = TaskQuery {
        folder_id: parse_opt_id(params.folder_id.as_deref(), "folder")?,
        subtree: params.subtree,
        query: params.q,
        limit: params.limit,
        offset: params.offset,
    };
    Ok(ok(state.tasks.list(query).await?))
}

/// POST /api/admin/tasks
///
/// An object creates one task, an array creates a batch.
async fn create_tasks(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult {
    let body = json_body(body)?;
    if body.is_array() {
        let reqs: Vec<NewTask> =
            serde_json::from_value(body).map_err(|e| ApiError::BadRequest(e.to_string()))?;
        return Ok(ok(state.tasks.create_batch(reqs).await?));
    }
    let req: NewTask =
        serde_json::from_value(body).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(ok(state.tasks.create(req).await?))
}

async fn get_task(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let id = parse_id(&id, "task")?;
    Ok(ok(state.tasks.get(id).await?))
}

/// PATCH /api/admin/tasks/{id}
async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<TaskPatch>, JsonRejection>,
) -> ApiResult {
    let id = parse_id(&id, "task")?;
    let patch = json_body(body)?;
    Ok(ok(state.tasks.update(id, patch).await?))
}

/// DELETE /api/admin/tasks/{id}
///
/// Jobs rooted at the task go with it.
async fn delete_task(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let id = parse_id(&id, "task")?;
    state.tasks.delete(id).await?;
    Ok(ok(json!({ "id": id })))
}

/// GET /api/admin/tasks/stats?ids=a,b
///
/// Malformed ids are skipped rather than rejected.
async fn task_stats(
    State(state): State<AppState>,
    params: Result<Query<StatsParams>, QueryRejection>,
) -> ApiResult {
    let params = query_params(params)?;
    let ids = stats_ids(&params.ids);
    let stats: BTreeMap<String, TaskJobStats> = state
        .jobs
        .task_stats(&ids)
        .await?
        .into_iter()
        .map(|(id, stats)| (id.to_string(), stats))
        .collect();
    Ok(ok(stats))
}

fn stats_ids(raw: &str) -> Vec<Uuid> {
    raw.split(',')
        .filter_map(|s| Uuid::parse_str(s.trim()).ok())
        .collect()
}

pub fn task_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/admin/tasks", get(list_tasks).post(create_tasks))
        .route("/api/admin/tasks/stats", get(task_stats))
        .route(
            "/api/admin/tasks/{id}",
            get(get_task).patch(update_task).delete(delete_task),
        )
        .with_state(state)
}
