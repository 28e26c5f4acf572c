//! Worker callback endpoints.
//!
//! The worker reports progress per unit and once for the whole job. Both
//! answer with the job as it stands after the update.

use axum::Json;
use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::post;

use super::envelope::{ApiResult, ok};
use super::{AppState, json_body, parse_id};
use crate::jobs::{CompletionCallback, UnitCallback};

/// POST /api/jobs/{id}/callback/task
async fn unit_callback(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<UnitCallback>, JsonRejection>,
) -> ApiResult {
    let job_id = parse_id(&id, "job")?;
    let callback = json_body(body)?;
    Ok(ok(state.callbacks.apply_unit(job_id, callback).await?))
}

/// POST /api/jobs/{id}/callback/complete
async fn completion_callback(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<CompletionCallback>, JsonRejection>,
) -> ApiResult {
    let job_id = parse_id(&id, "job")?;
    let callback = json_body(body)?;
    Ok(ok(state.callbacks.apply_completion(job_id, callback).await?))
}

pub fn callback_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/jobs/{id}/callback/task", post(unit_callback))
        .route("/api/jobs/{id}/callback/complete", post(completion_callback))
        .with_state(state)
}
