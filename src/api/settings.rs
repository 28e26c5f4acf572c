//! Agent configuration endpoints.

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::routing::get;
use serde_json::Value;

use super::envelope::{ApiResult, ok};
use super::{AppState, json_body};

/// GET /api/admin/settings
async fn get_settings(State(state): State<AppState>) -> ApiResult {
    Ok(ok(state.settings.agent_config().await?))
}

/// PUT /api/admin/settings
///
/// Replaces the whole configuration object.
async fn put_settings(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult {
    let value = json_body(body)?;
    Ok(ok(state.settings.set_agent_config(value).await?))
}

pub fn settings_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/admin/settings", get(get_settings).put(put_settings))
        .with_state(state)
}
