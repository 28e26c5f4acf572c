//! Folder admin endpoints.

use axum::Json;
use axum::Router;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::json;

use super::envelope::{ApiError, ApiResult, ok};
use super::{AppState, json_body, parse_id, query_params};
use crate::folders::ParentScope;
use crate::folders::model::{FolderPatch, NewFolder, ReorderRequest};

#[derive(Debug, Default, Deserialize)]
pub struct FolderParams {
    /// A folder id, or `root` for top-level folders only.
    pub parent_id: Option<String>,
    pub q: Option<String>,
}

fn scope(raw: Option<&str>) -> Result<ParentScope, ApiError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(ParentScope::Any),
        Some("root") | Some("null") => Ok(ParentScope::Root),
        Some(id) => parse_id(id, "parent").map(ParentScope::Children),
    }
}

/// GET /api/admin/folders
async fn list_folders(
    State(state): State<AppState>,
    params: Result<Query<FolderParams>, QueryRejection>,
) -> ApiResult {
    let params = query_params(params)?;
    let scope = scope(params.parent_id.as_deref())?;
    Ok(ok(state.folders.list(scope, params.q.as_deref()).await?))
}

/// POST /api/admin/folders
async fn create_folder(
    State(state): State<AppState>,
    body: Result<Json<NewFolder>, JsonRejection>,
) -> ApiResult {
    let req = json_body(body)?;
    Ok(ok(state.folders.create(req).await?))
}

async fn get_folder(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let id = parse_id(&id, "folder")?;
    Ok(ok(state.folders.get(id).await?))
}

/// PATCH /api/admin/folders/{id}
///
/// Rename, move (`parent_id`, `null` for root) or pin a position.
async fn update_folder(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<FolderPatch>, JsonRejection>,
) -> ApiResult {
    let id = parse_id(&id, "folder")?;
    let patch = json_body(body)?;
    Ok(ok(state.folders.update(id, patch).await?))
}

/// DELETE /api/admin/folders/{id}
///
/// Removes the whole subtree with its tasks and their jobs.
async fn delete_folder(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let id = parse_id(&id, "folder")?;
    Ok(ok(state.folders.delete(id).await?))
}

/// POST /api/admin/folders/reorder
async fn reorder_folders(
    State(state): State<AppState>,
    body: Result<Json<ReorderRequest>, JsonRejection>,
) -> ApiResult {
    let req = json_body(body)?;
    let parent_id = req.parent_id;
    let order = state.folders.reorder(req).await?;
    Ok(ok(json!({ "parent_id": parent_id, "order": order })))
}

pub fn folder_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/admin/folders", get(list_folders).post(create_folder))
        .route("/api/admin/folders/reorder", post(reorder_folders))
        .route(
            "/api/admin/folders/{id}",
            get(get_folder).patch(update_folder).delete(delete_folder),
        )
        .with_state(state)
}
