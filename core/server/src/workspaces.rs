use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::info;
use zet_schemas::Workspace;

use crate::{bad_request, parse_workspace_id, parse_zettel_id, store_error, ApiError, AppState};

#[derive(Debug, Deserialize)]
pub(crate) struct WorkspaceBody {
    path: String,
}

pub(crate) async fn list_workspaces(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.lock().await;
    let workspaces = db
        .list_workspaces()
        .map_err(|e| store_error("Failed to list workspaces", e))?;

    Ok(Json(serde_json::json!({ "workspaces": workspaces })))
}

pub(crate) async fn create_workspace(
    State(state): State<AppState>,
    Json(body): Json<WorkspaceBody>,
) -> Result<impl IntoResponse, ApiError> {
    let workspace = Workspace::new(&body.path).map_err(bad_request)?;

    let db = state.db.lock().await;
    db.save_workspace(&workspace)
        .map_err(|e| store_error("Failed to save workspace", e))?;

    info!("Created workspace: {} at {}", workspace.id(), workspace.path());
    Ok((StatusCode::CREATED, Json(workspace)))
}

pub(crate) async fn get_workspace(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_workspace_id(&id)?;

    let db = state.db.lock().await;
    let workspace = db
        .get_workspace(&id)
        .map_err(|e| store_error("Failed to get workspace", e))?;
    let zettels = db
        .workspace_zettels(&id)
        .map_err(|e| store_error("Failed to list workspace zettels", e))?;

    Ok(Json(serde_json::json!({
        "workspace": workspace,
        "zettels": zettels
    })))
}

pub(crate) async fn update_workspace(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<WorkspaceBody>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_workspace_id(&id)?;

    let db = state.db.lock().await;
    let mut workspace = db
        .get_workspace(&id)
        .map_err(|e| store_error("Failed to get workspace", e))?;

    workspace.set_path(&body.path).map_err(bad_request)?;
    db.update_workspace(&workspace)
        .map_err(|e| store_error("Failed to update workspace", e))?;

    Ok(Json(workspace))
}

pub(crate) async fn delete_workspace(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_workspace_id(&id)?;

    let db = state.db.lock().await;
    db.delete_workspace(&id)
        .map_err(|e| store_error("Failed to delete workspace", e))?;

    Ok(StatusCode::NO_CONTENT)
}

// ========== MEMBERSHIP ==========

pub(crate) async fn add_member(
    State(state): State<AppState>,
    Path((id, zettel_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_workspace_id(&id)?;
    let zettel_id = parse_zettel_id(&zettel_id)?;

    let db = state.db.lock().await;
    let mut workspace = db
        .get_workspace(&id)
        .map_err(|e| store_error("Failed to get workspace", e))?;

    if workspace.add_zettel(zettel_id) {
        db.update_workspace(&workspace)
            .map_err(|e| store_error("Failed to add zettel to workspace", e))?;
    }

    Ok(Json(workspace))
}

pub(crate) async fn remove_member(
    State(state): State<AppState>,
    Path((id, zettel_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_workspace_id(&id)?;
    let zettel_id = parse_zettel_id(&zettel_id)?;

    let db = state.db.lock().await;
    let mut workspace = db
        .get_workspace(&id)
        .map_err(|e| store_error("Failed to get workspace", e))?;

    if workspace.remove_zettel(&zettel_id) {
        db.update_workspace(&workspace)
            .map_err(|e| store_error("Failed to remove zettel from workspace", e))?;
    }

    Ok(Json(workspace))
}
