use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::info;
use zet_schemas::{Zettel, ZettelKind};

use crate::{bad_request, parse_workspace_id, parse_zettel_id, store_error, ApiError, AppState};

fn parse_kind(raw: &str) -> Result<ZettelKind, ApiError> {
    raw.parse().map_err(bad_request)
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct KindQuery {
    kind: Option<String>,
}

pub(crate) async fn list_zettels(
    State(state): State<AppState>,
    query: Option<Query<KindQuery>>,
) -> Result<impl IntoResponse, ApiError> {
    let params = query.map(|q| q.0).unwrap_or_default();
    let kind = params.kind.as_deref().map(parse_kind).transpose()?;

    let db = state.db.lock().await;
    let zettels = db
        .list_zettels(kind)
        .map_err(|e| store_error("Failed to list zettels", e))?;

    Ok(Json(serde_json::json!({ "zettels": zettels })))
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateZettel {
    title: String,
    content: String,
    kind: String,
    workspace_id: Option<String>,
}

pub(crate) async fn create_zettel(
    State(state): State<AppState>,
    Json(body): Json<CreateZettel>,
) -> Result<impl IntoResponse, ApiError> {
    let kind = parse_kind(&body.kind)?;
    let zettel = Zettel::new(&body.title, &body.content, kind).map_err(bad_request)?;
    let workspace_id = body
        .workspace_id
        .as_deref()
        .map(parse_workspace_id)
        .transpose()?;

    let db = state.db.lock().await;
    match workspace_id {
        Some(workspace_id) => {
            db.save_zettel_in_workspace(&zettel, &workspace_id)
                .map_err(|e| store_error("Failed to save zettel into workspace", e))?;
        }
        None => {
            db.save_zettel(&zettel)
                .map_err(|e| store_error("Failed to save zettel", e))?;
        }
    }

    info!("Created zettel: {} ({})", zettel.id(), zettel.kind());
    Ok((StatusCode::CREATED, Json(zettel)))
}

/// Opening a zettel also records it in the history
pub(crate) async fn get_zettel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_zettel_id(&id)?;

    let db = state.db.lock().await;
    let zettel = db
        .get_zettel_with_links(&id)
        .map_err(|e| store_error("Failed to get zettel", e))?;
    db.record_open(&id)
        .map_err(|e| store_error("Failed to record history", e))?;

    Ok(Json(zettel))
}

#[derive(Debug, Deserialize)]
pub(crate) struct UpdateZettel {
    title: Option<String>,
    content: Option<String>,
    kind: Option<String>,
}

pub(crate) async fn update_zettel(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateZettel>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_zettel_id(&id)?;
    let kind = body.kind.as_deref().map(parse_kind).transpose()?;

    let db = state.db.lock().await;
    let mut zettel = db
        .get_zettel(&id)
        .map_err(|e| store_error("Failed to get zettel", e))?;

    if let Some(title) = &body.title {
        zettel.set_title(title).map_err(bad_request)?;
    }
    if let Some(content) = &body.content {
        zettel.set_content(content).map_err(bad_request)?;
    }
    if let Some(kind) = kind {
        zettel.set_kind(kind);
    }

    db.update_zettel(&zettel)
        .map_err(|e| store_error("Failed to update zettel", e))?;

    Ok(Json(zettel))
}

pub(crate) async fn delete_zettel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_zettel_id(&id)?;

    let db = state.db.lock().await;
    db.delete_zettel(&id)
        .map_err(|e| store_error("Failed to delete zettel", e))?;

    Ok(StatusCode::NO_CONTENT)
}

// ========== LINKS ==========

pub(crate) async fn list_links(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_zettel_id(&id)?;

    let db = state.db.lock().await;
    let links = db
        .links(&id)
        .map_err(|e| store_error("Failed to list links", e))?;

    Ok(Json(serde_json::json!({ "id": id, "links": links })))
}

pub(crate) async fn list_backlinks(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_zettel_id(&id)?;

    let db = state.db.lock().await;
    let backlinks = db
        .backlinks(&id)
        .map_err(|e| store_error("Failed to list backlinks", e))?;

    Ok(Json(serde_json::json!({ "id": id, "backlinks": backlinks })))
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateLinks {
    targets: Vec<String>,
}

pub(crate) async fn create_links(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<CreateLinks>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_zettel_id(&id)?;
    let targets = body
        .targets
        .iter()
        .map(|raw| parse_zettel_id(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let db = state.db.lock().await;
    let created = db
        .link(&id, &targets)
        .map_err(|e| store_error("Failed to link zettels", e))?;

    Ok(Json(serde_json::json!({ "created": created })))
}

pub(crate) async fn remove_link(
    State(state): State<AppState>,
    Path((id, target)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_zettel_id(&id)?;
    let target = parse_zettel_id(&target)?;

    let db = state.db.lock().await;
    let removed = db
        .unlink(&id, &[target])
        .map_err(|e| store_error("Failed to unlink zettels", e))?;

    Ok(Json(serde_json::json!({ "removed": removed })))
}
