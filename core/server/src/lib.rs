use axum::{
    extract::{Json, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{delete, get, put},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::error;
use zet_schemas::{SchemaError, WorkspaceId, ZettelId};
use zet_storage::{Database, StoreError};

mod workspaces;
mod zettels;

/// Error half of every handler result
pub type ApiError = (StatusCode, String);

const NO_CACHE: &str = "no-cache, no-store, must-revalidate";

#[derive(Debug, Clone, Copy, Default)]
pub struct ServerConfig {
    /// Send `Cache-Control: no-cache` on every response
    pub no_cache: bool,
}

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(db: Database, config: ServerConfig) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            config,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let no_cache = state.config.no_cache;

    let router = Router::new()
        .route("/health", get(health_check))
        .route("/", get(home))
        .route("/stats", get(get_stats))
        .route("/search", get(search))
        .route("/history", get(history))

        // Workspaces
        .route(
            "/workspaces",
            get(workspaces::list_workspaces).post(workspaces::create_workspace),
        )
        .route(
            "/workspaces/:id",
            get(workspaces::get_workspace)
                .put(workspaces::update_workspace)
                .delete(workspaces::delete_workspace),
        )
        .route(
            "/workspaces/:id/zettels/:zettel_id",
            put(workspaces::add_member).delete(workspaces::remove_member),
        )

        // Zettels
        .route(
            "/zettels",
            get(zettels::list_zettels).post(zettels::create_zettel),
        )
        .route(
            "/zettels/:id",
            get(zettels::get_zettel)
                .put(zettels::update_zettel)
                .delete(zettels::delete_zettel),
        )
        .route(
            "/zettels/:id/links",
            get(zettels::list_links).post(zettels::create_links),
        )
        .route("/zettels/:id/links/:target", delete(zettels::remove_link))
        .route("/zettels/:id/backlinks", get(zettels::list_backlinks))
        .with_state(state);

    let router = if no_cache {
        router.layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static(NO_CACHE),
        ))
    } else {
        router
    };

    router.layer(TraceLayer::new_for_http())
}

// ========== ERROR MAPPING ==========

pub(crate) fn store_error(context: &str, e: StoreError) -> ApiError {
    let status = match &e {
        e if e.is_not_found() => StatusCode::NOT_FOUND,
        StoreError::Schema(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    error!("{}: {}", context, e);
    (status, e.to_string())
}

pub(crate) fn bad_request(e: SchemaError) -> ApiError {
    (StatusCode::BAD_REQUEST, e.to_string())
}

pub(crate) fn parse_zettel_id(raw: &str) -> Result<ZettelId, ApiError> {
    ZettelId::parse(raw).map_err(bad_request)
}

pub(crate) fn parse_workspace_id(raw: &str) -> Result<WorkspaceId, ApiError> {
    WorkspaceId::parse(raw).map_err(bad_request)
}

// ========== SERVICE ENDPOINTS ==========

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "zet",
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn home(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.lock().await;

    let workspaces = db
        .list_workspaces()
        .map_err(|e| store_error("Failed to list workspaces", e))?;
    let last_opened = db
        .last_opened()
        .map_err(|e| store_error("Failed to load history", e))?;

    Ok(Json(serde_json::json!({
        "needs_workspace": workspaces.is_empty(),
        "workspaces": workspaces,
        "last_opened": last_opened
    })))
}

async fn get_stats(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.lock().await;
    let stats = db
        .stats()
        .map_err(|e| store_error("Failed to collect stats", e))?;

    Ok(Json(stats))
}

#[derive(Debug, Default, Deserialize)]
struct SearchQuery {
    q: Option<String>,
    limit: Option<usize>,
}

async fn search(
    State(state): State<AppState>,
    query: Option<Query<SearchQuery>>,
) -> Result<impl IntoResponse, ApiError> {
    let params = query.map(|q| q.0).unwrap_or_default();
    let text = params.q.unwrap_or_default();
    let limit = params.limit.unwrap_or(50).clamp(1, 200);

    let db = state.db.lock().await;
    let results = db
        .search(&text, limit)
        .map_err(|e| store_error("Failed to search zettels", e))?;

    Ok(Json(serde_json::json!({
        "query": text,
        "results": results
    })))
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    limit: Option<usize>,
}

async fn history(
    State(state): State<AppState>,
    query: Option<Query<ListQuery>>,
) -> Result<impl IntoResponse, ApiError> {
    let params = query.map(|q| q.0).unwrap_or_default();
    let limit = params.limit.unwrap_or(20).clamp(1, 200);

    let db = state.db.lock().await;
    let entries = db
        .history(limit)
        .map_err(|e| store_error("Failed to load history", e))?;

    Ok(Json(serde_json::json!({ "history": entries })))
}
