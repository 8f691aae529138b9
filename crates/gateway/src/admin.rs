//! Operator-facing admin surface: session management, the memory state
//! snapshot, vector collection browsing, and dependency health.

use crate::SharedState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use contextfabric_core::error::StorageError;
use contextfabric_core::message::{Session, SessionSummary};
use contextfabric_memory::MemoryState;
use serde::Deserialize;
use serde_json::{json, Value};

pub fn admin_router() -> Router<SharedState> {
    Router::new()
        .route(
            "/api/admin/sessions",
            get(list_sessions).delete(delete_sessions_batch),
        )
        .route(
            "/api/admin/sessions/{id}",
            get(get_session).delete(delete_session).patch(rename_session),
        )
        .route("/api/admin/memory/state", get(memory_state))
        .route("/api/admin/vectors", get(scroll_vectors))
        .route("/api/admin/status", get(system_status))
}

async fn list_sessions(
    State(state): State<SharedState>,
) -> Result<Json<Vec<SessionSummary>>, (StatusCode, String)> {
    state
        .context
        .history()
        .list()
        .await
        .map(Json)
        .map_err(internal)
}

async fn get_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Session>, (StatusCode, String)> {
    state
        .context
        .history()
        .get(&id)
        .await
        .map(Json)
        .map_err(not_found_or_internal)
}

async fn delete_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .context
        .history()
        .delete(&id)
        .await
        .map(|_| StatusCode::OK)
        .map_err(not_found_or_internal)
}

async fn delete_sessions_batch(
    State(state): State<SharedState>,
    Json(ids): Json<Vec<String>>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .context
        .history()
        .delete_batch(&ids)
        .await
        .map(|_| StatusCode::OK)
        .map_err(internal)
}

#[derive(Deserialize)]
struct RenameRequest {
    name: String,
}

async fn rename_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(request): Json<RenameRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .context
        .history()
        .rename(&id, &request.name)
        .await
        .map(|_| StatusCode::OK)
        .map_err(not_found_or_internal)
}

async fn memory_state(State(state): State<SharedState>) -> Json<MemoryState> {
    Json(state.memory.state().await)
}

#[derive(Deserialize)]
struct VectorsQuery {
    #[serde(default)]
    collection: String,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    20
}

async fn scroll_vectors(
    State(state): State<SharedState>,
    Query(query): Query<VectorsQuery>,
) -> Result<Json<Value>, (StatusCode, String)> {
    if query.collection.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Missing collection parameter".into(),
        ));
    }
    state
        .vectors
        .scroll_page(&query.collection, query.limit, None)
        .await
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

async fn system_status(State(state): State<SharedState>) -> Json<Value> {
    let status = if state.vectors.healthz().await {
        "connected"
    } else {
        "disconnected"
    };
    Json(json!({
        "qdrant": {
            "status": status,
            "endpoint": state.config.qdrant_url,
        }
    }))
}

fn internal(err: StorageError) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

fn not_found_or_internal(err: StorageError) -> (StatusCode, String) {
    match err {
        StorageError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}
