//! HTTP edge for ContextFabric.
//!
//! Routes:
//!
//! - `POST /api/debug/chat`      — streaming chat turn (`text/event-stream`)
//! - `POST /api/v1/context`      — optimized payload for one turn
//! - `POST /api/v1/messages`     — append a message, get token stats
//! - `POST /api/v1/sessions`     — create a session
//! - `GET  /api/admin/sessions`  — session summaries (+ per-id get/rename/delete)
//! - `GET  /api/admin/memory/state` — memory subsystem snapshot
//! - `GET  /api/admin/vectors`   — scroll a vector collection
//! - `GET  /api/admin/status`    — dependency health
//! - `GET  /health`
//!
//! Built on Axum with permissive CORS (the edge fronts a browser UI) and
//! request tracing.

mod admin;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use contextfabric_agent::{ChatRequest, Orchestrator, SseEnvelope};
use contextfabric_config::AppConfig;
use contextfabric_context::{ContextOptions, ContextService, HistoryService};
use contextfabric_core::error::{Error, StorageError};
use contextfabric_core::message::{Message, Session};
use contextfabric_memory::{MemoryOptions, MemoryService};
use contextfabric_pipeline::passes::standard_chain;
use contextfabric_pipeline::TokenCounter;
use contextfabric_providers::GatewayClient;
use contextfabric_storage::{FileSessionStore, QdrantStore};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application state for the edge.
pub struct AppState {
    pub config: AppConfig,
    pub context: Arc<ContextService>,
    pub orchestrator: Arc<Orchestrator>,
    pub memory: Arc<MemoryService>,
    pub vectors: Arc<QdrantStore>,
}

pub type SharedState = Arc<AppState>;

/// Wire every subsystem from configuration.
///
/// Build order mirrors the dependency graph: stores → gateway client →
/// memory service → pipeline → context service → orchestrator.
pub fn build_state(config: AppConfig) -> Result<SharedState, Error> {
    let sessions = Arc::new(FileSessionStore::new(&config.sessions_dir)?);
    let vectors = Arc::new(QdrantStore::new(
        config.qdrant_url.clone(),
        config.staging_collection.clone(),
        config.shared_collection.clone(),
    ));
    let gateway = Arc::new(GatewayClient::new(config.llm_service_url.clone()));
    let memory = MemoryService::new(
        vectors.clone(),
        gateway.clone(),
        MemoryOptions::from_config(&config),
    );
    let counter = Arc::new(TokenCounter::new());
    let pipeline = standard_chain(
        &config,
        sessions.clone(),
        vectors.clone(),
        gateway.clone(),
        memory.clone(),
        counter.clone(),
    );
    let context = Arc::new(ContextService::new(
        HistoryService::new(sessions),
        pipeline,
        counter,
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        context.clone(),
        gateway,
        memory.clone(),
    ));

    Ok(Arc::new(AppState {
        config,
        context,
        orchestrator,
        memory,
        vectors,
    }))
}

/// Build the full router with CORS and request tracing.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/debug/chat", post(debug_chat_handler))
        .route("/api/v1/context", post(context_handler))
        .route("/api/v1/messages", post(append_message_handler))
        .route("/api/v1/sessions", post(create_session_handler))
        .merge(admin::admin_router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the edge server; resolves when the listener stops.
pub async fn serve(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = config.bind_addr();
    let state = build_state(config)?;
    let memory = state.memory.clone();
    let app = build_router(state);

    info!(addr = %addr, "ContextFabric edge starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
            memory.shutdown().await;
        })
        .await?;
    Ok(())
}

// ── Handlers ──────────────────────────────────────────────────────────────

#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `POST /api/debug/chat` — run one streaming turn.
///
/// The outbound channel is capacity-1: a slow client back-pressures the
/// gateway reader instead of buffering the model's output.
async fn debug_chat_handler(
    State(state): State<SharedState>,
    Json(request): Json<ChatRequest>,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    let (tx, rx) = tokio::sync::mpsc::channel::<SseEnvelope>(1);
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        orchestrator.chat(request, tx).await;
    });

    let stream = ReceiverStream::new(rx).map(|envelope| {
        let data = serde_json::to_string(&envelope).unwrap_or_default();
        Ok(SseEvent::default().data(data))
    });
    Sse::new(stream)
}

#[derive(Deserialize)]
struct ContextRequest {
    session_id: String,
    query: String,
    #[serde(default)]
    model_id: String,
    #[serde(default)]
    rag_enabled: bool,
    #[serde(default)]
    rag_embedding_model: String,
}

#[derive(serde::Serialize)]
struct ContextResponse {
    messages: Vec<Message>,
}

async fn context_handler(
    State(state): State<SharedState>,
    Json(request): Json<ContextRequest>,
) -> Result<Json<ContextResponse>, (StatusCode, String)> {
    let options = ContextOptions {
        model_id: request.model_id,
        rag_enabled: request.rag_enabled,
        rag_embedding_model: request.rag_embedding_model,
    };
    let messages = state
        .context
        .get_optimized_context(&request.session_id, &request.query, options)
        .await
        .map_err(internal_error)?;
    Ok(Json(ContextResponse { messages }))
}

#[derive(Deserialize)]
struct AppendRequest {
    session_id: String,
    message: Message,
}

async fn append_message_handler(
    State(state): State<SharedState>,
    Json(request): Json<AppendRequest>,
) -> Result<(StatusCode, Json<serde_json::Map<String, serde_json::Value>>), (StatusCode, String)> {
    let meta = state
        .context
        .append_message(&request.session_id, request.message)
        .await
        .map_err(status_for)?;
    Ok((StatusCode::CREATED, Json(meta)))
}

#[derive(Deserialize)]
struct CreateSessionRequest {
    #[serde(default)]
    app_id: String,
}

async fn create_session_handler(
    State(state): State<SharedState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<Json<Session>, (StatusCode, String)> {
    let session = state
        .context
        .create_session(&request.app_id)
        .await
        .map_err(internal_error)?;
    Ok(Json(session))
}

fn status_for(err: Error) -> (StatusCode, String) {
    match &err {
        Error::Storage(StorageError::NotFound(_)) => (StatusCode::NOT_FOUND, err.to_string()),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

fn internal_error(err: Error) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tempfile::tempdir;
    use tower::ServiceExt;

    fn test_state(dir: &tempfile::TempDir) -> SharedState {
        let config = AppConfig {
            sessions_dir: dir.path().to_path_buf(),
            qdrant_url: "http://127.0.0.1:1".into(),
            llm_service_url: "http://127.0.0.1:1".into(),
            ..AppConfig::default()
        };
        build_state(config).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let dir = tempdir().unwrap();
        let app = build_router(test_state(&dir));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn create_session_returns_entity() {
        let dir = tempdir().unwrap();
        let app = build_router(test_state(&dir));

        let response = app
            .oneshot(post_json("/api/v1/sessions", json!({ "app_id": "demo" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert!(body["id"].as_str().unwrap().starts_with("session-"));
        assert_eq!(body["app_id"], "demo");
    }

    #[tokio::test]
    async fn context_endpoint_returns_payload_with_traces() {
        let dir = tempdir().unwrap();
        let app = build_router(test_state(&dir));

        let response = app
            .oneshot(post_json(
                "/api/v1/context",
                json!({ "session_id": "s1", "query": "hi", "rag_enabled": false }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[1]["content"], "hi");
        assert!(messages[1]["meta"]["tokens_total"].is_number());
        assert!(!messages[1]["traces"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn append_to_missing_session_is_404() {
        let dir = tempdir().unwrap();
        let app = build_router(test_state(&dir));

        let response = app
            .oneshot(post_json(
                "/api/v1/messages",
                json!({
                    "session_id": "ghost",
                    "message": { "role": "assistant", "content": "x",
                                 "timestamp": "2026-01-01T00:00:00Z" }
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn append_returns_created_with_token_meta() {
        let dir = tempdir().unwrap();
        let app = build_router(test_state(&dir));

        // Materialize the session via the context endpoint first.
        app.clone()
            .oneshot(post_json(
                "/api/v1/context",
                json!({ "session_id": "s1", "query": "hello" }),
            ))
            .await
            .unwrap();

        let response = app
            .oneshot(post_json(
                "/api/v1/messages",
                json!({
                    "session_id": "s1",
                    "message": { "role": "assistant", "content": "a reply",
                                 "timestamp": "2026-01-01T00:00:00Z" }
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        assert_eq!(body["tokens_max"], 4000);
    }

    #[tokio::test]
    async fn memory_state_endpoint() {
        let dir = tempdir().unwrap();
        let app = build_router(test_state(&dir));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/admin/memory/state")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["ingest_queue_size"], 0);
        assert_eq!(body["is_reflecting"], false);
    }

    #[tokio::test]
    async fn admin_session_lifecycle() {
        let dir = tempdir().unwrap();
        let app = build_router(test_state(&dir));

        // Create two sessions through the context flow.
        for id in ["s1", "s2"] {
            app.clone()
                .oneshot(post_json(
                    "/api/v1/context",
                    json!({ "session_id": id, "query": "hi" }),
                ))
                .await
                .unwrap();
        }

        let list = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/admin/sessions")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(json_body(list).await.as_array().unwrap().len(), 2);

        // Rename s1.
        let rename = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PATCH")
                    .uri("/api/admin/sessions/s1")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({ "name": "renamed" }).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(rename.status(), StatusCode::OK);

        let fetched = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/admin/sessions/s1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(json_body(fetched).await["name"], "renamed");

        // Delete s2.
        let delete = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/admin/sessions/s2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(delete.status(), StatusCode::OK);

        let list = app
            .oneshot(
                Request::builder()
                    .uri("/api/admin/sessions")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(json_body(list).await.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn admin_vectors_requires_collection_param() {
        let dir = tempdir().unwrap();
        let app = build_router(test_state(&dir));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/admin/vectors")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn admin_status_reports_disconnected_qdrant() {
        let dir = tempdir().unwrap();
        let app = build_router(test_state(&dir));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/admin/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["qdrant"]["status"], "disconnected");
    }

    #[tokio::test]
    async fn debug_chat_streams_envelopes() {
        // The gateway is unreachable, so the turn degrades to an error
        // chunk — but the SSE contract still holds: trace envelopes, the
        // error chunk, then a clean close.
        let dir = tempdir().unwrap();
        let app = build_router(test_state(&dir));

        let response = app
            .oneshot(post_json(
                "/api/debug/chat",
                json!({ "session_id": "s1", "query": "hi" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(content_type.starts_with("text/event-stream"));

        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        let body = String::from_utf8_lossy(&bytes);
        assert!(body.contains(r#"data: {"type":"trace""#));
        assert!(body.contains("Receive Query"));
        assert!(body.contains("[Agent Error] "));
    }
}
