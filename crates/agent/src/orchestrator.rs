//! The per-turn orchestration flow.

use crate::envelope::SseEnvelope;
use contextfabric_context::{ContextOptions, ContextService};
use contextfabric_core::message::{Message, TraceEvent};
use contextfabric_memory::{IngestRequest, MemoryService};
use contextfabric_providers::GatewayClient;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Pipeline trace actions the orchestrator suppresses when forwarding,
/// because the live stream re-emits the model interaction as it happens.
const LIVE_MODEL_ACTIONS: [&str; 4] = [
    "Send Model Request",
    "Model Inference",
    "Receive Model Response",
    "Response Complete",
];

/// One chat turn's inputs, as posted to the debug chat endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub query: String,
    #[serde(default)]
    pub agent_model_id: String,
    #[serde(default)]
    pub core_model_id: String,
    #[serde(default)]
    pub rag_enabled: bool,
    #[serde(default)]
    pub rag_embedding_model_id: String,
    #[serde(default)]
    pub sanitization_model_id: String,
}

/// Orchestrates one streaming chat turn end to end.
pub struct Orchestrator {
    context: Arc<ContextService>,
    gateway: Arc<GatewayClient>,
    memory: Arc<MemoryService>,
}

impl Orchestrator {
    pub fn new(
        context: Arc<ContextService>,
        gateway: Arc<GatewayClient>,
        memory: Arc<MemoryService>,
    ) -> Self {
        Self {
            context,
            gateway,
            memory,
        }
    }

    /// Run one turn, writing envelopes to `out` until the turn completes or
    /// the receiver goes away. The outbound channel closes when `out` drops.
    pub async fn chat(&self, request: ChatRequest, out: mpsc::Sender<SseEnvelope>) {
        info!(
            session = %request.session_id,
            model = %request.agent_model_id,
            rag = request.rag_enabled,
            "Chat turn started"
        );
        let start = std::time::Instant::now();
        let mut emitter = Emitter {
            out,
            collected: Vec::new(),
        };

        emitter
            .trace("Frontend", "Agent", "Receive Query", Some(json!(request.query)))
            .await;
        emitter
            .trace(
                "Agent",
                "Core",
                "Get Optimized Context",
                Some(json!({
                    "query": request.query,
                    "model_id": request.core_model_id,
                    "rag_enabled": request.rag_enabled,
                    "rag_embedding_model": request.rag_embedding_model_id,
                    "sanitization_model": request.sanitization_model_id,
                })),
            )
            .await;

        let options = ContextOptions {
            model_id: request.core_model_id.clone(),
            rag_enabled: request.rag_enabled,
            rag_embedding_model: request.rag_embedding_model_id.clone(),
        };
        let payload = match self
            .context
            .get_optimized_context(&request.session_id, &request.query, options)
            .await
        {
            Ok(payload) => payload,
            Err(e) => {
                error!(session = %request.session_id, error = %e, "Context assembly failed");
                emitter
                    .trace("Agent", "Frontend", "Error", Some(json!(e.to_string())))
                    .await;
                return;
            }
        };

        let mut needs_ingest = false;
        if let Some(last) = payload.last() {
            needs_ingest = last
                .meta
                .get("needs_ingest")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);

            for trace in &last.traces {
                if LIVE_MODEL_ACTIONS.contains(&trace.action.as_str()) {
                    continue;
                }
                emitter.forward(trace.clone()).await;
            }
            if !last.meta.is_empty() {
                emitter.meta(last.meta.clone()).await;
            }
        }

        let projection: Vec<_> = payload
            .iter()
            .map(|m| json!({ "role": m.role, "content": m.content }))
            .collect();
        emitter
            .trace("Core", "Agent", "Return Context", Some(json!(projection)))
            .await;

        let mut accumulated = String::new();
        // A clone to watch for receiver drop without borrowing the emitter.
        let watch_out = emitter.out.clone();
        match self.gateway.stream(&request.agent_model_id, &payload).await {
            Ok(mut rx) => loop {
                tokio::select! {
                    // Client went away; finalize with whatever arrived.
                    _ = watch_out.closed() => {
                        warn!(session = %request.session_id, "Client cancelled mid-stream");
                        emitter.trace("Agent", "System", "Context Cancelled", None).await;
                        break;
                    }
                    chunk = rx.recv() => match chunk {
                        Some(Ok(chunk)) => {
                            if let Some(trace) = chunk.trace {
                                emitter.forward(trace).await;
                            }
                            if let Some(content) = chunk.content {
                                accumulated.push_str(&content);
                                emitter.chunk(content).await;
                            }
                        }
                        Some(Err(e)) => {
                            error!(session = %request.session_id, error = %e, "Gateway stream error");
                            emitter.chunk(format!("[Agent Error] {e}")).await;
                            break;
                        }
                        None => break, // normal end of stream
                    },
                }
            },
            Err(e) => {
                error!(session = %request.session_id, error = %e, "Gateway stream failed to open");
                emitter.chunk(format!("[Agent Error] {e}")).await;
            }
        }

        self.finalize(&request, accumulated, emitter, needs_ingest, start)
            .await;
    }

    /// Persist the assistant turn. Runs exactly once per chat call.
    async fn finalize(
        &self,
        request: &ChatRequest,
        accumulated: String,
        mut emitter: Emitter,
        needs_ingest: bool,
        start: std::time::Instant,
    ) {
        let duration_ms = start.elapsed().as_millis() as u64;
        if accumulated.is_empty() {
            info!(session = %request.session_id, duration_ms, "Chat turn ended with no content");
            return;
        }
        info!(
            session = %request.session_id,
            duration_ms,
            response_len = accumulated.len(),
            "Chat turn complete"
        );

        emitter
            .trace("Agent", "Core", "Append Assistant Message", None)
            .await;

        let mut message = Message::assistant(accumulated);
        message.traces = emitter.collected.clone();

        match self
            .context
            .append_message(&request.session_id, message)
            .await
        {
            Ok(meta) => {
                emitter.meta(meta).await;
            }
            Err(e) => {
                // The envelopes already delivered are authoritative.
                error!(session = %request.session_id, error = %e, "Failed to persist assistant message");
            }
        }

        if needs_ingest {
            self.enqueue_ingest(request).await;
        }
    }

    /// Best-effort: hand the whole dialogue to the memory service.
    async fn enqueue_ingest(&self, request: &ChatRequest) {
        let session = match self.context.history().get(&request.session_id).await {
            Ok(session) => session,
            Err(e) => {
                warn!(session = %request.session_id, error = %e, "Ingest skipped: session unreadable");
                return;
            }
        };
        let result = self.memory.ingest(IngestRequest {
            session_id: request.session_id.clone(),
            messages: session.messages,
            embedding_model: request.rag_embedding_model_id.clone(),
            sanitize_model: request.sanitization_model_id.clone(),
        });
        if let Err(e) = result {
            warn!(session = %request.session_id, error = %e, "Ingest task dropped");
        }
    }
}

/// Sends envelopes and accumulates successfully-sent traces for the final
/// persisted message. A failed send means the receiver is gone; the event
/// is neither delivered nor collected.
struct Emitter {
    out: mpsc::Sender<SseEnvelope>,
    collected: Vec<TraceEvent>,
}

impl Emitter {
    async fn trace(
        &mut self,
        source: &str,
        target: &str,
        action: &str,
        data: Option<serde_json::Value>,
    ) {
        self.forward(TraceEvent::new(source, target, action, data))
            .await;
    }

    /// Forward a trace event, stamping a missing timestamp.
    async fn forward(&mut self, mut trace: TraceEvent) {
        if trace.timestamp == chrono::DateTime::UNIX_EPOCH {
            trace.timestamp = chrono::Utc::now();
        }
        if self
            .out
            .send(SseEnvelope::Trace {
                trace: trace.clone(),
            })
            .await
            .is_ok()
        {
            self.collected.push(trace);
        }
    }

    async fn chunk(&mut self, content: String) {
        let _ = self.out.send(SseEnvelope::Chunk { content }).await;
    }

    async fn meta(&mut self, meta: serde_json::Map<String, serde_json::Value>) {
        let _ = self.out.send(SseEnvelope::Meta { meta }).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};
    use contextfabric_config::AppConfig;
    use contextfabric_context::HistoryService;
    use contextfabric_memory::MemoryOptions;
    use contextfabric_pipeline::passes::standard_chain;
    use contextfabric_pipeline::TokenCounter;
    use contextfabric_storage::{FileSessionStore, QdrantStore};
    use serde_json::Value;
    use tempfile::tempdir;

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    struct Fixture {
        orchestrator: Orchestrator,
        history: HistoryService,
        memory: Arc<MemoryService>,
    }

    fn fixture(dir: &tempfile::TempDir, gateway_url: &str) -> Fixture {
        let config = AppConfig::default();
        let sessions = Arc::new(FileSessionStore::new(dir.path()).unwrap());
        let vectors = Arc::new(QdrantStore::new(
            "http://127.0.0.1:1",
            "mem_staging",
            "mem_shared",
        ));
        let gateway = Arc::new(GatewayClient::new(gateway_url));
        let memory = MemoryService::new(
            vectors.clone(),
            gateway.clone(),
            MemoryOptions::from_config(&config),
        );
        let counter = Arc::new(TokenCounter::estimator());
        let pipeline = standard_chain(
            &config,
            sessions.clone(),
            vectors,
            gateway.clone(),
            memory.clone(),
            counter.clone(),
        );
        let history = HistoryService::new(sessions);
        let context = Arc::new(ContextService::new(history.clone(), pipeline, counter));
        Fixture {
            orchestrator: Orchestrator::new(context, gateway, memory.clone()),
            history,
            memory,
        }
    }

    fn request(session: &str) -> ChatRequest {
        ChatRequest {
            session_id: session.into(),
            query: "hi".into(),
            agent_model_id: "agent-model".into(),
            core_model_id: "core-model".into(),
            rag_enabled: false,
            rag_embedding_model_id: String::new(),
            sanitization_model_id: String::new(),
        }
    }

    /// Gateway whose chat stream emits A, B, C and then ends normally;
    /// memory endpoints answer so the post-stream ingest can run.
    fn happy_gateway() -> Router {
        async fn chat() -> impl IntoResponse {
            let body = concat!(
                "data: {\"choices\":[{\"delta\":{\"content\":\"A\"}}]}\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"B\"}}]}\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"C\"}}]}\n",
                "data: [DONE]\n",
            );
            ([(header::CONTENT_TYPE, "text/event-stream")], body)
        }
        async fn sanitize(Json(_): Json<Value>) -> Json<Value> {
            Json(json!({ "facts": [] }))
        }
        async fn embed(Json(_): Json<Value>) -> Json<Value> {
            Json(json!({ "data": [{ "embedding": [0.1] }] }))
        }
        Router::new()
            .route("/v1/chat/completions", post(chat))
            .route("/v1/memory/sanitize", post(sanitize))
            .route("/v1/embeddings", post(embed))
    }

    async fn drain(mut rx: mpsc::Receiver<SseEnvelope>) -> Vec<SseEnvelope> {
        let mut envelopes = Vec::new();
        while let Some(env) = rx.recv().await {
            envelopes.push(env);
        }
        envelopes
    }

    #[tokio::test]
    async fn full_turn_streams_chunks_then_meta_then_closes() {
        let dir = tempdir().unwrap();
        let url = spawn(happy_gateway()).await;
        let Fixture { orchestrator, .. } = fixture(&dir, &url);

        let (tx, rx) = mpsc::channel(1);
        let turn = tokio::spawn({
            let req = request("s1");
            async move { orchestrator.chat(req, tx).await }
        });

        let envelopes = drain(rx).await;
        turn.await.unwrap();

        let chunks: Vec<String> = envelopes
            .iter()
            .filter_map(|e| match e {
                SseEnvelope::Chunk { content } => Some(content.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(chunks, ["A", "B", "C"]);

        // First envelope is the receive-query trace.
        match &envelopes[0] {
            SseEnvelope::Trace { trace } => {
                assert_eq!(trace.source, "Frontend");
                assert_eq!(trace.action, "Receive Query");
            }
            other => panic!("expected trace, got {other:?}"),
        }

        // The pipeline's Complete traces were forwarded before streaming.
        let forwarded: Vec<String> = envelopes
            .iter()
            .filter_map(|e| match e {
                SseEnvelope::Trace { trace } => Some(trace.action.clone()),
                _ => None,
            })
            .collect();
        assert!(forwarded.iter().filter(|a| *a == "Complete").count() >= 7);
        assert!(forwarded.contains(&"Append Assistant Message".to_string()));

        // The final envelope is the persistence meta.
        match envelopes.last().unwrap() {
            SseEnvelope::Meta { meta } => {
                assert!(meta.contains_key("tokens_total"));
            }
            other => panic!("expected meta last, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn assistant_message_persisted_with_traces() {
        let dir = tempdir().unwrap();
        let url = spawn(happy_gateway()).await;
        let Fixture {
            orchestrator,
            history,
            memory,
        } = fixture(&dir, &url);

        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn({
            let req = request("s1");
            async move { orchestrator.chat(req, tx).await }
        });
        drain(rx).await;
        handle.await.unwrap();

        let session = history.get("s1").await.unwrap();
        assert_eq!(session.messages.len(), 2);
        let assistant = &session.messages[1];
        assert_eq!(assistant.content, "ABC");
        assert!(!assistant.traces.is_empty());
        assert!(assistant
            .traces
            .iter()
            .any(|t| t.action == "Append Assistant Message"));

        // The sanitizer flag triggered a background ingest of the dialogue.
        memory.shutdown().await;
        let state = memory.state().await;
        assert_eq!(state.last_ingest_session, "s1");
        assert_eq!(state.last_ingest_input_count, 2);
    }

    #[tokio::test]
    async fn cancellation_mid_stream_still_persists_accumulated_content() {
        // Stream A, B, C then hang without [DONE]; the client cancels.
        async fn chat() -> impl IntoResponse {
            let (tx, rx) = mpsc::channel::<Result<String, std::convert::Infallible>>(4);
            tokio::spawn(async move {
                let head = concat!(
                    "data: {\"choices\":[{\"delta\":{\"content\":\"A\"}}]}\n",
                    "data: {\"choices\":[{\"delta\":{\"content\":\"B\"}}]}\n",
                    "data: {\"choices\":[{\"delta\":{\"content\":\"C\"}}]}\n",
                );
                let _ = tx.send(Ok(head.to_string())).await;
                // Keep the stream open so only cancellation ends the turn.
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            });
            let body = axum::body::Body::from_stream(
                tokio_stream::wrappers::ReceiverStream::new(rx),
            );
            ([(header::CONTENT_TYPE, "text/event-stream")], body)
        }

        let router = Router::new()
            .route("/v1/chat/completions", post(chat))
            .route(
                "/v1/memory/sanitize",
                post(|| async { Json(json!({ "facts": [] })) }),
            );
        let dir = tempdir().unwrap();
        let url = spawn(router).await;
        let Fixture {
            orchestrator,
            history,
            ..
        } = fixture(&dir, &url);

        let (tx, mut rx) = mpsc::channel(1);
        let handle = tokio::spawn({
            let req = request("s1");
            async move { orchestrator.chat(req, tx).await }
        });

        // Read until all three chunks arrived, then cancel by dropping rx.
        let mut seen = String::new();
        while seen != "ABC" {
            match rx.recv().await.expect("stream ended early") {
                SseEnvelope::Chunk { content } => seen.push_str(&content),
                _ => {}
            }
        }
        drop(rx);

        // The orchestrator notices the closed channel and finalizes once.
        handle.await.unwrap();

        let session = history.get("s1").await.unwrap();
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[1].content, "ABC");
    }

    #[tokio::test]
    async fn gateway_error_emits_agent_error_chunk_without_persisting() {
        let dir = tempdir().unwrap();
        let Fixture {
            orchestrator,
            history,
            ..
        } = fixture(&dir, "http://127.0.0.1:1");

        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn({
            let req = request("s1");
            async move { orchestrator.chat(req, tx).await }
        });
        let envelopes = drain(rx).await;
        handle.await.unwrap();

        let error_chunk = envelopes.iter().find_map(|e| match e {
            SseEnvelope::Chunk { content } => Some(content.clone()),
            _ => None,
        });
        assert!(error_chunk.unwrap().starts_with("[Agent Error] "));

        // No assistant message was persisted.
        let session = history.get("s1").await.unwrap();
        assert_eq!(session.messages.len(), 1);
    }

    #[test]
    fn live_model_actions_are_blacklisted() {
        for action in LIVE_MODEL_ACTIONS {
            assert!(LIVE_MODEL_ACTIONS.contains(&action));
        }
        assert!(!LIVE_MODEL_ACTIONS.contains(&"Complete"));
        assert!(!LIVE_MODEL_ACTIONS.contains(&"Receive Query"));
    }
}
