//! The context service — the per-turn assembly entry point.

use crate::collapse::collapse_traces;
use crate::history::HistoryService;
use contextfabric_core::error::Error;
use contextfabric_core::message::{Message, Session};
use contextfabric_pipeline::{Blackboard, Pipeline, TokenCounter};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Per-turn options carried into the pipeline's metadata map.
#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    pub model_id: String,
    pub rag_enabled: bool,
    pub rag_embedding_model: String,
}

/// Assembles optimized payloads and maintains token statistics on append.
pub struct ContextService {
    history: HistoryService,
    pipeline: Pipeline,
    counter: Arc<TokenCounter>,
}

impl ContextService {
    /// Token budget used for append-time statistics and the final pass.
    const MAX_TOKENS: usize = 4000;

    pub fn new(history: HistoryService, pipeline: Pipeline, counter: Arc<TokenCounter>) -> Self {
        Self {
            history,
            pipeline,
            counter,
        }
    }

    pub fn history(&self) -> &HistoryService {
        &self.history
    }

    /// Create a fresh session for an application.
    pub async fn create_session(&self, app_id: &str) -> Result<Session, Error> {
        let id = format!("session-{}", Uuid::new_v4());
        Ok(self.history.get_or_create(&id, app_id).await?)
    }

    /// Append a message to a session and refresh its token statistics.
    ///
    /// Returns the metadata written onto the appended message. The session
    /// must exist.
    pub async fn append_message(
        &self,
        session_id: &str,
        message: Message,
    ) -> Result<serde_json::Map<String, serde_json::Value>, Error> {
        self.history.append(session_id, message).await?;

        let session = self.history.get(session_id).await?;
        let tokens = self.selected_token_count(&session);
        let mut meta = serde_json::Map::new();
        meta.insert("tokens_total".into(), json!(tokens));
        meta.insert("tokens_max".into(), json!(Self::MAX_TOKENS));

        self.history
            .update_last_message(session_id, meta.clone(), Vec::new())
            .await?;
        debug!(session = session_id, tokens, "Message appended");
        Ok(meta)
    }

    /// Produce the optimized payload for one turn.
    ///
    /// The user message is appended *before* the pipeline runs, so session
    /// history is atomic at turn boundaries. The collapsed execution trace
    /// and the pipeline metadata are attached to the terminal payload
    /// message and persisted onto the stored user message.
    pub async fn get_optimized_context(
        &self,
        session_id: &str,
        query: &str,
        options: ContextOptions,
    ) -> Result<Vec<Message>, Error> {
        info!(session = session_id, rag = options.rag_enabled, "Assembling context");

        self.history.get_or_create(session_id, "auto").await?;
        self.history
            .append(session_id, Message::user(query))
            .await?;

        let mut blackboard = Blackboard::new(session_id);
        blackboard.meta.insert("query".into(), json!(query));
        blackboard
            .meta
            .insert("model_id".into(), json!(options.model_id));
        blackboard
            .meta
            .insert("rag_enabled".into(), json!(options.rag_enabled));
        blackboard.meta.insert(
            "rag_embedding_model".into(),
            json!(options.rag_embedding_model),
        );

        self.pipeline.execute(&mut blackboard).await?;

        let collapsed = collapse_traces(&blackboard.traces);
        let meta = blackboard.meta.clone();

        let mut messages = blackboard.messages;
        if let Some(last) = messages.last_mut() {
            last.meta = meta.clone();
            last.traces = collapsed.clone();
        }

        self.history
            .update_last_message(session_id, meta, collapsed)
            .await?;

        Ok(messages)
    }

    /// Greedy newest-first token accounting over a stored session, using
    /// the same budget the pipeline truncates to.
    fn selected_token_count(&self, session: &Session) -> usize {
        // Stats include the identity stub the payload will carry.
        let mut total = self.counter.count("ContextFabric Engine.");
        for message in session.messages.iter().rev() {
            let tokens = self.counter.count(&message.content);
            if total + tokens > Self::MAX_TOKENS {
                break;
            }
            total += tokens;
        }
        total
    }
}
