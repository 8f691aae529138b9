//! Retrieval-augmented generation — best-effort document injection.

use crate::{Blackboard, Pass};
use async_trait::async_trait;
use contextfabric_core::error::PipelineError;
use contextfabric_core::message::Message;
use contextfabric_providers::GatewayClient;
use contextfabric_storage::QdrantStore;
use serde_json::json;
use std::sync::Arc;

const TOP_K: usize = 3;

/// Embeds the latest user query, searches the document collection, and
/// injects the hits as a system message right before the terminal message.
///
/// Runs only when `rag_enabled` is set; every failure degrades to an
/// internal trace and a successful no-op.
pub struct RagPass {
    gateway: Arc<GatewayClient>,
    store: Arc<QdrantStore>,
    collection: String,
    default_model: String,
}

impl RagPass {
    pub fn new(
        gateway: Arc<GatewayClient>,
        store: Arc<QdrantStore>,
        collection: String,
        default_model: String,
    ) -> Self {
        Self {
            gateway,
            store,
            collection,
            default_model,
        }
    }
}

#[async_trait]
impl Pass for RagPass {
    fn name(&self) -> &str {
        "RAGPass"
    }

    fn description(&self) -> &str {
        "检索增强生成 (RAG)"
    }

    async fn run(&self, bb: &mut Blackboard) -> Result<(), PipelineError> {
        if !bb.meta_bool("rag_enabled") {
            return Ok(());
        }

        let model = {
            let m = bb.meta_str("rag_embedding_model");
            if m.is_empty() {
                self.default_model.clone()
            } else {
                m.to_string()
            }
        };

        let Some(query) = bb.last_user_query().map(String::from) else {
            return Ok(());
        };

        let vector = match self.gateway.embed(&model, &query).await {
            Ok(v) => v,
            Err(e) => {
                bb.push_trace(
                    "RAGPass",
                    "",
                    "EmbeddingError",
                    Some(json!({ "error": e.to_string() })),
                );
                return Ok(());
            }
        };

        let hits = match self.store.search(&self.collection, &vector, TOP_K).await {
            Ok(hits) => hits,
            Err(e) => {
                bb.push_trace(
                    "RAGPass",
                    "",
                    "SearchError",
                    Some(json!({ "error": e.to_string() })),
                );
                return Ok(());
            }
        };

        let snippets: Vec<String> = hits
            .iter()
            .filter_map(|h| h.payload.get("content").and_then(|v| v.as_str()))
            .map(String::from)
            .collect();
        if snippets.is_empty() {
            return Ok(());
        }

        let mut knowledge = String::new();
        for snippet in &snippets {
            knowledge.push_str(&format!("---\n{snippet}\n"));
        }

        bb.meta.insert("rag_context".into(), json!(knowledge));
        bb.insert_before_last(Message::system(format!(
            "以下是检索到的参考信息，请结合这些信息回答用户问题：\n\n{knowledge}"
        )));

        bb.push_trace(
            "RAGPass",
            "Qdrant",
            "SearchComplete",
            Some(json!({ "count": snippets.len() })),
        );
        Ok(())
    }
}
