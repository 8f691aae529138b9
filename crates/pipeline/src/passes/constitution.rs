//! Constitution — inject long-term and recent memories (DEMA retrieval).

use crate::{Blackboard, Pass};
use async_trait::async_trait;
use contextfabric_core::error::PipelineError;
use contextfabric_core::message::Message;
use contextfabric_memory::MemoryService;
use std::sync::Arc;
use tracing::{debug, warn};

/// Retrieves the top shared memories and staging facts for the latest user
/// query and prepends them as one system message before the terminal turn.
///
/// Empty retrieval or any failure is a silent no-op.
pub struct ConstitutionPass {
    memory: Arc<MemoryService>,
}

impl ConstitutionPass {
    pub fn new(memory: Arc<MemoryService>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Pass for ConstitutionPass {
    fn name(&self) -> &str {
        "Constitution"
    }

    fn description(&self) -> &str {
        "注入长期记忆与近期事实 (DEMA)"
    }

    async fn run(&self, bb: &mut Blackboard) -> Result<(), PipelineError> {
        let Some(query) = bb.last_user_query().map(String::from) else {
            return Ok(());
        };
        debug!(query = %query, "Constitution: building memory context");

        let model = bb.meta_str("rag_embedding_model").to_string();
        let vector = match self.memory.get_embedding(&query, &model).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Constitution: embedding failed");
                return Ok(());
            }
        };

        let (shared, staging) = match self.memory.retrieve(&vector).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Constitution: retrieval failed");
                return Ok(());
            }
        };
        debug!(
            shared = shared.len(),
            staging = staging.len(),
            "Constitution: retrieval complete"
        );

        let mut sections = String::new();
        if !shared.is_empty() {
            sections.push_str("### 核心事实与偏好 (长期)\n");
            for memory in &shared {
                sections.push_str(&format!("- {}\n", memory.content));
            }
        }
        if !staging.is_empty() {
            if !sections.is_empty() {
                sections.push('\n');
            }
            sections.push_str("### 相关近期事件 (暂存)\n");
            for fact in &staging {
                sections.push_str(&format!("- {}\n", fact.content));
            }
        }
        if sections.is_empty() {
            return Ok(());
        }

        bb.insert_before_last(Message::system(format!(
            "这是从你的长期记忆和近期交互中提取的背景信息，请在回复时参考：\n\n{sections}"
        )));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::routing::post;
    use axum::{Json, Router};
    use contextfabric_core::message::Role;
    use contextfabric_memory::MemoryOptions;
    use contextfabric_providers::GatewayClient;
    use contextfabric_storage::QdrantStore;
    use serde_json::{json, Value};
    use std::time::Duration;

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn memory_with(gateway_url: &str, qdrant_url: &str) -> Arc<MemoryService> {
        MemoryService::new(
            Arc::new(QdrantStore::new(qdrant_url, "mem_staging", "mem_shared")),
            Arc::new(GatewayClient::new(gateway_url)),
            MemoryOptions {
                reflection_model: "arbiter".into(),
                sanitize_model: "deepseek-chat".into(),
                default_embedding_model: "text-embedding-3-small".into(),
                reflection_interval: Duration::from_secs(3600),
            },
        )
    }

    #[tokio::test]
    async fn injects_both_sections_before_terminal() {
        async fn embed(Json(_): Json<Value>) -> Json<Value> {
            Json(json!({ "data": [{ "embedding": [0.2, 0.8] }] }))
        }
        async fn search(Path(c): Path<String>, Json(_): Json<Value>) -> Json<Value> {
            if c == "mem_shared" {
                Json(json!({ "result": [
                    { "id": "m1", "score": 0.9, "payload": {
                        "content": "用户是 Rust 工程师", "topic": "profile",
                        "confidence": 1.0, "version": 1, "status": "active" } }
                ]}))
            } else {
                Json(json!({ "result": [
                    { "id": "f1", "score": 0.8, "payload": {
                        "content": "昨天讨论过管线设计", "source_session": "s0",
                        "created_at": 1700000000, "status": "pending" } }
                ]}))
            }
        }
        let gateway = spawn(Router::new().route("/v1/embeddings", post(embed))).await;
        let qdrant =
            spawn(Router::new().route("/collections/{c}/points/search", post(search))).await;

        let pass = ConstitutionPass::new(memory_with(&gateway, &qdrant));
        let mut bb = Blackboard::new("s1");
        bb.messages.push(Message::user("继续昨天的话题"));
        pass.run(&mut bb).await.unwrap();

        assert_eq!(bb.messages.len(), 2);
        let injected = &bb.messages[0];
        assert_eq!(injected.role, Role::System);
        assert!(injected.content.contains("### 核心事实与偏好 (长期)"));
        assert!(injected.content.contains("- 用户是 Rust 工程师"));
        assert!(injected.content.contains("### 相关近期事件 (暂存)"));
        assert!(injected.content.contains("- 昨天讨论过管线设计"));
        assert_eq!(bb.messages[1].role, Role::User);
    }

    #[tokio::test]
    async fn empty_retrieval_is_silent_noop() {
        async fn embed(Json(_): Json<Value>) -> Json<Value> {
            Json(json!({ "data": [{ "embedding": [0.2] }] }))
        }
        async fn search(Json(_): Json<Value>) -> Json<Value> {
            Json(json!({ "result": [] }))
        }
        let gateway = spawn(Router::new().route("/v1/embeddings", post(embed))).await;
        let qdrant =
            spawn(Router::new().route("/collections/{c}/points/search", post(search))).await;

        let pass = ConstitutionPass::new(memory_with(&gateway, &qdrant));
        let mut bb = Blackboard::new("s1");
        bb.messages.push(Message::user("hello"));
        pass.run(&mut bb).await.unwrap();
        assert_eq!(bb.messages.len(), 1);
    }

    #[tokio::test]
    async fn failure_is_silent_noop() {
        let pass = ConstitutionPass::new(memory_with("http://127.0.0.1:1", "http://127.0.0.1:1"));
        let mut bb = Blackboard::new("s1");
        bb.messages.push(Message::user("hello"));
        pass.run(&mut bb).await.unwrap();
        assert_eq!(bb.messages.len(), 1);
        assert!(bb.traces.is_empty());
    }
}
