//! Semantic history compression via the gateway.

use crate::{Blackboard, Pass};
use async_trait::async_trait;
use contextfabric_core::error::PipelineError;
use contextfabric_core::message::Message;
use contextfabric_providers::GatewayClient;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Message count above which older turns are summarized.
const MAX_HISTORY: usize = 10;
/// Most recent messages kept verbatim.
const KEEP_RECENT: usize = 5;
/// Summary calls get a generous timeout.
const SUMMARY_TIMEOUT: Duration = Duration::from_secs(45);

/// Replaces older turns with a single LLM-written summary message.
///
/// Failure is a no-op on the payload: the message list is left untouched
/// byte-for-byte and only a `SummarizeError` internal trace is recorded.
pub struct SummarizerPass {
    gateway: Arc<GatewayClient>,
    model: String,
    max_history: usize,
    keep_recent: usize,
}

impl SummarizerPass {
    pub fn new(gateway: Arc<GatewayClient>, model: String) -> Self {
        Self::with_thresholds(gateway, model, MAX_HISTORY, KEEP_RECENT)
    }

    pub fn with_thresholds(
        gateway: Arc<GatewayClient>,
        model: String,
        max_history: usize,
        keep_recent: usize,
    ) -> Self {
        Self {
            gateway,
            model,
            max_history,
            keep_recent,
        }
    }
}

#[async_trait]
impl Pass for SummarizerPass {
    fn name(&self) -> &str {
        "Summarizer"
    }

    fn description(&self) -> &str {
        "LLM 语义摘要压缩"
    }

    async fn run(&self, bb: &mut Blackboard) -> Result<(), PipelineError> {
        if bb.messages.len() <= self.max_history {
            return Ok(());
        }
        let start = std::time::Instant::now();

        let split = bb.messages.len().saturating_sub(self.keep_recent);
        if split == 0 {
            return Ok(());
        }

        let mut history_text = String::new();
        for m in &bb.messages[..split] {
            history_text.push_str(&format!("{}: {}\n", m.role, m.content));
        }

        let prompt = format!(
            "请简要总结以下对话历史，提取核心事实、用户偏好和重要决策。\
             要求：简洁、客观，不超过 200 字。\n\n对话历史：\n{history_text}"
        );

        let summary = match self
            .gateway
            .complete(&self.model, &[Message::user(prompt)], SUMMARY_TIMEOUT)
            .await
        {
            Ok(summary) => summary,
            Err(e) => {
                bb.push_trace(
                    "Summarizer",
                    "LLMService",
                    "SummarizeError",
                    Some(json!({
                        "error": e.to_string(),
                        "model_id": self.model,
                        "msg_count": split,
                    })),
                );
                return Ok(());
            }
        };

        let mut summary_msg = Message::system(format!("[历史会话摘要]:\n{summary}"));
        summary_msg.meta.insert("is_summary".into(), json!(true));

        let recent = bb.messages.split_off(split);
        bb.messages = std::iter::once(summary_msg).chain(recent).collect();

        bb.push_trace(
            "Summarizer",
            "LLMService",
            "Summarized",
            Some(json!({
                "original_count": split,
                "duration_ms": start.elapsed().as_millis() as u64,
                "summary_length": summary.len(),
            })),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use contextfabric_core::message::Role;
    use serde_json::Value;

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn board_with_messages(n: usize) -> Blackboard {
        let mut bb = Blackboard::new("s1");
        for i in 0..n {
            if i % 2 == 0 {
                bb.messages.push(Message::user(format!("question {i}")));
            } else {
                bb.messages.push(Message::assistant(format!("answer {i}")));
            }
        }
        bb
    }

    #[tokio::test]
    async fn below_threshold_is_byte_for_byte_noop() {
        let pass = SummarizerPass::new(
            Arc::new(GatewayClient::new("http://127.0.0.1:1")),
            "sum".into(),
        );
        let mut bb = board_with_messages(10);
        let before = serde_json::to_string(&bb.messages).unwrap();
        pass.run(&mut bb).await.unwrap();
        let after = serde_json::to_string(&bb.messages).unwrap();
        assert_eq!(before, after);
        assert!(bb.traces.is_empty());
    }

    #[tokio::test]
    async fn gateway_failure_is_noop_with_error_trace() {
        let pass = SummarizerPass::new(
            Arc::new(GatewayClient::new("http://127.0.0.1:1")),
            "sum".into(),
        );
        let mut bb = board_with_messages(12);
        let before = serde_json::to_string(&bb.messages).unwrap();
        pass.run(&mut bb).await.unwrap();
        let after = serde_json::to_string(&bb.messages).unwrap();
        assert_eq!(before, after);

        let trace = bb
            .traces
            .iter()
            .find(|t| t.action == "SummarizeError")
            .unwrap();
        let data = trace.data.as_ref().unwrap();
        assert_eq!(data["model_id"], "sum");
        assert_eq!(data["msg_count"], 7);
    }

    #[tokio::test]
    async fn compresses_older_turns_into_summary() {
        async fn handler(Json(body): Json<Value>) -> Json<Value> {
            let prompt = body["messages"][0]["content"].as_str().unwrap();
            assert!(prompt.contains("请简要总结以下对话历史"));
            assert!(prompt.contains("user: question 0"));
            Json(json!({ "choices": [{ "message": { "content": "双方讨论了管线设计" } }] }))
        }
        let url = spawn(Router::new().route("/v1/chat/completions", post(handler))).await;

        let pass = SummarizerPass::new(Arc::new(GatewayClient::new(url)), "sum".into());
        let mut bb = board_with_messages(12);
        pass.run(&mut bb).await.unwrap();

        // One summary message plus the five most recent originals.
        assert_eq!(bb.messages.len(), 6);
        let summary = &bb.messages[0];
        assert_eq!(summary.role, Role::System);
        assert!(summary.content.starts_with("[历史会话摘要]:\n"));
        assert!(summary.content.contains("双方讨论了管线设计"));
        assert_eq!(summary.meta["is_summary"], json!(true));
        assert_eq!(bb.messages[1].content, "answer 7");
        assert_eq!(bb.messages[5].content, "answer 11");

        let trace = bb.traces.iter().find(|t| t.action == "Summarized").unwrap();
        assert_eq!(trace.data.as_ref().unwrap()["original_count"], 7);
    }
}
