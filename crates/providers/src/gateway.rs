//! OpenAI-shaped gateway client implementation.
//!
//! Endpoints used:
//! - `POST /v1/chat/completions` — summaries (non-stream) and the live
//!   token stream; stream lines may carry an embedded `trace` event
//! - `POST /v1/embeddings`
//! - `POST /v1/memory/sanitize` — dialogue → extracted facts
//! - `POST /v1/memory/reflect`  — fact + related memories → evolution
//!   instructions

use contextfabric_core::error::GatewayError;
use contextfabric_core::memory::{SharedMemory, StagingFact};
use contextfabric_core::message::{Message, TraceEvent};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// One unit read off the gateway's chat stream: a content delta, an
/// embedded trace event, or both absent (ignored by callers).
#[derive(Debug, Clone, Default)]
pub struct GatewayChunk {
    pub content: Option<String>,
    pub trace: Option<TraceEvent>,
}

/// A `{content, topic}` fact returned by the sanitize endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedFact {
    pub content: String,
    #[serde(default)]
    pub topic: String,
}

/// A shared-memory mutation ordered by the reflection arbiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionInstruction {
    pub action: String,
    #[serde(default)]
    pub fact_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Recognized instruction actions. Unknown actions are skipped by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionAction {
    Create,
    Evolve,
    Deprecate,
}

impl EvolutionInstruction {
    /// Parse the action label; `None` for anything unrecognized.
    pub fn parsed_action(&self) -> Option<InstructionAction> {
        match self.action.as_str() {
            "create" => Some(InstructionAction::Create),
            "evolve" => Some(InstructionAction::Evolve),
            "deprecate" => Some(InstructionAction::Deprecate),
            _ => None,
        }
    }
}

/// Client for the model gateway.
pub struct GatewayClient {
    base_url: String,
    client: reqwest::Client,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Non-streaming chat completion; returns the first choice's content.
    ///
    /// The per-request timeout bounds slow summary models.
    pub async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        timeout: Duration,
    ) -> Result<String, GatewayError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": model,
            "messages": to_api_messages(messages),
            "stream": false,
        });

        debug!(model, "Sending completion request");
        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let response = check_status(response).await?;
        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Network(format!("failed to parse completion: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| GatewayError::EmptyResponse("no completion content".into()))
    }

    /// Streaming chat completion.
    ///
    /// Returns a receiver of [`GatewayChunk`]s. The reader task parses SSE
    /// `data:` lines, skips `[DONE]` and unparseable lines, and exits when
    /// either the stream ends or the receiver is dropped.
    pub async fn stream(
        &self,
        model: &str,
        messages: &[Message],
    ) -> Result<tokio::sync::mpsc::Receiver<Result<GatewayChunk, GatewayError>>, GatewayError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": model,
            "messages": to_api_messages(messages),
            "stream": true,
        });

        debug!(model, "Opening chat stream");
        let response = self
            .client
            .post(&url)
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let response = check_status(response).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(GatewayError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim_end_matches('\r').to_string();
                    buffer = buffer[line_end + 1..].to_string();

                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }
                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    let data = data.trim();
                    if data == "[DONE]" {
                        return;
                    }

                    match serde_json::from_str::<StreamLine>(data) {
                        Ok(parsed) => {
                            if let Some(ev) = parsed.trace {
                                if tx
                                    .send(Ok(GatewayChunk {
                                        content: None,
                                        trace: Some(ev),
                                    }))
                                    .await
                                    .is_err()
                                {
                                    return; // receiver dropped
                                }
                            }
                            let delta = parsed
                                .choices
                                .into_iter()
                                .next()
                                .and_then(|c| c.delta.content)
                                .filter(|c| !c.is_empty());
                            if let Some(content) = delta {
                                if tx
                                    .send(Ok(GatewayChunk {
                                        content: Some(content),
                                        trace: None,
                                    }))
                                    .await
                                    .is_err()
                                {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            // One bad line must not abort the stream.
                            trace!(data, error = %e, "Ignoring unparseable SSE line");
                        }
                    }
                }
            }
        });

        Ok(rx)
    }

    /// Request an embedding for a single input text.
    pub async fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>, GatewayError> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = serde_json::json!({ "model": model, "input": input });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        let response = check_status(response).await?;

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Network(format!("failed to parse embedding: {e}")))?;

        match parsed.data.into_iter().next() {
            Some(d) if !d.embedding.is_empty() => Ok(d.embedding),
            _ => {
                warn!(model, "Gateway returned no embedding data");
                Err(GatewayError::EmptyResponse("empty embedding response".into()))
            }
        }
    }

    /// Extract `{content, topic}` facts from a finished dialogue.
    pub async fn sanitize(
        &self,
        model: &str,
        messages: &[Message],
    ) -> Result<Vec<ExtractedFact>, GatewayError> {
        let url = format!("{}/v1/memory/sanitize", self.base_url);
        let body = serde_json::json!({
            "model": model,
            "messages": to_api_messages(messages),
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        let response = check_status(response).await?;

        let parsed: SanitizeResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Network(format!("failed to parse facts: {e}")))?;
        Ok(parsed.facts)
    }

    /// Ask the reflection arbiter what to do with a new fact.
    pub async fn reflect(
        &self,
        model: &str,
        new_facts: &[StagingFact],
        related_memories: &[SharedMemory],
    ) -> Result<Vec<EvolutionInstruction>, GatewayError> {
        let url = format!("{}/v1/memory/reflect", self.base_url);
        let body = serde_json::json!({
            "model": model,
            "new_facts": new_facts,
            "related_memories": related_memories,
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        let response = check_status(response).await?;

        let parsed: ReflectResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Network(format!("failed to parse instructions: {e}")))?;
        Ok(parsed.instructions)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    warn!(status = status.as_u16(), body = %message, "Gateway returned error");
    Err(GatewayError::Api {
        status: status.as_u16(),
        message,
    })
}

/// Project domain messages onto the OpenAI wire shape.
fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
    messages
        .iter()
        .map(|m| ApiMessage {
            role: m.role.to_string(),
            content: m.content.clone(),
        })
        .collect()
}

// --- Gateway API types (internal) ---

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct SanitizeResponse {
    #[serde(default)]
    facts: Vec<ExtractedFact>,
}

#[derive(Debug, Deserialize)]
struct ReflectResponse {
    #[serde(default)]
    instructions: Vec<EvolutionInstruction>,
}

/// A single SSE `data: {...}` line from the chat stream.
#[derive(Debug, Deserialize)]
struct StreamLine {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    trace: Option<TraceEvent>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}
