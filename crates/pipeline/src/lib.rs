//! Context assembly pipeline — the core architectural component.
//!
//! A pipeline is an ordered list of passes executed strictly sequentially
//! over a single shared [`Blackboard`]. Each pass transforms the message
//! list or publishes metadata; the pipeline records a `Complete` trace per
//! pass with a role/content projection of the messages at that moment.
//!
//! The canonical chain assembled by [`passes::standard_chain`]:
//!
//! 1. history loader    — read (or create) the session
//! 2. RAG retrieval     — inject retrieved documents (flag-gated)
//! 3. constitution      — inject long-term and recent memories
//! 4. summarizer        — compress older turns via the gateway
//! 5. system prompt     — prepend the engine identity
//! 6. sanitizer flag    — mark the turn for post-stream ingestion
//! 7. token limit       — greedy newest-first truncation to budget

pub mod passes;
pub mod token;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use contextfabric_core::error::PipelineError;
use contextfabric_core::message::{Message, TraceEvent};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::debug;

pub use token::TokenCounter;

/// A single transformation step.
///
/// Returning an error terminates the pipeline; passes that degrade
/// gracefully log an internal trace and return `Ok`.
#[async_trait]
pub trait Pass: Send + Sync {
    /// Unique identifier, used in trace records.
    fn name(&self) -> &str;

    /// Human-readable description, used in UI displays.
    fn description(&self) -> &str;

    async fn run(&self, blackboard: &mut Blackboard) -> Result<(), PipelineError>;
}

/// The transient per-turn state threaded through the passes.
///
/// Typed fields (`session_id`, `messages`) stay distinct from the untyped
/// `meta` map that carries flags and token accounting between passes.
/// Discarded after each execution; never persisted.
pub struct Blackboard {
    pub session_id: String,
    pub messages: Vec<Message>,
    pub meta: Map<String, Value>,
    pub traces: Vec<TraceEvent>,
    clock: TraceClock,
}

impl Blackboard {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            messages: Vec::new(),
            meta: Map::new(),
            traces: Vec::new(),
            clock: TraceClock::default(),
        }
    }

    /// Append a trace event stamped by the monotonic trace clock.
    pub fn push_trace(
        &mut self,
        source: impl Into<String>,
        target: impl Into<String>,
        action: impl Into<String>,
        data: Option<Value>,
    ) {
        self.traces.push(TraceEvent {
            source: source.into(),
            target: target.into(),
            action: action.into(),
            data,
            timestamp: self.clock.next(),
        });
    }

    /// Read a boolean metadata flag, defaulting to false.
    pub fn meta_bool(&self, key: &str) -> bool {
        self.meta.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Read a string metadata value, defaulting to empty.
    pub fn meta_str(&self, key: &str) -> &str {
        self.meta.get(key).and_then(Value::as_str).unwrap_or("")
    }

    /// The content of the most recent user message, if any.
    pub fn last_user_query(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == contextfabric_core::message::Role::User)
            .map(|m| m.content.as_str())
    }

    /// Insert a message immediately before the terminal message, so the
    /// user turn remains terminal. No-op on an empty list.
    pub fn insert_before_last(&mut self, message: Message) {
        if self.messages.is_empty() {
            return;
        }
        let idx = self.messages.len() - 1;
        self.messages.insert(idx, message);
    }
}

/// Issues strictly increasing timestamps within one execution; ties are
/// bumped by one microsecond when the clock has insufficient resolution.
#[derive(Default)]
struct TraceClock {
    last: Option<DateTime<Utc>>,
}

impl TraceClock {
    fn next(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last {
            if now <= last {
                now = last + ChronoDuration::microseconds(1);
            }
        }
        self.last = Some(now);
        now
    }
}

/// Project messages to `[{role, content}]` for trace snapshots — a static
/// copy unaffected by later passes mutating the originals.
pub fn project_messages(messages: &[Message]) -> Value {
    Value::Array(
        messages
            .iter()
            .map(|m| json!({ "role": m.role, "content": m.content }))
            .collect(),
    )
}

/// An ordered chain of passes.
pub struct Pipeline {
    passes: Vec<Arc<dyn Pass>>,
}

impl Pipeline {
    pub fn new(passes: Vec<Arc<dyn Pass>>) -> Self {
        Self { passes }
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Execute every pass in order over the blackboard.
    ///
    /// Emits a `Start` event, one `Complete` per pass (with duration,
    /// message count, and a role/content snapshot), and a `Finished` event.
    /// A pass error terminates execution immediately.
    pub async fn execute(&self, blackboard: &mut Blackboard) -> Result<(), PipelineError> {
        let total_start = std::time::Instant::now();

        blackboard.push_trace(
            "Core",
            "Pipeline",
            "Start",
            Some(json!({
                "session_id": blackboard.session_id,
                "pass_count": self.passes.len(),
            })),
        );

        for pass in &self.passes {
            let start = std::time::Instant::now();
            let name = pass.name().to_string();
            let description = pass.description().to_string();

            pass.run(blackboard)
                .await
                .map_err(|e| PipelineError::PassFailed {
                    pass: name.clone(),
                    reason: e.to_string(),
                })?;

            let duration_ms = start.elapsed().as_millis() as u64;
            debug!(pass = %name, duration_ms, "Pass complete");

            blackboard.push_trace(
                "Pipeline",
                name.clone(),
                "Complete",
                Some(json!({
                    "description": description,
                    "is_pass": true,
                    "pass_name": name,
                    "duration_ms": duration_ms,
                    "msg_count": blackboard.messages.len(),
                    "messages": project_messages(&blackboard.messages),
                })),
            );
        }

        blackboard.push_trace(
            "Core",
            "Pipeline",
            "Finished",
            Some(json!({
                "total_duration_ms": total_start.elapsed().as_millis() as u64,
            })),
        );

        Ok(())
    }
}
