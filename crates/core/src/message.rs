//! Message, trace, and session domain types.
//!
//! These are the core value objects that flow through the entire system:
//! the frontend sends a query → the pipeline assembles a payload of
//! `Message`s → the orchestrator streams the model reply back, collecting
//! `TraceEvent`s along the way → the turn is persisted into a `Session`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The role of a message sender in a dialogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions (identity, injected context)
    System,
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// Tool execution result
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        write!(f, "{s}")
    }
}

/// A single dialogue turn.
///
/// Within a session, messages are append-only in non-decreasing timestamp
/// order. `meta` carries token accounting and flags; `traces` carries the
/// pipeline execution trail attached to the terminal payload message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Timestamp
    pub timestamp: DateTime<Utc>,

    /// Token statistics, flags, and other loose metadata
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub meta: serde_json::Map<String, serde_json::Value>,

    /// Execution trail of the context processing that produced this message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traces: Vec<TraceEvent>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            meta: serde_json::Map::new(),
            traces: Vec::new(),
        }
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// One causal step in the processing of a turn.
///
/// Timestamps are strictly increasing within one pipeline execution; the
/// pipeline synthesizes sub-microsecond offsets if the clock ties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub source: String,
    pub target: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Missing timestamps on the wire decode to the Unix epoch; the
    /// orchestrator stamps those with the current time before forwarding.
    #[serde(default = "epoch")]
    pub timestamp: DateTime<Utc>,
}

fn epoch() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH
}

impl TraceEvent {
    /// Create a trace event stamped with the current time.
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        action: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            action: action.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// A complete dialogue record — the unit of persistence.
///
/// Sessions whose id begins with `diag-` live only in memory and are never
/// written to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub app_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Session {
    /// Create a new empty session.
    pub fn new(id: impl Into<String>, app_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: String::new(),
            app_id: app_id.into(),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
        }
    }

    /// Whether this session is a memory-only diagnostic session.
    pub fn is_diagnostic(&self) -> bool {
        is_diagnostic_id(&self.id)
    }

    /// Append a message and refresh `updated_at`.
    pub fn push(&mut self, message: Message) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    /// Build the listing summary for this session.
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            app_id: self.app_id.clone(),
            updated_at: self.updated_at,
            msg_count: self.messages.len(),
        }
    }
}

/// Returns true for ids with the memory-only `diag-` prefix.
pub fn is_diagnostic_id(id: &str) -> bool {
    id.starts_with("diag-")
}

/// Summary of a session, for list views.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub name: String,
    pub app_id: String,
    pub updated_at: DateTime<Utc>,
    pub msg_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_message() {
        let msg = Message::user("hello there");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "hello there");
        assert!(msg.meta.is_empty());
        assert!(msg.traces.is_empty());
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(json, r#""assistant""#);
    }

    #[test]
    fn message_serialization_roundtrip() {
        let mut msg = Message::system("payload");
        msg.meta
            .insert("tokens_total".into(), serde_json::json!(42));
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.content, "payload");
        assert_eq!(back.meta["tokens_total"], serde_json::json!(42));
    }

    #[test]
    fn empty_meta_and_traces_omitted() {
        let msg = Message::user("hi");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("meta"));
        assert!(!json.contains("traces"));
    }

    #[test]
    fn session_push_refreshes_updated_at() {
        let mut session = Session::new("s1", "demo");
        let created = session.updated_at;
        session.push(Message::user("first"));
        assert_eq!(session.messages.len(), 1);
        assert!(session.updated_at >= created);
    }

    #[test]
    fn diagnostic_prefix_detection() {
        assert!(Session::new("diag-probe", "x").is_diagnostic());
        assert!(!Session::new("session-1", "x").is_diagnostic());
        assert!(is_diagnostic_id("diag-"));
        assert!(!is_diagnostic_id("diagnostics"));
    }

    #[test]
    fn summary_counts_messages() {
        let mut session = Session::new("s2", "demo");
        session.name = "named".into();
        session.push(Message::user("a"));
        session.push(Message::assistant("b"));
        let summary = session.summary();
        assert_eq!(summary.id, "s2");
        assert_eq!(summary.name, "named");
        assert_eq!(summary.msg_count, 2);
    }

    #[test]
    fn trace_without_timestamp_decodes_to_epoch() {
        let json = r#"{"source":"LLM","target":"Agent","action":"Model Inference"}"#;
        let ev: TraceEvent = serde_json::from_str(json).unwrap();
        assert_eq!(ev.timestamp, chrono::DateTime::UNIX_EPOCH);
    }

    #[test]
    fn trace_event_stamps_timestamp() {
        let ev = TraceEvent::new("Core", "Pipeline", "Start", None);
        assert_eq!(ev.source, "Core");
        assert!(ev.data.is_none());
        let json = serde_json::to_string(&ev).unwrap();
        assert!(!json.contains(r#""data""#));
    }
}
