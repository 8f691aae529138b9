//! Outbound SSE envelope.

use contextfabric_core::message::TraceEvent;
use serde::{Deserialize, Serialize};

/// One outbound event, serialized to JSON as one SSE `data:` line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SseEnvelope {
    /// Partial model output.
    Chunk { content: String },
    /// Metadata map (token statistics, persistence results).
    Meta {
        meta: serde_json::Map<String, serde_json::Value>,
    },
    /// A causal step, from the pipeline or emitted live during streaming.
    Trace { trace: TraceEvent },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_serializes_with_type_tag() {
        let env = SseEnvelope::Chunk {
            content: "hello".into(),
        };
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains(r#""type":"chunk""#));
        assert!(json.contains(r#""content":"hello""#));
    }

    #[test]
    fn meta_serializes_map() {
        let mut meta = serde_json::Map::new();
        meta.insert("tokens_total".into(), serde_json::json!(9));
        let json = serde_json::to_string(&SseEnvelope::Meta { meta }).unwrap();
        assert!(json.contains(r#""type":"meta""#));
        assert!(json.contains(r#""tokens_total":9"#));
    }

    #[test]
    fn trace_roundtrip() {
        let env = SseEnvelope::Trace {
            trace: TraceEvent::new("Frontend", "Agent", "Receive Query", None),
        };
        let json = serde_json::to_string(&env).unwrap();
        let back: SseEnvelope = serde_json::from_str(&json).unwrap();
        match back {
            SseEnvelope::Trace { trace } => assert_eq!(trace.action, "Receive Query"),
            _ => panic!("wrong variant"),
        }
    }
}
