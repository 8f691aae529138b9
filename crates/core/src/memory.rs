//! Two-tier evolving memory domain types.
//!
//! The memory subsystem keeps two vector collections:
//! - **staging** — short declarative facts extracted from finished dialogues
//!   by the ingest worker, awaiting consolidation
//! - **shared** — durable knowledge units, created and mutated only by the
//!   reflection loop
//!
//! Both types flatten unknown payload keys so the vector store adapter can
//! round-trip fields it does not model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a staging fact.
///
/// Only `pending` is written today; `processing` is retained so the wire
/// format round-trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactStatus {
    Pending,
    Processing,
}

/// A short declarative sentence extracted from a completed dialogue.
///
/// Created by the ingest worker, retrieved by the reflection loop, deleted
/// once reflection has processed it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingFact {
    pub id: String,

    /// Embedding vector; omitted in search results that return payload only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vector: Vec<f32>,

    pub content: String,

    #[serde(default)]
    pub source_session: String,

    pub created_at: DateTime<Utc>,

    pub status: FactStatus,

    /// Payload keys the adapter does not model, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl StagingFact {
    /// Create a pending fact with a fresh timestamp.
    pub fn pending(
        id: impl Into<String>,
        vector: Vec<f32>,
        content: impl Into<String>,
        source_session: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            vector,
            content: content.into(),
            source_session: source_session.into(),
            created_at: Utc::now(),
            status: FactStatus::Pending,
            extra: serde_json::Map::new(),
        }
    }
}

/// Lifecycle state of a shared memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryStatus {
    Active,
    Deprecated,
    Disputed,
}

/// A durable consolidated knowledge unit.
///
/// Created or mutated only by reflection; never created during ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedMemory {
    pub id: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vector: Vec<f32>,

    pub content: String,

    #[serde(default)]
    pub topic: String,

    /// Arbitration confidence in [0, 1].
    #[serde(default)]
    pub confidence: f32,

    /// Monotonic revision counter.
    #[serde(default)]
    pub version: u32,

    pub status: MemoryStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_verified: Option<DateTime<Utc>>,

    /// Staging-fact ids that justified this memory.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence_refs: Vec<String>,

    /// Payload keys the adapter does not model, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
