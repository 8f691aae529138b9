//! Operator-facing snapshot of the memory subsystem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Running state of both memory paths, readable by operators.
///
/// `ingest_queue_size` is filled in at read time from the live channel
/// depth; everything else is written by the worker and the reflection loop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryState {
    /// Tasks waiting in the ingest queue.
    pub ingest_queue_size: usize,

    // Fast path (ingestion)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_ingest_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_ingest_session: String,
    /// "processing" | "success" | "failed" | "idle"
    #[serde(default)]
    pub last_ingest_status: String,
    #[serde(default)]
    pub last_ingest_input_count: usize,
    #[serde(default)]
    pub last_ingest_output_count: usize,
    #[serde(default)]
    pub last_ingest_topic: String,

    // Slow path (reflection)
    #[serde(default)]
    pub is_reflecting: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reflection_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_reflection_status: String,
    #[serde(default)]
    pub last_reflection_facts_processed: usize,
    #[serde(default)]
    pub last_reflection_instructions: usize,
}
