//! Qdrant REST adapter.
//!
//! Thin client over the vector store's HTTP API, covering exactly the
//! operations the memory subsystem and the RAG pass need: upsert, cosine
//! search, filtered scroll, delete, and a health probe. Payload fields are
//! typed loosely — unknown keys pass through verbatim in both directions.
//!
//! Failures surface as [`StorageError::Vector`]; callers choose the
//! degradation policy.

use contextfabric_core::error::StorageError;
use contextfabric_core::memory::{FactStatus, MemoryStatus, SharedMemory, StagingFact};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

/// A search hit: id, similarity score, payload.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: Map<String, Value>,
}

/// A scrolled point: id, vector (when requested), payload.
#[derive(Debug, Clone)]
pub struct RawPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Map<String, Value>,
}

/// REST client for the staging and shared memory collections.
pub struct QdrantStore {
    base_url: String,
    staging_collection: String,
    shared_collection: String,
    client: reqwest::Client,
}

impl QdrantStore {
    pub fn new(
        base_url: impl Into<String>,
        staging_collection: impl Into<String>,
        shared_collection: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            staging_collection: staging_collection.into(),
            shared_collection: shared_collection.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn staging_collection(&self) -> &str {
        &self.staging_collection
    }

    pub fn shared_collection(&self) -> &str {
        &self.shared_collection
    }

    // ── Generic point operations ──────────────────────────────────────────

    /// Put-or-replace a single point.
    pub async fn upsert_point(
        &self,
        collection: &str,
        id: &str,
        vector: &[f32],
        payload: Map<String, Value>,
    ) -> Result<(), StorageError> {
        let url = format!(
            "{}/collections/{}/points?wait=true",
            self.base_url, collection
        );
        let body = json!({
            "points": [{ "id": id, "vector": vector, "payload": payload }]
        });
        self.execute(self.client.put(&url).json(&body), "upsert")
            .await
            .map(|_| ())
    }

    /// Top-k cosine search with payloads.
    pub async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, StorageError> {
        let url = format!("{}/collections/{}/points/search", self.base_url, collection);
        let body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });
        let value = self.execute(self.client.post(&url).json(&body), "search").await?;

        let hits = value["result"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|item| ScoredPoint {
                id: point_id(&item["id"]),
                score: item["score"].as_f64().unwrap_or(0.0) as f32,
                payload: item["payload"].as_object().cloned().unwrap_or_default(),
            })
            .collect();
        Ok(hits)
    }

    /// Scroll a page of points, optionally filtered.
    pub async fn scroll(
        &self,
        collection: &str,
        filter: Option<Value>,
        limit: usize,
        with_vector: bool,
    ) -> Result<Vec<RawPoint>, StorageError> {
        let url = format!("{}/collections/{}/points/scroll", self.base_url, collection);
        let mut body = json!({
            "limit": limit,
            "with_payload": true,
            "with_vector": with_vector,
        });
        if let Some(filter) = filter {
            body["filter"] = filter;
        }
        let value = self.execute(self.client.post(&url).json(&body), "scroll").await?;

        let points = value["result"]["points"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|item| RawPoint {
                id: point_id(&item["id"]),
                vector: parse_vector(&item["vector"]),
                payload: item["payload"].as_object().cloned().unwrap_or_default(),
            })
            .collect();
        Ok(points)
    }

    /// Raw scroll page for the admin viewer; vectors omitted to save bandwidth.
    pub async fn scroll_page(
        &self,
        collection: &str,
        limit: usize,
        offset: Option<Value>,
    ) -> Result<Value, StorageError> {
        let url = format!("{}/collections/{}/points/scroll", self.base_url, collection);
        let mut body = json!({
            "limit": limit,
            "with_payload": true,
            "with_vector": false,
        });
        if let Some(offset) = offset {
            body["offset"] = offset;
        }
        self.execute(self.client.post(&url).json(&body), "scroll").await
    }

    /// Delete points by id.
    pub async fn delete_points(&self, collection: &str, ids: &[String]) -> Result<(), StorageError> {
        let url = format!(
            "{}/collections/{}/points/delete?wait=true",
            self.base_url, collection
        );
        let body = json!({ "points": ids });
        self.execute(self.client.post(&url).json(&body), "delete")
            .await
            .map(|_| ())
    }

    /// Probe the vector store's health endpoint.
    pub async fn healthz(&self) -> bool {
        let url = format!("{}/healthz", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
        op: &str,
    ) -> Result<Value, StorageError> {
        let resp = request
            .send()
            .await
            .map_err(|e| StorageError::Vector(format!("qdrant {op} request failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StorageError::Vector(format!(
                "qdrant {op} error: {status} - {body}"
            )));
        }
        resp.json()
            .await
            .map_err(|e| StorageError::Vector(format!("qdrant {op} decode failed: {e}")))
    }

    // ── Staging facts ─────────────────────────────────────────────────────

    /// Store an extracted fact in the staging collection.
    pub async fn save_staging_fact(&self, fact: &StagingFact) -> Result<(), StorageError> {
        debug!(id = %fact.id, "Saving staging fact");
        self.upsert_point(
            &self.staging_collection,
            &fact.id,
            &fact.vector,
            staging_payload(fact),
        )
        .await
    }

    /// Top-k staging facts by similarity (payload only, no vectors).
    pub async fn search_staging_facts(
        &self,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<StagingFact>, StorageError> {
        let hits = self.search(&self.staging_collection, vector, limit).await?;
        Ok(hits
            .into_iter()
            .map(|h| staging_from_payload(h.id, Vec::new(), h.payload))
            .collect())
    }

    /// Enumerate pending staging facts with their vectors.
    pub async fn list_pending_facts(&self, limit: usize) -> Result<Vec<StagingFact>, StorageError> {
        let filter = json!({
            "must": [{ "key": "status", "match": { "value": "pending" } }]
        });
        let points = self
            .scroll(&self.staging_collection, Some(filter), limit, true)
            .await?;
        Ok(points
            .into_iter()
            .map(|p| staging_from_payload(p.id, p.vector, p.payload))
            .collect())
    }

    /// Remove a staging fact after reflection has processed it.
    pub async fn delete_staging_fact(&self, id: &str) -> Result<(), StorageError> {
        self.delete_points(&self.staging_collection, &[id.to_string()])
            .await
    }

    // ── Shared memories ───────────────────────────────────────────────────

    /// Upsert a consolidated memory into the shared collection.
    pub async fn save_shared_memory(&self, memory: &SharedMemory) -> Result<(), StorageError> {
        debug!(id = %memory.id, topic = %memory.topic, "Saving shared memory");
        self.upsert_point(
            &self.shared_collection,
            &memory.id,
            &memory.vector,
            shared_payload(memory),
        )
        .await
    }

    /// Top-k shared memories by similarity (payload only).
    pub async fn search_shared_memories(
        &self,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<SharedMemory>, StorageError> {
        let hits = self.search(&self.shared_collection, vector, limit).await?;
        Ok(hits
            .into_iter()
            .map(|h| shared_from_payload(h.id, Vec::new(), h.payload))
            .collect())
    }

    /// Fetch one shared memory by id, vector included.
    /// Returns `None` when the point does not exist.
    pub async fn get_shared_memory(&self, id: &str) -> Result<Option<SharedMemory>, StorageError> {
        let filter = json!({ "must": [{ "has_id": [id] }] });
        let mut points = self
            .scroll(&self.shared_collection, Some(filter), 1, true)
            .await?;
        Ok(points
            .pop()
            .map(|p| shared_from_payload(p.id, p.vector, p.payload)))
    }
}

/// Qdrant point ids may come back as strings or integers.
fn point_id(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_vector(value: &Value) -> Vec<f32> {
    value
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_f64().map(|f| f as f32))
                .collect()
        })
        .unwrap_or_default()
}

fn staging_payload(fact: &StagingFact) -> Map<String, Value> {
    let mut payload = fact.extra.clone();
    payload.insert("content".into(), json!(fact.content));
    payload.insert("source_session".into(), json!(fact.source_session));
    payload.insert("created_at".into(), json!(fact.created_at.timestamp()));
    payload.insert("status".into(), json!(fact.status));
    payload
}

fn staging_from_payload(id: String, vector: Vec<f32>, mut payload: Map<String, Value>) -> StagingFact {
    let content = take_string(&mut payload, "content");
    let source_session = take_string(&mut payload, "source_session");
    let created_at = payload
        .remove("created_at")
        .and_then(|v| v.as_i64())
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(chrono::Utc::now);
    let status = payload
        .remove("status")
        .and_then(|v| serde_json::from_value::<FactStatus>(v).ok())
        .unwrap_or(FactStatus::Pending);
    StagingFact {
        id,
        vector,
        content,
        source_session,
        created_at,
        status,
        extra: payload,
    }
}

fn shared_payload(memory: &SharedMemory) -> Map<String, Value> {
    let mut payload = memory.extra.clone();
    payload.insert("content".into(), json!(memory.content));
    payload.insert("topic".into(), json!(memory.topic));
    payload.insert("confidence".into(), json!(memory.confidence));
    payload.insert("version".into(), json!(memory.version));
    payload.insert("status".into(), json!(memory.status));
    if let Some(verified) = memory.last_verified {
        payload.insert("last_verified".into(), json!(verified.timestamp()));
    }
    if !memory.evidence_refs.is_empty() {
        payload.insert("evidence_refs".into(), json!(memory.evidence_refs));
    }
    payload
}

fn shared_from_payload(id: String, vector: Vec<f32>, mut payload: Map<String, Value>) -> SharedMemory {
    let content = take_string(&mut payload, "content");
    let topic = take_string(&mut payload, "topic");
    let confidence = payload
        .remove("confidence")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0) as f32;
    let version = payload
        .remove("version")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u32;
    let status = payload
        .remove("status")
        .and_then(|v| serde_json::from_value::<MemoryStatus>(v).ok())
        .unwrap_or_else(|| {
            warn!(id = %id, "Shared memory payload missing status; defaulting to active");
            MemoryStatus::Active
        });
    let last_verified = payload
        .remove("last_verified")
        .and_then(|v| v.as_i64())
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0));
    let evidence_refs = payload
        .remove("evidence_refs")
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();
    SharedMemory {
        id,
        vector,
        content,
        topic,
        confidence,
        version,
        status,
        last_verified,
        evidence_refs,
        extra: payload,
    }
}

fn take_string(payload: &mut Map<String, Value>, key: &str) -> String {
    payload
        .remove(key)
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default()
}
