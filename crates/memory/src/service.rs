//! The memory service: ingest worker, reflection loop, state snapshot.

use crate::state::MemoryState;
use contextfabric_config::AppConfig;
use contextfabric_core::error::MemoryError;
use contextfabric_core::memory::{MemoryStatus, SharedMemory, StagingFact};
use contextfabric_core::message::Message;
use contextfabric_providers::{GatewayClient, InstructionAction};
use contextfabric_storage::QdrantStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Capacity of the bounded ingest queue.
const INGEST_QUEUE_CAPACITY: usize = 100;
/// Facts pulled per reflection cycle.
const REFLECTION_BATCH: usize = 10;
/// Nearest shared memories retrieved per fact during reflection.
const RELATED_LIMIT: usize = 3;
/// Retrieval fan-out for the constitution pass.
const RETRIEVE_LIMIT: usize = 3;

/// One queued sanitization task.
#[derive(Debug)]
pub struct IngestRequest {
    pub session_id: String,
    pub messages: Vec<Message>,
    /// Embedding model for fact vectors; empty falls back to the default.
    pub embedding_model: String,
    /// Chat model for fact extraction; empty falls back to the default.
    pub sanitize_model: String,
}

/// Tunables, normally derived from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct MemoryOptions {
    pub reflection_model: String,
    pub sanitize_model: String,
    pub default_embedding_model: String,
    pub reflection_interval: Duration,
}

impl MemoryOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            reflection_model: config.reflection_model.clone(),
            sanitize_model: config.sanitize_model.clone(),
            default_embedding_model: config.rag_embedding_model.clone(),
            reflection_interval: Duration::from_secs(300),
        }
    }
}

/// The DEMA memory service.
///
/// Owns exactly two background tasks — the ingest worker and the reflection
/// ticker — and shuts both down through [`MemoryService::shutdown`].
pub struct MemoryService {
    inner: Arc<Inner>,
    ingest_tx: std::sync::Mutex<Option<mpsc::Sender<IngestRequest>>>,
    shutdown: Arc<Notify>,
    worker: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    reflector: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

struct Inner {
    store: Arc<QdrantStore>,
    gateway: Arc<GatewayClient>,
    options: MemoryOptions,
    state: RwLock<MemoryState>,
    reflecting: AtomicBool,
}

impl MemoryService {
    /// Create the service and spawn its worker and reflection loop.
    pub fn new(
        store: Arc<QdrantStore>,
        gateway: Arc<GatewayClient>,
        options: MemoryOptions,
    ) -> Arc<Self> {
        let (service, rx) = Self::assemble(store, gateway, options);
        let service = Arc::new(service);

        let worker_inner = service.inner.clone();
        let worker = tokio::spawn(async move { ingest_worker(worker_inner, rx).await });
        *service.worker.lock().unwrap() = Some(worker);

        let reflect_inner = service.inner.clone();
        let shutdown = service.shutdown.clone();
        let reflector = tokio::spawn(async move { reflection_loop(reflect_inner, shutdown).await });
        *service.reflector.lock().unwrap() = Some(reflector);

        info!(
            interval_secs = service.inner.options.reflection_interval.as_secs(),
            "Memory service started"
        );
        service
    }

    /// Build the service without spawning background tasks.
    fn assemble(
        store: Arc<QdrantStore>,
        gateway: Arc<GatewayClient>,
        options: MemoryOptions,
    ) -> (Self, mpsc::Receiver<IngestRequest>) {
        let (tx, rx) = mpsc::channel(INGEST_QUEUE_CAPACITY);
        let service = Self {
            inner: Arc::new(Inner {
                store,
                gateway,
                options,
                state: RwLock::new(MemoryState::default()),
                reflecting: AtomicBool::new(false),
            }),
            ingest_tx: std::sync::Mutex::new(Some(tx)),
            shutdown: Arc::new(Notify::new()),
            worker: std::sync::Mutex::new(None),
            reflector: std::sync::Mutex::new(None),
        };
        (service, rx)
    }

    /// Enqueue a dialogue for background fact extraction.
    ///
    /// Non-blocking; a full (or closed) queue rejects with
    /// [`MemoryError::QueueFull`] and the caller drops the task.
    pub fn ingest(&self, request: IngestRequest) -> Result<(), MemoryError> {
        let guard = self.ingest_tx.lock().unwrap();
        let Some(tx) = guard.as_ref() else {
            return Err(MemoryError::QueueFull);
        };
        tx.try_send(request).map_err(|e| {
            warn!(error = %e, "Ingest task dropped");
            MemoryError::QueueFull
        })
    }

    /// Current state snapshot with the live queue depth.
    pub async fn state(&self) -> MemoryState {
        let mut state = self.inner.state.read().await.clone();
        state.ingest_queue_size = self
            .ingest_tx
            .lock()
            .unwrap()
            .as_ref()
            .map(|tx| INGEST_QUEUE_CAPACITY - tx.capacity())
            .unwrap_or(0);
        state.is_reflecting = self.inner.reflecting.load(Ordering::SeqCst);
        state
    }

    /// Embed a text with the given model, falling back to the configured
    /// default when the model id is empty.
    pub async fn get_embedding(&self, text: &str, model: &str) -> Result<Vec<f32>, MemoryError> {
        let model = if model.is_empty() {
            &self.inner.options.default_embedding_model
        } else {
            model
        };
        Ok(self.inner.gateway.embed(model, text).await?)
    }

    /// Retrieve the top shared memories and staging facts for a vector.
    ///
    /// An empty vector short-circuits to empty results.
    pub async fn retrieve(
        &self,
        vector: &[f32],
    ) -> Result<(Vec<SharedMemory>, Vec<StagingFact>), MemoryError> {
        if vector.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }
        let shared = self
            .inner
            .store
            .search_shared_memories(vector, RETRIEVE_LIMIT)
            .await?;
        let staging = self
            .inner
            .store
            .search_staging_facts(vector, RETRIEVE_LIMIT)
            .await?;
        Ok((shared, staging))
    }

    /// Run one reflection cycle now. Returns `false` when a cycle was
    /// already in flight and this one was suppressed.
    pub async fn reflect_once(&self) -> Result<bool, MemoryError> {
        reflect_guarded(&self.inner).await
    }

    /// Close the ingest queue and stop the reflection ticker, waiting for
    /// both tasks to drain.
    pub async fn shutdown(&self) {
        // Dropping the sender closes the queue; the worker drains the rest.
        // notify_one stores a permit, so the signal is not lost if the
        // reflection task has not reached its select yet.
        self.ingest_tx.lock().unwrap().take();
        self.shutdown.notify_one();

        let worker = self.worker.lock().unwrap().take();
        if let Some(handle) = worker {
            let _ = handle.await;
        }
        let reflector = self.reflector.lock().unwrap().take();
        if let Some(handle) = reflector {
            let _ = handle.await;
        }
        info!("Memory service stopped");
    }
}

// ── Fast path ─────────────────────────────────────────────────────────────

async fn ingest_worker(inner: Arc<Inner>, mut rx: mpsc::Receiver<IngestRequest>) {
    while let Some(task) = rx.recv().await {
        let session = task.session_id.clone();
        if let Err(e) = process_ingest(&inner, task).await {
            error!(session = %session, error = %e, "Ingest failed");
        }
    }
    debug!("Ingest worker drained and stopped");
}

async fn process_ingest(inner: &Inner, task: IngestRequest) -> Result<(), MemoryError> {
    info!(
        session = %task.session_id,
        messages = task.messages.len(),
        "Ingest: sanitizing dialogue"
    );

    {
        let mut state = inner.state.write().await;
        state.last_ingest_status = "processing".into();
        state.last_ingest_time = Some(chrono::Utc::now());
        state.last_ingest_session = task.session_id.clone();
        state.last_ingest_input_count = task.messages.len();
    }

    let sanitize_model = if task.sanitize_model.is_empty() {
        inner.options.sanitize_model.clone()
    } else {
        task.sanitize_model.clone()
    };
    if sanitize_model.is_empty() {
        set_ingest_result(inner, "failed", 0, "").await;
        return Err(MemoryError::ModelNotConfigured(
            "AGENTIC_SANITIZE_MODEL".into(),
        ));
    }

    let facts = match inner.gateway.sanitize(&sanitize_model, &task.messages).await {
        Ok(facts) => facts,
        Err(e) => {
            set_ingest_result(inner, "failed", 0, "").await;
            return Err(e.into());
        }
    };
    info!(
        system = "Ingestion",
        action = "staging_ingest",
        session = %task.session_id,
        input_messages = task.messages.len(),
        output_facts = facts.len(),
        model = %sanitize_model,
        "Facts extracted"
    );

    let embed_model = if task.embedding_model.is_empty() {
        inner.options.default_embedding_model.clone()
    } else {
        task.embedding_model.clone()
    };

    let mut last_topic = String::new();
    for (i, fact) in facts.iter().enumerate() {
        last_topic = fact.topic.clone();
        let vector = match inner.gateway.embed(&embed_model, &fact.content).await {
            Ok(v) => v,
            Err(e) => {
                // A fact whose embedding fails is skipped, not fatal.
                warn!(index = i, error = %e, "Ingest: embedding failed, skipping fact");
                continue;
            }
        };
        let staged = StagingFact::pending(
            Uuid::new_v4().to_string(),
            vector,
            fact.content.clone(),
            task.session_id.clone(),
        );
        if let Err(e) = inner.store.save_staging_fact(&staged).await {
            warn!(index = i, error = %e, "Ingest: failed to stage fact");
        } else {
            debug!(index = i, topic = %fact.topic, "Ingest: fact staged");
        }
    }

    set_ingest_result(inner, "success", facts.len(), &last_topic).await;
    Ok(())
}

async fn set_ingest_result(inner: &Inner, status: &str, output: usize, topic: &str) {
    let mut state = inner.state.write().await;
    state.last_ingest_status = status.into();
    state.last_ingest_output_count = output;
    state.last_ingest_topic = topic.into();
}

// ── Slow path ─────────────────────────────────────────────────────────────

async fn reflection_loop(inner: Arc<Inner>, shutdown: Arc<Notify>) {
    info!(
        interval_secs = inner.options.reflection_interval.as_secs(),
        "Reflection loop started"
    );
    let mut ticker = tokio::time::interval(inner.options.reflection_interval);
    // The first tick fires immediately; consume it so cycles start one
    // interval after boot.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = reflect_guarded(&inner).await {
                    error!(error = %e, "Reflection cycle failed");
                }
            }
            _ = shutdown.notified() => break,
        }
    }
    debug!("Reflection loop stopped");
}

/// Run a cycle unless one is already in flight.
async fn reflect_guarded(inner: &Arc<Inner>) -> Result<bool, MemoryError> {
    if inner
        .reflecting
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        warn!("Reflection already in progress; tick suppressed");
        return Ok(false);
    }
    {
        inner.state.write().await.is_reflecting = true;
    }

    let result = reflect_cycle(inner).await;

    {
        let mut state = inner.state.write().await;
        state.is_reflecting = false;
        state.last_reflection_time = Some(chrono::Utc::now());
    }
    inner.reflecting.store(false, Ordering::SeqCst);

    result.map(|_| true)
}

async fn reflect_cycle(inner: &Arc<Inner>) -> Result<(), MemoryError> {
    let model = inner.options.reflection_model.clone();
    if model.is_empty() {
        set_reflection_result(inner, "failed", 0, 0).await;
        return Err(MemoryError::ModelNotConfigured(
            "AGENTIC_REFLECTION_MODEL".into(),
        ));
    }

    let facts = match inner.store.list_pending_facts(REFLECTION_BATCH).await {
        Ok(facts) => facts,
        Err(e) => {
            set_reflection_result(inner, "failed", 0, 0).await;
            return Err(e.into());
        }
    };
    if facts.is_empty() {
        set_reflection_result(inner, "idle", 0, 0).await;
        return Ok(());
    }

    info!(
        system = "Reflection",
        action = "cycle_start",
        pending = facts.len(),
        "Reflection cycle"
    );

    let mut total_instructions = 0;
    for fact in &facts {
        let related = match inner
            .store
            .search_shared_memories(&fact.vector, RELATED_LIMIT)
            .await
        {
            Ok(related) => related,
            Err(e) => {
                // Fact stays pending for the next cycle.
                warn!(fact = %fact.id, error = %e, "Reflection: related search failed");
                continue;
            }
        };

        let instructions = match inner
            .gateway
            .reflect(&model, std::slice::from_ref(fact), &related)
            .await
        {
            Ok(instructions) => instructions,
            Err(e) => {
                warn!(fact = %fact.id, error = %e, "Reflection: arbitration failed");
                continue;
            }
        };

        info!(
            system = "Reflection",
            action = "shared_evolution",
            fact = %fact.id,
            related = related.len(),
            instructions = instructions.len(),
            "Arbitration complete"
        );

        for inst in &instructions {
            if let Err(e) = apply_instruction(inner, fact, inst).await {
                warn!(action = %inst.action, error = %e, "Reflection: instruction failed");
            }
            total_instructions += 1;
        }

        // The fact is consumed once its instructions were applied, even if
        // an individual instruction errored.
        if inner.store.delete_staging_fact(&fact.id).await.is_ok() {
            debug!(fact = %fact.id, "Reflection: fact cleaned from staging");
        }
    }

    set_reflection_result(inner, "success", facts.len(), total_instructions).await;
    Ok(())
}

async fn apply_instruction(
    inner: &Arc<Inner>,
    fact: &StagingFact,
    inst: &contextfabric_providers::EvolutionInstruction,
) -> Result<(), MemoryError> {
    match inst.parsed_action() {
        Some(InstructionAction::Create) => {
            let memory = SharedMemory {
                id: Uuid::new_v4().to_string(),
                vector: fact.vector.clone(),
                content: inst.fact_content.clone(),
                topic: "general".into(),
                confidence: 1.0,
                version: 1,
                status: MemoryStatus::Active,
                last_verified: Some(chrono::Utc::now()),
                evidence_refs: vec![fact.id.clone()],
                extra: serde_json::Map::new(),
            };
            Ok(inner.store.save_shared_memory(&memory).await?)
        }
        Some(InstructionAction::Evolve) => {
            let Some(memory_id) = inst.memory_id.as_deref() else {
                warn!("Reflection: evolve instruction without memory_id");
                return Ok(());
            };
            let memory = SharedMemory {
                id: memory_id.to_string(),
                vector: fact.vector.clone(),
                content: inst.fact_content.clone(),
                topic: "general".into(),
                confidence: 1.0,
                version: 2,
                status: MemoryStatus::Active,
                last_verified: Some(chrono::Utc::now()),
                evidence_refs: Vec::new(),
                extra: serde_json::Map::new(),
            };
            Ok(inner.store.save_shared_memory(&memory).await?)
        }
        Some(InstructionAction::Deprecate) => {
            let Some(memory_id) = inst.memory_id.as_deref() else {
                warn!("Reflection: deprecate instruction without memory_id");
                return Ok(());
            };
            match inner.store.get_shared_memory(memory_id).await? {
                Some(mut memory) => {
                    memory.status = MemoryStatus::Deprecated;
                    Ok(inner.store.save_shared_memory(&memory).await?)
                }
                None => {
                    warn!(memory_id, "Reflection: deprecate target not found");
                    Ok(())
                }
            }
        }
        None => {
            warn!(action = %inst.action, "Reflection: unknown instruction action");
            Ok(())
        }
    }
}

async fn set_reflection_result(inner: &Arc<Inner>, status: &str, facts: usize, instructions: usize) {
    let mut state = inner.state.write().await;
    state.last_reflection_status = status.into();
    state.last_reflection_facts_processed = facts;
    state.last_reflection_instructions = instructions;
}
