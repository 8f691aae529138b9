//! `contextfabric doctor` — diagnose the surrounding services.

use contextfabric_config::AppConfig;
use contextfabric_storage::QdrantStore;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::from_env();
    let mut healthy = true;

    // Session directory must be writable.
    let sessions_ok = std::fs::create_dir_all(&config.sessions_dir)
        .and_then(|_| {
            let probe = config.sessions_dir.join(".doctor-probe");
            std::fs::write(&probe, b"ok")?;
            std::fs::remove_file(&probe)
        })
        .is_ok();
    healthy &= sessions_ok;
    report("session storage", &config.sessions_dir.display().to_string(), sessions_ok);

    // Vector store health endpoint.
    let vectors = QdrantStore::new(
        config.qdrant_url.clone(),
        config.staging_collection.clone(),
        config.shared_collection.clone(),
    );
    let qdrant_ok = vectors.healthz().await;
    healthy &= qdrant_ok;
    report("vector store", &config.qdrant_url, qdrant_ok);

    // Model gateway: any HTTP response counts as reachable.
    let gateway_ok = reqwest::get(&config.llm_service_url).await.is_ok();
    healthy &= gateway_ok;
    report("model gateway", &config.llm_service_url, gateway_ok);

    if config.reflection_model.is_empty() {
        println!("  !  reflection model unset (AGENTIC_REFLECTION_MODEL) — reflection cycles will fail");
    }

    if healthy {
        println!("\nAll checks passed.");
        Ok(())
    } else {
        Err("one or more checks failed".into())
    }
}

fn report(name: &str, detail: &str, ok: bool) {
    let mark = if ok { "ok " } else { "FAIL" };
    println!("[{mark}] {name:<16} {detail}");
}
