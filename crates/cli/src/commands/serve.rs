//! `contextfabric serve` — run the midtier.

use contextfabric_config::AppConfig;
use tracing::info;

pub async fn run(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::from_env();
    if let Some(port) = port {
        config.port = port;
    }

    info!(
        sessions = %config.sessions_dir.display(),
        qdrant = %config.qdrant_url,
        gateway = %config.llm_service_url,
        staging = %config.staging_collection,
        shared = %config.shared_collection,
        "Configuration loaded"
    );

    contextfabric_gateway::serve(config).await
}
