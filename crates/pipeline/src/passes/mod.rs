//! The canonical passes, in execution order.

mod constitution;
mod history_loader;
mod rag;
mod sanitize_flag;
mod summarizer;
mod system_prompt;
mod token_limit;

pub use constitution::ConstitutionPass;
pub use history_loader::HistoryLoader;
pub use rag::RagPass;
pub use sanitize_flag::SanitizeFlagPass;
pub use summarizer::SummarizerPass;
pub use system_prompt::SystemPromptPass;
pub use token_limit::TokenLimitPass;

use crate::{Pass, Pipeline, TokenCounter};
use contextfabric_config::AppConfig;
use contextfabric_memory::MemoryService;
use contextfabric_providers::GatewayClient;
use contextfabric_storage::{FileSessionStore, QdrantStore};
use std::sync::Arc;

/// Assemble the canonical pipeline:
/// history → RAG → constitution → summarizer → system prompt → sanitizer
/// flag → token limit.
pub fn standard_chain(
    config: &AppConfig,
    sessions: Arc<FileSessionStore>,
    vectors: Arc<QdrantStore>,
    gateway: Arc<GatewayClient>,
    memory: Arc<MemoryService>,
    counter: Arc<TokenCounter>,
) -> Pipeline {
    Pipeline::new(vec![
        Arc::new(HistoryLoader::new(sessions)) as Arc<dyn Pass>,
        Arc::new(RagPass::new(
            gateway.clone(),
            vectors,
            config.rag_collection.clone(),
            config.rag_embedding_model.clone(),
        )),
        Arc::new(ConstitutionPass::new(memory)),
        Arc::new(SummarizerPass::new(gateway, config.summary_model.clone())),
        Arc::new(SystemPromptPass::new()),
        Arc::new(SanitizeFlagPass::new()),
        Arc::new(TokenLimitPass::new(counter, TokenLimitPass::DEFAULT_BUDGET)),
    ])
}
