//! Post-stream ingestion flag.

use crate::{Blackboard, Pass};
use async_trait::async_trait;
use contextfabric_core::error::PipelineError;
use serde_json::json;
use tracing::debug;

/// Marks the turn for background memory ingestion.
///
/// An observer pass: it never mutates the message list. The actual ingest
/// is triggered by the orchestrator after the assistant reply is persisted.
pub struct SanitizeFlagPass;

impl SanitizeFlagPass {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SanitizeFlagPass {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Pass for SanitizeFlagPass {
    fn name(&self) -> &str {
        "Sanitizer"
    }

    fn description(&self) -> &str {
        "提取对话事实并存入暂存区"
    }

    async fn run(&self, bb: &mut Blackboard) -> Result<(), PipelineError> {
        debug!(session = %bb.session_id, "Flagging session for background ingest");
        bb.meta.insert("needs_ingest".into(), json!(true));
        Ok(())
    }
}
