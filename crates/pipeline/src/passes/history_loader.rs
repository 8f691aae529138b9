//! History loading — the only pass whose failure is fatal to the pipeline.

use crate::{Blackboard, Pass};
use async_trait::async_trait;
use contextfabric_core::error::{PipelineError, StorageError};
use contextfabric_core::message::Session;
use contextfabric_storage::FileSessionStore;
use serde_json::json;
use std::sync::Arc;

/// Loads the session's messages into the blackboard, creating the session
/// with app id `auto` when it does not exist yet.
pub struct HistoryLoader {
    store: Arc<FileSessionStore>,
}

impl HistoryLoader {
    pub fn new(store: Arc<FileSessionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Pass for HistoryLoader {
    fn name(&self) -> &str {
        "HistoryLoader"
    }

    fn description(&self) -> &str {
        "加载历史会话"
    }

    async fn run(&self, bb: &mut Blackboard) -> Result<(), PipelineError> {
        let session = match self.store.get(&bb.session_id).await {
            Ok(session) => session,
            Err(StorageError::NotFound(_)) => {
                let session = Session::new(bb.session_id.clone(), "auto");
                self.store.save(&session).await?;
                session
            }
            Err(e) => return Err(e.into()),
        };

        bb.messages = session.messages.clone();
        bb.meta.insert("app_id".into(), json!(session.app_id));
        bb.meta
            .insert("created_at".into(), json!(session.created_at.to_rfc3339()));

        bb.push_trace(
            "HistoryLoader",
            "Blackboard",
            "Loaded",
            Some(json!({ "original_count": session.messages.len() })),
        );
        Ok(())
    }
}
