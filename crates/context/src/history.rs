//! Turn-level operations over the session store.

use contextfabric_core::error::StorageError;
use contextfabric_core::message::{Message, Session, SessionSummary, TraceEvent};
use contextfabric_storage::FileSessionStore;
use std::sync::Arc;

/// Session history service.
///
/// All mutations go through get-then-save so `updated_at` stays accurate;
/// the store serializes concurrent writers.
#[derive(Clone)]
pub struct HistoryService {
    store: Arc<FileSessionStore>,
}

impl HistoryService {
    pub fn new(store: Arc<FileSessionStore>) -> Self {
        Self { store }
    }

    /// Fetch a session, creating an empty one when absent.
    pub async fn get_or_create(&self, id: &str, app_id: &str) -> Result<Session, StorageError> {
        match self.store.get(id).await {
            Ok(session) => Ok(session),
            Err(StorageError::NotFound(_)) => {
                let session = Session::new(id, app_id);
                self.store.save(&session).await?;
                Ok(session)
            }
            Err(e) => Err(e),
        }
    }

    /// Append a message to an existing session.
    pub async fn append(&self, id: &str, message: Message) -> Result<(), StorageError> {
        let mut session = self.store.get(id).await?;
        session.push(message);
        self.store.save(&session).await
    }

    /// Replace the metadata and traces of the session's last message.
    pub async fn update_last_message(
        &self,
        id: &str,
        meta: serde_json::Map<String, serde_json::Value>,
        traces: Vec<TraceEvent>,
    ) -> Result<(), StorageError> {
        let mut session = self.store.get(id).await?;
        let Some(last) = session.messages.last_mut() else {
            return Ok(());
        };
        last.meta = meta;
        last.traces = traces;
        self.store.save(&session).await
    }

    pub async fn get(&self, id: &str) -> Result<Session, StorageError> {
        self.store.get(id).await
    }

    pub async fn list(&self) -> Result<Vec<SessionSummary>, StorageError> {
        self.store.list().await
    }

    pub async fn delete(&self, id: &str) -> Result<(), StorageError> {
        self.store.delete(id).await
    }

    pub async fn delete_batch(&self, ids: &[String]) -> Result<(), StorageError> {
        self.store.delete_batch(ids).await
    }

    pub async fn rename(&self, id: &str, name: &str) -> Result<(), StorageError> {
        self.store.rename(id, name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn service(dir: &tempfile::TempDir) -> HistoryService {
        HistoryService::new(Arc::new(FileSessionStore::new(dir.path()).unwrap()))
    }

    #[tokio::test]
    async fn get_or_create_creates_once() {
        let dir = tempdir().unwrap();
        let history = service(&dir);

        let created = history.get_or_create("s1", "demo").await.unwrap();
        assert_eq!(created.app_id, "demo");

        // Second call returns the persisted session, app id unchanged.
        let again = history.get_or_create("s1", "other").await.unwrap();
        assert_eq!(again.app_id, "demo");
    }

    #[tokio::test]
    async fn append_requires_existing_session() {
        let dir = tempdir().unwrap();
        let history = service(&dir);

        let err = history.append("ghost", Message::user("hi")).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));

        history.get_or_create("s1", "demo").await.unwrap();
        history.append("s1", Message::user("hi")).await.unwrap();
        assert_eq!(history.get("s1").await.unwrap().messages.len(), 1);
    }

    #[tokio::test]
    async fn update_last_message_sets_meta_and_traces() {
        let dir = tempdir().unwrap();
        let history = service(&dir);
        history.get_or_create("s1", "demo").await.unwrap();
        history.append("s1", Message::user("hi")).await.unwrap();

        let mut meta = serde_json::Map::new();
        meta.insert("tokens_total".into(), json!(12));
        let traces = vec![TraceEvent::new("Pipeline", "P", "Complete", None)];
        history.update_last_message("s1", meta, traces).await.unwrap();

        let session = history.get("s1").await.unwrap();
        let last = session.messages.last().unwrap();
        assert_eq!(last.meta["tokens_total"], json!(12));
        assert_eq!(last.traces.len(), 1);
    }

    #[tokio::test]
    async fn update_last_message_on_empty_session_is_noop() {
        let dir = tempdir().unwrap();
        let history = service(&dir);
        history.get_or_create("s1", "demo").await.unwrap();
        history
            .update_last_message("s1", serde_json::Map::new(), Vec::new())
            .await
            .unwrap();
        assert!(history.get("s1").await.unwrap().messages.is_empty());
    }
}
