//! File-backed session store.
//!
//! One pretty-printed JSON file per session at `<base>/<id>.json`. Updates
//! are crash-atomic: the session is written to a sibling `<id>.json.tmp`
//! and renamed over the target, so a crash mid-write leaves the previous
//! file intact.
//!
//! Sessions whose id begins with `diag-` are served from an in-memory map
//! and never touch disk — not on save, list, or delete. `list` excludes
//! them even if a stray file with that prefix exists in the directory.

use contextfabric_core::error::StorageError;
use contextfabric_core::message::{is_diagnostic_id, Session, SessionSummary};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// File-backed session repository with an in-memory diagnostic cache.
pub struct FileSessionStore {
    base_path: PathBuf,
    diag_cache: RwLock<HashMap<String, Session>>,
    // Serializes concurrent writers; reads go straight to disk.
    write_lock: Mutex<()>,
}

impl FileSessionStore {
    /// Create a store rooted at `base_path`, creating the directory if needed.
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path).map_err(|e| StorageError::Io {
            id: base_path.display().to_string(),
            reason: format!("failed to create session directory: {e}"),
        })?;
        debug!(path = %base_path.display(), "Session store initialized");
        Ok(Self {
            base_path,
            diag_cache: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
        })
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.base_path.join(format!("{id}.json"))
    }

    /// Persist a session. Diagnostic sessions only update the memory cache.
    pub async fn save(&self, session: &Session) -> Result<(), StorageError> {
        if session.is_diagnostic() {
            self.diag_cache
                .write()
                .await
                .insert(session.id.clone(), session.clone());
            return Ok(());
        }

        let data = serde_json::to_vec_pretty(session).map_err(|e| StorageError::Io {
            id: session.id.clone(),
            reason: format!("failed to serialize session: {e}"),
        })?;

        let _guard = self.write_lock.lock().await;
        let target = self.session_path(&session.id);
        let tmp = self.base_path.join(format!("{}.json.tmp", session.id));
        std::fs::write(&tmp, &data).map_err(|e| StorageError::Io {
            id: session.id.clone(),
            reason: format!("failed to write session file: {e}"),
        })?;
        std::fs::rename(&tmp, &target).map_err(|e| StorageError::Io {
            id: session.id.clone(),
            reason: format!("failed to replace session file: {e}"),
        })
    }

    /// Fetch a session by id.
    pub async fn get(&self, id: &str) -> Result<Session, StorageError> {
        if is_diagnostic_id(id) {
            return self
                .diag_cache
                .read()
                .await
                .get(id)
                .cloned()
                .ok_or_else(|| StorageError::NotFound(id.to_string()));
        }

        let path = self.session_path(id);
        let data = std::fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(id.to_string())
            } else {
                StorageError::Io {
                    id: id.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;
        serde_json::from_slice(&data).map_err(|e| StorageError::Corrupt {
            id: id.to_string(),
            reason: e.to_string(),
        })
    }

    /// List summaries of all persisted sessions, newest update first.
    /// Corrupt files and diagnostic ids are skipped silently.
    pub async fn list(&self) -> Result<Vec<SessionSummary>, StorageError> {
        let entries = std::fs::read_dir(&self.base_path).map_err(|e| StorageError::Io {
            id: self.base_path.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut list = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(id) = name.strip_suffix(".json") else {
                continue;
            };
            if is_diagnostic_id(id) {
                continue;
            }
            let Ok(data) = std::fs::read(entry.path()) else {
                continue;
            };
            match serde_json::from_slice::<Session>(&data) {
                Ok(session) => list.push(session.summary()),
                Err(e) => {
                    warn!(id, error = %e, "Skipping corrupt session file");
                }
            }
        }

        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(list)
    }

    /// Delete a session by id.
    pub async fn delete(&self, id: &str) -> Result<(), StorageError> {
        if is_diagnostic_id(id) {
            self.diag_cache.write().await.remove(id);
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;
        std::fs::remove_file(self.session_path(id)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(id.to_string())
            } else {
                StorageError::Io {
                    id: id.to_string(),
                    reason: e.to_string(),
                }
            }
        })
    }

    /// Delete a batch of sessions, ignoring individual failures.
    pub async fn delete_batch(&self, ids: &[String]) -> Result<(), StorageError> {
        for id in ids {
            if let Err(e) = self.delete(id).await {
                warn!(id = %id, error = %e, "Batch delete skipped session");
            }
        }
        Ok(())
    }

    /// Rename a session, refreshing its `updated_at`.
    pub async fn rename(&self, id: &str, name: &str) -> Result<(), StorageError> {
        let mut session = self.get(id).await?;
        session.name = name.to_string();
        session.updated_at = chrono::Utc::now();
        self.save(&session).await
    }

    /// Base directory this store writes into.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}
