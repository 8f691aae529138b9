//! Configuration for ContextFabric.
//!
//! The midtier is configured purely through environment variables; every
//! knob has a usable default so a bare `contextfabric serve` starts against
//! localhost services.

use serde::Serialize;
use std::path::PathBuf;

/// The root configuration structure, one field per environment variable.
#[derive(Debug, Clone, Serialize)]
pub struct AppConfig {
    /// Session file directory (`AGENTIC_SESSIONS_DIR`)
    pub sessions_dir: PathBuf,

    /// Log directory (`AGENTIC_LOG_DIR`)
    pub log_dir: PathBuf,

    /// Docs directory (`AGENTIC_DOCS_DIR`)
    pub docs_dir: PathBuf,

    /// Vector store base URL (`AGENTIC_QDRANT_URL`)
    pub qdrant_url: String,

    /// Staging facts collection (`AGENTIC_MEM_STAGING_COLL`)
    pub staging_collection: String,

    /// Shared memories collection (`AGENTIC_MEM_SHARED_COLL`)
    pub shared_collection: String,

    /// Reflection arbitration model (`AGENTIC_REFLECTION_MODEL`).
    /// Empty means unconfigured; reflection cycles abort until it is set.
    pub reflection_model: String,

    /// Dialogue sanitization model (`AGENTIC_SANITIZE_MODEL`)
    pub sanitize_model: String,

    /// History summarization model (`AGENTIC_SUMMARY_MODEL`)
    pub summary_model: String,

    /// LLM gateway base URL (`LLM_SERVICE_URL`)
    pub llm_service_url: String,

    /// RAG document collection (`QDRANT_COLLECTION`)
    pub rag_collection: String,

    /// Default embedding model for RAG and memory retrieval
    /// (`RAG_EMBEDDING_MODEL`)
    pub rag_embedding_model: String,

    /// Bind host (`AGENTIC_HOST`)
    pub host: String,

    /// Bind port (`AGENTIC_PORT`)
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sessions_dir: default_sessions_dir(),
            log_dir: PathBuf::from("logs"),
            docs_dir: PathBuf::from("docs"),
            qdrant_url: "http://localhost:6333".into(),
            staging_collection: "mem_staging".into(),
            shared_collection: "mem_shared".into(),
            reflection_model: String::new(),
            sanitize_model: "deepseek-chat".into(),
            summary_model: "deepseek-chat".into(),
            llm_service_url: "http://localhost:8000".into(),
            rag_collection: "documents".into(),
            rag_embedding_model: "text-embedding-3-small".into(),
            host: "0.0.0.0".into(),
            port: 9091,
        }
    }
}

impl AppConfig {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            sessions_dir: get_env("AGENTIC_SESSIONS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.sessions_dir),
            log_dir: get_env("AGENTIC_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.log_dir),
            docs_dir: get_env("AGENTIC_DOCS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.docs_dir),
            qdrant_url: get_env("AGENTIC_QDRANT_URL").unwrap_or(defaults.qdrant_url),
            staging_collection: get_env("AGENTIC_MEM_STAGING_COLL")
                .unwrap_or(defaults.staging_collection),
            shared_collection: get_env("AGENTIC_MEM_SHARED_COLL")
                .unwrap_or(defaults.shared_collection),
            reflection_model: get_env("AGENTIC_REFLECTION_MODEL")
                .unwrap_or(defaults.reflection_model),
            sanitize_model: get_env("AGENTIC_SANITIZE_MODEL").unwrap_or(defaults.sanitize_model),
            summary_model: get_env("AGENTIC_SUMMARY_MODEL").unwrap_or(defaults.summary_model),
            llm_service_url: get_env("LLM_SERVICE_URL").unwrap_or(defaults.llm_service_url),
            rag_collection: get_env("QDRANT_COLLECTION").unwrap_or(defaults.rag_collection),
            rag_embedding_model: get_env("RAG_EMBEDDING_MODEL")
                .unwrap_or(defaults.rag_embedding_model),
            host: get_env("AGENTIC_HOST").unwrap_or(defaults.host),
            port: get_env("AGENTIC_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
        }
    }

    /// `host:port` bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read an environment variable, treating blank values as unset.
fn get_env(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(v) => {
            let trimmed = v.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Err(_) => None,
    }
}

/// Default session directory: `~/.agentic/sessions`.
fn default_sessions_dir() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".agentic").join("sessions")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.qdrant_url, "http://localhost:6333");
        assert_eq!(cfg.staging_collection, "mem_staging");
        assert_eq!(cfg.shared_collection, "mem_shared");
        assert_eq!(cfg.sanitize_model, "deepseek-chat");
        assert_eq!(cfg.llm_service_url, "http://localhost:8000");
        assert_eq!(cfg.rag_collection, "documents");
        assert_eq!(cfg.rag_embedding_model, "text-embedding-3-small");
        assert!(cfg.reflection_model.is_empty());
        assert_eq!(cfg.port, 9091);
    }

    #[test]
    fn sessions_dir_lands_under_home() {
        let cfg = AppConfig::default();
        assert!(cfg.sessions_dir.ends_with(".agentic/sessions") || cfg.sessions_dir.ends_with("sessions"));
    }

    #[test]
    fn env_overrides_apply_and_blank_falls_back() {
        // Unique variable names so parallel tests cannot interfere.
        std::env::set_var("AGENTIC_MEM_STAGING_COLL", "staging_override");
        std::env::set_var("AGENTIC_MEM_SHARED_COLL", "   ");
        let cfg = AppConfig::from_env();
        assert_eq!(cfg.staging_collection, "staging_override");
        assert_eq!(cfg.shared_collection, "mem_shared");
        std::env::remove_var("AGENTIC_MEM_STAGING_COLL");
        std::env::remove_var("AGENTIC_MEM_SHARED_COLL");
    }

    #[test]
    fn bind_addr_formats() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.bind_addr(), "0.0.0.0:9091");
    }
}
