//! Persistence layer for ContextFabric.
//!
//! Two stores, two owners:
//! - [`FileSessionStore`] — one pretty-printed JSON file per session,
//!   crash-atomic writes, memory-only `diag-` sessions
//! - [`QdrantStore`] — REST adapter over the staging and shared memory
//!   collections plus the RAG document collection

pub mod qdrant;
pub mod session;

pub use qdrant::{QdrantStore, RawPoint, ScoredPoint};
pub use session::FileSessionStore;
