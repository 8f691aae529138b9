//! # ContextFabric Core
//!
//! Domain types and error definitions for the ContextFabric context midtier.
//! This crate has **zero framework dependencies** — it defines the value
//! objects that flow between the session store, the memory subsystem, the
//! context pipeline, and the chat orchestrator.
//!
//! All other crates depend inward on core; nothing here performs I/O.

pub mod error;
pub mod memory;
pub mod message;

// Re-export key types at crate root for ergonomics
pub use error::{Error, GatewayError, MemoryError, PipelineError, Result, StorageError};
pub use memory::{FactStatus, MemoryStatus, SharedMemory, StagingFact};
pub use message::{Message, Role, Session, SessionSummary, TraceEvent};
