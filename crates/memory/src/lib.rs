//! Two-tier evolving memory (DEMA).
//!
//! The memory service runs two cooperating subsystems over one vector store
//! and one gateway endpoint:
//!
//! - **Fast path (ingestion):** a bounded queue of dialogue-sanitization
//!   tasks drained by a single background worker. Submission never blocks;
//!   a full queue rejects the task. The worker extracts facts, embeds each
//!   one, and writes them to the staging collection as `pending`.
//! - **Slow path (reflection):** a five-minute ticker. Each cycle pulls up
//!   to ten pending facts, retrieves their nearest shared memories, asks the
//!   reflection arbiter for create/evolve/deprecate instructions, applies
//!   them, and deletes the processed facts. The arbiter is the sole mutator
//!   of shared memory.
//!
//! The two paths communicate only through the vector store and the
//! operator-facing state snapshot.

mod service;
mod state;

pub use service::{IngestRequest, MemoryOptions, MemoryService};
pub use state::MemoryState;
