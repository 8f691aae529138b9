//! Context assembly services.
//!
//! [`HistoryService`] wraps the session store with turn-level operations;
//! [`ContextService`] owns the per-turn flow: append the user message, run
//! the pass pipeline over a fresh blackboard, collapse the execution trace,
//! and attach the result to the terminal payload message.

mod collapse;
mod history;
mod service;

pub use collapse::collapse_traces;
pub use history::HistoryService;
pub use service::{ContextOptions, ContextService};
