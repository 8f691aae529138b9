//! LLM gateway client.
//!
//! ContextFabric talks to a single OpenAI-shaped model gateway for four
//! concerns: chat completions (streaming and non-streaming), embeddings,
//! dialogue sanitization, and memory reflection. This crate owns the wire
//! formats and the SSE reader task.

mod gateway;

pub use gateway::{
    EvolutionInstruction, ExtractedFact, GatewayChunk, GatewayClient, InstructionAction,
};
