//! Token counting.
//!
//! Uses the cl100k_base BPE encoding when it can be constructed; otherwise
//! falls back to the ~4-characters-per-token heuristic, which keeps the
//! truncation pass functional without the encoder data.

use tiktoken_rs::CoreBPE;

/// A token counter with a BPE encoder and a character-based fallback.
pub struct TokenCounter {
    bpe: Option<CoreBPE>,
}

impl TokenCounter {
    /// Build with the cl100k_base encoding, degrading to the estimator on
    /// failure.
    pub fn new() -> Self {
        Self {
            bpe: tiktoken_rs::cl100k_base().ok(),
        }
    }

    /// Build with the fallback estimator only. Deterministic, used in tests.
    pub fn estimator() -> Self {
        Self { bpe: None }
    }

    /// Count the tokens in a text.
    pub fn count(&self, text: &str) -> usize {
        match &self.bpe {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            None => text.len() / 4,
        }
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}
