//! Token-budget truncation — the final pass.

use crate::{Blackboard, Pass, TokenCounter};
use async_trait::async_trait;
use contextfabric_core::error::PipelineError;
use contextfabric_core::message::{Message, Role};
use serde_json::json;
use std::sync::Arc;

/// Truncates the message list to a token budget.
///
/// Strategy: the first message is preserved when it is a system message;
/// the rest are walked newest-to-oldest and kept greedily while the
/// cumulative count stays within budget. Dropped messages leave a
/// `Truncate` internal trace and iteration continues, so a short older
/// message can still make it in after a long one was dropped.
pub struct TokenLimitPass {
    counter: Arc<TokenCounter>,
    max_tokens: usize,
}

impl TokenLimitPass {
    pub const DEFAULT_BUDGET: usize = 4000;

    pub fn new(counter: Arc<TokenCounter>, max_tokens: usize) -> Self {
        Self {
            counter,
            max_tokens,
        }
    }
}

#[async_trait]
impl Pass for TokenLimitPass {
    fn name(&self) -> &str {
        "TokenLimitPass"
    }

    fn description(&self) -> &str {
        "Token 限制与截断"
    }

    async fn run(&self, bb: &mut Blackboard) -> Result<(), PipelineError> {
        if bb.messages.is_empty() {
            return Ok(());
        }

        let has_system_head = bb.messages[0].role == Role::System;
        let (head, rest): (Option<Message>, Vec<Message>) = if has_system_head {
            let mut iter = bb.messages.drain(..);
            let head = iter.next();
            let rest: Vec<_> = iter.collect();
            (head, rest)
        } else {
            (None, bb.messages.drain(..).collect())
        };

        let mut current = head
            .as_ref()
            .map(|m| self.counter.count(&m.content))
            .unwrap_or(0);

        let mut selected = std::collections::VecDeque::new();
        for (i, msg) in rest.iter().enumerate().rev() {
            let tokens = self.counter.count(&msg.content);
            if current + tokens > self.max_tokens {
                bb.push_trace(
                    "TokenLimitPass",
                    "Messages",
                    "Truncate",
                    Some(json!({
                        "dropped_msg_index": i,
                        "msg_length": tokens,
                    })),
                );
                continue;
            }
            selected.push_front(msg.clone());
            current += tokens;
        }

        bb.messages = head.into_iter().chain(selected).collect();
        bb.meta.insert("tokens_total".into(), json!(current));
        bb.meta.insert("tokens_max".into(), json!(self.max_tokens));
        Ok(())
    }
}
