//! Engine identity injection.

use crate::{Blackboard, Pass};
use async_trait::async_trait;
use contextfabric_core::error::PipelineError;
use contextfabric_core::message::Message;

/// Prepends the engine identity with the current local time.
pub struct SystemPromptPass;

impl SystemPromptPass {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemPromptPass {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Pass for SystemPromptPass {
    fn name(&self) -> &str {
        "SystemPromptPass"
    }

    fn description(&self) -> &str {
        "注入系统提示词"
    }

    async fn run(&self, bb: &mut Blackboard) -> Result<(), PipelineError> {
        let now = chrono::Local::now().format("%H:%M:%S");
        let prompt = Message::system(format!("ContextFabric Engine. Time: {now}"));
        bb.messages.insert(0, prompt);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contextfabric_core::message::Role;

    #[tokio::test]
    async fn prepends_identity_with_clock() {
        let pass = SystemPromptPass::new();
        let mut bb = Blackboard::new("s1");
        bb.messages.push(Message::user("hi"));
        pass.run(&mut bb).await.unwrap();

        assert_eq!(bb.messages.len(), 2);
        let head = &bb.messages[0];
        assert_eq!(head.role, Role::System);
        assert!(head.content.starts_with("ContextFabric Engine. Time: "));

        // HH:MM:SS suffix
        let time = head.content.rsplit(' ').next().unwrap();
        let parts: Vec<_> = time.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_digit())));
    }

    #[tokio::test]
    async fn works_on_empty_board() {
        let pass = SystemPromptPass::new();
        let mut bb = Blackboard::new("s1");
        pass.run(&mut bb).await.unwrap();
        assert_eq!(bb.messages.len(), 1);
        assert_eq!(bb.messages[0].role, Role::System);
    }
}
