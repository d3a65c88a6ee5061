//! Completion backend seam between the relay and the model client.

use async_trait::async_trait;
use gb_channels::{SenderClass, Turn};
use gb_llm::{ChatMessage, LlmClient};

#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Returns the model's reply to `turns`, framed by the `persona` system prompt.
    async fn complete(&self, persona: &str, turns: &[Turn]) -> anyhow::Result<String>;
}

pub struct LlmCompletion {
    client: LlmClient,
}

impl LlmCompletion {
    pub fn new(client: LlmClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CompletionBackend for LlmCompletion {
    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(model = %self.client.model(), turns = turns.len())
    )]
    async fn complete(&self, persona: &str, turns: &[Turn]) -> anyhow::Result<String> {
        let messages = build_messages(persona, turns);
        let response = self.client.chat(&messages).await?;
        Ok(response.message.content)
    }
}

pub fn build_messages(persona: &str, turns: &[Turn]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(turns.len() + 1);
    messages.push(ChatMessage::system(persona));
    messages.extend(turns.iter().map(|turn| match turn.sender() {
        SenderClass::Human => ChatMessage::user(turn.text()),
        SenderClass::Bot => ChatMessage::assistant(turn.text()),
    }));
    messages
}
