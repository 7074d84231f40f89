//! FlipBot Assistant
//!
//! Drives a provider with the site's system instruction and keeps the
//! conversation within its context budget.

use std::sync::Arc;

use crate::error::{ChatError, Result};
use crate::message::{Conversation, Message};
use crate::provider::{CompletionStream, GenerationOptions, LlmProvider};

/// System instruction for the widget
pub const FLIPBOT_PROMPT: &str = "You are FlipBot, an expert assistant for Flip, an Authority Hub \
platform for creators. You help users find resources, understand the academy courses, and guide \
them on scaling their business. You are helpful, professional, and concise. Your responses should \
be encouraging.";

/// Greeting shown before the visitor types anything
pub const FLIPBOT_GREETING: &str = "¡Hola! Soy FlipBot. ¿En qué puedo ayudarte a escalar tu negocio hoy?";

/// Assistant configuration
#[derive(Clone, Debug)]
pub struct AssistantConfig {
    pub system_prompt: String,

    pub generation: GenerationOptions,

    /// Longest visitor message accepted, in characters
    pub max_message_chars: usize,

    /// Context budget for stored conversations (estimated tokens)
    pub max_context_tokens: u32,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            system_prompt: FLIPBOT_PROMPT.into(),
            generation: GenerationOptions::default(),
            max_message_chars: 4000,
            max_context_tokens: 8192,
        }
    }
}

/// The chat widget's assistant
pub struct ChatAssistant {
    provider: Arc<dyn LlmProvider>,
    config: AssistantConfig,
}

impl ChatAssistant {
    pub fn new(provider: Arc<dyn LlmProvider>, config: AssistantConfig) -> Self {
        Self { provider, config }
    }

    pub fn with_defaults(provider: Arc<dyn LlmProvider>) -> Self {
        Self::new(provider, AssistantConfig::default())
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    pub fn model(&self) -> &str {
        &self.config.generation.model
    }

    /// Fresh conversation seeded with the system instruction
    pub fn new_conversation(&self) -> Conversation {
        Conversation::with_system_prompt(&self.config.system_prompt)
            .with_max_context(self.config.max_context_tokens)
    }

    fn validate(&self, text: &str) -> Result<String> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::InvalidRequest("message is empty".into()));
        }
        if text.chars().count() > self.config.max_message_chars {
            return Err(ChatError::InvalidRequest(format!(
                "message exceeds {} characters",
                self.config.max_message_chars
            )));
        }
        Ok(text.to_string())
    }

    /// Send one visitor message and append the exchange to `conversation`
    pub async fn reply(&self, conversation: &mut Conversation, text: &str) -> Result<String> {
        let text = self.validate(text)?;
        conversation.push(Message::user(text));
        conversation.truncate_to_fit();

        let completion = self
            .provider
            .complete(conversation.messages(), &self.config.generation)
            .await?;

        if completion.content.trim().is_empty() {
            tracing::warn!(model = %completion.model, finish_reason = ?completion.finish_reason, "Provider returned empty text");
            return Err(ChatError::EmptyResponse);
        }

        tracing::debug!(
            model = %completion.model,
            usage = ?completion.usage,
            turns = conversation.len(),
            "Assistant replied"
        );

        conversation.push(Message::assistant(&completion.content).with_model(&completion.model));
        Ok(completion.content)
    }

    /// One-shot question without history
    pub async fn ask(&self, text: &str) -> Result<String> {
        let mut conversation = self.new_conversation();
        self.reply(&mut conversation, text).await
    }

    /// Stream the answer to `text` given the prior `conversation`.
    ///
    /// The conversation is not modified; call [`Self::record_exchange`] once the
    /// stream has been drained.
    pub async fn reply_stream(
        &self,
        conversation: &Conversation,
        text: &str,
    ) -> Result<CompletionStream> {
        let text = self.validate(text)?;
        let mut pending = conversation.clone();
        pending.push(Message::user(text));
        pending.truncate_to_fit();

        self.provider
            .complete_stream(pending.messages(), &self.config.generation)
            .await
    }

    /// Append a streamed exchange to the conversation
    pub fn record_exchange(&self, conversation: &mut Conversation, user: &str, answer: &str) {
        conversation.push(Message::user(user.trim()));
        conversation.push(Message::assistant(answer).with_model(self.model()));
        conversation.truncate_to_fit();
    }
}
