//! LLM: adapter for the hosted chat-completion provider.
//!
//! DESIGN
//! ======
//! The relay depends only on the [`LlmChat`] trait. [`LlmClient`] is the
//! production implementation: an OpenAI-compatible `/chat/completions`
//! client configured from environment variables.

pub mod config;
pub mod openai;
pub mod types;

use config::LlmConfig;
pub use types::LlmChat;
use types::{ChatMessage, ChatResponse, LlmError};

/// Concrete LLM client configured by [`LlmClient::from_env`].
pub struct LlmClient {
    inner: openai::OpenAiClient,
    model: String,
}

impl LlmClient {
    /// Build an LLM client from environment variables (see [`LlmConfig::from_env`]).
    ///
    /// # Errors
    ///
    /// Returns an error if the API key is missing or the HTTP client fails.
    pub fn from_env() -> Result<Self, LlmError> {
        let config = LlmConfig::from_env()?;
        Self::from_config(config)
    }

    /// Build an LLM client from a parsed typed config.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider HTTP client fails to build.
    pub fn from_config(config: LlmConfig) -> Result<Self, LlmError> {
        let inner = openai::OpenAiClient::new(config.api_key, config.base_url, config.timeouts)?;
        Ok(Self { inner, model: config.model })
    }

    /// Return the default model name (e.g. `"gpt-4o-mini"`).
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait::async_trait]
impl LlmChat for LlmClient {
    async fn chat(
        &self,
        model: Option<&str>,
        max_tokens: u32,
        messages: &[ChatMessage],
    ) -> Result<ChatResponse, LlmError> {
        let model = model.unwrap_or(&self.model);
        self.inner.chat(model, max_tokens, messages).await
    }
}
