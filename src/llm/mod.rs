//! LLM integration for autoresearch.
//!
//! The text-generation capability is consumed through the [`LlmProvider`]
//! trait. Stages never talk to a provider directly; they go through
//! [`invoke`], which sends a single user prompt and returns the text content.
//!
//! ```ignore
//! use autoresearch::llm::{invoke, LiteLlmClient, LlmSettings};
//!
//! let client = LiteLlmClient::new(api_base, Some(api_key), "llama-3.1-8b-instant".into());
//! let text = invoke(&client, "Summarise this domain", &LlmSettings::default()).await?;
//! ```

pub mod litellm;

#[cfg(test)]
pub(crate) mod testing;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;

pub use litellm::{
    Choice, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider, Message, Usage,
    DEFAULT_MODEL,
};

/// Sampling settings applied to every prompt a stage sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Model identifier; empty means the provider's default.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Maximum tokens per response.
    pub max_tokens: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: String::new(),
            temperature: 0.7,
            max_tokens: 2048,
        }
    }
}

impl LlmSettings {
    /// Returns a copy with a different temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }
}

/// Sends a single prompt and returns the generated text.
///
/// This is a single-shot call: there is no internal retry. Callers recover
/// by falling back, not by repeating.
pub async fn invoke(
    provider: &dyn LlmProvider,
    prompt: &str,
    settings: &LlmSettings,
) -> Result<String, LlmError> {
    let request = GenerationRequest::new(settings.model.clone(), vec![Message::user(prompt)])
        .with_temperature(settings.temperature)
        .with_max_tokens(settings.max_tokens);

    let response = provider.generate(request).await?;
    let content = response.first_content().ok_or(LlmError::EmptyResponse)?;
    if content.trim().is_empty() {
        return Err(LlmError::EmptyResponse);
    }
    Ok(content.to_string())
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedLlm;
    use super::*;

    #[tokio::test]
    async fn test_invoke_returns_content() {
        let llm = ScriptedLlm::always("hello");
        let text = invoke(&llm, "hi", &LlmSettings::default())
            .await
            .expect("invoke should succeed");
        assert_eq!(text, "hello");
        assert_eq!(llm.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_invoke_rejects_blank_content() {
        let llm = ScriptedLlm::always("   ");
        let result = invoke(&llm, "hi", &LlmSettings::default()).await;
        assert!(matches!(result, Err(LlmError::EmptyResponse)));
    }

    #[tokio::test]
    async fn test_invoke_propagates_transport_error() {
        let llm = ScriptedLlm::failing("connection refused");
        let result = invoke(&llm, "hi", &LlmSettings::default()).await;
        assert!(matches!(result, Err(LlmError::RequestFailed(_))));
    }

    #[test]
    fn test_settings_clamp_temperature() {
        let settings = LlmSettings::default().with_temperature(5.0);
        assert!((settings.temperature - 2.0).abs() < f64::EPSILON);
    }
}
