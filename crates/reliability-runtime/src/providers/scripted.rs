//! Scripted provider: replays canned responses in order, cycling.
//!
//! Makes no network calls. Useful for dry runs of a pipeline and for
//! exercising validators against known outputs.
//!
//! ## Configuration Format
//! ```json
//! { "responses": ["first answer", "{\"title\": \"Mug\"}"] }
//! ```

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{
    factory::ProviderFactory, ChatMessage, CompletionConfig, CompletionResponse, LlmProvider,
    ProviderError, TokenUsage,
};

/// Provider returning configured responses one after another.
#[derive(Debug)]
pub struct ScriptedProvider {
    responses: Vec<String>,
    cursor: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: responses.into_iter().map(Into::into).collect(),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Number of completions served so far.
    pub fn calls(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    fn from_config(config: &JsonValue) -> Result<Self, ProviderError> {
        let responses = config["responses"].as_array().ok_or_else(|| {
            ProviderError::NotConfigured("scripted provider needs a 'responses' array".to_string())
        })?;

        let responses = responses
            .iter()
            .map(|r| {
                r.as_str().map(str::to_string).ok_or_else(|| {
                    ProviderError::NotConfigured(
                        "scripted provider responses must be strings".to_string(),
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::new(responses))
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(
        &self,
        _messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        if self.responses.is_empty() {
            return Err(ProviderError::NotConfigured(
                "scripted provider has no responses".to_string(),
            ));
        }

        let index = self.cursor.fetch_add(1, Ordering::SeqCst) % self.responses.len();
        Ok(CompletionResponse {
            content: self.responses[index].clone(),
            usage: TokenUsage::default(),
            model: config.model.clone(),
            stop_reason: Some("end_turn".to_string()),
        })
    }

    async fn health_check(&self) -> bool {
        !self.responses.is_empty()
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Factory for [`ScriptedProvider`].
pub struct ScriptedProviderFactory;

impl ProviderFactory for ScriptedProviderFactory {
    fn provider_type(&self) -> &'static str {
        "scripted"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        Ok(Arc::new(ScriptedProvider::from_config(config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        let provider = ScriptedProvider::from_config(config)?;
        if provider.responses.is_empty() {
            return Err(ProviderError::NotConfigured(
                "scripted provider needs at least one response".to_string(),
            ));
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Offline provider replaying configured responses"
    }
}
