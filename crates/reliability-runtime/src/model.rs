//! Model-call capability used by the executor.
//!
//! [`ModelClient`] is the seam between a reliability run and a concrete
//! backend. [`ProviderModel`] implements it on top of any [`LlmProvider`].

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::config::RuntimeConfig;
use crate::providers::{
    ChatMessage, CompletionConfig, LlmProvider, ProviderError, ProviderRegistry,
};
use crate::RuntimeError;

/// Environment variable overriding the configured model id.
pub const MODEL_ENV: &str = "RELIABILITY_MODEL";

const STRUCTURED_INSTRUCTION: &str = "Respond with a single JSON object and nothing else. \
Do not wrap it in Markdown or add commentary.";

lazy_static! {
    static ref JSON_FENCE: Regex =
        Regex::new(r"(?s)^\s*```(?:json|JSON)?\s*\n?(.*?)\n?\s*```\s*$").unwrap();
}

/// Shape of the output requested from the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputMode {
    #[default]
    Text,
    Structured,
}

/// The ability to call a language model.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Model id recorded in the bundle. Resolved once per batch.
    fn resolve_model(&self) -> String;

    async fn call_text(
        &self,
        prompt: &str,
        model: &str,
        temperature: f64,
    ) -> Result<String, ProviderError>;

    /// Call the model and parse its reply as a JSON object.
    async fn call_structured(
        &self,
        prompt: &str,
        model: &str,
        temperature: f64,
    ) -> Result<Map<String, Value>, ProviderError>;
}

/// [`ModelClient`] backed by an [`LlmProvider`].
pub struct ProviderModel {
    provider: Arc<dyn LlmProvider>,
    config: CompletionConfig,
}

impl ProviderModel {
    pub fn new(provider: Arc<dyn LlmProvider>, config: CompletionConfig) -> Self {
        Self { provider, config }
    }

    /// Build the provider named in `config` from `registry`.
    pub fn from_config(
        registry: &ProviderRegistry,
        config: &RuntimeConfig,
    ) -> Result<Self, RuntimeError> {
        if !registry.has_provider(&config.provider) {
            return Err(RuntimeError::ProviderNotConfigured(format!(
                "'{}' is not available in this build (available: {})",
                config.provider,
                registry.available_types().join(", ")
            )));
        }

        registry
            .validate(&config.provider, &config.provider_config)
            .map_err(|e| RuntimeError::ProviderNotConfigured(e.to_string()))?;

        let provider = registry
            .create(&config.provider, &config.provider_config)
            .map_err(|e| RuntimeError::ProviderNotConfigured(e.to_string()))?;

        Ok(Self::new(provider, config.completion_config(0.0)))
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        model: &str,
        temperature: f64,
        json_mode: bool,
    ) -> Result<String, ProviderError> {
        let config = CompletionConfig {
            model: model.to_string(),
            temperature,
            json_mode,
            ..self.config.clone()
        };

        let response = self.provider.complete(messages, &config).await?;
        tracing::debug!(
            provider = self.provider.name(),
            model = %response.model,
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            stop_reason = ?response.stop_reason,
            "Completion received"
        );
        Ok(response.content)
    }
}

impl std::fmt::Debug for ProviderModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderModel")
            .field("provider", &self.provider.name())
            .field("model", &self.config.model)
            .finish()
    }
}

#[async_trait]
impl ModelClient for ProviderModel {
    fn resolve_model(&self) -> String {
        model_override().unwrap_or_else(|| self.config.model.clone())
    }

    async fn call_text(
        &self,
        prompt: &str,
        model: &str,
        temperature: f64,
    ) -> Result<String, ProviderError> {
        self.complete(vec![ChatMessage::user(prompt)], model, temperature, false)
            .await
    }

    async fn call_structured(
        &self,
        prompt: &str,
        model: &str,
        temperature: f64,
    ) -> Result<Map<String, Value>, ProviderError> {
        let messages = vec![
            ChatMessage::system(STRUCTURED_INSTRUCTION),
            ChatMessage::user(prompt),
        ];
        let content = self.complete(messages, model, temperature, true).await?;
        parse_json_object(&content)
    }
}

fn model_override() -> Option<String> {
    std::env::var(MODEL_ENV)
        .ok()
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
}

/// Remove a surrounding Markdown code fence, if any.
fn strip_code_fence(content: &str) -> &str {
    match JSON_FENCE.captures(content).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => content.trim(),
    }
}

/// Parse a model reply that must be a single JSON object.
pub fn parse_json_object(content: &str) -> Result<Map<String, Value>, ProviderError> {
    let value: Value = serde_json::from_str(strip_code_fence(content))
        .map_err(|e| ProviderError::ParseError(format!("reply is not JSON: {}", e)))?;

    match value {
        Value::Object(map) => Ok(map),
        other => Err(ProviderError::ParseError(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
