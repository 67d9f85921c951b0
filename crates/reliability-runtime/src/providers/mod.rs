//! LLM provider abstractions for reliability-runtime.
//!
//! This module defines the trait every backend implements, plus the
//! adapters shipped with the crate:
//! - `scripted`: replays canned responses, always available
//! - `anthropic`: Anthropic Messages API (feature `anthropic`)
//! - `openai`: OpenAI Chat Completions API (feature `openai`)
//!
//! ## Security
//!
//! Network providers load their API keys through [`ApiCredential`], which
//! never prints the key in `Debug` output.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

mod factory;
mod scripted;
pub mod secrets;

#[cfg(feature = "anthropic")]
mod anthropic;

#[cfg(feature = "openai")]
mod openai;

pub use factory::{ProviderFactory, ProviderRegistry};
pub use scripted::{ScriptedProvider, ScriptedProviderFactory};
pub use secrets::{ApiCredential, CredentialSource};

#[cfg(feature = "anthropic")]
pub use anthropic::{AnthropicProvider, AnthropicProviderFactory};

#[cfg(feature = "openai")]
pub use openai::{OpenAiProvider, OpenAiProviderFactory};

/// Errors from LLM providers.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    ParseError(String),

    #[error("Authentication failed")]
    AuthError,

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

/// Configuration for a completion request.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    /// Model to use
    pub model: String,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Sampling temperature
    pub temperature: f64,

    /// Request timeout
    pub timeout: Duration,

    /// Ask the backend for a single JSON object, where it supports that
    pub json_mode: bool,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5-20250514".to_string(),
            max_tokens: 1024,
            temperature: 0.0,
            timeout: Duration::from_secs(60),
            json_mode: false,
        }
    }
}

/// A chat message for LLM completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role: "system", "user", or "assistant"
    pub role: String,

    /// Message content
    pub content: String,
}

impl ChatMessage {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn is_system(&self) -> bool {
        self.role == "system"
    }
}

/// Response from an LLM completion.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Generated content
    pub content: String,

    /// Token usage
    pub usage: TokenUsage,

    /// Model that actually served the request
    pub model: String,

    /// Stop reason
    pub stop_reason: Option<String>,
}

/// Token usage from a completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    /// Total tokens used.
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Provider abstraction allows swapping LLM backends.
///
/// Implementations make exactly one request per `complete` call: no retry,
/// no fallback. A failed request is reported as-is.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Execute a chat completion.
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Check if provider is usable (credentials present, etc.).
    async fn health_check(&self) -> bool;

    /// Provider name for logs.
    fn name(&self) -> &str;
}

/// Split a leading system message from the rest of the conversation.
///
/// Shared by adapters whose APIs take the system prompt out of band.
#[cfg_attr(not(feature = "anthropic"), allow(dead_code))]
pub(crate) fn split_system(messages: Vec<ChatMessage>) -> (Option<String>, Vec<ChatMessage>) {
    let mut system: Option<String> = None;
    let mut others = Vec::with_capacity(messages.len());

    for msg in messages {
        if msg.is_system() {
            system = Some(match system {
                Some(existing) => format!("{}\n\n{}", existing, msg.content),
                None => msg.content,
            });
        } else {
            others.push(msg);
        }
    }

    (system, others)
}

/// Reject a `base_url` setting that is not an http(s) URL.
#[cfg_attr(not(any(feature = "anthropic", feature = "openai")), allow(dead_code))]
pub(crate) fn validate_base_url(config: &serde_json::Value) -> Result<(), ProviderError> {
    if let Some(url) = config["base_url"].as_str() {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ProviderError::NotConfigured(
                "base_url must start with http:// or https://".to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_creation() {
        let system = ChatMessage::system("Answer with JSON.");
        assert_eq!(system.role, "system");
        assert!(system.is_system());

        let user = ChatMessage::user("Describe this mug.");
        assert_eq!(user.role, "user");
        assert!(!user.is_system());
    }

    #[test]
    fn test_token_usage_total() {
        let usage = TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 50,
        };
        assert_eq!(usage.total(), 150);
    }

    #[test]
    fn test_split_system_merges_system_messages() {
        let (system, rest) = split_system(vec![
            ChatMessage::system("one"),
            ChatMessage::user("prompt"),
            ChatMessage::system("two"),
        ]);
        assert_eq!(system.as_deref(), Some("one\n\ntwo"));
        assert_eq!(rest, vec![ChatMessage::user("prompt")]);
    }

    #[test]
    fn test_validate_base_url() {
        assert!(validate_base_url(&serde_json::json!({})).is_ok());
        assert!(validate_base_url(&serde_json::json!({"base_url": "https://x"})).is_ok());
        assert!(validate_base_url(&serde_json::json!({"base_url": "ftp://x"})).is_err());
    }

    #[test]
    fn test_split_system_without_system() {
        let (system, rest) = split_system(vec![ChatMessage::user("prompt")]);
        assert!(system.is_none());
        assert_eq!(rest.len(), 1);
    }
}
