//! Runtime configuration, loaded from YAML.
//!
//! ```yaml
//! provider: openai
//! model: gpt-4o-mini
//! max_tokens: 512
//! timeout: 45s
//! results_dir: results
//! provider_config:
//!   base_url: https://api.openai.com/v1
//! ```
//!
//! Every key is optional. API keys belong in the environment; putting one
//! under `provider_config.api_key` works but is not recommended.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use reliability_core::{ResultsStore, DEFAULT_RESULTS_DIR};

use crate::providers::CompletionConfig;

/// Errors loading or checking configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Settings for a reliability run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Provider registry key
    pub provider: String,

    /// Model id used when `RELIABILITY_MODEL` is not set
    pub model: String,

    /// Maximum tokens per completion
    pub max_tokens: u32,

    /// Per-request timeout applied by network providers
    #[serde(with = "duration_human")]
    pub timeout: Duration,

    /// Directory holding persisted run bundles
    pub results_dir: PathBuf,

    /// Free-form settings handed to the provider factory
    pub provider_config: JsonValue,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let completion = CompletionConfig::default();
        Self {
            provider: "anthropic".to_string(),
            model: completion.model,
            max_tokens: completion.max_tokens,
            timeout: completion.timeout,
            results_dir: PathBuf::from(DEFAULT_RESULTS_DIR),
            provider_config: JsonValue::Object(Default::default()),
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document means "all defaults".
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.trim().is_empty() {
            return Err(ConfigError::Invalid("provider must not be empty".to_string()));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model must not be empty".to_string()));
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::Invalid("max_tokens must be positive".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::Invalid("timeout must be positive".to_string()));
        }
        if !self.provider_config.is_object() {
            return Err(ConfigError::Invalid(
                "provider_config must be a mapping".to_string(),
            ));
        }
        Ok(())
    }

    /// Completion settings for one trial; temperature comes from the run request.
    pub fn completion_config(&self, temperature: f64) -> CompletionConfig {
        CompletionConfig {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature,
            timeout: self.timeout,
            json_mode: false,
        }
    }

    pub fn results_store(&self) -> ResultsStore {
        ResultsStore::new(&self.results_dir)
    }
}

/// Durations as humantime strings ("45s", "2m"), or bare seconds.
mod duration_human {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Seconds(u64),
        Text(String),
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Repr::deserialize(deserializer)? {
            Repr::Seconds(secs) => Ok(Duration::from_secs(secs)),
            Repr::Text(text) => humantime::parse_duration(&text).map_err(D::Error::custom),
        }
    }
}
