//! # reliability-runtime
//!
//! Runs a prompt against a language model N times and collects the outputs
//! into a [`RunBundle`](reliability_core::RunBundle).
//!
//! Trials are strictly sequential. There is no retry and no fallback: a
//! failed model call aborts the batch and nothing is persisted.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use reliability_runtime::{ProviderModel, ProviderRegistry, RunExecutor, RunRequest, RuntimeConfig};
//!
//! let config = RuntimeConfig::from_yaml_file("reliability.yaml")?;
//! let model = ProviderModel::from_config(&ProviderRegistry::with_defaults(), &config)?;
//! let executor = RunExecutor::new(Arc::new(model));
//!
//! let request = RunRequest::new("Write a product title for a ceramic mug.", "title", "v1").with_runs(5);
//! let (path, bundle) = executor.execute_and_save(&request, None, &config.results_store()).await?;
//! ```

use thiserror::Error;

pub mod config;
pub mod executor;
pub mod model;
pub mod providers;

pub use config::{ConfigError, RuntimeConfig};
pub use executor::{RunExecutor, RunRequest, DEFAULT_RUNS};
pub use model::{parse_json_object, ModelClient, OutputMode, ProviderModel, MODEL_ENV};
pub use providers::{
    ApiCredential, ChatMessage, CompletionConfig, CompletionResponse, CredentialSource,
    LlmProvider, ProviderError, ProviderFactory, ProviderRegistry, ScriptedProvider,
    ScriptedProviderFactory, TokenUsage,
};

use reliability_core::StoreError;

/// Errors from the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("LLM provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error("Run count must be at least 1")]
    InvalidRunCount,

    #[error("Temperature must be a finite number, got {0}")]
    InvalidTemperature(f64),

    #[error("Model call failed on run {run}: {source}")]
    ModelCall {
        run: u32,
        #[source]
        source: ProviderError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
