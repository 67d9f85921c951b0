//! Sequential trial executor.
//!
//! Runs one prompt N times, one call at a time, and collects the outputs
//! into a [`RunBundle`]. A failed model call aborts the whole batch: no
//! partial bundle is returned and nothing is persisted.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::Instrument;

use reliability_core::{OutputValue, ResultsStore, RunBundle, RunRecord, Validator};

use crate::model::{ModelClient, OutputMode};
use crate::providers::ProviderError;
use crate::RuntimeError;

/// Default number of trials per batch.
pub const DEFAULT_RUNS: u32 = 10;

/// One batch of trials to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub prompt: String,
    pub task: String,
    pub version: String,
    pub runs: u32,
    pub temperature: f64,
    pub mode: OutputMode,
}

impl RunRequest {
    pub fn new(
        prompt: impl Into<String>,
        task: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            task: task.into(),
            version: version.into(),
            runs: DEFAULT_RUNS,
            temperature: 0.0,
            mode: OutputMode::Text,
        }
    }

    pub fn with_runs(mut self, runs: u32) -> Self {
        self.runs = runs;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_mode(mut self, mode: OutputMode) -> Self {
        self.mode = mode;
        self
    }

    /// Shorthand for `with_mode(OutputMode::Structured)`.
    pub fn structured(self) -> Self {
        self.with_mode(OutputMode::Structured)
    }
}

/// Executes run requests against a [`ModelClient`].
#[derive(Clone)]
pub struct RunExecutor {
    model: Arc<dyn ModelClient>,
}

impl RunExecutor {
    pub fn new(model: Arc<dyn ModelClient>) -> Self {
        Self { model }
    }

    /// Run every trial of `request` and return the finished bundle.
    ///
    /// Records are numbered 1..=runs in call order. Without a validator each
    /// record is left unvalidated. `created_at` is stamped after the last
    /// trial returns.
    pub async fn execute(
        &self,
        request: &RunRequest,
        validator: Option<&dyn Validator>,
    ) -> Result<RunBundle, RuntimeError> {
        if request.runs == 0 {
            return Err(RuntimeError::InvalidRunCount);
        }
        if !request.temperature.is_finite() {
            return Err(RuntimeError::InvalidTemperature(request.temperature));
        }

        let model = self.model.resolve_model();
        let span = tracing::info_span!(
            "run_batch",
            task = %request.task,
            version = %request.version,
            model = %model,
            runs = request.runs,
        );

        async move {
            let mut records = Vec::with_capacity(request.runs as usize);

            for run in 1..=request.runs {
                let output = self
                    .call_once(request, &model)
                    .await
                    .map_err(|source| {
                        tracing::warn!(run, error = %source, "Model call failed, aborting batch");
                        RuntimeError::ModelCall { run, source }
                    })?;

                let record = match validator {
                    Some(v) => {
                        let judgment = v.validate(&output);
                        RunRecord::judged(run, output, judgment)
                    }
                    None => RunRecord::unvalidated(run, output),
                };
                tracing::debug!(run, valid = ?record.valid, reason = %record.reason, "Trial finished");
                records.push(record);
            }

            let bundle = RunBundle {
                task: request.task.clone(),
                version: request.version.clone(),
                model,
                temperature: request.temperature,
                runs: request.runs,
                created_at: Utc::now(),
                records,
            };

            let valid = bundle.records.iter().filter(|r| r.valid.is_valid()).count();
            tracing::info!(runs = bundle.runs, valid, "Batch complete");
            Ok::<_, RuntimeError>(bundle)
        }
        .instrument(span)
        .await
    }

    /// Execute `request` and persist the bundle. Nothing is written if any
    /// trial fails.
    pub async fn execute_and_save(
        &self,
        request: &RunRequest,
        validator: Option<&dyn Validator>,
        store: &ResultsStore,
    ) -> Result<(PathBuf, RunBundle), RuntimeError> {
        let bundle = self.execute(request, validator).await?;
        let path = store.save(&bundle)?;
        Ok((path, bundle))
    }

    async fn call_once(
        &self,
        request: &RunRequest,
        model: &str,
    ) -> Result<OutputValue, ProviderError> {
        match request.mode {
            OutputMode::Text => self
                .model
                .call_text(&request.prompt, model, request.temperature)
                .await
                .map(OutputValue::Text),
            OutputMode::Structured => self
                .model
                .call_structured(&request.prompt, model, request.temperature)
                .await
                .map(OutputValue::Structured),
        }
    }
}

impl std::fmt::Debug for RunExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunExecutor").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use reliability_core::{Judgment, Validity, NOT_VALIDATED};
    use serde_json::{Map, Value};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Returns "reply-<n>" for call n, failing on call `fail_on` if set.
    struct CountingModel {
        calls: AtomicU32,
        fail_on: Option<u32>,
    }

    impl CountingModel {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                fail_on: None,
            })
        }

        fn failing_on(call: u32) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                fail_on: Some(call),
            })
        }

        fn next(&self) -> Result<u32, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on == Some(n) {
                return Err(ProviderError::HttpError("connection reset".to_string()));
            }
            Ok(n)
        }
    }

    #[async_trait]
    impl ModelClient for CountingModel {
        fn resolve_model(&self) -> String {
            "counting-model".to_string()
        }

        async fn call_text(
            &self,
            _prompt: &str,
            _model: &str,
            _temperature: f64,
        ) -> Result<String, ProviderError> {
            self.next().map(|n| format!("reply-{}", n))
        }

        async fn call_structured(
            &self,
            _prompt: &str,
            _model: &str,
            _temperature: f64,
        ) -> Result<Map<String, Value>, ProviderError> {
            let n = self.next()?;
            let mut map = Map::new();
            map.insert("n".to_string(), Value::from(n));
            Ok(map)
        }
    }

    fn request(runs: u32) -> RunRequest {
        RunRequest::new("Describe a mug.", "product", "v1").with_runs(runs)
    }

    #[test]
    fn test_request_defaults() {
        let request = RunRequest::new("p", "t", "v");
        assert_eq!(request.runs, DEFAULT_RUNS);
        assert_eq!(request.temperature, 0.0);
        assert_eq!(request.mode, OutputMode::Text);
        assert_eq!(request.structured().mode, OutputMode::Structured);
    }

    #[tokio::test]
    async fn test_records_are_numbered_in_call_order() {
        let executor = RunExecutor::new(CountingModel::new());
        let bundle = executor.execute(&request(4), None).await.unwrap();

        assert_eq!(bundle.runs, 4);
        assert_eq!(bundle.model, "counting-model");
        assert_eq!(bundle.task, "product");
        assert!(bundle.check_invariants().is_ok());
        for (i, record) in bundle.records.iter().enumerate() {
            assert_eq!(record.run, i as u32 + 1);
            assert_eq!(record.output, OutputValue::text(format!("reply-{}", i + 1)));
            assert_eq!(record.valid, Validity::Unknown);
            assert_eq!(record.reason, NOT_VALIDATED);
        }
    }

    #[tokio::test]
    async fn test_validator_judges_each_output() {
        let validator = |output: &OutputValue| -> Judgment {
            match output.as_text() {
                Some("reply-2") => Judgment::invalid("format_mismatch"),
                _ => Judgment::valid("ok"),
            }
        };

        let executor = RunExecutor::new(CountingModel::new());
        let bundle = executor
            .execute(&request(3), Some(&validator))
            .await
            .unwrap();

        let verdicts: Vec<_> = bundle
            .records
            .iter()
            .map(|r| (r.valid, r.reason.as_str()))
            .collect();
        assert_eq!(
            verdicts,
            vec![
                (Validity::Valid, "ok"),
                (Validity::Invalid, "format_mismatch"),
                (Validity::Valid, "ok"),
            ]
        );
    }

    #[tokio::test]
    async fn test_structured_mode() {
        let executor = RunExecutor::new(CountingModel::new());
        let bundle = executor
            .execute(&request(2).structured(), None)
            .await
            .unwrap();

        let first = bundle.records[0].output.as_structured().unwrap();
        assert_eq!(first["n"], 1);
    }

    #[tokio::test]
    async fn test_zero_runs_rejected_before_any_call() {
        let model = CountingModel::new();
        let executor = RunExecutor::new(model.clone());

        let result = executor.execute(&request(0), None).await;
        assert!(matches!(result, Err(RuntimeError::InvalidRunCount)));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_non_finite_temperature_rejected_before_any_call() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultsStore::new(dir.path().join("results"));
        let model = CountingModel::new();
        let executor = RunExecutor::new(model.clone());

        for temperature in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let result = executor
                .execute_and_save(&request(2).with_temperature(temperature), None, &store)
                .await;
            assert!(matches!(result, Err(RuntimeError::InvalidTemperature(_))));
        }
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
        assert!(!store.dir().exists());
    }

    #[tokio::test]
    async fn test_failure_aborts_batch() {
        let model = CountingModel::failing_on(3);
        let executor = RunExecutor::new(model.clone());

        match executor.execute(&request(5), None).await {
            Err(RuntimeError::ModelCall { run, source }) => {
                assert_eq!(run, 3);
                assert!(matches!(source, ProviderError::HttpError(_)));
            }
            other => panic!("expected ModelCall error, got {:?}", other),
        }
        // Trials after the failure never run.
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failure_persists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultsStore::new(dir.path().join("results"));
        let executor = RunExecutor::new(CountingModel::failing_on(2));

        let result = executor.execute_and_save(&request(3), None, &store).await;
        assert!(result.is_err());
        assert!(!store.dir().exists());
    }

    #[tokio::test]
    async fn test_execute_and_save_writes_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultsStore::new(dir.path());
        let executor = RunExecutor::new(CountingModel::new());

        let (path, bundle) = executor
            .execute_and_save(&request(2), None, &store)
            .await
            .unwrap();

        assert!(path.starts_with(dir.path()));
        let loaded = ResultsStore::load(&path).unwrap();
        assert_eq!(loaded.records, bundle.records);
        assert_eq!(loaded.model, "counting-model");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_records_numbered_one_to_n(runs in 1u32..50) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap();
            let bundle = runtime
                .block_on(RunExecutor::new(CountingModel::new()).execute(&request(runs), None))
                .unwrap();

            prop_assert_eq!(bundle.runs, runs);
            prop_assert_eq!(bundle.records.len(), runs as usize);
            for (i, record) in bundle.records.iter().enumerate() {
                prop_assert_eq!(record.run, i as u32 + 1);
            }
            prop_assert!(bundle.check_invariants().is_ok());
        }
    }
}
