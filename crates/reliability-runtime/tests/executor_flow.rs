//! End-to-end: scripted model -> executor -> results store -> report.

use std::sync::Arc;

use reliability_core::{Judgment, OutputValue, Report, ResultsStore, StoreError, Validity};
use reliability_runtime::{
    CompletionConfig, ProviderModel, ProviderRegistry, RunExecutor, RunRequest, RuntimeConfig,
    RuntimeError, ScriptedProvider,
};

fn scripted_executor(responses: &[&str]) -> RunExecutor {
    let provider = Arc::new(ScriptedProvider::new(responses.iter().copied()));
    let config = CompletionConfig {
        model: "scripted-model".to_string(),
        ..Default::default()
    };
    RunExecutor::new(Arc::new(ProviderModel::new(provider, config)))
}

#[tokio::test]
async fn mixed_verdicts_are_reported_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = ResultsStore::new(dir.path());

    // Judge the first two outputs; leave the third unvalidated.
    let executor = scripted_executor(&["valid answer", "bad answer", "third answer"]);
    let request = RunRequest::new("Write a title.", "title", "v1").with_runs(3);
    let mut bundle = executor.execute(&request, None).await.unwrap();

    let judge = |output: &OutputValue| match output.as_text() {
        Some("valid answer") => Judgment::valid("ok"),
        _ => Judgment::invalid("format_mismatch"),
    };
    for record in bundle.records.iter_mut().take(2) {
        let judgment = judge(&record.output);
        record.valid = judgment.valid.into();
        record.reason = judgment.reason;
    }
    assert_eq!(bundle.records[2].valid, Validity::Unknown);

    let path = store.save(&bundle).unwrap();
    let report = Report::latest(&store).unwrap();

    assert_eq!(report.source, path);
    assert_eq!(report.model, "scripted-model");
    assert_eq!(report.summary.total, 3);
    assert_eq!(report.summary.valid_count, 1);
    assert_eq!(report.summary.invalid_count, 1);
    assert_eq!(report.summary.not_validated, 1);
    assert_eq!(report.summary.score, 33.3);
    assert_eq!(report.summary.reasons.len(), 1);
    assert_eq!(report.summary.reasons[0].reason, "format_mismatch");
    assert_eq!(report.summary.reasons[0].count, 1);
    assert_eq!(report.summary.unique_outputs, 3);

    let text = report.to_string();
    assert!(text.contains("Reliability score: 33.3/100"));
    assert!(text.contains("- format_mismatch: 1"));
}

#[tokio::test]
async fn identical_outputs_have_no_drift() {
    let dir = tempfile::tempdir().unwrap();
    let store = ResultsStore::new(dir.path());

    let validator = |output: &OutputValue| (output.as_text() == Some("OK"), "ok");
    let executor = scripted_executor(&["OK"]);
    let request = RunRequest::new("Say OK.", "smoke", "v1").with_runs(5);

    executor
        .execute_and_save(&request, Some(&validator), &store)
        .await
        .unwrap();

    let report = Report::latest(&store).unwrap();
    assert_eq!(report.summary.total, 5);
    assert_eq!(report.summary.valid_count, 5);
    assert_eq!(report.summary.score, 100.0);
    assert_eq!(report.summary.unique_outputs, 1);
    assert!(!report.to_string().contains("Top failure reasons"));
}

#[tokio::test]
async fn structured_outputs_compare_by_content() {
    let dir = tempfile::tempdir().unwrap();
    let store = ResultsStore::new(dir.path());

    let executor = scripted_executor(&[
        "{\"title\": \"Mug\", \"price\": 12}",
        "```json\n{\"price\": 12, \"title\": \"Mug\"}\n```",
    ]);
    let request = RunRequest::new("Describe.", "listing", "v2")
        .with_runs(2)
        .structured();

    let (path, _) = executor
        .execute_and_save(&request, None, &store)
        .await
        .unwrap();

    let loaded = ResultsStore::load(&path).unwrap();
    assert!(loaded.records.iter().all(|r| !r.output.is_text()));

    let report = Report::latest(&store).unwrap();
    assert_eq!(report.summary.unique_outputs, 1);
    assert_eq!(report.summary.not_validated, 2);
}

#[tokio::test]
async fn failed_batch_leaves_store_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = ResultsStore::new(dir.path());

    // Second reply is not a JSON object, so structured mode fails on run 2.
    let executor = scripted_executor(&["{\"ok\": true}", "[1, 2, 3]"]);
    let request = RunRequest::new("Describe.", "listing", "v1")
        .with_runs(3)
        .structured();

    let err = executor
        .execute_and_save(&request, None, &store)
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::ModelCall { run: 2, .. }));

    assert!(matches!(
        Report::latest(&store),
        Err(StoreError::NoResults { .. })
    ));
}

#[tokio::test]
async fn config_driven_scripted_run() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = format!(
        "provider: scripted\nmodel: offline\nresults_dir: {}\nprovider_config:\n  responses: [alpha, beta]\n",
        dir.path().join("out").display()
    );
    let config = RuntimeConfig::from_yaml(&yaml).unwrap();

    let model = ProviderModel::from_config(&ProviderRegistry::with_defaults(), &config).unwrap();
    let executor = RunExecutor::new(Arc::new(model));
    let request = RunRequest::new("Name a colour.", "colour", "v1").with_runs(4);

    let store = config.results_store();
    executor
        .execute_and_save(&request, None, &store)
        .await
        .unwrap();

    let report = Report::latest(&store).unwrap();
    assert_eq!(report.summary.total, 4);
    assert_eq!(report.summary.unique_outputs, 2);
    assert_eq!(report.summary.score, 0.0);
}
