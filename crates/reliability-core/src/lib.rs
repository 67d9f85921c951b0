//! # reliability-core
//!
//! Run records, results store and reliability aggregation for repeated
//! language-model trials.
//!
//! This crate answers, for one fixed prompt run N times:
//! - How often was the output judged valid?
//! - Why did the invalid ones fail?
//! - How much did the output drift between trials?
//!
//! ## Key Guarantees
//!
//! 1. **No model calls**: everything here is deterministic bookkeeping
//! 2. **Write-once store**: a bundle is persisted exactly once, atomically
//! 3. **Recomputed reports**: the report is derived from the persisted file,
//!    never from the executor's memory
//! 4. **Deterministic ties**: newest file ties break by name, reason ties by
//!    first appearance
//!
//! ## Example
//!
//! ```rust,ignore
//! use reliability_core::{Report, ResultsStore};
//!
//! let store = ResultsStore::new("results");
//! let path = store.save(&bundle)?;
//!
//! let report = Report::latest(&store)?;
//! println!("{}", report);
//! ```

pub mod report;
pub mod schema;
pub mod store;
pub mod types;
pub mod validation;

// Re-export main types at crate root
pub use report::{round_to_tenth, ReasonCount, Report, Summary, TOP_REASONS};
pub use schema::{is_valid_bundle, validate_bundle_schema, SchemaError};
pub use store::{ResultsStore, StoreError, DEFAULT_RESULTS_DIR};
pub use types::{BundleError, OutputValue, RunBundle, RunRecord, Validity, NOT_VALIDATED};
pub use validation::{Judgment, Validator};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;

    fn bundle_of(outputs: &[&str]) -> RunBundle {
        RunBundle {
            task: "product".to_string(),
            version: "v1".to_string(),
            model: "test-model".to_string(),
            temperature: 0.0,
            runs: outputs.len() as u32,
            created_at: Utc::now(),
            records: outputs
                .iter()
                .enumerate()
                .map(|(i, o)| RunRecord::unvalidated(i as u32 + 1, OutputValue::text(*o)))
                .collect(),
        }
    }

    #[test]
    fn test_persist_then_report() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultsStore::new(dir.path());
        store.save(&bundle_of(&["OK", "OK", "OK", "OK", "OK"])).unwrap();

        let report = Report::latest(&store).unwrap();
        assert_eq!(report.summary.total, 5);
        assert_eq!(report.summary.not_validated, 5);
        assert_eq!(report.summary.unique_outputs, 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_round_trip_preserves_records(
            cases in proptest::collection::vec((proptest::option::of(any::<bool>()), "[a-z]{0,6}", "\\PC{0,12}"), 1..12)
        ) {
            let dir = tempfile::tempdir().unwrap();
            let store = ResultsStore::new(dir.path());

            let mut bundle = bundle_of(&[]);
            bundle.runs = cases.len() as u32;
            bundle.records = cases
                .iter()
                .enumerate()
                .map(|(i, (valid, reason, text))| RunRecord {
                    run: i as u32 + 1,
                    output: OutputValue::text(text.clone()),
                    valid: (*valid).into(),
                    reason: reason.clone(),
                })
                .collect();

            let path = store.save(&bundle).unwrap();
            let loaded = ResultsStore::load(&path).unwrap();

            prop_assert_eq!(loaded.records.len(), bundle.records.len());
            prop_assert_eq!(&loaded.records, &bundle.records);
            prop_assert!(loaded.check_invariants().is_ok());
        }
    }
}
