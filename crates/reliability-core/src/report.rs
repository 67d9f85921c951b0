//! Aggregation of a persisted batch into a reliability report.
//!
//! The summary is recomputed from the loaded `records` every time; nothing
//! the executor knew in memory is trusted here.
//!
//! Fixed rules:
//! 1. `score` is the valid share in percent, rounded to one decimal with
//!    halves rounded away from zero.
//! 2. Failure reasons are counted over invalid records only; equal counts
//!    keep the order in which each reason was first seen.
//! 3. Two outputs are the same output iff their canonical JSON is identical.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::store::{ResultsStore, StoreError};
use crate::types::{RunBundle, RunRecord, Validity};

/// How many failure reasons a report lists.
pub const TOP_REASONS: usize = 10;

/// How often one failure reason occurred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReasonCount {
    pub reason: String,
    pub count: usize,
}

/// Statistics recomputed from a batch's records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub valid_count: usize,
    pub invalid_count: usize,
    pub not_validated: usize,

    /// `valid_count / total`, or `0.0` for an empty batch
    pub valid_rate: f64,

    /// `valid_rate * 100` rounded to one decimal
    pub score: f64,

    /// Most common failure reasons, at most [`TOP_REASONS`]
    pub reasons: Vec<ReasonCount>,

    /// Distinct canonical outputs (drift signal)
    pub unique_outputs: usize,
}

impl Summary {
    pub fn from_records(records: &[RunRecord]) -> Self {
        let total = records.len();
        let valid_count = records.iter().filter(|r| r.valid == Validity::Valid).count();
        let invalid_count = records
            .iter()
            .filter(|r| r.valid == Validity::Invalid)
            .count();
        let not_validated = total - valid_count - invalid_count;

        let valid_rate = if total > 0 {
            valid_count as f64 / total as f64
        } else {
            0.0
        };

        Self {
            total,
            valid_count,
            invalid_count,
            not_validated,
            valid_rate,
            score: round_to_tenth(valid_rate * 100.0),
            reasons: top_reasons(records, TOP_REASONS),
            unique_outputs: unique_outputs(records),
        }
    }
}

/// Round to one decimal place, halves away from zero.
pub fn round_to_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Failure reason histogram, most frequent first, ties in first-seen order.
fn top_reasons(records: &[RunRecord], limit: usize) -> Vec<ReasonCount> {
    let mut counts: Vec<ReasonCount> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for record in records.iter().filter(|r| r.valid.is_invalid()) {
        match index.get(record.reason.as_str()) {
            Some(&slot) => counts[slot].count += 1,
            None => {
                index.insert(record.reason.as_str(), counts.len());
                counts.push(ReasonCount {
                    reason: record.reason.clone(),
                    count: 1,
                });
            }
        }
    }

    // Stable sort keeps first-seen order among equal counts.
    counts.sort_by(|a, b| b.count.cmp(&a.count));
    counts.truncate(limit);
    counts
}

fn unique_outputs(records: &[RunRecord]) -> usize {
    records
        .iter()
        .map(|r| r.output.canonical_json())
        .collect::<HashSet<_>>()
        .len()
}

/// A rendered view of one persisted batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    /// File the batch was loaded from
    pub source: PathBuf,
    pub task: String,
    pub version: String,
    pub model: String,
    pub summary: Summary,
}

impl Report {
    /// Build a report for a bundle loaded from `source`.
    pub fn new(source: impl AsRef<Path>, bundle: &RunBundle) -> Self {
        Self {
            source: source.as_ref().to_path_buf(),
            task: bundle.task.clone(),
            version: bundle.version.clone(),
            model: bundle.model.clone(),
            summary: Summary::from_records(&bundle.records),
        }
    }

    /// Report on the most recent batch in `store`.
    pub fn latest(store: &ResultsStore) -> Result<Self, StoreError> {
        let (path, bundle) = store.load_latest()?;
        Ok(Self::new(path, &bundle))
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.summary;

        writeln!(f, "Latest results: {}", self.source.display())?;
        writeln!(
            f,
            "Task: {} | Version: {} | Model: {}",
            self.task, self.version, self.model
        )?;
        writeln!(f, "Runs: {}", s.total)?;
        writeln!(f, "Valid: {}", s.valid_count)?;
        writeln!(f, "Invalid: {}", s.invalid_count)?;
        writeln!(f, "Reliability score: {:.1}/100", s.score)?;
        writeln!(f, "Not validated: {}", s.not_validated)?;
        writeln!(f, "Unique outputs: {}/{}", s.unique_outputs, s.total)?;

        if s.invalid_count > 0 {
            writeln!(f)?;
            writeln!(f, "Top failure reasons:")?;
            for entry in &s.reasons {
                writeln!(f, "- {}: {}", entry.reason, entry.count)?;
            }
        }

        Ok(())
    }
}
