//! Core types for reliability runs.
//!
//! These types mirror the persisted batch format one-to-one, so a bundle
//! written by the results store deserializes back into the same values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::validation::Judgment;

/// Reason recorded when no validator was applied to a trial.
pub const NOT_VALIDATED: &str = "not_validated";

/// The value returned by one model call.
///
/// Serialized untagged: free text is a JSON string, a structured result is
/// a JSON object. Structured maps keep the key order the model produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputValue {
    /// Free-text completion
    Text(String),

    /// Structured (key-value) completion
    Structured(Map<String, Value>),
}

impl OutputValue {
    /// Create a free-text output.
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text(content.into())
    }

    /// Create a structured output.
    pub fn structured(map: Map<String, Value>) -> Self {
        Self::Structured(map)
    }

    /// Whether this is a free-text output.
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    /// Borrow the text content, if this is a text output.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Structured(_) => None,
        }
    }

    /// Borrow the structured content, if this is a structured output.
    pub fn as_structured(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Text(_) => None,
            Self::Structured(map) => Some(map),
        }
    }

    /// Canonical JSON serialization used for output equality.
    ///
    /// Object keys are sorted at every depth, non-ASCII characters are
    /// written as-is, and no whitespace is emitted. Two outputs are the
    /// same output iff their canonical strings are byte-identical.
    pub fn canonical_json(&self) -> String {
        match self {
            Self::Text(text) => Value::String(text.clone()).to_string(),
            Self::Structured(map) => sorted_object(map).to_string(),
        }
    }
}

fn sorted_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => sorted_object(map),
        Value::Array(items) => Value::Array(items.iter().map(sorted_value).collect()),
        other => other.clone(),
    }
}

fn sorted_object(map: &Map<String, Value>) -> Value {
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let mut sorted = Map::with_capacity(entries.len());
    for (key, value) in entries {
        sorted.insert(key.clone(), sorted_value(value));
    }
    Value::Object(sorted)
}

/// Tri-state validity of a trial.
///
/// `Unknown` means no validator ran; it is a first-class state and is never
/// counted as invalid. Persisted as `true` / `false` / `null`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Option<bool>", into = "Option<bool>")]
pub enum Validity {
    Valid,
    Invalid,
    #[default]
    Unknown,
}

impl Validity {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }
}

impl From<Option<bool>> for Validity {
    fn from(value: Option<bool>) -> Self {
        match value {
            Some(true) => Self::Valid,
            Some(false) => Self::Invalid,
            None => Self::Unknown,
        }
    }
}

impl From<Validity> for Option<bool> {
    fn from(value: Validity) -> Self {
        match value {
            Validity::Valid => Some(true),
            Validity::Invalid => Some(false),
            Validity::Unknown => None,
        }
    }
}

impl From<bool> for Validity {
    fn from(value: bool) -> Self {
        Some(value).into()
    }
}

/// Outcome of one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// 1-based trial index
    pub run: u32,

    /// What the model returned
    pub output: OutputValue,

    /// Validator verdict, or unknown when no validator ran
    #[serde(default)]
    pub valid: Validity,

    /// Validator reason, or [`NOT_VALIDATED`]
    #[serde(default = "default_reason")]
    pub reason: String,
}

fn default_reason() -> String {
    NOT_VALIDATED.to_string()
}

impl RunRecord {
    /// A record for a trial no validator looked at.
    pub fn unvalidated(run: u32, output: OutputValue) -> Self {
        Self {
            run,
            output,
            valid: Validity::Unknown,
            reason: NOT_VALIDATED.to_string(),
        }
    }

    /// A record carrying a validator's judgment.
    pub fn judged(run: u32, output: OutputValue, judgment: Judgment) -> Self {
        Self {
            run,
            output,
            valid: judgment.valid.into(),
            reason: judgment.reason,
        }
    }
}

/// Violations of the bundle ordering invariant.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BundleError {
    #[error("Bundle declares {declared} runs but holds {actual} records")]
    LengthMismatch { declared: u32, actual: usize },

    #[error("Record at position {position} has run {found}, expected {expected}")]
    RunOutOfOrder {
        position: usize,
        expected: u32,
        found: u32,
    },
}

/// A complete batch of trials plus run metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunBundle {
    /// Task identifier
    pub task: String,

    /// Prompt or pipeline version tag
    pub version: String,

    /// Model identifier resolved once for the batch
    pub model: String,

    /// Sampling temperature, echoed verbatim
    pub temperature: f64,

    /// Requested trial count
    pub runs: u32,

    /// Captured once, after every trial completed
    #[serde(with = "iso_utc")]
    pub created_at: DateTime<Utc>,

    /// Trial records ordered by `run`
    pub records: Vec<RunRecord>,
}

impl RunBundle {
    /// Check that `records` holds exactly runs `1..=runs`, in order.
    pub fn check_invariants(&self) -> Result<(), BundleError> {
        if self.records.len() != self.runs as usize {
            return Err(BundleError::LengthMismatch {
                declared: self.runs,
                actual: self.records.len(),
            });
        }

        for (position, record) in self.records.iter().enumerate() {
            let expected = position as u32 + 1;
            if record.run != expected {
                return Err(BundleError::RunOutOfOrder {
                    position,
                    expected,
                    found: record.run,
                });
            }
        }

        Ok(())
    }
}

/// ISO-8601 UTC timestamps.
///
/// Writes RFC 3339 with microseconds and a `Z` suffix. Reads RFC 3339, and
/// also naive `YYYY-MM-DDTHH:MM:SS[.ffffff]` strings, which are taken as UTC.
mod iso_utc {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;

        if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(parsed.with_timezone(&Utc));
        }

        NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|e| de::Error::custom(format!("invalid timestamp '{}': {}", raw, e)))
    }
}
