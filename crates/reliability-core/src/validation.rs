//! Validator calling convention.
//!
//! A validator looks at one output and answers valid / invalid with a short
//! reason. The reason string is used verbatim as a histogram key in reports,
//! so validators should keep it to a small, stable vocabulary
//! (e.g. `"format_mismatch"`, `"missing_title"`).
//!
//! Validators are pure: no I/O, no state carried between trials.

use serde::{Deserialize, Serialize};

use crate::types::OutputValue;

/// A validator's verdict on one output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Judgment {
    pub valid: bool,
    pub reason: String,
}

impl Judgment {
    pub fn valid(reason: impl Into<String>) -> Self {
        Self {
            valid: true,
            reason: reason.into(),
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: reason.into(),
        }
    }
}

impl From<(bool, String)> for Judgment {
    fn from((valid, reason): (bool, String)) -> Self {
        Self { valid, reason }
    }
}

impl From<(bool, &str)> for Judgment {
    fn from((valid, reason): (bool, &str)) -> Self {
        Self {
            valid,
            reason: reason.to_string(),
        }
    }
}

/// Judges a single model output.
///
/// Any `Fn(&OutputValue) -> R` where `R: Into<Judgment>` is a validator, so
/// plain closures returning `(bool, String)` work directly.
pub trait Validator: Send + Sync {
    fn validate(&self, output: &OutputValue) -> Judgment;
}

impl<F, R> Validator for F
where
    F: Fn(&OutputValue) -> R + Send + Sync,
    R: Into<Judgment>,
{
    fn validate(&self, output: &OutputValue) -> Judgment {
        self(output).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NonEmpty;

    impl Validator for NonEmpty {
        fn validate(&self, output: &OutputValue) -> Judgment {
            match output.as_text() {
                Some(text) if !text.trim().is_empty() => Judgment::valid("ok"),
                Some(_) => Judgment::invalid("empty"),
                None => Judgment::invalid("not_text"),
            }
        }
    }

    #[test]
    fn test_closure_validator() {
        let validator = |output: &OutputValue| (output.is_text(), "text_expected".to_string());
        let judgment = validator.validate(&OutputValue::text("hi"));
        assert!(judgment.valid);
        assert_eq!(judgment.reason, "text_expected");
    }

    #[test]
    fn test_struct_validator_as_trait_object() {
        let validator: &dyn Validator = &NonEmpty;
        assert_eq!(
            validator.validate(&OutputValue::text("   ")),
            Judgment::invalid("empty")
        );
        assert!(validator.validate(&OutputValue::text("fine")).valid);
    }
}
