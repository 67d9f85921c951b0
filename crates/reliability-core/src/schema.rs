//! JSON Schema validation for persisted run bundles.
//!
//! Every file the results store loads is checked against
//! `schema/run_bundle.schema.json` before it is deserialized, so a
//! hand-edited or foreign file fails with a list of schema errors instead of
//! a single serde message.

use std::sync::OnceLock;
use thiserror::Error;

/// Embedded bundle schema (loaded at compile time).
const RUN_BUNDLE_SCHEMA_JSON: &str = include_str!("../schema/run_bundle.schema.json");

/// Compiled JSON Schema validator (initialized once, reused).
static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

/// Errors from schema loading.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to load schema: {0}")]
    LoadError(String),
}

fn get_validator() -> Result<&'static jsonschema::Validator, SchemaError> {
    let result = COMPILED_SCHEMA.get_or_init(|| {
        let schema_value: serde_json::Value = match serde_json::from_str(RUN_BUNDLE_SCHEMA_JSON) {
            Ok(v) => v,
            Err(e) => return Err(format!("Invalid schema JSON: {}", e)),
        };

        match jsonschema::options().build(&schema_value) {
            Ok(v) => Ok(v),
            Err(e) => Err(format!("Failed to compile schema: {}", e)),
        }
    });

    match result {
        Ok(v) => Ok(v),
        Err(e) => Err(SchemaError::LoadError(e.clone())),
    }
}

/// Validate a bundle JSON value against the schema.
///
/// Returns every violation found, formatted as `"<message> at <path>"`.
pub fn validate_bundle_schema(bundle_json: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator = get_validator().map_err(|e| vec![e.to_string()])?;

    let errors: Vec<String> = validator
        .iter_errors(bundle_json)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Check if a bundle JSON value is valid against the schema.
pub fn is_valid_bundle(bundle_json: &serde_json::Value) -> bool {
    get_validator()
        .map(|v| v.is_valid(bundle_json))
        .unwrap_or(false)
}
