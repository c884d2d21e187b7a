//! JSON Schema validation for vendor profiles.
//!
//! Profiles added at runtime (through the registry or `--profile`) are checked
//! against an embedded Draft 7 schema before they are deserialized, so a typo
//! in a rule name reports every violation instead of the first serde error.
//!
//! # Embedded Schema
//!
//! Embedded at compile time from the `schemas/` directory:
//! - `vendor-profile.json`
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use affnorm::validation::{is_valid_profile, validate_profile};
//!
//! let profile = json!({
//!     "id": "measure_demo",
//!     "table": "measure_demo",
//!     "columns": [{ "column": "order_id", "field": 0 }]
//! });
//! assert!(validate_profile(&profile).is_ok());
//!
//! let broken = json!({ "id": "measure_demo", "columns": [] });
//! assert!(!is_valid_profile(&broken));
//! ```

use once_cell::sync::Lazy;
use serde_json::Value;

const PROFILE_SCHEMA_JSON: &str = include_str!("../../schemas/vendor-profile.json");

static PROFILE_SCHEMA: Lazy<Value> = Lazy::new(|| {
    serde_json::from_str(PROFILE_SCHEMA_JSON).unwrap_or(Value::Bool(false))
});

/// Validate a JSON value against a JSON schema.
///
/// # Returns
/// * `Ok(())` when valid
/// * `Err(Vec<String>)` with one message per violation
///
/// # Example
/// ```
/// use serde_json::json;
/// use affnorm::validation::validate;
///
/// let schema = json!({
///     "type": "object",
///     "required": ["name"],
///     "properties": { "name": { "type": "string" } }
/// });
///
/// assert!(validate(&schema, &json!({ "name": "afb" })).is_ok());
/// assert!(validate(&schema, &json!({ "age": 42 })).is_err());
/// ```
pub fn validate(schema: &Value, data: &Value) -> Result<(), Vec<String>> {
    let validator = jsonschema::draft7::new(schema)
        .map_err(|e| vec![format!("Invalid schema: {}", e)])?;

    let errors: Vec<String> = validator
        .iter_errors(data)
        .map(|e| e.to_string())
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Same check, true/false only.
pub fn is_valid(schema: &Value, data: &Value) -> bool {
    jsonschema::draft7::is_valid(schema, data)
}

/// The embedded vendor profile schema.
pub fn profile_schema() -> &'static Value {
    &PROFILE_SCHEMA
}

/// Validate against the vendor profile schema.
pub fn validate_profile(data: &Value) -> Result<(), Vec<String>> {
    validate(profile_schema(), data)
}

/// Quick check against the vendor profile schema.
pub fn is_valid_profile(data: &Value) -> bool {
    is_valid(profile_schema(), data)
}
