//! Error types for the affnorm import engine.
//!
//! The hierarchy mirrors the processing layers:
//!
//! - [`SourceError`] - reading, decoding and tokenizing a source file
//! - [`StepError`] - a correction step that could not process a row
//! - [`RowError`] - per-row problems; recorded in the report, never fatal
//! - [`WriteError`] - record writer failures
//! - [`ProfileError`] - invalid vendor configuration
//! - [`RegistryError`] - profile registry storage
//! - [`ImportError`] - top-level orchestration errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use thiserror::Error;

// =============================================================================
// Source Errors
// =============================================================================

/// Errors while producing raw rows from a source file.
///
/// These are the only errors that abort a whole file before any row is read.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Failed to read file.
    #[error("Failed to read source: {0}")]
    Io(#[from] std::io::Error),

    /// Unknown or undecodable encoding.
    #[error("Failed to decode source: {0}")]
    Encoding(String),

    /// CSV tokenizer error.
    #[error("Invalid CSV at line {line}: {message}")]
    Csv { line: u64, message: String },

    /// The csv reader only takes single-byte delimiters.
    #[error("Delimiter must be a single ASCII character, got '{0}'")]
    InvalidDelimiter(char),
}

impl From<csv::Error> for SourceError {
    fn from(err: csv::Error) -> Self {
        let line = err.position().map(|p| p.line()).unwrap_or(0);
        SourceError::Csv {
            line,
            message: err.to_string(),
        }
    }
}

// =============================================================================
// Step Errors
// =============================================================================

/// A correction step failed on one row.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Step '{step}' failed: {message}")]
pub struct StepError {
    pub step: String,
    pub message: String,
}

impl StepError {
    pub fn new(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            message: message.into(),
        }
    }
}

// =============================================================================
// Row Errors
// =============================================================================

/// Problems confined to a single row. The row is skipped, the file continues.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RowError {
    /// Fewer fields than the vendor layout requires.
    #[error("Line {line}: malformed row ({found} fields, {required} required)")]
    MalformedRow {
        line: u64,
        found: usize,
        required: usize,
    },

    /// A correction step failed.
    #[error("Line {line}: {source}")]
    StepFailure { line: u64, source: StepError },

    /// Decomposition left no measure id and the vendor requires one.
    #[error("Line {line}: empty measure id")]
    MissingMeasureId { line: u64 },
}

impl RowError {
    /// Source line of the offending row.
    pub fn line(&self) -> u64 {
        match self {
            RowError::MalformedRow { line, .. }
            | RowError::StepFailure { line, .. }
            | RowError::MissingMeasureId { line } => *line,
        }
    }
}

// =============================================================================
// Write Errors
// =============================================================================

/// Errors from a record writer.
///
/// Conflicts are not errors: they are resolved by the writer's conflict policy.
#[derive(Debug, Error)]
pub enum WriteError {
    /// IO error.
    #[error("Writer IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("Writer JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Profile Errors
// =============================================================================

/// Errors in vendor configuration.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// Profile JSON could not be parsed.
    #[error("Invalid profile JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Profile JSON does not satisfy the profile schema.
    #[error("Profile failed schema validation: {errors:?}")]
    Schema { errors: Vec<String> },

    /// Two correction steps share an order value.
    #[error("Duplicate step order {order} ('{first}' and '{second}')")]
    DuplicateStepOrder {
        order: u32,
        first: String,
        second: String,
    },

    /// A step has neither an explicit order nor a numeric ordinal in its name.
    #[error("Step '{0}' has no order and no ordinal in its name")]
    MissingStepOrder(String),

    /// A rule carries a pattern that is not a valid regex.
    #[error("Invalid pattern in rule '{rule}': {message}")]
    InvalidPattern { rule: String, message: String },

    /// A field index beyond the supported row width.
    #[error("Field index {index} in '{context}' is out of range (max {})", crate::models::MAX_FIELD_INDEX)]
    FieldOutOfRange { context: String, index: usize },

    /// A column mapping is not usable.
    #[error("Invalid column '{column}': {message}")]
    InvalidColumn { column: String, message: String },

    /// No profile with this id.
    #[error("Unknown vendor profile: {0}")]
    UnknownVendor(String),
}

// =============================================================================
// Registry Errors
// =============================================================================

/// Errors from the profile registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Profile not found.
    #[error("Profile not found: {0}")]
    NotFound(String),

    /// Built-in profiles cannot be replaced or deleted.
    #[error("Profile '{0}' is built in and cannot be replaced or deleted")]
    BuiltIn(String),

    /// Invalid profile data.
    #[error("Invalid profile: {0}")]
    InvalidProfile(#[from] ProfileError),

    /// IO error.
    #[error("Registry IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("Registry JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Import Errors (top-level)
// =============================================================================

/// Top-level import errors.
///
/// This is the error type returned by [`crate::import::import_file`].
#[derive(Debug, Error)]
pub enum ImportError {
    /// Source file error.
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Writer error.
    #[error("Write error: {0}")]
    Write(#[from] WriteError),

    /// Profile error.
    #[error("Profile error: {0}")]
    Profile(#[from] ProfileError),

    /// Registry error.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for source operations.
pub type SourceResult<T> = Result<T, SourceError>;

/// Result type for correction steps.
pub type StepResult<T> = Result<T, StepError>;

/// Result type for writer operations.
pub type WriteResult<T> = Result<T, WriteError>;

/// Result type for profile operations.
pub type ProfileResult<T> = Result<T, ProfileError>;

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Result type for import operations.
pub type ImportResult<T> = Result<T, ImportError>;
