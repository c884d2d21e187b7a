//! # affnorm - affiliate-network export normalization
//!
//! affnorm reads the conversion ("measure") and settled-sales CSV exports of
//! affiliate networks (A8, AFB, Alladin, AT, Felmat, Honeycomb, MP, Presco,
//! Rentracks, ValueCommerce), applies each vendor's historical correction rules,
//! splits the composite tracking token into its four identifiers and writes one
//! normalized record per accepted row into the vendor's table.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌─────────────┐   ┌─────────────┐   ┌─────────────┐
//! │  CSV File   │──▶│  RowSource  │──▶│ Corrections │──▶│ Decompose + │──▶│   Writer    │
//! │ (CP932/UTF8)│   │ (auto-enc)  │   │  (pipeline) │   │  map fields │   │  (policy)   │
//! └─────────────┘   └─────────────┘   └─────────────┘   └─────────────┘   └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use affnorm::{import_file, ImportOptions, JsonLinesWriter, VendorProfile};
//!
//! let normalizer = VendorProfile::builtin("measure_afb")?.compile()?;
//! let mut writer = JsonLinesWriter::new("out");
//! let report = import_file(&normalizer, Path::new("afb_measure.csv"), &mut writer, &ImportOptions::default())?;
//! println!("{} rows inserted", report.inserted);
//! # Ok::<(), affnorm::ImportError>(())
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`models`] - Raw rows, typed values, normalized records
//! - [`source`] - Decoding and CSV tokenization
//! - [`pipeline`] - Ordered correction steps and data-driven rules
//! - [`tracking`] - Tracking token decomposition
//! - [`coerce`] - Date, currency and tax coercions
//! - [`normalize`] - Column mapping, enrichments, row normalizer
//! - [`vendor`] - Vendor profiles and the built-in catalogue
//! - [`validation`] - Profile schema validation
//! - [`registry`] - Stored user profiles
//! - [`writer`] - Record writers and conflict policies
//! - [`import`] - File orchestration and reports
//! - [`logs`] - Log broadcasting

// Core modules
pub mod error;
pub mod models;

// Reading
pub mod source;

// Row processing
pub mod coerce;
pub mod normalize;
pub mod pipeline;
pub mod tracking;

// Configuration
pub mod registry;
pub mod validation;
pub mod vendor;

// Output
pub mod import;
pub mod logs;
pub mod writer;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    ImportError, ProfileError, RegistryError, RowError, SourceError, StepError, WriteError,
};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{ConflictPolicy, FieldValue, NormalizedRecord, RawRow};

// =============================================================================
// Re-exports - Source
// =============================================================================

pub use source::{decode_content, detect_encoding, read_rows, RowSource};

// =============================================================================
// Re-exports - Pipeline and decomposition
// =============================================================================

pub use pipeline::{ordinal_from_name, CorrectionRule, Pipeline, RunState, Step, Verdict};
pub use tracking::{decompose, Grammar, TokenRules, TrackingPart, TrackingParts};

// =============================================================================
// Re-exports - Coercion
// =============================================================================

pub use coerce::{to_date, to_int, to_money, Rounding};

// =============================================================================
// Re-exports - Normalizer and profiles
// =============================================================================

pub use normalize::{ColumnSpec, Coercion, Enrichment, Normalizer, RowOutcome};
pub use registry::{ProfileRegistry, ProfileSummary};
pub use validation::{is_valid_profile, validate_profile};
pub use vendor::{builtin_ids, VendorProfile};

// =============================================================================
// Re-exports - Import
// =============================================================================

pub use import::{import_file, import_files, import_rows, BatchReport, ImportOptions, ImportReport};
pub use writer::{JsonLinesWriter, MemoryWriter, RecordWriter, WriteOutcome};
