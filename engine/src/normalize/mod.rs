//! Field mapper and row normalizer.
//!
//! A [`Normalizer`] binds one vendor profile and turns raw rows into
//! normalized records:
//!
//! ```text
//! RawRow
//!   │  header sentinel? ──────────────▶ Header
//!   │  too few fields? ───────────────▶ Skipped(MalformedRow)
//!   ▼
//! correction pipeline ── drop ───────▶ Dropped
//!   │                 └─ error ──────▶ Skipped(StepFailure)
//!   ▼
//! pre-decomposition hooks
//!   ▼
//! token decomposition ─▶ column mapping ─▶ enrichments
//!   │
//!   │  empty measure id (when required) ▶ Skipped(MissingMeasureId)
//!   ▼
//! Record
//! ```

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::coerce::{
    int_cast, parse_date_time, round_amount, to_date, to_decimal, to_int, to_int_or_null, to_money,
    Rounding,
};
use crate::error::{ProfileError, ProfileResult, RowError, StepError, StepResult};
use crate::models::{check_field_index, ConflictPolicy, FieldValue, NormalizedRecord, RawRow};
use crate::pipeline::rules::{all_hold, compile_conditions, render_template};
use crate::pipeline::{Condition, Pipeline, RunState, Step, Verdict};
use crate::tracking::{TrackingPart, TrackingParts};
use crate::vendor::VendorProfile;

// =============================================================================
// Column Mapping
// =============================================================================

/// Type coercion applied to a column's source text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Coercion {
    /// Text as-is. Absent field is null, empty text is kept.
    #[default]
    Text,
    /// Text, with empty or absent as null.
    TextOrNull,
    /// Currency floor. Empty, absent and sentinels are 0.
    Int,
    /// Currency floor, null when empty or absent.
    IntOrNull,
    /// Leading-integer cast, null when absent.
    IntCast,
    /// Leading-integer cast, null when empty or absent.
    IntCastOrNull,
    /// Float with separators stripped.
    Decimal,
    /// Currency with optional tax adjustment and rounding.
    Money,
    /// Canonical date-time, null when unreadable.
    DateTime,
}

/// Mapping of one destination column.
///
/// Exactly one source must be given: `field`, `concat`, `first_non_empty`,
/// `tracking` or `constant`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Destination column name.
    pub column: String,

    /// Single source field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<usize>,

    /// Fields joined without separator. Absent when every field is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concat: Option<Vec<usize>>,

    /// First of these fields that is non-empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_non_empty: Option<Vec<usize>>,

    /// One part of the decomposed tracking token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking: Option<TrackingPart>,

    /// Fixed value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constant: Option<serde_json::Value>,

    #[serde(rename = "as", default)]
    pub coerce: Coercion,

    /// Override the profile's tax flag for a `money` column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax: Option<bool>,

    #[serde(default)]
    pub rounding: Rounding,
}

impl ColumnSpec {
    /// Column read from one field.
    pub fn field(column: impl Into<String>, field: usize, coerce: Coercion) -> Self {
        Self {
            column: column.into(),
            field: Some(field),
            concat: None,
            first_non_empty: None,
            tracking: None,
            constant: None,
            coerce,
            tax: None,
            rounding: Rounding::default(),
        }
    }

    /// Column read from a tracking token part.
    pub fn tracking(column: impl Into<String>, part: TrackingPart) -> Self {
        Self {
            tracking: Some(part),
            field: None,
            ..Self::field(column, 0, Coercion::TextOrNull)
        }
    }

    fn source_count(&self) -> usize {
        [
            self.field.is_some(),
            self.concat.is_some(),
            self.first_non_empty.is_some(),
            self.tracking.is_some(),
            self.constant.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }

    fn validate(&self) -> ProfileResult<()> {
        let n = self.source_count();
        if n != 1 {
            return Err(ProfileError::InvalidColumn {
                column: self.column.clone(),
                message: format!("expected exactly one source, found {}", n),
            });
        }
        let indices = self
            .field
            .iter()
            .chain(self.concat.iter().flatten())
            .chain(self.first_non_empty.iter().flatten());
        for index in indices {
            check_field_index(&self.column, *index)?;
        }
        Ok(())
    }

    /// Source text before coercion.
    fn source_text(&self, row: &RawRow, parts: &TrackingParts) -> Option<String> {
        if let Some(index) = self.field {
            return row.get(index).map(str::to_string);
        }
        if let Some(indices) = &self.concat {
            let present: Vec<&str> = indices.iter().filter_map(|i| row.get(*i)).collect();
            return if present.is_empty() {
                None
            } else {
                Some(present.concat())
            };
        }
        if let Some(indices) = &self.first_non_empty {
            return indices
                .iter()
                .filter_map(|i| row.get(*i))
                .find(|v| !v.trim().is_empty())
                .map(str::to_string);
        }
        if let Some(part) = self.tracking {
            return parts.part(part).map(str::to_string);
        }
        None
    }

    /// Produce the typed value of this column.
    pub fn resolve(&self, row: &RawRow, parts: &TrackingParts, tax_adjust: bool, tax_percent: u32) -> FieldValue {
        if let Some(constant) = &self.constant {
            return constant_value(constant);
        }
        let text = self.source_text(row, parts);
        let value = text.as_deref();

        match self.coerce {
            Coercion::Text => value.map(|v| FieldValue::Text(v.to_string())).unwrap_or(FieldValue::Null),
            Coercion::TextOrNull => FieldValue::text_or_null(value),
            Coercion::Int => FieldValue::Int(to_int(value)),
            Coercion::IntOrNull => to_int_or_null(value).map(FieldValue::Int).unwrap_or(FieldValue::Null),
            Coercion::IntCast => value.map(|v| FieldValue::Int(int_cast(v))).unwrap_or(FieldValue::Null),
            Coercion::IntCastOrNull => match value.map(str::trim) {
                None | Some("") => FieldValue::Null,
                Some(v) => FieldValue::Int(int_cast(v)),
            },
            Coercion::Decimal => FieldValue::Decimal(to_decimal(value)),
            Coercion::Money => {
                let tax = self.tax.unwrap_or(tax_adjust).then_some(tax_percent);
                to_money(value, tax, self.rounding)
            }
            Coercion::DateTime => to_date(value).map(FieldValue::DateTime).unwrap_or(FieldValue::Null),
        }
    }
}

fn constant_value(value: &serde_json::Value) -> FieldValue {
    match value {
        serde_json::Value::Null => FieldValue::Null,
        serde_json::Value::String(s) => FieldValue::Text(s.clone()),
        serde_json::Value::Bool(b) => FieldValue::Int(i64::from(*b)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(FieldValue::Int)
            .or_else(|| n.as_f64().map(FieldValue::Decimal))
            .unwrap_or(FieldValue::Null),
        other => FieldValue::Text(other.to_string()),
    }
}

// =============================================================================
// Pre-decomposition Transforms
// =============================================================================

/// Row rewrites run after the correction pipeline and before decomposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transform", rename_all = "snake_case")]
pub enum RowTransform {
    /// Copy `then_field` into `into` when `if_nonempty` has content, else `else_field`.
    ChooseField {
        if_nonempty: usize,
        then_field: usize,
        else_field: usize,
        into: usize,
        #[serde(default)]
        trim: bool,
    },
}

impl RowTransform {
    fn compile(&self) -> ProfileResult<PreHookFn> {
        match self.clone() {
            RowTransform::ChooseField {
                if_nonempty,
                then_field,
                else_field,
                into,
                trim,
            } => {
                for index in [if_nonempty, then_field, else_field, into] {
                    check_field_index("choose_field", index)?;
                }
                Ok(Box::new(move |row: &mut RawRow| {
                    let source = if row.field(if_nonempty).is_empty() {
                        else_field
                    } else {
                        then_field
                    };
                    let value = row.field(source);
                    let value = if trim { value.trim() } else { value }.to_string();
                    row.set(into, value);
                    Ok(())
                }))
            }
        }
    }
}

// =============================================================================
// Enrichments
// =============================================================================

/// One entry of a fixed reward table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardTier {
    /// Substring looked for in the measure id.
    pub contains: String,
    pub amount: i64,
}

/// Post-decomposition record enrichments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "enrich", rename_all = "snake_case")]
pub enum Enrichment {
    /// Replace `column` with a fixed amount chosen by measure id substring.
    ///
    /// Rows dated before `threshold` use `before`, all others (including
    /// undated rows) use `after`. The first matching tier wins. Without a
    /// match, `default` applies when set and the mapped value stays otherwise.
    FixedReward {
        column: String,
        date_field: usize,
        threshold: String,
        before: Vec<RewardTier>,
        after: Vec<RewardTier>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<i64>,
        #[serde(default)]
        tax: bool,
        #[serde(default)]
        rounding: Rounding,
    },

    /// When the measure id is empty, look it up by another field.
    MeasureIdByField {
        field: usize,
        table: BTreeMap<String, String>,
        /// Also use the raw token as click id when none was decomposed.
        #[serde(default)]
        copy_token_to_click_id: bool,
    },

    /// Set the measure id when all conditions hold.
    MeasureIdWhen {
        when: Vec<Condition>,
        value: String,
        #[serde(default)]
        only_if_empty: bool,
    },

    /// Replace a measure id matching `pattern` with `value` (`{N}` placeholders allowed).
    MeasureIdWhenMatches { pattern: String, value: String },

    /// Use the tclick id as click id when no click id was decomposed.
    ClickIdFallbackToTclick,
}

/// What an enrichment sees and may change.
pub struct EnrichContext<'a> {
    pub row: &'a RawRow,
    /// Tracking token as read before decomposition.
    pub token: &'a str,
    pub parts: &'a mut TrackingParts,
    pub record: &'a mut NormalizedRecord,
    pub tax_percent: u32,
}

/// A pre-decomposition row rewrite.
pub type PreHookFn = Box<dyn Fn(&mut RawRow) -> StepResult<()> + Send + Sync>;

/// A post-decomposition enrichment.
pub type EnrichFn = Box<dyn Fn(&mut EnrichContext<'_>) -> StepResult<()> + Send + Sync>;

fn tier_for<'t>(tiers: &'t [RewardTier], measure_id: &str) -> Option<&'t RewardTier> {
    tiers.iter().find(|t| measure_id.contains(t.contains.as_str()))
}

impl Enrichment {
    fn name(&self) -> &'static str {
        match self {
            Enrichment::FixedReward { .. } => "fixed_reward",
            Enrichment::MeasureIdByField { .. } => "measure_id_by_field",
            Enrichment::MeasureIdWhen { .. } => "measure_id_when",
            Enrichment::MeasureIdWhenMatches { .. } => "measure_id_when_matches",
            Enrichment::ClickIdFallbackToTclick => "click_id_fallback_to_tclick",
        }
    }

    fn compile(&self) -> ProfileResult<EnrichFn> {
        let name = self.name();
        let f: EnrichFn = match self.clone() {
            Enrichment::FixedReward {
                column,
                date_field,
                threshold,
                before,
                after,
                default,
                tax,
                rounding,
            } => {
                check_field_index(name, date_field)?;
                let threshold: NaiveDateTime =
                    parse_date_time(&threshold).ok_or_else(|| ProfileError::InvalidPattern {
                        rule: name.to_string(),
                        message: format!("unreadable threshold '{}'", threshold),
                    })?;
                Box::new(move |ctx: &mut EnrichContext<'_>| {
                    let measure_id = ctx.parts.measure_id.as_deref().unwrap_or("");
                    let tiers = match parse_date_time(ctx.row.field(date_field)) {
                        Some(date) if date < threshold => &before,
                        _ => &after,
                    };
                    let amount = if measure_id.is_empty() {
                        default
                    } else {
                        tier_for(tiers, measure_id).map(|t| t.amount).or(default)
                    };
                    if let Some(amount) = amount {
                        let value = round_amount(amount as f64, tax.then_some(ctx.tax_percent), rounding);
                        ctx.record.set(column.as_str(), value);
                    }
                    Ok(())
                })
            }

            Enrichment::MeasureIdByField {
                field,
                table,
                copy_token_to_click_id,
            } => {
                check_field_index(name, field)?;
                Box::new(move |ctx: &mut EnrichContext<'_>| {
                    if ctx.parts.measure_id.is_some() {
                        return Ok(());
                    }
                    if let Some(id) = table.get(ctx.row.field(field)) {
                        ctx.parts.measure_id = Some(id.clone()).filter(|s| !s.is_empty());
                    }
                    if copy_token_to_click_id && ctx.parts.click_id.is_none() && !ctx.token.is_empty() {
                        ctx.parts.click_id = Some(ctx.token.to_string());
                    }
                    Ok(())
                })
            }

            Enrichment::MeasureIdWhen {
                when,
                value,
                only_if_empty,
            } => {
                let conditions = compile_conditions(&when, name)?;
                Box::new(move |ctx: &mut EnrichContext<'_>| {
                    if only_if_empty && ctx.parts.measure_id.is_some() {
                        return Ok(());
                    }
                    if all_hold(&conditions, ctx.row) {
                        ctx.parts.measure_id = Some(value.clone()).filter(|s| !s.is_empty());
                    }
                    Ok(())
                })
            }

            Enrichment::MeasureIdWhenMatches { pattern, value } => {
                let regex = Regex::new(&pattern).map_err(|e| ProfileError::InvalidPattern {
                    rule: name.to_string(),
                    message: e.to_string(),
                })?;
                Box::new(move |ctx: &mut EnrichContext<'_>| {
                    let matched = ctx
                        .parts
                        .measure_id
                        .as_deref()
                        .is_some_and(|id| regex.is_match(id));
                    if matched {
                        ctx.parts.measure_id = Some(render_template(&value, ctx.row));
                    }
                    Ok(())
                })
            }

            Enrichment::ClickIdFallbackToTclick => Box::new(|ctx: &mut EnrichContext<'_>| {
                if ctx.parts.click_id.is_none() {
                    ctx.parts.click_id = ctx.parts.tclick_id.clone();
                }
                Ok(())
            }),
        };
        Ok(f)
    }
}

// =============================================================================
// Normalizer
// =============================================================================

/// Result of normalizing one row.
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Record(NormalizedRecord),
    /// Re-embedded header row.
    Header,
    /// Dropped by a correction gate.
    Dropped { step: String },
    /// Skipped with an error; the file continues.
    Skipped(RowError),
}

/// A vendor profile compiled for row processing.
pub struct Normalizer {
    profile: VendorProfile,
    pipeline: Pipeline,
    pre_hooks: Vec<PreHookFn>,
    enrichers: Vec<(String, EnrichFn)>,
}

impl fmt::Debug for Normalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Normalizer")
            .field("profile", &self.profile.id)
            .field("pipeline", &self.pipeline)
            .field("pre_hooks", &self.pre_hooks.len())
            .field("enrichers", &self.enrichers.len())
            .finish()
    }
}

impl Normalizer {
    /// Compile a profile: correction rules, transforms and enrichments.
    pub fn new(profile: VendorProfile) -> ProfileResult<Self> {
        for column in &profile.columns {
            column.validate()?;
        }
        if let Some(spec) = &profile.tracking {
            check_field_index("tracking", spec.field)?;
            if let Some(secondary) = spec.secondary {
                check_field_index("tracking", secondary)?;
            }
        }
        let pipeline = Pipeline::from_rules(&profile.corrections)?;
        let pre_hooks = profile
            .prepare
            .iter()
            .map(RowTransform::compile)
            .collect::<ProfileResult<Vec<_>>>()?;
        let enrichers = profile
            .enrich
            .iter()
            .map(|e| e.compile().map(|f| (e.name().to_string(), f)))
            .collect::<ProfileResult<Vec<_>>>()?;

        Ok(Self {
            profile,
            pipeline,
            pre_hooks,
            enrichers,
        })
    }

    /// Add Rust-declared correction steps.
    pub fn with_steps(mut self, steps: Vec<Step>) -> ProfileResult<Self> {
        self.pipeline = self.pipeline.extend(steps)?;
        Ok(self)
    }

    /// Register a row rewrite run before decomposition.
    pub fn with_pre_hook<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut RawRow) -> StepResult<()> + Send + Sync + 'static,
    {
        self.pre_hooks.push(Box::new(f));
        self
    }

    /// Register an enrichment run after column mapping.
    pub fn with_enricher<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut EnrichContext<'_>) -> StepResult<()> + Send + Sync + 'static,
    {
        self.enrichers.push((name.into(), Box::new(f)));
        self
    }

    pub fn profile(&self) -> &VendorProfile {
        &self.profile
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn table(&self) -> &str {
        &self.profile.table
    }

    pub fn conflict_policy(&self) -> ConflictPolicy {
        self.profile.conflict_policy
    }

    /// Decompose the tracking token of a (corrected) row.
    pub fn decompose(&self, row: &RawRow) -> (String, TrackingParts) {
        match &self.profile.tracking {
            Some(spec) => {
                let token = row.field(spec.field).to_string();
                let secondary = spec.secondary.map(|i| row.field(i));
                let parts = spec.rules.decompose(&token, secondary);
                (token, parts)
            }
            None => (String::new(), TrackingParts::default()),
        }
    }

    /// Normalize one row. `state` is the accumulator of the current file.
    pub fn process(&self, mut row: RawRow, state: &mut RunState) -> RowOutcome {
        let line = row.line;

        if self.profile.is_header(&row) {
            return RowOutcome::Header;
        }

        if row.len() < self.profile.min_fields {
            return RowOutcome::Skipped(RowError::MalformedRow {
                line,
                found: row.len(),
                required: self.profile.min_fields,
            });
        }

        match self.pipeline.apply(&mut row, state) {
            Ok(Verdict::Keep) => {}
            Ok(Verdict::Drop { step }) => return RowOutcome::Dropped { step },
            Err(source) => return RowOutcome::Skipped(RowError::StepFailure { line, source }),
        }

        match self.build_record(&mut row) {
            Ok(Some(record)) => RowOutcome::Record(record),
            Ok(None) => RowOutcome::Skipped(RowError::MissingMeasureId { line }),
            Err(source) => RowOutcome::Skipped(RowError::StepFailure { line, source }),
        }
    }

    fn build_record(&self, row: &mut RawRow) -> Result<Option<NormalizedRecord>, StepError> {
        for hook in &self.pre_hooks {
            hook(row)?;
        }

        let row: &RawRow = row;
        let (token, mut parts) = self.decompose(row);
        let profile = &self.profile;

        let mut record = NormalizedRecord::new(profile.table.as_str());
        for column in &profile.columns {
            let value = column.resolve(row, &parts, profile.tax_adjust, profile.tax_percent);
            record.set(column.column.as_str(), value);
        }

        if !self.enrichers.is_empty() {
            let mut ctx = EnrichContext {
                row,
                token: &token,
                parts: &mut parts,
                record: &mut record,
                tax_percent: profile.tax_percent,
            };
            for (name, enrich) in &self.enrichers {
                enrich(&mut ctx).map_err(|e| StepError::new(name.as_str(), e.message))?;
            }

            // Enrichments may have changed the parts.
            for column in profile.columns.iter().filter(|c| c.tracking.is_some()) {
                let value = column.resolve(row, &parts, profile.tax_adjust, profile.tax_percent);
                record.set(column.column.as_str(), value);
            }
        }

        if profile.require_measure_id && parts.measure_id.is_none() {
            return Ok(None);
        }
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MAX_FIELD_INDEX;

    fn profile(json: &str) -> VendorProfile {
        VendorProfile::from_json(json).unwrap()
    }

    fn record(outcome: RowOutcome) -> NormalizedRecord {
        match outcome {
            RowOutcome::Record(r) => r,
            other => panic!("expected record, got {:?}", other),
        }
    }

    const BASIC: &str = r#"{
        "id": "measure_test",
        "table": "measure_test",
        "header_sentinels": ["番号"],
        "min_fields": 3,
        "tracking": { "field": 2 },
        "columns": [
            { "column": "occur_time", "field": 0, "as": "date_time" },
            { "column": "reward", "field": 1, "as": "money" },
            { "column": "keyword", "tracking": "measure_id" },
            { "column": "tclick", "tracking": "tclick_id" },
            { "column": "gclid", "tracking": "click_id" },
            { "column": "utm_content", "tracking": "utm_content" }
        ]
    }"#;

    #[test]
    fn test_maps_columns_and_tracking() {
        let n = Normalizer::new(profile(BASIC)).unwrap();
        let row = RawRow::from_strs(&["2025/01/01 10:00:00", "1,000", "A001_TCLICK_T9_YCLID_C1_UTMC_U1"]);
        let r = record(n.process(row, &mut RunState::new()));

        assert_eq!(r.table, "measure_test");
        assert_eq!(r.get_str("occur_time"), Some("2025-01-01 10:00:00"));
        assert_eq!(r.get("reward"), Some(&FieldValue::Int(1000)));
        assert_eq!(r.get_str("keyword"), Some("A001"));
        assert_eq!(r.get_str("tclick"), Some("T9"));
        assert_eq!(r.get_str("gclid"), Some("C1"));
        assert_eq!(r.get_str("utm_content"), Some("U1"));
    }

    #[test]
    fn test_header_and_malformed_rows() {
        let n = Normalizer::new(profile(BASIC)).unwrap();
        let mut state = RunState::new();

        assert_eq!(n.process(RawRow::from_strs(&["番号", "x", "y"]), &mut state), RowOutcome::Header);
        assert_eq!(n.process(RawRow::from_strs(&["\u{feff}\"番号\"", "x", "y"]), &mut state), RowOutcome::Header);
        assert!(matches!(
            n.process(RawRow::from_strs(&["a"]), &mut state),
            RowOutcome::Skipped(RowError::MalformedRow { found: 1, required: 3, .. })
        ));
    }

    #[test]
    fn test_out_of_range_indices_rejected() {
        let mut p = profile(BASIC);
        p.columns[0].field = Some(usize::MAX);
        assert!(matches!(
            Normalizer::new(p),
            Err(ProfileError::FieldOutOfRange { index: usize::MAX, .. })
        ));

        let mut p = profile(BASIC);
        p.tracking.as_mut().unwrap().secondary = Some(MAX_FIELD_INDEX + 1);
        assert!(matches!(Normalizer::new(p), Err(ProfileError::FieldOutOfRange { .. })));

        let mut p = profile(BASIC);
        p.prepare.push(RowTransform::ChooseField {
            if_nonempty: 1,
            then_field: 2,
            else_field: 0,
            into: 4_000_000_000,
            trim: false,
        });
        assert!(matches!(Normalizer::new(p), Err(ProfileError::FieldOutOfRange { .. })));

        let mut p = profile(BASIC);
        p.enrich.push(Enrichment::MeasureIdByField {
            field: MAX_FIELD_INDEX + 1,
            table: BTreeMap::new(),
            copy_token_to_click_id: false,
        });
        assert!(matches!(Normalizer::new(p), Err(ProfileError::FieldOutOfRange { .. })));
    }

    #[test]
    fn test_tax_adjusted_money() {
        let mut p = profile(BASIC);
        p.tax_adjust = true;
        p.columns[1].rounding = Rounding::HalfUp;
        let n = Normalizer::new(p).unwrap();
        let r = record(n.process(RawRow::from_strs(&["", "16,500", "x"]), &mut RunState::new()));
        assert_eq!(r.get("reward"), Some(&FieldValue::Int(15000)));
        assert_eq!(r.get("occur_time"), Some(&FieldValue::Null));
    }

    #[test]
    fn test_missing_measure_id_skipped_when_required() {
        let mut p = profile(BASIC);
        p.require_measure_id = true;
        let n = Normalizer::new(p).unwrap();
        let outcome = n.process(RawRow::new(7, vec!["".into(), "0".into(), "_YCLID_c".into()]), &mut RunState::new());
        assert_eq!(outcome, RowOutcome::Skipped(RowError::MissingMeasureId { line: 7 }));
    }

    #[test]
    fn test_column_coercions() {
        let row = RawRow::from_strs(&["12.9", "", "a", "b", "1,234.5"]);
        let parts = TrackingParts::default();
        let resolve = |json: &str| {
            let spec: ColumnSpec = serde_json::from_str(json).unwrap();
            spec.resolve(&row, &parts, false, 10)
        };

        assert_eq!(resolve(r#"{"column":"c","field":0,"as":"int_cast"}"#), FieldValue::Int(12));
        assert_eq!(resolve(r#"{"column":"c","field":1,"as":"int_cast_or_null"}"#), FieldValue::Null);
        assert_eq!(resolve(r#"{"column":"c","field":9,"as":"int_cast"}"#), FieldValue::Null);
        assert_eq!(resolve(r#"{"column":"c","field":1,"as":"int"}"#), FieldValue::Int(0));
        assert_eq!(resolve(r#"{"column":"c","field":1,"as":"int_or_null"}"#), FieldValue::Null);
        assert_eq!(resolve(r#"{"column":"c","field":1}"#), FieldValue::Text(String::new()));
        assert_eq!(resolve(r#"{"column":"c","field":1,"as":"text_or_null"}"#), FieldValue::Null);
        assert_eq!(resolve(r#"{"column":"c","field":9}"#), FieldValue::Null);
        assert_eq!(resolve(r#"{"column":"c","field":4,"as":"decimal"}"#), FieldValue::Decimal(1234.5));
        assert_eq!(resolve(r#"{"column":"c","concat":[2,3,9]}"#), FieldValue::Text("ab".into()));
        assert_eq!(resolve(r#"{"column":"c","concat":[8,9]}"#), FieldValue::Null);
        assert_eq!(resolve(r#"{"column":"c","first_non_empty":[1,3]}"#), FieldValue::Text("b".into()));
        assert_eq!(resolve(r#"{"column":"c","constant":0}"#), FieldValue::Int(0));
    }

    #[test]
    fn test_column_requires_one_source() {
        let mut p = profile(BASIC);
        p.columns[0].concat = Some(vec![1, 2]);
        assert!(matches!(Normalizer::new(p), Err(ProfileError::InvalidColumn { .. })));
    }

    #[test]
    fn test_choose_field_transform() {
        let json = r#"{
            "id": "measure_a8", "table": "measure_a8",
            "tracking": { "field": 5, "secondary": 1, "grammar": "click_tag_first", "click_tags": [] },
            "prepare": [ { "transform": "choose_field", "if_nonempty": 1, "then_field": 2, "else_field": 0, "into": 5, "trim": true } ],
            "columns": [
                { "column": "measureid_id", "tracking": "measure_id" },
                { "column": "tclick", "tracking": "tclick_id" },
                { "column": "gclid", "tracking": "click_id" },
                { "column": "utm_content", "tracking": "utm_content" }
            ]
        }"#;
        let n = Normalizer::new(profile(json)).unwrap();

        let r = record(n.process(RawRow::from_strs(&["p_TCLICK_t", "G1_UTMC_U1", " m_TCLICK_x "]), &mut RunState::new()));
        assert_eq!(r.get_str("measureid_id"), Some("m"));
        assert_eq!(r.get_str("tclick"), Some("x"));
        assert_eq!(r.get_str("gclid"), Some("G1"));
        assert_eq!(r.get_str("utm_content"), Some("U1"));

        let r = record(n.process(RawRow::from_strs(&["p_TCLICK_t", "", "m"]), &mut RunState::new()));
        assert_eq!(r.get_str("measureid_id"), Some("p"));
        assert_eq!(r.get("gclid"), Some(&FieldValue::Null));
    }

    #[test]
    fn test_fixed_reward_and_fallback_measure_id() {
        let json = r#"{
            "id": "measure_h", "table": "measure_h",
            "tracking": { "field": 2 },
            "columns": [
                { "column": "reward", "constant": 0 },
                { "column": "measure_id", "tracking": "measure_id" },
                { "column": "gclid", "tracking": "click_id" }
            ],
            "enrich": [
                { "enrich": "measure_id_by_field", "field": 1, "copy_token_to_click_id": true,
                  "table": { "アイフル株式会社": "gs_cardloan-1_aiful_honeycomb" } },
                { "enrich": "fixed_reward", "column": "reward", "date_field": 0, "threshold": "2025-05-20",
                  "before": [ { "contains": "acom", "amount": 12000 }, { "contains": "aiful", "amount": 9000 } ],
                  "after":  [ { "contains": "acom", "amount": 75000 }, { "contains": "aiful", "amount": 9000 } ],
                  "default": 0 }
            ]
        }"#;
        let n = Normalizer::new(profile(json)).unwrap();
        let mut state = RunState::new();

        let r = record(n.process(RawRow::from_strs(&["2025/05/01 10:00:00", "x", "gs_cardloan-1_acom_honeycomb"]), &mut state));
        assert_eq!(r.get("reward"), Some(&FieldValue::Int(12000)));

        let r = record(n.process(RawRow::from_strs(&["2025/06/01 10:00:00", "x", "gs_cardloan-1_acom_honeycomb"]), &mut state));
        assert_eq!(r.get("reward"), Some(&FieldValue::Int(75000)));

        // Undated rows use the later table.
        let r = record(n.process(RawRow::from_strs(&["", "x", "gs_cardloan-1_acom_honeycomb"]), &mut state));
        assert_eq!(r.get("reward"), Some(&FieldValue::Int(75000)));

        let r = record(n.process(RawRow::from_strs(&["2025/05/01", "アイフル株式会社", "_CLID_abc"]), &mut state));
        assert_eq!(r.get_str("measure_id"), Some("gs_cardloan-1_aiful_honeycomb"));
        assert_eq!(r.get_str("gclid"), Some("abc"));
        assert_eq!(r.get("reward"), Some(&FieldValue::Int(9000)));

        let r = record(n.process(RawRow::from_strs(&["2025/05/01", "other", "_TCLICK_"]), &mut state));
        assert_eq!(r.get("measure_id"), Some(&FieldValue::Null));
        assert_eq!(r.get_str("gclid"), Some("_TCLICK_"));
        assert_eq!(r.get("reward"), Some(&FieldValue::Int(0)));
    }

    #[test]
    fn test_measure_id_rewrites() {
        let json = r#"{
            "id": "measure_m", "table": "measure_m", "require_measure_id": true,
            "tracking": { "field": 2, "grammar": "click_tag_first", "click_tags": ["_YCLID_", "_CLID_", "_GCLID_"] },
            "columns": [ { "column": "user_id", "tracking": "measure_id" } ],
            "enrich": [
                { "enrich": "measure_id_when_matches",
                  "pattern": "(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$",
                  "value": "unknown（{1}）" },
                { "enrich": "measure_id_when", "only_if_empty": true,
                  "when": [ { "if": "equals", "field": 1, "value": "MOTA" } ], "value": "fb_usedcar-1_mota_mp" }
            ]
        }"#;
        let n = Normalizer::new(profile(json)).unwrap();
        let mut state = RunState::new();

        let r = record(n.process(RawRow::from_strs(&["", "prog", "123E4567-e89b-12d3-a456-426614174000"]), &mut state));
        assert_eq!(r.get_str("user_id"), Some("unknown（prog）"));

        let r = record(n.process(RawRow::from_strs(&["", "MOTA", ""]), &mut state));
        assert_eq!(r.get_str("user_id"), Some("fb_usedcar-1_mota_mp"));

        assert!(matches!(
            n.process(RawRow::from_strs(&["", "other", ""]), &mut state),
            RowOutcome::Skipped(RowError::MissingMeasureId { .. })
        ));
    }

    #[test]
    fn test_click_id_falls_back_to_tclick() {
        let json = r#"{
            "id": "measure_p", "table": "measure_p",
            "tracking": { "field": 0 },
            "columns": [ { "column": "clickid", "tracking": "click_id" } ],
            "enrich": [ { "enrich": "click_id_fallback_to_tclick" } ]
        }"#;
        let n = Normalizer::new(profile(json)).unwrap();
        let r = record(n.process(RawRow::from_strs(&["m_TCLICK_t1"]), &mut RunState::new()));
        assert_eq!(r.get_str("clickid"), Some("t1"));
        let r = record(n.process(RawRow::from_strs(&["m_TCLICK_t1_GCLID_g1"]), &mut RunState::new()));
        assert_eq!(r.get_str("clickid"), Some("g1"));
    }

    #[test]
    fn test_rust_hooks() {
        let n = Normalizer::new(profile(BASIC))
            .unwrap()
            .with_pre_hook(|row| {
                row.set(2, "HOOK_TCLICK_1");
                Ok(())
            })
            .with_enricher("stamp", |ctx| {
                ctx.record.set("source", FieldValue::Text("hook".into()));
                Ok(())
            });
        let r = record(n.process(RawRow::from_strs(&["", "0", "ignored"]), &mut RunState::new()));
        assert_eq!(r.get_str("keyword"), Some("HOOK"));
        assert_eq!(r.get_str("source"), Some("hook"));
    }

    #[test]
    fn test_failing_enricher_skips_row() {
        let n = Normalizer::new(profile(BASIC))
            .unwrap()
            .with_enricher("broken", |_| Err(StepError::new("", "lookup failed")));
        let outcome = n.process(RawRow::new(4, vec!["".into(), "0".into(), "x".into()]), &mut RunState::new());
        match outcome {
            RowOutcome::Skipped(RowError::StepFailure { line, source }) => {
                assert_eq!(line, 4);
                assert_eq!(source.step, "broken");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
