//! Value coercions shared by every vendor mapping.
//!
//! - [`to_date`] - permissive date parsing into `YYYY-MM-DD HH:MM:SS`
//! - [`to_int`] - currency string to integer, floored
//! - [`to_money`] - currency with optional tax-exclusive adjustment
//! - [`to_decimal`], [`int_cast`] - looser numeric reads used by a few layouts
//!
//! Numeric reads follow the loose convention of the exports: thousands
//! separators are stripped, the longest leading number is used, and anything
//! unreadable counts as zero.

use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::FieldValue;

/// Values that mean "no value" in date and amount columns.
pub const SENTINELS: [&str; 4] = ["-", "−", "0000-00-00 00:00:00", "0000-00-00"];

/// Canonical output format for date-times.
pub const CANONICAL_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Default consumption tax, in percent.
pub const DEFAULT_TAX_PERCENT: u32 = 10;

static ANNOTATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[（(][^0-9]+?[）)]").expect("annotation regex"));

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

static LEADING_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*[+-]?(\d+(\.\d*)?|\.\d+)([eE][+-]?\d+)?").expect("number regex")
});

const DATE_TIME_FORMATS: [&str; 5] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y%m%d %H:%M:%S",
];

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y%m%d"];

fn is_sentinel(v: &str) -> bool {
    v.is_empty() || SENTINELS.contains(&v)
}

/// Parse a date-time permissively.
///
/// Accepts `/`, `／` or `-` as date separators and strips parenthesized
/// annotations such as `（水）` or `(Wed)`. Empty input, sentinels and
/// unparsable values yield `None`.
///
/// # Example
/// ```
/// use affnorm::coerce::to_date;
///
/// assert_eq!(to_date(Some("2025/07/01 14:23:42")).as_deref(), Some("2025-07-01 14:23:42"));
/// assert_eq!(to_date(Some("0000-00-00 00:00:00")), None);
/// ```
pub fn to_date(value: Option<&str>) -> Option<String> {
    parse_date_time(value?).map(|dt| dt.format(CANONICAL_DATE_FORMAT).to_string())
}

/// Parse into a `NaiveDateTime`, same rules as [`to_date`].
pub fn parse_date_time(value: &str) -> Option<NaiveDateTime> {
    let v = value.trim();
    if is_sentinel(v) {
        return None;
    }

    let v = ANNOTATION.replace_all(v, "");
    let v = v.replace(['／', '/'], "-");
    let v = WHITESPACE.replace_all(v.trim(), " ");

    DATE_TIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(&v, f).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(&v, f).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Longest leading number after stripping thousands separators.
fn read_amount(value: Option<&str>) -> Option<f64> {
    let v = value?.trim();
    if is_sentinel(v) {
        return None;
    }
    let cleaned: String = v.chars().filter(|c| *c != ',' && *c != '，').collect();
    LEADING_NUMBER
        .find(&cleaned)
        .and_then(|m| m.as_str().trim().parse::<f64>().ok())
}

/// Currency string to integer, floored. Empty, absent and sentinel values are `0`.
///
/// # Example
/// ```
/// use affnorm::coerce::to_int;
///
/// assert_eq!(to_int(Some("1,234")), 1234);
/// assert_eq!(to_int(Some("")), 0);
/// assert_eq!(to_int(None), 0);
/// ```
pub fn to_int(value: Option<&str>) -> i64 {
    read_amount(value).map(|n| n.floor() as i64).unwrap_or(0)
}

/// Like [`to_int`] but `None` for absent or empty input.
pub fn to_int_or_null(value: Option<&str>) -> Option<i64> {
    match value.map(str::trim) {
        None | Some("") => None,
        Some(v) => Some(to_int(Some(v))),
    }
}

/// Integer cast of the leading number, truncated toward zero. Separators are not stripped.
pub fn int_cast(value: &str) -> i64 {
    LEADING_NUMBER
        .find(value)
        .and_then(|m| m.as_str().trim().parse::<f64>().ok())
        .map(|n| n.trunc() as i64)
        .unwrap_or(0)
}

/// Currency string to a float. Unreadable values are `0.0`.
pub fn to_decimal(value: Option<&str>) -> f64 {
    read_amount(value).unwrap_or(0.0)
}

/// How a tax-adjusted amount is brought back to the destination type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rounding {
    /// Integer, rounded down.
    #[default]
    Floor,
    /// Integer, halves rounded away from zero.
    HalfUp,
    /// Decimal with two fractional digits.
    TwoDecimals,
}

/// Remove consumption tax: `amount × 100 / (100 + tax_percent)`.
pub fn exclude_tax(amount: f64, tax_percent: u32) -> f64 {
    amount * 100.0 / (100.0 + tax_percent as f64)
}

/// Currency coercion with optional tax-exclusive adjustment.
///
/// With `tax_percent = None` the amount is only rounded.
pub fn to_money(value: Option<&str>, tax_percent: Option<u32>, rounding: Rounding) -> FieldValue {
    let amount = read_amount(value).unwrap_or(0.0);
    round_amount(amount, tax_percent, rounding)
}

/// Apply tax adjustment and rounding to an already-read amount.
pub fn round_amount(amount: f64, tax_percent: Option<u32>, rounding: Rounding) -> FieldValue {
    let amount = match tax_percent {
        Some(tax) => exclude_tax(amount, tax),
        None => amount,
    };
    match rounding {
        Rounding::Floor => FieldValue::Int(amount.floor() as i64),
        Rounding::HalfUp => FieldValue::Int(amount.round() as i64),
        Rounding::TwoDecimals => FieldValue::Decimal((amount * 100.0).round() / 100.0),
    }
}
