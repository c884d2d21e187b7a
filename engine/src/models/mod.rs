//! Domain models shared across the import engine.
//!
//! - [`RawRow`] - one tokenized source line, positional text fields
//! - [`FieldValue`] - a typed destination value
//! - [`NormalizedRecord`] - destination columns for one accepted row
//! - [`ConflictPolicy`] - how a writer treats an already-present natural key

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{ProfileError, ProfileResult};

// =============================================================================
// Raw Row
// =============================================================================

/// Highest field index a profile may reference.
pub const MAX_FIELD_INDEX: usize = 1023;

/// Reject a profile field index beyond [`MAX_FIELD_INDEX`].
///
/// Mutators grow rows up to the index they write, so an unchecked index from
/// a user profile could exhaust memory on the first row.
pub fn check_field_index(context: &str, index: usize) -> ProfileResult<()> {
    if index > MAX_FIELD_INDEX {
        return Err(ProfileError::FieldOutOfRange {
            context: context.to_string(),
            index,
        });
    }
    Ok(())
}

/// An ordered sequence of text fields from one source line.
///
/// Width and meaning are vendor specific. Reading past the end yields an
/// absent field, never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    /// 1-based source line number.
    pub line: u64,
    /// Field values in source order.
    pub fields: Vec<String>,
}

impl RawRow {
    pub fn new(line: u64, fields: Vec<String>) -> Self {
        Self { line, fields }
    }

    /// Build a row from string slices (line 0). Mostly useful in tests.
    pub fn from_strs(fields: &[&str]) -> Self {
        Self::new(0, fields.iter().map(|s| s.to_string()).collect())
    }

    /// Field at `index`, or `None` when the row is shorter.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    /// Field at `index`, with an absent field read as `""`.
    pub fn field(&self, index: usize) -> &str {
        self.get(index).unwrap_or("")
    }

    /// Overwrite field `index`, growing the row with empty fields if needed.
    pub fn set(&mut self, index: usize, value: impl Into<String>) {
        if index >= self.fields.len() {
            self.fields.resize(index + 1, String::new());
        }
        self.fields[index] = value.into();
    }

    /// Append text to field `index` (absent fields start empty).
    pub fn append(&mut self, index: usize, suffix: &str) {
        let mut value = self.field(index).to_string();
        value.push_str(suffix);
        self.set(index, value);
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// True when every field is empty or the lone `\x1A` end-of-file marker.
    pub fn is_blank(&self) -> bool {
        self.fields
            .iter()
            .all(|f| f.trim().is_empty() || f == "\x1A")
    }
}

// =============================================================================
// Field Value
// =============================================================================

/// A typed destination value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Text(String),
    Int(i64),
    Decimal(f64),
    /// Canonical `YYYY-MM-DD HH:MM:SS`.
    DateTime(String),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Text or date-time content as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) | FieldValue::DateTime(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// `Text` for a non-empty string, `Null` otherwise.
    pub fn text_or_null(value: Option<&str>) -> Self {
        match value {
            Some(s) if !s.is_empty() => FieldValue::Text(s.to_string()),
            _ => FieldValue::Null,
        }
    }

    /// JSON form, used for natural keys and JSON output.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl From<Option<String>> for FieldValue {
    fn from(value: Option<String>) -> Self {
        value.map(FieldValue::Text).unwrap_or(FieldValue::Null)
    }
}

// =============================================================================
// Normalized Record
// =============================================================================

/// Destination columns for one accepted row, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    /// Destination table.
    pub table: String,
    columns: Vec<(String, FieldValue)>,
}

impl NormalizedRecord {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
        }
    }

    /// Set a column, replacing an existing value in place.
    pub fn set(&mut self, column: impl Into<String>, value: FieldValue) {
        let column = column.into();
        match self.columns.iter_mut().find(|(name, _)| *name == column) {
            Some(slot) => slot.1 = value,
            None => self.columns.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, v)| v)
    }

    /// Text content of a column, if it holds text.
    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(FieldValue::as_str)
    }

    pub fn columns(&self) -> &[(String, FieldValue)] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// JSON object of the columns (without the table name).
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .columns
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        serde_json::Value::Object(map)
    }
}

impl Serialize for NormalizedRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (column, value) in &self.columns {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

// =============================================================================
// Conflict Policy
// =============================================================================

/// What a writer does when a record's natural key is already present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Always insert, duplicates included.
    #[default]
    Append,
    /// Skip records whose natural key already exists.
    IgnoreOnConflict,
}
