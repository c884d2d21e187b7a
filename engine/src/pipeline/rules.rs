//! Data-driven correction rules.
//!
//! Historical fixes (test conversions to exclude, order ids whose tracking
//! token must be replaced, site names to relabel) live in vendor profiles as
//! JSON. Each [`CorrectionRule`] compiles into one pipeline [`Step`].
//!
//! ```json
//! { "order": 2, "name": "afb_measure_02_correctMeasureId",
//!   "rule": "replace_by_key", "key_field": 12, "target_field": 17,
//!   "table": { "58519279": "gs_dogfood-1_mogu_afb" } }
//! ```

use std::collections::BTreeMap;

use chrono::Duration;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{ordinal_from_name, Step};
use crate::coerce::{int_cast, parse_date_time, to_date, CANONICAL_DATE_FORMAT};
use crate::error::{ProfileError, ProfileResult, StepError};
use crate::models::{check_field_index, RawRow};

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{(\d+)\}").expect("placeholder regex"));

/// A row predicate, evaluated against one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "if", rename_all = "snake_case")]
pub enum Condition {
    /// Field equals `value` exactly.
    Equals { field: usize, value: String },
    /// Field equals one of `values`.
    In { field: usize, values: Vec<String> },
    /// Field contains `value`.
    Contains { field: usize, value: String },
    /// Field contains any of `values`.
    ContainsAny { field: usize, values: Vec<String> },
    /// Field does not contain `value`.
    NotContains { field: usize, value: String },
    /// Field matches the regex `pattern`.
    Matches { field: usize, pattern: String },
    /// Field is absent or blank.
    Empty { field: usize },
    /// Integer cast of the field is at least `value`.
    AtLeast { field: usize, value: i64 },
    /// Integer cast of the field equals `value`.
    IntEquals { field: usize, value: i64 },
    /// Field is empty or holds anything but ASCII digits.
    NotDigits { field: usize },
    /// Field is non-empty but not a readable date.
    UnparsableDate { field: usize },
}

impl Condition {
    /// Field the condition reads.
    pub fn field(&self) -> usize {
        match self {
            Condition::Equals { field, .. }
            | Condition::In { field, .. }
            | Condition::Contains { field, .. }
            | Condition::ContainsAny { field, .. }
            | Condition::NotContains { field, .. }
            | Condition::Matches { field, .. }
            | Condition::Empty { field }
            | Condition::AtLeast { field, .. }
            | Condition::IntEquals { field, .. }
            | Condition::NotDigits { field }
            | Condition::UnparsableDate { field } => *field,
        }
    }

    fn compile(&self, rule: &str) -> ProfileResult<CompiledCondition> {
        check_field_index(rule, self.field())?;
        let regex = match self {
            Condition::Matches { pattern, .. } => Some(Regex::new(pattern).map_err(|e| {
                ProfileError::InvalidPattern {
                    rule: rule.to_string(),
                    message: e.to_string(),
                }
            })?),
            _ => None,
        };
        Ok(CompiledCondition {
            condition: self.clone(),
            regex,
        })
    }
}

/// A condition with its regex compiled once.
#[derive(Debug, Clone)]
pub struct CompiledCondition {
    condition: Condition,
    regex: Option<Regex>,
}

impl CompiledCondition {
    pub fn eval(&self, row: &RawRow) -> bool {
        match &self.condition {
            Condition::Equals { field, value } => row.field(*field) == value,
            Condition::In { field, values } => values.iter().any(|v| v == row.field(*field)),
            Condition::Contains { field, value } => row.field(*field).contains(value.as_str()),
            Condition::ContainsAny { field, values } => {
                let haystack = row.field(*field);
                values.iter().any(|v| haystack.contains(v.as_str()))
            }
            Condition::NotContains { field, value } => !row.field(*field).contains(value.as_str()),
            Condition::Matches { field, .. } => self
                .regex
                .as_ref()
                .is_some_and(|re| re.is_match(row.field(*field))),
            Condition::Empty { field } => row.field(*field).trim().is_empty(),
            Condition::AtLeast { field, value } => int_cast(row.field(*field)) >= *value,
            Condition::IntEquals { field, value } => int_cast(row.field(*field)) == *value,
            Condition::NotDigits { field } => {
                let v = row.field(*field);
                v.is_empty() || !v.chars().all(|c| c.is_ascii_digit())
            }
            Condition::UnparsableDate { field } => {
                let v = row.field(*field);
                !v.is_empty() && to_date(Some(v)).is_none()
            }
        }
    }
}

/// Compile a list of conditions.
pub fn compile_conditions(conditions: &[Condition], rule: &str) -> ProfileResult<Vec<CompiledCondition>> {
    conditions.iter().map(|c| c.compile(rule)).collect()
}

/// True when every condition holds (an empty list always holds).
pub fn all_hold(conditions: &[CompiledCondition], row: &RawRow) -> bool {
    conditions.iter().all(|c| c.eval(row))
}

/// Write `value` into `field`. `{N}` placeholders are replaced by field N.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assign {
    pub field: usize,
    pub value: String,
}

/// Expand `{N}` placeholders against `row`.
pub fn render_template(template: &str, row: &RawRow) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures| {
            caps[1]
                .parse::<usize>()
                .map(|i| row.field(i).to_string())
                .unwrap_or_default()
        })
        .into_owned()
}

/// The rule catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum RuleKind {
    /// Gate: drop when all conditions hold.
    DropWhen { when: Vec<Condition> },

    /// Gate: drop when any condition holds.
    DropWhenAny { when: Vec<Condition> },

    /// Mutator: overwrite fields when all conditions hold.
    Set {
        #[serde(default)]
        when: Vec<Condition>,
        set: Vec<Assign>,
    },

    /// Mutator: append to fields when all conditions hold.
    Append {
        #[serde(default)]
        when: Vec<Condition>,
        append: Vec<Assign>,
    },

    /// Mutator: look `key_field` up in `table` and write the hit to `target_field`.
    ReplaceByKey {
        key_field: usize,
        target_field: usize,
        table: BTreeMap<String, String>,
    },

    /// Mutator: keep only what precedes the first `delimiter` in `field`.
    TruncateAt {
        field: usize,
        delimiter: String,
        #[serde(default)]
        when: Vec<Condition>,
    },

    /// Mutator: rows whose `field` equals `timestamp` get `timestamp + n × step_secs`,
    /// n counting such rows from 0 in file order.
    SpreadIdenticalTimestamps {
        field: usize,
        timestamp: String,
        #[serde(default = "default_step_secs")]
        step_secs: i64,
    },
}

fn default_step_secs() -> i64 {
    1
}

impl RuleKind {
    /// Fields read or written by the rule itself, conditions excluded.
    fn fields(&self) -> Vec<usize> {
        match self {
            RuleKind::DropWhen { .. } | RuleKind::DropWhenAny { .. } => Vec::new(),
            RuleKind::Set { set: assigns, .. } | RuleKind::Append { append: assigns, .. } => {
                assigns.iter().map(|a| a.field).collect()
            }
            RuleKind::ReplaceByKey {
                key_field,
                target_field,
                ..
            } => vec![*key_field, *target_field],
            RuleKind::TruncateAt { field, .. } | RuleKind::SpreadIdenticalTimestamps { field, .. } => {
                vec![*field]
            }
        }
    }
}

/// One named correction rule from a vendor profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionRule {
    /// Explicit position. Falls back to the ordinal in `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<u32>,
    pub name: String,
    #[serde(flatten)]
    pub kind: RuleKind,
}

impl CorrectionRule {
    pub fn new(order: u32, name: impl Into<String>, kind: RuleKind) -> Self {
        Self {
            order: Some(order),
            name: name.into(),
            kind,
        }
    }

    /// Effective order of this rule.
    pub fn effective_order(&self) -> ProfileResult<u32> {
        self.order
            .or_else(|| ordinal_from_name(&self.name))
            .ok_or_else(|| ProfileError::MissingStepOrder(self.name.clone()))
    }

    /// Compile into a pipeline step.
    pub fn compile(&self) -> ProfileResult<Step> {
        let order = self.effective_order()?;
        let name = self.name.clone();
        for index in self.kind.fields() {
            check_field_index(&name, index)?;
        }

        let step = match &self.kind {
            RuleKind::DropWhen { when } => {
                let conditions = compile_conditions(when, &name)?;
                Step::gate(order, name, move |row| Ok(!all_hold(&conditions, row)))
            }

            RuleKind::DropWhenAny { when } => {
                let conditions = compile_conditions(when, &name)?;
                Step::gate(order, name, move |row| {
                    Ok(!conditions.iter().any(|c| c.eval(row)))
                })
            }

            RuleKind::Set { when, set } => {
                let conditions = compile_conditions(when, &name)?;
                let assigns = set.clone();
                Step::mutator(order, name, move |row, _| {
                    if all_hold(&conditions, row) {
                        let rendered: Vec<(usize, String)> = assigns
                            .iter()
                            .map(|a| (a.field, render_template(&a.value, row)))
                            .collect();
                        for (field, value) in rendered {
                            row.set(field, value);
                        }
                    }
                    Ok(())
                })
            }

            RuleKind::Append { when, append } => {
                let conditions = compile_conditions(when, &name)?;
                let assigns = append.clone();
                Step::mutator(order, name, move |row, _| {
                    if all_hold(&conditions, row) {
                        let rendered: Vec<(usize, String)> = assigns
                            .iter()
                            .map(|a| (a.field, render_template(&a.value, row)))
                            .collect();
                        for (field, suffix) in rendered {
                            row.append(field, &suffix);
                        }
                    }
                    Ok(())
                })
            }

            RuleKind::ReplaceByKey {
                key_field,
                target_field,
                table,
            } => {
                let (key_field, target_field, table) = (*key_field, *target_field, table.clone());
                Step::mutator(order, name, move |row, _| {
                    if let Some(replacement) = table.get(row.field(key_field)) {
                        row.set(target_field, replacement.clone());
                    }
                    Ok(())
                })
            }

            RuleKind::TruncateAt {
                field,
                delimiter,
                when,
            } => {
                let conditions = compile_conditions(when, &name)?;
                let (field, delimiter) = (*field, delimiter.clone());
                Step::mutator(order, name, move |row, _| {
                    if all_hold(&conditions, row) {
                        if let Some((head, _)) = row.field(field).split_once(delimiter.as_str()) {
                            let head = head.to_string();
                            row.set(field, head);
                        }
                    }
                    Ok(())
                })
            }

            RuleKind::SpreadIdenticalTimestamps {
                field,
                timestamp,
                step_secs,
            } => {
                let base = parse_date_time(timestamp).ok_or_else(|| ProfileError::InvalidPattern {
                    rule: name.clone(),
                    message: format!("unreadable timestamp '{}'", timestamp),
                })?;
                let (field, timestamp, step_secs) = (*field, timestamp.clone(), *step_secs);
                let counter_key = name.clone();
                Step::mutator(order, name, move |row, state| {
                    if row.field(field).trim() != timestamp {
                        return Ok(());
                    }
                    let n = state.next(&counter_key);
                    let offset = i64::try_from(n)
                        .ok()
                        .and_then(|n| n.checked_mul(step_secs))
                        .and_then(Duration::try_seconds)
                        .ok_or_else(|| StepError::new(&counter_key, format!("offset overflow at row {}", n)))?;
                    let shifted = base
                        .checked_add_signed(offset)
                        .ok_or_else(|| StepError::new(&counter_key, "timestamp out of range"))?;
                    row.set(field, shifted.format(CANONICAL_DATE_FORMAT).to_string());
                    Ok(())
                })
            }
        };

        Ok(step)
    }
}
