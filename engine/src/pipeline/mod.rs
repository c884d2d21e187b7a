//! Correction pipeline.
//!
//! Each vendor declares an ordered list of [`Step`]s. A step is either a gate
//! (keep or drop the row, never mutates) or a mutator (rewrites fields in place).
//! Steps run in ascending `order`; the first gate that drops the row stops the
//! rest.
//!
//! ```text
//! RawRow ─▶ [01 gate] ─▶ [02 mutator] ─▶ [10 gate] ─▶ Keep(row')
//!              │                            │
//!              └──────────── Drop ◀─────────┘
//! ```
//!
//! Steps are pure functions of the row except for [`RunState`], an explicit
//! per-file accumulator handed to mutators (used to spread bursts of rows
//! sharing one historical timestamp).

pub mod rules;

use std::collections::HashMap;
use std::fmt;

use crate::error::{ProfileError, ProfileResult, StepResult};
use crate::models::RawRow;

pub use rules::{Assign, Condition, CorrectionRule, RuleKind};

/// A keep/drop predicate. `Ok(false)` drops the row.
pub type GateFn = Box<dyn Fn(&RawRow) -> StepResult<bool> + Send + Sync>;

/// An in-place row rewrite.
pub type MutatorFn = Box<dyn Fn(&mut RawRow, &mut RunState) -> StepResult<()> + Send + Sync>;

/// What a step does.
pub enum StepAction {
    Gate(GateFn),
    Mutator(MutatorFn),
}

/// One named, ordered correction step.
pub struct Step {
    pub order: u32,
    pub name: String,
    action: StepAction,
}

impl Step {
    pub fn gate<F>(order: u32, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&RawRow) -> StepResult<bool> + Send + Sync + 'static,
    {
        Self {
            order,
            name: name.into(),
            action: StepAction::Gate(Box::new(f)),
        }
    }

    pub fn mutator<F>(order: u32, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut RawRow, &mut RunState) -> StepResult<()> + Send + Sync + 'static,
    {
        Self {
            order,
            name: name.into(),
            action: StepAction::Mutator(Box::new(f)),
        }
    }

    pub fn is_gate(&self) -> bool {
        matches!(self.action, StepAction::Gate(_))
    }

    /// Run the step. Returns whether the row is kept.
    pub fn run(&self, row: &mut RawRow, state: &mut RunState) -> StepResult<bool> {
        match &self.action {
            StepAction::Gate(f) => f(row),
            StepAction::Mutator(f) => f(row, state).map(|_| true),
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("order", &self.order)
            .field("name", &self.name)
            .field("kind", &if self.is_gate() { "gate" } else { "mutator" })
            .finish()
    }
}

/// Numeric ordinal embedded in a legacy step name.
///
/// The first `_`-separated segment made only of digits is read as a number, so
/// `afb_measure_2_x` sorts before `afb_measure_10_x`.
///
/// # Example
/// ```
/// use affnorm::pipeline::ordinal_from_name;
///
/// assert_eq!(ordinal_from_name("honey_measure_02_excludeRows"), Some(2));
/// assert_eq!(ordinal_from_name("rr_measure_10_fix"), Some(10));
/// assert_eq!(ordinal_from_name("no_number_here"), None);
/// ```
pub fn ordinal_from_name(name: &str) -> Option<u32> {
    name.split('_')
        .find(|seg| !seg.is_empty() && seg.chars().all(|c| c.is_ascii_digit()))
        .and_then(|seg| seg.parse().ok())
}

/// Per-file accumulator shared by the steps of one run.
#[derive(Debug, Default, Clone)]
pub struct RunState {
    counters: HashMap<String, u64>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the current count for `key` and increment it.
    pub fn next(&mut self, key: &str) -> u64 {
        let counter = self.counters.entry(key.to_string()).or_insert(0);
        let current = *counter;
        *counter += 1;
        current
    }

    /// Current count for `key` without incrementing.
    pub fn count(&self, key: &str) -> u64 {
        self.counters.get(key).copied().unwrap_or(0)
    }
}

/// Outcome of running the pipeline on one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Keep,
    Drop { step: String },
}

/// Ordered list of steps for one vendor.
#[derive(Debug, Default)]
pub struct Pipeline {
    steps: Vec<Step>,
}

impl Pipeline {
    /// Sort steps by `order`. Two steps with the same order are rejected.
    pub fn new(mut steps: Vec<Step>) -> ProfileResult<Self> {
        steps.sort_by_key(|s| s.order);
        for pair in steps.windows(2) {
            if pair[0].order == pair[1].order {
                return Err(ProfileError::DuplicateStepOrder {
                    order: pair[0].order,
                    first: pair[0].name.clone(),
                    second: pair[1].name.clone(),
                });
            }
        }
        Ok(Self { steps })
    }

    /// Compile data-driven rules into a pipeline.
    pub fn from_rules(rules: &[CorrectionRule]) -> ProfileResult<Self> {
        let steps = rules
            .iter()
            .map(CorrectionRule::compile)
            .collect::<ProfileResult<Vec<_>>>()?;
        Self::new(steps)
    }

    /// Add Rust-declared steps to an existing pipeline.
    pub fn extend(self, extra: Vec<Step>) -> ProfileResult<Self> {
        let mut steps = self.steps;
        steps.extend(extra);
        Self::new(steps)
    }

    /// Apply all steps to `row` in order.
    ///
    /// A failing step aborts this row only; the caller decides what to log.
    pub fn apply(&self, row: &mut RawRow, state: &mut RunState) -> StepResult<Verdict> {
        for step in &self.steps {
            if !step.run(row, state)? {
                return Ok(Verdict::Drop {
                    step: step.name.clone(),
                });
            }
        }
        Ok(Verdict::Keep)
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
