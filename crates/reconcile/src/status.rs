//! Status records and aggregation.
//!
//! A [`StatusRecord`] is the canonical outcome of one operation. Records
//! are created fresh per operation, optionally collected per-key in a
//! [`StatusBuffer`], and merged - never mutated in place across operation
//! boundaries - into an aggregate [`Report`].

use crate::context::{RunContext, StatusMode};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message prefix denoting a no-op decision.
pub const SKIP_PREFIX: &str = "[SKIP] ";

/// Comment appended for steps short-circuited by an earlier failure.
pub const SKIP_ON_FAILURE: &str = "[SKIP] Skipping due to previous failure!";

/// Tri-state operation result. Dry runs cannot always prove success, so
/// `Unknown` is a first-class outcome, distinct from both pass and fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Success,
    Failure,
    Unknown,
}

impl Outcome {
    /// Map to the caller-facing ternary: `None` denotes dry-run/unknown.
    pub fn as_result(self) -> Option<bool> {
        match self {
            Self::Success => Some(true),
            Self::Failure => Some(false),
            Self::Unknown => None,
        }
    }

    pub fn failed(self) -> bool {
        matches!(self, Self::Failure)
    }

    /// Merge rank: a failure anywhere dominates, an unknown dominates
    /// success. Failure is sticky and never upgraded.
    fn worst(self, other: Self) -> Self {
        match (self, other) {
            (Self::Failure, _) | (_, Self::Failure) => Self::Failure,
            (Self::Unknown, _) | (_, Self::Unknown) => Self::Unknown,
            _ => Self::Success,
        }
    }
}

/// Old and new value for one reconciled property or item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueChange {
    pub old: Value,
    pub new: Value,
}

impl ValueChange {
    pub fn new(old: impl Into<Value>, new: impl Into<Value>) -> Self {
        Self {
            old: old.into(),
            new: new.into(),
        }
    }
}

/// Structured outcome of one operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    pub outcome: Outcome,
    /// True iff current state differed from desired and a corrective
    /// action was (or would be) taken.
    pub changed: bool,
    /// Ordered property/item name to old/new mapping. Insertion order
    /// drives report order.
    pub changes: IndexMap<String, ValueChange>,
    /// Human-readable explanation: reason for a skip, error text, or
    /// confirmation.
    pub message: String,
    /// Captured stdout/stderr from any external invocation.
    pub raw_output: Option<String>,
}

impl StatusRecord {
    pub fn success() -> Self {
        Self {
            outcome: Outcome::Success,
            changed: false,
            changes: IndexMap::new(),
            message: String::new(),
            raw_output: None,
        }
    }

    /// A successful record carrying an informational message.
    pub fn note(message: impl Into<String>) -> Self {
        let mut record = Self::success();
        record.message = message.into();
        record
    }

    /// A no-op decision: current state already matches desired state.
    pub fn skip(message: impl Into<String>) -> Self {
        Self::note(format!("{SKIP_PREFIX}{}", message.into()))
    }

    pub fn failure(message: impl Into<String>) -> Self {
        let mut record = Self::note(message);
        record.outcome = Outcome::Failure;
        record
    }

    /// Annotate a message with a prefix, e.g. `[SKIP] ` or `[ENABLED]  `.
    pub fn prefixed(prefix: &str, message: impl Into<String>) -> Self {
        Self::note(format!("{prefix}{}", message.into()))
    }

    pub fn with_change(
        mut self,
        key: impl Into<String>,
        old: impl Into<Value>,
        new: impl Into<Value>,
    ) -> Self {
        self.changes
            .insert(key.into(), ValueChange::new(old, new));
        self.changed = true;
        self
    }

    pub fn with_raw_output(mut self, raw: impl Into<String>) -> Self {
        self.raw_output = Some(raw.into());
        self
    }

    pub fn failed(&self) -> bool {
        self.outcome.failed()
    }

    /// Fold another record into this one: messages join line by line,
    /// changes append in order, the worst outcome wins.
    pub fn absorb(&mut self, other: StatusRecord) {
        self.outcome = self.outcome.worst(other.outcome);
        self.changed |= other.changed;
        self.changes.extend(other.changes);
        if !other.message.is_empty() {
            if !self.message.is_empty() {
                self.message.push('\n');
            }
            self.message.push_str(&other.message);
        }
        if let Some(raw) = other.raw_output {
            match &mut self.raw_output {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(&raw);
                }
                None => self.raw_output = Some(raw),
            }
        }
    }

    /// Resolve the outcome for the run mode. In test mode a pending change
    /// cannot be verified, so a would-be success is downgraded to
    /// [`Outcome::Unknown`]; the intended changes stay in the record so
    /// dry-run output remains informative.
    pub fn finalize(mut self, test_mode: bool) -> Self {
        if test_mode && self.changed && self.outcome == Outcome::Success {
            self.outcome = Outcome::Unknown;
        }
        self
    }
}

impl Default for StatusRecord {
    fn default() -> Self {
        Self::success()
    }
}

/// Collects per-key records within one operation and collapses them into
/// a single record according to the run's status mode.
#[derive(Debug, Default)]
pub struct StatusBuffer {
    records: Vec<StatusRecord>,
}

impl StatusBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: StatusRecord) {
        self.records.push(record);
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn any_failed(&self) -> bool {
        self.records.iter().any(StatusRecord::failed)
    }

    /// Merge all collected records into one. `StatusMode::Last` keeps only
    /// the final message; changes and outcomes merge in full either way.
    pub fn collapse(self, ctx: &RunContext) -> StatusRecord {
        let mut merged = StatusRecord::success();
        let last_index = self.records.len().checked_sub(1);
        for (index, mut record) in self.records.into_iter().enumerate() {
            if ctx.status_mode == StatusMode::Last && Some(index) != last_index {
                record.message = String::new();
                record.raw_output = None;
            }
            merged.absorb(record);
        }
        merged.finalize(ctx.test_mode)
    }
}

/// Aggregate result of an operation or an ordered sequence of them.
///
/// `result: None` specifically denotes dry-run/unknown; consumers must
/// treat it as distinct from both pass and fail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub name: String,
    pub result: Option<bool>,
    /// Per-step changes, keyed by a namespaced step name.
    pub changes: IndexMap<String, IndexMap<String, ValueChange>>,
    /// Newline-separated log with one delimited section per step, in
    /// original step order.
    pub comment: String,
}

impl Report {
    pub fn new(name: impl Into<String>, ctx: &RunContext) -> Self {
        Self {
            name: name.into(),
            // Optimistic until a step fails; a dry run starts unknown.
            result: if ctx.test_mode { None } else { Some(true) },
            changes: IndexMap::new(),
            comment: String::new(),
        }
    }

    /// Wrap a single operation's record as a caller-facing report.
    pub fn from_record(name: impl Into<String>, action: &str, record: &StatusRecord) -> Self {
        let mut report = Self {
            name: name.into(),
            result: record.outcome.as_result(),
            changes: IndexMap::new(),
            comment: String::new(),
        };
        if !record.changes.is_empty() {
            report
                .changes
                .insert(action.to_string(), record.changes.clone());
        }
        report.comment = record.message.clone();
        if let Some(raw) = &record.raw_output {
            if report.comment.trim().is_empty() {
                report.comment = raw.trim().to_string();
            }
        }
        report
    }

    pub fn failed(&self) -> bool {
        self.result == Some(false)
    }

    fn section(&mut self, action: &str) {
        if !self.comment.is_empty() {
            self.comment.push_str("\n\n");
        }
        self.comment.push_str(&format!("====== ['{action}'] ======\n"));
    }

    /// Merge one step's record under its own delimited section.
    ///
    /// Failure flips the aggregate result unless the step tolerates it;
    /// a failure, once recorded, is never overwritten by a later unknown.
    pub fn merge_step(
        &mut self,
        action: &str,
        change_key: &str,
        record: &StatusRecord,
        tolerate_failure: bool,
    ) {
        if !tolerate_failure {
            match record.outcome {
                Outcome::Failure => self.result = Some(false),
                Outcome::Unknown => {
                    if self.result == Some(true) {
                        self.result = None;
                    }
                }
                Outcome::Success => {}
            }
        }

        if !record.changes.is_empty() {
            self.changes
                .insert(change_key.to_string(), record.changes.clone());
        }

        self.section(action);
        if !record.message.trim().is_empty() {
            self.comment.push_str(&record.message);
        } else if let Some(raw) = &record.raw_output {
            self.comment.push_str(raw.trim());
        }
    }

    /// Record a step skipped because an earlier step failed. The step is
    /// never silently omitted from the audit log.
    pub fn skip_step(&mut self, action: &str) {
        self.section(action);
        self.comment.push_str(SKIP_ON_FAILURE);
    }
}
