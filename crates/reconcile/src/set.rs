//! Set-membership reconciliation for tags, services, features and devices.
//!
//! The plan computes `new_set = (current ∪ add) \ remove` locally, so a
//! dry run predicts the result without consulting the authoritative
//! mutator. Add/remove lists are deduplicated preserving first-seen order;
//! change lists are rendered sorted.

use crate::status::StatusRecord;
use serde_json::Value;
use std::collections::BTreeSet;

/// Remove duplicates, keeping the first occurrence of each item.
pub fn dedup_preserving_order(items: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    items
        .iter()
        .filter(|item| seen.insert(item.as_str().to_string()))
        .cloned()
        .collect()
}

/// Whether any correction is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetAction {
    Skip,
    Mutate,
}

/// Which side of the delta an item belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    Add,
    Remove,
}

/// Result of applying one item against the authoritative store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Applied,
    /// The store already holds the desired membership for this item
    /// (e.g. "already attached"); counted as satisfied, not an error.
    AlreadySatisfied,
    Failed(String),
}

/// The decided delta between a current and desired set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetPlan {
    pub current: Vec<String>,
    /// Items genuinely missing from the current set, deduplicated,
    /// first-seen order.
    pub to_add: Vec<String>,
    /// Items genuinely present in the current set, deduplicated,
    /// first-seen order.
    pub to_remove: Vec<String>,
    /// Predicted membership after the delta, sorted.
    pub new_set: Vec<String>,
    pub action: SetAction,
}

impl SetPlan {
    pub fn unchanged(&self) -> bool {
        self.action == SetAction::Skip
    }

    pub fn sorted_current(&self) -> Vec<String> {
        let mut sorted = self.current.clone();
        sorted.sort();
        sorted
    }

    /// Skip record listing the unchanged membership.
    pub fn skip_record(&self, message: impl Into<String>) -> StatusRecord {
        StatusRecord::skip(message)
    }

    /// Change record under `key`: `{old: sorted current, new: new set}`.
    pub fn change_record(&self, key: &str) -> StatusRecord {
        StatusRecord::success().with_change(
            key,
            Value::from(self.sorted_current()),
            Value::from(self.new_set.clone()),
        )
    }
}

/// Compute the minimal delta taking `current` to `(current ∪ add) \ remove`.
///
/// The plan is a pure function of its inputs; items listed in both `add`
/// and `remove` end up removed, matching the set formula.
pub fn reconcile_set(current: &[String], add: &[String], remove: &[String]) -> SetPlan {
    let add = dedup_preserving_order(add);
    let remove = dedup_preserving_order(remove);

    let current_set: BTreeSet<&str> = current.iter().map(String::as_str).collect();
    let remove_set: BTreeSet<&str> = remove.iter().map(String::as_str).collect();

    let mut new_set: BTreeSet<String> = current.iter().cloned().collect();
    for item in &add {
        new_set.insert(item.clone());
    }
    for item in &remove {
        new_set.remove(item);
    }

    let to_add: Vec<String> = add
        .iter()
        .filter(|item| !current_set.contains(item.as_str()) && !remove_set.contains(item.as_str()))
        .cloned()
        .collect();
    let to_remove: Vec<String> = remove
        .iter()
        .filter(|item| current_set.contains(item.as_str()))
        .cloned()
        .collect();

    let action = if to_add.is_empty() && to_remove.is_empty() {
        SetAction::Skip
    } else {
        SetAction::Mutate
    };

    SetPlan {
        current: current.to_vec(),
        to_add,
        to_remove,
        new_set: new_set.into_iter().collect(),
        action,
    }
}

/// Drive a plan item by item through the caller's mutator.
///
/// A conflict meaning "already satisfied" is not an error; any other
/// failure is recorded against that item and the batch continues.
pub fn apply_delta<F>(plan: &SetPlan, mut apply: F) -> Vec<(String, ItemOutcome)>
where
    F: FnMut(SetOp, &str) -> ItemOutcome,
{
    let mut outcomes = Vec::with_capacity(plan.to_add.len() + plan.to_remove.len());
    for item in &plan.to_add {
        outcomes.push((item.clone(), apply(SetOp::Add, item)));
    }
    for item in &plan.to_remove {
        outcomes.push((item.clone(), apply(SetOp::Remove, item)));
    }
    outcomes
}
