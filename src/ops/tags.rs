//! VM tag reconciliation.

use super::resolve_vm;
use crate::admin::VmAdmin;
use reconcile::{
    ItemOutcome, RunContext, SetOp, StatusBuffer, StatusRecord, apply_delta, reconcile_set,
};

/// Desired tag membership. With both lists empty (or `list` set) the
/// current tags are reported instead.
#[derive(Debug, Clone, Default)]
pub struct TagsRequest {
    pub add: Vec<String>,
    pub del: Vec<String>,
    pub list: bool,
}

impl TagsRequest {
    fn is_list_only(&self) -> bool {
        self.list || (self.add.is_empty() && self.del.is_empty())
    }
}

pub fn tags(admin: &mut dyn VmAdmin, ctx: &RunContext, name: &str, req: &TagsRequest) -> StatusRecord {
    let vm = match resolve_vm(admin, name) {
        Ok(vm) => vm,
        Err(record) => return record,
    };

    let current = match admin.tags(&vm) {
        Ok(tags) => tags,
        Err(err) => return StatusRecord::failure(err.to_string()),
    };

    if req.is_list_only() {
        let mut buffer = StatusBuffer::new();
        for tag in &current {
            buffer.push(StatusRecord::note(tag));
        }
        return buffer.collapse(ctx);
    }

    let plan = reconcile_set(&current, &req.add, &req.del);
    if plan.unchanged() {
        return plan.skip_record(format!(
            "All requested tags already set: {}",
            plan.sorted_current().join(",")
        ));
    }

    if ctx.test_mode {
        // Predicted membership, computed without touching the store.
        return plan.change_record("tags").finalize(true);
    }

    let mut buffer = StatusBuffer::new();
    let outcomes = apply_delta(&plan, |op, tag| {
        let result = match op {
            SetOp::Add => admin.add_tag(&vm, tag),
            SetOp::Remove => admin.remove_tag(&vm, tag),
        };
        match result {
            Ok(()) => ItemOutcome::Applied,
            Err(err) if err.is_conflict() => ItemOutcome::AlreadySatisfied,
            Err(err) => ItemOutcome::Failed(err.to_string()),
        }
    });
    for (tag, outcome) in &outcomes {
        if let ItemOutcome::Failed(message) = outcome {
            buffer.push(StatusRecord::failure(format!("{tag}: {message}")));
        }
    }

    // Re-read to report what actually holds now.
    match admin.tags(&vm) {
        Ok(new_tags) if new_tags != current => {
            let mut old_sorted = current.clone();
            old_sorted.sort();
            let mut new_sorted = new_tags;
            new_sorted.sort();
            buffer.push(StatusRecord::success().with_change(
                "tags",
                serde_json::Value::from(old_sorted),
                serde_json::Value::from(new_sorted),
            ));
        }
        Ok(_) => {}
        Err(err) => buffer.push(StatusRecord::failure(err.to_string())),
    }

    buffer.collapse(ctx)
}
