//! VM firewall ruleset reconciliation.
//!
//! The ruleset is replaced wholesale: the desired rules are parsed and
//! compared against the current ruleset in order, and a single change
//! entry records the old and new rule text.

use super::resolve_vm;
use crate::admin::{FirewallRule, VmAdmin};
use reconcile::{RunContext, StatusBuffer, StatusRecord};
use serde_json::Value;

/// Desired firewall ruleset. With `set` empty (or `list` set) the current
/// rules are reported instead.
#[derive(Debug, Clone, Default)]
pub struct FirewallRequest {
    /// Rules in `key=value` token form, e.g. `action=accept proto=tcp`.
    pub set: Vec<String>,
    pub list: bool,
}

impl FirewallRequest {
    fn is_list_only(&self) -> bool {
        self.list || self.set.is_empty()
    }
}

fn render(rules: &[FirewallRule]) -> String {
    rules
        .iter()
        .map(FirewallRule::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn firewall(
    admin: &mut dyn VmAdmin,
    ctx: &RunContext,
    name: &str,
    req: &FirewallRequest,
) -> StatusRecord {
    let vm = match resolve_vm(admin, name) {
        Ok(vm) => vm,
        Err(record) => return record,
    };

    let current = match admin.firewall(&vm) {
        Ok(rules) => rules,
        Err(err) => return StatusRecord::failure(err.to_string()),
    };

    if req.is_list_only() {
        let mut buffer = StatusBuffer::new();
        for rule in &current {
            buffer.push(StatusRecord::note(rule.to_string()));
        }
        return buffer.collapse(ctx);
    }

    // An unparseable rule fails the whole operation; a half-applied
    // ruleset would be worse than no change.
    let mut desired = Vec::with_capacity(req.set.len());
    for raw in &req.set {
        match FirewallRule::parse(raw) {
            Ok(rule) => desired.push(rule),
            Err(err) => return StatusRecord::failure(err.to_string()),
        }
    }

    if current == desired {
        return StatusRecord::skip(format!(
            "All requested rules already set:\n{}",
            render(&current)
        ));
    }

    if !ctx.test_mode {
        if let Err(err) = admin.set_firewall(&vm, &desired) {
            return StatusRecord::failure(err.to_string());
        }
    }

    StatusRecord::success()
        .with_change(
            "firewall",
            Value::from(render(&current)),
            Value::from(render(&desired)),
        )
        .finalize(ctx.test_mode)
}
