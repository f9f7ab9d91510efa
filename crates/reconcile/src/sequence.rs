//! Ordered action sequencing with failure short-circuiting.
//!
//! Steps run strictly in order; later steps may depend on the corrective
//! effects of earlier ones (e.g. "ensure halted" before "remove"). Once a
//! step fails for real, every remaining step is skipped with an audit
//! comment - in test mode nothing mutates, so every step is still
//! described.

use crate::context::RunContext;
use crate::status::{Report, StatusRecord};

/// Whether a step's failure flips the aggregate result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// A failed step fails the whole sequence.
    #[default]
    Fail,
    /// The step is advisory; its failure is reported but tolerated.
    Pass,
}

impl FailurePolicy {
    pub fn tolerates_failure(self) -> bool {
        matches!(self, Self::Pass)
    }
}

/// One named step in an action sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub name: String,
    pub policy: FailurePolicy,
}

impl Step {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            policy: FailurePolicy::Fail,
        }
    }

    pub fn tolerated(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            policy: FailurePolicy::Pass,
        }
    }
}

/// Runs an ordered list of named steps and merges their records into one
/// aggregate report.
#[derive(Debug)]
pub struct Sequencer<'a> {
    name: &'a str,
    namespace: Option<&'a str>,
}

impl<'a> Sequencer<'a> {
    pub fn new(name: &'a str) -> Self {
        Self {
            name,
            namespace: None,
        }
    }

    /// Prefix for change keys in the aggregate report, e.g. `qvm` turns
    /// step `prefs` into change key `qvm.prefs`.
    pub fn with_namespace(mut self, namespace: &'a str) -> Self {
        self.namespace = Some(namespace);
        self
    }

    /// Execute the steps in order. `exec` is called once per non-skipped
    /// step and must not panic; operation errors belong inside the
    /// returned record. The report is the sole error channel.
    pub fn run<F>(&self, ctx: &RunContext, steps: &[Step], mut exec: F) -> Report
    where
        F: FnMut(&Step, &RunContext) -> StatusRecord,
    {
        let mut report = Report::new(self.name, ctx);

        for step in steps {
            // Dry runs describe every step; nothing mutates anyway.
            if report.failed() && !ctx.test_mode {
                report.skip_step(&step.name);
                continue;
            }

            let record = exec(step, ctx);
            let change_key = match self.namespace {
                Some(ns) => format!("{ns}.{}", step.name),
                None => step.name.clone(),
            };
            report.merge_step(
                &step.name,
                &change_key,
                &record,
                step.policy.tolerates_failure(),
            );
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Outcome;

    fn exec_by_name(step: &Step, _ctx: &RunContext) -> StatusRecord {
        match step.name.as_str() {
            "fail" => StatusRecord::failure("step failed"),
            "change" => StatusRecord::success().with_change("memory", 400, 600),
            name => StatusRecord::note(format!("{name} ok")),
        }
    }

    #[test]
    fn test_all_steps_pass() {
        let ctx = RunContext::new(false);
        let steps = vec![Step::required("one"), Step::required("two")];
        let report = Sequencer::new("test-vm").run(&ctx, &steps, exec_by_name);
        assert_eq!(report.result, Some(true));
        assert!(report.comment.contains("====== ['one'] ======\none ok"));
        assert!(report.comment.contains("====== ['two'] ======\ntwo ok"));
    }

    #[test]
    fn test_failure_short_circuits_remaining_steps() {
        let ctx = RunContext::new(false);
        let steps = vec![
            Step::required("one"),
            Step::required("fail"),
            Step::required("three"),
        ];
        let mut executed = Vec::new();
        let report = Sequencer::new("test-vm").run(&ctx, &steps, |step, ctx| {
            executed.push(step.name.clone());
            exec_by_name(step, ctx)
        });
        assert_eq!(report.result, Some(false));
        assert_eq!(executed, vec!["one", "fail"]);
        assert!(
            report
                .comment
                .contains("====== ['three'] ======\n[SKIP] Skipping due to previous failure!")
        );
    }

    #[test]
    fn test_tolerated_failure_does_not_short_circuit() {
        let ctx = RunContext::new(false);
        let steps = vec![
            Step::tolerated("fail"),
            Step::required("two"),
        ];
        let report = Sequencer::new("test-vm").run(&ctx, &steps, exec_by_name);
        assert_eq!(report.result, Some(true));
        assert!(report.comment.contains("two ok"));
    }

    #[test]
    fn test_test_mode_describes_every_step_after_failure() {
        let ctx = RunContext::new(true);
        let steps = vec![
            Step::required("fail"),
            Step::required("two"),
        ];
        let mut executed = Vec::new();
        let report = Sequencer::new("test-vm").run(&ctx, &steps, |step, ctx| {
            executed.push(step.name.clone());
            exec_by_name(step, ctx)
        });
        // Both steps ran (described); the real failure still fails the run.
        assert_eq!(executed, vec!["fail", "two"]);
        assert_eq!(report.result, Some(false));
    }

    #[test]
    fn test_test_mode_aggregate_result_is_unknown() {
        let ctx = RunContext::new(true);
        let steps = vec![Step::required("change")];
        let report = Sequencer::new("test-vm").run(&ctx, &steps, |step, ctx| {
            exec_by_name(step, ctx).finalize(ctx.test_mode)
        });
        assert_eq!(report.result, None);
        assert!(report.changes.contains_key("change"));
    }

    #[test]
    fn test_namespaced_change_keys() {
        let ctx = RunContext::new(false);
        let steps = vec![Step::required("change")];
        let report = Sequencer::new("test-vm")
            .with_namespace("qvm")
            .run(&ctx, &steps, exec_by_name);
        assert!(report.changes.contains_key("qvm.change"));
        let entry = &report.changes["qvm.change"]["memory"];
        assert_eq!(entry.old, serde_json::json!(400));
        assert_eq!(entry.new, serde_json::json!(600));
    }

    #[test]
    fn test_unknown_never_upgrades_failure() {
        let ctx = RunContext::new(true);
        let steps = vec![Step::required("fail"), Step::required("change")];
        let report = Sequencer::new("test-vm").run(&ctx, &steps, |step, ctx| {
            let record = exec_by_name(step, ctx).finalize(ctx.test_mode);
            assert!(matches!(
                record.outcome,
                Outcome::Failure | Outcome::Unknown
            ));
            record
        });
        assert_eq!(report.result, Some(false));
    }
}
