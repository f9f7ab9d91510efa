//! Composite VM reconciliation: an ordered sequence of named actions.
//!
//! Callers declare any subset of the known actions plus an optional
//! ordering with per-action failure tolerance. Actions run strictly in
//! order; a real failure short-circuits the rest, each skipped step still
//! contributing an audit comment.

use super::{check, devices, features, firewall, lifecycle, power, prefs, run, service, tags};
use crate::admin::{CreateOptions, ShutdownOptions, VmAdmin};
use indexmap::IndexMap;
use reconcile::{Report, RunContext, Sequencer, Step};

/// The default action order. Checks run first, lifecycle next,
/// configuration after that, power transitions and command execution
/// last.
pub const DEFAULT_ACTION_ORDER: &[&str] = &[
    "exists", "running", "missing", "halted", "absent", "present", "clone", "prefs", "devices",
    "service", "features", "firewall", "tags", "unpause", "pause", "shutdown", "kill", "start",
    "run",
];

/// Arguments to the `clone` action.
#[derive(Debug, Clone, Default)]
pub struct CloneSpec {
    pub source: String,
    pub shutdown_source: bool,
}

/// One requested action with its arguments.
#[derive(Debug, Clone)]
pub enum ActionRequest {
    Exists,
    Missing,
    Running,
    Halted,
    Present(CreateOptions),
    Absent,
    Clone(CloneSpec),
    Prefs(prefs::PrefsRequest),
    Devices(devices::DevicesRequest),
    Service(service::ServiceRequest),
    Features(features::FeatureRequest),
    Firewall(firewall::FirewallRequest),
    Tags(tags::TagsRequest),
    Unpause,
    Pause,
    Shutdown(ShutdownOptions),
    Kill,
    Start,
    Run(run::RunRequest),
    /// An action keyword the caller supplied that this module does not
    /// know. Fails the whole request up front.
    Unknown,
}

/// A composite request: the actions to run, keyed by action name, plus an
/// optional explicit ordering carrying failure tolerance.
#[derive(Debug, Clone, Default)]
pub struct VmRequest {
    pub order: Option<Vec<Step>>,
    pub actions: IndexMap<String, ActionRequest>,
}

pub fn vm(admin: &mut dyn VmAdmin, ctx: &RunContext, name: &str, req: &VmRequest) -> Report {
    let order: Vec<Step> = req.order.clone().unwrap_or_else(|| {
        DEFAULT_ACTION_ORDER
            .iter()
            .map(|action| Step::required(*action))
            .collect()
    });

    // Reject unknown action keywords before anything executes.
    for (action, request) in &req.actions {
        let known = order.iter().any(|step| step.name == *action)
            && !matches!(request, ActionRequest::Unknown);
        if !known {
            let mut report = Report::new(name, ctx);
            report.result = Some(false);
            report.comment = format!("Unknown action keyword: {action}");
            return report;
        }
    }

    let steps: Vec<Step> = order
        .into_iter()
        .filter(|step| req.actions.contains_key(&step.name))
        .collect();

    Sequencer::new(name)
        .with_namespace("qvm")
        .run(ctx, &steps, |step, ctx| {
            match &req.actions[&step.name] {
                ActionRequest::Exists => check::check(admin, ctx, name, check::CheckMode::Exists),
                ActionRequest::Missing => {
                    check::check(admin, ctx, name, check::CheckMode::Missing)
                }
                ActionRequest::Running => power::running(admin, ctx, name),
                ActionRequest::Halted => power::halted(admin, ctx, name),
                ActionRequest::Present(opts) => lifecycle::present(admin, ctx, name, opts),
                ActionRequest::Absent => lifecycle::absent(admin, ctx, name),
                ActionRequest::Clone(spec) => {
                    lifecycle::clone(admin, ctx, name, &spec.source, spec.shutdown_source)
                }
                ActionRequest::Prefs(req) => prefs::prefs(admin, ctx, name, req),
                ActionRequest::Devices(req) => devices::devices(admin, ctx, name, req),
                ActionRequest::Service(req) => service::service(admin, ctx, name, req),
                ActionRequest::Features(req) => features::features(admin, ctx, name, req),
                ActionRequest::Firewall(req) => firewall::firewall(admin, ctx, name, req),
                ActionRequest::Tags(req) => tags::tags(admin, ctx, name, req),
                ActionRequest::Unpause => power::unpause(admin, ctx, name),
                ActionRequest::Pause => power::pause(admin, ctx, name),
                ActionRequest::Shutdown(opts) => power::shutdown(admin, ctx, name, *opts),
                ActionRequest::Kill => power::kill(admin, ctx, name),
                ActionRequest::Start => power::start(admin, ctx, name),
                ActionRequest::Run(req) => run::run(admin, ctx, name, req),
                ActionRequest::Unknown => unreachable!("rejected above"),
            }
        })
}
