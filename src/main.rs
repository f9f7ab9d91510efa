mod admin;
mod cli;
mod desired;
mod ops;
mod report;
mod runner;

use admin::{CreateOptions, DeviceAssignment, QvmAdmin, ShutdownOptions, VmAdmin};
use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Commands, StatusModeArg};
use indexmap::IndexMap;
use ops::check::CheckMode;
use ops::power::StateCheck;
use reconcile::{DesiredValue, Report, RunContext, StatusMode, StatusRecord};
use runner::CommandRunner;
use std::io;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = RunContext::new(cli.test).with_status_mode(match cli.status_mode {
        StatusModeArg::All => StatusMode::All,
        StatusModeArg::Last => StatusMode::Last,
    });
    let mut admin = QvmAdmin::new(CommandRunner::new(cli.test));

    let reports = dispatch(&cli.command, &mut admin, &ctx)?;

    let mut failed = false;
    for report in &reports {
        report::display_report(report);
        failed |= report.failed();
    }
    if failed {
        std::process::exit(1);
    }
    Ok(())
}

fn dispatch(
    command: &Commands,
    admin: &mut dyn VmAdmin,
    ctx: &RunContext,
) -> Result<Vec<Report>> {
    let reports = match command {
        Commands::Apply(args) => {
            let document = desired::load(&args.file)?;
            document
                .vms
                .iter()
                .map(|(name, request)| ops::vm::vm(admin, ctx, name, request))
                .collect()
        }
        Commands::Check(args) => {
            let mode = match args.mode {
                cli::CheckModeArg::Exists => CheckMode::Exists,
                cli::CheckModeArg::Missing => CheckMode::Missing,
            };
            vec![single(&args.vm, "check", ops::check::check(admin, ctx, &args.vm, mode))]
        }
        Commands::State(args) => {
            let checks: Vec<StateCheck> = args.states.iter().map(|s| state_check(*s)).collect();
            vec![single(
                &args.vm,
                "state",
                ops::power::state(admin, ctx, &args.vm, &checks),
            )]
        }
        Commands::Present(args) => {
            let opts = CreateOptions {
                class: args.class.clone(),
                template: args.template.clone(),
                label: args.label.clone(),
                memory: args.memory,
                vcpus: args.vcpus,
            };
            vec![single(
                &args.vm,
                "present",
                ops::lifecycle::present(admin, ctx, &args.vm, &opts),
            )]
        }
        Commands::Absent { vm } => {
            vec![single(vm, "absent", ops::lifecycle::absent(admin, ctx, vm))]
        }
        Commands::Clone(args) => {
            vec![single(
                &args.clone,
                "clone",
                ops::lifecycle::clone(admin, ctx, &args.clone, &args.source, args.shutdown),
            )]
        }
        Commands::Prefs(args) => {
            let request = prefs_request(&args.get, &args.sets)?;
            vec![single(
                &args.vm,
                "prefs",
                ops::prefs::prefs(admin, ctx, &args.vm, &request),
            )]
        }
        Commands::Service(args) => {
            let request = ops::service::ServiceRequest {
                enable: args.enable.clone(),
                disable: args.disable.clone(),
                default: args.default.clone(),
                list: false,
            };
            vec![single(
                &args.vm,
                "service",
                ops::service::service(admin, ctx, &args.vm, &request),
            )]
        }
        Commands::Features(args) => {
            let request = ops::features::FeatureRequest {
                enable: args.enable.clone(),
                disable: args.disable.clone(),
                default: args.default.clone(),
                set: parse_assignments(&args.set)?,
                list: false,
            };
            vec![single(
                &args.vm,
                "features",
                ops::features::features(admin, ctx, &args.vm, &request),
            )]
        }
        Commands::Tags(args) => {
            let request = ops::tags::TagsRequest {
                add: args.add.clone(),
                del: args.del.clone(),
                list: false,
            };
            vec![single(
                &args.vm,
                "tags",
                ops::tags::tags(admin, ctx, &args.vm, &request),
            )]
        }
        Commands::Devices(args) => {
            let request = ops::devices::DevicesRequest {
                attach: parse_devices(&args.attach)?,
                detach: parse_devices(&args.detach)?,
                list: false,
            };
            vec![single(
                &args.vm,
                "devices",
                ops::devices::devices(admin, ctx, &args.vm, &request),
            )]
        }
        Commands::Firewall(args) => {
            let request = ops::firewall::FirewallRequest {
                set: args.set.clone(),
                list: false,
            };
            vec![single(
                &args.vm,
                "firewall",
                ops::firewall::firewall(admin, ctx, &args.vm, &request),
            )]
        }
        Commands::Start { vm } => {
            vec![single(vm, "start", ops::power::start(admin, ctx, vm))]
        }
        Commands::Shutdown(args) => {
            let opts = ShutdownOptions {
                wait: args.wait,
                force: args.force,
                kill: args.kill,
            };
            vec![single(
                &args.vm,
                "shutdown",
                ops::power::shutdown(admin, ctx, &args.vm, opts),
            )]
        }
        Commands::Kill { vm } => {
            vec![single(vm, "kill", ops::power::kill(admin, ctx, vm))]
        }
        Commands::Pause { vm } => {
            vec![single(vm, "pause", ops::power::pause(admin, ctx, vm))]
        }
        Commands::Unpause { vm } => {
            vec![single(vm, "unpause", ops::power::unpause(admin, ctx, vm))]
        }
        Commands::Run(args) => {
            let request = ops::run::RunRequest {
                cmd: args.cmd.clone(),
                user: args.user.clone(),
                auto_start: args.auto,
            };
            vec![single(
                &args.vm,
                "run",
                ops::run::run(admin, ctx, &args.vm, &request),
            )]
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(*shell, &mut cmd, "qvmctl", &mut io::stdout());
            Vec::new()
        }
    };
    Ok(reports)
}

fn single(vm: &str, action: &str, record: StatusRecord) -> Report {
    Report::from_record(vm, action, &record)
}

fn state_check(arg: cli::StateArg) -> StateCheck {
    match arg {
        cli::StateArg::Status => StateCheck::Status,
        cli::StateArg::Running => StateCheck::Running,
        cli::StateArg::Halted => StateCheck::Halted,
        cli::StateArg::Transient => StateCheck::Transient,
        cli::StateArg::Paused => StateCheck::Paused,
    }
}

/// Parse `key=value` CLI assignments into a loose map.
fn parse_assignments(assignments: &[String]) -> Result<IndexMap<String, String>> {
    let mut map = IndexMap::new();
    for assignment in assignments {
        let Some((key, value)) = assignment.split_once('=') else {
            bail!("expected key=value, got '{assignment}'");
        };
        map.insert(key.to_string(), value.to_string());
    }
    Ok(map)
}

fn prefs_request(get: &[String], sets: &[String]) -> Result<ops::prefs::PrefsRequest> {
    let mut entries: IndexMap<String, DesiredValue> = get
        .iter()
        .map(|key| (key.clone(), DesiredValue::Query))
        .collect();
    for (key, value) in parse_assignments(sets)? {
        let desired = if value == "*default*" {
            DesiredValue::Reset
        } else {
            DesiredValue::Set(serde_json::Value::from(value))
        };
        entries.insert(key, desired);
    }
    Ok(ops::prefs::PrefsRequest::set(entries))
}

/// Parse `class:backend:ident[,option=value...]` device specs.
fn parse_devices(specs: &[String]) -> Result<Vec<DeviceAssignment>> {
    let mut devices = Vec::with_capacity(specs.len());
    for spec in specs {
        let mut parts = spec.split(',');
        let base = parts.next().context("empty device spec")?;
        let mut device = DeviceAssignment::parse(base)?;
        for option in parts {
            let Some((key, value)) = option.split_once('=') else {
                bail!("expected option=value in device spec '{spec}'");
            };
            device.options.insert(key.to_string(), value.to_string());
        }
        devices.push(device);
    }
    Ok(devices)
}
