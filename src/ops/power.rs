//! Power state checks and transitions.
//!
//! Transitions follow the skip-when-satisfied rule: starting a running VM
//! or shutting down a halted one is a no-op, reported as such. Each real
//! transition is re-verified against the admin interface afterwards; in
//! test mode the intended transition is described and nothing is invoked.

use super::resolve_vm;
use crate::admin::{PowerState, ShutdownOptions, VM_MISSING, VmAdmin, VmHandle};
use reconcile::{RunContext, StatusRecord};

/// Power state predicates accepted by [`state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateCheck {
    /// Report the state without asserting anything.
    Status,
    Running,
    Halted,
    Transient,
    Paused,
}

impl StateCheck {
    fn matches(self, power: PowerState) -> bool {
        matches!(
            (self, power),
            (Self::Running, PowerState::Running)
                | (Self::Halted, PowerState::Halted)
                | (Self::Transient, PowerState::Transient)
                | (Self::Paused, PowerState::Paused)
        )
    }
}

/// Report the VM power state, optionally asserting it matches one of the
/// given predicates.
pub fn state(
    admin: &dyn VmAdmin,
    _ctx: &RunContext,
    name: &str,
    checks: &[StateCheck],
) -> StatusRecord {
    let vm = match resolve_vm(admin, name) {
        Ok(vm) => vm,
        Err(record) => return record,
    };
    let power = match admin.power_state(&vm) {
        Ok(power) => power,
        Err(err) => return StatusRecord::failure(err.to_string()),
    };

    let assertion_holds = checks.is_empty()
        || checks
            .iter()
            .any(|check| *check == StateCheck::Status || check.matches(power));

    let record = StatusRecord::note(power.as_str()).with_raw_output(power.as_str());
    if assertion_holds {
        record
    } else {
        let mut record = record;
        record.outcome = reconcile::Outcome::Failure;
        record
    }
}

/// Assert the VM is running.
pub fn running(admin: &dyn VmAdmin, ctx: &RunContext, name: &str) -> StatusRecord {
    state(admin, ctx, name, &[StateCheck::Running])
}

/// Assert the VM is halted. A missing VM counts as satisfied - there is
/// nothing left to halt.
pub fn halted(admin: &dyn VmAdmin, _ctx: &RunContext, name: &str) -> StatusRecord {
    let vm = match admin.resolve(name) {
        Ok(vm) => vm,
        Err(err) if err.is_not_found() => return StatusRecord::skip(VM_MISSING),
        Err(err) => return StatusRecord::failure(err.to_string()),
    };
    match admin.power_state(&vm) {
        Ok(PowerState::Halted) => StatusRecord::skip(format!("'{name}' is already halted.")),
        Ok(power) => StatusRecord::failure(power.as_str()),
        Err(err) => StatusRecord::failure(err.to_string()),
    }
}

fn verify_state(
    admin: &dyn VmAdmin,
    vm: &VmHandle,
    wanted: PowerState,
    success: &str,
    failure: &str,
) -> StatusRecord {
    match admin.power_state(vm) {
        Ok(power) if power == wanted => {
            let mut record = StatusRecord::note(success);
            record.changed = true;
            record
        }
        Ok(_) => StatusRecord::failure(failure),
        Err(err) => StatusRecord::failure(err.to_string()),
    }
}

pub fn start(admin: &mut dyn VmAdmin, ctx: &RunContext, name: &str) -> StatusRecord {
    let vm = match resolve_vm(admin, name) {
        Ok(vm) => vm,
        Err(record) => return record,
    };
    let power = match admin.power_state(&vm) {
        Ok(power) => power,
        Err(err) => return StatusRecord::failure(err.to_string()),
    };

    match power {
        PowerState::Running => StatusRecord::skip(format!("'{name}' is already running.")),
        PowerState::Paused => {
            if ctx.test_mode {
                let mut record = StatusRecord::note("VM set to be resumed");
                record.changed = true;
                return record.finalize(true);
            }
            if let Err(err) = admin.unpause(&vm) {
                return StatusRecord::failure(err.to_string());
            }
            verify_state(
                admin,
                &vm,
                PowerState::Running,
                "VM resumed from pause",
                "VM failed to resume from pause!",
            )
        }
        PowerState::Transient => {
            if ctx.test_mode {
                let mut record = StatusRecord::note(
                    "'guid' will be started since in 'transient' state!",
                );
                record.changed = true;
                return record.finalize(true);
            }
            if let Err(err) = admin.start_gui_agent(&vm) {
                return StatusRecord::failure(err.to_string());
            }
            verify_state(
                admin,
                &vm,
                PowerState::Running,
                "VM started",
                "'guid' failed to start!",
            )
        }
        PowerState::Halted => {
            if ctx.test_mode {
                let mut record = StatusRecord::note("VM is set to be started");
                record.changed = true;
                return record.finalize(true);
            }
            if let Err(err) = admin.start(&vm) {
                return StatusRecord::failure(err.to_string());
            }
            // A fresh start may come up transient; kick the GUI agent.
            if let Ok(PowerState::Transient) = admin.power_state(&vm) {
                if let Err(err) = admin.start_gui_agent(&vm) {
                    return StatusRecord::failure(err.to_string());
                }
            }
            verify_state(
                admin,
                &vm,
                PowerState::Running,
                "VM started",
                "VM failed to start!",
            )
        }
    }
}

pub fn shutdown(
    admin: &mut dyn VmAdmin,
    ctx: &RunContext,
    name: &str,
    opts: ShutdownOptions,
) -> StatusRecord {
    let vm = match resolve_vm(admin, name) {
        Ok(vm) => vm,
        Err(record) => return record,
    };

    if ctx.test_mode {
        let message = if opts.kill {
            "VM is set to be killed"
        } else {
            "VM is set for shutdown"
        };
        let mut record = StatusRecord::note(message);
        record.changed = true;
        return record.finalize(true);
    }

    let power = match admin.power_state(&vm) {
        Ok(power) => power,
        Err(err) => return StatusRecord::failure(err.to_string()),
    };

    match power {
        PowerState::Halted => StatusRecord::skip(format!("'{name}' is already halted.")),
        PowerState::Transient => {
            if opts.force || opts.kill {
                if let Err(err) = admin.kill(&vm) {
                    return StatusRecord::failure(err.to_string());
                }
                verify_state(
                    admin,
                    &vm,
                    PowerState::Halted,
                    "VM halted",
                    "'guid' failed to halt!",
                )
            } else {
                StatusRecord::failure("VM is 'transient'. 'kill' or 'force' mode not enabled!")
            }
        }
        PowerState::Paused | PowerState::Running => {
            if power == PowerState::Paused {
                if let Err(err) = admin.unpause(&vm) {
                    return StatusRecord::failure(err.to_string());
                }
            }
            let result = if opts.kill {
                admin.kill(&vm)
            } else {
                admin.shutdown(&vm, opts.wait)
            };
            if let Err(err) = result {
                return StatusRecord::failure(err.to_string());
            }
            // Kill if still not halted, only when force is enabled.
            if opts.force && !matches!(admin.power_state(&vm), Ok(PowerState::Halted)) {
                if let Err(err) = admin.kill(&vm) {
                    return StatusRecord::failure(err.to_string());
                }
            }
            verify_state(
                admin,
                &vm,
                PowerState::Halted,
                "VM halted",
                "VM failed to halt!",
            )
        }
    }
}

/// Kill outright. Already-halted VMs are skipped.
pub fn kill(admin: &mut dyn VmAdmin, ctx: &RunContext, name: &str) -> StatusRecord {
    if let Ok(vm) = admin.resolve(name) {
        if matches!(admin.power_state(&vm), Ok(PowerState::Halted)) {
            return StatusRecord::skip(format!("'{name}' is already halted."));
        }
    }
    shutdown(
        admin,
        ctx,
        name,
        ShutdownOptions {
            kill: true,
            ..ShutdownOptions::default()
        },
    )
}

pub fn pause(admin: &mut dyn VmAdmin, ctx: &RunContext, name: &str) -> StatusRecord {
    let vm = match resolve_vm(admin, name) {
        Ok(vm) => vm,
        Err(record) => return record,
    };
    match admin.power_state(&vm) {
        Ok(PowerState::Running) => {}
        Ok(_) => return StatusRecord::note("VM is not running"),
        Err(err) => return StatusRecord::failure(err.to_string()),
    }

    if ctx.test_mode {
        let mut record = StatusRecord::note("VM is set to be paused");
        record.changed = true;
        return record.finalize(true);
    }
    if let Err(err) = admin.pause(&vm) {
        return StatusRecord::failure(err.to_string());
    }
    verify_state(
        admin,
        &vm,
        PowerState::Paused,
        "VM paused",
        "VM failed to pause!",
    )
}

pub fn unpause(admin: &mut dyn VmAdmin, ctx: &RunContext, name: &str) -> StatusRecord {
    let vm = match resolve_vm(admin, name) {
        Ok(vm) => vm,
        Err(record) => return record,
    };
    match admin.power_state(&vm) {
        Ok(PowerState::Paused) => {}
        Ok(_) => return StatusRecord::note("VM is not paused"),
        Err(err) => return StatusRecord::failure(err.to_string()),
    }

    if ctx.test_mode {
        let mut record = StatusRecord::note("VM set to be resumed");
        record.changed = true;
        return record.finalize(true);
    }
    if let Err(err) = admin.unpause(&vm) {
        return StatusRecord::failure(err.to_string());
    }
    verify_state(
        admin,
        &vm,
        PowerState::Running,
        "VM resumed from pause",
        "VM failed to resume from pause!",
    )
}
