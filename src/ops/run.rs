//! Run a command inside a VM.

use super::{power, resolve_vm};
use crate::admin::VmAdmin;
use reconcile::{RunContext, StatusRecord};

#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub cmd: Vec<String>,
    pub user: Option<String>,
    /// Start the VM first if it is not running.
    pub auto_start: bool,
}

pub fn run(admin: &mut dyn VmAdmin, ctx: &RunContext, name: &str, req: &RunRequest) -> StatusRecord {
    let vm = match resolve_vm(admin, name) {
        Ok(vm) => vm,
        Err(record) => return record,
    };

    let mut record = StatusRecord::success();
    if req.auto_start {
        let start_record = power::start(admin, ctx, name);
        let start_failed = start_record.failed();
        record.absorb(start_record);
        if start_failed {
            return record;
        }
    }

    if ctx.test_mode {
        let mut intent =
            StatusRecord::note(format!("Command is set to be run: {}", req.cmd.join(" ")));
        intent.changed = true;
        record.absorb(intent);
        return record.finalize(true);
    }

    match admin.run_command(&vm, req.user.as_deref(), &req.cmd) {
        Ok(output) => {
            let mut executed = StatusRecord::note("command executed").with_raw_output(output);
            executed.changed = true;
            record.absorb(executed);
            record
        }
        Err(err) => {
            record.absorb(StatusRecord::failure(err.to_string()));
            record
        }
    }
}
