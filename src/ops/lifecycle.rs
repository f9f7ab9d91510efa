//! VM lifecycle: create, remove, clone and their idempotent wrappers.

use super::{power, resolve_vm};
use crate::admin::{CreateOptions, PowerState, ShutdownOptions, VmAdmin};
use reconcile::{RunContext, StatusRecord};

/// Create a VM. Fails if a VM with the name already exists; use
/// [`present`] for the idempotent form.
pub fn create(
    admin: &mut dyn VmAdmin,
    ctx: &RunContext,
    name: &str,
    opts: &CreateOptions,
) -> StatusRecord {
    if admin.resolve(name).is_ok() {
        return StatusRecord::failure(format!("A VM with the name '{name}' already exists."));
    }

    if ctx.test_mode {
        let mut record = StatusRecord::note("VM is set to be created");
        record.changed = true;
        return record.finalize(true);
    }

    if let Err(err) = admin.create(name, opts) {
        return StatusRecord::failure(err.to_string());
    }

    // Confirm the VM actually materialized.
    match admin.resolve(name) {
        Ok(_) => {
            let mut record = StatusRecord::note(format!("VM '{name}' has been created"));
            record.changed = true;
            record
        }
        Err(_) => StatusRecord::failure(format!("VM '{name}' was not created")),
    }
}

/// Ensure the VM exists, creating it when missing.
pub fn present(
    admin: &mut dyn VmAdmin,
    ctx: &RunContext,
    name: &str,
    opts: &CreateOptions,
) -> StatusRecord {
    if admin.resolve(name).is_ok() {
        return StatusRecord::skip(format!("A VM with the name '{name}' already exists."));
    }
    create(admin, ctx, name, opts)
}

/// Remove a VM, shutting it down first if needed.
pub fn remove(admin: &mut dyn VmAdmin, ctx: &RunContext, name: &str) -> StatusRecord {
    let vm = match resolve_vm(admin, name) {
        Ok(vm) => vm,
        Err(record) => return record,
    };

    if ctx.test_mode {
        let mut record = StatusRecord::note("VM is set to be removed");
        record.changed = true;
        return record.finalize(true);
    }

    // Ensure halted; force-kill a shutdown that does not converge.
    if !matches!(admin.power_state(&vm), Ok(PowerState::Halted)) {
        let shutdown_record = power::shutdown(
            admin,
            ctx,
            name,
            ShutdownOptions {
                wait: true,
                force: true,
                kill: false,
            },
        );
        if shutdown_record.failed() {
            return shutdown_record;
        }
    }

    if let Err(err) = admin.remove(&vm) {
        return StatusRecord::failure(err.to_string());
    }

    match admin.resolve(name) {
        Err(err) if err.is_not_found() => {
            let mut record = StatusRecord::note(format!("VM '{name}' has been removed"));
            record.changed = true;
            record
        }
        _ => StatusRecord::failure(format!("VM '{name}' was not removed")),
    }
}

/// Ensure the VM is absent, removing it when present.
pub fn absent(admin: &mut dyn VmAdmin, ctx: &RunContext, name: &str) -> StatusRecord {
    if admin.resolve(name).is_err() {
        return StatusRecord::skip(format!(
            "The VM with the name '{name}' is already missing."
        ));
    }
    remove(admin, ctx, name)
}

/// Clone `source` into a new VM `name`. Skips when the clone target
/// already exists; optionally shuts the source down first.
pub fn clone(
    admin: &mut dyn VmAdmin,
    ctx: &RunContext,
    name: &str,
    source: &str,
    shutdown_source: bool,
) -> StatusRecord {
    if admin.resolve(name).is_ok() {
        return StatusRecord::skip(format!("A VM with the name '{name}' already exists."));
    }

    let source_vm = match resolve_vm(admin, source) {
        Ok(vm) => vm,
        Err(record) => return record,
    };

    if !ctx.test_mode
        && shutdown_source
        && !matches!(admin.power_state(&source_vm), Ok(PowerState::Halted))
    {
        let shutdown_record = power::shutdown(
            admin,
            ctx,
            source,
            ShutdownOptions {
                wait: true,
                force: true,
                kill: false,
            },
        );
        if shutdown_record.failed() {
            return shutdown_record;
        }
    }

    if ctx.test_mode {
        let mut record = StatusRecord::note("VM is set to be cloned");
        record.changed = true;
        return record.finalize(true);
    }

    if let Err(err) = admin.clone_vm(&source_vm, name) {
        return StatusRecord::failure(err.to_string());
    }

    match admin.resolve(name) {
        Ok(_) => {
            let mut record =
                StatusRecord::note(format!("VM '{source}' has been cloned to '{name}'"));
            record.changed = true;
            record
        }
        Err(_) => StatusRecord::failure(format!("VM '{source}' was not cloned to '{name}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::VM_MISSING;
    use crate::admin::mock::{MockAdmin, MockVm};
    use reconcile::Outcome;

    fn opts() -> CreateOptions {
        CreateOptions {
            template: Some("fedora-39".into()),
            label: Some("red".into()),
            ..CreateOptions::default()
        }
    }

    #[test]
    fn test_present_missing_vm_creates() {
        let mut admin = MockAdmin::new();
        let ctx = RunContext::new(false);
        let record = present(&mut admin, &ctx, "work", &opts());
        assert!(!record.failed());
        assert!(record.changed);
        assert!(admin.vms.contains_key("work"));
    }

    #[test]
    fn test_present_existing_vm_skips() {
        let mut admin = MockAdmin::new().with_vm("work", MockVm::default());
        let ctx = RunContext::new(false);
        let record = present(&mut admin, &ctx, "work", &opts());
        assert_eq!(
            record.message,
            "[SKIP] A VM with the name 'work' already exists."
        );
        assert!(!record.changed);
        assert!(admin.mutations.is_empty());
    }

    #[test]
    fn test_present_missing_vm_in_test_mode_issues_no_create() {
        let mut admin = MockAdmin::new();
        let ctx = RunContext::new(true);
        let record = present(&mut admin, &ctx, "work", &opts());
        assert_eq!(record.outcome, Outcome::Unknown);
        assert_eq!(record.message, "VM is set to be created");
        assert!(admin.mutations.is_empty());
        assert!(!admin.vms.contains_key("work"));
    }

    #[test]
    fn test_create_existing_vm_fails() {
        let mut admin = MockAdmin::new().with_vm("work", MockVm::default());
        let ctx = RunContext::new(false);
        assert!(create(&mut admin, &ctx, "work", &opts()).failed());
    }

    #[test]
    fn test_absent_missing_vm_skips() {
        let mut admin = MockAdmin::new();
        let ctx = RunContext::new(false);
        let record = absent(&mut admin, &ctx, "ghost");
        assert_eq!(
            record.message,
            "[SKIP] The VM with the name 'ghost' is already missing."
        );
    }

    #[test]
    fn test_absent_running_vm_halts_then_removes() {
        let mut admin =
            MockAdmin::new().with_vm("work", MockVm::default().with_power(PowerState::Running));
        let ctx = RunContext::new(false);
        let record = absent(&mut admin, &ctx, "work");
        assert!(!record.failed());
        assert!(!admin.vms.contains_key("work"));
        assert!(admin.mutations.iter().any(|m| m.starts_with("shutdown")));
    }

    #[test]
    fn test_remove_missing_vm_fails() {
        let mut admin = MockAdmin::new();
        let ctx = RunContext::new(false);
        let record = remove(&mut admin, &ctx, "ghost");
        assert!(record.failed());
        assert_eq!(record.message, VM_MISSING);
    }

    #[test]
    fn test_clone_creates_target() {
        let mut admin = MockAdmin::new().with_vm("template-x", MockVm::default());
        let ctx = RunContext::new(false);
        let record = clone(&mut admin, &ctx, "work", "template-x", false);
        assert!(!record.failed());
        assert!(admin.vms.contains_key("work"));
    }

    #[test]
    fn test_clone_existing_target_skips() {
        let mut admin = MockAdmin::new()
            .with_vm("template-x", MockVm::default())
            .with_vm("work", MockVm::default());
        let ctx = RunContext::new(false);
        let record = clone(&mut admin, &ctx, "work", "template-x", false);
        assert!(record.message.starts_with("[SKIP] "));
        assert!(admin.mutations.is_empty());
    }

    #[test]
    fn test_clone_missing_source_fails() {
        let mut admin = MockAdmin::new();
        let ctx = RunContext::new(false);
        assert!(clone(&mut admin, &ctx, "work", "ghost", false).failed());
    }

    #[test]
    fn test_remove_is_idempotent_via_absent() {
        let mut admin = MockAdmin::new().with_vm("work", MockVm::default());
        let ctx = RunContext::new(false);
        let first = absent(&mut admin, &ctx, "work");
        assert!(first.changed);
        let second = absent(&mut admin, &ctx, "work");
        assert!(!second.changed);
        assert!(second.message.starts_with("[SKIP] "));
    }
}
