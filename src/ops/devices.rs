//! VM device attachment reconciliation.
//!
//! Attach requests are satisfied when the device is already assigned with
//! equal options; differing options detach and re-attach. Each device is
//! reconciled in isolation - one failing device never aborts the batch.

use super::resolve_vm;
use crate::admin::{DeviceAssignment, VmAdmin};
use reconcile::{RunContext, StatusBuffer, StatusRecord};
use serde_json::Value;

/// Desired device assignments. With both lists empty (or `list` set) the
/// current assignments are reported instead.
#[derive(Debug, Clone, Default)]
pub struct DevicesRequest {
    pub attach: Vec<DeviceAssignment>,
    /// Devices to detach; options are ignored for matching.
    pub detach: Vec<DeviceAssignment>,
    pub list: bool,
}

impl DevicesRequest {
    fn is_list_only(&self) -> bool {
        self.list || (self.attach.is_empty() && self.detach.is_empty())
    }
}

fn attached_summary(device: &DeviceAssignment) -> String {
    format!("[ATTACHED] {}", device.options_summary())
}

pub fn devices(
    admin: &mut dyn VmAdmin,
    ctx: &RunContext,
    name: &str,
    req: &DevicesRequest,
) -> StatusRecord {
    let vm = match resolve_vm(admin, name) {
        Ok(vm) => vm,
        Err(record) => return record,
    };

    let current = match admin.devices(&vm) {
        Ok(devices) => devices,
        Err(err) => return StatusRecord::failure(err.to_string()),
    };

    let mut buffer = StatusBuffer::new();

    if req.is_list_only() {
        for device in &current {
            buffer.push(StatusRecord::prefixed(
                "[ATTACHED] ",
                format!("{} {}", device.key(), device.options_summary()),
            ));
        }
        return buffer.collapse(ctx);
    }

    for device in &req.attach {
        let existing = current.iter().find(|d| d.same_device(device));
        match existing {
            Some(assigned) if assigned.options == device.options => {
                buffer.push(StatusRecord::skip(format!(
                    "Device already attached: {} {}",
                    device.key(),
                    device.options_summary()
                )));
            }
            Some(assigned) => {
                // Detach and attach again to adjust options.
                if !ctx.test_mode {
                    if let Err(err) = admin
                        .detach(&vm, assigned)
                        .and_then(|()| admin.attach(&vm, device))
                    {
                        buffer.push(StatusRecord::failure(format!(
                            "{}: {err}",
                            device.key()
                        )));
                        continue;
                    }
                }
                buffer.push(StatusRecord::success().with_change(
                    device.key(),
                    Value::from(attached_summary(assigned)),
                    Value::from(attached_summary(device)),
                ));
            }
            None => {
                if !ctx.test_mode {
                    match admin.attach(&vm, device) {
                        Ok(()) => {}
                        // Already attached counts as satisfied.
                        Err(err) if err.is_conflict() => {
                            buffer.push(StatusRecord::skip(format!(
                                "Device already attached: {} {}",
                                device.key(),
                                device.options_summary()
                            )));
                            continue;
                        }
                        Err(err) => {
                            buffer.push(StatusRecord::failure(format!(
                                "{}: {err}",
                                device.key()
                            )));
                            continue;
                        }
                    }
                }
                buffer.push(StatusRecord::success().with_change(
                    device.key(),
                    Value::Null,
                    Value::from(attached_summary(device)),
                ));
            }
        }
    }

    for device in &req.detach {
        let existing = current.iter().find(|d| d.same_device(device));
        match existing {
            None => {
                buffer.push(StatusRecord::skip(format!(
                    "Device not attached: {}",
                    device.key()
                )));
            }
            Some(assigned) => {
                if !ctx.test_mode {
                    if let Err(err) = admin.detach(&vm, assigned) {
                        buffer.push(StatusRecord::failure(format!(
                            "{}: {err}",
                            device.key()
                        )));
                        continue;
                    }
                }
                buffer.push(StatusRecord::success().with_change(
                    device.key(),
                    Value::from("[ATTACHED]"),
                    Value::from("[DETACHED]"),
                ));
            }
        }
    }

    buffer.collapse(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::mock::{MockAdmin, MockVm};
    use reconcile::Outcome;
    use serde_json::json;

    fn pci(ident: &str) -> DeviceAssignment {
        DeviceAssignment::new("pci", "dom0", ident)
    }

    fn attach_req(devices: Vec<DeviceAssignment>) -> DevicesRequest {
        DevicesRequest {
            attach: devices,
            ..DevicesRequest::default()
        }
    }

    #[test]
    fn test_attach_new_device() {
        let mut admin = MockAdmin::new().with_vm("work", MockVm::default());
        let ctx = RunContext::new(false);
        let record = devices(&mut admin, &ctx, "work", &attach_req(vec![pci("01_00.0")]));
        assert!(record.changed);
        assert_eq!(record.changes["pci:dom0:01_00.0"].old, json!(null));
        assert_eq!(admin.vm("work").devices.len(), 1);
    }

    #[test]
    fn test_attach_already_attached_with_same_options_skips() {
        let mut admin =
            MockAdmin::new().with_vm("work", MockVm::default().with_device(pci("01_00.0")));
        let ctx = RunContext::new(false);
        let record = devices(&mut admin, &ctx, "work", &attach_req(vec![pci("01_00.0")]));
        assert!(!record.changed);
        assert_eq!(
            record.message,
            "[SKIP] Device already attached: pci:dom0:01_00.0 ()"
        );
        assert!(admin.mutations.is_empty());
    }

    #[test]
    fn test_attach_with_differing_options_reattaches() {
        let mut admin =
            MockAdmin::new().with_vm("work", MockVm::default().with_device(pci("01_00.0")));
        let ctx = RunContext::new(false);
        let wanted = pci("01_00.0").with_option("no-strict-reset", "true");
        let record = devices(&mut admin, &ctx, "work", &attach_req(vec![wanted]));
        assert!(record.changed);
        assert_eq!(
            record.changes["pci:dom0:01_00.0"].new,
            json!("[ATTACHED] (no-strict-reset=true)")
        );
        assert_eq!(
            admin.vm("work").devices[0].options["no-strict-reset"],
            "true"
        );
    }

    #[test]
    fn test_failing_device_does_not_abort_batch() {
        // "ghost" backend device detach+attach fails in the mock only if
        // missing; simulate failure by detaching a device that is not
        // attached through the admin error path.
        let mut admin = MockAdmin::new().with_vm(
            "work",
            MockVm::default().with_device(pci("01_00.0")),
        );
        let ctx = RunContext::new(false);
        let req = DevicesRequest {
            attach: vec![pci("02_00.0")],
            detach: vec![pci("01_00.0"), pci("09_00.0")],
            list: false,
        };
        let record = devices(&mut admin, &ctx, "work", &req);
        // Detaching the unattached device skips; the rest applied.
        assert!(!record.failed());
        assert!(record.message.contains("Device not attached: pci:dom0:09_00.0"));
        assert_eq!(record.changes["pci:dom0:02_00.0"].new, json!("[ATTACHED] ()"));
        assert_eq!(record.changes["pci:dom0:01_00.0"].new, json!("[DETACHED]"));
    }

    #[test]
    fn test_dry_run_reports_intended_attachment_without_mutation() {
        let mut admin = MockAdmin::new().with_vm("work", MockVm::default());
        let ctx = RunContext::new(true);
        let record = devices(&mut admin, &ctx, "work", &attach_req(vec![pci("01_00.0")]));
        assert_eq!(record.outcome, Outcome::Unknown);
        assert!(record.changes.contains_key("pci:dom0:01_00.0"));
        assert!(admin.mutations.is_empty());
        assert!(admin.vm("work").devices.is_empty());
    }

    #[test]
    fn test_list_mode_reports_assignments() {
        let mut admin = MockAdmin::new().with_vm(
            "work",
            MockVm::default().with_device(
                DeviceAssignment::new("bridge", "sys-net", "br0").with_option("ip", "192.168.0.1"),
            ),
        );
        let ctx = RunContext::new(false);
        let record = devices(&mut admin, &ctx, "work", &DevicesRequest::default());
        assert_eq!(
            record.message,
            "[ATTACHED] bridge:sys-net:br0 (ip=192.168.0.1)"
        );
    }
}
