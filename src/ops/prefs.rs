//! VM preference reconciliation.
//!
//! Preferences dispatch through a typed registry of descriptors covering
//! the admin-visible property set. Unknown keys fail per-key without
//! aborting the rest of the batch; an empty request lists everything.

use super::resolve_vm;
use crate::admin::{DeviceAssignment, VmAdmin, VmHandle};
use indexmap::IndexMap;
use reconcile::{
    DesiredValue, PropertyAction, PropertyDescriptor, PropertyKind, PropertyRegistry,
    PropertyValue, ReconcileError, RunContext, StatusBuffer, StatusRecord, fmt_line,
    reconcile_property,
};
use std::sync::LazyLock;

const LABEL_CHOICES: &[&str] = &[
    "red", "yellow", "green", "blue", "purple", "orange", "gray", "black",
];

const VIRT_MODE_CHOICES: &[&str] = &["pv", "pvh", "hvm"];

/// PCI strict-reset rides along as a device attach option rather than a
/// real VM property.
const NO_STRICT_RESET: &str = "no-strict-reset";

static REGISTRY: LazyLock<PropertyRegistry> = LazyLock::new(|| {
    PropertyRegistry::new([
        PropertyDescriptor::new("autostart", PropertyKind::Bool)
            .with_default(PropertyValue::Bool(false)),
        PropertyDescriptor::new("debug", PropertyKind::Bool)
            .with_default(PropertyValue::Bool(false)),
        PropertyDescriptor::new("default_user", PropertyKind::Str),
        PropertyDescriptor::new("default_dispvm", PropertyKind::OptionalRef),
        PropertyDescriptor::new("management_dispvm", PropertyKind::OptionalRef),
        PropertyDescriptor::new("guivm", PropertyKind::OptionalRef),
        PropertyDescriptor::new("audiovm", PropertyKind::OptionalRef),
        PropertyDescriptor::new("template_for_dispvms", PropertyKind::Bool),
        PropertyDescriptor::new("virt_mode", PropertyKind::Choice(VIRT_MODE_CHOICES)),
        PropertyDescriptor::new("label", PropertyKind::Choice(LABEL_CHOICES)),
        PropertyDescriptor::new("last_backup", PropertyKind::Str),
        PropertyDescriptor::new("include_in_backups", PropertyKind::Bool),
        PropertyDescriptor::new("installed_by_rpm", PropertyKind::Bool),
        PropertyDescriptor::new("ip", PropertyKind::Str),
        PropertyDescriptor::new("kernel", PropertyKind::Str),
        PropertyDescriptor::new("kernelopts", PropertyKind::Str),
        PropertyDescriptor::new("mac", PropertyKind::Str),
        PropertyDescriptor::new("maxmem", PropertyKind::Int),
        PropertyDescriptor::new("memory", PropertyKind::Int),
        PropertyDescriptor::new("netvm", PropertyKind::OptionalRef),
        // Strict reset is enforced unless explicitly disabled, and only
        // settable together with pcidevs.
        PropertyDescriptor::new("pci_strictreset", PropertyKind::Bool)
            .with_default(PropertyValue::Bool(true)),
        PropertyDescriptor::new("pcidevs", PropertyKind::List)
            .with_default(PropertyValue::List(Vec::new())),
        PropertyDescriptor::new("provides_network", PropertyKind::Bool)
            .with_default(PropertyValue::Bool(false)),
        PropertyDescriptor::new("template", PropertyKind::Str),
        PropertyDescriptor::new("qrexec_timeout", PropertyKind::Int)
            .with_default(PropertyValue::Int(60)),
        PropertyDescriptor::new("updateable", PropertyKind::Bool),
        PropertyDescriptor::new("vcpus", PropertyKind::Int),
    ])
});

/// The preference property registry.
pub fn registry() -> &'static PropertyRegistry {
    &REGISTRY
}

/// Desired preference entries. An empty request lists all properties.
#[derive(Debug, Clone, Default)]
pub struct PrefsRequest {
    pub entries: IndexMap<String, DesiredValue>,
}

impl PrefsRequest {
    pub fn list() -> Self {
        Self::default()
    }

    /// A get-style request over the named keys.
    pub fn get<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: keys
                .into_iter()
                .map(|key| (key.into(), DesiredValue::Query))
                .collect(),
        }
    }

    pub fn set(entries: IndexMap<String, DesiredValue>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Property keys are stored with underscores, not hyphens.
fn normalize_key(key: &str) -> String {
    key.replace('-', "_")
}

pub fn prefs(
    admin: &mut dyn VmAdmin,
    ctx: &RunContext,
    name: &str,
    req: &PrefsRequest,
) -> StatusRecord {
    let vm = match resolve_vm(admin, name) {
        Ok(vm) => vm,
        Err(record) => return record,
    };

    // An empty request reports every registered property.
    let entries: IndexMap<String, DesiredValue> = if req.entries.is_empty() {
        registry()
            .names()
            .map(|key| (key.to_string(), DesiredValue::Query))
            .collect()
    } else {
        req.entries
            .iter()
            .map(|(key, desired)| (normalize_key(key), desired.clone()))
            .collect()
    };

    let strictreset = match strictreset_request(&entries) {
        Ok(value) => value,
        Err(record) => return record,
    };
    let pcidevs_requested = matches!(entries.get("pcidevs"), Some(DesiredValue::Set(_)));

    let mut buffer = StatusBuffer::new();
    for (key, desired) in &entries {
        let Some(desc) = registry().get(key) else {
            buffer.push(PropertyRegistry::invalid_key_record(key));
            continue;
        };

        if key == "pci_strictreset" && !matches!(desired, DesiredValue::Query) {
            if !pcidevs_requested {
                buffer.push(StatusRecord::failure(fmt_line(
                    key,
                    "Setting 'pci_strictreset' works only together with 'pcidevs'",
                )));
            }
            // Otherwise handled as part of the pcidevs reconciliation.
            continue;
        }

        if key == "pcidevs" {
            if let DesiredValue::Set(raw) = desired {
                match desc.coerce(raw) {
                    Ok(PropertyValue::List(wanted)) => {
                        reconcile_pcidevs(admin, ctx, &vm, &wanted, strictreset, &mut buffer);
                    }
                    Ok(_) | Err(_) => {
                        buffer.push(StatusRecord::failure(fmt_line(
                            key,
                            "Invalid value! (expected a list of device idents)",
                        )));
                    }
                }
                continue;
            }
        }

        let current = match admin.property(&vm, desc) {
            Ok(current) => current,
            Err(ReconcileError::InvalidKey { key }) => {
                buffer.push(PropertyRegistry::invalid_key_record(&key));
                continue;
            }
            Err(err) if err.is_not_found() => {
                return StatusRecord::failure(crate::admin::VM_MISSING);
            }
            Err(err) => {
                buffer.push(StatusRecord::failure(fmt_line(key, err)));
                continue;
            }
        };

        let (action, mut record) = reconcile_property(desc, &current, desired);
        if !ctx.test_mode {
            let applied = match &action {
                PropertyAction::Set(value) => admin.set_property(&vm, desc.name, value),
                PropertyAction::Clear => admin.reset_property(&vm, desc.name),
                PropertyAction::Report | PropertyAction::Skip => Ok(()),
            };
            if let Err(err) = applied {
                record = StatusRecord::failure(fmt_line(desc.name, err));
            }
        }
        buffer.push(record);
    }

    buffer.collapse(ctx)
}

/// Extract and coerce a requested `pci_strictreset` value, if any.
fn strictreset_request(
    entries: &IndexMap<String, DesiredValue>,
) -> Result<Option<bool>, StatusRecord> {
    let Some(DesiredValue::Set(raw)) = entries.get("pci_strictreset") else {
        return Ok(None);
    };
    let Some(desc) = registry().get("pci_strictreset") else {
        return Ok(None);
    };
    match desc.coerce(raw) {
        Ok(PropertyValue::Bool(value)) => Ok(Some(value)),
        _ => Err(StatusRecord::failure(fmt_line(
            "pci_strictreset",
            "Invalid value! (expected a boolean)",
        ))),
    }
}

/// Device idents display with colons but are stored with underscores.
fn display_ident(api_ident: &str) -> String {
    api_ident.replace('_', ":")
}

fn api_ident(display: &str) -> String {
    display.trim().replace(':', "_")
}

/// Reconcile the PCI device list. Attachment is additive: requested
/// devices are attached (re-attached when their strict-reset option
/// differs), devices outside the request are left alone.
fn reconcile_pcidevs(
    admin: &mut dyn VmAdmin,
    ctx: &RunContext,
    vm: &VmHandle,
    wanted: &[String],
    strictreset: Option<bool>,
    buffer: &mut StatusBuffer,
) {
    let attached = match admin.devices(vm) {
        Ok(devices) => devices,
        Err(err) => {
            buffer.push(StatusRecord::failure(fmt_line("pcidevs", err)));
            return;
        }
    };
    let attached: Vec<DeviceAssignment> = attached
        .into_iter()
        .filter(|device| device.class == "pci")
        .collect();
    let current: Vec<String> = attached
        .iter()
        .map(|device| display_ident(&device.ident))
        .collect();

    let want_no_strict = strictreset.map(|strict| !strict);
    let mut combined = current.clone();
    let mut changed = false;

    for dev_id in wanted {
        let ident = api_ident(dev_id);
        let existing = attached.iter().find(|device| device.ident == ident);

        match existing {
            Some(device) => {
                let has_no_strict = device
                    .options
                    .get(NO_STRICT_RESET)
                    .is_some_and(|value| value.eq_ignore_ascii_case("true"));
                let Some(want) = want_no_strict else {
                    continue;
                };
                if has_no_strict == want {
                    continue;
                }
                // Detach and attach again to adjust options.
                changed = true;
                if ctx.test_mode {
                    continue;
                }
                let replacement = DeviceAssignment::new("pci", &device.backend, &ident)
                    .with_option(NO_STRICT_RESET, if want { "true" } else { "false" });
                if let Err(err) = admin
                    .detach(vm, device)
                    .and_then(|()| admin.attach(vm, &replacement))
                {
                    buffer.push(StatusRecord::failure(fmt_line("pcidevs", err)));
                }
            }
            None => {
                changed = true;
                if ctx.test_mode {
                    combined.push(display_ident(&ident));
                    continue;
                }
                let mut assignment = DeviceAssignment::new("pci", "dom0", &ident);
                if let Some(want) = want_no_strict {
                    assignment =
                        assignment.with_option(NO_STRICT_RESET, if want { "true" } else { "false" });
                }
                match admin.attach(vm, &assignment) {
                    Ok(()) => combined.push(display_ident(&ident)),
                    // Raced into the desired state; counted as satisfied.
                    Err(err) if err.is_conflict() => combined.push(display_ident(&ident)),
                    Err(err) => {
                        buffer.push(StatusRecord::failure(fmt_line("pcidevs", err)));
                    }
                }
            }
        }
    }

    if changed {
        buffer.push(StatusRecord::success().with_change(
            "pcidevs",
            serde_json::Value::from(current),
            serde_json::Value::from(combined),
        ));
    } else {
        buffer.push(StatusRecord::skip(fmt_line("pcidevs", current.join(", "))));
    }
}
