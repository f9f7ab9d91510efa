//! VM service reconciliation.
//!
//! Services are stored as `service.<name>` feature entries: `"1"` enabled,
//! `""` disabled, absent means the VM's own default applies.

use super::{dedup_across, resolve_vm};
use crate::admin::VmAdmin;
use indexmap::IndexMap;
use reconcile::{RunContext, StatusBuffer, StatusRecord};
use serde_json::Value;

const SERVICE_PREFIX: &str = "service.";

/// Desired service toggles. With all lists empty (or `list` set) the
/// current services are reported instead.
#[derive(Debug, Clone, Default)]
pub struct ServiceRequest {
    pub enable: Vec<String>,
    pub disable: Vec<String>,
    pub default: Vec<String>,
    pub list: bool,
}

impl ServiceRequest {
    fn is_list_only(&self) -> bool {
        self.list || (self.enable.is_empty() && self.disable.is_empty() && self.default.is_empty())
    }
}

/// Human label for a raw service value.
fn label(value: Option<&str>) -> String {
    match value {
        Some("1") => "Enabled".to_string(),
        Some("") => "Disabled".to_string(),
        None => "Missing".to_string(),
        Some(other) => other.to_string(),
    }
}

pub fn service(
    admin: &mut dyn VmAdmin,
    ctx: &RunContext,
    name: &str,
    req: &ServiceRequest,
) -> StatusRecord {
    let vm = match resolve_vm(admin, name) {
        Ok(vm) => vm,
        Err(record) => return record,
    };

    let current: IndexMap<String, String> = match admin.features(&vm) {
        Ok(features) => features
            .into_iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(SERVICE_PREFIX)
                    .map(|service| (service.to_string(), value))
            })
            .collect(),
        Err(err) => return StatusRecord::failure(err.to_string()),
    };

    let mut buffer = StatusBuffer::new();

    if req.is_list_only() {
        for (service_name, value) in &current {
            let prefix = if value.is_empty() {
                "[DISABLED] "
            } else {
                "[ENABLED]  "
            };
            buffer.push(StatusRecord::prefixed(prefix, service_name));
        }
        return buffer.collapse(ctx);
    }

    // Remove duplicate service names, keeping the order listed.
    let mut default = req.default.clone();
    let mut disable = req.disable.clone();
    let mut enable = req.enable.clone();
    dedup_across(&mut [&mut default, &mut disable, &mut enable]);

    let toggles: [(&str, &[String], Option<&str>); 3] = [
        ("ENABLE", &enable, Some("1")),
        ("DISABLE", &disable, Some("")),
        ("DEFAULT", &default, None),
    ];

    for (action, service_names, value_new) in toggles {
        for service_name in service_names {
            let value_current = current.get(service_name).map(String::as_str);

            // Value matches; no need to update.
            if value_current == value_new {
                buffer.push(StatusRecord::skip(format!(
                    "Service already in desired state: {action} '{service_name}' = {}",
                    label(value_current)
                )));
                continue;
            }

            if !ctx.test_mode {
                let feature = format!("{SERVICE_PREFIX}{service_name}");
                if let Err(err) = admin.set_feature(&vm, &feature, value_new) {
                    buffer.push(StatusRecord::failure(format!("{service_name}: {err}")));
                    continue;
                }
            }
            buffer.push(StatusRecord::success().with_change(
                service_name.clone(),
                Value::from(label(value_current)),
                Value::from(label(value_new)),
            ));
        }
    }

    buffer.collapse(ctx)
}
