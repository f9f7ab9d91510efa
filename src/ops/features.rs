//! VM feature reconciliation.
//!
//! Same shape as services but over raw feature entries: enable writes
//! `"1"`, disable writes `""`, default removes the entry, and `set`
//! writes an arbitrary value. Change entries carry the raw values.

use super::{dedup_across, resolve_vm};
use crate::admin::VmAdmin;
use indexmap::IndexMap;
use reconcile::{RunContext, StatusBuffer, StatusRecord};
use serde_json::Value;

/// Desired feature state. With everything empty (or `list` set) the
/// current features are reported instead.
#[derive(Debug, Clone, Default)]
pub struct FeatureRequest {
    pub enable: Vec<String>,
    pub disable: Vec<String>,
    pub default: Vec<String>,
    /// Arbitrary feature values, applied after the toggles.
    pub set: IndexMap<String, String>,
    pub list: bool,
}

impl FeatureRequest {
    fn is_list_only(&self) -> bool {
        self.list
            || (self.enable.is_empty()
                && self.disable.is_empty()
                && self.default.is_empty()
                && self.set.is_empty())
    }
}

fn label(value: Option<&str>) -> String {
    match value {
        Some("1") => "Enabled".to_string(),
        Some("") => "Disabled".to_string(),
        None => "Missing".to_string(),
        Some(other) => other.to_string(),
    }
}

fn json_value(value: Option<&str>) -> Value {
    match value {
        Some(value) => Value::from(value),
        None => Value::Null,
    }
}

pub fn features(
    admin: &mut dyn VmAdmin,
    ctx: &RunContext,
    name: &str,
    req: &FeatureRequest,
) -> StatusRecord {
    let vm = match resolve_vm(admin, name) {
        Ok(vm) => vm,
        Err(record) => return record,
    };

    let current = match admin.features(&vm) {
        Ok(features) => features,
        Err(err) => return StatusRecord::failure(err.to_string()),
    };

    let mut buffer = StatusBuffer::new();

    if req.is_list_only() {
        for (feature_name, value) in &current {
            if value == "1" {
                buffer.push(StatusRecord::prefixed("[ENABLED]  ", feature_name));
            } else if value.is_empty() {
                buffer.push(StatusRecord::prefixed("[DISABLED] ", feature_name));
            } else {
                buffer.push(StatusRecord::prefixed(
                    "[SET]      ",
                    format!("{feature_name}: {value}"),
                ));
            }
        }
        return buffer.collapse(ctx);
    }

    let mut default = req.default.clone();
    let mut disable = req.disable.clone();
    let mut enable = req.enable.clone();
    dedup_across(&mut [&mut default, &mut disable, &mut enable]);

    let mut updates: Vec<(&str, String, Option<String>)> = Vec::new();
    for feature in &enable {
        updates.push(("ENABLE", feature.clone(), Some("1".to_string())));
    }
    for feature in &disable {
        updates.push(("DISABLE", feature.clone(), Some(String::new())));
    }
    for feature in &default {
        updates.push(("DEFAULT", feature.clone(), None));
    }
    for (feature, value) in &req.set {
        updates.push(("SET", feature.clone(), Some(value.clone())));
    }

    for (action, feature_name, value_new) in updates {
        let value_current = current.get(&feature_name).map(String::as_str);

        // Value matches; no need to update.
        if value_current == value_new.as_deref() {
            buffer.push(StatusRecord::skip(format!(
                "Feature already in desired state: {action} '{feature_name}' = {}",
                label(value_current)
            )));
            continue;
        }

        if !ctx.test_mode {
            if let Err(err) = admin.set_feature(&vm, &feature_name, value_new.as_deref()) {
                buffer.push(StatusRecord::failure(format!("{feature_name}: {err}")));
                continue;
            }
        }
        buffer.push(StatusRecord::success().with_change(
            feature_name,
            json_value(value_current),
            json_value(value_new.as_deref()),
        ));
    }

    buffer.collapse(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::mock::{MockAdmin, MockVm};
    use serde_json::json;

    fn admin_with_features() -> MockAdmin {
        MockAdmin::new().with_vm(
            "work",
            MockVm::default()
                .with_feature("gui", "1")
                .with_feature("qrexec", "")
                .with_feature("os", "Linux"),
        )
    }

    #[test]
    fn test_enable_already_enabled_skips() {
        let mut admin = admin_with_features();
        let ctx = RunContext::new(false);
        let req = FeatureRequest {
            enable: vec!["gui".to_string()],
            ..FeatureRequest::default()
        };
        let record = features(&mut admin, &ctx, "work", &req);
        assert_eq!(
            record.message,
            "[SKIP] Feature already in desired state: ENABLE 'gui' = Enabled"
        );
        assert!(admin.mutations.is_empty());
    }

    #[test]
    fn test_set_arbitrary_value_records_raw_change() {
        let mut admin = admin_with_features();
        let ctx = RunContext::new(false);
        let req = FeatureRequest {
            set: IndexMap::from([("os".to_string(), "Windows".to_string())]),
            ..FeatureRequest::default()
        };
        let record = features(&mut admin, &ctx, "work", &req);
        assert!(record.changed);
        assert_eq!(record.changes["os"].old, json!("Linux"));
        assert_eq!(record.changes["os"].new, json!("Windows"));
        assert_eq!(admin.vm("work").features["os"], "Windows");
    }

    #[test]
    fn test_default_removes_entry_with_null_new_value() {
        let mut admin = admin_with_features();
        let ctx = RunContext::new(false);
        let req = FeatureRequest {
            default: vec!["gui".to_string()],
            ..FeatureRequest::default()
        };
        let record = features(&mut admin, &ctx, "work", &req);
        assert_eq!(record.changes["gui"].old, json!("1"));
        assert_eq!(record.changes["gui"].new, json!(null));
        assert!(!admin.vm("work").features.contains_key("gui"));
    }

    #[test]
    fn test_list_mode_prefixes() {
        let mut admin = admin_with_features();
        let ctx = RunContext::new(false);
        let record = features(&mut admin, &ctx, "work", &FeatureRequest::default());
        assert_eq!(
            record.message,
            "[ENABLED]  gui\n[DISABLED] qrexec\n[SET]      os: Linux"
        );
    }

    #[test]
    fn test_second_run_skips() {
        let mut admin = admin_with_features();
        let ctx = RunContext::new(false);
        let req = FeatureRequest {
            disable: vec!["gui".to_string()],
            ..FeatureRequest::default()
        };
        assert!(features(&mut admin, &ctx, "work", &req).changed);
        let second = features(&mut admin, &ctx, "work", &req);
        assert!(!second.changed);
        assert!(second.message.starts_with("[SKIP] "));
    }
}
