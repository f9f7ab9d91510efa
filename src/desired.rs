//! Desired-state documents.
//!
//! A document declares, per VM, the actions to reconcile and their
//! arguments, in YAML:
//!
//! ```yaml
//! vms:
//!   work:
//!     actions:
//!       - present
//!       - prefs
//!       - run: pass
//!     present:
//!       template: fedora-39
//!       label: red
//!     prefs:
//!       memory: 400
//!       netvm: sys-firewall
//!     service:
//!       enable: [network-manager]
//!     tags:
//!       add: [work]
//! ```
//!
//! Values stay loosely typed here; the property registry normalizes them
//! during reconciliation. Unknown action keywords are kept and rejected
//! at reconcile time so the failure lands in the report, not in parsing.

use crate::admin::{CreateOptions, DeviceAssignment, ShutdownOptions};
use crate::ops::devices::DevicesRequest;
use crate::ops::features::FeatureRequest;
use crate::ops::firewall::FirewallRequest;
use crate::ops::prefs::PrefsRequest;
use crate::ops::run::RunRequest;
use crate::ops::service::ServiceRequest;
use crate::ops::tags::TagsRequest;
use crate::ops::vm::{ActionRequest, CloneSpec, VmRequest};
use anyhow::{Context, Result, bail};
use indexmap::IndexMap;
use reconcile::{DesiredValue, FailurePolicy, Step};
use serde::Deserialize;
use std::path::Path;

/// Marker accepted as a desired property value meaning "revert to the
/// platform default".
const DEFAULT_MARKER: &str = "*default*";

/// A parsed desired-state document.
#[derive(Debug, Default)]
pub struct StateDocument {
    pub vms: IndexMap<String, VmRequest>,
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default)]
    vms: IndexMap<String, IndexMap<String, serde_yaml::Value>>,
}

pub fn load(path: &Path) -> Result<StateDocument> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read state file {}", path.display()))?;
    parse(&content).with_context(|| format!("invalid state file {}", path.display()))
}

pub fn parse(content: &str) -> Result<StateDocument> {
    let raw: RawDocument = serde_yaml::from_str(content).context("malformed YAML")?;
    let mut document = StateDocument::default();
    for (vm_name, entry) in raw.vms {
        let request = parse_vm_entry(&entry)
            .with_context(|| format!("invalid declaration for VM '{vm_name}'"))?;
        document.vms.insert(vm_name, request);
    }
    Ok(document)
}

fn parse_vm_entry(entry: &IndexMap<String, serde_yaml::Value>) -> Result<VmRequest> {
    let mut request = VmRequest::default();

    for (key, value) in entry {
        if key == "actions" {
            request.order = Some(parse_order(value)?);
            continue;
        }
        let action = parse_action(key, value)?;
        request.actions.insert(key.clone(), action);
    }

    Ok(request)
}

/// Parse the optional explicit ordering. Entries are either a plain
/// action name or a single-key map declaring tolerance, e.g. `run: pass`.
fn parse_order(value: &serde_yaml::Value) -> Result<Vec<Step>> {
    let serde_yaml::Value::Sequence(items) = value else {
        bail!("'actions' must be a list");
    };

    let mut order = Vec::with_capacity(items.len());
    for item in items {
        match item {
            serde_yaml::Value::String(name) => order.push(Step::required(name)),
            serde_yaml::Value::Mapping(map) if map.len() == 1 => {
                let Some((name, tolerance)) = map.iter().next() else {
                    continue;
                };
                let serde_yaml::Value::String(name) = name else {
                    bail!("action names must be strings");
                };
                let tolerated = matches!(
                    tolerance,
                    serde_yaml::Value::String(s) if s.to_ascii_lowercase().contains("pass")
                );
                order.push(Step {
                    name: name.clone(),
                    policy: if tolerated {
                        FailurePolicy::Pass
                    } else {
                        FailurePolicy::Fail
                    },
                });
            }
            other => bail!("unsupported 'actions' entry: {other:?}"),
        }
    }
    Ok(order)
}

fn parse_action(name: &str, value: &serde_yaml::Value) -> Result<ActionRequest> {
    let action = match name {
        "exists" => ActionRequest::Exists,
        "missing" => ActionRequest::Missing,
        "running" => ActionRequest::Running,
        "halted" => ActionRequest::Halted,
        "absent" => ActionRequest::Absent,
        "unpause" => ActionRequest::Unpause,
        "pause" => ActionRequest::Pause,
        "kill" => ActionRequest::Kill,
        "start" => ActionRequest::Start,
        "present" => ActionRequest::Present(parse_create(value)?),
        "clone" => ActionRequest::Clone(parse_clone(value)?),
        "prefs" => ActionRequest::Prefs(parse_prefs(value)?),
        "devices" => ActionRequest::Devices(parse_devices(value)?),
        "service" => ActionRequest::Service(parse_service(value)?),
        "features" => ActionRequest::Features(parse_features(value)?),
        "firewall" => ActionRequest::Firewall(parse_firewall(value)?),
        "tags" => ActionRequest::Tags(parse_tags(value)?),
        "shutdown" => ActionRequest::Shutdown(parse_shutdown(value)?),
        "run" => ActionRequest::Run(parse_run(value)?),
        _ => ActionRequest::Unknown,
    };
    Ok(action)
}

fn mapping(value: &serde_yaml::Value) -> Result<IndexMap<String, serde_yaml::Value>> {
    if value.is_null() {
        return Ok(IndexMap::new());
    }
    serde_yaml::from_value(value.clone()).context("expected a mapping")
}

fn string_list(value: Option<&serde_yaml::Value>) -> Result<Vec<String>> {
    match value {
        None => Ok(Vec::new()),
        Some(serde_yaml::Value::Null) => Ok(Vec::new()),
        Some(value) => serde_yaml::from_value(value.clone()).context("expected a list of strings"),
    }
}

fn parse_create(value: &serde_yaml::Value) -> Result<CreateOptions> {
    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    struct RawCreate {
        class: Option<String>,
        template: Option<String>,
        label: Option<String>,
        memory: Option<i64>,
        vcpus: Option<i64>,
    }

    let raw: RawCreate = if value.is_null() {
        RawCreate::default()
    } else {
        serde_yaml::from_value(value.clone()).context("invalid 'present' options")?
    };
    Ok(CreateOptions {
        class: raw.class,
        template: raw.template,
        label: raw.label,
        memory: raw.memory,
        vcpus: raw.vcpus,
    })
}

fn parse_clone(value: &serde_yaml::Value) -> Result<CloneSpec> {
    #[derive(Debug, Deserialize)]
    struct RawClone {
        source: String,
        #[serde(default)]
        shutdown: bool,
    }

    let raw: RawClone = serde_yaml::from_value(value.clone())
        .context("'clone' requires at least a 'source'")?;
    Ok(CloneSpec {
        source: raw.source,
        shutdown_source: raw.shutdown,
    })
}

fn parse_prefs(value: &serde_yaml::Value) -> Result<PrefsRequest> {
    let mut entries = IndexMap::new();
    for (key, value) in mapping(value).context("invalid 'prefs' mapping")? {
        let desired = match &value {
            serde_yaml::Value::Null => DesiredValue::Query,
            serde_yaml::Value::String(s) if s == DEFAULT_MARKER => DesiredValue::Reset,
            other => DesiredValue::Set(
                serde_json::to_value(other).context("unserializable preference value")?,
            ),
        };
        entries.insert(key, desired);
    }
    Ok(PrefsRequest::set(entries))
}

fn parse_service(value: &serde_yaml::Value) -> Result<ServiceRequest> {
    let map = mapping(value).context("invalid 'service' mapping")?;
    Ok(ServiceRequest {
        enable: string_list(map.get("enable"))?,
        disable: string_list(map.get("disable"))?,
        default: string_list(map.get("default"))?,
        list: map.contains_key("list"),
    })
}

fn parse_features(value: &serde_yaml::Value) -> Result<FeatureRequest> {
    let map = mapping(value).context("invalid 'features' mapping")?;
    let set = match map.get("set") {
        None => IndexMap::new(),
        Some(value) => serde_yaml::from_value(value.clone())
            .context("'features.set' must map names to string values")?,
    };
    Ok(FeatureRequest {
        enable: string_list(map.get("enable"))?,
        disable: string_list(map.get("disable"))?,
        default: string_list(map.get("default"))?,
        set,
        list: map.contains_key("list"),
    })
}

fn parse_tags(value: &serde_yaml::Value) -> Result<TagsRequest> {
    let map = mapping(value).context("invalid 'tags' mapping")?;
    Ok(TagsRequest {
        add: string_list(map.get("add").or_else(|| map.get("present")))?,
        del: string_list(map.get("del").or_else(|| map.get("absent")))?,
        list: map.contains_key("list"),
    })
}

fn parse_firewall(value: &serde_yaml::Value) -> Result<FirewallRequest> {
    let map = mapping(value).context("invalid 'firewall' mapping")?;
    Ok(FirewallRequest {
        set: string_list(map.get("set"))?,
        list: map.contains_key("list"),
    })
}

fn parse_devices(value: &serde_yaml::Value) -> Result<DevicesRequest> {
    let map = mapping(value).context("invalid 'devices' mapping")?;
    Ok(DevicesRequest {
        attach: parse_device_list(map.get("attach"))?,
        detach: parse_device_list(map.get("detach"))?,
        list: map.contains_key("list"),
    })
}

/// Device entries are either a bare `class:backend:ident` spec or a
/// mapping with explicit options:
///
/// ```yaml
/// attach:
///   - pci:dom0:01_00.0
///   - device: bridge:sys-net:br0
///     options:
///       ip: 192.168.0.1
/// ```
fn parse_device_list(value: Option<&serde_yaml::Value>) -> Result<Vec<DeviceAssignment>> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    let serde_yaml::Value::Sequence(items) = value else {
        bail!("device lists must be sequences");
    };

    let mut devices = Vec::with_capacity(items.len());
    for item in items {
        match item {
            serde_yaml::Value::String(spec) => {
                devices.push(DeviceAssignment::parse(spec).map_err(anyhow::Error::msg)?);
            }
            serde_yaml::Value::Mapping(_) => {
                #[derive(Debug, Deserialize)]
                struct RawDevice {
                    device: String,
                    #[serde(default)]
                    options: IndexMap<String, String>,
                }
                let raw: RawDevice =
                    serde_yaml::from_value(item.clone()).context("invalid device entry")?;
                let mut device =
                    DeviceAssignment::parse(&raw.device).map_err(anyhow::Error::msg)?;
                device.options = raw.options;
                devices.push(device);
            }
            other => bail!("unsupported device entry: {other:?}"),
        }
    }
    Ok(devices)
}

fn parse_shutdown(value: &serde_yaml::Value) -> Result<ShutdownOptions> {
    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    struct RawShutdown {
        wait: bool,
        force: bool,
        kill: bool,
    }

    let raw: RawShutdown = if value.is_null() {
        RawShutdown::default()
    } else {
        serde_yaml::from_value(value.clone()).context("invalid 'shutdown' options")?
    };
    Ok(ShutdownOptions {
        wait: raw.wait,
        force: raw.force,
        kill: raw.kill,
    })
}

fn parse_run(value: &serde_yaml::Value) -> Result<RunRequest> {
    #[derive(Debug, Deserialize)]
    struct RawRun {
        cmd: Vec<String>,
        #[serde(default)]
        user: Option<String>,
        #[serde(default)]
        auto: bool,
    }

    let raw: RawRun =
        serde_yaml::from_value(value.clone()).context("'run' requires a 'cmd' list")?;
    Ok(RunRequest {
        cmd: raw.cmd,
        user: raw.user,
        auto_start: raw.auto,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::vm::ActionRequest;

    const DOCUMENT: &str = r#"
vms:
  work:
    actions:
      - present
      - prefs
      - tags
      - run: pass
    present:
      template: fedora-39
      label: red
    prefs:
      memory: 400
      maxmem: "4000"
      kernel: "*default*"
    tags:
      add: [work]
      del: [temp]
    run:
      cmd: [systemctl, status]
  sys-usb:
    devices:
      attach:
        - pci:dom0:01_00.0
        - device: pci:dom0:02_00.0
          options:
            no-strict-reset: "true"
"#;

    #[test]
    fn test_parse_document_structure() {
        let doc = parse(DOCUMENT).unwrap();
        assert_eq!(doc.vms.len(), 2);
        let work = &doc.vms["work"];
        assert_eq!(work.actions.len(), 4);
        assert!(matches!(work.actions["present"], ActionRequest::Present(_)));
    }

    #[test]
    fn test_order_carries_tolerance() {
        let doc = parse(DOCUMENT).unwrap();
        let order = doc.vms["work"].order.as_ref().unwrap();
        assert_eq!(order.len(), 4);
        assert_eq!(order[0], Step::required("present"));
        assert_eq!(order[3], Step::tolerated("run"));
    }

    #[test]
    fn test_prefs_values_stay_loose_and_marker_resets() {
        let doc = parse(DOCUMENT).unwrap();
        let ActionRequest::Prefs(prefs) = &doc.vms["work"].actions["prefs"] else {
            panic!("expected prefs request");
        };
        assert!(matches!(prefs.entries["memory"], DesiredValue::Set(_)));
        // Strings survive parsing; coercion happens at reconcile time.
        assert!(
            matches!(&prefs.entries["maxmem"], DesiredValue::Set(v) if v == &serde_json::json!("4000"))
        );
        assert!(matches!(prefs.entries["kernel"], DesiredValue::Reset));
    }

    #[test]
    fn test_device_entries_with_and_without_options() {
        let doc = parse(DOCUMENT).unwrap();
        let ActionRequest::Devices(devices) = &doc.vms["sys-usb"].actions["devices"] else {
            panic!("expected devices request");
        };
        assert_eq!(devices.attach.len(), 2);
        assert!(devices.attach[0].options.is_empty());
        assert_eq!(devices.attach[1].options["no-strict-reset"], "true");
    }

    #[test]
    fn test_unknown_action_is_preserved_for_reporting() {
        let doc = parse("vms:\n  work:\n    defrag: {}\n").unwrap();
        assert!(matches!(
            doc.vms["work"].actions["defrag"],
            ActionRequest::Unknown
        ));
    }

    #[test]
    fn test_malformed_yaml_is_a_parse_error() {
        assert!(parse("vms: [not a mapping").is_err());
    }

    #[test]
    fn test_load_reads_document_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.yaml");
        std::fs::write(&path, DOCUMENT).unwrap();
        let doc = load(&path).unwrap();
        assert!(doc.vms.contains_key("work"));
    }

    #[test]
    fn test_load_missing_file_reports_path() {
        let err = load(Path::new("/nonexistent/state.yaml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/state.yaml"));
    }
}
