//! Admin interface to the VM store.
//!
//! [`VmAdmin`] is the port every operation talks through: resolve a VM by
//! name, read current state, apply mutations. The production
//! implementation shells out to the `qvm-*` tools; tests substitute an
//! in-memory store.

use indexmap::IndexMap;
use reconcile::{PropertyDescriptor, PropertyState, PropertyValue, ReconcileError};
use std::fmt;

pub mod qvm;

#[cfg(test)]
pub mod mock;

pub use qvm::QvmAdmin;

/// Canonical message for operations against a VM that does not exist.
pub const VM_MISSING: &str = "Virtual Machine does not exist!";

/// A resolved reference to an existing VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmHandle {
    pub name: String,
}

impl VmHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// VM power state as reported by the admin interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Running,
    Halted,
    Paused,
    /// Started but without a GUI agent; usually needs the agent kicked.
    Transient,
}

impl PowerState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Halted => "halted",
            Self::Paused => "paused",
            Self::Transient => "transient",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, ReconcileError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "running" => Ok(Self::Running),
            "halted" => Ok(Self::Halted),
            "paused" => Ok(Self::Paused),
            "transient" => Ok(Self::Transient),
            other => Err(ReconcileError::external(format!(
                "unrecognized power state '{other}'"
            ))),
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A persistent device assignment: `class:backend:ident` plus options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAssignment {
    /// Device class, e.g. `pci`, `block`, `usb`, `mic`.
    pub class: String,
    /// The domain providing the device.
    pub backend: String,
    /// Device ident within the backend.
    pub ident: String,
    pub options: IndexMap<String, String>,
}

impl DeviceAssignment {
    pub fn new(
        class: impl Into<String>,
        backend: impl Into<String>,
        ident: impl Into<String>,
    ) -> Self {
        Self {
            class: class.into(),
            backend: backend.into(),
            ident: ident.into(),
            options: IndexMap::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Parse a `class:backend:ident` spec, e.g. `pci:dom0:01_00.0`.
    pub fn parse(spec: &str) -> Result<Self, ReconcileError> {
        let parts: Vec<&str> = spec.split(':').collect();
        match parts.as_slice() {
            [class, backend, ident] if !class.is_empty() && !backend.is_empty() => {
                Ok(Self::new(*class, *backend, *ident))
            }
            _ => Err(ReconcileError::external(format!(
                "missing either device class, backend or ident in '{spec}'"
            ))),
        }
    }

    /// The `class:backend:ident` identity, ignoring options.
    pub fn key(&self) -> String {
        format!("{}:{}:{}", self.class, self.backend, self.ident)
    }

    /// Whether this names the same device as `other`, options aside.
    pub fn same_device(&self, other: &Self) -> bool {
        self.class == other.class && self.backend == other.backend && self.ident == other.ident
    }

    /// Render options as `(k=v, k=v)`.
    pub fn options_summary(&self) -> String {
        let body = self
            .options
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("({body})")
    }
}

/// One firewall rule, tokenized from `key=value` pairs.
///
/// The rule keeps its original token order for display but compares by
/// normalized content, so reordered-but-equal rulesets still skip.
#[derive(Debug, Clone, Eq)]
pub struct FirewallRule {
    pub action: String,
    pub opts: IndexMap<String, String>,
}

const FIREWALL_KEYS: &[&str] = &[
    "proto",
    "dsthost",
    "dst4",
    "dst6",
    "dstports",
    "icmptype",
    "specialtarget",
    "comment",
    "expire",
];

impl FirewallRule {
    /// Parse a rule like `action=accept proto=tcp dstports=443`.
    pub fn parse(raw: &str) -> Result<Self, ReconcileError> {
        let mut action = None;
        let mut opts = IndexMap::new();

        for token in raw.split_whitespace() {
            let (key, value) = token.split_once('=').ok_or_else(|| {
                ReconcileError::external(format!("malformed rule token '{token}' in '{raw}'"))
            })?;
            match key {
                "action" => match value {
                    "accept" | "drop" => action = Some(value.to_string()),
                    other => {
                        return Err(ReconcileError::external(format!(
                            "unknown firewall action '{other}'"
                        )));
                    }
                },
                key if FIREWALL_KEYS.contains(&key) => {
                    opts.insert(key.to_string(), value.to_string());
                }
                other => {
                    return Err(ReconcileError::external(format!(
                        "unknown firewall rule key '{other}'"
                    )));
                }
            }
        }

        let action = action.ok_or_else(|| {
            ReconcileError::external(format!("rule '{raw}' is missing an action"))
        })?;
        Ok(Self { action, opts })
    }
}

impl PartialEq for FirewallRule {
    fn eq(&self, other: &Self) -> bool {
        if self.action != other.action || self.opts.len() != other.opts.len() {
            return false;
        }
        self.opts
            .iter()
            .all(|(k, v)| other.opts.get(k) == Some(v))
    }
}

impl fmt::Display for FirewallRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "action={}", self.action)?;
        for (key, value) in &self.opts {
            write!(f, " {key}={value}")?;
        }
        Ok(())
    }
}

/// Options for creating a VM.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateOptions {
    /// VM class, e.g. `AppVM`, `StandaloneVM`, `TemplateVM`.
    pub class: Option<String>,
    pub template: Option<String>,
    pub label: Option<String>,
    /// Initial memory in MB.
    pub memory: Option<i64>,
    pub vcpus: Option<i64>,
}

/// Options for shutdown-style power transitions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShutdownOptions {
    /// Wait for the VM to actually halt.
    pub wait: bool,
    /// Kill if a clean shutdown fails or the VM is transient.
    pub force: bool,
    /// Kill outright instead of requesting shutdown.
    pub kill: bool,
}

/// Port to the authoritative VM store.
///
/// Accessors are read-only; mutators perform the change and surface domain
/// errors through the [`ReconcileError`] taxonomy. Implementations do not
/// decide skip-or-correct - that belongs to the operations layer.
pub trait VmAdmin {
    /// Resolve a VM by name. `NotFound` is an expected outcome for
    /// missing-style checks, not a systemic failure.
    fn resolve(&self, name: &str) -> Result<VmHandle, ReconcileError>;

    fn power_state(&self, vm: &VmHandle) -> Result<PowerState, ReconcileError>;

    fn property(
        &self,
        vm: &VmHandle,
        desc: &PropertyDescriptor,
    ) -> Result<PropertyState, ReconcileError>;
    fn set_property(
        &mut self,
        vm: &VmHandle,
        name: &str,
        value: &PropertyValue,
    ) -> Result<(), ReconcileError>;
    fn reset_property(&mut self, vm: &VmHandle, name: &str) -> Result<(), ReconcileError>;

    /// All feature entries, including `service.*` entries.
    fn features(&self, vm: &VmHandle) -> Result<IndexMap<String, String>, ReconcileError>;
    /// Set a feature value; `None` deletes the entry.
    fn set_feature(
        &mut self,
        vm: &VmHandle,
        name: &str,
        value: Option<&str>,
    ) -> Result<(), ReconcileError>;

    fn tags(&self, vm: &VmHandle) -> Result<Vec<String>, ReconcileError>;
    fn add_tag(&mut self, vm: &VmHandle, tag: &str) -> Result<(), ReconcileError>;
    fn remove_tag(&mut self, vm: &VmHandle, tag: &str) -> Result<(), ReconcileError>;

    fn devices(&self, vm: &VmHandle) -> Result<Vec<DeviceAssignment>, ReconcileError>;
    /// Attach persistently. `Conflict` when the device is already attached.
    fn attach(&mut self, vm: &VmHandle, device: &DeviceAssignment) -> Result<(), ReconcileError>;
    fn detach(&mut self, vm: &VmHandle, device: &DeviceAssignment) -> Result<(), ReconcileError>;

    fn firewall(&self, vm: &VmHandle) -> Result<Vec<FirewallRule>, ReconcileError>;
    fn set_firewall(
        &mut self,
        vm: &VmHandle,
        rules: &[FirewallRule],
    ) -> Result<(), ReconcileError>;

    fn create(&mut self, name: &str, opts: &CreateOptions) -> Result<(), ReconcileError>;
    fn remove(&mut self, vm: &VmHandle) -> Result<(), ReconcileError>;
    fn clone_vm(&mut self, source: &VmHandle, dest: &str) -> Result<(), ReconcileError>;

    fn start(&mut self, vm: &VmHandle) -> Result<(), ReconcileError>;
    fn shutdown(&mut self, vm: &VmHandle, wait: bool) -> Result<(), ReconcileError>;
    fn kill(&mut self, vm: &VmHandle) -> Result<(), ReconcileError>;
    fn pause(&mut self, vm: &VmHandle) -> Result<(), ReconcileError>;
    fn unpause(&mut self, vm: &VmHandle) -> Result<(), ReconcileError>;
    /// Start the GUI agent for a transient VM.
    fn start_gui_agent(&mut self, vm: &VmHandle) -> Result<(), ReconcileError>;

    /// Run a command inside the VM, returning captured output.
    fn run_command(
        &mut self,
        vm: &VmHandle,
        user: Option<&str>,
        cmd: &[String],
    ) -> Result<String, ReconcileError>;
}
