//! `qvm-*` tool implementation of the admin port.
//!
//! Each accessor/mutator maps onto one invocation of the pre-existing
//! Qubes command-line tools, with stdout parsed back into typed state.
//! All execution goes through the injected [`CommandRunner`], so a
//! dry-run runner turns every mutator into a logged no-op.

use super::{
    CreateOptions, DeviceAssignment, FirewallRule, PowerState, VmAdmin, VmHandle,
};
use crate::runner::{Command, CommandRunner};
use indexmap::IndexMap;
use reconcile::{
    PropertyDescriptor, PropertyKind, PropertyState, PropertyValue, ReconcileError,
};

/// Device classes enumerated when listing assignments.
const DEVICE_CLASSES: &[&str] = &["pci", "block", "usb", "mic"];

pub struct QvmAdmin {
    runner: CommandRunner,
}

impl QvmAdmin {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    /// Classify a failed tool invocation by its stderr.
    fn classify(name: &str, err: ReconcileError) -> ReconcileError {
        let message = err.to_string();
        let lowered = message.to_ascii_lowercase();
        if lowered.contains("does not exist") || lowered.contains("no such domain") {
            ReconcileError::not_found(name)
        } else if lowered.contains("already attached") {
            ReconcileError::conflict(message)
        } else {
            err
        }
    }

    /// Execute a mutating tool invocation (suppressed under dry-run).
    fn run_vm_tool(&self, vm_name: &str, cmd: &Command) -> Result<String, ReconcileError> {
        self.runner
            .run_checked(cmd)
            .map(|output| output.stdout)
            .map_err(|err| Self::classify(vm_name, err))
    }

    /// Execute a read-only tool invocation (real even under dry-run).
    fn query_vm_tool(&self, vm_name: &str, cmd: &Command) -> Result<String, ReconcileError> {
        self.runner
            .read_checked(cmd)
            .map(|output| output.stdout)
            .map_err(|err| Self::classify(vm_name, err))
    }

    /// Parse the `qvm-prefs` listing: one `name  D|-  value` row per
    /// property, where `D` marks a value tracking the platform default.
    fn prefs_listing(
        &self,
        vm: &VmHandle,
    ) -> Result<IndexMap<String, (bool, String)>, ReconcileError> {
        let stdout = self.query_vm_tool(
            &vm.name,
            &Command::new("qvm-prefs").arg("--").arg(&vm.name),
        )?;

        let mut listing = IndexMap::new();
        for line in stdout.lines() {
            let mut parts = line.split_whitespace();
            let (Some(name), Some(flag)) = (parts.next(), parts.next()) else {
                continue;
            };
            let is_default = flag == "D";
            let value = parts.collect::<Vec<_>>().join(" ");
            listing.insert(name.to_string(), (is_default, value));
        }
        Ok(listing)
    }

    /// Parse a raw property value into the descriptor's kind.
    fn parse_value(
        desc: &PropertyDescriptor,
        raw: &str,
    ) -> Result<PropertyValue, ReconcileError> {
        let raw = raw.trim();
        match desc.kind {
            PropertyKind::Bool => match raw {
                "True" | "true" | "1" => Ok(PropertyValue::Bool(true)),
                "False" | "false" | "" | "0" => Ok(PropertyValue::Bool(false)),
                other => Err(ReconcileError::external(format!(
                    "{}: unparseable boolean '{other}'",
                    desc.name
                ))),
            },
            PropertyKind::Int => raw.parse::<i64>().map(PropertyValue::Int).map_err(|_| {
                ReconcileError::external(format!("{}: unparseable integer '{raw}'", desc.name))
            }),
            PropertyKind::Str | PropertyKind::Choice(_) => Ok(PropertyValue::Str(raw.to_string())),
            PropertyKind::List => Ok(PropertyValue::List(
                raw.split_whitespace().map(str::to_string).collect(),
            )),
            PropertyKind::OptionalRef => {
                if raw.is_empty() || raw == "-" || raw.eq_ignore_ascii_case("none") {
                    Ok(PropertyValue::Null)
                } else {
                    Ok(PropertyValue::Str(raw.to_string()))
                }
            }
        }
    }

    /// Render a property value the way the tools expect it on argv.
    fn render_value(value: &PropertyValue) -> String {
        match value {
            PropertyValue::Bool(b) => {
                if *b {
                    "True".to_string()
                } else {
                    "False".to_string()
                }
            }
            PropertyValue::Null => String::new(),
            other => other.to_string(),
        }
    }
}

impl VmAdmin for QvmAdmin {
    fn resolve(&self, name: &str) -> Result<VmHandle, ReconcileError> {
        let cmd = Command::new("qvm-check").arg("--quiet").arg("--").arg(name);
        match self.runner.read(&cmd) {
            Ok(output) if output.success() => Ok(VmHandle::new(name)),
            Ok(_) => Err(ReconcileError::not_found(name)),
            Err(err) => Err(err),
        }
    }

    fn power_state(&self, vm: &VmHandle) -> Result<PowerState, ReconcileError> {
        let stdout = self.query_vm_tool(
            &vm.name,
            &Command::new("qvm-ls")
                .args(["--raw-data", "--fields", "state", "--"])
                .arg(&vm.name),
        )?;
        PowerState::parse(stdout.trim())
    }

    fn property(
        &self,
        vm: &VmHandle,
        desc: &PropertyDescriptor,
    ) -> Result<PropertyState, ReconcileError> {
        let listing = self.prefs_listing(vm)?;
        match listing.get(desc.name) {
            Some((true, _)) => Ok(PropertyState::TrackingDefault),
            Some((false, raw)) => Ok(PropertyState::Value(Self::parse_value(desc, raw)?)),
            None => Err(ReconcileError::invalid_key(desc.name)),
        }
    }

    fn set_property(
        &mut self,
        vm: &VmHandle,
        name: &str,
        value: &PropertyValue,
    ) -> Result<(), ReconcileError> {
        let cmd = Command::new("qvm-prefs")
            .args(["--set", "--"])
            .arg(&vm.name)
            .arg(name)
            .arg(Self::render_value(value));
        self.run_vm_tool(&vm.name, &cmd).map(|_| ())
    }

    fn reset_property(&mut self, vm: &VmHandle, name: &str) -> Result<(), ReconcileError> {
        let cmd = Command::new("qvm-prefs")
            .args(["--default", "--"])
            .arg(&vm.name)
            .arg(name);
        self.run_vm_tool(&vm.name, &cmd).map(|_| ())
    }

    fn features(&self, vm: &VmHandle) -> Result<IndexMap<String, String>, ReconcileError> {
        let stdout =
            self.query_vm_tool(&vm.name, &Command::new("qvm-features").arg("--").arg(&vm.name))?;
        let mut features = IndexMap::new();
        for line in stdout.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match line.split_once(char::is_whitespace) {
                Some((name, value)) => {
                    features.insert(name.to_string(), value.trim().to_string());
                }
                None => {
                    features.insert(line.trim().to_string(), String::new());
                }
            }
        }
        Ok(features)
    }

    fn set_feature(
        &mut self,
        vm: &VmHandle,
        name: &str,
        value: Option<&str>,
    ) -> Result<(), ReconcileError> {
        let cmd = match value {
            Some(value) => Command::new("qvm-features")
                .arg("--")
                .arg(&vm.name)
                .arg(name)
                .arg(value),
            None => Command::new("qvm-features")
                .args(["--unset", "--"])
                .arg(&vm.name)
                .arg(name),
        };
        self.run_vm_tool(&vm.name, &cmd).map(|_| ())
    }

    fn tags(&self, vm: &VmHandle) -> Result<Vec<String>, ReconcileError> {
        let stdout = self.query_vm_tool(
            &vm.name,
            &Command::new("qvm-tags").arg("--").arg(&vm.name).arg("list"),
        )?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn add_tag(&mut self, vm: &VmHandle, tag: &str) -> Result<(), ReconcileError> {
        let cmd = Command::new("qvm-tags")
            .arg("--")
            .arg(&vm.name)
            .args(["add", tag]);
        self.run_vm_tool(&vm.name, &cmd).map(|_| ())
    }

    fn remove_tag(&mut self, vm: &VmHandle, tag: &str) -> Result<(), ReconcileError> {
        let cmd = Command::new("qvm-tags")
            .arg("--")
            .arg(&vm.name)
            .args(["del", tag]);
        self.run_vm_tool(&vm.name, &cmd).map(|_| ())
    }

    fn devices(&self, vm: &VmHandle) -> Result<Vec<DeviceAssignment>, ReconcileError> {
        let mut assignments = Vec::new();
        for class in DEVICE_CLASSES {
            let stdout = self.query_vm_tool(
                &vm.name,
                &Command::new("qvm-device")
                    .arg(*class)
                    .args(["list", "--"])
                    .arg(&vm.name),
            )?;
            for line in stdout.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let Some(spec) = line.split_whitespace().next() else {
                    continue;
                };
                let Some((backend, ident)) = spec.split_once(':') else {
                    continue;
                };
                let mut device = DeviceAssignment::new(*class, backend, ident);
                // Options render at end of line as `(key=value key=value)`.
                if let (Some(open), Some(close)) = (line.rfind('('), line.rfind(')')) {
                    if open < close {
                        for pair in line[open + 1..close].split_whitespace() {
                            if let Some((key, value)) = pair.split_once('=') {
                                device
                                    .options
                                    .insert(key.to_string(), value.to_string());
                            }
                        }
                    }
                }
                assignments.push(device);
            }
        }
        Ok(assignments)
    }

    fn attach(&mut self, vm: &VmHandle, device: &DeviceAssignment) -> Result<(), ReconcileError> {
        let mut cmd = Command::new("qvm-device")
            .arg(&device.class)
            .args(["attach", "--persistent"]);
        for (key, value) in &device.options {
            cmd = cmd.arg("--option").arg(format!("{key}={value}"));
        }
        cmd = cmd
            .arg("--")
            .arg(&vm.name)
            .arg(format!("{}:{}", device.backend, device.ident));
        self.run_vm_tool(&vm.name, &cmd).map(|_| ())
    }

    fn detach(&mut self, vm: &VmHandle, device: &DeviceAssignment) -> Result<(), ReconcileError> {
        let cmd = Command::new("qvm-device")
            .arg(&device.class)
            .args(["detach", "--"])
            .arg(&vm.name)
            .arg(format!("{}:{}", device.backend, device.ident));
        self.run_vm_tool(&vm.name, &cmd).map(|_| ())
    }

    fn firewall(&self, vm: &VmHandle) -> Result<Vec<FirewallRule>, ReconcileError> {
        let stdout = self.query_vm_tool(
            &vm.name,
            &Command::new("qvm-firewall")
                .args(["--raw", "--"])
                .arg(&vm.name)
                .arg("list"),
        )?;
        stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(FirewallRule::parse)
            .collect()
    }

    fn set_firewall(
        &mut self,
        vm: &VmHandle,
        rules: &[FirewallRule],
    ) -> Result<(), ReconcileError> {
        let reset = Command::new("qvm-firewall")
            .arg("--")
            .arg(&vm.name)
            .arg("reset");
        self.run_vm_tool(&vm.name, &reset)?;
        for rule in rules {
            let cmd = Command::new("qvm-firewall")
                .arg("--")
                .arg(&vm.name)
                .arg("add")
                .args(rule.to_string().split_whitespace().map(str::to_string));
            self.run_vm_tool(&vm.name, &cmd)?;
        }
        Ok(())
    }

    fn create(&mut self, name: &str, opts: &CreateOptions) -> Result<(), ReconcileError> {
        let mut cmd = Command::new("qvm-create");
        if let Some(class) = &opts.class {
            cmd = cmd.args(["--class", class]);
        }
        if let Some(template) = &opts.template {
            cmd = cmd.args(["--template", template]);
        }
        if let Some(label) = &opts.label {
            cmd = cmd.args(["--label", label]);
        }
        if let Some(memory) = opts.memory {
            cmd = cmd.arg("--property").arg(format!("memory={memory}"));
        }
        if let Some(vcpus) = opts.vcpus {
            cmd = cmd.arg("--property").arg(format!("vcpus={vcpus}"));
        }
        cmd = cmd.arg("--").arg(name);
        self.run_vm_tool(name, &cmd).map(|_| ())
    }

    fn remove(&mut self, vm: &VmHandle) -> Result<(), ReconcileError> {
        let cmd = Command::new("qvm-remove")
            .args(["--force", "--"])
            .arg(&vm.name);
        self.run_vm_tool(&vm.name, &cmd).map(|_| ())
    }

    fn clone_vm(&mut self, source: &VmHandle, dest: &str) -> Result<(), ReconcileError> {
        let cmd = Command::new("qvm-clone")
            .arg("--")
            .arg(&source.name)
            .arg(dest);
        self.run_vm_tool(&source.name, &cmd).map(|_| ())
    }

    fn start(&mut self, vm: &VmHandle) -> Result<(), ReconcileError> {
        let cmd = Command::new("qvm-start").arg("--").arg(&vm.name);
        self.run_vm_tool(&vm.name, &cmd).map(|_| ())
    }

    fn shutdown(&mut self, vm: &VmHandle, wait: bool) -> Result<(), ReconcileError> {
        let mut cmd = Command::new("qvm-shutdown");
        if wait {
            cmd = cmd.arg("--wait");
        }
        cmd = cmd.arg("--").arg(&vm.name);
        self.run_vm_tool(&vm.name, &cmd).map(|_| ())
    }

    fn kill(&mut self, vm: &VmHandle) -> Result<(), ReconcileError> {
        let cmd = Command::new("qvm-kill").arg("--").arg(&vm.name);
        self.run_vm_tool(&vm.name, &cmd).map(|_| ())
    }

    fn pause(&mut self, vm: &VmHandle) -> Result<(), ReconcileError> {
        let cmd = Command::new("qvm-pause").arg("--").arg(&vm.name);
        self.run_vm_tool(&vm.name, &cmd).map(|_| ())
    }

    fn unpause(&mut self, vm: &VmHandle) -> Result<(), ReconcileError> {
        let cmd = Command::new("qvm-unpause").arg("--").arg(&vm.name);
        self.run_vm_tool(&vm.name, &cmd).map(|_| ())
    }

    fn start_gui_agent(&mut self, vm: &VmHandle) -> Result<(), ReconcileError> {
        let cmd = Command::new("qvm-start-daemon").arg("--").arg(&vm.name);
        self.run_vm_tool(&vm.name, &cmd).map(|_| ())
    }

    fn run_command(
        &mut self,
        vm: &VmHandle,
        user: Option<&str>,
        cmd: &[String],
    ) -> Result<String, ReconcileError> {
        let mut invocation = Command::new("qvm-run").arg("--pass-io");
        if let Some(user) = user {
            invocation = invocation.args(["--user", user]);
        }
        invocation = invocation.arg("--").arg(&vm.name).args(cmd.to_vec());
        self.run_vm_tool(&vm.name, &invocation)
    }
}
