//! In-memory admin store for tests.
//!
//! Every mutator appends to a call log, so tests can assert not just on
//! resulting state but on the absence of mutation during dry runs.

use super::{
    CreateOptions, DeviceAssignment, FirewallRule, PowerState, VmAdmin, VmHandle,
};
use indexmap::IndexMap;
use reconcile::{PropertyDescriptor, PropertyState, PropertyValue, ReconcileError};

#[derive(Debug, Clone)]
pub struct MockVm {
    pub power: PowerState,
    pub properties: IndexMap<String, PropertyState>,
    pub features: IndexMap<String, String>,
    pub tags: Vec<String>,
    pub devices: Vec<DeviceAssignment>,
    pub firewall: Vec<FirewallRule>,
}

impl Default for MockVm {
    fn default() -> Self {
        Self {
            power: PowerState::Halted,
            properties: IndexMap::new(),
            features: IndexMap::new(),
            tags: Vec::new(),
            devices: Vec::new(),
            firewall: Vec::new(),
        }
    }
}

impl MockVm {
    pub fn with_power(mut self, power: PowerState) -> Self {
        self.power = power;
        self
    }

    pub fn with_property(mut self, name: &str, value: PropertyValue) -> Self {
        self.properties
            .insert(name.to_string(), PropertyState::Value(value));
        self
    }

    pub fn with_default_property(mut self, name: &str) -> Self {
        self.properties
            .insert(name.to_string(), PropertyState::TrackingDefault);
        self
    }

    pub fn with_feature(mut self, name: &str, value: &str) -> Self {
        self.features.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| (*t).to_string()).collect();
        self
    }

    pub fn with_device(mut self, device: DeviceAssignment) -> Self {
        self.devices.push(device);
        self
    }
}

#[derive(Debug, Default)]
pub struct MockAdmin {
    pub vms: IndexMap<String, MockVm>,
    /// One entry per mutator invocation, e.g. `set_property work memory`.
    pub mutations: Vec<String>,
}

impl MockAdmin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vm(mut self, name: &str, vm: MockVm) -> Self {
        self.vms.insert(name.to_string(), vm);
        self
    }

    pub fn vm(&self, name: &str) -> &MockVm {
        &self.vms[name]
    }

    fn record(&mut self, mutation: String) {
        self.mutations.push(mutation);
    }

    fn get(&self, vm: &VmHandle) -> Result<&MockVm, ReconcileError> {
        self.vms
            .get(&vm.name)
            .ok_or_else(|| ReconcileError::not_found(&vm.name))
    }

    fn get_mut(&mut self, vm: &VmHandle) -> Result<&mut MockVm, ReconcileError> {
        self.vms
            .get_mut(&vm.name)
            .ok_or_else(|| ReconcileError::not_found(&vm.name))
    }
}

impl VmAdmin for MockAdmin {
    fn resolve(&self, name: &str) -> Result<VmHandle, ReconcileError> {
        if self.vms.contains_key(name) {
            Ok(VmHandle::new(name))
        } else {
            Err(ReconcileError::not_found(name))
        }
    }

    fn power_state(&self, vm: &VmHandle) -> Result<PowerState, ReconcileError> {
        Ok(self.get(vm)?.power)
    }

    fn property(
        &self,
        vm: &VmHandle,
        desc: &PropertyDescriptor,
    ) -> Result<PropertyState, ReconcileError> {
        self.get(vm)?
            .properties
            .get(desc.name)
            .cloned()
            .ok_or_else(|| ReconcileError::invalid_key(desc.name))
    }

    fn set_property(
        &mut self,
        vm: &VmHandle,
        name: &str,
        value: &PropertyValue,
    ) -> Result<(), ReconcileError> {
        self.record(format!("set_property {} {name}", vm.name));
        let entry = self.get_mut(vm)?;
        entry
            .properties
            .insert(name.to_string(), PropertyState::Value(value.clone()));
        Ok(())
    }

    fn reset_property(&mut self, vm: &VmHandle, name: &str) -> Result<(), ReconcileError> {
        self.record(format!("reset_property {} {name}", vm.name));
        let entry = self.get_mut(vm)?;
        entry
            .properties
            .insert(name.to_string(), PropertyState::TrackingDefault);
        Ok(())
    }

    fn features(&self, vm: &VmHandle) -> Result<IndexMap<String, String>, ReconcileError> {
        Ok(self.get(vm)?.features.clone())
    }

    fn set_feature(
        &mut self,
        vm: &VmHandle,
        name: &str,
        value: Option<&str>,
    ) -> Result<(), ReconcileError> {
        self.record(format!("set_feature {} {name}", vm.name));
        let entry = self.get_mut(vm)?;
        match value {
            Some(value) => {
                entry.features.insert(name.to_string(), value.to_string());
            }
            None => {
                entry.features.shift_remove(name);
            }
        }
        Ok(())
    }

    fn tags(&self, vm: &VmHandle) -> Result<Vec<String>, ReconcileError> {
        Ok(self.get(vm)?.tags.clone())
    }

    fn add_tag(&mut self, vm: &VmHandle, tag: &str) -> Result<(), ReconcileError> {
        self.record(format!("add_tag {} {tag}", vm.name));
        let entry = self.get_mut(vm)?;
        if !entry.tags.iter().any(|t| t == tag) {
            entry.tags.push(tag.to_string());
        }
        Ok(())
    }

    fn remove_tag(&mut self, vm: &VmHandle, tag: &str) -> Result<(), ReconcileError> {
        self.record(format!("remove_tag {} {tag}", vm.name));
        let entry = self.get_mut(vm)?;
        entry.tags.retain(|t| t != tag);
        Ok(())
    }

    fn devices(&self, vm: &VmHandle) -> Result<Vec<DeviceAssignment>, ReconcileError> {
        Ok(self.get(vm)?.devices.clone())
    }

    fn attach(&mut self, vm: &VmHandle, device: &DeviceAssignment) -> Result<(), ReconcileError> {
        self.record(format!("attach {} {}", vm.name, device.key()));
        let entry = self.get_mut(vm)?;
        if entry.devices.iter().any(|d| d.same_device(device)) {
            return Err(ReconcileError::conflict(format!(
                "device {} already attached",
                device.key()
            )));
        }
        entry.devices.push(device.clone());
        Ok(())
    }

    fn detach(&mut self, vm: &VmHandle, device: &DeviceAssignment) -> Result<(), ReconcileError> {
        self.record(format!("detach {} {}", vm.name, device.key()));
        let entry = self.get_mut(vm)?;
        let before = entry.devices.len();
        entry.devices.retain(|d| !d.same_device(device));
        if entry.devices.len() == before {
            return Err(ReconcileError::external(format!(
                "device {} is not attached",
                device.key()
            )));
        }
        Ok(())
    }

    fn firewall(&self, vm: &VmHandle) -> Result<Vec<FirewallRule>, ReconcileError> {
        Ok(self.get(vm)?.firewall.clone())
    }

    fn set_firewall(
        &mut self,
        vm: &VmHandle,
        rules: &[FirewallRule],
    ) -> Result<(), ReconcileError> {
        self.record(format!("set_firewall {}", vm.name));
        self.get_mut(vm)?.firewall = rules.to_vec();
        Ok(())
    }

    fn create(&mut self, name: &str, opts: &CreateOptions) -> Result<(), ReconcileError> {
        self.record(format!("create {name}"));
        // Fresh VMs come up with the platform's stock memory size.
        let mut vm =
            MockVm::default().with_property("memory", PropertyValue::Int(opts.memory.unwrap_or(400)));
        if let Some(template) = &opts.template {
            vm = vm.with_property("template", PropertyValue::Str(template.clone()));
        }
        if let Some(label) = &opts.label {
            vm = vm.with_property("label", PropertyValue::Str(label.clone()));
        }
        if let Some(vcpus) = opts.vcpus {
            vm = vm.with_property("vcpus", PropertyValue::Int(vcpus));
        }
        self.vms.insert(name.to_string(), vm);
        Ok(())
    }

    fn remove(&mut self, vm: &VmHandle) -> Result<(), ReconcileError> {
        self.record(format!("remove {}", vm.name));
        self.vms
            .shift_remove(&vm.name)
            .map(|_| ())
            .ok_or_else(|| ReconcileError::not_found(&vm.name))
    }

    fn clone_vm(&mut self, source: &VmHandle, dest: &str) -> Result<(), ReconcileError> {
        self.record(format!("clone {} {dest}", source.name));
        let cloned = self.get(source)?.clone();
        self.vms.insert(dest.to_string(), cloned);
        Ok(())
    }

    fn start(&mut self, vm: &VmHandle) -> Result<(), ReconcileError> {
        self.record(format!("start {}", vm.name));
        self.get_mut(vm)?.power = PowerState::Running;
        Ok(())
    }

    fn shutdown(&mut self, vm: &VmHandle, _wait: bool) -> Result<(), ReconcileError> {
        self.record(format!("shutdown {}", vm.name));
        self.get_mut(vm)?.power = PowerState::Halted;
        Ok(())
    }

    fn kill(&mut self, vm: &VmHandle) -> Result<(), ReconcileError> {
        self.record(format!("kill {}", vm.name));
        self.get_mut(vm)?.power = PowerState::Halted;
        Ok(())
    }

    fn pause(&mut self, vm: &VmHandle) -> Result<(), ReconcileError> {
        self.record(format!("pause {}", vm.name));
        self.get_mut(vm)?.power = PowerState::Paused;
        Ok(())
    }

    fn unpause(&mut self, vm: &VmHandle) -> Result<(), ReconcileError> {
        self.record(format!("unpause {}", vm.name));
        self.get_mut(vm)?.power = PowerState::Running;
        Ok(())
    }

    fn start_gui_agent(&mut self, vm: &VmHandle) -> Result<(), ReconcileError> {
        self.record(format!("start_gui_agent {}", vm.name));
        self.get_mut(vm)?.power = PowerState::Running;
        Ok(())
    }

    fn run_command(
        &mut self,
        vm: &VmHandle,
        _user: Option<&str>,
        cmd: &[String],
    ) -> Result<String, ReconcileError> {
        self.record(format!("run_command {} {}", vm.name, cmd.join(" ")));
        self.get(vm)?;
        Ok(format!("ran: {}", cmd.join(" ")))
    }
}
