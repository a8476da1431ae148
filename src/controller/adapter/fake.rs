//! Recording in-memory [`CommandAdapter`] for tests

use super::{
    CommandAdapter, ConnectionProfile, Device, DeviceKind, HostCommand, HotspotSpec, LiveAddress,
    ProfileSpec,
};
use crate::controller::error::{AdapterError, AdapterResult};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct FakeProfile {
    pub name: String,
    pub uuid: String,
    pub device: String,
    pub autoconnect: bool,
    pub active: bool,
    pub settings: BTreeMap<String, String>,
}

#[derive(Default)]
pub struct FakeState {
    pub devices: Vec<Device>,
    pub profiles: Vec<FakeProfile>,
    pub live: HashMap<String, LiveAddress>,
    pub ssids: HashMap<String, BTreeSet<String>>,
    pub linked: HashMap<String, String>,
    pub calls: Vec<String>,
    pub host_commands: Vec<HostCommand>,
    pub fail_up: HashSet<String>,
    pub fail_live: HashSet<String>,
    pub fail_hotspot: bool,
    pub fail_associate: bool,
    next_uuid: u32,
}

impl FakeState {
    fn find(&mut self, profile: &str) -> Option<&mut FakeProfile> {
        self.profiles
            .iter_mut()
            .find(|p| p.name == profile || p.uuid == profile)
    }

    fn insert(&mut self, name: &str, device: &str, autoconnect: bool) -> String {
        self.next_uuid += 1;
        let uuid = format!("uuid-{}", self.next_uuid);
        self.profiles.push(FakeProfile {
            name: name.to_string(),
            uuid: uuid.clone(),
            device: device.to_string(),
            autoconnect,
            ..Default::default()
        });
        uuid
    }
}

#[derive(Default)]
pub struct FakeAdapter {
    state: Mutex<FakeState>,
}

fn injected(command: String) -> AdapterError {
    AdapterError::Failed {
        command,
        status: 1,
        stderr: "injected failure".to_string(),
    }
}

impl FakeAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(devices: &[(&str, DeviceKind)]) -> Self {
        let fake = Self::new();
        fake.state().devices = devices
            .iter()
            .map(|(name, kind)| Device {
                name: name.to_string(),
                kind: kind.clone(),
            })
            .collect();
        fake
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Seed a pre-existing profile, returning its uuid
    pub fn seed_profile(&self, name: &str, device: &str, autoconnect: bool, active: bool) -> String {
        let mut state = self.state();
        let uuid = state.insert(name, device, autoconnect);
        if let Some(profile) = state.find(&uuid) {
            profile.active = active;
        }
        uuid
    }

    pub fn profile(&self, name: &str) -> Option<FakeProfile> {
        self.state().find(name).cloned()
    }

    pub fn profiles_named(&self, name: &str) -> usize {
        self.state().profiles.iter().filter(|p| p.name == name).count()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn set_live(&self, device: &str, state: &str, address: Option<&str>) {
        self.state().live.insert(
            device.to_string(),
            LiveAddress {
                address: address.map(str::to_string),
                mask: address.map(|_| "255.255.255.0".to_string()),
                broadcast: None,
                gateway: None,
                state: state.to_string(),
            },
        );
    }
}

impl CommandAdapter for FakeAdapter {
    async fn devices(&self) -> AdapterResult<Vec<Device>> {
        Ok(self.state().devices.clone())
    }

    async fn profiles(&self) -> AdapterResult<Vec<ConnectionProfile>> {
        Ok(self
            .state()
            .profiles
            .iter()
            .map(|p| ConnectionProfile {
                name: p.name.clone(),
                uuid: p.uuid.clone(),
                device: p.active.then(|| p.device.clone()),
                autoconnect: p.autoconnect,
            })
            .collect())
    }

    async fn add_profile(&self, spec: &ProfileSpec) -> AdapterResult<()> {
        let mut state = self.state();
        state.calls.push(format!("add {}", spec.name));
        let uuid = state.insert(&spec.name, &spec.device, spec.autoconnect);
        if let (Some(profile), Some(ssid)) = (state.find(&uuid), &spec.ssid) {
            profile.settings.insert("ssid".to_string(), ssid.clone());
        }
        Ok(())
    }

    async fn modify_profile(&self, profile: &str, options: &[(&str, String)]) -> AdapterResult<()> {
        let mut state = self.state();
        state.calls.push(format!("modify {}", profile));
        let Some(found) = state.find(profile) else {
            return Err(injected(format!("modify {}", profile)));
        };
        for (key, value) in options {
            match *key {
                "connection.autoconnect" => found.autoconnect = value == "yes",
                "connection.interface-name" => found.device = value.clone(),
                _ => {}
            }
            found.settings.insert(key.to_string(), value.clone());
        }
        Ok(())
    }

    async fn profile_up(&self, profile: &str, _wait: Duration) -> AdapterResult<()> {
        let mut state = self.state();
        state.calls.push(format!("up {}", profile));
        if state.fail_up.contains(profile) {
            return Err(injected(format!("up {}", profile)));
        }
        match state.find(profile) {
            Some(found) => {
                found.active = true;
                Ok(())
            }
            None => Err(injected(format!("up {}", profile))),
        }
    }

    async fn profile_down(&self, profile: &str, _wait: Duration, ignore_failure: bool) -> AdapterResult<()> {
        let mut state = self.state();
        state.calls.push(format!("down {}", profile));
        match state.find(profile) {
            Some(found) if found.active => {
                found.active = false;
                Ok(())
            }
            _ if ignore_failure => Ok(()),
            _ => Err(injected(format!("down {}", profile))),
        }
    }

    async fn delete_profile(&self, profile: &str) -> AdapterResult<()> {
        let mut state = self.state();
        state.calls.push(format!("delete {}", profile));
        match state
            .profiles
            .iter()
            .position(|p| p.name == profile || p.uuid == profile)
        {
            Some(index) => {
                state.profiles.remove(index);
                Ok(())
            }
            None => Err(injected(format!("delete {}", profile))),
        }
    }

    async fn live_address(&self, device: &str) -> AdapterResult<LiveAddress> {
        let state = self.state();
        if state.fail_live.contains(device) {
            return Err(injected(format!("live {}", device)));
        }
        Ok(state.live.get(device).cloned().unwrap_or_default())
    }

    async fn scan(&self, device: &str) -> AdapterResult<BTreeSet<String>> {
        Ok(self.state().ssids.get(device).cloned().unwrap_or_default())
    }

    async fn associate(&self, device: &str, ssid: &str, _passphrase: &str, _wait: Duration) -> AdapterResult<()> {
        let mut state = self.state();
        state.calls.push(format!("associate {} {}", device, ssid));
        if state.fail_associate {
            return Err(injected(format!("associate {}", ssid)));
        }
        if state.find(ssid).is_none() {
            state.insert(ssid, device, true);
        }
        if let Some(profile) = state.find(ssid) {
            profile.active = true;
        }
        state.linked.insert(device.to_string(), ssid.to_string());
        Ok(())
    }

    async fn hotspot(&self, spec: &HotspotSpec) -> AdapterResult<()> {
        let mut state = self.state();
        state.calls.push(format!("hotspot {}", spec.name));
        if state.fail_hotspot {
            return Err(injected(format!("hotspot {}", spec.name)));
        }
        if state.find(&spec.name).is_none() {
            state.insert(&spec.name, &spec.device, false);
        }
        if let Some(profile) = state.find(&spec.name) {
            profile.active = true;
            profile.settings.insert("ssid".to_string(), spec.ssid.clone());
        }
        Ok(())
    }

    async fn host(&self, command: HostCommand) -> AdapterResult<()> {
        let mut state = self.state();
        state.calls.push(format!("host {:?}", command));
        if let HostCommand::AddApInterface { device, .. } = &command {
            state.devices.push(Device {
                name: device.clone(),
                kind: DeviceKind::AccessPoint,
            });
        }
        state.host_commands.push(command);
        Ok(())
    }

    async fn linked_ssid(&self, device: &str) -> AdapterResult<Option<String>> {
        Ok(self.state().linked.get(device).cloned())
    }
}
