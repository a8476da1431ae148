//! Contract of the external network-configuration tool
//!
//! The state machines only ever talk to the OS through [`CommandAdapter`]. The
//! production implementation drives `nmcli`, `ip`, `iw` and `sysctl`; tests use
//! an in-memory fake.

#[cfg(test)]
pub mod fake;
pub mod nmcli;
pub mod runner;

use super::error::AdapterResult;
use std::collections::BTreeSet;
use std::time::Duration;
use trait_variant::make;

/// Kind of a device as reported by the device enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceKind {
    Ethernet,
    WiFi,
    AccessPoint,
    Other(String),
}

/// A network device known to the OS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub name: String,
    pub kind: DeviceKind,
}

/// A named configuration profile of the network-management tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionProfile {
    pub name: String,
    pub uuid: String,
    /// Device the profile is currently bound to, if active
    pub device: Option<String>,
    pub autoconnect: bool,
}

/// Profile creation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileSpec {
    pub name: String,
    /// Tool-level connection type, e.g. `ethernet` or `wifi`
    pub conn_type: &'static str,
    pub device: String,
    pub autoconnect: bool,
    pub ssid: Option<String>,
}

/// Hotspot creation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotspotSpec {
    pub name: String,
    pub device: String,
    pub ssid: String,
    pub passphrase: String,
}

/// Observed addressing and state of a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveAddress {
    pub address: Option<String>,
    pub mask: Option<String>,
    pub broadcast: Option<String>,
    pub gateway: Option<String>,
    /// Operational state, e.g. `connected` or `disconnected`
    pub state: String,
}

impl Default for LiveAddress {
    fn default() -> Self {
        Self {
            address: None,
            mask: None,
            broadcast: None,
            gateway: None,
            state: "unknown".to_string(),
        }
    }
}

/// OS-level operations outside of the profile model
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCommand {
    LinkUp(String),
    LinkDown(String),
    SetMac { device: String, mac: String },
    AddApInterface { phy: String, device: String },
    IpForward(bool),
}

/// Operations the state machines need from the network-configuration tool.
///
/// Mutating calls are no-ops in dry-run mode while queries still execute.
#[make(Send)]
pub trait CommandAdapter: Send + Sync + 'static {
    /// Enumerate OS devices
    async fn devices(&self) -> AdapterResult<Vec<Device>>;

    /// Enumerate configuration profiles
    async fn profiles(&self) -> AdapterResult<Vec<ConnectionProfile>>;

    async fn add_profile(&self, spec: &ProfileSpec) -> AdapterResult<()>;

    /// Set one or more `key value` options on a profile
    async fn modify_profile(&self, profile: &str, options: &[(&str, String)]) -> AdapterResult<()>;

    async fn profile_up(&self, profile: &str, wait: Duration) -> AdapterResult<()>;

    /// Bring a profile down; with `ignore_failure` a failure is logged and swallowed
    async fn profile_down(&self, profile: &str, wait: Duration, ignore_failure: bool) -> AdapterResult<()>;

    async fn delete_profile(&self, profile: &str) -> AdapterResult<()>;

    /// Observed addressing and operational state of a device
    async fn live_address(&self, device: &str) -> AdapterResult<LiveAddress>;

    /// Visible SSIDs seen from a wireless device
    async fn scan(&self, device: &str) -> AdapterResult<BTreeSet<String>>;

    /// Associate a wireless device with a network
    async fn associate(&self, device: &str, ssid: &str, passphrase: &str, wait: Duration) -> AdapterResult<()>;

    /// Create and activate a hotspot profile with shared addressing
    async fn hotspot(&self, spec: &HotspotSpec) -> AdapterResult<()>;

    async fn host(&self, command: HostCommand) -> AdapterResult<()>;

    /// SSID of the network the device is currently linked to
    async fn linked_ssid(&self, device: &str) -> AdapterResult<Option<String>>;
}
