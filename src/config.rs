//! Service configuration loaded from a TOML file

use crate::controller::state::{ApMode, EthernetMode, WiFiMode};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/netconf-supervisor/config.toml";
pub const DEFAULT_CONTROL_SOCKET: &str = "/run/netconf-supervisor.sock";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub global: GlobalConfig,
    pub interfaces: InterfacesConfig,
    pub ethernet: EthernetConfig,
    pub wifi: WifiConfig,
    pub ap: ApConfig,
    pub remote_host: RemoteHostConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Skip every mutating external command
    pub dry_run: bool,
    /// Persisted desired-state document
    pub store_path: PathBuf,
    pub control_socket: PathBuf,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            store_path: PathBuf::from("/var/lib/netconf-supervisor/interfaces.json"),
            control_socket: PathBuf::from(DEFAULT_CONTROL_SOCKET),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfacesConfig {
    pub update_period_secs: u64,
    /// Grace period before the rescue access point is forced on
    pub enable_ap_after_disconnected_secs: u64,
    pub ap_always_on: bool,
    pub use_allow_list: bool,
    pub allow_list: Vec<String>,
    pub retry_pause_ms: u64,
    pub connection_wait_secs: u64,
    pub command_timeout_secs: u64,
    pub use_sudo: bool,
}

impl Default for InterfacesConfig {
    fn default() -> Self {
        Self {
            update_period_secs: 5,
            enable_ap_after_disconnected_secs: 30,
            ap_always_on: false,
            use_allow_list: false,
            allow_list: Vec::new(),
            retry_pause_ms: 3000,
            connection_wait_secs: 10,
            command_timeout_secs: 60,
            use_sudo: false,
        }
    }
}

impl InterfacesConfig {
    pub fn update_period(&self) -> Duration {
        Duration::from_secs(self.update_period_secs.max(1))
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.enable_ap_after_disconnected_secs)
    }

    pub fn retry_pause(&self) -> Duration {
        Duration::from_millis(self.retry_pause_ms)
    }

    pub fn connection_wait(&self) -> Duration {
        Duration::from_secs(self.connection_wait_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.max(1))
    }

    /// Whether `device` may be managed under the allow-list policy
    pub fn allows(&self, device: &str) -> bool {
        !self.use_allow_list || self.allow_list.iter().any(|d| d == device)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EthernetConfig {
    pub connection_type: EthernetMode,
    pub ip: String,
    pub mask: String,
    pub gateway: String,
    pub static_dns: String,
}

impl Default for EthernetConfig {
    fn default() -> Self {
        Self {
            connection_type: EthernetMode::DynamicIp,
            ip: "192.168.1.10".to_string(),
            mask: "255.255.255.0".to_string(),
            gateway: "192.168.1.1".to_string(),
            static_dns: "8.8.8.8 4.4.4.4".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WifiConfig {
    pub connection_type: WiFiMode,
    pub ip: String,
    pub mask: String,
    pub gateway: String,
    pub ssid: String,
    pub passphrase: String,
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            connection_type: WiFiMode::Station,
            ip: "10.42.0.1".to_string(),
            mask: "255.255.255.0".to_string(),
            gateway: String::new(),
            ssid: String::new(),
            passphrase: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApConfig {
    /// Run the rescue access point on its own virtual device
    pub use_dedicated_ap: bool,
    pub device: String,
    /// Radio the dedicated device is created on
    pub phy: String,
    pub mac: Option<String>,
    pub ip_forward: bool,
    /// Rescue network credentials
    pub ssid: String,
    pub passphrase: String,
    pub connection_type: ApMode,
    pub ip: String,
    pub mask: String,
    pub gateway: String,
    pub hide_in_ui: bool,
}

impl Default for ApConfig {
    fn default() -> Self {
        Self {
            use_dedicated_ap: true,
            device: "uap0".to_string(),
            phy: "phy0".to_string(),
            mac: Some("00:11:22:33:44:55".to_string()),
            ip_forward: true,
            ssid: "ConfigurationAP".to_string(),
            passphrase: "configure-network".to_string(),
            connection_type: ApMode::Disabled,
            ip: "10.42.0.1".to_string(),
            mask: "255.255.255.0".to_string(),
            gateway: String::new(),
            hide_in_ui: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteHostConfig {
    pub enabled: bool,
    pub hostname: String,
    pub port: u16,
    pub ssh_key: Option<PathBuf>,
}

impl Default for RemoteHostConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            hostname: String::new(),
            port: 22,
            ssh_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Config {
    /// Load the configuration file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "No configuration file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML in {}", path.display()))?;
        Ok(config)
    }
}
