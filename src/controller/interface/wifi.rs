//! Wireless interface: station, hotspot, or off

use super::parameters::{common_parameters, string_value, validate_address, Configurable, Parameter};
use super::{check_record, Credentials, InterfaceContext, InterfaceCore};
use crate::config::WifiConfig;
use crate::controller::adapter::{CommandAdapter, HostCommand, LiveAddress, ProfileSpec};
use crate::controller::error::{InterfaceError, InterfaceResult};
use crate::controller::state::{InterfaceKind, InterfaceRecord, WiFiMode};
use crate::controller::status::StatusSink;
use serde_json::Value;

#[derive(Debug)]
pub struct WiFiInterface {
    core: InterfaceCore,
    mode: WiFiMode,
    credentials: Credentials,
}

fn get_ssid(iface: &WiFiInterface) -> Value {
    Value::from(iface.credentials.ssid.as_str())
}

fn set_ssid(iface: &mut WiFiInterface, value: Value) -> InterfaceResult<()> {
    iface.credentials.ssid = string_value("ssid", value)?;
    Ok(())
}

fn get_passphrase(iface: &WiFiInterface) -> Value {
    Value::from(iface.credentials.passphrase.as_str())
}

fn set_passphrase(iface: &mut WiFiInterface, value: Value) -> InterfaceResult<()> {
    iface.credentials.passphrase = string_value("passphrase", value)?;
    Ok(())
}

impl WiFiInterface {
    pub fn new(device: &str, config: &WifiConfig, sink: StatusSink) -> Self {
        Self {
            core: InterfaceCore::new(device, &config.ip, &config.mask, &config.gateway, sink),
            mode: config.connection_type,
            credentials: Credentials::new(&config.ssid, &config.passphrase),
        }
    }

    pub fn is_station(&self) -> bool {
        self.mode == WiFiMode::Station
    }

    pub fn is_access_point(&self) -> bool {
        self.mode == WiFiMode::AccessPoint
    }

    pub(super) fn enter_access_point(&mut self, rescue: &Credentials) {
        self.mode = WiFiMode::AccessPoint;
        self.credentials = rescue.clone();
    }

    fn hotspot_name(&self) -> String {
        format!("hotspot-{}", self.core.device)
    }

    pub(super) async fn initialise<A: CommandAdapter>(
        &mut self,
        adapter: &A,
        ctx: &InterfaceContext,
        recover_mode: bool,
    ) -> InterfaceResult<()> {
        let device = self.core.device.clone();
        let hotspot = self.hotspot_name();
        let profiles = adapter.profiles().await?;
        let hotspots: Vec<_> = profiles.iter().filter(|p| p.name == hotspot).collect();

        for duplicate in hotspots.iter().skip(1) {
            tracing::warn!(device = %device, uuid = %duplicate.uuid, "Deleting duplicate hotspot profile");
            adapter
                .profile_down(&duplicate.uuid, ctx.connection_wait, true)
                .await?;
            adapter.delete_profile(&duplicate.uuid).await?;
        }

        if hotspots.is_empty() {
            let ssid = if self.credentials.ssid.is_empty() {
                hotspot.clone()
            } else {
                self.credentials.ssid.clone()
            };
            tracing::info!(device = %device, profile = %hotspot, "Creating hotspot profile");
            adapter
                .add_profile(&ProfileSpec {
                    name: hotspot.clone(),
                    conn_type: "wifi",
                    device: device.clone(),
                    autoconnect: false,
                    ssid: Some(ssid),
                })
                .await?;
        }

        if !recover_mode {
            return Ok(());
        }

        let station = profiles
            .iter()
            .find(|p| p.autoconnect && p.name != hotspot && p.device.as_deref() == Some(device.as_str()));
        self.mode = if let Some(station) = station {
            if self.credentials.ssid.is_empty() {
                self.credentials.ssid = station.name.clone();
            }
            WiFiMode::Station
        } else if hotspots.is_empty() || hotspots.iter().any(|p| p.autoconnect) {
            WiFiMode::AccessPoint
        } else {
            WiFiMode::Disabled
        };
        tracing::info!(device = %device, mode = %self.mode, "Recovered active mode from profiles");
        Ok(())
    }

    pub(super) async fn apply<A: CommandAdapter>(&mut self, adapter: &A, ctx: &InterfaceContext) -> InterfaceResult<String> {
        let device = self.core.device.as_str();
        let hotspot = self.hotspot_name();
        let wait = ctx.connection_wait;

        match self.mode {
            WiFiMode::Disabled => {
                adapter
                    .modify_profile(&hotspot, &[("connection.autoconnect", "no".to_string())])
                    .await?;
                adapter.profile_down(&hotspot, wait, true).await?;
                ctx.pause().await?;
                adapter.host(HostCommand::LinkDown(device.to_string())).await?;
                Ok("disabled".to_string())
            }
            WiFiMode::Station => {
                self.credentials.require("station")?;
                adapter
                    .modify_profile(&hotspot, &[("connection.autoconnect", "no".to_string())])
                    .await?;
                adapter.profile_down(&hotspot, wait, true).await?;
                adapter.host(HostCommand::LinkUp(device.to_string())).await?;
                ctx.pause().await?;

                let Credentials { ssid, passphrase } = &self.credentials;
                ctx.retry(device, "Association", || async move {
                    adapter.associate(device, ssid, passphrase, wait).await?;
                    adapter
                        .modify_profile(ssid, &[("connection.autoconnect", "yes".to_string())])
                        .await?;
                    Ok::<_, InterfaceError>(())
                })
                .await?;
                Ok(format!("associated with {}", ssid))
            }
            WiFiMode::AccessPoint => {
                self.credentials.require("access point")?;
                let options = [
                    ("connection.interface-name", device.to_string()),
                    ("connection.autoconnect", "yes".to_string()),
                    ("802-11-wireless.mode", "ap".to_string()),
                    ("802-11-wireless.ssid", self.credentials.ssid.clone()),
                    ("wifi-sec.key-mgmt", "wpa-psk".to_string()),
                    ("wifi-sec.psk", self.credentials.passphrase.clone()),
                    ("wifi-sec.pmf", "disable".to_string()),
                    ("ipv4.method", "shared".to_string()),
                ];
                let (hotspot, options) = (&hotspot, &options);
                ctx.retry(device, "Hotspot activation", || async move {
                    adapter.modify_profile(hotspot, options).await?;
                    adapter.profile_up(hotspot, wait).await?;
                    Ok::<_, InterfaceError>(())
                })
                .await?;
                Ok(format!("hotspot {} active", self.credentials.ssid))
            }
        }
    }

    pub(super) async fn observe<A: CommandAdapter>(&mut self, adapter: &A, live: &LiveAddress) -> InterfaceResult<()> {
        self.core.observe(live);
        if self.mode == WiFiMode::Station {
            if let Some(ssid) = adapter.linked_ssid(&self.core.device).await? {
                self.credentials.ssid = ssid;
            }
        }
        Ok(())
    }

    pub(super) fn to_record(&self) -> InterfaceRecord {
        InterfaceRecord {
            kind: Some(InterfaceKind::WiFi),
            connection_type: Some(self.mode.to_string()),
            ip: Some(self.core.ip.clone()),
            mask: Some(self.core.mask.clone()),
            gateway: Some(self.core.gateway.clone()),
            ssid: Some(self.credentials.ssid.clone()),
            passphrase: Some(self.credentials.passphrase.clone()),
        }
    }

    pub(super) fn apply_record(&mut self, record: &InterfaceRecord) -> InterfaceResult<()> {
        check_record(
            &self.core.device,
            InterfaceKind::WiFi,
            record,
            &["connection_type", "ip", "mask", "gateway", "ssid", "passphrase"],
        )?;
        let mode: WiFiMode = record.connection_type.as_deref().unwrap_or_default().parse()?;
        let ip = record.ip.clone().unwrap_or_default();
        let mask = record.mask.clone().unwrap_or_default();
        let gateway = record.gateway.clone().unwrap_or_default();
        if mode == WiFiMode::AccessPoint {
            validate_address("ip", &ip)?;
            validate_address("mask", &mask)?;
            validate_address("gateway", &gateway)?;
        }

        self.mode = mode;
        self.credentials = Credentials::new(
            record.ssid.as_deref().unwrap_or_default(),
            record.passphrase.as_deref().unwrap_or_default(),
        );
        self.core.ip = ip;
        self.core.mask = mask;
        self.core.gateway = gateway;
        Ok(())
    }
}

impl Configurable for WiFiInterface {
    const KIND: InterfaceKind = InterfaceKind::WiFi;
    const PARAMETERS: &'static [Parameter<Self>] = common_parameters!(
        Parameter::writable("ssid", get_ssid, set_ssid),
        Parameter::writable("passphrase", get_passphrase, set_passphrase),
    );

    fn core(&self) -> &InterfaceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut InterfaceCore {
        &mut self.core
    }

    fn connection_type(&self) -> &'static str {
        self.mode.as_str()
    }

    fn set_connection_type(&mut self, value: &str) -> InterfaceResult<()> {
        self.mode = value.parse()?;
        Ok(())
    }

    fn ip_read_only(&self) -> bool {
        self.mode != WiFiMode::AccessPoint
    }
}
