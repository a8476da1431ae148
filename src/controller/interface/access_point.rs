//! Dedicated rescue access point device

use super::parameters::{common_parameters, string_value, validate_address, Configurable, Parameter};
use super::{check_record, Credentials, InterfaceContext, InterfaceCore};
use crate::config::ApConfig;
use crate::controller::adapter::{CommandAdapter, HostCommand, HotspotSpec, LiveAddress};
use crate::controller::error::{InterfaceError, InterfaceResult};
use crate::controller::state::{ApMode, InterfaceKind, InterfaceRecord};
use crate::controller::status::StatusSink;
use serde_json::Value;

#[derive(Debug)]
pub struct ApInterface {
    core: InterfaceCore,
    mode: ApMode,
    credentials: Credentials,
    phy: String,
    mac: Option<String>,
    ip_forward: bool,
}

fn get_ssid(iface: &ApInterface) -> Value {
    Value::from(iface.credentials.ssid.as_str())
}

fn set_ssid(iface: &mut ApInterface, value: Value) -> InterfaceResult<()> {
    iface.credentials.ssid = string_value("ssid", value)?;
    Ok(())
}

fn get_passphrase(iface: &ApInterface) -> Value {
    Value::from(iface.credentials.passphrase.as_str())
}

fn set_passphrase(iface: &mut ApInterface, value: Value) -> InterfaceResult<()> {
    iface.credentials.passphrase = string_value("passphrase", value)?;
    Ok(())
}

/// Delete every profile bound to `device` or named `hotspot`; failures are logged
async fn remove_profiles<A: CommandAdapter>(adapter: &A, device: &str, hotspot: &str) -> InterfaceResult<()> {
    let profiles = adapter.profiles().await?;
    for profile in profiles
        .iter()
        .filter(|p| p.name == hotspot || p.device.as_deref() == Some(device))
    {
        if let Err(e) = adapter.delete_profile(&profile.uuid).await {
            tracing::warn!(device, profile = %profile.name, error = %e, "Failed to delete profile");
        }
    }
    Ok(())
}

impl ApInterface {
    pub fn new(config: &ApConfig, sink: StatusSink) -> Self {
        Self {
            core: InterfaceCore::new(&config.device, &config.ip, &config.mask, &config.gateway, sink),
            mode: config.connection_type,
            credentials: Credentials::new(&config.ssid, &config.passphrase),
            phy: config.phy.clone(),
            mac: config.mac.clone(),
            ip_forward: config.ip_forward,
        }
    }

    pub fn is_access_point(&self) -> bool {
        self.mode == ApMode::AccessPoint
    }

    pub(super) fn enter_access_point(&mut self, rescue: &Credentials) {
        self.mode = ApMode::AccessPoint;
        self.credentials = rescue.clone();
    }

    fn hotspot_name(&self) -> String {
        format!("hotspot-{}", self.core.device)
    }

    /// Materialise the virtual device if needed and bring its link up
    pub(super) async fn initialise<A: CommandAdapter>(&mut self, adapter: &A, recover_mode: bool) -> InterfaceResult<()> {
        let device = self.core.device.clone();

        let devices = adapter.devices().await?;
        if !devices.iter().any(|d| d.name == device) {
            tracing::info!(device = %device, phy = %self.phy, "Creating access point device");
            adapter
                .host(HostCommand::AddApInterface {
                    phy: self.phy.clone(),
                    device: device.clone(),
                })
                .await?;
        }
        if self.ip_forward {
            adapter.host(HostCommand::IpForward(true)).await?;
        }
        if let Some(mac) = &self.mac {
            adapter
                .host(HostCommand::SetMac {
                    device: device.clone(),
                    mac: mac.clone(),
                })
                .await?;
        }
        adapter.host(HostCommand::LinkUp(device.clone())).await?;

        if recover_mode {
            let hotspot = self.hotspot_name();
            let profiles = adapter.profiles().await?;
            if profiles.iter().any(|p| p.name == hotspot && p.autoconnect) {
                self.mode = ApMode::AccessPoint;
            }
        }
        Ok(())
    }

    pub(super) async fn apply<A: CommandAdapter>(&mut self, adapter: &A, ctx: &InterfaceContext) -> InterfaceResult<String> {
        let device = self.core.device.as_str();
        let hotspot = self.hotspot_name();

        if self.mode == ApMode::Disabled {
            remove_profiles(adapter, device, &hotspot).await?;
            return Ok("disabled".to_string());
        }

        self.credentials.require("access point")?;
        let spec = HotspotSpec {
            name: hotspot.clone(),
            device: device.to_string(),
            ssid: self.credentials.ssid.clone(),
            passphrase: self.credentials.passphrase.clone(),
        };
        let (hotspot, spec) = (hotspot.as_str(), &spec);
        ctx.retry(device, "Access point activation", || async move {
            remove_profiles(adapter, device, hotspot).await?;
            ctx.pause().await?;
            adapter.hotspot(spec).await?;
            adapter
                .modify_profile(
                    hotspot,
                    &[
                        ("ipv4.method", "shared".to_string()),
                        ("connection.autoconnect", "yes".to_string()),
                    ],
                )
                .await?;
            Ok::<_, InterfaceError>(())
        })
        .await?;

        Ok(format!("access point {} active", spec.ssid))
    }

    pub(super) async fn observe<A: CommandAdapter>(&mut self, _adapter: &A, live: &LiveAddress) -> InterfaceResult<()> {
        if self.mode == ApMode::AccessPoint {
            self.core.observe(live);
        }
        Ok(())
    }

    pub(super) fn to_record(&self) -> InterfaceRecord {
        InterfaceRecord {
            kind: Some(InterfaceKind::AccessPoint),
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
            InterfaceKind::AccessPoint,
            record,
            &["connection_type", "ip", "mask", "gateway", "ssid", "passphrase"],
        )?;
        let mode: ApMode = record.connection_type.as_deref().unwrap_or_default().parse()?;
        let ip = record.ip.clone().unwrap_or_default();
        let mask = record.mask.clone().unwrap_or_default();
        let gateway = record.gateway.clone().unwrap_or_default();
        if mode == ApMode::AccessPoint {
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

impl Configurable for ApInterface {
    const KIND: InterfaceKind = InterfaceKind::AccessPoint;
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
        self.mode != ApMode::AccessPoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::adapter::fake::FakeAdapter;
    use crate::controller::adapter::DeviceKind;
    use crate::controller::interface::test_support::wrap;
    use crate::controller::interface::{InterfaceVariant, NetworkInterface};
    use std::sync::Arc;

    fn uap0(fake: &Arc<FakeAdapter>) -> NetworkInterface<FakeAdapter> {
        let iface = ApInterface::new(&ApConfig::default(), StatusSink::default());
        wrap(InterfaceVariant::AccessPoint(iface), fake)
    }

    #[tokio::test]
    async fn test_initialise_materialises_missing_device() {
        let fake = Arc::new(FakeAdapter::new());
        uap0(&fake).initialise(false).await.unwrap();

        let commands = fake.state().host_commands.clone();
        assert_eq!(
            commands,
            vec![
                HostCommand::AddApInterface {
                    phy: "phy0".to_string(),
                    device: "uap0".to_string(),
                },
                HostCommand::IpForward(true),
                HostCommand::SetMac {
                    device: "uap0".to_string(),
                    mac: "00:11:22:33:44:55".to_string(),
                },
                HostCommand::LinkUp("uap0".to_string()),
            ]
        );

        let fake = Arc::new(FakeAdapter::with_devices(&[("uap0", DeviceKind::AccessPoint)]));
        uap0(&fake).initialise(false).await.unwrap();
        assert_eq!(fake.count_calls("host AddApInterface"), 0);
    }

    #[tokio::test]
    async fn test_double_activation_failure_keeps_desired_mode() {
        let fake = Arc::new(FakeAdapter::new());
        fake.state().fail_hotspot = true;
        let iface = uap0(&fake);

        let rescue = Credentials::new("ConfigurationAP", "configure-network");
        assert!(iface.engage_rescue_ap(&rescue).await.unwrap());

        assert_eq!(fake.count_calls("hotspot "), 2);
        let status = iface.status().await;
        assert!(status.is_error);
        assert!(status.message.contains("injected failure"));
        assert_eq!(status.connection_type, "ap");
        assert!(status.update_pending);
        assert!(iface.access_point_active().await);
    }

    #[tokio::test]
    async fn test_activation_replaces_stale_hotspot() {
        let fake = Arc::new(FakeAdapter::new());
        let stale = fake.seed_profile("hotspot-uap0", "uap0", false, false);
        let iface = uap0(&fake);
        iface.set_param("connection_type", "ap".into()).await.unwrap();

        iface.reload().await.unwrap();

        assert!(fake.calls().contains(&format!("delete {}", stale)));
        let hotspot = fake.profile("hotspot-uap0").unwrap();
        assert_ne!(hotspot.uuid, stale);
        assert!(hotspot.active);
        assert!(hotspot.autoconnect);
        assert_eq!(hotspot.settings["ipv4.method"], "shared");
        assert_eq!(hotspot.settings["ssid"], "ConfigurationAP");

        let status = iface.status().await;
        assert!(!status.is_error, "{}", status.message);
        assert_eq!(status.message, "access point ConfigurationAP active");
    }

    #[tokio::test]
    async fn test_disable_tears_down_bound_profiles() {
        let fake = Arc::new(FakeAdapter::new());
        fake.seed_profile("hotspot-uap0", "uap0", true, false);
        fake.seed_profile("leftover", "uap0", false, true);
        fake.seed_profile("Office", "wlan0", true, true);
        let iface = uap0(&fake);
        iface.initialise(true).await.unwrap();
        assert!(iface.access_point_active().await);

        assert!(iface.disable().await.unwrap());

        assert_eq!(fake.profiles_named("hotspot-uap0"), 0);
        assert_eq!(fake.profiles_named("leftover"), 0);
        assert_eq!(fake.profiles_named("Office"), 1);
        assert!(!iface.disable().await.unwrap());
    }

    #[tokio::test]
    async fn test_record_requires_and_checks_addressing() {
        let fake = Arc::new(FakeAdapter::new());
        let iface = uap0(&fake);
        let before = iface.get_config().await;

        let record = InterfaceRecord {
            ip: None,
            gateway: None,
            ..before.clone()
        };
        let err = iface.load_config(&record, true).await.unwrap_err();
        assert!(matches!(err, InterfaceError::ConfigurationIncomplete { field: "ip", .. }));

        let record = InterfaceRecord {
            connection_type: Some("ap".to_string()),
            mask: Some("255.0.255.0".to_string()),
            ..before.clone()
        };
        let err = iface.load_config(&record, true).await.unwrap_err();
        assert!(matches!(err, InterfaceError::InvalidValue { .. }));

        assert_eq!(iface.get_config().await, before);
        assert!(fake.calls().is_empty());
    }
}
