//! Wired interface: static address, DHCP client or DHCP server

use super::parameters::{common_parameters, validate_address, Configurable, Parameter};
use super::{check_record, InterfaceContext, InterfaceCore};
use crate::config::EthernetConfig;
use crate::controller::adapter::{CommandAdapter, LiveAddress, ProfileSpec};
use crate::controller::addr::mask_to_prefix;
use crate::controller::error::InterfaceResult;
use crate::controller::state::{EthernetMode, InterfaceKind, InterfaceRecord};
use crate::controller::status::StatusSink;

/// Modes backed by a permanent profile, one each
const PROFILE_ROLES: [EthernetMode; 3] = [
    EthernetMode::StaticIp,
    EthernetMode::DynamicIp,
    EthernetMode::DhcpServer,
];

#[derive(Debug)]
pub struct EthernetInterface {
    core: InterfaceCore,
    mode: EthernetMode,
    dns: String,
    /// Address the DHCP-server profile is seeded with on creation
    seed: (String, String, String),
}

impl EthernetInterface {
    pub fn new(device: &str, config: &EthernetConfig, sink: StatusSink) -> Self {
        Self {
            core: InterfaceCore::new(device, &config.ip, &config.mask, &config.gateway, sink),
            mode: config.connection_type,
            dns: config.static_dns.clone(),
            seed: (
                config.ip.clone(),
                config.mask.clone(),
                config.gateway.clone(),
            ),
        }
    }

    fn profile_name(&self, role: EthernetMode) -> Option<String> {
        let prefix = match role {
            EthernetMode::Disabled => return None,
            EthernetMode::StaticIp => "static-ip",
            EthernetMode::DynamicIp => "dynamic-ip",
            EthernetMode::DhcpServer => "dhcp-server",
        };
        Some(format!("{}-{}", prefix, self.core.device))
    }

    fn cidr(ip: &str, mask: &str) -> InterfaceResult<String> {
        validate_address("ip", ip)?;
        Ok(format!("{}/{}", ip, mask_to_prefix(mask)?))
    }

    /// Make sure the three role profiles exist exactly once
    pub(super) async fn initialise<A: CommandAdapter>(
        &mut self,
        adapter: &A,
        ctx: &InterfaceContext,
        recover_mode: bool,
    ) -> InterfaceResult<()> {
        let profiles = adapter.profiles().await?;
        let mut recovered = None;

        for role in PROFILE_ROLES {
            let Some(name) = self.profile_name(role) else {
                continue;
            };
            let matching: Vec<_> = profiles.iter().filter(|p| p.name == name).collect();

            let Some((_, duplicates)) = matching.split_first() else {
                tracing::info!(device = %self.core.device, profile = %name, "Creating profile");
                adapter
                    .add_profile(&ProfileSpec {
                        name: name.clone(),
                        conn_type: "ethernet",
                        device: self.core.device.clone(),
                        autoconnect: false,
                        ssid: None,
                    })
                    .await?;
                if role == EthernetMode::DhcpServer {
                    let (ip, mask, gateway) = &self.seed;
                    adapter
                        .modify_profile(
                            &name,
                            &[
                                ("ipv4.method", "shared".to_string()),
                                ("ipv4.addresses", Self::cidr(ip, mask)?),
                                ("ipv4.gateway", gateway.clone()),
                            ],
                        )
                        .await?;
                }
                continue;
            };

            for duplicate in duplicates {
                tracing::warn!(device = %self.core.device, profile = %name, uuid = %duplicate.uuid, "Deleting duplicate profile");
                adapter
                    .profile_down(&duplicate.uuid, ctx.connection_wait, true)
                    .await?;
                adapter.delete_profile(&duplicate.uuid).await?;
            }
            if recovered.is_none() && matching.iter().any(|p| p.autoconnect) {
                recovered = Some(role);
            }
        }

        if recover_mode {
            if let Some(mode) = recovered {
                tracing::info!(device = %self.core.device, mode = %mode, "Recovered active mode from profiles");
                self.mode = mode;
            }
        }
        Ok(())
    }

    pub(super) async fn apply<A: CommandAdapter>(&mut self, adapter: &A, ctx: &InterfaceContext) -> InterfaceResult<String> {
        let cidr = match self.mode {
            EthernetMode::StaticIp | EthernetMode::DhcpServer => {
                validate_address("gateway", &self.core.gateway)?;
                Some(Self::cidr(&self.core.ip, &self.core.mask)?)
            }
            _ => None,
        };

        for role in PROFILE_ROLES.into_iter().filter(|r| *r != self.mode) {
            let Some(name) = self.profile_name(role) else {
                continue;
            };
            adapter
                .modify_profile(&name, &[("connection.autoconnect", "no".to_string())])
                .await?;
            adapter
                .profile_down(&name, ctx.connection_wait, true)
                .await?;
        }

        let Some(target) = self.profile_name(self.mode) else {
            return Ok("disabled".to_string());
        };
        let gateway = self.core.gateway.clone();
        let options = match (self.mode, cidr) {
            (EthernetMode::StaticIp, Some(cidr)) => vec![
                ("ipv4.method", "manual".to_string()),
                ("ipv4.addresses", cidr),
                ("ipv4.gateway", gateway),
                ("ipv4.dns", self.dns.clone()),
                ("ipv6.method", "disabled".to_string()),
                ("connection.autoconnect", "yes".to_string()),
            ],
            (EthernetMode::DhcpServer, Some(cidr)) => vec![
                ("ipv6.method", "disabled".to_string()),
                ("ipv4.method", "shared".to_string()),
                ("ipv4.addresses", cidr),
                ("ipv4.gateway", gateway),
                ("connection.autoconnect", "yes".to_string()),
            ],
            _ => vec![
                ("ipv4.method", "auto".to_string()),
                ("ipv6.method", "auto".to_string()),
                ("connection.autoconnect", "yes".to_string()),
            ],
        };
        adapter.modify_profile(&target, &options).await?;
        adapter.profile_up(&target, ctx.connection_wait).await?;

        Ok(format!("{} active", target))
    }

    /// Static and DHCP-server addressing is authoritative, only DHCP is observed
    pub(super) async fn observe<A: CommandAdapter>(&mut self, _adapter: &A, live: &LiveAddress) -> InterfaceResult<()> {
        if self.mode == EthernetMode::DynamicIp {
            self.core.observe(live);
        }
        Ok(())
    }

    pub(super) fn to_record(&self) -> InterfaceRecord {
        InterfaceRecord {
            kind: Some(InterfaceKind::Ethernet),
            connection_type: Some(self.mode.to_string()),
            ip: Some(self.core.ip.clone()),
            mask: Some(self.core.mask.clone()),
            gateway: Some(self.core.gateway.clone()),
            ssid: None,
            passphrase: None,
        }
    }

    pub(super) fn apply_record(&mut self, record: &InterfaceRecord) -> InterfaceResult<()> {
        check_record(
            &self.core.device,
            InterfaceKind::Ethernet,
            record,
            &["connection_type", "ip", "mask", "gateway"],
        )?;
        let mode: EthernetMode = record.connection_type.as_deref().unwrap_or_default().parse()?;
        let ip = record.ip.clone().unwrap_or_default();
        let mask = record.mask.clone().unwrap_or_default();
        let gateway = record.gateway.clone().unwrap_or_default();
        if matches!(mode, EthernetMode::StaticIp | EthernetMode::DhcpServer) {
            Self::cidr(&ip, &mask)?;
            validate_address("gateway", &gateway)?;
        }

        self.mode = mode;
        self.core.ip = ip;
        self.core.mask = mask;
        self.core.gateway = gateway;
        Ok(())
    }
}

impl Configurable for EthernetInterface {
    const KIND: InterfaceKind = InterfaceKind::Ethernet;
    const PARAMETERS: &'static [Parameter<Self>] = common_parameters!();

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
        self.mode == EthernetMode::DynamicIp
    }
}
