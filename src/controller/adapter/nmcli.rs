//! [`CommandAdapter`] backed by NetworkManager's `nmcli` plus `ip`, `iw` and `sysctl`

use super::runner::CommandRunner;
use super::{
    CommandAdapter, ConnectionProfile, Device, DeviceKind, HostCommand, HotspotSpec, LiveAddress,
    ProfileSpec,
};
use crate::controller::addr::prefix_to_mask;
use crate::controller::error::AdapterResult;
use std::collections::BTreeSet;
use std::time::Duration;

pub struct NmcliAdapter {
    runner: CommandRunner,
    dry_run: bool,
    /// Name of the dedicated AP device, reported as [`DeviceKind::AccessPoint`]
    ap_device: Option<String>,
}

impl NmcliAdapter {
    pub fn new(runner: CommandRunner, dry_run: bool, ap_device: Option<String>) -> Self {
        Self {
            runner,
            dry_run,
            ap_device,
        }
    }

    async fn query(&self, program: &str, args: &[&str]) -> AdapterResult<String> {
        self.runner.run(program, args).await
    }

    async fn mutate(&self, program: &str, args: &[&str]) -> AdapterResult<()> {
        if self.dry_run {
            tracing::info!(command = %format!("{} {}", program, args.join(" ")), "Dry run, skipping");
            return Ok(());
        }
        self.runner.run(program, args).await.map(|_| ())
    }

    /// Mutating call whose arguments carry a secret
    async fn mutate_sensitive(&self, program: &str, args: &[&str]) -> AdapterResult<()> {
        if self.dry_run {
            tracing::info!(command = %program, "Dry run, skipping");
            return Ok(());
        }
        self.runner.run_sensitive(program, args).await.map(|_| ())
    }
}

impl CommandAdapter for NmcliAdapter {
    async fn devices(&self) -> AdapterResult<Vec<Device>> {
        let out = self
            .query("nmcli", &["-t", "-f", "DEVICE,TYPE,STATE", "device", "status"])
            .await?;
        Ok(parse_devices(&out, self.ap_device.as_deref()))
    }

    async fn profiles(&self) -> AdapterResult<Vec<ConnectionProfile>> {
        let out = self
            .query(
                "nmcli",
                &["-t", "-f", "NAME,UUID,TYPE,DEVICE,AUTOCONNECT", "connection", "show"],
            )
            .await?;
        Ok(parse_profiles(&out))
    }

    async fn add_profile(&self, spec: &ProfileSpec) -> AdapterResult<()> {
        let mut args = vec![
            "connection",
            "add",
            "type",
            spec.conn_type,
            "con-name",
            spec.name.as_str(),
            "ifname",
            spec.device.as_str(),
            "autoconnect",
            yes_no(spec.autoconnect),
        ];
        if let Some(ssid) = &spec.ssid {
            args.extend(["ssid", ssid.as_str()]);
        }
        self.mutate("nmcli", &args).await
    }

    async fn modify_profile(&self, profile: &str, options: &[(&str, String)]) -> AdapterResult<()> {
        let mut args = vec!["connection", "modify", profile];
        let mut sensitive = false;
        for (key, value) in options {
            sensitive |= key.ends_with(".psk");
            args.push(*key);
            args.push(value.as_str());
        }
        if sensitive {
            self.mutate_sensitive("nmcli", &args).await
        } else {
            self.mutate("nmcli", &args).await
        }
    }

    async fn profile_up(&self, profile: &str, wait: Duration) -> AdapterResult<()> {
        let wait = wait.as_secs().to_string();
        self.mutate("nmcli", &["--wait", &wait, "connection", "up", profile])
            .await
    }

    async fn profile_down(&self, profile: &str, wait: Duration, ignore_failure: bool) -> AdapterResult<()> {
        let wait = wait.as_secs().to_string();
        match self
            .mutate("nmcli", &["--wait", &wait, "connection", "down", profile])
            .await
        {
            Err(e) if ignore_failure => {
                tracing::debug!(profile, error = %e, "Ignoring failure to bring profile down");
                Ok(())
            }
            other => other,
        }
    }

    async fn delete_profile(&self, profile: &str) -> AdapterResult<()> {
        self.mutate("nmcli", &["connection", "delete", profile]).await
    }

    async fn live_address(&self, device: &str) -> AdapterResult<LiveAddress> {
        let state = self
            .query("nmcli", &["-t", "-f", "GENERAL.STATE", "device", "show", device])
            .await?;
        let addr = self
            .query("ip", &["-4", "-o", "addr", "show", "dev", device])
            .await?;
        let route = self
            .query("ip", &["route", "show", "default", "dev", device])
            .await?;

        let mut live = parse_ip_addr(&addr);
        live.state = parse_general_state(&state);
        live.gateway = parse_default_gateway(&route);
        Ok(live)
    }

    async fn scan(&self, device: &str) -> AdapterResult<BTreeSet<String>> {
        let out = self
            .query(
                "nmcli",
                &["-t", "-f", "SSID", "device", "wifi", "list", "ifname", device, "--rescan", "yes"],
            )
            .await?;
        Ok(out
            .lines()
            .map(unescape_terse)
            .filter(|ssid| !ssid.is_empty())
            .collect())
    }

    async fn associate(&self, device: &str, ssid: &str, passphrase: &str, wait: Duration) -> AdapterResult<()> {
        let wait = wait.as_secs().to_string();
        self.mutate_sensitive(
            "nmcli",
            &[
                "--wait", &wait, "device", "wifi", "connect", ssid, "password", passphrase,
                "ifname", device,
            ],
        )
        .await
    }

    async fn hotspot(&self, spec: &HotspotSpec) -> AdapterResult<()> {
        self.mutate_sensitive(
            "nmcli",
            &[
                "device",
                "wifi",
                "hotspot",
                "con-name",
                &spec.name,
                "ifname",
                &spec.device,
                "ssid",
                &spec.ssid,
                "password",
                &spec.passphrase,
            ],
        )
        .await
    }

    async fn host(&self, command: HostCommand) -> AdapterResult<()> {
        match command {
            HostCommand::LinkUp(device) => {
                self.mutate("ip", &["link", "set", "dev", &device, "up"]).await
            }
            HostCommand::LinkDown(device) => {
                self.mutate("ip", &["link", "set", "dev", &device, "down"]).await
            }
            HostCommand::SetMac { device, mac } => {
                self.mutate("ip", &["link", "set", "dev", &device, "address", &mac])
                    .await
            }
            HostCommand::AddApInterface { phy, device } => {
                self.mutate("iw", &["phy", &phy, "interface", "add", &device, "type", "__ap"])
                    .await
            }
            HostCommand::IpForward(enabled) => {
                let setting = format!("net.ipv4.ip_forward={}", u8::from(enabled));
                self.mutate("sysctl", &["-w", &setting]).await
            }
        }
    }

    async fn linked_ssid(&self, device: &str) -> AdapterResult<Option<String>> {
        let out = self.query("iw", &["dev", device, "link"]).await?;
        Ok(parse_linked_ssid(&out))
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

/// Split one line of `nmcli -t` output on unescaped colons
fn split_terse(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            ':' => fields.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    fields.push(current);
    fields
}

fn unescape_terse(line: &str) -> String {
    split_terse(line).join(":")
}

fn parse_devices(out: &str, ap_device: Option<&str>) -> Vec<Device> {
    out.lines()
        .filter_map(|line| {
            let fields = split_terse(line);
            let name = fields.first().filter(|n| !n.is_empty())?.clone();
            let kind = match fields.get(1).map(String::as_str) {
                Some("ethernet") => DeviceKind::Ethernet,
                Some("wifi") if Some(name.as_str()) == ap_device => DeviceKind::AccessPoint,
                Some("wifi") => DeviceKind::WiFi,
                Some(other) => DeviceKind::Other(other.to_string()),
                None => DeviceKind::Other(String::new()),
            };
            Some(Device { name, kind })
        })
        .collect()
}

fn parse_profiles(out: &str) -> Vec<ConnectionProfile> {
    out.lines()
        .filter_map(|line| {
            let fields = split_terse(line);
            if fields.len() < 5 {
                return None;
            }
            let device = match fields[3].as_str() {
                "" | "--" => None,
                device => Some(device.to_string()),
            };
            Some(ConnectionProfile {
                name: fields[0].clone(),
                uuid: fields[1].clone(),
                device,
                autoconnect: fields[4] == "yes",
            })
        })
        .collect()
}

/// `GENERAL.STATE:100 (connected)` -> `connected`
fn parse_general_state(out: &str) -> String {
    let line = out.lines().next().unwrap_or_default();
    let value = line
        .strip_prefix("GENERAL.STATE:")
        .unwrap_or(line)
        .trim();
    match (value.find('('), value.rfind(')')) {
        (Some(start), Some(end)) if start < end => value[start + 1..end].to_string(),
        _ if value.is_empty() => "unknown".to_string(),
        _ => value.to_string(),
    }
}

/// First IPv4 address of `ip -4 -o addr show` output
fn parse_ip_addr(out: &str) -> LiveAddress {
    let mut live = LiveAddress::default();
    let Some(line) = out.lines().find(|l| l.contains(" inet ")) else {
        return live;
    };

    let mut tokens = line.split_whitespace();
    while let Some(token) = tokens.next() {
        match token {
            "inet" => {
                if let Some((address, prefix)) = tokens.next().and_then(|t| t.split_once('/')) {
                    live.address = Some(address.to_string());
                    live.mask = prefix.parse().ok().and_then(prefix_to_mask);
                }
            }
            "brd" => live.broadcast = tokens.next().map(str::to_string),
            _ => {}
        }
    }
    live
}

fn parse_default_gateway(out: &str) -> Option<String> {
    out.lines().find_map(|line| {
        let mut tokens = line.split_whitespace();
        tokens.find(|t| *t == "via")?;
        tokens.next().map(str::to_string)
    })
}

fn parse_linked_ssid(out: &str) -> Option<String> {
    out.lines()
        .find_map(|line| line.trim().strip_prefix("SSID:"))
        .map(|ssid| ssid.trim().to_string())
        .filter(|ssid| !ssid.is_empty())
}
