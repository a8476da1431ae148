//! Shared state types for the interface controller

use super::error::InterfaceError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of network interface a state machine manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterfaceKind {
    #[serde(rename = "ethernet")]
    Ethernet,
    #[serde(rename = "wifi")]
    WiFi,
    #[serde(rename = "ap")]
    AccessPoint,
}

impl InterfaceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            InterfaceKind::Ethernet => "ethernet",
            InterfaceKind::WiFi => "wifi",
            InterfaceKind::AccessPoint => "ap",
        }
    }
}

impl std::fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! connection_types {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = InterfaceError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok($name::$variant),)+
                    other => Err(InterfaceError::InvalidConnectionType {
                        value: other.to_string(),
                        expected: [$($text),+].join(", "),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

connection_types! {
    /// Modes of a wired interface
    EthernetMode {
        Disabled => "disabled",
        StaticIp => "static_ip",
        DynamicIp => "dynamic_ip",
        DhcpServer => "dhcp_server",
    }
}

connection_types! {
    /// Modes of a wireless interface that can also act as a hotspot
    WiFiMode {
        Disabled => "disabled",
        Station => "station",
        AccessPoint => "ap",
    }
}

connection_types! {
    /// Modes of the dedicated rescue access point device
    ApMode {
        Disabled => "disabled",
        AccessPoint => "ap",
    }
}

/// Desired configuration of one interface as stored and exchanged over the API.
///
/// Every field is optional on input so that a record with missing fields can be
/// reported as incomplete instead of failing the whole document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfaceRecord {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<InterfaceKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<String>,
    #[serde(
        default,
        alias = "route",
        skip_serializing_if = "Option::is_none"
    )]
    pub gateway: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
}

/// Device identifier to desired configuration
pub type ConfigDocument = BTreeMap<String, InterfaceRecord>;

/// Status of one interface as reported to operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub message: String,
    pub is_error: bool,
    pub live_state: String,
    pub connection_type: String,
    pub update_pending: bool,
}

/// Aggregate connectivity published by the failover loop
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivitySnapshot {
    pub connected: bool,
    pub disconnected_for_secs: Option<u64>,
    pub ap_device: Option<String>,
    pub ap_active: bool,
    pub ticks: u64,
}

/// Outcome of applying a configuration document to several interfaces
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyReport {
    pub applied: Vec<String>,
    pub failed: BTreeMap<String, String>,
}

impl ApplyReport {
    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }
}
