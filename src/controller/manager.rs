//! Interface discovery, desired-state persistence and the operator-facing API

use super::adapter::{CommandAdapter, DeviceKind};
use super::error::{InterfaceError, InterfaceResult};
use super::interface::{
    ApInterface, EthernetInterface, InterfaceContext, InterfaceVariant, NetworkInterface,
    WiFiInterface,
};
use super::state::{ApplyReport, ConfigDocument, ConnectivitySnapshot, InterfaceKind, InterfaceRecord, StatusSnapshot};
use super::status::StatusSink;
use super::store::{ConfigStore, LoadedDocument};
use crate::config::{ApConfig, Config};
use futures::future::join_all;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

/// Owns every managed interface, in discovery order
pub struct InterfaceManager<A> {
    interfaces: Vec<NetworkInterface<A>>,
    /// Index of the interface playing the rescue-AP role
    ap_index: Option<usize>,
    store: ConfigStore,
    /// Serialises writers of the store's temporary file
    persist_lock: Mutex<()>,
    connectivity: watch::Receiver<ConnectivitySnapshot>,
    hide_ap: bool,
}

impl<A: CommandAdapter> InterfaceManager<A> {
    /// Enumerate OS devices and bind a state machine to each managed one
    pub async fn discover(
        adapter: Arc<A>,
        config: &Config,
        sink: StatusSink,
        ctx: InterfaceContext,
        store: ConfigStore,
        connectivity: watch::Receiver<ConnectivitySnapshot>,
    ) -> InterfaceResult<Self> {
        let dedicated_ap = config.ap.use_dedicated_ap;
        let mut variants = Vec::new();
        let mut ap_index = None;

        for device in adapter.devices().await? {
            let is_ap = device.kind == DeviceKind::AccessPoint && dedicated_ap;
            if !is_ap && !config.interfaces.allows(&device.name) {
                tracing::debug!(device = %device.name, "Not in allow-list, skipping");
                continue;
            }

            let variant = match device.kind {
                DeviceKind::Ethernet => {
                    InterfaceVariant::Ethernet(EthernetInterface::new(&device.name, &config.ethernet, sink.clone()))
                }
                DeviceKind::AccessPoint if dedicated_ap => {
                    if ap_index.is_some() {
                        tracing::warn!(device = %device.name, "Access point role already taken, skipping");
                        continue;
                    }
                    ap_index = Some(variants.len());
                    let ap_config = ApConfig {
                        device: device.name.clone(),
                        ..config.ap.clone()
                    };
                    InterfaceVariant::AccessPoint(ApInterface::new(&ap_config, sink.clone()))
                }
                DeviceKind::WiFi | DeviceKind::AccessPoint => {
                    if !dedicated_ap && ap_index.is_none() {
                        ap_index = Some(variants.len());
                    }
                    InterfaceVariant::WiFi(WiFiInterface::new(&device.name, &config.wifi, sink.clone()))
                }
                DeviceKind::Other(kind) => {
                    tracing::debug!(device = %device.name, kind = %kind, "Unmanaged device kind, skipping");
                    continue;
                }
            };
            tracing::info!(device = %device.name, kind = %variant.kind(), "Discovered interface");
            variants.push(variant);
        }

        if dedicated_ap && ap_index.is_none() {
            tracing::info!(device = %config.ap.device, "Access point device not present, will be created");
            ap_index = Some(variants.len());
            variants.push(InterfaceVariant::AccessPoint(ApInterface::new(&config.ap, sink.clone())));
        }
        if ap_index.is_none() {
            tracing::warn!("No interface can take the access point role");
        }

        let interfaces = variants
            .into_iter()
            .map(|v| NetworkInterface::new(v, adapter.clone(), ctx.clone()))
            .collect();

        Ok(Self {
            interfaces,
            ap_index,
            store,
            persist_lock: Mutex::new(()),
            connectivity,
            hide_ap: config.ap.hide_in_ui,
        })
    }

    /// Restore the persisted desired state, then set up every interface.
    ///
    /// A missing or unreadable document falls back to built-in defaults.
    pub async fn initialise(&self) -> InterfaceResult<()> {
        let loaded = self.store.load().unwrap_or_else(|e| {
            tracing::warn!(path = %self.store.path().display(), error = %e, "Persisted configuration unreadable, using defaults");
            LoadedDocument::default()
        });
        for (device, reason) in &loaded.rejected {
            tracing::warn!(device = %device, reason = %reason, "Ignoring invalid persisted record");
        }

        for iface in &self.interfaces {
            let restored = match loaded.records.get(iface.device()) {
                Some(record) => match iface.load_config(record, false).await {
                    Ok(_) => true,
                    Err(e) => {
                        tracing::warn!(device = %iface.device(), error = %e, "Persisted record rejected, using defaults");
                        false
                    }
                },
                None => false,
            };

            if let Err(e) = iface.initialise(!restored).await {
                tracing::error!(device = %iface.device(), error = %e, "Failed to initialise interface");
            }
        }

        self.persist().await
    }

    pub fn interfaces(&self) -> &[NetworkInterface<A>] {
        &self.interfaces
    }

    pub fn interface(&self, device: &str) -> InterfaceResult<&NetworkInterface<A>> {
        self.interfaces
            .iter()
            .find(|i| i.device() == device)
            .ok_or_else(|| InterfaceError::DeviceNotFound(device.to_string()))
    }

    pub fn ap_interface(&self) -> Option<&NetworkInterface<A>> {
        self.ap_index.and_then(|i| self.interfaces.get(i))
    }

    /// Devices shown to operators; the dedicated AP can be hidden
    pub fn visible_devices(&self) -> Vec<(String, InterfaceKind)> {
        self.interfaces
            .iter()
            .filter(|i| !(self.hide_ap && i.kind() == InterfaceKind::AccessPoint))
            .map(|i| (i.device().to_string(), i.kind()))
            .collect()
    }

    pub fn connectivity(&self) -> ConnectivitySnapshot {
        self.connectivity.borrow().clone()
    }

    /// Write the current desired state of every interface to the store
    pub async fn persist(&self) -> InterfaceResult<()> {
        let _guard = self.persist_lock.lock().await;
        let document = self.get_config().await;
        self.store.save(&document)?;
        Ok(())
    }

    pub async fn get_config(&self) -> ConfigDocument {
        let mut document = ConfigDocument::new();
        for iface in &self.interfaces {
            document.insert(iface.device().to_string(), iface.get_config().await);
        }
        document
    }

    /// Apply a whole document; each device succeeds or fails on its own
    pub async fn load_config(&self, document: &ConfigDocument) -> InterfaceResult<ApplyReport> {
        let mut report = ApplyReport::default();
        for (device, record) in document {
            let result = match self.interface(device) {
                Ok(iface) => iface.load_config(record, true).await.map(|_| ()),
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => report.applied.push(device.clone()),
                Err(e) => {
                    tracing::warn!(device = %device, error = %e, "Configuration rejected");
                    report.failed.insert(device.clone(), e.to_string());
                }
            }
        }
        self.persist().await?;
        Ok(report)
    }

    pub async fn get_interface_config(&self, device: &str) -> InterfaceResult<InterfaceRecord> {
        Ok(self.interface(device)?.get_config().await)
    }

    pub async fn load_interface_config(&self, device: &str, record: &InterfaceRecord) -> InterfaceResult<bool> {
        let changed = self.interface(device)?.load_config(record, true).await?;
        if changed {
            self.persist().await?;
        }
        Ok(changed)
    }

    pub async fn get_status(&self) -> BTreeMap<String, StatusSnapshot> {
        let mut status = BTreeMap::new();
        for iface in &self.interfaces {
            status.insert(iface.device().to_string(), iface.status().await);
        }
        status
    }

    pub async fn get_param(&self, device: &str, name: &str) -> InterfaceResult<Value> {
        self.interface(device)?.get_param(name).await
    }

    /// Write one parameter; the change is applied on the next refresh
    pub async fn set_param(&self, device: &str, name: &str, value: Value) -> InterfaceResult<()> {
        self.interface(device)?.set_param(name, value).await?;
        self.persist().await
    }

    pub async fn parameter_names(&self, device: &str) -> InterfaceResult<Vec<&'static str>> {
        Ok(self.interface(device)?.parameter_names().await)
    }

    pub async fn scan(&self, device: &str) -> InterfaceResult<BTreeSet<String>> {
        self.interface(device)?.scan().await
    }

    /// Reload every interface concurrently
    pub async fn reload_all(&self) -> ApplyReport {
        let results = join_all(self.interfaces.iter().map(|i| async move { (i.device(), i.reload().await) })).await;

        let mut report = ApplyReport::default();
        for (device, result) in results {
            match result {
                Ok(()) => report.applied.push(device.to_string()),
                Err(e) => {
                    report.failed.insert(device.to_string(), e.to_string());
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::adapter::fake::FakeAdapter;
    use crate::controller::interface::test_support::ctx;
    use serde_json::json;
    use tempfile::{tempdir, TempDir};

    async fn manager_with(
        fake: &Arc<FakeAdapter>,
        config: &Config,
        dir: &TempDir,
    ) -> InterfaceManager<FakeAdapter> {
        let store = ConfigStore::open(dir.path().join("interfaces.json")).unwrap();
        let (_tx, rx) = watch::channel(ConnectivitySnapshot::default());
        InterfaceManager::discover(fake.clone(), config, StatusSink::default(), ctx(), store, rx)
            .await
            .unwrap()
    }

    fn devices(manager: &InterfaceManager<FakeAdapter>) -> Vec<(String, InterfaceKind)> {
        manager
            .interfaces()
            .iter()
            .map(|i| (i.device().to_string(), i.kind()))
            .collect()
    }

    #[tokio::test]
    async fn test_discovery_keeps_first_access_point() {
        let fake = Arc::new(FakeAdapter::with_devices(&[
            ("eth0", DeviceKind::Ethernet),
            ("wlan0", DeviceKind::WiFi),
            ("uap0", DeviceKind::AccessPoint),
            ("uap1", DeviceKind::AccessPoint),
            ("lo", DeviceKind::Other("loopback".to_string())),
        ]));
        let dir = tempdir().unwrap();
        let manager = manager_with(&fake, &Config::default(), &dir).await;

        assert_eq!(
            devices(&manager),
            vec![
                ("eth0".to_string(), InterfaceKind::Ethernet),
                ("wlan0".to_string(), InterfaceKind::WiFi),
                ("uap0".to_string(), InterfaceKind::AccessPoint),
            ]
        );
        assert_eq!(manager.ap_interface().unwrap().device(), "uap0");
        assert_eq!(manager.visible_devices().len(), 2);
    }

    #[tokio::test]
    async fn test_discovery_synthesises_missing_access_point() {
        let fake = Arc::new(FakeAdapter::with_devices(&[
            ("eth0", DeviceKind::Ethernet),
            ("wlan0", DeviceKind::WiFi),
        ]));
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.interfaces.use_allow_list = true;
        config.interfaces.allow_list = vec!["eth0".to_string()];
        let manager = manager_with(&fake, &config, &dir).await;

        assert_eq!(
            devices(&manager),
            vec![
                ("eth0".to_string(), InterfaceKind::Ethernet),
                ("uap0".to_string(), InterfaceKind::AccessPoint),
            ]
        );
        assert_eq!(manager.ap_interface().unwrap().device(), "uap0");
    }

    #[tokio::test]
    async fn test_discovery_without_dedicated_ap_uses_first_wifi() {
        let fake = Arc::new(FakeAdapter::with_devices(&[
            ("eth0", DeviceKind::Ethernet),
            ("wlan0", DeviceKind::WiFi),
            ("wlan1", DeviceKind::WiFi),
        ]));
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.ap.use_dedicated_ap = false;
        let manager = manager_with(&fake, &config, &dir).await;

        assert_eq!(manager.interfaces().len(), 3);
        assert_eq!(manager.ap_interface().unwrap().device(), "wlan0");
    }

    #[tokio::test]
    async fn test_initialise_without_store_creates_it() {
        let fake = Arc::new(FakeAdapter::with_devices(&[("eth0", DeviceKind::Ethernet)]));
        let dir = tempdir().unwrap();
        let manager = manager_with(&fake, &Config::default(), &dir).await;

        manager.initialise().await.unwrap();

        let store = ConfigStore::open(dir.path().join("interfaces.json")).unwrap();
        let saved = store.load().unwrap().records;
        assert_eq!(saved.len(), 2);
        assert_eq!(saved["eth0"].connection_type.as_deref(), Some("dynamic_ip"));
        assert_eq!(saved["uap0"].kind, Some(InterfaceKind::AccessPoint));
    }

    #[tokio::test]
    async fn test_initialise_tolerates_corrupt_store() {
        let fake = Arc::new(FakeAdapter::with_devices(&[("eth0", DeviceKind::Ethernet)]));
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("interfaces.json"), "{ truncated").unwrap();
        let manager = manager_with(&fake, &Config::default(), &dir).await;

        manager.initialise().await.unwrap();

        let store = ConfigStore::open(dir.path().join("interfaces.json")).unwrap();
        assert_eq!(store.load().unwrap().records.len(), 2);
    }

    #[tokio::test]
    async fn test_initialise_applies_valid_records_only() {
        let fake = Arc::new(FakeAdapter::with_devices(&[
            ("eth0", DeviceKind::Ethernet),
            ("wlan0", DeviceKind::WiFi),
        ]));
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("interfaces.json"),
            r#"{
                "eth0": {"type": "ethernet", "connection_type": "static_ip", "ip": "10.0.0.2",
                         "mask": "255.255.255.0", "route": "10.0.0.1"},
                "wlan0": {"type": "wifi", "connection_type": "hover"}
            }"#,
        )
        .unwrap();
        let manager = manager_with(&fake, &Config::default(), &dir).await;

        manager.initialise().await.unwrap();

        let eth0 = manager.get_interface_config("eth0").await.unwrap();
        assert_eq!(eth0.connection_type.as_deref(), Some("static_ip"));
        assert_eq!(eth0.gateway.as_deref(), Some("10.0.0.1"));

        // wlan0 fell back to recovery: no profiles existed, so it hosts the hotspot.
        let wlan0 = manager.get_interface_config("wlan0").await.unwrap();
        assert_eq!(wlan0.connection_type.as_deref(), Some("ap"));
        assert!(manager.get_status().await["eth0"].update_pending);
    }

    #[tokio::test]
    async fn test_load_config_reports_per_device() {
        let fake = Arc::new(FakeAdapter::with_devices(&[("eth0", DeviceKind::Ethernet)]));
        let dir = tempdir().unwrap();
        let manager = manager_with(&fake, &Config::default(), &dir).await;
        manager.initialise().await.unwrap();

        let mut document = manager.get_config().await;
        document.get_mut("eth0").unwrap().connection_type = Some("disabled".to_string());
        document.insert("eth9".to_string(), InterfaceRecord::default());

        let report = manager.load_config(&document).await.unwrap();
        assert!(report.applied.contains(&"eth0".to_string()));
        assert!(report.failed["eth9"].contains("device not found"));
        assert!(!report.is_ok());

        let store = ConfigStore::open(dir.path().join("interfaces.json")).unwrap();
        let saved = store.load().unwrap().records;
        assert_eq!(saved["eth0"].connection_type.as_deref(), Some("disabled"));
    }

    #[tokio::test]
    async fn test_set_param_persists_and_defers() {
        let fake = Arc::new(FakeAdapter::with_devices(&[("wlan0", DeviceKind::WiFi)]));
        let dir = tempdir().unwrap();
        let manager = manager_with(&fake, &Config::default(), &dir).await;

        manager.set_param("wlan0", "ssid", json!("Workshop")).await.unwrap();
        assert_eq!(manager.get_param("wlan0", "ssid").await.unwrap(), json!("Workshop"));
        assert!(manager.get_status().await["wlan0"].update_pending);
        assert_eq!(fake.count_calls("associate"), 0);

        let store = ConfigStore::open(dir.path().join("interfaces.json")).unwrap();
        assert_eq!(store.load().unwrap().records["wlan0"].ssid.as_deref(), Some("Workshop"));

        let err = manager.get_param("wlan9", "ssid").await.unwrap_err();
        assert!(matches!(err, InterfaceError::DeviceNotFound(_)));
    }
}
