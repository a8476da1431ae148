//! Periodic health check and rescue access point failover
//!
//! A single task owns the aggregate connectivity state. Every period it
//! refreshes all interfaces and decides whether the AP-role interface must be
//! switched on (after the grace period without uplink) or off (as soon as an
//! uplink comes back). Other components only see the published snapshot.

use super::adapter::CommandAdapter;
use super::interface::Credentials;
use super::manager::InterfaceManager;
use super::state::ConnectivitySnapshot;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct FailoverPolicy {
    /// Continuous disconnection tolerated before the rescue AP is forced on
    pub grace: Duration,
    /// Never switch the AP role off on reconnect
    pub ap_always_on: bool,
    pub rescue: Credentials,
}

pub struct FailoverMonitor<A> {
    manager: Arc<InterfaceManager<A>>,
    policy: FailoverPolicy,
    connected: bool,
    last_disconnected_at: Instant,
    ticks: u64,
    tx: watch::Sender<ConnectivitySnapshot>,
}

impl<A: CommandAdapter> FailoverMonitor<A> {
    pub fn new(
        manager: Arc<InterfaceManager<A>>,
        policy: FailoverPolicy,
        tx: watch::Sender<ConnectivitySnapshot>,
    ) -> Self {
        Self {
            manager,
            policy,
            connected: true,
            last_disconnected_at: Instant::now(),
            ticks: 0,
            tx,
        }
    }

    /// One refresh-and-failover pass; never fails
    pub async fn tick(&mut self) {
        let interfaces = self.manager.interfaces();

        let results = join_all(interfaces.iter().map(|i| i.refresh())).await;
        for (iface, result) in interfaces.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(device = %iface.device(), error = %e, "Refresh failed");
            }
        }

        let mut connected = false;
        for iface in interfaces {
            connected |= iface.provides_uplink().await;
        }
        let now = Instant::now();
        let ap = self.manager.ap_interface();

        if connected && !self.connected {
            tracing::info!("Uplink connectivity restored");
            if let (Some(ap), false) = (ap, self.policy.ap_always_on) {
                // A WiFi device holding the AP role may itself be the uplink.
                if ap.access_point_active().await {
                    match ap.disable().await {
                        Ok(true) => {
                            tracing::info!(device = %ap.device(), "Rescue access point disabled");
                            self.persist().await;
                        }
                        Ok(false) => {}
                        Err(e) => {
                            tracing::warn!(device = %ap.device(), error = %e, "Failed to disable access point");
                            self.persist().await;
                        }
                    }
                }
            }
        } else if !connected && self.connected {
            tracing::warn!("Uplink connectivity lost");
            self.last_disconnected_at = now;
        }
        self.connected = connected;

        let disconnected_for = now.saturating_duration_since(self.last_disconnected_at);
        if !connected && disconnected_for >= self.policy.grace {
            if let Some(ap) = ap {
                match ap.engage_rescue_ap(&self.policy.rescue).await {
                    Ok(true) => {
                        tracing::warn!(
                            device = %ap.device(),
                            disconnected_secs = disconnected_for.as_secs(),
                            "Rescue access point enabled"
                        );
                        self.persist().await;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(device = %ap.device(), error = %e, "Failed to enable access point");
                        self.persist().await;
                    }
                }
            }
        }

        self.ticks += 1;
        let ap_active = match ap {
            Some(ap) => ap.access_point_active().await,
            None => false,
        };
        self.tx.send_replace(ConnectivitySnapshot {
            connected,
            disconnected_for_secs: (!connected).then(|| disconnected_for.as_secs()),
            ap_device: ap.map(|i| i.device().to_string()),
            ap_active,
            ticks: self.ticks,
        });
    }

    async fn persist(&self) {
        if let Err(e) = self.manager.persist().await {
            tracing::warn!(error = %e, "Failed to persist failover state");
        }
    }

    /// Tick every `period` until cancelled
    pub async fn run(mut self, period: Duration, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => self.tick().await,
            }
        }
        tracing::debug!("Failover loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::controller::adapter::fake::FakeAdapter;
    use crate::controller::adapter::DeviceKind;
    use crate::controller::interface::test_support::ctx;
    use crate::controller::status::StatusSink;
    use crate::controller::store::ConfigStore;
    use tempfile::{tempdir, TempDir};

    const GRACE: Duration = Duration::from_secs(30);

    type Harness = (FailoverMonitor<FakeAdapter>, Arc<InterfaceManager<FakeAdapter>>, TempDir);

    async fn monitor(fake: &Arc<FakeAdapter>, ap_always_on: bool) -> Harness {
        monitor_with(fake, &Config::default(), ap_always_on).await
    }

    async fn monitor_with(fake: &Arc<FakeAdapter>, config: &Config, ap_always_on: bool) -> Harness {
        let dir = tempdir().unwrap();
        let store = ConfigStore::open(dir.path().join("interfaces.json")).unwrap();
        let (tx, rx) = watch::channel(ConnectivitySnapshot::default());
        let manager = InterfaceManager::discover(fake.clone(), config, StatusSink::default(), ctx(), store, rx)
            .await
            .unwrap();
        let manager = Arc::new(manager);
        let policy = FailoverPolicy {
            grace: GRACE,
            ap_always_on,
            rescue: Credentials::new("ConfigurationAP", "configure-network"),
        };
        (FailoverMonitor::new(manager.clone(), policy, tx), manager, dir)
    }

    fn fake_with_ethernet() -> Arc<FakeAdapter> {
        let fake = Arc::new(FakeAdapter::with_devices(&[
            ("eth0", DeviceKind::Ethernet),
            ("uap0", DeviceKind::AccessPoint),
        ]));
        fake.set_live("eth0", "disconnected", None);
        fake
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescue_ap_waits_for_grace_period() {
        let fake = fake_with_ethernet();
        let (mut monitor, manager, _dir) = monitor(&fake, false).await;
        let ap = manager.ap_interface().unwrap();

        monitor.tick().await;
        assert!(!ap.access_point_active().await);
        assert_eq!(manager.connectivity().disconnected_for_secs, Some(0));

        tokio::time::advance(GRACE - Duration::from_secs(1)).await;
        monitor.tick().await;
        assert!(!ap.access_point_active().await);
        assert_eq!(fake.count_calls("hotspot "), 0);

        tokio::time::advance(Duration::from_secs(1)).await;
        monitor.tick().await;
        assert!(ap.access_point_active().await);
        assert_eq!(fake.count_calls("hotspot "), 1);

        let snapshot = manager.connectivity();
        assert!(!snapshot.connected);
        assert!(snapshot.ap_active);
        assert_eq!(snapshot.ap_device.as_deref(), Some("uap0"));
        assert_eq!(snapshot.ticks, 3);

        // Already active: later ticks do not re-engage.
        tokio::time::advance(Duration::from_secs(5)).await;
        monitor.tick().await;
        assert_eq!(fake.count_calls("hotspot "), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_disables_ap_on_next_tick() {
        let fake = fake_with_ethernet();
        let (mut monitor, manager, _dir) = monitor(&fake, false).await;
        let ap = manager.ap_interface().unwrap();

        monitor.tick().await;
        tokio::time::advance(GRACE).await;
        monitor.tick().await;
        assert!(ap.access_point_active().await);

        fake.set_live("eth0", "connected", Some("192.168.1.50"));
        monitor.tick().await;

        assert!(!ap.access_point_active().await);
        assert_eq!(ap.status().await.connection_type, "disabled");
        let snapshot = manager.connectivity();
        assert!(snapshot.connected);
        assert_eq!(snapshot.disconnected_for_secs, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ap_always_on_survives_reconnect() {
        let fake = fake_with_ethernet();
        let (mut monitor, manager, _dir) = monitor(&fake, true).await;
        let ap = manager.ap_interface().unwrap();

        monitor.tick().await;
        tokio::time::advance(GRACE).await;
        monitor.tick().await;
        fake.set_live("eth0", "connected", None);
        monitor.tick().await;

        assert!(ap.access_point_active().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_keeps_station_holding_ap_role() {
        let fake = Arc::new(FakeAdapter::with_devices(&[("wlan0", DeviceKind::WiFi)]));
        fake.set_live("wlan0", "connected", Some("192.168.4.17"));
        let mut config = Config::default();
        config.ap.use_dedicated_ap = false;
        config.wifi.ssid = "Home".to_string();
        config.wifi.passphrase = "secret123".to_string();
        let (mut monitor, manager, _dir) = monitor_with(&fake, &config, false).await;
        let wlan0 = manager.ap_interface().unwrap();
        assert_eq!(wlan0.device(), "wlan0");

        monitor.tick().await;
        fake.set_live("wlan0", "disconnected", None);
        monitor.tick().await;
        assert!(!manager.connectivity().connected);

        // Back within the grace period: the station must stay up.
        fake.set_live("wlan0", "connected", Some("192.168.4.17"));
        monitor.tick().await;

        assert!(manager.connectivity().connected);
        assert_eq!(wlan0.status().await.connection_type, "station");
        assert_eq!(fake.count_calls("modify hotspot-wlan0"), 0);
        assert!(fake.state().host_commands.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failover_transitions_are_persisted() {
        let fake = fake_with_ethernet();
        let (mut monitor, _manager, dir) = monitor(&fake, false).await;
        let saved_mode = |device: &str| {
            let store = ConfigStore::open(dir.path().join("interfaces.json")).unwrap();
            store.load().unwrap().records[device].connection_type.clone()
        };

        monitor.tick().await;
        tokio::time::advance(GRACE).await;
        monitor.tick().await;
        assert_eq!(saved_mode("uap0").as_deref(), Some("ap"));

        fake.set_live("eth0", "connected", Some("192.168.1.50"));
        monitor.tick().await;
        assert_eq!(saved_mode("uap0").as_deref(), Some("disabled"));
        assert_eq!(saved_mode("eth0").as_deref(), Some("dynamic_ip"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_errors_do_not_abort_tick() {
        let fake = fake_with_ethernet();
        fake.state().fail_live.insert("uap0".to_string());
        fake.set_live("eth0", "connected", None);
        let (mut monitor, manager, _dir) = monitor(&fake, false).await;

        monitor.tick().await;

        let snapshot = manager.connectivity();
        assert!(snapshot.connected);
        assert_eq!(snapshot.ticks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let fake = fake_with_ethernet();
        let (monitor, manager, _dir) = monitor(&fake, false).await;
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(monitor.run(Duration::from_secs(5), cancel.clone()));
        tokio::time::sleep(Duration::from_secs(11)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(manager.connectivity().ticks, 3);
    }
}
