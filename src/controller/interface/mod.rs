//! Per-interface connection state machines
//!
//! Each managed device is a [`NetworkInterface`]: a lock around one of the
//! three variants plus the adapter and timing context it runs with. All
//! operations take the lock for their whole duration, so `refresh` and
//! `reload` never interleave for one device while different devices proceed
//! independently.

pub mod access_point;
pub mod ethernet;
pub mod parameters;
pub mod wifi;

pub use access_point::ApInterface;
pub use ethernet::EthernetInterface;
pub use parameters::Configurable;
pub use wifi::WiFiInterface;

use super::adapter::{CommandAdapter, LiveAddress};
use super::error::{InterfaceError, InterfaceResult};
use super::state::{InterfaceKind, InterfaceRecord, StatusSnapshot};
use super::status::StatusSink;
use serde_json::Value;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Attempts made by the association and hotspot activation loops
pub const RETRY_ATTEMPTS: u32 = 2;

/// Timing and cancellation shared by every transition
#[derive(Debug, Clone)]
pub struct InterfaceContext {
    pub retry_pause: Duration,
    /// Wait passed to the adapter's bring-up/down calls
    pub connection_wait: Duration,
    pub cancel: CancellationToken,
}

impl InterfaceContext {
    /// Sleep for the retry pause, aborting early on shutdown
    pub async fn pause(&self) -> InterfaceResult<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(InterfaceError::Cancelled),
            _ = tokio::time::sleep(self.retry_pause) => Ok(()),
        }
    }

    /// Run `op` up to [`RETRY_ATTEMPTS`] times with a pause between attempts.
    ///
    /// The error of the last attempt is returned.
    pub async fn retry<T, F, Fut>(&self, device: &str, what: &str, mut op: F) -> InterfaceResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = InterfaceResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= RETRY_ATTEMPTS => return Err(e),
                Err(e) => {
                    tracing::warn!(device, attempt, error = %e, "{} failed, retrying", what);
                    attempt += 1;
                    self.pause().await?;
                }
            }
        }
    }
}

/// Wireless credentials; an empty string means unset
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub ssid: String,
    pub passphrase: String,
}

impl Credentials {
    pub fn new(ssid: &str, passphrase: &str) -> Self {
        Self {
            ssid: ssid.to_string(),
            passphrase: passphrase.to_string(),
        }
    }

    pub fn require(&self, mode: &'static str) -> InterfaceResult<()> {
        if self.ssid.is_empty() || self.passphrase.is_empty() {
            return Err(InterfaceError::MissingCredentials(mode));
        }
        Ok(())
    }
}

/// State every variant carries
#[derive(Debug)]
pub struct InterfaceCore {
    pub device: String,
    pub ip: String,
    pub mask: String,
    pub gateway: String,
    pub update_pending: bool,
    pub live_state: String,
    pub message: String,
    pub is_error: bool,
    sink: StatusSink,
}

impl InterfaceCore {
    pub fn new(device: &str, ip: &str, mask: &str, gateway: &str, sink: StatusSink) -> Self {
        Self {
            device: device.to_string(),
            ip: ip.to_string(),
            mask: mask.to_string(),
            gateway: gateway.to_string(),
            update_pending: false,
            live_state: "unknown".to_string(),
            message: "not initialised".to_string(),
            is_error: false,
            sink,
        }
    }

    pub fn set_status(&mut self, message: impl Into<String>, is_error: bool) {
        let message = message.into();
        if message == self.message && is_error == self.is_error {
            return;
        }
        self.sink.publish(&self.device, &message, is_error);
        self.message = message;
        self.is_error = is_error;
    }

    /// Copy observed addressing into the cached fields
    pub fn observe(&mut self, live: &LiveAddress) {
        if let Some(address) = &live.address {
            self.ip = address.clone();
        }
        if let Some(mask) = &live.mask {
            self.mask = mask.clone();
        }
        if let Some(gateway) = &live.gateway {
            self.gateway = gateway.clone();
        }
    }
}

/// Check the fields a record must carry and that its type matches `kind`
pub(crate) fn check_record(
    device: &str,
    kind: InterfaceKind,
    record: &InterfaceRecord,
    required: &[&'static str],
) -> InterfaceResult<()> {
    let found = record.kind.ok_or_else(|| InterfaceError::ConfigurationIncomplete {
        device: device.to_string(),
        field: "type",
    })?;
    if found != kind {
        return Err(InterfaceError::KindMismatch {
            device: device.to_string(),
            expected: kind.to_string(),
            found: found.to_string(),
        });
    }

    for field in required {
        let present = match *field {
            "connection_type" => record.connection_type.is_some(),
            "ip" => record.ip.is_some(),
            "mask" => record.mask.is_some(),
            "gateway" => record.gateway.is_some(),
            "ssid" => record.ssid.is_some(),
            "passphrase" => record.passphrase.is_some(),
            _ => true,
        };
        if !present {
            return Err(InterfaceError::ConfigurationIncomplete {
                device: device.to_string(),
                field,
            });
        }
    }
    Ok(())
}

/// The three concrete state machines
#[derive(Debug)]
pub enum InterfaceVariant {
    Ethernet(EthernetInterface),
    WiFi(WiFiInterface),
    AccessPoint(ApInterface),
}

macro_rules! dispatch {
    ($variant:expr, $iface:ident => $body:expr) => {
        match $variant {
            InterfaceVariant::Ethernet($iface) => $body,
            InterfaceVariant::WiFi($iface) => $body,
            InterfaceVariant::AccessPoint($iface) => $body,
        }
    };
}

impl InterfaceVariant {
    pub fn kind(&self) -> InterfaceKind {
        match self {
            InterfaceVariant::Ethernet(_) => InterfaceKind::Ethernet,
            InterfaceVariant::WiFi(_) => InterfaceKind::WiFi,
            InterfaceVariant::AccessPoint(_) => InterfaceKind::AccessPoint,
        }
    }

    pub fn core(&self) -> &InterfaceCore {
        dispatch!(self, i => i.core())
    }

    fn core_mut(&mut self) -> &mut InterfaceCore {
        dispatch!(self, i => i.core_mut())
    }

    fn connection_type(&self) -> &'static str {
        dispatch!(self, i => i.connection_type())
    }

    fn parameter_names(&self) -> Vec<&'static str> {
        match self {
            InterfaceVariant::Ethernet(_) => EthernetInterface::parameter_names(),
            InterfaceVariant::WiFi(_) => WiFiInterface::parameter_names(),
            InterfaceVariant::AccessPoint(_) => ApInterface::parameter_names(),
        }
    }

    /// Push the desired state to the OS.
    ///
    /// Failures end up in the status message; only cancellation is returned.
    /// A failed external command leaves `update_pending` set so the next
    /// refresh tries again.
    async fn reload<A: CommandAdapter>(&mut self, adapter: &A, ctx: &InterfaceContext) -> InterfaceResult<()> {
        self.core_mut().update_pending = true;
        let mode = self.connection_type();
        let result = dispatch!(self, i => i.apply(adapter, ctx).await);

        let core = self.core_mut();
        match result {
            Ok(message) => {
                core.update_pending = false;
                core.set_status(message, false);
                Ok(())
            }
            Err(InterfaceError::Cancelled) => {
                core.set_status(format!("{}: interrupted by shutdown", mode), true);
                Err(InterfaceError::Cancelled)
            }
            Err(e @ InterfaceError::ExternalCommand(_)) => {
                core.set_status(format!("{}: {}", mode, e), true);
                Ok(())
            }
            Err(e) => {
                // Retrying cannot fix a configuration error.
                core.update_pending = false;
                core.set_status(format!("{}: {}", mode, e), true);
                Ok(())
            }
        }
    }

    async fn refresh<A: CommandAdapter>(&mut self, adapter: &A, ctx: &InterfaceContext) -> InterfaceResult<()> {
        if self.core().update_pending {
            self.reload(adapter, ctx).await?;
        }

        let device = self.core().device.clone();
        let live = adapter.live_address(&device).await?;
        dispatch!(self, i => i.observe(adapter, &live).await)?;

        let core = self.core_mut();
        core.live_state = live.state;
        if !core.update_pending && !core.is_error {
            let message = core.live_state.clone();
            core.set_status(message, false);
        }
        Ok(())
    }

    fn to_record(&self) -> InterfaceRecord {
        dispatch!(self, i => i.to_record())
    }

    fn apply_record(&mut self, record: &InterfaceRecord) -> InterfaceResult<()> {
        dispatch!(self, i => i.apply_record(record))
    }

    fn status(&self) -> StatusSnapshot {
        let core = self.core();
        StatusSnapshot {
            message: core.message.clone(),
            is_error: core.is_error,
            live_state: core.live_state.clone(),
            connection_type: self.connection_type().to_string(),
            update_pending: core.update_pending,
        }
    }

    fn get_param(&self, name: &str) -> InterfaceResult<Value> {
        dispatch!(self, i => i.get_param(name))
    }

    fn set_param(&mut self, name: &str, value: Value) -> InterfaceResult<()> {
        dispatch!(self, i => i.set_param(name, value))
    }

    fn access_point_active(&self) -> bool {
        match self {
            InterfaceVariant::Ethernet(_) => false,
            InterfaceVariant::WiFi(w) => w.is_access_point(),
            InterfaceVariant::AccessPoint(a) => a.is_access_point(),
        }
    }

    fn is_disabled(&self) -> bool {
        self.connection_type() == "disabled"
    }
}

/// One managed device: its state machine behind an exclusive lock
pub struct NetworkInterface<A> {
    device: String,
    kind: InterfaceKind,
    adapter: Arc<A>,
    ctx: InterfaceContext,
    state: Mutex<InterfaceVariant>,
}

impl<A: CommandAdapter> NetworkInterface<A> {
    pub fn new(variant: InterfaceVariant, adapter: Arc<A>, ctx: InterfaceContext) -> Self {
        Self {
            device: variant.core().device.clone(),
            kind: variant.kind(),
            adapter,
            ctx,
            state: Mutex::new(variant),
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn kind(&self) -> InterfaceKind {
        self.kind
    }

    /// Pull live status from the OS, applying a pending transition first
    pub async fn refresh(&self) -> InterfaceResult<()> {
        let mut state = self.state.lock().await;
        state.refresh(self.adapter.as_ref(), &self.ctx).await
    }

    pub async fn reload(&self) -> InterfaceResult<()> {
        let mut state = self.state.lock().await;
        state.reload(self.adapter.as_ref(), &self.ctx).await
    }

    /// First-time setup of the profiles this interface owns.
    ///
    /// With `recover_mode` the active mode is inferred from the existing
    /// profiles instead of the configured desired state.
    pub async fn initialise(&self, recover_mode: bool) -> InterfaceResult<()> {
        let mut state = self.state.lock().await;
        let adapter = self.adapter.as_ref();
        let result = match &mut *state {
            InterfaceVariant::Ethernet(i) => i.initialise(adapter, &self.ctx, recover_mode).await,
            InterfaceVariant::WiFi(i) => i.initialise(adapter, &self.ctx, recover_mode).await,
            InterfaceVariant::AccessPoint(i) => i.initialise(adapter, recover_mode).await,
        };
        let core = state.core_mut();
        core.update_pending = true;
        match result {
            Ok(()) => {
                core.set_status("initialised", false);
                Ok(())
            }
            Err(e) => {
                core.set_status(format!("initialise: {}", e), true);
                Err(e)
            }
        }
    }

    pub async fn get_config(&self) -> InterfaceRecord {
        self.state.lock().await.to_record()
    }

    /// Validate and store a desired configuration.
    ///
    /// Returns `false` when the record matches the current configuration, in
    /// which case nothing is re-applied. With `apply` the transition runs
    /// immediately; otherwise it is left pending for the next refresh.
    pub async fn load_config(&self, record: &InterfaceRecord, apply: bool) -> InterfaceResult<bool> {
        let mut state = self.state.lock().await;
        if state.to_record() == *record {
            return Ok(false);
        }
        state.apply_record(record)?;
        state.core_mut().update_pending = true;
        if apply {
            state.reload(self.adapter.as_ref(), &self.ctx).await?;
        }
        Ok(true)
    }

    pub async fn status(&self) -> StatusSnapshot {
        self.state.lock().await.status()
    }

    pub async fn get_param(&self, name: &str) -> InterfaceResult<Value> {
        self.state.lock().await.get_param(name)
    }

    pub async fn set_param(&self, name: &str, value: Value) -> InterfaceResult<()> {
        self.state.lock().await.set_param(name, value)
    }

    pub async fn parameter_names(&self) -> Vec<&'static str> {
        self.state.lock().await.parameter_names()
    }

    /// Visible networks; only wireless station interfaces can scan
    pub async fn scan(&self) -> InterfaceResult<BTreeSet<String>> {
        let state = self.state.lock().await;
        match &*state {
            InterfaceVariant::WiFi(_) => Ok(self.adapter.scan(&self.device).await?),
            _ => Err(InterfaceError::InvalidValue {
                field: "device".to_string(),
                detail: format!("{} is not a wifi interface", self.device),
            }),
        }
    }

    /// True when the interface's live state counts as uplink connectivity
    pub async fn provides_uplink(&self) -> bool {
        let state = self.state.lock().await;
        let connected = state.core().live_state == "connected";
        match &*state {
            InterfaceVariant::Ethernet(_) => connected,
            InterfaceVariant::WiFi(w) => connected && w.is_station(),
            InterfaceVariant::AccessPoint(_) => false,
        }
    }

    pub async fn access_point_active(&self) -> bool {
        self.state.lock().await.access_point_active()
    }

    /// Switch to access-point mode with the rescue credentials and apply it.
    ///
    /// Returns `false` if the interface already was in access-point mode.
    pub async fn engage_rescue_ap(&self, rescue: &Credentials) -> InterfaceResult<bool> {
        let mut state = self.state.lock().await;
        if state.access_point_active() {
            return Ok(false);
        }
        match &mut *state {
            InterfaceVariant::WiFi(w) => w.enter_access_point(rescue),
            InterfaceVariant::AccessPoint(a) => a.enter_access_point(rescue),
            InterfaceVariant::Ethernet(_) => {
                return Err(InterfaceError::InvalidValue {
                    field: "device".to_string(),
                    detail: format!("{} cannot host an access point", self.device),
                })
            }
        }
        state.reload(self.adapter.as_ref(), &self.ctx).await?;
        Ok(true)
    }

    /// Switch the AP role off and apply it; `false` if already disabled
    pub async fn disable(&self) -> InterfaceResult<bool> {
        let mut state = self.state.lock().await;
        if state.is_disabled() {
            return Ok(false);
        }
        state.set_param("connection_type", Value::from("disabled"))?;
        state.reload(self.adapter.as_ref(), &self.ctx).await?;
        Ok(true)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::controller::adapter::fake::FakeAdapter;

    pub fn ctx() -> InterfaceContext {
        InterfaceContext {
            retry_pause: Duration::from_millis(10),
            connection_wait: Duration::from_secs(1),
            cancel: CancellationToken::new(),
        }
    }

    pub fn wrap(variant: InterfaceVariant, fake: &Arc<FakeAdapter>) -> NetworkInterface<FakeAdapter> {
        NetworkInterface::new(variant, fake.clone(), ctx())
    }
}
