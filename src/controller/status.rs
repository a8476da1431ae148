//! Status sink shared by the interface state machines

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// One status-message change of one interface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub device: String,
    pub message: String,
    pub is_error: bool,
}

/// Handle through which interfaces publish their status changes.
///
/// Created once by the service assembly and cloned into every interface.
#[derive(Debug, Clone)]
pub struct StatusSink {
    tx: broadcast::Sender<StatusEvent>,
}

impl StatusSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, device: &str, message: &str, is_error: bool) {
        // No subscribers is fine; events are advisory.
        let _ = self.tx.send(StatusEvent {
            device: device.to_string(),
            message: message.to_string(),
            is_error,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }
}

impl Default for StatusSink {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Forward status events to the log until the sink is dropped.
pub async fn log_status_events(mut rx: broadcast::Receiver<StatusEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) if event.is_error => {
                tracing::warn!(device = %event.device, message = %event.message, "Interface status");
            }
            Ok(event) => {
                tracing::info!(device = %event.device, message = %event.message, "Interface status");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Status log lagged behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
