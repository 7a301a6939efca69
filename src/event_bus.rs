//! One-way event stream from the relay engine to its host.

use tokio::sync::mpsc;
use uuid::Uuid;

/// Events delivered to the host. Alert events must never be coalesced;
/// status events may be dropped or coalesced by the host at its discretion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    AlertReceived {
        id: Uuid,
        text: String,
        timestamp: i64,
        ttl: i64,
    },
    /// Free-form, except for the literal `Status: <N> peers connected`
    /// form, which hosts parse via `Status: (\d+) peers connected` to
    /// drive a connection indicator.
    Status {
        message: String,
    },
}

/// The engine-side handle onto the event channel. The host holds the
/// matching `UnboundedReceiver<EngineEvent>` returned by [`channel`].
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EventBus {
    pub fn alert_received(&self, id: Uuid, text: String, timestamp: i64, ttl: i64) {
        let _ = self.tx.send(EngineEvent::AlertReceived { id, text, timestamp, ttl });
    }

    pub fn status(&self, message: impl Into<String>) {
        let _ = self.tx.send(EngineEvent::Status { message: message.into() });
    }

    pub fn connected_status(&self, connected: usize) {
        self.status(format!("Status: {connected} peers connected"));
    }
}

pub fn channel() -> (EventBus, mpsc::UnboundedReceiver<EngineEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventBus { tx }, rx)
}
