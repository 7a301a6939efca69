//! S6 — discovery state machine (spec.md §4.4, §8).
//!
//! This test drives the engine directly over a hand-controlled transport
//! channel (rather than `mesh-test-support`'s two-sided handshake) so the
//! exact sequence of discovery start/stop calls can be counted: per
//! spec.md §4.4, discovery is never stopped by a periodic tick, only ever
//! (re-)started by it — the only caller of `stop_discovery` outside of
//! `shutdown()` is the discovery-stop protocol itself, which this engine
//! never enters on its own. The `is_stopping_discovery`/`pending_start`
//! race that §4.4's stop protocol describes is covered directly against
//! `Engine` in `src/engine.rs`'s unit tests, since nothing in this crate's
//! own behavior drives the engine into `Discovery::Stopping` outside of a
//! future transport adapter that calls `stop_discovery()` on its own
//! initiative.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mesh_relay::{Endpoint, EngineEvent, MeshConfig, Transport, TransportError, TransportEvent};
use tokio::sync::mpsc;

struct CountingTransport {
    start_discovery_calls: AtomicUsize,
    stop_discovery_calls: AtomicUsize,
}

impl CountingTransport {
    fn new() -> Self {
        CountingTransport {
            start_discovery_calls: AtomicUsize::new(0),
            stop_discovery_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Transport for CountingTransport {
    async fn start_advertising(&self, _service_id: &str, _local_name: &str) -> Result<(), TransportError> {
        Ok(())
    }
    async fn stop_advertising(&self) -> Result<(), TransportError> {
        Ok(())
    }
    async fn start_discovery(&self, _service_id: &str) -> Result<(), TransportError> {
        self.start_discovery_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    async fn stop_discovery(&self) -> Result<(), TransportError> {
        self.stop_discovery_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    async fn request_connection(&self, _local_name: &str, _endpoint: &Endpoint) -> Result<(), TransportError> {
        Ok(())
    }
    async fn accept_connection(&self, _endpoint: &Endpoint) -> Result<(), TransportError> {
        Ok(())
    }
    async fn send_payload(&self, _endpoint: &Endpoint, _bytes: Vec<u8>) -> Result<(), TransportError> {
        Ok(())
    }
    async fn stop_all_endpoints(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

fn fast_config() -> MeshConfig {
    let mut config = MeshConfig::new("svc.test.mesh", "node-a");
    config.discovery_start_delay = Duration::from_millis(1);
    config.discovery_maintenance_interval = Duration::from_millis(50);
    config.status_check_interval = Duration::from_secs(3600); // keep it out of the way
    config
}

async fn wait_for_status(rx: &mut mpsc::UnboundedReceiver<EngineEvent>, want: &str) {
    loop {
        match rx.recv().await.expect("engine task alive") {
            EngineEvent::Status { message } if message == want => return,
            _ => continue,
        }
    }
}

#[tokio::test(start_paused = true)]
async fn discovery_keeps_running_once_settled_and_is_not_restarted_redundantly() {
    let transport = Arc::new(CountingTransport::new());
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (handle, mut rx) = mesh_relay::spawn(fast_config(), transport.clone(), events_rx);

    handle.start().await;
    tokio::time::advance(Duration::from_millis(5)).await;
    tokio::task::yield_now().await;
    assert_eq!(transport.start_discovery_calls.load(Ordering::SeqCst), 1);

    let peer = Endpoint("peer-1".to_string());
    events_tx
        .send(TransportEvent::EndpointFound {
            endpoint: peer.clone(),
            name: "peer-1".to_string(),
            service_id: "svc.test.mesh".to_string(),
        })
        .unwrap();
    events_tx
        .send(TransportEvent::ConnectionInitiated {
            endpoint: peer.clone(),
            info: "test".to_string(),
        })
        .unwrap();
    events_tx
        .send(TransportEvent::ConnectionResult {
            endpoint: peer.clone(),
            success: true,
        })
        .unwrap();

    wait_for_status(&mut rx, "Status: 1 peers connected").await;

    // The next several maintenance ticks find nothing lost and a peer
    // connected: discovery must keep running regardless (so a brand-new,
    // not-yet-connected peer can still be found), never stopping on its
    // own and never redundantly re-starting since it is already on.
    tokio::time::advance(Duration::from_millis(200)).await;
    tokio::task::yield_now().await;
    assert_eq!(
        transport.stop_discovery_calls.load(Ordering::SeqCst),
        0,
        "a settled mesh must not stop discovery itself; only shutdown() may"
    );
    assert_eq!(
        transport.start_discovery_calls.load(Ordering::SeqCst),
        1,
        "already-running discovery must not be restarted redundantly"
    );

    // Losing the peer must not need to "restart" discovery — it was never
    // stopped — so the start count stays unchanged.
    events_tx
        .send(TransportEvent::Disconnected { endpoint: peer.clone() })
        .unwrap();
    wait_for_status(&mut rx, "Status: 0 peers connected").await;
    tokio::task::yield_now().await;
    assert_eq!(
        transport.start_discovery_calls.load(Ordering::SeqCst),
        1,
        "discovery was already running, so losing the peer must not issue a second start"
    );

    handle.shutdown().await;
    assert_eq!(
        transport.stop_discovery_calls.load(Ordering::SeqCst),
        1,
        "shutdown() is the only path that stops discovery"
    );
}
