//! An in-process [`Transport`] double for exercising `mesh-relay` without a
//! real radio, plus fault injection for the mesh's peer-churn behavior.
//!
//! Nodes register themselves in a shared global registry keyed by
//! `service_id` so other instances in the same process can discover and
//! connect to them, and faults can be scheduled per endpoint to simulate
//! transient send failures without a real network.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use mesh_relay::{Endpoint, Transport, TransportError, TransportEvent};

/// One entry per node currently registered under a `service_id`.
struct NodeEntry {
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    advertising: bool,
}

/// The handshake state of an unordered pair of node names.
#[derive(Default)]
struct LinkState {
    accepted_by: HashSet<String>,
    connected: bool,
}

#[derive(Default)]
struct Registry {
    // service_id -> local_name -> NodeEntry
    nodes: HashMap<String, HashMap<String, NodeEntry>>,
    // (min(name_a, name_b), max(name_a, name_b)) -> LinkState
    links: HashMap<(String, String), LinkState>,
}

static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();

fn registry() -> &'static Mutex<Registry> {
    REGISTRY.get_or_init(|| Mutex::new(Registry::default()))
}

fn link_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Generates service ids that do not collide across test functions that
/// happen to run in the same process (cargo groups `#[tokio::test]`
/// functions from one file into one binary).
static NEXT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Returns a `service_id` unique to this process, suffixed with `label` for
/// readability in logs. Use one per independent test scenario.
pub fn unique_service_id(label: &str) -> String {
    let seq = NEXT_SEQ.fetch_add(1, Ordering::SeqCst);
    format!("net.example.mesh.test.{label}.{seq}")
}

/// Per-endpoint fault a test wants [`InProcessTransport::send_payload`] to
/// simulate, mirroring `emulator-v2::faults::FaultOutcome` but scoped to the
/// one transport operation the mesh integration tests need to perturb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendFault {
    /// Deliver normally.
    None,
    /// Fail with a transient transport error.
    Fail,
}

struct Faults {
    send: HashMap<Endpoint, SendFault>,
}

/// An in-process `Transport` backed by a process-global node registry.
/// Two `InProcessTransport`s constructed with the same `service_id` can
/// discover, connect to, and exchange payloads with each other.
pub struct InProcessTransport {
    service_id: String,
    local_name: String,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    faults: Mutex<Faults>,
    sent: Mutex<Vec<(Endpoint, Vec<u8>)>>,
}

impl InProcessTransport {
    /// Construct a new node. Returns the transport and the receiver half to
    /// hand to [`mesh_relay::spawn`] as `transport_events`.
    pub fn new(service_id: impl Into<String>, local_name: impl Into<String>) -> (Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(InProcessTransport {
            service_id: service_id.into(),
            local_name: local_name.into(),
            events_tx,
            faults: Mutex::new(Faults { send: HashMap::new() }),
            sent: Mutex::new(Vec::new()),
        });
        (transport, events_rx)
    }

    fn endpoint(&self) -> Endpoint {
        Endpoint(self.local_name.clone())
    }

    /// Every payload this node has attempted to send, in call order. Used
    /// by send-back-prevention assertions: a test asserts that no
    /// `(excluded_endpoint, _)` entry appears after a forward.
    pub async fn sent_payloads(&self) -> Vec<(Endpoint, Vec<u8>)> {
        self.sent.lock().await.clone()
    }

    /// Make the next `send_payload` call(s) to `endpoint` fail transiently,
    /// until cleared with [`SendFault::None`].
    pub async fn set_send_fault(&self, endpoint: Endpoint, fault: SendFault) {
        self.faults.lock().await.send.insert(endpoint, fault);
    }

    /// Force an already-connected link down, delivering `Disconnected` to
    /// both sides — the fault-injection hook `reconnection_window` and
    /// similar scenarios use to simulate a peer dropping off the mesh
    /// without waiting on real radio behavior.
    pub async fn force_disconnect(&self, other: &Endpoint) {
        let key = link_key(&self.local_name, &other.0);
        let mut reg = registry().lock().await;
        if let Some(link) = reg.links.get_mut(&key) {
            link.connected = false;
            link.accepted_by.clear();
        }
        let nodes = reg.nodes.get(&self.service_id);
        if let Some(entry) = nodes.and_then(|n| n.get(&self.local_name)) {
            let _ = entry.events_tx.send(TransportEvent::Disconnected {
                endpoint: other.clone(),
            });
        }
        if let Some(entry) = reg.nodes.get(&self.service_id).and_then(|n| n.get(&other.0)) {
            let _ = entry.events_tx.send(TransportEvent::Disconnected {
                endpoint: self.endpoint(),
            });
        }
    }

    /// Remove `other` from the registry entirely and tell this node its
    /// endpoint was lost, without notifying `other` — simulates the peer
    /// going out of radio range rather than an orderly disconnect.
    pub async fn inject_endpoint_lost(&self, other: &Endpoint) {
        let _ = self.events_tx.send(TransportEvent::EndpointLost {
            endpoint: other.clone(),
        });
    }

    /// Re-announce `other` as discoverable to this node, as if it had come
    /// back into range. Used to drive the reconnection-window scenario
    /// (spec.md S5) without a real 120s sleep.
    pub fn inject_endpoint_found(&self, other: &Endpoint, name: &str) {
        let _ = self.events_tx.send(TransportEvent::EndpointFound {
            endpoint: other.clone(),
            name: name.to_string(),
            service_id: self.service_id.clone(),
        });
    }

    /// Feed an inbound payload to this node's engine directly, as if it had
    /// arrived from `from` over the radio. Bypasses the connection handshake
    /// entirely — useful for boundary tests (e.g. TTL exhaustion) that only
    /// care about inbound-payload handling, not the peer state machine.
    pub fn inject_payload(&self, from: &Endpoint, bytes: Vec<u8>) {
        let _ = self.events_tx.send(TransportEvent::PayloadReceived {
            endpoint: from.clone(),
            bytes,
        });
    }

    async fn deliver_initiated(&self, to: &str, endpoint: Endpoint, info: &str) {
        let reg = registry().lock().await;
        if let Some(entry) = reg.nodes.get(&self.service_id).and_then(|n| n.get(to)) {
            let _ = entry.events_tx.send(TransportEvent::ConnectionInitiated {
                endpoint,
                info: info.to_string(),
            });
        }
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    async fn start_advertising(&self, service_id: &str, _local_name: &str) -> Result<(), TransportError> {
        let mut reg = registry().lock().await;
        let entry = reg
            .nodes
            .entry(service_id.to_string())
            .or_default()
            .entry(self.local_name.clone())
            .or_insert_with(|| NodeEntry {
                events_tx: self.events_tx.clone(),
                advertising: false,
            });
        entry.advertising = true;
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), TransportError> {
        let mut reg = registry().lock().await;
        if let Some(entry) = reg.nodes.get_mut(&self.service_id).and_then(|n| n.get_mut(&self.local_name)) {
            entry.advertising = false;
        }
        Ok(())
    }

    async fn start_discovery(&self, service_id: &str) -> Result<(), TransportError> {
        // Re-scans and re-announces every advertising peer on each call
        // (rather than remembering who was already found): the engine's own
        // per-endpoint state machine already treats a repeat `EndpointFound`
        // as a no-op for `Connected`/`Connecting`/`Discovered` endpoints, so
        // this keeps discovery restarts (after the engine stops it once
        // settled, see `Engine::on_discovery_maintenance`) able to rediscover
        // a peer that went `Lost` without any extra bookkeeping here.
        let reg = registry().lock().await;
        let Some(nodes) = reg.nodes.get(service_id) else {
            return Ok(());
        };
        let to_announce: Vec<String> = nodes
            .iter()
            .filter(|(name, entry)| **name != self.local_name && entry.advertising)
            .map(|(name, _)| name.clone())
            .collect();
        for name in to_announce {
            let _ = self.events_tx.send(TransportEvent::EndpointFound {
                endpoint: Endpoint(name.clone()),
                name,
                service_id: service_id.to_string(),
            });
        }
        Ok(())
    }

    async fn stop_discovery(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn request_connection(&self, _local_name: &str, endpoint: &Endpoint) -> Result<(), TransportError> {
        let key = link_key(&self.local_name, &endpoint.0);
        {
            let mut reg = registry().lock().await;
            if !reg.nodes.get(&self.service_id).is_some_and(|n| n.contains_key(&endpoint.0)) {
                return Err(TransportError::Transient(format!("no such endpoint {endpoint}")));
            }
            reg.links.entry(key).or_default();
        }
        self.deliver_initiated(&self.local_name, endpoint.clone(), "peer requested connection")
            .await;
        self.deliver_initiated(&endpoint.0, self.endpoint(), "peer requested connection")
            .await;
        Ok(())
    }

    async fn accept_connection(&self, endpoint: &Endpoint) -> Result<(), TransportError> {
        let key = link_key(&self.local_name, &endpoint.0);
        let mut reg = registry().lock().await;
        let link = reg.links.entry(key).or_default();
        link.accepted_by.insert(self.local_name.clone());
        if link.accepted_by.len() >= 2 && !link.connected {
            link.connected = true;
            let local_name = self.local_name.clone();
            let other_name = endpoint.0.clone();
            let service_id = self.service_id.clone();
            let nodes = reg.nodes.get(&service_id);
            if let Some(entry) = nodes.and_then(|n| n.get(&local_name)) {
                let _ = entry.events_tx.send(TransportEvent::ConnectionResult {
                    endpoint: Endpoint(other_name.clone()),
                    success: true,
                });
            }
            if let Some(entry) = nodes.and_then(|n| n.get(&other_name)) {
                let _ = entry.events_tx.send(TransportEvent::ConnectionResult {
                    endpoint: Endpoint(local_name),
                    success: true,
                });
            }
        }
        Ok(())
    }

    async fn send_payload(&self, endpoint: &Endpoint, bytes: Vec<u8>) -> Result<(), TransportError> {
        self.sent.lock().await.push((endpoint.clone(), bytes.clone()));
        if let Some(SendFault::Fail) = self.faults.lock().await.send.get(endpoint) {
            return Err(TransportError::Transient(format!("injected send fault to {endpoint}")));
        }
        let key = link_key(&self.local_name, &endpoint.0);
        let reg = registry().lock().await;
        let connected = reg.links.get(&key).is_some_and(|l| l.connected);
        if !connected {
            debug!(%endpoint, "send_payload to a non-connected endpoint, dropping");
            return Err(TransportError::Transient(format!("{endpoint} is not connected")));
        }
        if let Some(entry) = reg.nodes.get(&self.service_id).and_then(|n| n.get(&endpoint.0)) {
            let _ = entry.events_tx.send(TransportEvent::PayloadReceived {
                endpoint: self.endpoint(),
                bytes,
            });
        }
        Ok(())
    }

    async fn stop_all_endpoints(&self) -> Result<(), TransportError> {
        let mut reg = registry().lock().await;
        reg.links.retain(|(a, b), _| a != &self.local_name && b != &self.local_name);
        Ok(())
    }
}
