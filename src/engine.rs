//! The relay engine: the single dispatcher that owns `PeerTable`, `SeenSet`
//! and the advertising/discovery flags, and that is the only thing in this
//! crate allowed to call the transport or the event bus.
//!
//! Everything that can happen to the engine — a host call, a transport
//! callback, a periodic tick, or a scheduled retry — is pushed as a tagged
//! [`EngineMsg`] onto one internal queue, and `Engine::run` drains it one
//! message at a time. This keeps every mutation of `PeerTable`/`SeenSet`/
//! flags serialized without any lock around them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::alert::{now_millis, Alert};
use crate::codec;
use crate::config::MeshConfig;
use crate::error::SendAlertError;
use crate::event_bus::{self, EngineEvent, EventBus};
use crate::peer::{PeerAction, PeerTable};
use crate::seen_set::SeenSet;
use crate::transport::{Endpoint, Transport, TransportError, TransportEvent};

/// Advertising lifecycle, collapsed from the boolean `is_advertising` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Advertising {
    Off,
    On,
}

/// Discovery lifecycle, collapsed from `is_discovering` / `is_stopping_discovery`
/// / `pending_discovery_start` into a single enum: those three booleans only
/// ever take on four valid combinations, which this type makes the only
/// representable ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Discovery {
    Off,
    On,
    Stopping { pending_start: bool },
}

/// Tracks advertising/discovery lifecycle state, exposed as the same
/// boolean-shaped accessors (`is_advertising`, `is_discovering`, ...) a
/// flag-based implementation would have, backed by the collapsed enums.
#[derive(Default)]
struct EngineFlags {
    advertising: AdvertisingOrDefault,
    discovery: DiscoveryOrDefault,
}

// Small wrappers so `#[derive(Default)]` works without requiring `Default`
// impls that would suggest `Discovery`/`Advertising` have a meaningful
// "default" state outside of engine startup.
struct AdvertisingOrDefault(Advertising);
impl Default for AdvertisingOrDefault {
    fn default() -> Self {
        AdvertisingOrDefault(Advertising::Off)
    }
}
struct DiscoveryOrDefault(Discovery);
impl Default for DiscoveryOrDefault {
    fn default() -> Self {
        DiscoveryOrDefault(Discovery::Off)
    }
}

impl EngineFlags {
    fn is_advertising(&self) -> bool {
        matches!(self.advertising.0, Advertising::On)
    }

    fn is_discovering(&self) -> bool {
        matches!(self.discovery.0, Discovery::On)
    }

    fn is_stopping_discovery(&self) -> bool {
        matches!(self.discovery.0, Discovery::Stopping { .. })
    }

    fn pending_discovery_start(&self) -> bool {
        matches!(self.discovery.0, Discovery::Stopping { pending_start: true })
    }
}

enum EngineCommand {
    Start(oneshot::Sender<()>),
    SendAlert(String, oneshot::Sender<Result<(), SendAlertError>>),
    Shutdown(oneshot::Sender<()>),
}

enum EngineMsg {
    Command(EngineCommand),
    Transport(TransportEvent),
    DiscoveryMaintenanceTick,
    StatusCheckTick,
    RetryAdvertising,
    RetryStartDiscovery,
    RetryRequestConnection(Endpoint),
    DiscoveryStopSettle,
    ReconnectProbe(Endpoint),
    InitialDiscoveryStart,
}

/// Host-facing handle. Cloneable; all clones address the same engine task.
#[derive(Clone)]
pub struct MeshEngineHandle {
    msg_tx: mpsc::UnboundedSender<EngineMsg>,
}

impl MeshEngineHandle {
    /// Idempotent. Resolves once the engine has accepted the request, not
    /// once peers are connected.
    pub async fn start(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .msg_tx
            .send(EngineMsg::Command(EngineCommand::Start(ack_tx)))
            .is_err()
        {
            return;
        }
        let _ = ack_rx.await;
    }

    /// Rejects only if `text` is empty, or if the engine has stopped.
    pub async fn send_alert(&self, text: impl Into<String>) -> Result<(), SendAlertError> {
        let text = text.into();
        if text.is_empty() {
            return Err(SendAlertError::EmptyText);
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .msg_tx
            .send(EngineMsg::Command(EngineCommand::SendAlert(text, ack_tx)))
            .is_err()
        {
            return Err(SendAlertError::EngineStopped);
        }
        ack_rx.await.unwrap_or(Err(SendAlertError::EngineStopped))
    }

    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .msg_tx
            .send(EngineMsg::Command(EngineCommand::Shutdown(ack_tx)))
            .is_err()
        {
            return;
        }
        let _ = ack_rx.await;
    }
}

/// Spawn the relay engine as a background task.
///
/// `transport_events` is fed by whatever constructed `transport`: each
/// platform adapter is handed the sending half of an equivalent channel and
/// pushes `TransportEvent`s onto it as its own callbacks fire.
pub fn spawn(
    config: MeshConfig,
    transport: Arc<dyn Transport>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
) -> (MeshEngineHandle, mpsc::UnboundedReceiver<EngineEvent>) {
    let (event_bus, event_rx) = event_bus::channel();
    let (msg_tx, msg_rx) = mpsc::unbounded_channel::<EngineMsg>();

    let forward_tx = msg_tx.clone();
    let mut transport_events = transport_events;
    tokio::spawn(async move {
        while let Some(event) = transport_events.recv().await {
            if forward_tx.send(EngineMsg::Transport(event)).is_err() {
                break;
            }
        }
    });

    let engine = Engine {
        config,
        transport,
        peers: PeerTable::new(),
        seen: SeenSet::new(0), // replaced immediately below
        flags: EngineFlags::default(),
        events: event_bus,
        msg_tx: msg_tx.clone(),
        started: false,
        fatal: false,
    };
    let mut engine = engine;
    engine.seen = SeenSet::new(engine.config.seen_set_capacity);

    tokio::spawn(engine.run(msg_rx));

    (MeshEngineHandle { msg_tx }, event_rx)
}

struct Engine {
    config: MeshConfig,
    transport: Arc<dyn Transport>,
    peers: PeerTable,
    seen: SeenSet,
    flags: EngineFlags,
    events: EventBus,
    msg_tx: mpsc::UnboundedSender<EngineMsg>,
    started: bool,
    fatal: bool,
}

impl Engine {
    fn schedule(&self, after: Duration, msg: EngineMsg) {
        let tx = self.msg_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(msg);
        });
    }

    async fn run(mut self, mut msg_rx: mpsc::UnboundedReceiver<EngineMsg>) {
        let mut maintenance_interval = tokio::time::interval(self.config.discovery_maintenance_interval);
        let mut status_interval = tokio::time::interval(self.config.status_check_interval);
        // The first tick of `interval` fires immediately; consume it so the
        // timers behave as "every N seconds starting N seconds from now".
        maintenance_interval.tick().await;
        status_interval.tick().await;

        loop {
            tokio::select! {
                biased;
                msg = msg_rx.recv() => {
                    match msg {
                        Some(msg) => {
                            let stop = self.handle_msg(msg).await;
                            if stop {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = maintenance_interval.tick() => {
                    self.on_discovery_maintenance().await;
                }
                _ = status_interval.tick() => {
                    self.on_status_check().await;
                }
            }
        }
    }

    /// Returns `true` if the engine should stop its dispatcher loop.
    async fn handle_msg(&mut self, msg: EngineMsg) -> bool {
        match msg {
            EngineMsg::Command(EngineCommand::Start(ack)) => {
                self.do_start().await;
                let _ = ack.send(());
                false
            }
            EngineMsg::Command(EngineCommand::SendAlert(text, ack)) => {
                let result = self.do_send_alert(text).await;
                let _ = ack.send(result);
                false
            }
            EngineMsg::Command(EngineCommand::Shutdown(ack)) => {
                self.do_shutdown().await;
                let _ = ack.send(());
                true
            }
            EngineMsg::Transport(event) => {
                self.on_transport_event(event).await;
                false
            }
            EngineMsg::DiscoveryMaintenanceTick => {
                self.on_discovery_maintenance().await;
                false
            }
            EngineMsg::StatusCheckTick => {
                self.on_status_check().await;
                false
            }
            EngineMsg::RetryAdvertising => {
                if !self.fatal {
                    self.start_advertising().await;
                }
                false
            }
            EngineMsg::RetryStartDiscovery => {
                if !self.fatal {
                    self.start_discovery().await;
                }
                false
            }
            EngineMsg::RetryRequestConnection(endpoint) => {
                if !self.fatal {
                    let actions = self.peers.retry_from_lost(&endpoint);
                    self.apply_actions(actions).await;
                }
                false
            }
            EngineMsg::DiscoveryStopSettle => {
                if !self.fatal && self.flags.pending_discovery_start() {
                    self.start_discovery().await;
                }
                false
            }
            EngineMsg::ReconnectProbe(endpoint) => {
                if !self.fatal && self.peers.is_lost(&endpoint) {
                    self.maybe_start_discovery().await;
                }
                false
            }
            EngineMsg::InitialDiscoveryStart => {
                if !self.fatal {
                    self.start_discovery().await;
                }
                false
            }
        }
    }

    // -- host operations ---------------------------------------------------

    async fn do_start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        self.start_advertising().await;
        self.schedule(self.config.discovery_start_delay, EngineMsg::InitialDiscoveryStart);
    }

    async fn do_send_alert(&mut self, text: String) -> Result<(), SendAlertError> {
        if text.is_empty() {
            return Err(SendAlertError::EmptyText);
        }
        if self.fatal {
            return Err(SendAlertError::Fatal);
        }
        let alert = Alert::originate(text, now_millis(), self.config.initial_ttl);
        let bytes = codec::encode(&alert);
        self.broadcast(bytes, None).await;
        // The originating node never displays its own outbound alert; that
        // is the host UI's concern, not this engine's.
        Ok(())
    }

    async fn do_shutdown(&mut self) {
        let _ = self.transport.stop_advertising().await;
        let _ = self.transport.stop_discovery().await;
        let _ = self.transport.stop_all_endpoints().await;
        self.peers = PeerTable::new();
        self.seen = SeenSet::new(self.config.seen_set_capacity);
        self.flags = EngineFlags::default();
        info!("relay engine shut down");
    }

    // -- transport callbacks -------------------------------------------------

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::EndpointFound { endpoint, name, .. } => {
                debug!(%endpoint, %name, "endpoint found");
                let actions = self.peers.endpoint_found(endpoint);
                self.apply_actions(actions).await;
            }
            TransportEvent::EndpointLost { endpoint } => {
                debug!(%endpoint, "endpoint lost");
                let actions = self.peers.disconnected(&endpoint, Instant::now());
                self.apply_actions(actions).await;
            }
            TransportEvent::ConnectionInitiated { endpoint, .. } => {
                let actions = self.peers.connection_initiated(&endpoint);
                self.apply_actions(actions).await;
            }
            TransportEvent::ConnectionResult { endpoint, success } => {
                let actions = self.peers.connection_result(&endpoint, success, Instant::now());
                self.apply_actions(actions).await;
            }
            TransportEvent::Disconnected { endpoint } => {
                let actions = self.peers.disconnected(&endpoint, Instant::now());
                self.apply_actions(actions).await;
                self.schedule(self.config.reconnect_probe_delay, EngineMsg::ReconnectProbe(endpoint));
            }
            TransportEvent::PayloadReceived { endpoint, bytes } => {
                self.on_payload_received(endpoint, bytes).await;
            }
        }
    }

    async fn on_payload_received(&mut self, sender: Endpoint, bytes: Vec<u8>) {
        let alert = match codec::decode(&bytes) {
            Ok(alert) => alert,
            Err(err) => {
                warn!(%sender, error = %err, "dropping malformed alert payload");
                return;
            }
        };
        if !self.seen.insert(alert.id) {
            return;
        }
        self.events.alert_received(alert.id, alert.text.clone(), alert.timestamp, alert.ttl);
        if alert.ttl > 1 {
            let forward = alert.with_decremented_ttl();
            let bytes = codec::encode(&forward);
            self.broadcast(bytes, Some(sender)).await;
        }
    }

    // -- peer-action side effects -------------------------------------------

    async fn apply_actions(&mut self, actions: Vec<PeerAction>) {
        let mut queue: Vec<PeerAction> = actions;
        while let Some(action) = queue.pop() {
            match action {
                PeerAction::RequestConnection(endpoint) => {
                    let result = self
                        .transport
                        .request_connection(&self.config.local_name, &endpoint)
                        .await;
                    if let Err(err) = &result {
                        warn!(%endpoint, error = %err, "request_connection failed");
                    }
                    let more = self.peers.request_connection_result(&endpoint, result.is_ok(), Instant::now());
                    queue.extend(more);
                }
                PeerAction::AcceptConnection(endpoint) => {
                    if let Err(err) = self.transport.accept_connection(&endpoint).await {
                        warn!(%endpoint, error = %err, "accept_connection failed");
                    }
                }
                PeerAction::ScheduleRetry(endpoint, delay) => {
                    self.schedule(delay, EngineMsg::RetryRequestConnection(endpoint));
                }
                PeerAction::ConnectedStatusChanged => {
                    self.events.connected_status(self.peers.connected_count());
                }
                PeerAction::Reconnecting(endpoint) => {
                    self.events.status(format!("reconnecting: {endpoint}"));
                }
                PeerAction::NudgeDiscovery => {
                    self.maybe_start_discovery().await;
                }
            }
        }
    }

    async fn broadcast(&mut self, bytes: Vec<u8>, exclude: Option<Endpoint>) {
        let recipients: Vec<Endpoint> = self
            .peers
            .connected()
            .filter(|e| exclude.as_ref() != Some(*e))
            .cloned()
            .collect();
        for recipient in recipients {
            if let Err(err) = self.transport.send_payload(&recipient, bytes.clone()).await {
                self.events.status(format!("send to {recipient} failed: {err}"));
            }
        }
        self.events.connected_status(self.peers.connected_count());
    }

    // -- advertising / discovery protocols -----------------------------------

    async fn start_advertising(&mut self) {
        if self.flags.is_advertising() {
            return;
        }
        match self
            .transport
            .start_advertising(&self.config.service_id, &self.config.local_name)
            .await
        {
            Ok(()) => {
                self.flags.advertising.0 = Advertising::On;
            }
            Err(TransportError::Fatal(reason)) => {
                self.enter_fatal(reason);
            }
            Err(err) => {
                debug!(error = %err, "start_advertising failed, retrying");
                self.schedule(self.config.advertising_retry_delay, EngineMsg::RetryAdvertising);
            }
        }
    }

    async fn maybe_start_discovery(&mut self) {
        if !self.flags.is_discovering()
            && !self.flags.is_stopping_discovery()
            && (self.peers.lost_count() > 0 || self.peers.connected_count() == 0)
        {
            self.start_discovery().await;
        }
    }

    async fn start_discovery(&mut self) {
        if self.flags.is_discovering() {
            return;
        }
        if self.flags.is_stopping_discovery() {
            self.flags.discovery.0 = Discovery::Stopping { pending_start: true };
            return;
        }
        match self.transport.start_discovery(&self.config.service_id).await {
            Ok(()) => {
                self.flags.discovery.0 = Discovery::On;
            }
            Err(TransportError::StateConflict(_)) => {
                // Already discovering from the transport's point of view:
                // resynchronize rather than retry.
                self.flags.discovery.0 = Discovery::On;
            }
            Err(TransportError::Fatal(reason)) => {
                self.enter_fatal(reason);
            }
            Err(err) => {
                debug!(error = %err, "start_discovery failed, retrying");
                self.schedule(self.config.discovery_retry_delay, EngineMsg::RetryStartDiscovery);
            }
        }
    }

    async fn stop_discovery(&mut self) {
        if !self.flags.is_discovering() {
            return;
        }
        self.flags.discovery.0 = Discovery::Stopping { pending_start: false };
        let _ = self.transport.stop_discovery().await;
        let pending_start = self.flags.pending_discovery_start();
        self.flags.discovery.0 = Discovery::Off;
        if pending_start {
            self.schedule(self.config.discovery_stop_settle_delay, EngineMsg::DiscoveryStopSettle);
        }
    }

    fn enter_fatal(&mut self, reason: String) {
        self.fatal = true;
        self.events.status(format!("Status: fatal transport failure - {reason}"));
        warn!(reason = %reason, "entering fatal state, timers stopped");
    }

    // -- periodic timers ------------------------------------------------------

    async fn on_discovery_maintenance(&mut self) {
        if self.fatal {
            return;
        }
        let dropped = self.peers.evict_expired(Instant::now(), self.config.lost_window);
        for endpoint in dropped {
            debug!(%endpoint, "evicted expired lost peer");
        }
        // Discovery, once started, is never stopped by this tick: stopping
        // it whenever the currently-known peers are all settled would also
        // stop this node from ever seeing a brand-new, not-yet-connected
        // peer advertise later, since nothing re-starts discovery except a
        // disconnect/loss of a peer already in the table. Only `start` it
        // when the spec's condition calls for it.
        self.maybe_start_discovery().await;
    }

    async fn on_status_check(&mut self) {
        if self.fatal {
            return;
        }
        if !self.flags.is_advertising() {
            self.start_advertising().await;
        }
        self.maybe_start_discovery().await;
        self.events.connected_status(self.peers.connected_count());
    }
}
