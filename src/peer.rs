//! Per-endpoint peer state machine (spec §4.3), plus the `PeerTable` that
//! holds it. This module is pure: it never touches the transport or the
//! event bus. Transitions return the side effects the caller (the relay
//! engine) owes the transport or the host, as a list of [`PeerAction`]s,
//! so the state machine itself stays trivially unit-testable.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::transport::Endpoint;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerState {
    Discovered,
    Connecting,
    Connected,
    Lost { since: Instant },
}

/// A side effect a transition owes the engine. Carried out by the caller;
/// `PeerTable` never performs I/O itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerAction {
    RequestConnection(Endpoint),
    AcceptConnection(Endpoint),
    ScheduleRetry(Endpoint, Duration),
    ConnectedStatusChanged,
    Reconnecting(Endpoint),
    NudgeDiscovery,
}

const REQUEST_CONNECTION_RETRY_DELAY: Duration = Duration::from_secs(3);

/// The authoritative in-memory view of peer lifecycle state.
///
/// A single `HashMap<Endpoint, PeerState>` backs both the connected set and
/// the lost map: an endpoint holds exactly one state at a time, so
/// `connected ∩ keys(lost) = ∅` holds by construction rather than needing
/// to be checked.
#[derive(Default)]
pub struct PeerTable {
    states: HashMap<Endpoint, PeerState>,
}

impl PeerTable {
    pub fn new() -> Self {
        PeerTable {
            states: HashMap::new(),
        }
    }

    pub fn state_of(&self, endpoint: &Endpoint) -> Option<&PeerState> {
        self.states.get(endpoint)
    }

    pub fn is_connected(&self, endpoint: &Endpoint) -> bool {
        matches!(self.states.get(endpoint), Some(PeerState::Connected))
    }

    pub fn is_lost(&self, endpoint: &Endpoint) -> bool {
        matches!(self.states.get(endpoint), Some(PeerState::Lost { .. }))
    }

    pub fn connected_count(&self) -> usize {
        self.states
            .values()
            .filter(|s| matches!(s, PeerState::Connected))
            .count()
    }

    pub fn lost_count(&self) -> usize {
        self.states
            .values()
            .filter(|s| matches!(s, PeerState::Lost { .. }))
            .count()
    }

    pub fn connected(&self) -> impl Iterator<Item = &Endpoint> {
        self.states
            .iter()
            .filter(|(_, s)| matches!(s, PeerState::Connected))
            .map(|(e, _)| e)
    }

    /// `EndpointFound` callback.
    pub fn endpoint_found(&mut self, endpoint: Endpoint) -> Vec<PeerAction> {
        match self.states.get(&endpoint) {
            None => {
                self.states.insert(endpoint.clone(), PeerState::Discovered);
                vec![PeerAction::RequestConnection(endpoint)]
            }
            Some(PeerState::Connected) => {
                // Tie-break: already connected, ignore.
                Vec::new()
            }
            Some(PeerState::Lost { .. }) => {
                self.states.insert(endpoint.clone(), PeerState::Discovered);
                vec![
                    PeerAction::Reconnecting(endpoint.clone()),
                    PeerAction::RequestConnection(endpoint),
                ]
            }
            Some(PeerState::Discovered) | Some(PeerState::Connecting) => Vec::new(),
        }
    }

    /// Result of the engine's own `request_connection` call.
    pub fn request_connection_result(&mut self, endpoint: &Endpoint, ok: bool, now: Instant) -> Vec<PeerAction> {
        match self.states.get(endpoint) {
            Some(PeerState::Discovered) => {
                if ok {
                    self.states.insert(endpoint.clone(), PeerState::Connecting);
                    Vec::new()
                } else {
                    self.states.insert(endpoint.clone(), PeerState::Lost { since: now });
                    vec![PeerAction::ScheduleRetry(endpoint.clone(), REQUEST_CONNECTION_RETRY_DELAY)]
                }
            }
            _ => Vec::new(),
        }
    }

    /// `ConnectionInitiated` callback.
    pub fn connection_initiated(&mut self, endpoint: &Endpoint) -> Vec<PeerAction> {
        match self.states.get(endpoint) {
            Some(PeerState::Connecting) => vec![PeerAction::AcceptConnection(endpoint.clone())],
            _ => Vec::new(),
        }
    }

    /// `ConnectionResult` callback.
    pub fn connection_result(&mut self, endpoint: &Endpoint, success: bool, now: Instant) -> Vec<PeerAction> {
        match self.states.get(endpoint) {
            Some(PeerState::Connecting) => {
                if success {
                    self.states.insert(endpoint.clone(), PeerState::Connected);
                    vec![PeerAction::ConnectedStatusChanged]
                } else {
                    self.states.insert(endpoint.clone(), PeerState::Lost { since: now });
                    vec![PeerAction::NudgeDiscovery]
                }
            }
            _ => Vec::new(),
        }
    }

    /// `Disconnected` / `EndpointLost` callbacks share this transition.
    pub fn disconnected(&mut self, endpoint: &Endpoint, now: Instant) -> Vec<PeerAction> {
        match self.states.get(endpoint) {
            Some(PeerState::Connected) => {
                self.states.insert(endpoint.clone(), PeerState::Lost { since: now });
                vec![PeerAction::NudgeDiscovery, PeerAction::ConnectedStatusChanged]
            }
            _ => Vec::new(),
        }
    }

    /// A scheduled retry of a failed `request_connection` fires for an
    /// endpoint that is still `Lost`: treat it like a rediscovery.
    pub fn retry_from_lost(&mut self, endpoint: &Endpoint) -> Vec<PeerAction> {
        match self.states.get(endpoint) {
            Some(PeerState::Lost { .. }) => {
                self.states.insert(endpoint.clone(), PeerState::Discovered);
                vec![PeerAction::RequestConnection(endpoint.clone())]
            }
            _ => Vec::new(),
        }
    }

    /// Drop every `Lost` entry older than `window`. Returns the dropped
    /// endpoints (for logging only; no further side effect is owed).
    pub fn evict_expired(&mut self, now: Instant, window: Duration) -> Vec<Endpoint> {
        let expired: Vec<Endpoint> = self
            .states
            .iter()
            .filter_map(|(e, s)| match s {
                PeerState::Lost { since } if now.saturating_duration_since(*since) > window => Some(e.clone()),
                _ => None,
            })
            .collect();
        for e in &expired {
            self.states.remove(e);
        }
        expired
    }
}
