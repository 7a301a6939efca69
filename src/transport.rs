//! The transport adapter boundary: what the relay engine expects from the
//! underlying radio-connections API, and what that API hands back.

use std::fmt;

use async_trait::async_trait;

/// Opaque, transport-assigned identifier for a discovered peer. Compared by
/// equality only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint(pub String);

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Endpoint {
    fn from(s: &str) -> Self {
        Endpoint(s.to_string())
    }
}

impl From<String> for Endpoint {
    fn from(s: String) -> Self {
        Endpoint(s)
    }
}

/// Transport call failure taxonomy.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Worth retrying with a fixed delay; no state resync implied.
    #[error("transient transport failure: {0}")]
    Transient(String),
    /// The transport reports a conflict that this call's target state
    /// already satisfies (e.g. "already discovering"); treated as success.
    #[error("transport state conflict: {0}")]
    StateConflict(String),
    /// The underlying radio feature is unsupported or permanently denied.
    /// Terminal: the engine stops timers and rejects subsequent sends.
    #[error("fatal transport failure: {0}")]
    Fatal(String),
}

/// Asynchronous callbacks the transport delivers to the engine, in the order
/// the underlying platform reports them.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    EndpointFound {
        endpoint: Endpoint,
        name: String,
        service_id: String,
    },
    EndpointLost {
        endpoint: Endpoint,
    },
    ConnectionInitiated {
        endpoint: Endpoint,
        info: String,
    },
    ConnectionResult {
        endpoint: Endpoint,
        success: bool,
    },
    Disconnected {
        endpoint: Endpoint,
    },
    PayloadReceived {
        endpoint: Endpoint,
        bytes: Vec<u8>,
    },
}

/// The radio-connections API the relay engine drives. Implementations own
/// their own handles to the underlying platform; they report state changes
/// solely via [`TransportEvent`]s pushed onto the channel they were
/// constructed with, and never mutate engine state directly.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn start_advertising(&self, service_id: &str, local_name: &str) -> Result<(), TransportError>;
    async fn stop_advertising(&self) -> Result<(), TransportError>;
    async fn start_discovery(&self, service_id: &str) -> Result<(), TransportError>;
    async fn stop_discovery(&self) -> Result<(), TransportError>;
    async fn request_connection(&self, local_name: &str, endpoint: &Endpoint) -> Result<(), TransportError>;
    async fn accept_connection(&self, endpoint: &Endpoint) -> Result<(), TransportError>;
    async fn send_payload(&self, endpoint: &Endpoint, bytes: Vec<u8>) -> Result<(), TransportError>;
    async fn stop_all_endpoints(&self) -> Result<(), TransportError>;
}
