//! Offline peer-to-peer mesh relay engine for short emergency alerts.
//!
//! This crate owns the discovery/advertising lifecycle, the peer connection
//! state machine, the alert wire codec, de-duplication, and bounded-hop
//! flooding, all behind a narrow host-facing API ([`MeshEngineHandle`]) and
//! a one-way event stream ([`EngineEvent`]).
//!
//! The UI, OS permission flow, foreground service wrapper, and any external
//! sensor that originates alerts are external collaborators built on top of
//! this crate; none of that lives here.

pub mod alert;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod event_bus;
pub mod peer;
pub mod seen_set;
pub mod transport;

pub use alert::Alert;
pub use config::{load_config, load_config_from_str, MeshConfig};
pub use engine::{spawn, MeshEngineHandle};
pub use error::SendAlertError;
pub use event_bus::EngineEvent;
pub use peer::{PeerState, PeerTable};
pub use seen_set::SeenSet;
pub use transport::{Endpoint, Transport, TransportError, TransportEvent};
