//! The `Alert` record: an immutable emergency message, originated locally or
//! decoded off the wire.

use uuid::Uuid;

/// An emergency alert, either freshly originated or decoded from a peer.
///
/// Invariants (enforced by callers, not by this type): a non-forwarded alert
/// has `ttl >= 1`; a relay never re-encodes an alert with `ttl <= 0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    /// Opaque 128-bit identifier, canonical lowercase hyphenated hex form.
    pub id: Uuid,
    /// Short human-readable text. Bounded to <=500 chars upstream; this type
    /// and the codec tolerate longer.
    pub text: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Remaining hop budget.
    pub ttl: i64,
}

impl Alert {
    /// Build a freshly originated alert with a new random id.
    pub fn originate(text: String, timestamp: i64, ttl: i64) -> Self {
        Alert {
            id: Uuid::new_v4(),
            text,
            timestamp,
            ttl,
        }
    }

    /// Returns a copy of this alert with `ttl` decremented by exactly one.
    pub fn with_decremented_ttl(&self) -> Self {
        Alert {
            id: self.id,
            text: self.text.clone(),
            timestamp: self.timestamp,
            ttl: self.ttl - 1,
        }
    }
}

/// Milliseconds since the Unix epoch, for stamping originated alerts.
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
