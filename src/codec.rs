//! Wire codec for [`Alert`](crate::alert::Alert).
//!
//! Decoding goes through `serde_json` (a standard, strict JSON parser).
//! Encoding is hand-written and deterministic: fixed field order, and only
//! `"` is escaped in `text`. This asymmetry is intentional — it keeps the
//! wire form byte-identical to a legacy encoder that only ever escaped
//! quotes, while still accepting anything a conforming JSON decoder would.

use serde::Deserialize;
use uuid::Uuid;

use crate::alert::Alert;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid payload: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct WireAlert {
    id: Uuid,
    text: String,
    timestamp: i64,
    ttl: i64,
}

/// Encode an alert to its wire representation.
///
/// Field order is fixed (`id`, `text`, `timestamp`, `ttl`); the only escape
/// produced in `text` is `"` → `\"`.
pub fn encode(alert: &Alert) -> Vec<u8> {
    let escaped = alert.text.replace('"', "\\\"");
    format!(
        r#"{{"id":"{}","text":"{}","timestamp":{},"ttl":{}}}"#,
        alert.id, escaped, alert.timestamp, alert.ttl
    )
    .into_bytes()
}

/// Decode a wire payload into an [`Alert`]. Field order is not significant.
pub fn decode(bytes: &[u8]) -> Result<Alert, DecodeError> {
    let wire: WireAlert = serde_json::from_slice(bytes)?;
    Ok(Alert {
        id: wire.id,
        text: wire.text,
        timestamp: wire.timestamp,
        ttl: wire.ttl,
    })
}
