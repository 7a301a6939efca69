//! S4 — TTL exhaustion (spec.md §8).
//!
//! An inbound alert with `ttl = 1` is still emitted as `AlertReceived`, but
//! must never be forwarded: no outbound `send_payload` call results.

use std::time::Duration;

use mesh_relay::{codec, Alert, Endpoint, EngineEvent, MeshConfig};
use mesh_test_support::{unique_service_id, InProcessTransport};

#[tokio::test(start_paused = true)]
async fn ttl_one_is_delivered_but_never_forwarded() {
    let service_id = unique_service_id("ttl-exhaustion");
    let (transport, events) = InProcessTransport::new(&service_id, "node-a");
    let config = MeshConfig::new(&service_id, "node-a");
    let (handle, mut rx) = mesh_relay::spawn(config, transport.clone(), events);
    handle.start().await;

    let inbound = Alert {
        id: uuid::Uuid::new_v4(),
        text: "last hop".to_string(),
        timestamp: 1_700_000_000_000,
        ttl: 1,
    };
    let sender = Endpoint("upstream-peer".to_string());
    transport.inject_payload(&sender, codec::encode(&inbound));

    let mut saw_alert = false;
    loop {
        match tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("must eventually receive something")
            .expect("engine task alive")
        {
            EngineEvent::AlertReceived { id, ttl, .. } => {
                assert_eq!(id, inbound.id);
                assert_eq!(ttl, 1);
                saw_alert = true;
                break;
            }
            EngineEvent::Status { .. } => continue,
        }
    }
    assert!(saw_alert, "a ttl=1 alert must still be delivered locally");

    // Give any erroneous forward attempt a chance to happen, then check.
    tokio::time::advance(Duration::from_millis(50)).await;
    assert!(
        transport.sent_payloads().await.is_empty(),
        "a ttl=1 alert must never be forwarded"
    );
}
