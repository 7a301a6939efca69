//! S1 — two-node origination (spec.md §8).
//!
//! Two nodes reach `Connected`. A originates an alert; B receives exactly
//! one `AlertReceived` carrying the original text and ttl, and A never
//! displays its own outbound alert.

use std::time::Duration;

use mesh_relay::{EngineEvent, MeshConfig};
use mesh_test_support::{unique_service_id, InProcessTransport};

fn fast_config(service_id: &str, local_name: &str) -> MeshConfig {
    let mut config = MeshConfig::new(service_id, local_name);
    config.discovery_start_delay = Duration::from_millis(1);
    config
}

async fn wait_for_connected(rx: &mut tokio::sync::mpsc::UnboundedReceiver<EngineEvent>) {
    loop {
        match rx.recv().await.expect("engine task alive") {
            EngineEvent::Status { message } if message == "Status: 1 peers connected" => return,
            _ => continue,
        }
    }
}

#[tokio::test(start_paused = true)]
async fn two_node_origination_delivers_exactly_once() {
    let service_id = unique_service_id("e2e-two-node");
    let (transport_a, events_a) = InProcessTransport::new(&service_id, "node-a");
    let (transport_b, events_b) = InProcessTransport::new(&service_id, "node-b");

    let (handle_a, mut rx_a) = mesh_relay::spawn(fast_config(&service_id, "node-a"), transport_a, events_a);
    let (handle_b, mut rx_b) = mesh_relay::spawn(fast_config(&service_id, "node-b"), transport_b, events_b);
    handle_a.start().await;
    handle_b.start().await;
    tokio::time::advance(Duration::from_millis(10)).await;

    wait_for_connected(&mut rx_a).await;
    wait_for_connected(&mut rx_b).await;

    handle_a
        .send_alert("Emergency alert! Move to higher ground.")
        .await
        .expect("non-empty text is accepted");

    let mut received = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(1), rx_b.recv())
            .await
            .expect("B must emit AlertReceived")
            .expect("engine task alive")
        {
            EngineEvent::AlertReceived { text, ttl, .. } => {
                received.push((text, ttl));
                break;
            }
            EngineEvent::Status { .. } => continue,
        }
    }

    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0, "Emergency alert! Move to higher ground.");
    assert_eq!(received[0].1, 8);

    // A must never see its own alert reflected back.
    let mut saw_alert_on_origin = false;
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(100), rx_a.recv()).await {
        if matches!(event, EngineEvent::AlertReceived { .. }) {
            saw_alert_on_origin = true;
        }
    }
    assert!(!saw_alert_on_origin, "origin must not display its own outbound alert");
}
