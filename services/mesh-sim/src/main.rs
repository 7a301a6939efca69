// mesh-sim: runs N simulated mesh-relay nodes over an in-process transport
// and logs every alert/status event to the terminal. There is no radio here
// and no UI; it exists so the relay engine's flooding and reconnection
// behavior can be observed without real hardware.

use std::time::Duration;

use clap::{Arg, Command};
use mesh_relay::{EngineEvent, MeshConfig};
use mesh_test_support::InProcessTransport;
use tracing::info;

fn validate_node_count(value: &str) -> Result<u32, String> {
    value
        .parse::<u32>()
        .map_err(|_| "node count must be a positive integer".to_owned())
        .and_then(|n| if n >= 2 { Ok(n) } else { Err("node count must be >= 2".to_owned()) })
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "mesh-sim starting");

    let matches = Command::new("mesh-sim")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Simulates N mesh-relay nodes over an in-process transport")
        .arg(
            Arg::new("nodes")
                .help("Number of simulated nodes")
                .short('n')
                .long("nodes")
                .value_parser(validate_node_count)
                .default_value("3"),
        )
        .arg(
            Arg::new("message")
                .help("Alert text the first node originates once all nodes have connected")
                .short('m')
                .long("message")
                .default_value("Emergency alert! Move to higher ground."),
        )
        .get_matches();

    let node_count = *matches.get_one::<u32>("nodes").expect("nodes has a default");
    let message = matches.get_one::<String>("message").expect("message has a default").clone();

    let service_id = "net.example.mesh.sim".to_string();
    let names: Vec<String> = (0..node_count).map(|i| format!("node-{i}")).collect();

    let mut handles = Vec::with_capacity(names.len());
    let mut event_tasks = Vec::with_capacity(names.len());

    for name in &names {
        let (transport, transport_events) = InProcessTransport::new(&service_id, name);
        let config = MeshConfig::new(&service_id, name);
        let (handle, mut events) = mesh_relay::spawn(config, transport, transport_events);
        handle.start().await;

        let name = name.clone();
        event_tasks.push(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    EngineEvent::AlertReceived { id, text, ttl, .. } => {
                        info!(node = %name, %id, %text, ttl, "alert received");
                    }
                    EngineEvent::Status { message } => {
                        info!(node = %name, %message, "status");
                    }
                }
            }
        }));
        handles.push(handle);
    }

    // Give discovery time to converge before originating.
    tokio::time::sleep(Duration::from_secs(3)).await;

    if let Some(origin) = handles.first() {
        info!(%message, "originating alert");
        if let Err(err) = origin.send_alert(message).await {
            info!(error = %err, "failed to originate alert");
        }
    }

    tokio::time::sleep(Duration::from_secs(2)).await;

    for handle in &handles {
        handle.shutdown().await;
    }
    for task in event_tasks {
        let _ = tokio::time::timeout(Duration::from_millis(200), task).await;
    }
}
