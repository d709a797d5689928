//! Assemble a small in-memory overlay and watch it converge.
//!
//! Peers join one after another, each using the previously joined peer as
//! its rendezvous, then one application payload is gossiped through the
//! mesh. `RUST_LOG=debug` shows the walk and the offer spray.

use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gossamer_link::memory::MemoryNetwork;
use gossamer_membership::{MembershipConfig, PeerId};
use gossamer_node::{rendezvous_join, Node};

const PEERS: usize = 8;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let network = MemoryNetwork::new();
    let config = MembershipConfig::fast();
    let nodes: Vec<Node> = (0..PEERS)
        .map(|i| {
            let uid = PeerId::from_seed(format!("demo-peer-{i}").as_bytes());
            Node::spawn(uid, config.clone(), |notices| network.endpoint(notices))
        })
        .collect();

    for i in 1..nodes.len() {
        if rendezvous_join(&nodes[i], &nodes[i - 1]).await {
            info!(joiner = %nodes[i].uid(), rendezvous = %nodes[i - 1].uid(), "peer joined");
        } else {
            warn!(joiner = %nodes[i].uid(), "join did not complete");
        }
    }

    for node in &nodes {
        node.ready().await;
    }
    info!(peers = nodes.len(), "overlay fully connected");

    nodes[0].broadcast(serde_json::json!({ "hello": "overlay" }));
    tokio::time::sleep(Duration::from_millis(200)).await;

    for node in nodes {
        node.shutdown().await;
    }
}
