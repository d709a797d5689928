//! Whole-overlay behavior over the in-memory network.

use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{sleep, timeout, Instant};

use gossamer_link::memory::MemoryNetwork;
use gossamer_membership::{ConnectionState, MembershipConfig, MembershipEvent, PeerId};

use crate::{rendezvous_join, Node};

fn node(network: &MemoryNetwork, name: &str, config: MembershipConfig) -> Node {
    Node::spawn(PeerId::from_seed(name.as_bytes()), config, |notices| {
        network.endpoint(notices)
    })
}

async fn all_connected(nodes: &[Node], within: Duration) -> bool {
    let deadline = Instant::now() + within;
    loop {
        let mut connected = true;
        for node in nodes {
            if node.state().await != ConnectionState::Connect {
                connected = false;
                break;
            }
        }
        if connected {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn a_pair_bootstraps_each_other() {
    let network = MemoryNetwork::new();
    let seed = node(&network, "seed", MembershipConfig::fast());
    let joiner = node(&network, "joiner", MembershipConfig::fast());

    assert!(rendezvous_join(&joiner, &seed).await);
    let nodes = [seed, joiner];
    assert!(all_connected(&nodes, Duration::from_secs(5)).await);

    // Each side ends up with exactly the other as outbound neighbor.
    assert_eq!(nodes[0].peers(None).await.len(), 1);
    assert_eq!(nodes[1].peers(None).await.len(), 1);
    for n in nodes {
        n.shutdown().await;
    }
}

#[tokio::test]
async fn a_chain_of_joins_converges() {
    let network = MemoryNetwork::new();
    let config = MembershipConfig::fast();
    let mut nodes = Vec::new();
    for i in 0..5 {
        nodes.push(node(&network, &format!("peer-{i}"), config.clone()));
    }

    for i in 1..nodes.len() {
        assert!(
            rendezvous_join(&nodes[i], &nodes[i - 1]).await,
            "join {i} did not complete"
        );
    }

    assert!(all_connected(&nodes, Duration::from_secs(10)).await);
    for n in nodes {
        n.shutdown().await;
    }
}

#[tokio::test]
async fn broadcasts_surface_as_churn_at_the_neighbor() {
    let network = MemoryNetwork::new();
    let seed = node(&network, "seed", MembershipConfig::fast());
    let joiner = node(&network, "joiner", MembershipConfig::fast());
    assert!(rendezvous_join(&joiner, &seed).await);
    let nodes = [seed, joiner];
    assert!(all_connected(&nodes, Duration::from_secs(5)).await);

    let mut seed_events = nodes[0].subscribe();
    nodes[1].broadcast(json!({ "msg": "hello" }));

    let body = timeout(Duration::from_secs(5), async {
        loop {
            match seed_events.recv().await {
                Ok(MembershipEvent::Churn { body, .. }) => return Some(body),
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten();

    assert_eq!(body, Some(json!({ "msg": "hello" })));
    for n in nodes {
        n.shutdown().await;
    }
}

#[tokio::test]
async fn lease_churn_heals_a_pair() {
    let network = MemoryNetwork::new();
    let anchor = node(&network, "anchor", MembershipConfig::fast());
    let renewer = node(
        &network,
        "renewer",
        MembershipConfig::fast().with_lease(Duration::from_millis(500)),
    );
    assert!(rendezvous_join(&renewer, &anchor).await);
    let nodes = [anchor, renewer];
    assert!(all_connected(&nodes, Duration::from_secs(5)).await);

    // Let at least one lease cycle tear the inbound arcs down, then watch
    // the resubscription rebuild them.
    sleep(Duration::from_millis(700)).await;
    assert!(all_connected(&nodes, Duration::from_secs(10)).await);
    for n in nodes {
        n.shutdown().await;
    }
}
