//! End-to-end tests: overlay nodes bootstrapping through a live relay.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use weft_overlay::{Identity, MemoryTransport, Message, Node, NodeConfig, TransportBackend};
use weft_relay::SignalingRelay;

/// Starts a relay with its own bound node on an ephemeral port, returning
/// the signaling URL and the relay's node.
async fn start_relay(backend: &MemoryTransport) -> (String, Arc<Node>) {
    let identity = Identity::generate();
    let shared: Arc<dyn TransportBackend> = Arc::new(backend.clone());
    let node = Node::with_identity(identity.clone(), NodeConfig::new(), Arc::clone(&shared));
    let relay = SignalingRelay::new(identity, shared, false);
    relay.connect_node(Arc::clone(&node)).unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = relay.serve_on(listener).await;
    });
    (format!("ws://{addr}/signal"), node)
}

/// Creates a node configured for the relay and starts its bootstrap.
fn join_node(url: &str, backend: &MemoryTransport) -> Arc<Node> {
    let node = Node::new(
        NodeConfig::new().with_rendezvous_urls(vec![url.to_string()]),
        Arc::new(backend.clone()),
    );
    node.bootstrap();
    node
}

#[tokio::test]
async fn nodes_bootstrap_and_probe_through_relay() {
    let backend = MemoryTransport::new();
    let (url, relay_node) = start_relay(&backend).await;

    let a = join_node(&url, &backend);
    let b = join_node(&url, &backend);

    tokio::time::timeout(Duration::from_secs(5), async {
        a.wait_until(|| a.peer_count() > 0).await.unwrap();
        b.wait_until(|| b.peer_count() > 0).await.unwrap();
    })
    .await
    .unwrap();

    assert_eq!(a.peer_keys(), vec![relay_node.public_key()]);
    assert_eq!(b.peer_keys(), vec![relay_node.public_key()]);

    // Liveness probe round-trip against the relay's node.
    let conn = a.peer_connection(relay_node.public_key()).unwrap();
    let waiter = Arc::clone(&a);
    let reply = tokio::spawn(async move { waiter.wait_for_message().await });
    tokio::task::yield_now().await;
    conn.ping();

    let envelope = tokio::time::timeout(Duration::from_secs(5), reply)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(envelope.signer(), relay_node.public_key());
    assert_eq!(envelope.message(), &Message::Pong);
}

#[tokio::test]
async fn discovery_lists_other_nodes_but_not_requester() {
    let backend = MemoryTransport::new();
    let (url, relay_node) = start_relay(&backend).await;

    let a = join_node(&url, &backend);
    let b = join_node(&url, &backend);
    let c = join_node(&url, &backend);

    tokio::time::timeout(Duration::from_secs(5), async {
        for node in [&a, &b, &c] {
            node.wait_until(|| node.peer_count() > 0).await.unwrap();
        }
        relay_node
            .wait_until(|| relay_node.peer_count() == 3)
            .await
            .unwrap();
    })
    .await
    .unwrap();

    let seen: Arc<Mutex<Vec<Message>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    a.on_every_message(move |envelope| {
        sink.lock().unwrap().push(envelope.message().clone());
    });

    let request_id = uuid::Uuid::new_v4();
    let conn = a.peer_connection(relay_node.public_key()).unwrap();
    conn.send_message(Message::FindPeers { request_id });

    tokio::time::timeout(Duration::from_secs(5), async {
        a.wait_until(|| {
            seen.lock().unwrap().iter().any(
                |m| matches!(m, Message::Peers { request_id: rid, .. } if *rid == request_id),
            )
        })
        .await
        .unwrap();
    })
    .await
    .unwrap();

    let messages = seen.lock().unwrap();
    let peers = messages
        .iter()
        .find_map(|m| match m {
            Message::Peers { request_id: rid, peers } if *rid == request_id => Some(peers.clone()),
            _ => None,
        })
        .unwrap();

    assert_eq!(peers.len(), 2);
    assert!(peers.contains(&b.public_key()));
    assert!(peers.contains(&c.public_key()));
    assert!(!peers.contains(&a.public_key()));
}

#[tokio::test]
async fn repeated_bootstrap_is_idempotent() {
    let backend = MemoryTransport::new();
    let (url, relay_node) = start_relay(&backend).await;

    let a = join_node(&url, &backend);
    a.bootstrap();
    a.bootstrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        a.wait_until(|| a.peer_count() > 0).await.unwrap();
        relay_node
            .wait_until(|| relay_node.peer_count() > 0)
            .await
            .unwrap();
    })
    .await
    .unwrap();

    // Every call was counted, but only one connection came up.
    assert_eq!(a.stats().bootstraps, 3);
    assert_eq!(a.peer_count(), 1);
    assert_eq!(relay_node.peer_count(), 1);
}
