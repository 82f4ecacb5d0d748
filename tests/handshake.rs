use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dim::identity::Identity;
use dim::network::handshake::{self, HandshakeConfig, HandshakeError, Hello};
use dim::network::listener::{bind_listener, spawn_listener, ListenerContext};
use dim::network::registry::{Registry, RelaySettings};
use dim::network::transport::{Connector, TcpConnector, TransportError};
use dim::network::{Message, PeerSource, PeerStore, StreamAcceptor};
use tokio::time::{timeout, Instant};

const PROTOCOL: &str = "/chat/1.1.0";

fn config(identity: Arc<Identity>, rendezvous: &str, listen_addr: Option<&str>) -> HandshakeConfig {
    HandshakeConfig {
        identity,
        protocol_id: PROTOCOL.to_string(),
        rendezvous: rendezvous.to_string(),
        listen_addr: listen_addr.map(str::to_string),
        timeout: Duration::from_secs(2),
    }
}

#[test]
fn tampered_hello_fails_signature_check() {
    let remote = Identity::generate();
    let local = config(Arc::new(Identity::generate()), "room", None);
    let mut hello = Hello::signed(&remote, PROTOCOL, "room", Some("10.0.0.1:1".into()), vec![]);
    assert_eq!(hello.validate(&local).unwrap(), remote.peer_id());

    hello.known_peers.push("10.0.0.9:9".into());
    assert!(matches!(hello.validate(&local), Err(HandshakeError::BadSignature(_))));
}

#[test]
fn garbage_hello_is_malformed() {
    assert!(matches!(Hello::from_json("not json\n"), Err(HandshakeError::Malformed(_))));
}

#[tokio::test]
async fn respond_and_initiate_exchange_identities() {
    let a = Arc::new(Identity::generate());
    let b = Arc::new(Identity::generate());
    let cfg_a = config(a.clone(), "room", Some("127.0.0.1:7000"));
    let cfg_b = config(b.clone(), "room", None);
    let (sa, sb) = tokio::io::duplex(4096);

    let (ra, rb) = tokio::join!(
        handshake::respond(sa, &cfg_a, vec!["10.1.1.1:1".into()]),
        handshake::initiate(sb, &cfg_b, vec![]),
    );
    let at_a = ra.expect("listener side");
    let at_b = rb.expect("dialer side");
    assert_eq!(at_a.peer, b.peer_id());
    assert_eq!(at_b.peer, a.peer_id());
    assert_eq!(at_b.listen_addr.as_deref(), Some("127.0.0.1:7000"));
    assert_eq!(at_b.known_peers, vec!["10.1.1.1:1".to_string()]);
}

struct Node {
    addr: SocketAddr,
    registry: dim::network::RegistryHandle,
    inbound: dim::network::InboundReceiver,
    store: PeerStore,
}

async fn start_listening_node(identity: Arc<Identity>) -> Node {
    let (registry, inbound, _task) = Registry::spawn(RelaySettings::default());
    let listener = bind_listener("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let store = PeerStore::new(64);
    spawn_listener(
        listener,
        ListenerContext {
            handshake: config(identity, "room", Some(addr.to_string().as_str())),
            acceptor: StreamAcceptor::new(registry.clone()),
            peer_store: store.clone(),
            own_addr: Some(addr),
        },
    );
    Node {
        addr,
        registry,
        inbound,
        store,
    }
}

#[tokio::test]
async fn tcp_nodes_connect_and_exchange_lines() {
    let a = Arc::new(Identity::generate());
    let b = Arc::new(Identity::generate());
    let mut node_a = start_listening_node(a.clone()).await;

    let (registry_b, mut inbound_b, _task) = Registry::spawn(RelaySettings::default());
    let connector = TcpConnector::new(config(b.clone(), "room", Some("0.0.0.0:5555")), Duration::from_secs(2));
    let established = connector
        .connect(node_a.addr, vec!["10.0.0.7:4000".into()])
        .await
        .expect("handshake succeeds");
    assert_eq!(established.peer, a.peer_id());
    StreamAcceptor::new(registry_b.clone())
        .accept(established.peer, established.stream)
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while !node_a.registry.contains(b.peer_id()).await.unwrap() {
        assert!(Instant::now() < deadline, "listener never registered the dialer");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    node_a.registry.broadcast(Message::from("ping")).await.unwrap();
    let got = timeout(Duration::from_secs(2), inbound_b.recv()).await.unwrap().unwrap();
    assert_eq!(got.from, a.peer_id());
    assert_eq!(got.message.text(), "ping");

    registry_b.broadcast(Message::from("pong")).await.unwrap();
    let got = timeout(Duration::from_secs(2), node_a.inbound.recv()).await.unwrap().unwrap();
    assert_eq!(got.from, b.peer_id());
    assert_eq!(got.message.text(), "pong");

    // The dialer's advertised 0.0.0.0 is resolved to the observed address.
    let advertised: SocketAddr = "127.0.0.1:5555".parse().unwrap();
    let rec = node_a.store.get(&advertised).await.expect("dialer address recorded");
    assert_eq!(rec.peer(), Some(b.peer_id()));
    assert!(rec.last_success_epoch.is_some());
    let gossip = node_a
        .store
        .get(&"10.0.0.7:4000".parse().unwrap())
        .await
        .expect("gossiped address recorded");
    assert_eq!(gossip.source, PeerSource::Gossip);
}

#[tokio::test]
async fn rendezvous_mismatch_is_rejected() {
    let node_a = start_listening_node(Arc::new(Identity::generate())).await;
    let connector = TcpConnector::new(
        config(Arc::new(Identity::generate()), "another room", None),
        Duration::from_secs(2),
    );
    let err = connector.connect(node_a.addr, vec![]).await.unwrap_err();
    assert!(
        matches!(err, TransportError::Handshake(HandshakeError::RendezvousMismatch { .. })),
        "{:?}",
        err
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(node_a.registry.stats().await.unwrap().peers, 0);
}

#[tokio::test]
async fn protocol_mismatch_is_rejected() {
    let node_a = start_listening_node(Arc::new(Identity::generate())).await;
    let mut cfg = config(Arc::new(Identity::generate()), "room", None);
    cfg.protocol_id = "/chat/0.9.0".into();
    let err = TcpConnector::new(cfg, Duration::from_secs(2))
        .connect(node_a.addr, vec![])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TransportError::Handshake(HandshakeError::ProtocolMismatch { .. })
    ));
}

#[tokio::test]
async fn dialing_ourselves_is_rejected() {
    let me = Arc::new(Identity::generate());
    let node = start_listening_node(me.clone()).await;
    let err = TcpConnector::new(config(me, "room", None), Duration::from_secs(2))
        .connect(node.addr, vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Handshake(HandshakeError::SelfConnection)));
}

#[tokio::test]
async fn dial_to_closed_port_fails() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let err = TcpConnector::new(
        config(Arc::new(Identity::generate()), "room", None),
        Duration::from_secs(2),
    )
    .connect(addr, vec![])
    .await
    .unwrap_err();
    assert!(matches!(err, TransportError::Dial { .. } | TransportError::DialTimeout(_)));
}
