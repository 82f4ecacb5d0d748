use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dim::identity::PeerId;
use dim::network::bootstrap::{run_discovery, seed_bootstrap_peers, Dialer};
use dim::network::discovery::{Discovery, PeerCandidate, StoreDiscovery};
use dim::network::handshake::{Established, HandshakeError};
use dim::network::registry::{Registry, RelaySettings};
use dim::network::transport::{Connector, TransportError};
use dim::network::{PeerSource, PeerStore, StreamAcceptor};
use parking_lot::Mutex;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};

fn peer(n: u8) -> PeerId {
    PeerId::from_bytes([n; 32])
}

fn addr(port: u16) -> SocketAddr {
    format!("127.0.0.1:{}", port).parse().unwrap()
}

const REACHABLE_PORT: u16 = 7001;

/// Succeeds only for `REACHABLE_PORT`, recording every dial.
struct ScriptedConnector {
    remote: PeerId,
    dialed: Arc<Mutex<Vec<SocketAddr>>>,
    remotes: Arc<Mutex<Vec<DuplexStream>>>,
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Stream = DuplexStream;

    async fn connect(
        &self,
        addr: SocketAddr,
        _known_peers: Vec<String>,
    ) -> Result<Established<DuplexStream>, TransportError> {
        self.dialed.lock().push(addr);
        if addr.port() != REACHABLE_PORT {
            return Err(TransportError::DialTimeout(addr));
        }
        let (local, remote) = tokio::io::duplex(1024);
        self.remotes.lock().push(remote);
        Ok(Established {
            peer: self.remote,
            listen_addr: None,
            known_peers: vec!["10.9.9.9:9999".into()],
            stream: local,
        })
    }
}

#[tokio::test]
async fn store_discovery_sweeps_repeatedly() {
    let store = PeerStore::new(16);
    seed_bootstrap_peers(&store, &[addr(6000)]).await;
    store.mark_success(&addr(6001), Some(peer(2))).await;

    let discovery = StoreDiscovery::new(store, Duration::from_millis(20));
    discovery.advertise("room").await;
    let mut candidates = discovery.find_peers("room");

    let mut first_sweep = Vec::new();
    for _ in 0..2 {
        first_sweep.push(timeout(Duration::from_secs(2), candidates.recv()).await.unwrap().unwrap());
    }
    first_sweep.sort_by_key(|c| c.addrs[0]);
    assert_eq!(
        first_sweep,
        vec![
            PeerCandidate {
                id: None,
                addrs: vec![addr(6000)]
            },
            PeerCandidate {
                id: Some(peer(2)),
                addrs: vec![addr(6001)]
            },
        ]
    );

    // The store is swept again after the interval.
    let again = timeout(Duration::from_secs(2), candidates.recv()).await.unwrap().unwrap();
    assert!(again.addrs[0] == addr(6000) || again.addrs[0] == addr(6001));
}

#[tokio::test]
async fn dial_loop_filters_candidates_and_tolerates_failures() {
    let local = peer(1);
    let remote = peer(2);
    let already = peer(3);

    let (registry, _inbound, _task) = Registry::spawn(RelaySettings::default());
    let acceptor = StreamAcceptor::new(registry.clone());
    let (held, _held_remote) = tokio::io::duplex(64);
    acceptor.accept(already, held).unwrap();

    let store = PeerStore::new(64);
    store.insert(addr(7003), PeerSource::Gossip).await;

    let dialed = Arc::new(Mutex::new(Vec::new()));
    let connector = Arc::new(ScriptedConnector {
        remote,
        dialed: dialed.clone(),
        remotes: Arc::new(Mutex::new(Vec::new())),
    });
    let own = addr(12345);
    let dialer = Dialer::new(connector, acceptor, store.clone(), local, Some(own));

    let (tx, rx) = mpsc::channel(16);
    let candidates = [
        PeerCandidate {
            id: Some(local),
            addrs: vec![addr(7000)],
        },
        PeerCandidate {
            id: Some(peer(4)),
            addrs: vec![],
        },
        PeerCandidate {
            id: Some(already),
            addrs: vec![addr(7002)],
        },
        PeerCandidate {
            id: None,
            addrs: vec![own],
        },
        PeerCandidate {
            id: None,
            addrs: vec![addr(7003)],
        },
        PeerCandidate {
            id: None,
            addrs: vec![addr(REACHABLE_PORT)],
        },
    ];
    for c in candidates {
        tx.send(c).await.unwrap();
    }
    drop(tx);
    timeout(Duration::from_secs(2), run_discovery(rx, dialer.clone()))
        .await
        .expect("loop ends with the candidate stream");

    let deadline = Instant::now() + Duration::from_secs(2);
    while dialed.lock().len() < 2 || dialer.in_flight() > 0 {
        assert!(Instant::now() < deadline, "dials did not finish");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let mut ports: Vec<u16> = dialed.lock().iter().map(|a| a.port()).collect();
    ports.sort();
    assert_eq!(ports, vec![REACHABLE_PORT, 7003]);

    assert!(registry.contains(remote).await.unwrap());
    assert_eq!(store.get(&addr(7003)).await.unwrap().failures, 1);
    let ok = store.get(&addr(REACHABLE_PORT)).await.unwrap();
    assert_eq!(ok.peer(), Some(remote));
    assert_eq!(
        store.get(&"10.9.9.9:9999".parse().unwrap()).await.unwrap().source,
        PeerSource::Gossip
    );
}

/// Every dial reaches a listener that turns out to be ourselves.
struct LoopbackConnector {
    dials: Arc<Mutex<usize>>,
}

#[async_trait]
impl Connector for LoopbackConnector {
    type Stream = DuplexStream;

    async fn connect(
        &self,
        _addr: SocketAddr,
        _known_peers: Vec<String>,
    ) -> Result<Established<DuplexStream>, TransportError> {
        *self.dials.lock() += 1;
        Err(TransportError::Handshake(HandshakeError::SelfConnection))
    }
}

#[tokio::test]
async fn own_listener_is_dialed_once_when_bound_to_any_address() {
    let (registry, _inbound, _task) = Registry::spawn(RelaySettings::default());
    let acceptor = StreamAcceptor::new(registry);
    let store = PeerStore::new(16);
    let mirrored = addr(7100);
    store.insert(mirrored, PeerSource::Gossip).await;

    let dials = Arc::new(Mutex::new(0));
    let connector = Arc::new(LoopbackConnector { dials: dials.clone() });
    let dialer = Dialer::new(connector, acceptor, store.clone(), peer(1), None);

    for _ in 0..3 {
        let (tx, rx) = mpsc::channel(1);
        tx.send(PeerCandidate {
            id: None,
            addrs: vec![mirrored],
        })
        .await
        .unwrap();
        drop(tx);
        timeout(Duration::from_secs(2), run_discovery(rx, dialer.clone()))
            .await
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while *dials.lock() < 1 || dialer.in_flight() > 0 {
            assert!(Instant::now() < deadline, "dial did not finish");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    assert_eq!(*dials.lock(), 1);
    assert!(dialer.is_self_addr(&mirrored));
    assert!(store.get(&mirrored).await.is_none());
}
