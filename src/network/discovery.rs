// src/network/discovery.rs

use crate::events::{dispatcher, model::LogLevel};
use crate::identity::PeerId;
use crate::network::peer_store::PeerStore;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;

const CANDIDATE_BUFFER: usize = 64;

/// A possibly-reachable node. The identity is known only for addresses that
/// completed a handshake before.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerCandidate {
    pub id: Option<PeerId>,
    pub addrs: Vec<SocketAddr>,
}

/// Endless stream of candidates; ends only when the producer stops.
pub type CandidateStream = mpsc::Receiver<PeerCandidate>;

#[async_trait]
pub trait Discovery: Send + Sync {
    /// Announce that this node takes part in `rendezvous`.
    async fn advertise(&self, rendezvous: &str);

    fn find_peers(&self, rendezvous: &str) -> CandidateStream;
}

/// Discovery backed by the peer store: every sweep yields all stored
/// candidates, then waits `interval` before the next one.
#[derive(Clone)]
pub struct StoreDiscovery {
    store: PeerStore,
    interval: Duration,
}

impl StoreDiscovery {
    pub fn new(store: PeerStore, interval: Duration) -> Self {
        Self {
            store,
            interval: interval.max(Duration::from_millis(10)),
        }
    }
}

#[async_trait]
impl Discovery for StoreDiscovery {
    async fn advertise(&self, rendezvous: &str) {
        dispatcher::emit_discovery(
            LogLevel::Info,
            "advertise",
            None,
            Some(format!("rendezvous={:?} known={}", rendezvous, self.store.len().await)),
        );
    }

    fn find_peers(&self, rendezvous: &str) -> CandidateStream {
        let (tx, rx) = mpsc::channel(CANDIDATE_BUFFER);
        let store = self.store.clone();
        let interval = self.interval;
        let rendezvous = rendezvous.to_string();
        tokio::spawn(async move {
            let mut sweep = 0u64;
            loop {
                sweep += 1;
                let records = store.records().await;
                dispatcher::emit_discovery(
                    LogLevel::Debug,
                    "discovery_sweep",
                    None,
                    Some(format!(
                        "rendezvous={:?} sweep={} candidates={}",
                        rendezvous,
                        sweep,
                        records.len()
                    )),
                );
                for rec in records {
                    let candidate = PeerCandidate {
                        id: rec.peer(),
                        addrs: vec![rec.addr],
                    };
                    if tx.send(candidate).await.is_err() {
                        return;
                    }
                }
                store.persist().await;
                tokio::time::sleep(interval).await;
            }
        });
        rx
    }
}
