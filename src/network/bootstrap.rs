// src/network/bootstrap.rs

use super::{PeerSource, PeerStore};
use crate::constants::MAX_GOSSIP_PEERS;
use crate::events::{dispatcher, model::LogLevel};
use crate::identity::PeerId;
use crate::network::acceptor::StreamAcceptor;
use crate::network::discovery::{CandidateStream, PeerCandidate};
use crate::network::handshake::HandshakeError;
use crate::network::transport::{Connector, TransportError};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

/// Seed the store with configured bootstrap addresses.
pub async fn seed_bootstrap_peers(store: &PeerStore, peers: &[SocketAddr]) {
    if peers.is_empty() {
        dispatcher::emit_network(
            "bootstrap",
            LogLevel::Info,
            "bootstrap_nodes_missing",
            None,
            Some("source=config".to_string()),
        );
        return;
    }
    let added = store.bulk_insert(peers.iter().copied(), PeerSource::Bootstrap).await;
    dispatcher::emit_network(
        "bootstrap",
        LogLevel::Info,
        "bootstrap_seeded",
        None,
        Some(format!("configured={} new={}", peers.len(), added)),
    );
}

/// Shared state of the dial loop.
pub struct Dialer<C> {
    pub connector: Arc<C>,
    pub acceptor: StreamAcceptor,
    pub peer_store: PeerStore,
    pub local: PeerId,
    pub own_addr: Option<SocketAddr>,
    in_flight: Arc<Mutex<HashSet<SocketAddr>>>,
    /// Addresses that answered with our own identity.
    self_addrs: Arc<Mutex<HashSet<SocketAddr>>>,
}

impl<C> Clone for Dialer<C> {
    fn clone(&self) -> Self {
        Self {
            connector: self.connector.clone(),
            acceptor: self.acceptor.clone(),
            peer_store: self.peer_store.clone(),
            local: self.local,
            own_addr: self.own_addr,
            in_flight: self.in_flight.clone(),
            self_addrs: self.self_addrs.clone(),
        }
    }
}

impl<C> Dialer<C>
where
    C: Connector + 'static,
{
    pub fn new(
        connector: Arc<C>,
        acceptor: StreamAcceptor,
        peer_store: PeerStore,
        local: PeerId,
        own_addr: Option<SocketAddr>,
    ) -> Self {
        Self {
            connector,
            acceptor,
            peer_store,
            local,
            own_addr,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            self_addrs: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Whether `addr` turned out to be this node.
    pub fn is_self_addr(&self, addr: &SocketAddr) -> bool {
        Some(*addr) == self.own_addr || self.self_addrs.lock().contains(addr)
    }

    /// Decide which addresses of `candidate` to dial now. Returns `None` when
    /// the registry has stopped.
    async fn targets(&self, candidate: &PeerCandidate) -> Option<Vec<SocketAddr>> {
        if candidate.id == Some(self.local) {
            return Some(Vec::new());
        }
        if candidate.addrs.is_empty() {
            return Some(Vec::new());
        }
        if let Some(id) = candidate.id {
            match self.acceptor.registry().contains(id).await {
                Ok(true) => return Some(Vec::new()),
                Ok(false) => {}
                Err(_) => return None,
            }
        }
        let addrs: Vec<SocketAddr> = candidate
            .addrs
            .iter()
            .copied()
            .filter(|a| !self.is_self_addr(a))
            .collect();
        let in_flight = self.in_flight.lock();
        Some(addrs.into_iter().filter(|a| !in_flight.contains(a)).collect())
    }

    /// Dial one address; failures are logged and recorded, never fatal.
    pub async fn dial(&self, addr: SocketAddr) {
        if !self.in_flight.lock().insert(addr) {
            return;
        }
        let known = self.peer_store.gossip_sample(MAX_GOSSIP_PEERS).await;
        match self.connector.connect(addr, known).await {
            Ok(established) => {
                self.peer_store.mark_success(&addr, Some(established.peer)).await;
                self.peer_store
                    .learn(
                        established.peer,
                        established.listen_addr.as_deref(),
                        &established.known_peers,
                        Some(addr.ip()),
                        self.own_addr,
                    )
                    .await;
                dispatcher::emit_network(
                    "bootstrap",
                    LogLevel::Info,
                    "dial_success",
                    Some(addr.to_string()),
                    Some(format!("peer={}", established.peer)),
                );
                self.acceptor
                    .accept_from(established.peer, self.local, established.stream);
            }
            Err(TransportError::Handshake(HandshakeError::SelfConnection)) => {
                self.self_addrs.lock().insert(addr);
                self.peer_store.remove(&addr).await;
                dispatcher::emit_network(
                    "bootstrap",
                    LogLevel::Debug,
                    "dial_self_skipped",
                    Some(addr.to_string()),
                    None,
                );
            }
            Err(e) => {
                self.peer_store.mark_failure(&addr).await;
                dispatcher::emit_network(
                    "bootstrap",
                    LogLevel::Warn,
                    "dial_failed",
                    Some(addr.to_string()),
                    Some(e.to_string()),
                );
            }
        }
        self.in_flight.lock().remove(&addr);
    }
}

/// Consume discovered candidates and dial the ones worth dialing, each on its
/// own task. Returns when the candidate stream ends or the registry stops.
pub async fn run_discovery<C>(mut candidates: CandidateStream, dialer: Dialer<C>)
where
    C: Connector + 'static,
{
    while let Some(candidate) = candidates.recv().await {
        let Some(targets) = dialer.targets(&candidate).await else {
            break;
        };
        for addr in targets {
            let dialer = dialer.clone();
            tokio::spawn(async move {
                dialer.dial(addr).await;
            });
        }
    }
    dispatcher::emit_discovery(LogLevel::Debug, "discovery_loop_stopped", None, None);
}
