// src/network/registry.rs
//
// The single authority over the live peer set. The map below is owned by the
// registry loop; connection tasks only reach it through channels.

use crate::events::{dispatcher, model::LogLevel};
use crate::identity::PeerId;
use crate::network::connection::{EnqueueOutcome, PeerHandle};
use crate::network::message::{Inbound, Message};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub use crate::network::connection::{ConnectionId, QueuePolicy};

pub type InboundReceiver = mpsc::Receiver<Inbound>;

/// Two connections with the same peer, dialed from opposite ends within this
/// window, are treated as crossed dials rather than a reconnect.
pub const CROSSED_DIAL_WINDOW: Duration = Duration::from_secs(5);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("connection registry is no longer running")]
pub struct RegistryClosed;

/// Channel capacities and the per-peer queue policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySettings {
    pub outbound: QueuePolicy,
    pub inbound_capacity: usize,
    pub broadcast_capacity: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            outbound: QueuePolicy::Unbounded,
            inbound_capacity: crate::constants::DEFAULT_INBOUND_CAPACITY,
            broadcast_capacity: crate::constants::DEFAULT_BROADCAST_CAPACITY,
        }
    }
}

/// Raised by a dying connection's reader or writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnect {
    pub peer: PeerId,
    pub conn: ConnectionId,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Currently registered peers
    pub peers: usize,
    pub registered: u64,
    /// Registrations that displaced a live entry for the same identity
    pub replaced: u64,
    /// Crossed-dial duplicates closed in favour of the existing entry
    pub rejected: u64,
    pub removed: u64,
    pub broadcasts: u64,
    /// Messages placed on an outbound queue
    pub delivered: u64,
    /// Messages dropped because a bounded queue was full or already closed
    pub dropped: u64,
}

enum Query {
    Peers(oneshot::Sender<Vec<PeerId>>),
    Contains(PeerId, oneshot::Sender<bool>),
    Stats(oneshot::Sender<RegistryStats>),
}

/// Cheap, clonable access to a running registry.
#[derive(Clone)]
pub struct RegistryHandle {
    connect_tx: mpsc::UnboundedSender<PeerHandle>,
    disconnect_tx: mpsc::UnboundedSender<Disconnect>,
    broadcast_tx: mpsc::Sender<Message>,
    query_tx: mpsc::UnboundedSender<Query>,
    inbound_tx: mpsc::Sender<Inbound>,
    settings: RelaySettings,
}

impl RegistryHandle {
    pub fn settings(&self) -> RelaySettings {
        self.settings
    }

    /// Submit a new connection for registration.
    pub fn register(&self, handle: PeerHandle) -> Result<(), RegistryClosed> {
        self.connect_tx.send(handle).map_err(|_| RegistryClosed)
    }

    /// Remove `peer` if its current entry belongs to `conn`; otherwise nothing happens.
    pub fn unregister(&self, peer: PeerId, conn: ConnectionId) {
        let _ = self.disconnect_tx.send(Disconnect { peer, conn });
    }

    /// Sender connection tasks use to report their own death.
    pub fn disconnect_sender(&self) -> mpsc::UnboundedSender<Disconnect> {
        self.disconnect_tx.clone()
    }

    /// Sender reader tasks feed received lines into.
    pub fn inbound_sender(&self) -> mpsc::Sender<Inbound> {
        self.inbound_tx.clone()
    }

    /// Queue a message for fan-out to every registered peer. Waits only when
    /// the broadcast channel itself is full.
    pub async fn broadcast(&self, message: Message) -> Result<(), RegistryClosed> {
        self.broadcast_tx
            .send(message)
            .await
            .map_err(|_| RegistryClosed)
    }

    pub async fn peers(&self) -> Result<Vec<PeerId>, RegistryClosed> {
        let (tx, rx) = oneshot::channel();
        self.query_tx
            .send(Query::Peers(tx))
            .map_err(|_| RegistryClosed)?;
        rx.await.map_err(|_| RegistryClosed)
    }

    pub async fn contains(&self, peer: PeerId) -> Result<bool, RegistryClosed> {
        let (tx, rx) = oneshot::channel();
        self.query_tx
            .send(Query::Contains(peer, tx))
            .map_err(|_| RegistryClosed)?;
        rx.await.map_err(|_| RegistryClosed)
    }

    pub async fn stats(&self) -> Result<RegistryStats, RegistryClosed> {
        let (tx, rx) = oneshot::channel();
        self.query_tx
            .send(Query::Stats(tx))
            .map_err(|_| RegistryClosed)?;
        rx.await.map_err(|_| RegistryClosed)
    }
}

pub struct Registry {
    peers: HashMap<PeerId, PeerHandle>,
    stats: RegistryStats,
    connect_rx: mpsc::UnboundedReceiver<PeerHandle>,
    disconnect_rx: mpsc::UnboundedReceiver<Disconnect>,
    broadcast_rx: mpsc::Receiver<Message>,
    query_rx: mpsc::UnboundedReceiver<Query>,
}

impl Registry {
    /// Construct an empty registry. Nothing happens until `run` is polled.
    pub fn new(settings: RelaySettings) -> (Registry, RegistryHandle, InboundReceiver) {
        let (connect_tx, connect_rx) = mpsc::unbounded_channel();
        let (disconnect_tx, disconnect_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast_rx) = mpsc::channel(settings.broadcast_capacity.max(1));
        let (query_tx, query_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(settings.inbound_capacity.max(1));
        let registry = Registry {
            peers: HashMap::new(),
            stats: RegistryStats::default(),
            connect_rx,
            disconnect_rx,
            broadcast_rx,
            query_rx,
        };
        let handle = RegistryHandle {
            connect_tx,
            disconnect_tx,
            broadcast_tx,
            query_tx,
            inbound_tx,
            settings,
        };
        (registry, handle, inbound_rx)
    }

    /// Construct and start the loop on the current runtime.
    pub fn spawn(settings: RelaySettings) -> (RegistryHandle, InboundReceiver, JoinHandle<()>) {
        let (registry, handle, inbound) = Registry::new(settings);
        let task = tokio::spawn(registry.run());
        (handle, inbound, task)
    }

    /// Process one event at a time until every sender is gone.
    ///
    /// Connects are polled before disconnects: a connection is submitted
    /// before its tasks start, so its own disconnect can never be handled
    /// ahead of its registration.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                Some(handle) = self.connect_rx.recv() => self.register(handle),
                Some(disconnect) = self.disconnect_rx.recv() => self.unregister(disconnect),
                Some(query) = self.query_rx.recv() => self.answer(query),
                Some(message) = self.broadcast_rx.recv() => self.fan_out(message),
                else => break,
            }
        }
        dispatcher::emit_system(
            "registry",
            LogLevel::Debug,
            "registry_stopped",
            Some(format!("peers={}", self.peers.len())),
        );
    }

    /// Crossed dials are settled the same way on both ends: the socket
    /// opened by the lower identity survives. Anything else replaces.
    fn keeps_existing(existing: &PeerHandle, incoming: &PeerHandle) -> bool {
        match (existing.dialer, incoming.dialer) {
            (Some(kept), Some(other))
                if kept != other
                    && incoming.opened_at.saturating_duration_since(existing.opened_at)
                        < CROSSED_DIAL_WINDOW =>
            {
                kept < other
            }
            _ => false,
        }
    }

    fn register(&mut self, handle: PeerHandle) {
        let peer = handle.peer;
        let conn = handle.conn;
        self.stats.registered += 1;
        if let Some(existing) = self.peers.get(&peer) {
            if Self::keeps_existing(existing, &handle) {
                handle.shutdown();
                self.stats.rejected += 1;
                dispatcher::emit_peer(
                    "registry",
                    LogLevel::Info,
                    "crossed_dial_rejected",
                    peer.to_string(),
                    Some(conn.get()),
                    Some(format!("kept_conn={}", existing.conn.get())),
                );
                return;
            }
        }
        match self.peers.insert(peer, handle) {
            Some(previous) => {
                // Replace-and-close: the older connection is told to stop and
                // its eventual disconnect no longer matches the stored entry.
                previous.shutdown();
                self.stats.replaced += 1;
                dispatcher::emit_peer(
                    "registry",
                    LogLevel::Info,
                    "peer_replaced",
                    peer.to_string(),
                    Some(conn.get()),
                    Some(format!("previous_conn={}", previous.conn.get())),
                );
            }
            None => dispatcher::emit_peer(
                "registry",
                LogLevel::Info,
                "peer_registered",
                peer.to_string(),
                Some(conn.get()),
                Some(format!("peers={}", self.peers.len())),
            ),
        }
    }

    fn unregister(&mut self, disconnect: Disconnect) {
        let current = self.peers.get(&disconnect.peer).map(|h| h.conn);
        if current == Some(disconnect.conn) {
            self.peers.remove(&disconnect.peer);
            self.stats.removed += 1;
            dispatcher::emit_peer(
                "registry",
                LogLevel::Info,
                "peer_unregistered",
                disconnect.peer.to_string(),
                Some(disconnect.conn.get()),
                Some(format!("peers={}", self.peers.len())),
            );
        } else {
            dispatcher::emit_peer(
                "registry",
                LogLevel::Debug,
                "unregister_ignored",
                disconnect.peer.to_string(),
                Some(disconnect.conn.get()),
                Some(format!("current={:?}", current.map(|c| c.get()))),
            );
        }
    }

    fn fan_out(&mut self, message: Message) {
        self.stats.broadcasts += 1;
        let mut delivered = 0u64;
        for (peer, handle) in &self.peers {
            match handle.outbound.enqueue(message.clone()) {
                EnqueueOutcome::Queued => delivered += 1,
                outcome => {
                    self.stats.dropped += 1;
                    dispatcher::emit_peer(
                        "registry",
                        LogLevel::Warn,
                        "outbound_dropped",
                        peer.to_string(),
                        Some(handle.conn.get()),
                        Some(format!("outcome={:?}", outcome)),
                    );
                }
            }
        }
        self.stats.delivered += delivered;
        dispatcher::emit_system(
            "registry",
            LogLevel::Debug,
            "broadcast_fanout",
            Some(format!(
                "bytes={} peers={} delivered={}",
                message.len(),
                self.peers.len(),
                delivered
            )),
        );
    }

    fn answer(&self, query: Query) {
        match query {
            Query::Peers(reply) => {
                let _ = reply.send(self.peers.keys().copied().collect());
            }
            Query::Contains(peer, reply) => {
                let _ = reply.send(self.peers.contains_key(&peer));
            }
            Query::Stats(reply) => {
                let _ = reply.send(RegistryStats {
                    peers: self.peers.len(),
                    ..self.stats
                });
            }
        }
    }
}
