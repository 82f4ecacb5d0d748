// src/network/peer_store.rs
// Candidate addresses for the current rendezvous, optionally persisted as JSON.

use crate::events::{dispatcher, model::LogLevel};
use crate::identity::PeerId;
use rand::seq::IteratorRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt as _;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerSource {
    Bootstrap,
    Handshake,
    Gossip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRecord {
    pub addr: SocketAddr,
    pub source: PeerSource,
    pub failures: u32,
    pub last_success_epoch: Option<u64>,
    /// Hex identity, filled in after a successful handshake
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
}

impl PeerRecord {
    fn new(addr: SocketAddr, source: PeerSource) -> Self {
        Self {
            addr,
            source,
            failures: 0,
            last_success_epoch: None,
            peer_id: None,
        }
    }

    pub fn peer(&self) -> Option<PeerId> {
        self.peer_id.as_deref().and_then(|s| s.parse().ok())
    }
}

#[derive(Clone)]
pub struct PeerStore {
    inner: Arc<RwLock<HashMap<SocketAddr, PeerRecord>>>,
    max_entries: usize,
    path: Option<PathBuf>,
}

impl Default for PeerStore {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_PEER_STORE_MAX)
    }
}

impl PeerStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            max_entries: max_entries.max(1),
            path: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Add `addr` unless already known. Returns true when a new record was created.
    pub async fn insert(&self, addr: SocketAddr, source: PeerSource) -> bool {
        let mut map = self.inner.write().await;
        if map.contains_key(&addr) {
            return false;
        }
        Self::make_room(&mut map, self.max_entries);
        map.insert(addr, PeerRecord::new(addr, source));
        true
    }

    pub async fn bulk_insert<I: IntoIterator<Item = SocketAddr>>(&self, it: I, source: PeerSource) -> usize {
        let mut added = 0;
        for addr in it {
            if self.insert(addr, source).await {
                added += 1;
            }
        }
        added
    }

    /// Record a completed handshake on `addr`, creating the record if needed.
    pub async fn mark_success(&self, addr: &SocketAddr, peer: Option<PeerId>) {
        let mut map = self.inner.write().await;
        if !map.contains_key(addr) {
            Self::make_room(&mut map, self.max_entries);
        }
        let rec = map
            .entry(*addr)
            .or_insert_with(|| PeerRecord::new(*addr, PeerSource::Handshake));
        rec.last_success_epoch = Some(Self::epoch());
        rec.failures = 0;
        if let Some(p) = peer {
            rec.peer_id = Some(p.to_string());
        }
    }

    /// Absorb what a remote hello told us: its own listen address (a
    /// confirmed handshake) and the peers it knows (gossip). `observed` is the
    /// remote IP seen on the socket, substituted for an unspecified host.
    /// Returns how many new gossip records were added.
    pub async fn learn(
        &self,
        peer: PeerId,
        listen_addr: Option<&str>,
        known_peers: &[String],
        observed: Option<IpAddr>,
        own_addr: Option<SocketAddr>,
    ) -> usize {
        if let Some(addr) = listen_addr.and_then(|a| resolve_advertised(a, observed)) {
            if Some(addr) != own_addr {
                self.mark_success(&addr, Some(peer)).await;
            }
        }
        let gossip = known_peers
            .iter()
            .filter_map(|a| a.parse::<SocketAddr>().ok())
            .filter(|a| !a.ip().is_unspecified() && Some(*a) != own_addr)
            .collect::<Vec<_>>();
        self.bulk_insert(gossip, PeerSource::Gossip).await
    }

    pub async fn remove(&self, addr: &SocketAddr) -> Option<PeerRecord> {
        self.inner.write().await.remove(addr)
    }

    pub async fn mark_failure(&self, addr: &SocketAddr) {
        let mut map = self.inner.write().await;
        if let Some(rec) = map.get_mut(addr) {
            rec.failures = rec.failures.saturating_add(1);
        }
    }

    /// Up to `k` random addresses that have connected at least once, for
    /// sharing in our hello.
    pub async fn gossip_sample(&self, k: usize) -> Vec<String> {
        let map = self.inner.read().await;
        let mut rng = rand::thread_rng();
        map.values()
            .filter(|r| r.last_success_epoch.is_some())
            .map(|r| r.addr.to_string())
            .choose_multiple(&mut rng, k)
    }

    pub async fn records(&self) -> Vec<PeerRecord> {
        self.inner.read().await.values().cloned().collect()
    }

    pub async fn all(&self) -> Vec<SocketAddr> {
        self.inner.read().await.keys().cloned().collect()
    }

    pub async fn get(&self, addr: &SocketAddr) -> Option<PeerRecord> {
        self.inner.read().await.get(addr).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    // Evict the most-failing record (never-succeeded first) when full.
    fn make_room(map: &mut HashMap<SocketAddr, PeerRecord>, max_entries: usize) {
        while map.len() >= max_entries {
            let victim = map
                .values()
                .max_by_key(|r| (r.failures, std::cmp::Reverse(r.last_success_epoch.unwrap_or(0))))
                .map(|r| r.addr);
            match victim {
                Some(addr) => {
                    map.remove(&addr);
                }
                None => break,
            }
        }
    }

    /// Load records from `path`. A missing file gives an empty store; a
    /// corrupt one is logged and ignored.
    pub async fn load_from_file(path: impl Into<PathBuf>, max_entries: usize) -> Self {
        let path = path.into();
        let mut store = Self::new(max_entries);
        match fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<Vec<PeerRecord>>(&bytes) {
                Ok(entries) => {
                    let mut map = store.inner.write().await;
                    for rec in entries.into_iter().take(store.max_entries) {
                        map.insert(rec.addr, rec);
                    }
                }
                Err(e) => dispatcher::emit_discovery(
                    LogLevel::Warn,
                    "peer_store_corrupt",
                    None,
                    Some(format!("path={} err={}", path.display(), e)),
                ),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => dispatcher::emit_discovery(
                LogLevel::Warn,
                "peer_store_unreadable",
                None,
                Some(format!("path={} err={}", path.display(), e)),
            ),
        }
        store.path = Some(path);
        store
    }

    pub async fn save_to_file(&self, path: &Path) -> Result<(), std::io::Error> {
        let mut entries = self.records().await;
        // Prefer recent successes first
        entries.sort_by_key(|r| std::cmp::Reverse(r.last_success_epoch.unwrap_or(0)));
        let json = serde_json::to_vec_pretty(&entries).map_err(std::io::Error::other)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.ok();
        }
        let mut f = fs::File::create(path).await?;
        f.write_all(&json).await?;
        f.flush().await?;
        Ok(())
    }

    /// Save to the path the store was loaded from, if any. Failures are logged.
    pub async fn persist(&self) {
        let Some(path) = self.path.as_deref() else {
            return;
        };
        if let Err(e) = self.save_to_file(path).await {
            dispatcher::emit_discovery(
                LogLevel::Warn,
                "peer_store_save_failed",
                None,
                Some(format!("path={} err={}", path.display(), e)),
            );
        }
    }

    fn epoch() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Parse an advertised `host:port`, replacing an unspecified host (such as
/// `0.0.0.0`) with the address the connection was observed from.
pub fn resolve_advertised(advertised: &str, observed: Option<IpAddr>) -> Option<SocketAddr> {
    let mut addr: SocketAddr = advertised.trim().parse().ok()?;
    if addr.ip().is_unspecified() {
        addr.set_ip(observed?);
    }
    Some(addr)
}
