// src/network/acceptor.rs

use crate::events::{dispatcher, model::LogLevel};
use crate::identity::PeerId;
use crate::network::connection::{ConnectionTasks, PeerConnection};
use crate::network::registry::RegistryHandle;
use tokio::io::{AsyncRead, AsyncWrite};

/// The single creation path for peer connections. The listener calls it after
/// an inbound handshake and the dialer after an outbound one.
#[derive(Clone)]
pub struct StreamAcceptor {
    registry: RegistryHandle,
}

impl StreamAcceptor {
    pub fn new(registry: RegistryHandle) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    /// Bind `stream` to `peer`, submit it to the registry, then start its
    /// reader and writer. Returns `None` when the registry is gone, in which
    /// case the stream is dropped (closed) immediately.
    pub fn accept<S>(&self, peer: PeerId, stream: S) -> Option<ConnectionTasks>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.start(peer, None, stream)
    }

    /// Like `accept`, recording which identity dialed the socket so the
    /// registry can settle crossed dials between the same two nodes.
    pub fn accept_from<S>(&self, peer: PeerId, dialer: PeerId, stream: S) -> Option<ConnectionTasks>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.start(peer, Some(dialer), stream)
    }

    fn start<S>(&self, peer: PeerId, dialer: Option<PeerId>, stream: S) -> Option<ConnectionTasks>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let settings = self.registry.settings();
        let (connection, mut handle) = PeerConnection::new(
            peer,
            stream,
            settings.outbound,
            self.registry.disconnect_sender(),
        );
        if let Some(d) = dialer {
            handle = handle.with_dialer(d);
        }
        let conn = connection.conn();
        if self.registry.register(handle).is_err() {
            dispatcher::emit_peer(
                "acceptor",
                LogLevel::Warn,
                "registry_closed_drop_stream",
                peer.to_string(),
                Some(conn.get()),
                None,
            );
            return None;
        }
        dispatcher::emit_peer(
            "acceptor",
            LogLevel::Debug,
            "connection_started",
            peer.to_string(),
            Some(conn.get()),
            None,
        );
        Some(connection.spawn(self.registry.inbound_sender()))
    }
}
