// src/network/transport.rs

use crate::events::{dispatcher, model::LogLevel};
use crate::network::handshake::{self, Established, HandshakeConfig, HandshakeError};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("dial {addr} failed: {source}")]
    Dial {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("dial {0} timed out")]
    DialTimeout(SocketAddr),
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
}

/// Opens an outbound stream to an address and authenticates the remote end.
#[async_trait]
pub trait Connector: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Send + 'static;

    async fn connect(
        &self,
        addr: SocketAddr,
        known_peers: Vec<String>,
    ) -> Result<Established<Self::Stream>, TransportError>;
}

pub struct TcpConnector {
    handshake: HandshakeConfig,
    dial_timeout: Duration,
}

impl TcpConnector {
    pub fn new(handshake: HandshakeConfig, dial_timeout: Duration) -> Self {
        Self {
            handshake,
            dial_timeout,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Stream = BufReader<TcpStream>;

    async fn connect(
        &self,
        addr: SocketAddr,
        known_peers: Vec<String>,
    ) -> Result<Established<Self::Stream>, TransportError> {
        dispatcher::emit_network("transport", LogLevel::Debug, "dial_start", Some(addr.to_string()), None);
        let stream = match tokio::time::timeout(self.dial_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(s)) => s,
            Ok(Err(source)) => return Err(TransportError::Dial { addr, source }),
            Err(_) => return Err(TransportError::DialTimeout(addr)),
        };
        let _ = stream.set_nodelay(true);
        let established = handshake::initiate(stream, &self.handshake, known_peers).await?;
        dispatcher::emit_network(
            "transport",
            LogLevel::Info,
            "handshake_complete",
            Some(addr.to_string()),
            Some(format!("peer={} role=dialer", established.peer)),
        );
        Ok(established)
    }
}
