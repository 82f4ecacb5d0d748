// src/network/handshake.rs
//
// One signed JSON line in each direction before the stream carries chat
// lines. The listening side speaks first.

use crate::constants::{APP_VERSION, MAX_GOSSIP_PEERS};
use crate::identity::{self, Identity, PeerId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Upper bound on a hello line; anything longer is treated as malformed.
const MAX_HELLO_BYTES: u64 = 16 * 1024;

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("i/o error during handshake: {0}")]
    Io(#[from] std::io::Error),
    #[error("handshake timed out")]
    Timeout,
    #[error("stream closed before hello")]
    Closed,
    #[error("malformed hello: {0}")]
    Malformed(String),
    #[error("protocol mismatch: local={local} remote={remote}")]
    ProtocolMismatch { local: String, remote: String },
    #[error("rendezvous mismatch: remote={remote}")]
    RendezvousMismatch { remote: String },
    #[error("hello signature does not match peer id {0}")]
    BadSignature(String),
    #[error("remote peer id matches our own")]
    SelfConnection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Hello {
    pub protocol: String,
    pub rendezvous: String,
    pub peer_id: String,
    pub listen_addr: Option<String>,
    #[serde(default)]
    pub known_peers: Vec<String>,
    pub version: Option<String>,
    pub signature: String,
}

impl Hello {
    fn signing_bytes(
        protocol: &str,
        rendezvous: &str,
        peer_id: &str,
        listen_addr: Option<&str>,
        known_peers: &[String],
    ) -> Vec<u8> {
        format!(
            "{}\n{}\n{}\n{}\n{}",
            protocol,
            rendezvous,
            peer_id,
            listen_addr.unwrap_or(""),
            known_peers.join(",")
        )
        .into_bytes()
    }

    pub fn signed(
        identity: &Identity,
        protocol: &str,
        rendezvous: &str,
        listen_addr: Option<String>,
        mut known_peers: Vec<String>,
    ) -> Self {
        known_peers.truncate(MAX_GOSSIP_PEERS);
        let peer_id = identity.peer_id().to_string();
        let signature = identity.sign(&Self::signing_bytes(
            protocol,
            rendezvous,
            &peer_id,
            listen_addr.as_deref(),
            &known_peers,
        ));
        Hello {
            protocol: protocol.to_string(),
            rendezvous: rendezvous.to_string(),
            peer_id,
            listen_addr,
            known_peers,
            version: Some(APP_VERSION.to_string()),
            signature,
        }
    }

    pub fn as_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(line: &str) -> Result<Self, HandshakeError> {
        serde_json::from_str(line.trim()).map_err(|e| HandshakeError::Malformed(e.to_string()))
    }

    /// Check a remote hello against our own parameters and return its identity.
    pub fn validate(&self, local: &HandshakeConfig) -> Result<PeerId, HandshakeError> {
        if self.protocol != local.protocol_id {
            return Err(HandshakeError::ProtocolMismatch {
                local: local.protocol_id.clone(),
                remote: self.protocol.clone(),
            });
        }
        if self.rendezvous != local.rendezvous {
            return Err(HandshakeError::RendezvousMismatch {
                remote: self.rendezvous.clone(),
            });
        }
        let peer: PeerId = self
            .peer_id
            .parse()
            .map_err(|e: identity::IdentityError| HandshakeError::Malformed(e.to_string()))?;
        let bytes = Self::signing_bytes(
            &self.protocol,
            &self.rendezvous,
            &self.peer_id,
            self.listen_addr.as_deref(),
            &self.known_peers,
        );
        if !identity::verify(&peer, &bytes, &self.signature) {
            return Err(HandshakeError::BadSignature(peer.short()));
        }
        if peer == local.identity.peer_id() {
            return Err(HandshakeError::SelfConnection);
        }
        Ok(peer)
    }
}

/// Local side of the handshake.
#[derive(Clone)]
pub struct HandshakeConfig {
    pub identity: Arc<Identity>,
    pub protocol_id: String,
    pub rendezvous: String,
    /// Address other peers can dial us on, advertised in our hello
    pub listen_addr: Option<String>,
    pub timeout: Duration,
}

/// A stream that completed the handshake.
pub struct Established<S> {
    pub peer: PeerId,
    pub listen_addr: Option<String>,
    pub known_peers: Vec<String>,
    pub stream: S,
}

impl<S> std::fmt::Debug for Established<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Established")
            .field("peer", &self.peer)
            .field("listen_addr", &self.listen_addr)
            .field("known_peers", &self.known_peers.len())
            .finish()
    }
}

async fn read_hello<S>(reader: &mut BufReader<S>) -> Result<Hello, HandshakeError>
where
    S: AsyncRead + Unpin,
{
    let mut line = String::new();
    let n = (&mut *reader)
        .take(MAX_HELLO_BYTES)
        .read_line(&mut line)
        .await?;
    if n == 0 {
        return Err(HandshakeError::Closed);
    }
    if !line.ends_with('\n') {
        return Err(HandshakeError::Malformed("hello line too long or truncated".into()));
    }
    Hello::from_json(&line)
}

async fn write_hello<S>(reader: &mut BufReader<S>, hello: &Hello) -> Result<(), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let stream = reader.get_mut();
    stream.write_all(hello.as_json().as_bytes()).await?;
    stream.write_all(b"\n").await?;
    stream.flush().await?;
    Ok(())
}

async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, HandshakeError>
where
    F: std::future::Future<Output = Result<T, HandshakeError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| HandshakeError::Timeout)?
}

/// Listening side: send our hello, then read and validate the reply.
pub async fn respond<S>(
    stream: S,
    local: &HandshakeConfig,
    known_peers: Vec<String>,
) -> Result<Established<BufReader<S>>, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(stream);
    let ours = Hello::signed(
        &local.identity,
        &local.protocol_id,
        &local.rendezvous,
        local.listen_addr.clone(),
        known_peers,
    );
    let theirs = with_timeout(local.timeout, async {
        write_hello(&mut reader, &ours).await?;
        read_hello(&mut reader).await
    })
    .await?;
    let peer = theirs.validate(local)?;
    Ok(Established {
        peer,
        listen_addr: theirs.listen_addr,
        known_peers: theirs.known_peers,
        stream: reader,
    })
}

/// Dialing side: read and validate the listener's hello, then reply.
pub async fn initiate<S>(
    stream: S,
    local: &HandshakeConfig,
    known_peers: Vec<String>,
) -> Result<Established<BufReader<S>>, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(stream);
    let (peer, theirs) = with_timeout(local.timeout, async {
        let theirs = read_hello(&mut reader).await?;
        let peer = theirs.validate(local)?;
        let ours = Hello::signed(
            &local.identity,
            &local.protocol_id,
            &local.rendezvous,
            local.listen_addr.clone(),
            known_peers,
        );
        write_hello(&mut reader, &ours).await?;
        Ok::<_, HandshakeError>((peer, theirs))
    })
    .await?;
    Ok(Established {
        peer,
        listen_addr: theirs.listen_addr,
        known_peers: theirs.known_peers,
        stream: reader,
    })
}
