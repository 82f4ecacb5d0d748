// src/network/listener.rs

use crate::constants::MAX_GOSSIP_PEERS;
use crate::events::{dispatcher, model::LogLevel};
use crate::network::acceptor::StreamAcceptor;
use crate::network::handshake::{self, HandshakeConfig};
use crate::network::peer_store::PeerStore;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

fn log_network_event(level: LogLevel, action: &str, addr: Option<String>, detail: Option<String>) {
    dispatcher::emit_network("listener", level, action, addr, detail);
}

/// Bind the chat listener. Failure here is fatal to the caller.
pub async fn bind_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr().unwrap_or(addr);
    log_network_event(LogLevel::Info, "listener_bind", Some(local.to_string()), None);
    Ok(listener)
}

/// Everything an inbound connection needs after `accept`.
#[derive(Clone)]
pub struct ListenerContext {
    pub handshake: HandshakeConfig,
    pub acceptor: StreamAcceptor,
    pub peer_store: PeerStore,
    /// Our own dialable address, never recorded as a candidate
    pub own_addr: Option<SocketAddr>,
}

/// Accept connections forever, handshaking each on its own task.
pub async fn serve(listener: TcpListener, ctx: ListenerContext) {
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                log_network_event(LogLevel::Debug, "incoming_connection", Some(remote.to_string()), None);
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    handle_incoming(stream, remote, ctx).await;
                });
            }
            Err(e) => {
                log_network_event(LogLevel::Warn, "accept_failed", None, Some(e.to_string()));
                // Back off briefly on resource exhaustion (EMFILE and friends)
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }
}

pub fn spawn_listener(listener: TcpListener, ctx: ListenerContext) -> JoinHandle<()> {
    tokio::spawn(serve(listener, ctx))
}

async fn handle_incoming(stream: TcpStream, remote: SocketAddr, ctx: ListenerContext) {
    let _ = stream.set_nodelay(true);
    let known = ctx.peer_store.gossip_sample(MAX_GOSSIP_PEERS).await;
    let established = match handshake::respond(stream, &ctx.handshake, known).await {
        Ok(e) => e,
        Err(e) => {
            log_network_event(
                LogLevel::Warn,
                "handshake_rejected",
                Some(remote.to_string()),
                Some(e.to_string()),
            );
            return;
        }
    };
    log_network_event(
        LogLevel::Info,
        "handshake_complete",
        Some(remote.to_string()),
        Some(format!("peer={} role=listener", established.peer)),
    );
    let learned = ctx
        .peer_store
        .learn(
            established.peer,
            established.listen_addr.as_deref(),
            &established.known_peers,
            Some(remote.ip()),
            ctx.own_addr,
        )
        .await;
    if learned > 0 {
        dispatcher::emit_discovery(
            LogLevel::Debug,
            "gossip_learned",
            Some(remote.to_string()),
            Some(format!("new={}", learned)),
        );
    }
    ctx.acceptor
        .accept_from(established.peer, established.peer, established.stream);
}
