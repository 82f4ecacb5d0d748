//! Startup wiring: identity, registry, console, listener and discovery.

use crate::config::Config;
use crate::console::{self, AsyncLines, ConsoleError, ConsoleOptions, EditorLines, LineSource};
use crate::constants::{ICON_PLACEHOLDER, PEER_STORE_FILE};
use crate::events::{dispatcher, model::LogLevel, EventDispatcher};
use crate::identity::{self, Identity};
use crate::network::{
    bind_listener, run_discovery, seed_bootstrap_peers, spawn_listener, Dialer, Discovery, HandshakeConfig,
    ListenerContext, PeerStore, Registry, StoreDiscovery, StreamAcceptor, TcpConnector,
};
use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// How the node stopped without a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    OperatorQuit,
    Interrupted,
}

/// Run a node until the operator quits, input fails, or Ctrl+C.
pub async fn run(config: Config) -> anyhow::Result<Shutdown> {
    let state_dir = config.state_dir();
    let identity = Identity::load_or_generate(&state_dir, &config.key_file()).context("loading identity")?;
    let identity = Arc::new(identity);
    let local = identity.peer_id();
    println!("{}Peer identity: {}", ICON_PLACEHOLDER, identity::describe(&identity));
    dispatcher::emit_system("node", LogLevel::Info, "identity_loaded", Some(format!("peer_id={}", local)));

    let (registry, inbound, _registry_task) = Registry::spawn(config.relay_settings());
    let console_cfg = config.console_settings();
    tokio::spawn(console::run_display(
        inbound,
        tokio::io::stdout(),
        ConsoleOptions::from(&console_cfg),
    ));

    let bind = config.bind_addr()?;
    let listener = bind_listener(bind)
        .await
        .with_context(|| format!("binding listener on {}", bind))?;
    let bound = listener.local_addr().unwrap_or(bind);
    let advertised = config.advertise_addr().unwrap_or_else(|| bound.to_string());
    let own_addr = advertised
        .parse::<SocketAddr>()
        .ok()
        .filter(|a| !a.ip().is_unspecified());
    println!("{}Listening on {} (advertised as {})", ICON_PLACEHOLDER, bound, advertised);

    let handshake = HandshakeConfig {
        identity: identity.clone(),
        protocol_id: config.protocol_id.clone(),
        rendezvous: config.rendezvous.clone(),
        listen_addr: Some(advertised),
        timeout: config.handshake_timeout(),
    };

    let discovery_cfg = config.discovery_settings();
    let max_entries = discovery_cfg.max_entries.unwrap_or(crate::constants::DEFAULT_PEER_STORE_MAX);
    let peer_store = if discovery_cfg.persist.unwrap_or(true) {
        PeerStore::load_from_file(state_dir.join(PEER_STORE_FILE), max_entries).await
    } else {
        PeerStore::new(max_entries)
    };
    let bootstrap = config.bootstrap_addrs()?;
    seed_bootstrap_peers(&peer_store, &bootstrap).await;

    let acceptor = StreamAcceptor::new(registry.clone());
    spawn_listener(
        listener,
        ListenerContext {
            handshake: handshake.clone(),
            acceptor: acceptor.clone(),
            peer_store: peer_store.clone(),
            own_addr,
        },
    );

    let interval = Duration::from_secs(
        discovery_cfg
            .interval_secs
            .unwrap_or(crate::constants::DEFAULT_DISCOVERY_INTERVAL_SECS),
    );
    let discovery = StoreDiscovery::new(peer_store.clone(), interval);
    discovery.advertise(&config.rendezvous).await;
    let candidates = discovery.find_peers(&config.rendezvous);
    let connector = Arc::new(TcpConnector::new(handshake, config.dial_timeout()));
    let dialer = Dialer::new(connector, acceptor, peer_store.clone(), local, own_addr);
    tokio::spawn(run_discovery(candidates, dialer));

    let mut source: Box<dyn LineSource> = if console_cfg.line_editor.unwrap_or(false) {
        Box::new(EditorLines::spawn(console::history_path(&state_dir))?)
    } else {
        Box::new(AsyncLines::stdio())
    };
    let outcome = tokio::select! {
        res = console::run_input(source.as_mut(), tokio::io::stdout(), &registry) => {
            res.map(|_| Shutdown::OperatorQuit)
        }
        _ = tokio::signal::ctrl_c() => Ok(Shutdown::Interrupted),
    };

    peer_store.persist().await;
    dispatcher::emit_system("node", LogLevel::Info, "node_stopping", Some(format!("{:?}", outcome)));
    // Give the dispatcher a moment to drain before sinks are flushed.
    tokio::time::sleep(Duration::from_millis(50)).await;
    if let Some(d) = EventDispatcher::global() {
        d.flush().await;
    }
    outcome.map_err(|e: ConsoleError| anyhow::Error::new(e).context("operator console"))
}
