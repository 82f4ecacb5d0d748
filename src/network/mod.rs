pub mod acceptor;
pub mod bootstrap;
pub mod connection;
pub mod discovery;
pub mod handshake;
pub mod listener;
pub mod message;
pub mod peer_store;
pub mod registry;
pub mod transport;

pub use acceptor::StreamAcceptor;
pub use bootstrap::{run_discovery, seed_bootstrap_peers, Dialer};
pub use connection::{ConnectionTasks, PeerConnection, PeerHandle};
pub use discovery::{CandidateStream, Discovery, PeerCandidate, StoreDiscovery};
pub use handshake::{Established, HandshakeConfig, HandshakeError, Hello};
pub use listener::{bind_listener, spawn_listener, ListenerContext};
pub use message::{Inbound, Message};
pub use peer_store::{PeerRecord, PeerSource, PeerStore};
pub use registry::{
    ConnectionId, InboundReceiver, QueuePolicy, Registry, RegistryClosed, RegistryHandle, RegistryStats,
    RelaySettings,
};
pub use transport::{Connector, TcpConnector, TransportError};
