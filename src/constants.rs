//! Central place for application-wide constants and default values.

/// Application name, used for the key file header, history file and logs.
pub const APP_NAME: &str = "dim";

/// Left padding used to align log lines with those that include emoji prefixes.
pub const ICON_PLACEHOLDER: &str = "   ";

/// Default rendezvous tag shared by nodes that want to find each other.
pub const DEFAULT_RENDEZVOUS: &str = "follow taffy miao";
/// Default protocol tag exchanged in the handshake.
pub const DEFAULT_PROTOCOL_ID: &str = "/chat/1.1.0";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 12345;
pub const DEFAULT_LOG_LEVEL: &str = "debug";

pub const DEFAULT_CONFIG_FILE: &str = "dim.toml";
pub const DEFAULT_STATE_DIR: &str = "data";
pub const DEFAULT_KEY_FILE: &str = "private.pem";
pub const PEER_STORE_FILE: &str = "peers.json";
pub const HISTORY_FILE: &str = "history";

/// Soft limit on messages waiting for the console display loop.
pub const DEFAULT_INBOUND_CAPACITY: usize = 1024;
/// Soft limit on operator messages waiting for fan-out.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 1024;
/// Per-peer capacity when the bounded outbound queue policy is selected.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

pub const DEFAULT_DIAL_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_DISCOVERY_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_PEER_STORE_MAX: usize = 1024;

/// Upper bound on the number of addresses gossiped in a handshake.
pub const MAX_GOSSIP_PEERS: usize = 32;

/// Longest chat line accepted from a peer, delimiter included.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Application / crate version (populated from Cargo.toml via env! macro)
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn full_version() -> String {
    format!("v{}", APP_VERSION)
}
