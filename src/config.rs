use crate::constants::*;
use crate::events::model::LogLevel;
use crate::network::registry::{QueuePolicy, RelaySettings};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid bootstrap peer '{entry}': {reason}")]
    InvalidBootstrap { entry: String, reason: String },
    #[error("invalid bind address '{0}'")]
    InvalidBind(String),
    #[error("{0}")]
    InvalidLogLevel(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shared tag used by discovery and checked during the handshake
    pub rendezvous: String,
    /// `host:port` entries dialed at startup and kept in the peer store
    pub bootstrap_peers: Vec<String>,
    /// Protocol tag both sides must agree on
    pub protocol_id: String,
    pub address: String,
    pub port: u16,
    pub log_level: String,
    pub identity: Option<IdentityConfig>,
    pub relay: Option<RelayConfig>,
    pub network: Option<NetworkConfig>,
    pub discovery: Option<DiscoveryConfig>,
    pub console: Option<ConsoleConfig>,
    pub logging: Option<LoggingConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rendezvous: DEFAULT_RENDEZVOUS.to_string(),
            bootstrap_peers: Vec::new(),
            protocol_id: DEFAULT_PROTOCOL_ID.to_string(),
            address: DEFAULT_BIND_ADDR.to_string(),
            port: DEFAULT_PORT,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            identity: None,
            relay: None,
            network: None,
            discovery: None,
            console: None,
            logging: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct IdentityConfig {
    /// Directory for persisted runtime state (key, peer store, history)
    pub state_dir: Option<String>,
    /// File inside state_dir holding the private key (default: private.pem)
    pub key_file: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboundQueueKind {
    Unbounded,
    Bounded,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RelayConfig {
    /// unbounded (default) | bounded
    pub outbound_queue: Option<OutboundQueueKind>,
    /// Per-peer capacity for the bounded policy; a full queue drops new messages
    pub outbound_capacity: Option<usize>,
    pub inbound_capacity: Option<usize>,
    pub broadcast_capacity: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct NetworkConfig {
    pub dial_timeout_secs: Option<u64>,
    pub handshake_timeout_secs: Option<u64>,
    /// Address advertised to peers in the handshake (defaults to the bind address)
    pub advertise_addr: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    /// Seconds between sweeps of the peer store
    pub interval_secs: Option<u64>,
    /// Persist known peers to <state_dir>/peers.json
    pub persist: Option<bool>,
    pub max_entries: Option<usize>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interval_secs: Some(DEFAULT_DISCOVERY_INTERVAL_SECS),
            persist: Some(true),
            max_entries: Some(DEFAULT_PEER_STORE_MAX),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsoleConfig {
    pub color: Option<bool>,
    /// Prefix displayed messages with the sender's short id
    pub show_sender: Option<bool>,
    /// Read operator input through a line editor with history
    pub line_editor: Option<bool>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            color: Some(true),
            show_sender: Some(false),
            line_editor: Some(false),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Path to a JSON lines event log (rotated). Disabled when unset.
    pub json_path: Option<String>,
    /// Max size in bytes before rotation (default 5MB)
    pub json_max_bytes: Option<usize>,
    /// Number of rotated files to retain (default 3)
    pub json_rotate: Option<u32>,
    /// Disable console sink (default false)
    pub disable_console: Option<bool>,
}

/// Values given on the command line. `None` leaves the file/default value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub rendezvous: Option<String>,
    pub bootstrap_peers: Vec<String>,
    pub protocol_id: Option<String>,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub log_level: Option<String>,
}

impl Config {
    /// Load a TOML config file. A missing file yields the defaults; any other
    /// read error or a parse error is returned.
    pub fn load_or_default(path: &Path) -> Result<(Self, bool), ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str::<Config>(&content)
                .map(|cfg| (cfg, true))
                .map_err(|source| ConfigError::Parse {
                    path: path.display().to_string(),
                    source,
                }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok((Config::default(), false)),
            Err(source) => Err(ConfigError::Read {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    /// Command line values win over the file. Bootstrap peers given on the
    /// command line are appended (deduplicated) to those from the file.
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(r) = overrides.rendezvous {
            self.rendezvous = r;
        }
        for p in overrides.bootstrap_peers {
            if !self.bootstrap_peers.contains(&p) {
                self.bootstrap_peers.push(p);
            }
        }
        if let Some(pid) = overrides.protocol_id {
            self.protocol_id = pid;
        }
        if let Some(a) = overrides.address {
            self.address = a;
        }
        if let Some(p) = overrides.port {
            self.port = p;
        }
        if let Some(l) = overrides.log_level {
            self.log_level = l;
        }
    }

    pub fn log_level(&self) -> Result<LogLevel, ConfigError> {
        self.log_level
            .parse::<LogLevel>()
            .map_err(ConfigError::InvalidLogLevel)
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let raw = format!("{}:{}", self.address, self.port);
        raw.parse().map_err(|_| ConfigError::InvalidBind(raw))
    }

    pub fn bootstrap_addrs(&self) -> Result<Vec<SocketAddr>, ConfigError> {
        self.bootstrap_peers
            .iter()
            .map(|entry| {
                entry
                    .trim()
                    .parse::<SocketAddr>()
                    .map_err(|e| ConfigError::InvalidBootstrap {
                        entry: entry.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect()
    }

    pub fn state_dir(&self) -> PathBuf {
        PathBuf::from(
            self.identity
                .as_ref()
                .and_then(|i| i.state_dir.clone())
                .unwrap_or_else(|| DEFAULT_STATE_DIR.to_string()),
        )
    }

    pub fn key_file(&self) -> String {
        self.identity
            .as_ref()
            .and_then(|i| i.key_file.clone())
            .unwrap_or_else(|| DEFAULT_KEY_FILE.to_string())
    }

    pub fn relay_settings(&self) -> RelaySettings {
        let relay = self.relay.clone().unwrap_or_default();
        let outbound = match relay.outbound_queue.unwrap_or(OutboundQueueKind::Unbounded) {
            OutboundQueueKind::Unbounded => QueuePolicy::Unbounded,
            OutboundQueueKind::Bounded => QueuePolicy::Bounded(
                relay
                    .outbound_capacity
                    .unwrap_or(DEFAULT_OUTBOUND_CAPACITY)
                    .max(1),
            ),
        };
        RelaySettings {
            outbound,
            inbound_capacity: relay
                .inbound_capacity
                .unwrap_or(DEFAULT_INBOUND_CAPACITY)
                .max(1),
            broadcast_capacity: relay
                .broadcast_capacity
                .unwrap_or(DEFAULT_BROADCAST_CAPACITY)
                .max(1),
        }
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(
            self.network
                .as_ref()
                .and_then(|n| n.dial_timeout_secs)
                .unwrap_or(DEFAULT_DIAL_TIMEOUT_SECS),
        )
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(
            self.network
                .as_ref()
                .and_then(|n| n.handshake_timeout_secs)
                .unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
        )
    }

    pub fn advertise_addr(&self) -> Option<String> {
        self.network.as_ref().and_then(|n| n.advertise_addr.clone())
    }

    pub fn discovery_settings(&self) -> DiscoveryConfig {
        let defaults = DiscoveryConfig::default();
        let cfg = self.discovery.clone().unwrap_or_default();
        DiscoveryConfig {
            interval_secs: cfg.interval_secs.or(defaults.interval_secs),
            persist: cfg.persist.or(defaults.persist),
            max_entries: cfg.max_entries.or(defaults.max_entries),
        }
    }

    pub fn console_settings(&self) -> ConsoleConfig {
        let defaults = ConsoleConfig::default();
        let cfg = self.console.clone().unwrap_or_default();
        ConsoleConfig {
            color: cfg.color.or(defaults.color),
            show_sender: cfg.show_sender.or(defaults.show_sender),
            line_editor: cfg.line_editor.or(defaults.line_editor),
        }
    }
}
