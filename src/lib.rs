//! # dim
//!
//! Peer-to-peer broadcast chat relay. Every node keeps a set of live peer
//! connections; each line typed by the local operator is copied to every
//! connected peer, and every line received from a peer is shown locally.
//!
//! ## Design Principles
//! * Async-first: all I/O paths are non-blocking (Tokio + async traits).
//! * The live peer set is owned by a single registry task; connection tasks
//!   reach it only through channels.
//! * Peers are named by Ed25519 public keys, authenticated with a signed hello.
//! * Event-driven instrumentation (console + optional JSON line log).
//!
//! ## Key Modules
//! * `config` – TOML configuration and command line overrides.
//! * `identity` – Local key pair and peer identities.
//! * `network` – Peer connections, registry, handshake, transport, discovery.
//! * `console` – Operator display and input loops.
//! * `events` – Structured logging/events dispatcher.
//! * `node` – Startup wiring.

pub mod config;
pub mod console;
pub mod constants;
pub mod events;
pub mod identity;
pub mod network;
pub mod node;
