use std::net::SocketAddr;
use std::time::Duration;

use dim::config::{Config, ConfigError, ConfigOverrides};
use dim::events::LogLevel;
use dim::network::registry::QueuePolicy;

const SAMPLE: &str = r#"
rendezvous = "team room"
bootstrap_peers = ["10.0.0.1:12345"]
port = 4000
log_level = "info"

[identity]
state_dir = "/tmp/dim-state"

[relay]
outbound_queue = "bounded"
outbound_capacity = 8

[network]
dial_timeout_secs = 3

[discovery]
interval_secs = 5

[console]
show_sender = true
"#;

#[test]
fn missing_file_yields_defaults() {
    let tmp = tempfile::tempdir().unwrap();
    let (cfg, loaded) = Config::load_or_default(&tmp.path().join("absent.toml")).unwrap();
    assert!(!loaded);
    assert_eq!(cfg.rendezvous, "follow taffy miao");
    assert_eq!(cfg.protocol_id, "/chat/1.1.0");
    assert_eq!(cfg.bind_addr().unwrap(), "0.0.0.0:12345".parse::<SocketAddr>().unwrap());
    assert_eq!(cfg.log_level().unwrap(), LogLevel::Debug);
    assert_eq!(cfg.relay_settings().outbound, QueuePolicy::Unbounded);
    assert_eq!(cfg.relay_settings().inbound_capacity, 1024);
    assert_eq!(cfg.state_dir(), std::path::PathBuf::from("data"));
    assert_eq!(cfg.key_file(), "private.pem");
}

#[test]
fn file_values_are_applied() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("dim.toml");
    std::fs::write(&path, SAMPLE).unwrap();
    let (cfg, loaded) = Config::load_or_default(&path).unwrap();
    assert!(loaded);
    assert_eq!(cfg.rendezvous, "team room");
    assert_eq!(cfg.port, 4000);
    assert_eq!(cfg.address, "0.0.0.0");
    assert_eq!(cfg.log_level().unwrap(), LogLevel::Info);
    assert_eq!(cfg.relay_settings().outbound, QueuePolicy::Bounded(8));
    assert_eq!(cfg.dial_timeout(), Duration::from_secs(3));
    assert_eq!(cfg.handshake_timeout(), Duration::from_secs(10));
    let discovery = cfg.discovery_settings();
    assert_eq!(discovery.interval_secs, Some(5));
    assert_eq!(discovery.persist, Some(true));
    let console = cfg.console_settings();
    assert_eq!(console.show_sender, Some(true));
    assert_eq!(console.color, Some(true));
    assert_eq!(cfg.state_dir(), std::path::PathBuf::from("/tmp/dim-state"));
}

#[test]
fn command_line_wins_over_file() {
    let mut cfg: Config = toml::from_str(SAMPLE).unwrap();
    cfg.apply_overrides(ConfigOverrides {
        rendezvous: Some("cli room".into()),
        bootstrap_peers: vec!["10.0.0.1:12345".into(), "10.0.0.2:12345".into()],
        port: Some(5000),
        log_level: Some("warn".into()),
        ..ConfigOverrides::default()
    });
    assert_eq!(cfg.rendezvous, "cli room");
    assert_eq!(cfg.port, 5000);
    assert_eq!(cfg.protocol_id, "/chat/1.1.0");
    assert_eq!(cfg.log_level().unwrap(), LogLevel::Warn);
    assert_eq!(
        cfg.bootstrap_addrs().unwrap(),
        vec![
            "10.0.0.1:12345".parse::<SocketAddr>().unwrap(),
            "10.0.0.2:12345".parse().unwrap()
        ]
    );
}

#[test]
fn invalid_values_are_reported() {
    let mut cfg = Config::default();
    cfg.bootstrap_peers.push("nowhere".into());
    assert!(matches!(cfg.bootstrap_addrs(), Err(ConfigError::InvalidBootstrap { .. })));

    cfg.address = "not-an-ip".into();
    assert!(matches!(cfg.bind_addr(), Err(ConfigError::InvalidBind(_))));

    cfg.log_level = "loud".into();
    assert!(matches!(cfg.log_level(), Err(ConfigError::InvalidLogLevel(_))));

    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("broken.toml");
    std::fs::write(&path, "port = \"many\"").unwrap();
    assert!(matches!(Config::load_or_default(&path), Err(ConfigError::Parse { .. })));
}
