use clap::Parser;
use dim::{
    config::{Config, ConfigOverrides},
    constants::*,
    events::LogLevel,
    node::{self, Shutdown},
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "dim: a peer-to-peer chat relay",
    long_about = "Run `dim` in two different terminals. Nodes connect to the bootstrap peers, \
                  announce themselves under the rendezvous string and relay every typed line \
                  to all connected peers."
)]
struct Args {
    /// Path to config file (TOML)
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Unique string identifying the group of nodes. Share it with your friends to let them connect with you [default: follow taffy miao]
    #[arg(long)]
    rendezvous: Option<String>,

    /// Adds a peer address to the bootstrap list (repeatable)
    #[arg(long = "peer", value_name = "HOST:PORT")]
    peers: Vec<String>,

    /// Sets a protocol id for stream headers [default: /chat/1.1.0]
    #[arg(long)]
    pid: Option<String>,

    /// Address to listen on [default: 0.0.0.0]
    #[arg(long)]
    addr: Option<String>,

    /// Port to listen on [default: 12345]
    #[arg(long)]
    port: Option<u16>,

    /// Log level: trace, debug, info, warn, error [default: debug]
    #[arg(long)]
    loglevel: Option<String>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            rendezvous: self.rendezvous.clone(),
            bootstrap_peers: self.peers.clone(),
            protocol_id: self.pid.clone(),
            address: self.addr.clone(),
            port: self.port,
            log_level: self.loglevel.clone(),
        }
    }
}

fn fatal(msg: impl std::fmt::Display) -> ! {
    eprintln!("❌ {}", msg);
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let (mut config, loaded) = match Config::load_or_default(&args.config) {
        Ok(v) => v,
        Err(e) => fatal(e),
    };
    config.apply_overrides(args.overrides());
    let level: LogLevel = match config.log_level() {
        Ok(l) => l,
        Err(e) => fatal(e),
    };

    // Initialize events AFTER config is loaded so custom logging path can be applied
    dim::events::init_events_with_options(config.logging.as_ref(), Some(level)).await;
    if loaded {
        println!("{}Loaded config from: {}", ICON_PLACEHOLDER, args.config.display());
    }
    dim::events::dispatcher::emit_system(
        "config",
        LogLevel::Info,
        "config_resolved",
        Some(format!(
            "rendezvous={:?} protocol={} bind={}:{} bootstrap={}",
            config.rendezvous,
            config.protocol_id,
            config.address,
            config.port,
            config.bootstrap_peers.len()
        )),
    );

    match node::run(config).await {
        Ok(Shutdown::OperatorQuit) | Ok(Shutdown::Interrupted) => {
            println!("👋 Exiting.");
            // Blocking stdin reads would otherwise hold the runtime open.
            std::process::exit(0);
        }
        Err(e) => fatal(format!("{:#}", e)),
    }
}
