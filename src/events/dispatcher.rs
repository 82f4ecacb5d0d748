use crate::events::model::{
    DiscoveryEvent, EventMeta, LogEvent, LogLevel, NetworkEvent, PeerEvent, SystemEvent,
};
use crate::events::sink::LogSink;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;
use uuid::Uuid;

static DISPATCHER: OnceCell<EventDispatcher> = OnceCell::new();

pub struct EventDispatcher {
    pub tx: mpsc::Sender<LogEvent>,
    pub session_id: String,
    sinks: RwLock<Vec<Arc<dyn LogSink>>>,
}

impl EventDispatcher {
    pub fn global() -> Option<&'static EventDispatcher> {
        DISPATCHER.get()
    }

    pub fn register_sink(&self, sink: Arc<dyn LogSink>) {
        self.sinks.write().push(sink);
    }

    pub async fn flush(&self) {
        let sinks = self.sinks.read().clone();
        for sink in sinks {
            sink.flush().await;
        }
    }
}

/// Install the process-wide dispatcher. Only the first call takes effect;
/// later calls register their sinks on the existing dispatcher.
pub async fn init_events(sinks: Vec<Arc<dyn LogSink>>, capacity: usize) {
    if let Some(existing) = EventDispatcher::global() {
        for sink in sinks {
            existing.register_sink(sink);
        }
        return;
    }
    let (tx, mut rx) = mpsc::channel::<LogEvent>(capacity);
    let dispatcher = EventDispatcher {
        tx,
        session_id: Uuid::new_v4().to_string(),
        sinks: RwLock::new(sinks),
    };
    let _ = DISPATCHER.set(dispatcher);
    tokio::spawn(async move {
        while let Some(evt) = rx.recv().await {
            if let Some(d) = EventDispatcher::global() {
                let sinks = d.sinks.read().clone();
                for sink in sinks {
                    sink.handle(&evt).await;
                }
            }
        }
    });
}

pub fn correlation_id() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}

pub fn meta(component: &'static str, level: LogLevel) -> EventMeta {
    let session_id = EventDispatcher::global()
        .map(|d| d.session_id.clone())
        .unwrap_or_else(|| "unknown".into());
    EventMeta {
        ts: SystemTime::now(),
        level,
        corr_id: Some(correlation_id()),
        session_id,
        component,
    }
}

/// Queue an event for the sinks. Never blocks; events are dropped when the
/// dispatcher is not initialised or its queue is full.
pub fn emit(event: LogEvent) {
    if let Some(d) = EventDispatcher::global() {
        let _ = d.tx.try_send(event);
    }
}

pub fn emit_network(
    component: &'static str,
    level: LogLevel,
    action: &str,
    addr: Option<String>,
    detail: Option<String>,
) {
    emit(LogEvent::Network(NetworkEvent {
        meta: meta(component, level),
        action: action.to_string(),
        addr,
        detail,
    }));
}

pub fn emit_peer(
    component: &'static str,
    level: LogLevel,
    action: &str,
    peer: String,
    conn: Option<u64>,
    detail: Option<String>,
) {
    emit(LogEvent::Peer(PeerEvent {
        meta: meta(component, level),
        action: action.to_string(),
        peer,
        conn,
        detail,
    }));
}

pub fn emit_discovery(level: LogLevel, action: &str, addr: Option<String>, detail: Option<String>) {
    emit(LogEvent::Discovery(DiscoveryEvent {
        meta: meta("discovery", level),
        action: action.to_string(),
        addr,
        detail,
    }));
}

pub fn emit_system(component: &'static str, level: LogLevel, action: &str, detail: Option<String>) {
    emit(LogEvent::System(SystemEvent {
        meta: meta(component, level),
        action: action.to_string(),
        detail,
    }));
}
