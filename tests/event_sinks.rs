use dim::events::{dispatcher, model::*, sink::JsonFileSink, sink::LogSink};

fn system_event(action: &str) -> LogEvent {
    LogEvent::System(SystemEvent {
        meta: dispatcher::meta("test", LogLevel::Info),
        action: action.to_string(),
        detail: Some("k=v".into()),
    })
}

#[tokio::test]
async fn json_sink_writes_one_object_per_line() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("logs").join("events.jsonl");
    let sink = JsonFileSink::new(&path, false, 1024 * 1024, 3).await.unwrap();

    sink.handle(&system_event("first")).await;
    sink.handle(&LogEvent::Peer(PeerEvent {
        meta: dispatcher::meta("registry", LogLevel::Warn),
        action: "outbound_dropped".into(),
        peer: "ab".repeat(32),
        conn: Some(7),
        detail: None,
    }))
    .await;
    sink.flush().await;

    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<serde_json::Value> = text
        .lines()
        .map(|l| serde_json::from_str(l).expect("valid json line"))
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["type"], "system");
    assert_eq!(lines[0]["action"], "first");
    assert_eq!(lines[0]["meta"]["level"], "info");
    assert_eq!(lines[1]["type"], "peer");
    assert_eq!(lines[1]["conn"], 7);
    assert_eq!(lines[1]["meta"]["component"], "registry");
}

#[test]
fn log_levels_parse_and_order() {
    assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
    assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
    assert!("verbose".parse::<LogLevel>().is_err());
    assert!(LogLevel::Trace < LogLevel::Debug && LogLevel::Warn < LogLevel::Error);
}
