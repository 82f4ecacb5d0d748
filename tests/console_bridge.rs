use std::time::Duration;

use dim::console::{self, AsyncLines, Command, ConsoleError, ConsoleOptions};
use dim::identity::PeerId;
use dim::network::registry::{Registry, RelaySettings};
use dim::network::{Inbound, Message, StreamAcceptor};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::timeout;

fn peer(n: u8) -> PeerId {
    PeerId::from_bytes([n; 32])
}

#[test]
fn render_matches_colored_prompt_format() {
    let item = Inbound {
        from: peer(0xab),
        message: Message::from("hey"),
    };
    assert_eq!(
        console::render(&item, ConsoleOptions::default()),
        "\x1b[32mhey\n\x1b[0m> "
    );
    let plain = ConsoleOptions {
        color: false,
        show_sender: true,
    };
    assert_eq!(console::render(&item, plain), "[abababab] hey\n> ");
}

#[test]
fn parse_recognises_commands_and_skips_blank_input() {
    assert_eq!(Command::parse("\n"), None);
    assert_eq!(Command::parse("   \r\n"), None);
    assert_eq!(Command::parse("/peers\n"), Some(Command::Peers));
    assert_eq!(Command::parse("/status"), Some(Command::Status));
    assert_eq!(Command::parse("/help\n"), Some(Command::Help));
    assert_eq!(Command::parse("/quit\r\n"), Some(Command::Quit));
    assert_eq!(
        Command::parse("hello world\r\n"),
        Some(Command::Send(Message::from("hello world")))
    );
}

#[tokio::test]
async fn display_loop_renders_each_inbound_line() {
    let (tx, rx) = mpsc::channel(8);
    let (out, mut screen) = tokio::io::duplex(1024);
    let display = tokio::spawn(console::run_display(
        rx,
        out,
        ConsoleOptions {
            color: false,
            show_sender: false,
        },
    ));

    tx.send(Inbound {
        from: peer(1),
        message: Message::from("one"),
    })
    .await
    .unwrap();
    tx.send(Inbound {
        from: peer(2),
        message: Message::from("two"),
    })
    .await
    .unwrap();
    drop(tx);
    timeout(Duration::from_secs(2), display).await.unwrap().unwrap();

    let mut shown = String::new();
    screen.read_to_string(&mut shown).await.unwrap();
    assert_eq!(shown, "one\n> two\n> ");
}

#[tokio::test]
async fn input_loop_broadcasts_lines_and_answers_commands() {
    let (registry, _inbound, _task) = Registry::spawn(RelaySettings::default());
    let acceptor = StreamAcceptor::new(registry.clone());
    let (local, remote) = tokio::io::duplex(1024);
    acceptor.accept(peer(0x11), local).unwrap();

    let input: &[u8] = b"hello\n\n   \n/peers\nbye\n/status\n/quit\nnever sent\n";
    let mut prompts = Vec::new();
    let mut source = AsyncLines::new(input, &mut prompts);
    let mut replies = Vec::new();
    console::run_input(&mut source, &mut replies, &registry)
        .await
        .expect("quit ends input cleanly");
    drop(source);

    let mut remote = BufReader::new(remote);
    let mut line = String::new();
    remote.read_line(&mut line).await.unwrap();
    assert_eq!(line, "hello\n");
    line.clear();
    remote.read_line(&mut line).await.unwrap();
    assert_eq!(line, "bye\n");

    let replies = String::from_utf8(replies).unwrap();
    assert!(replies.contains("Connected peers:"), "{}", replies);
    assert!(replies.contains(&peer(0x11).to_string()));
    assert!(replies.contains("broadcasts="));
    // One prompt per line read, up to and including /quit.
    assert_eq!(String::from_utf8(prompts).unwrap(), "> ".repeat(7));
}

#[tokio::test]
async fn end_of_input_is_fatal() {
    let (registry, _inbound, _task) = Registry::spawn(RelaySettings::default());
    let input: &[u8] = b"only line\n";
    let mut source = AsyncLines::new(input, tokio::io::sink());
    let err = console::run_input(&mut source, tokio::io::sink(), &registry)
        .await
        .unwrap_err();
    assert!(matches!(err, ConsoleError::InputClosed));
}

#[tokio::test]
async fn help_lists_local_commands() {
    let (registry, _inbound, _task) = Registry::spawn(RelaySettings::default());
    let input: &[u8] = b"/help\n/quit\n";
    let mut source = AsyncLines::new(input, tokio::io::sink());
    let mut replies = Vec::new();
    console::run_input(&mut source, &mut replies, &registry).await.unwrap();
    let replies = String::from_utf8(replies).unwrap();
    for cmd in ["/peers", "/status", "/help", "/quit"] {
        assert!(replies.contains(cmd), "missing {} in {}", cmd, replies);
    }
    assert_eq!(registry.stats().await.unwrap().broadcasts, 0);
}
