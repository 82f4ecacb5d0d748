//! Operator console: one loop renders received lines, the other reads local
//! input and hands it to the registry for broadcast.

use crate::config::ConsoleConfig;
use crate::constants::{full_version, ICON_PLACEHOLDER};
use crate::events::{dispatcher, model::LogLevel};
use crate::network::message::{Inbound, Message};
use crate::network::registry::{InboundReceiver, RegistryClosed, RegistryHandle};
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

mod editor;

pub use editor::EditorLines;

const GREEN: &str = "\x1b[32m";
const RESET: &str = "\x1b[0m";
pub const PROMPT: &str = "> ";

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("operator input closed")]
    InputClosed,
    #[error("error reading operator input: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Registry(#[from] RegistryClosed),
    #[error("line editor failed: {0}")]
    Editor(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsoleOptions {
    pub color: bool,
    pub show_sender: bool,
}

impl Default for ConsoleOptions {
    fn default() -> Self {
        Self {
            color: true,
            show_sender: false,
        }
    }
}

impl From<&ConsoleConfig> for ConsoleOptions {
    fn from(cfg: &ConsoleConfig) -> Self {
        Self {
            color: cfg.color.unwrap_or(true),
            show_sender: cfg.show_sender.unwrap_or(false),
        }
    }
}

/// Render a received line followed by a fresh prompt.
pub fn render(inbound: &Inbound, opts: ConsoleOptions) -> String {
    let body = if opts.show_sender {
        format!("[{}] {}", inbound.from.short(), inbound.message.as_str())
    } else {
        inbound.message.as_str().to_string()
    };
    if opts.color {
        format!("{}{}{}{}", GREEN, body, RESET, PROMPT)
    } else {
        format!("{}{}", body, PROMPT)
    }
}

/// Drain the inbound stream into `out` until every sender is gone.
pub async fn run_display<W>(mut inbound: InboundReceiver, mut out: W, opts: ConsoleOptions)
where
    W: AsyncWrite + Unpin,
{
    while let Some(item) = inbound.recv().await {
        let rendered = render(&item, opts);
        if let Err(e) = write_flush(&mut out, rendered.as_bytes()).await {
            dispatcher::emit_system("console", LogLevel::Warn, "display_write_failed", Some(e.to_string()));
        }
    }
    dispatcher::emit_system("console", LogLevel::Debug, "display_stopped", None);
}

async fn write_flush<W: AsyncWrite + Unpin>(out: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    out.write_all(bytes).await?;
    out.flush().await
}

/// What one line of operator input asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Peers,
    Status,
    Help,
    Quit,
    Send(Message),
}

impl Command {
    /// `None` for blank input, which is never sent.
    pub fn parse(line: &str) -> Option<Command> {
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed.trim().is_empty() {
            return None;
        }
        Some(match trimmed.trim() {
            "/peers" => Command::Peers,
            "/status" => Command::Status,
            "/help" => Command::Help,
            "/quit" => Command::Quit,
            _ => Command::Send(Message::from_line(trimmed)),
        })
    }
}

/// A source of operator input lines.
#[async_trait]
pub trait LineSource: Send {
    /// Show `prompt` and return the next line, or `None` at end of input.
    async fn next_line(&mut self, prompt: &str) -> Result<Option<String>, ConsoleError>;
}

/// Buffered async reader (stdin by default) with the prompt written to `W`.
pub struct AsyncLines<R, W> {
    reader: R,
    prompt_out: W,
}

impl<R, W> AsyncLines<R, W> {
    pub fn new(reader: R, prompt_out: W) -> Self {
        Self { reader, prompt_out }
    }
}

impl AsyncLines<tokio::io::BufReader<tokio::io::Stdin>, tokio::io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(tokio::io::BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

#[async_trait]
impl<R, W> LineSource for AsyncLines<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn next_line(&mut self, prompt: &str) -> Result<Option<String>, ConsoleError> {
        write_flush(&mut self.prompt_out, prompt.as_bytes()).await?;
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(line))
    }
}

/// Lines delivered over a channel; used by the line editor thread.
#[async_trait]
impl LineSource for mpsc::Receiver<Result<String, ConsoleError>> {
    async fn next_line(&mut self, _prompt: &str) -> Result<Option<String>, ConsoleError> {
        match self.recv().await {
            Some(Ok(line)) => Ok(Some(line)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

fn help_text() -> String {
    let cmds = [
        "/peers      List connected peers",
        "/status     Show relay counters",
        "/help       Show this help",
        "/quit       Exit",
    ];
    let mut out = format!("{}{}\nAvailable commands:\n", ICON_PLACEHOLDER, full_version());
    for c in cmds {
        out.push_str("  ");
        out.push_str(c);
        out.push('\n');
    }
    out.push_str("Anything else is sent to every connected peer.\n");
    out
}

async fn execute(command: Command, registry: &RegistryHandle) -> Result<Option<String>, ConsoleError> {
    Ok(match command {
        Command::Send(message) => {
            registry.broadcast(message).await?;
            None
        }
        Command::Peers => {
            let mut peers = registry.peers().await?;
            peers.sort();
            if peers.is_empty() {
                Some("No connected peers.\n".to_string())
            } else {
                let mut out = String::from("Connected peers:\n");
                for p in peers {
                    out.push_str(&format!("  {}\n", p));
                }
                Some(out)
            }
        }
        Command::Status => {
            let s = registry.stats().await?;
            Some(format!(
                "--- Relay Status ---\npeers={} registered={} replaced={} rejected={} removed={}\nbroadcasts={} delivered={} dropped={}\n--------------------\n",
                s.peers, s.registered, s.replaced, s.rejected, s.removed, s.broadcasts, s.delivered, s.dropped
            ))
        }
        Command::Help => Some(help_text()),
        Command::Quit => None,
    })
}

/// Read operator input until `/quit` (returns `Ok`) or until input fails or
/// ends (returns the fatal error).
pub async fn run_input<L, W>(source: &mut L, mut out: W, registry: &RegistryHandle) -> Result<(), ConsoleError>
where
    L: LineSource + ?Sized,
    W: AsyncWrite + Unpin,
{
    loop {
        let line = match source.next_line(PROMPT).await? {
            Some(line) => line,
            None => return Err(ConsoleError::InputClosed),
        };
        let Some(command) = Command::parse(&line) else {
            continue;
        };
        if command == Command::Quit {
            dispatcher::emit_system("console", LogLevel::Info, "operator_quit", None);
            return Ok(());
        }
        if let Some(reply) = execute(command, registry).await? {
            write_flush(&mut out, reply.as_bytes()).await?;
        }
    }
}

/// Where the line editor keeps its history.
pub fn history_path(state_dir: &std::path::Path) -> PathBuf {
    state_dir.join(crate::constants::HISTORY_FILE)
}
