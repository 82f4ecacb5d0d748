// src/network/connection.rs
//
// One duplex stream to one remote identity: a line-framed reader task, a
// queued writer task and the outbound queue feeding the writer.

use crate::constants::MAX_LINE_BYTES;
use crate::events::{dispatcher, model::LogLevel};
use crate::identity::PeerId;
use crate::network::message::{Inbound, Message};
use crate::network::registry::Disconnect;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

const WRITER_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Process-unique id distinguishing successive connections to the same peer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Capacity policy for each peer's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePolicy {
    /// Never blocks or drops; a stalled peer grows its queue without limit.
    Unbounded,
    /// At most `n` queued messages; further messages for that peer are dropped.
    Bounded(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Bounded queue full; the message was dropped for this peer only.
    Full,
    /// The writer task has already exited.
    Closed,
}

#[derive(Debug)]
pub(crate) enum OutboundSender {
    Unbounded(mpsc::UnboundedSender<Message>),
    Bounded(mpsc::Sender<Message>),
}

impl OutboundSender {
    /// Non-blocking enqueue used by the registry fan-out.
    pub(crate) fn enqueue(&self, message: Message) -> EnqueueOutcome {
        match self {
            OutboundSender::Unbounded(tx) => match tx.send(message) {
                Ok(()) => EnqueueOutcome::Queued,
                Err(_) => EnqueueOutcome::Closed,
            },
            OutboundSender::Bounded(tx) => match tx.try_send(message) {
                Ok(()) => EnqueueOutcome::Queued,
                Err(mpsc::error::TrySendError::Full(_)) => EnqueueOutcome::Full,
                Err(mpsc::error::TrySendError::Closed(_)) => EnqueueOutcome::Closed,
            },
        }
    }
}

enum OutboundReceiver {
    Unbounded(mpsc::UnboundedReceiver<Message>),
    Bounded(mpsc::Receiver<Message>),
}

impl OutboundReceiver {
    async fn recv(&mut self) -> Option<Message> {
        match self {
            OutboundReceiver::Unbounded(rx) => rx.recv().await,
            OutboundReceiver::Bounded(rx) => rx.recv().await,
        }
    }
}

fn outbound_queue(policy: QueuePolicy) -> (OutboundSender, OutboundReceiver) {
    match policy {
        QueuePolicy::Unbounded => {
            let (tx, rx) = mpsc::unbounded_channel();
            (OutboundSender::Unbounded(tx), OutboundReceiver::Unbounded(rx))
        }
        QueuePolicy::Bounded(capacity) => {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            (OutboundSender::Bounded(tx), OutboundReceiver::Bounded(rx))
        }
    }
}

/// Registry-side view of a live connection. Dropping it closes the outbound
/// queue, which ends the writer task and, through close, the reader task.
#[derive(Debug)]
pub struct PeerHandle {
    pub(crate) peer: PeerId,
    pub(crate) conn: ConnectionId,
    pub(crate) outbound: OutboundSender,
    /// Identity that opened the underlying socket, when known.
    pub(crate) dialer: Option<PeerId>,
    pub(crate) opened_at: Instant,
    shutdown: Arc<watch::Sender<bool>>,
}

impl PeerHandle {
    /// Record which side dialed this connection.
    pub fn with_dialer(mut self, dialer: PeerId) -> Self {
        self.dialer = Some(dialer);
        self
    }

    pub fn dialer(&self) -> Option<PeerId> {
        self.dialer
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn conn(&self) -> ConnectionId {
        self.conn
    }

    /// Ask both loops of this connection to stop.
    pub(crate) fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

/// Shared by the reader and writer; either may call `close`.
#[derive(Clone)]
struct Closer {
    peer: PeerId,
    conn: ConnectionId,
    shutdown: Arc<watch::Sender<bool>>,
    disconnect: mpsc::UnboundedSender<Disconnect>,
}

impl Closer {
    /// Stop the sibling loop and tell the registry. Both loops call this on
    /// exit, so the registry sees two signals for one connection; the second
    /// one is a no-op there.
    fn close(&self, side: &'static str, reason: &str) {
        self.shutdown.send_replace(true);
        dispatcher::emit_peer(
            "connection",
            LogLevel::Debug,
            "connection_closed",
            self.peer.to_string(),
            Some(self.conn.get()),
            Some(format!("side={} reason={}", side, reason)),
        );
        let _ = self.disconnect.send(Disconnect {
            peer: self.peer,
            conn: self.conn,
        });
    }
}

/// Handles to the two tasks of a running connection.
pub struct ConnectionTasks {
    pub reader: JoinHandle<()>,
    pub writer: JoinHandle<()>,
}

impl ConnectionTasks {
    /// Wait until both loops have terminated.
    pub async fn join(self) {
        let _ = self.reader.await;
        let _ = self.writer.await;
    }
}

pub struct PeerConnection<S> {
    peer: PeerId,
    conn: ConnectionId,
    stream: S,
    outbound: OutboundReceiver,
    closer: Closer,
}

impl<S> PeerConnection<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wrap an established stream. Returns the connection (not yet running)
    /// and the handle the registry keeps for it.
    pub fn new(
        peer: PeerId,
        stream: S,
        policy: QueuePolicy,
        disconnect: mpsc::UnboundedSender<Disconnect>,
    ) -> (Self, PeerHandle) {
        let conn = ConnectionId::next();
        let (outbound_tx, outbound_rx) = outbound_queue(policy);
        let (shutdown_tx, _) = watch::channel(false);
        let shutdown = Arc::new(shutdown_tx);
        let handle = PeerHandle {
            peer,
            conn,
            outbound: outbound_tx,
            dialer: None,
            opened_at: Instant::now(),
            shutdown: shutdown.clone(),
        };
        let connection = PeerConnection {
            peer,
            conn,
            stream,
            outbound: outbound_rx,
            closer: Closer {
                peer,
                conn,
                shutdown,
                disconnect,
            },
        };
        (connection, handle)
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn conn(&self) -> ConnectionId {
        self.conn
    }

    /// Start the reader and writer as independent tasks.
    pub fn spawn(self, inbound: mpsc::Sender<Inbound>) -> ConnectionTasks {
        let PeerConnection {
            peer,
            stream,
            outbound,
            closer,
            ..
        } = self;
        let (read_half, write_half) = tokio::io::split(stream);
        let reader = tokio::spawn(read_loop(
            BufReader::new(read_half),
            peer,
            inbound,
            closer.shutdown.subscribe(),
            closer.clone(),
        ));
        let writer = tokio::spawn(write_loop(
            write_half,
            outbound,
            closer.shutdown.subscribe(),
            closer,
        ));
        ConnectionTasks { reader, writer }
    }
}

async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn read_loop<R>(
    mut reader: R,
    peer: PeerId,
    inbound: mpsc::Sender<Inbound>,
    mut shutdown: watch::Receiver<bool>,
    closer: Closer,
) where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut line: Vec<u8> = Vec::new();
    let reason = loop {
        line.clear();
        let mut limited = (&mut reader).take(MAX_LINE_BYTES as u64);
        let read = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break "shutdown".to_string(),
            read = limited.read_until(b'\n', &mut line) => read,
        };
        match read {
            Ok(0) => break "eof".to_string(),
            Ok(n) if line.last() != Some(&b'\n') => {
                if n >= MAX_LINE_BYTES {
                    break format!("line_too_long: limit={}", MAX_LINE_BYTES);
                }
                // A trailing fragment without a delimiter only shows up at EOF.
                break "eof_partial_line".to_string();
            }
            Ok(_) => {
                // Undecodable bytes are replaced, the line is still relayed.
                let text = String::from_utf8_lossy(&line);
                if text.trim().is_empty() {
                    continue;
                }
                let item = Inbound {
                    from: peer,
                    message: Message::from_line(text.into_owned()),
                };
                tokio::select! {
                    biased;
                    _ = shutdown_requested(&mut shutdown) => break "shutdown".to_string(),
                    sent = inbound.send(item) => {
                        if sent.is_err() {
                            break "inbound_closed".to_string();
                        }
                    }
                }
            }
            Err(e) => break format!("read_error: {}", e),
        }
    };
    closer.close("reader", &reason);
}

async fn write_loop<W>(
    mut writer: W,
    mut outbound: OutboundReceiver,
    mut shutdown: watch::Receiver<bool>,
    closer: Closer,
) where
    W: AsyncWrite + Unpin,
{
    let reason = loop {
        let message = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break "shutdown".to_string(),
            next = outbound.recv() => match next {
                Some(m) => m,
                None => break "queue_closed".to_string(),
            },
        };
        let written = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break "shutdown".to_string(),
            res = async {
                writer.write_all(message.as_bytes()).await?;
                writer.flush().await
            } => res,
        };
        if let Err(e) = written {
            break format!("write_error: {}", e);
        }
    };
    // A stalled peer must not keep the writer alive after close.
    let _ = tokio::time::timeout(WRITER_SHUTDOWN_GRACE, writer.shutdown()).await;
    closer.close("writer", &reason);
}
