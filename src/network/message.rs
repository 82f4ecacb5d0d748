// src/network/message.rs

use crate::identity::PeerId;
use std::fmt;
use std::sync::Arc;

/// One newline-terminated UTF-8 line: the framing unit on every stream.
///
/// Cloning is cheap; fan-out shares the same allocation across all peers.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Message(Arc<str>);

impl Message {
    /// Build a message from a line, appending the `\n` delimiter if missing.
    pub fn from_line(line: impl Into<String>) -> Self {
        let mut line = line.into();
        if !line.ends_with('\n') {
            line.push('\n');
        }
        Self(Arc::from(line))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Text without the line delimiter (and a preceding `\r`, if any).
    pub fn text(&self) -> &str {
        self.0.trim_end_matches('\n').trim_end_matches('\r')
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Message({:?})", &*self.0)
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Message::from_line(s)
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Message::from_line(s)
    }
}

/// A line received from a peer, tagged locally with the sender's identity.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub from: PeerId,
    pub message: Message,
}
