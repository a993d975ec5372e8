//! Driver messages and reader events.
//!
//! Messages are addressed to the controller owning a connector (for example
//! to signal a lost connection). Reader events are informational and are
//! forwarded to monitoring unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a driver message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// The connection to the physical reader was lost.
    ConnectionLost,
    Info,
    Warning,
    Error,
}

/// A message from a connector to its controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    pub text: String,
}

impl Message {
    pub fn new(kind: MessageKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    /// Connection lost message.
    pub fn connection_lost(text: impl Into<String>) -> Self {
        Self::new(MessageKind::ConnectionLost, text)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.text)
    }
}

/// Kind of a reader event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReaderEventKind {
    Connected,
    Disconnected,
    Warning,
    Error,
}

/// An event raised by a connector for monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderEvent {
    pub kind: ReaderEventKind,
    pub timestamp: DateTime<Utc>,
    pub details: String,
}

impl ReaderEvent {
    pub fn new(kind: ReaderEventKind, details: impl Into<String>) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            details: details.into(),
        }
    }
}
