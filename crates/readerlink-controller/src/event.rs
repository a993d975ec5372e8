//! Monitoring events emitted by a reader controller.

use readerlink_core::ReaderEvent;

/// Events published on the monitoring channel returned by
/// [`ReaderController::new`](crate::ReaderController::new).
///
/// Connection failures and recoveries are published once per reconnection
/// cycle; repeated failures in between are only logged.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ControllerEvent {
    /// The first reconnection attempt of a cycle failed.
    ConnectionFailed {
        /// Controller name.
        reader: String,

        /// Error of the failed attempt.
        error: String,
    },

    /// The connection came back after a reported failure.
    Reconnected {
        /// Controller name.
        reader: String,
    },

    /// Event raised by the connector.
    Reader(ReaderEvent),
}

impl std::fmt::Display for ControllerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionFailed { reader, error } => {
                write!(f, "Failed to reconnect {}: {}", reader, error)
            }
            Self::Reconnected { reader } => write!(f, "Reconnected {}", reader),
            Self::Reader(event) => write!(f, "{:?}: {}", event.kind, event.details),
        }
    }
}
