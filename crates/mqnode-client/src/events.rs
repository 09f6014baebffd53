use tokio::sync::broadcast;

use tracing::debug;

use crate::error::Error;

// The capacity of the events broadcast channel.
pub(crate) const EVENTS_CHANNEL_CAPACITY: usize = 32;

/// An event emitted by a node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    /// The startup handshake has completed.
    Ready,
    /// The manager accepted the registration.
    Registered,
    /// The manager accepted the deregistration.
    Deregistered,
    /// A broadcast announcement sent by the manager.
    Announce(String),
    /// The transport is connected.
    Connected,
    /// The transport is closed.
    Closed,
    /// An error occurred.
    Error(Error),
}

impl std::fmt::Display for NodeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready => f.write_str("Ready"),
            Self::Registered => f.write_str("Registered"),
            Self::Deregistered => f.write_str("Deregistered"),
            Self::Announce(message) => write!(f, "Announce: {message}"),
            Self::Connected => f.write_str("Connected"),
            Self::Closed => f.write_str("Closed"),
            Self::Error(e) => write!(f, "Error: {e}"),
        }
    }
}

pub(crate) fn emit(sender: &broadcast::Sender<NodeEvent>, event: NodeEvent) {
    // Sending only fails when nobody is subscribed.
    if sender.send(event).is_err() {
        debug!("No event subscribers");
    }
}
