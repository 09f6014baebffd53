use alloc::format;
use alloc::string::String;

use core::fmt;

/// The topic of the broadcast announcements sent by a manager.
pub const ANNOUNCE_TOPIC: &str = "announce";

/// All interfaces used by a client to talk with its manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Interface {
    /// Registers the client.
    Register,
    /// Deregisters the client.
    Deregister,
    /// Updates the registration attributes.
    Update,
    /// Notifies an observed node change.
    Notify,
    /// Checks the manager is reachable.
    Ping,
}

/// All client-initiated [`Interface`]s.
pub const ALL_INTERFACES: &[Interface] = &[
    Interface::Register,
    Interface::Deregister,
    Interface::Update,
    Interface::Notify,
    Interface::Ping,
];

impl Interface {
    /// Returns the [`Interface`] name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Deregister => "deregister",
            Self::Update => "update",
            Self::Notify => "notify",
            Self::Ping => "ping",
        }
    }

    /// Returns the topic a client publishes its requests on.
    #[must_use]
    #[inline]
    pub fn request_topic(self, client_id: &str) -> String {
        format!("{}/{client_id}", self.name())
    }

    /// Returns the topic a manager publishes its replies on.
    #[must_use]
    #[inline]
    pub fn response_topic(self, client_id: &str) -> String {
        format!("{}/response/{client_id}", self.name())
    }

    fn from_name(name: &str) -> Option<Self> {
        ALL_INTERFACES
            .iter()
            .copied()
            .find(|interface| interface.name() == name)
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.name().fmt(f)
    }
}

/// Returns the topic a manager publishes its requests on.
#[must_use]
#[inline]
pub fn server_request_topic(client_id: &str) -> String {
    format!("request/{client_id}")
}

/// Returns the topic a client publishes its answers to manager requests on.
#[must_use]
#[inline]
pub fn server_response_topic(client_id: &str) -> String {
    format!("response/{client_id}")
}

/// The role of an inbound topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundTopic {
    /// A reply to a client-initiated request.
    Reply(Interface),
    /// A manager-initiated request.
    Request,
    /// A broadcast announcement.
    Announce,
}

impl InboundTopic {
    /// Classifies an inbound topic for the given client.
    ///
    /// Returns `None` for topics not addressed to the client.
    #[must_use]
    pub fn parse(topic: &str, client_id: &str) -> Option<Self> {
        if topic == ANNOUNCE_TOPIC {
            return Some(Self::Announce);
        }

        let prefix = topic.strip_suffix(client_id)?.strip_suffix('/')?;
        if prefix == "request" {
            return Some(Self::Request);
        }

        prefix
            .strip_suffix("/response")
            .and_then(Interface::from_name)
            .map(Self::Reply)
    }
}
