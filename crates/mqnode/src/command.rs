use alloc::string::String;

use core::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// All commands a manager can issue to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandId {
    /// Reads a resource, or dumps an instance or an object.
    Read,
    /// Writes a single resource.
    Write,
    /// Discovers the report attributes of a node.
    Discover,
    /// Writes the report attributes of a node.
    WriteAttrs,
    /// Executes a resource.
    Execute,
    /// Enables or disables the reporting of a node.
    Observe,
    /// A notification pushed by the client.
    Notify,
    /// Checks that the client is alive.
    Ping,
    /// Any command not recognized by the client.
    Unknown,
}

impl CommandId {
    /// Returns the command name used on the wire.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Discover => "discover",
            Self::WriteAttrs => "writeAttrs",
            Self::Execute => "execute",
            Self::Observe => "observe",
            Self::Notify => "notify",
            Self::Ping => "ping",
            Self::Unknown => "unknown",
        }
    }

    /// Returns the numeric command code.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Read => 0,
            Self::Write => 1,
            Self::Discover => 2,
            Self::WriteAttrs => 3,
            Self::Execute => 4,
            Self::Observe => 5,
            Self::Notify => 6,
            Self::Ping => 7,
            Self::Unknown => 255,
        }
    }

    /// Builds a [`CommandId`] from its numeric code.
    #[must_use]
    pub const fn from_code(code: u64) -> Self {
        match code {
            0 => Self::Read,
            1 => Self::Write,
            2 => Self::Discover,
            3 => Self::WriteAttrs,
            4 => Self::Execute,
            5 => Self::Observe,
            6 => Self::Notify,
            7 => Self::Ping,
            _ => Self::Unknown,
        }
    }

    /// Builds a [`CommandId`] from its wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "read" => Self::Read,
            "write" => Self::Write,
            "discover" => Self::Discover,
            "writeAttrs" => Self::WriteAttrs,
            "execute" => Self::Execute,
            "observe" => Self::Observe,
            "notify" => Self::Notify,
            "ping" => Self::Ping,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.name().fmt(f)
    }
}

impl Serialize for CommandId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

// Managers may address commands either by name or by numeric code.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawCommand {
    Code(u64),
    Name(String),
}

impl<'de> Deserialize<'de> for CommandId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawCommand::deserialize(deserializer)? {
            RawCommand::Code(code) => Self::from_code(code),
            RawCommand::Name(name) => Self::from_name(&name),
        })
    }
}
