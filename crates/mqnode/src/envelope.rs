use alloc::string::String;
use alloc::vec::Vec;

use hashbrown::DefaultHashBuilder;

use indexmap::IndexMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::address::Key;
use crate::command::CommandId;
use crate::status::StatusCode;

/// Object identifiers mapped to their instance identifiers, in insertion
/// order.
pub type ObjectList = IndexMap<u16, Vec<u16>, DefaultHashBuilder>;

/// A request issued by a manager to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// Transaction identifier.
    pub trans_id: u8,
    /// Command to run.
    pub cmd_id: CommandId,
    /// Object identifier.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub oid: Option<Key>,
    /// Instance identifier.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub iid: Option<Key>,
    /// Resource identifier.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rid: Option<Key>,
    /// Command payload.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,
}

/// The answer of a client to a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct Response {
    /// Transaction identifier copied from the request.
    pub trans_id: u8,
    /// Command identifier copied from the request.
    pub cmd_id: CommandId,
    /// Outcome of the command.
    pub status: StatusCode,
    /// Data produced by the command.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,
}

impl Response {
    /// Creates a [`Response`].
    #[must_use]
    pub const fn new(trans_id: u8, cmd_id: CommandId, status: StatusCode) -> Self {
        Self {
            trans_id,
            cmd_id,
            status,
            data: None,
        }
    }

    /// Attaches data to the [`Response`].
    #[must_use]
    #[inline]
    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// A reply sent by a manager to a client-initiated request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    /// Transaction identifier.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub trans_id: Option<u8>,
    /// Outcome of the request.
    pub status: StatusCode,
    /// Reply payload.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,
    /// The manager asks to stop the reporting of the notified node.
    #[serde(skip_serializing_if = "core::ops::Not::not", default)]
    pub cancel: bool,
}

impl Reply {
    /// Creates a [`Reply`] without a transaction identifier.
    ///
    /// Used for outcomes decided locally by a client.
    #[must_use]
    pub const fn local(status: StatusCode) -> Self {
        Self {
            trans_id: None,
            status,
            data: None,
            cancel: false,
        }
    }
}

/// The registration payload of a client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct Registration {
    /// Registration lifetime, in seconds.
    pub lifetime: u64,
    /// Device IP address.
    pub ip: String,
    /// Device MAC address.
    pub mac: String,
    /// Protocol version.
    pub version: String,
    /// All objects and instances exposed by the device.
    pub obj_list: ObjectList,
}

/// A notification pushed by a client when an observed node changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct Notification {
    /// Object identifier.
    pub oid: u16,
    /// Instance identifier.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub iid: Option<u16>,
    /// Resource identifier.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rid: Option<u16>,
    /// Current value of the node.
    pub data: Value,
}
