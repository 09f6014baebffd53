//! The `mqnode-client` library crate exposes the resources of a device to a
//! remote manager over a publish/subscribe transport.
//!
//! A device describes its data as a tree of objects, instances, and
//! resources, addressed by numeric identifiers or well-known aliases.
//! Resources either store a value or delegate their operations to
//! asynchronous functions.
//!
//! Core functionalities of this crate include:
//!
//! - Registering the device to its manager and keeping the registration
//!   alive for its whole lifetime
//! - Answering the read, write, discover, execute, and observe requests of
//!   the manager against the resource tree
//! - Correlating every request sent to the manager with its reply,
//!   resolving failures and timeouts into status codes
//! - Notifying observed resources according to minimum and maximum
//!   reporting periods, thresholds, and step deltas
//!
//! The transport is abstracted behind the [`transport::Transport`] trait, and
//! an `MQTT` implementation is provided by [`mqtt::MqttTransport`].
//!
//! `mqnode-client` leverages `tokio` as an asynchronous executor: requests,
//! reporters, and the registration keep-alive run as independent tasks
//! sharing the state of their node.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub use mqnode;

/// Client configuration.
pub mod config;
/// Error management.
pub mod error;
/// All events emitted by a node.
pub mod events;
/// An `MQTT` transport.
pub mod mqtt;
/// The client node and its control loop.
pub mod node;
/// Resource contents and functions.
pub mod resource;
/// Transport abstraction and payload ciphers.
pub mod transport;
/// The addressable resource tree.
pub mod tree;

mod correlator;
mod dispatcher;
mod registration;
mod reporting;
