use bytes::Bytes;

use crate::error::Result;

/// An event produced by a [`Transport`].
///
/// Events are delivered to a node through a channel and consumed by
/// its control loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A message has been received on a subscribed topic.
    Message {
        /// The topic the message has been received on.
        topic: String,
        /// The raw, possibly encrypted, payload.
        payload: Bytes,
    },
    /// The connection with the broker has been established.
    Connected,
    /// The connection with the broker has been closed.
    Closed,
    /// The transport reported an error.
    Error(String),
}

/// A publish/subscribe transport.
///
/// The transport is assumed to be reliable and ordered per topic.
pub trait Transport: Send + Sync + 'static {
    /// Publishes a payload on a topic.
    fn publish(&self, topic: String, payload: Bytes) -> impl Future<Output = Result<()>> + Send;

    /// Subscribes to a set of topics.
    fn subscribe(&self, topics: Vec<String>) -> impl Future<Output = Result<()>> + Send;

    /// Closes the connection.
    fn disconnect(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Hooks transforming payloads before they are published and after they
/// are received.
pub trait Cipher: Send + Sync + 'static {
    /// Encrypts an outbound payload.
    ///
    /// # Errors
    ///
    /// An error is returned when the payload cannot be encrypted.
    fn encrypt(&self, payload: Bytes) -> Result<Bytes>;

    /// Decrypts an inbound payload.
    ///
    /// # Errors
    ///
    /// An error is returned when the payload cannot be decrypted.
    fn decrypt(&self, payload: Bytes) -> Result<Bytes>;
}

/// A [`Cipher`] leaving payloads untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainText;

impl Cipher for PlainText {
    fn encrypt(&self, payload: Bytes) -> Result<Bytes> {
        Ok(payload)
    }

    fn decrypt(&self, payload: Bytes) -> Result<Bytes> {
        Ok(payload)
    }
}
