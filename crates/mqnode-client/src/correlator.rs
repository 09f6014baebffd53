use std::sync::Mutex;
use std::time::Duration;

use mqnode::envelope::{Reply, Response};
use mqnode::status::StatusCode;
use mqnode::topic::{Interface, server_response_topic};

use bytes::Bytes;

use hashbrown::HashMap;

use serde::Serialize;
use serde_json::Value;

use tokio::sync::oneshot;

use tracing::{debug, error, warn};

use crate::error::Result;
use crate::transport::{Cipher, Transport};
use crate::tree::lock;

#[derive(Debug, Default)]
struct Listeners {
    pending: HashMap<(Interface, u8), oneshot::Sender<Reply>>,
    next: HashMap<Interface, u8>,
}

impl Listeners {
    // Takes the next cyclic identifier without a live listener.
    //
    // Listeners of abandoned requests are released first.
    fn next_free(&mut self, interface: Interface) -> Option<u8> {
        self.pending.retain(|_, listener| !listener.is_closed());

        let start = self.next.get(&interface).copied().unwrap_or_default();
        let trans_id = (0..=u8::MAX)
            .map(|offset| start.wrapping_add(offset))
            .find(|trans_id| !self.pending.contains_key(&(interface, *trans_id)))?;
        self.next.insert(interface, trans_id.wrapping_add(1));

        Some(trans_id)
    }

    fn allocate(&mut self, interface: Interface) -> Option<(u8, oneshot::Receiver<Reply>)> {
        let trans_id = self.next_free(interface)?;

        let (sender, receiver) = oneshot::channel();
        self.pending.insert((interface, trans_id), sender);

        Some((trans_id, receiver))
    }
}

/// Correlates the requests published by a client with the replies of
/// its manager.
pub(crate) struct Correlator<T> {
    client_id: String,
    transport: T,
    cipher: Box<dyn Cipher>,
    timeout: Duration,
    listeners: Mutex<Listeners>,
}

impl<T: Transport> Correlator<T> {
    pub(crate) fn new(
        client_id: String,
        transport: T,
        cipher: Box<dyn Cipher>,
        timeout: Duration,
    ) -> Self {
        Self {
            client_id,
            transport,
            cipher,
            timeout,
            listeners: Mutex::new(Listeners::default()),
        }
    }

    pub(crate) const fn transport(&self) -> &T {
        &self.transport
    }

    /// Publishes a request on an interface and waits for its reply.
    ///
    /// Every failure resolves into a reply produced locally:
    /// `Conflict` when all transaction identifiers are in use,
    /// `InternalError` when publishing fails, and `Timeout` when no reply
    /// arrives in time.
    pub(crate) async fn request(&self, interface: Interface, mut payload: Value) -> Reply {
        let Some((trans_id, mut receiver)) = lock(&self.listeners).allocate(interface) else {
            warn!("All transaction identifiers of `{interface}` are in use");
            return Reply::local(StatusCode::Conflict);
        };

        if let Value::Object(map) = &mut payload {
            map.insert("transId".into(), trans_id.into());
        }

        if let Err(e) = self
            .send(interface.request_topic(&self.client_id), &payload)
            .await
        {
            error!("Impossible to send the `{interface}` request {trans_id}: {e}");
            self.resolve(
                interface,
                Reply {
                    trans_id: Some(trans_id),
                    ..Reply::local(StatusCode::InternalError)
                },
            );
        }

        match tokio::time::timeout(self.timeout, &mut receiver).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Reply::local(StatusCode::InternalError),
            Err(_) => {
                // A reply racing with the timeout is still taken.
                receiver.close();
                if let Ok(reply) = receiver.try_recv() {
                    return reply;
                }

                let mut listeners = lock(&self.listeners);
                let key = (interface, trans_id);
                if listeners
                    .pending
                    .get(&key)
                    .is_some_and(oneshot::Sender::is_closed)
                {
                    listeners.pending.remove(&key);
                }
                drop(listeners);

                warn!("The `{interface}` request {trans_id} timed out");
                Reply {
                    trans_id: Some(trans_id),
                    ..Reply::local(StatusCode::Timeout)
                }
            }
        }
    }

    /// Publishes a request on an interface without waiting for its reply.
    ///
    /// Nothing is published when all transaction identifiers are in use.
    pub(crate) async fn publish(&self, interface: Interface, mut payload: Value) -> Result<()> {
        let Some(trans_id) = lock(&self.listeners).next_free(interface) else {
            warn!("All transaction identifiers of `{interface}` are in use, request dropped");
            return Ok(());
        };

        if let Value::Object(map) = &mut payload {
            map.insert("transId".into(), trans_id.into());
        }

        self.send(interface.request_topic(&self.client_id), &payload)
            .await
    }

    /// Publishes the answer to a manager request.
    pub(crate) async fn respond(&self, response: &Response) -> Result<()> {
        self.send(server_response_topic(&self.client_id), response)
            .await
    }

    /// Delivers a reply received on the response topic of an interface.
    pub(crate) fn handle_reply(&self, interface: Interface, payload: Value) {
        let reply: Reply = match serde_json::from_value(payload) {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Discard a malformed `{interface}` reply: {e}");
                return;
            }
        };

        self.resolve(interface, reply);
    }

    fn resolve(&self, interface: Interface, reply: Reply) {
        let Some(trans_id) = reply.trans_id else {
            warn!("Discard a `{interface}` reply without a transaction identifier");
            return;
        };

        let Some(listener) = lock(&self.listeners)
            .pending
            .remove(&(interface, trans_id))
        else {
            debug!("No listener for the `{interface}` reply {trans_id}, discard it");
            return;
        };

        if listener.send(reply).is_err() {
            debug!("The `{interface}` request {trans_id} is no longer waiting");
        }
    }

    pub(crate) fn decrypt(&self, payload: Bytes) -> Result<Bytes> {
        self.cipher.decrypt(payload)
    }

    async fn send(&self, topic: String, payload: &impl Serialize) -> Result<()> {
        let payload = self
            .cipher
            .encrypt(Bytes::from(serde_json::to_vec(payload)?))?;
        self.transport.publish(topic, payload).await
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        lock(&self.listeners).pending.len()
    }
}
