use std::sync::{Arc, Mutex};

use mqnode::address::{Address, AddressKind};
use mqnode::envelope::Reply;
use mqnode::topic::InboundTopic;

use bytes::Bytes;

use hashbrown::HashMap;

use serde_json::Value;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use tokio_util::sync::CancellationToken;

use tracing::{debug, error, warn};

use crate::config::{Config, DeviceAttributes};
use crate::correlator::Correlator;
use crate::error::{Error, ErrorKind, ResourceError, Result};
use crate::events::{EVENTS_CHANNEL_CAPACITY, NodeEvent, emit};
use crate::resource::{ExecOutcome, Resources};
use crate::transport::{Cipher, PlainText, Transport, TransportEvent};
use crate::tree::ResourceTree;

// State shared by the node and its tasks.
pub(crate) struct Shared<T> {
    pub(crate) config: Config,
    pub(crate) tree: ResourceTree,
    pub(crate) correlator: Correlator<T>,
    pub(crate) reporters: Mutex<HashMap<Address, CancellationToken>>,
    pub(crate) device: Mutex<DeviceAttributes>,
    pub(crate) keep_alive: Mutex<Option<CancellationToken>>,
    pub(crate) events: broadcast::Sender<NodeEvent>,
}

impl<T: Transport> Shared<T> {
    pub(crate) fn emit(&self, event: NodeEvent) {
        emit(&self.events, event);
    }

    /// Reads a resource, or dumps an instance or an object, then checks
    /// whether the value must be reported.
    pub(crate) async fn read(
        self: &Arc<Self>,
        address: &Address,
        enforce_access: bool,
    ) -> std::result::Result<Value, ResourceError> {
        let value = match address.kind() {
            AddressKind::Resource => self.tree.read(address, enforce_access).await?,
            AddressKind::Root | AddressKind::Object | AddressKind::Instance => {
                self.tree.dump(address).await?
            }
        };

        self.check_and_report(address, &value).await;
        Ok(value)
    }

    /// Writes a resource, then checks whether the written value must be
    /// reported.
    pub(crate) async fn write(
        self: &Arc<Self>,
        address: &Address,
        value: Value,
        enforce_access: bool,
    ) -> std::result::Result<Value, ResourceError> {
        let written = self.tree.write(address, value, enforce_access).await?;
        self.check_and_report(address, &written).await;
        Ok(written)
    }

    fn handle_event(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::Message { topic, payload } => self.handle_message(&topic, payload),
            TransportEvent::Connected => self.emit(NodeEvent::Connected),
            TransportEvent::Closed => self.emit(NodeEvent::Closed),
            TransportEvent::Error(e) => {
                self.emit(NodeEvent::Error(Error::new(ErrorKind::Transport, e)));
            }
        }
    }

    fn handle_message(self: &Arc<Self>, topic: &str, payload: Bytes) {
        let Some(inbound) = InboundTopic::parse(topic, &self.config.client_id) else {
            debug!("Message on topic {topic} ignored");
            return;
        };

        let payload = match self.correlator.decrypt(payload) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Discard the message on topic {topic}: {e}");
                return;
            }
        };

        let text = match String::from_utf8(payload.to_vec()) {
            Ok(text) => text,
            Err(e) => {
                warn!("Discard the message on topic {topic}, not valid UTF-8: {e}");
                return;
            }
        };

        match inbound {
            InboundTopic::Announce => self.emit(NodeEvent::Announce(text)),
            InboundTopic::Reply(interface) => {
                self.correlator.handle_reply(interface, parse_payload(text));
            }
            InboundTopic::Request => self.dispatch(parse_payload(text)),
        }
    }
}

// Only payloads looking like a `JSON` object are parsed.
fn parse_payload(text: String) -> Value {
    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        match serde_json::from_str(trimmed) {
            Ok(value) => return value,
            Err(e) => debug!("Payload is not valid JSON: {e}"),
        }
    }
    Value::String(text)
}

/// A client exposing a resource tree to a manager.
///
/// A [`Node`] is cheap to clone: clones share the same resource tree,
/// registration state, and transport.
///
/// The node reacts to the events of its transport only while
/// [`Node::run`] is polled, so the control loop must be running before
/// any request to the manager is issued.
pub struct Node<T: Transport> {
    shared: Arc<Shared<T>>,
}

impl<T: Transport> Clone for Node<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Transport> std::fmt::Debug for Node<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("config", &self.shared.config)
            .field("tree", &self.shared.tree)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Node<T> {
    /// Creates a [`Node`] sending plain text payloads.
    ///
    /// # Errors
    ///
    /// An error is returned when the configuration is not valid.
    pub fn new(config: Config, transport: T) -> Result<Self> {
        Self::with_cipher(config, transport, PlainText)
    }

    /// Creates a [`Node`] transforming every payload with the given
    /// [`Cipher`].
    ///
    /// # Errors
    ///
    /// An error is returned when the configuration is not valid.
    pub fn with_cipher(config: Config, transport: T, cipher: impl Cipher) -> Result<Self> {
        config.validate()?;

        let (events, _) = broadcast::channel(EVENTS_CHANNEL_CAPACITY);

        Ok(Self {
            shared: Arc::new(Shared {
                tree: ResourceTree::new(config.default_pmin, config.default_pmax),
                correlator: Correlator::new(
                    config.client_id.clone(),
                    transport,
                    Box::new(cipher),
                    config.request_timeout,
                ),
                reporters: Mutex::new(HashMap::new()),
                device: Mutex::new(config.device.clone()),
                keep_alive: Mutex::new(None),
                events,
                config,
            }),
        })
    }

    /// Returns the [`Config`].
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Returns the [`ResourceTree`].
    #[must_use]
    pub fn tree(&self) -> &ResourceTree {
        &self.shared.tree
    }

    /// Subscribes to the [`NodeEvent`]s.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<NodeEvent> {
        self.shared.events.subscribe()
    }

    /// Adds the resources of an object instance.
    ///
    /// # Errors
    ///
    /// An error is returned if a callable resource has no functions.
    pub fn add_object(&self, oid: u16, iid: u16, resources: Resources) -> Result<()> {
        self.shared.tree.add_object(oid, iid, resources)
    }

    /// Removes an object instance and stops its reporters.
    ///
    /// Returns whether the instance existed.
    pub fn remove_instance(&self, oid: u16, iid: u16) -> bool {
        self.shared.stop_instance_reports(oid, iid);
        self.shared.tree.remove_instance(oid, iid)
    }

    /// Reads a resource, or dumps an instance or an object.
    ///
    /// Access modes are not enforced, the value is reported when its
    /// node is observed.
    ///
    /// # Errors
    ///
    /// See [`ResourceTree::read`] and [`ResourceTree::dump`].
    pub async fn read(&self, address: &Address) -> std::result::Result<Value, ResourceError> {
        self.shared.read(address, false).await
    }

    /// Writes a resource.
    ///
    /// Access modes are not enforced, the value is reported when its
    /// node is observed.
    ///
    /// # Errors
    ///
    /// See [`ResourceTree::write`].
    pub async fn write(
        &self,
        address: &Address,
        value: Value,
    ) -> std::result::Result<Value, ResourceError> {
        self.shared.write(address, value, false).await
    }

    /// Executes a resource.
    ///
    /// # Errors
    ///
    /// See [`ResourceTree::execute`].
    pub async fn execute(
        &self,
        address: &Address,
        args: Option<Value>,
    ) -> std::result::Result<ExecOutcome, ResourceError> {
        self.shared.tree.execute(address, args).await
    }

    /// Enables reporting on an instance or a resource.
    pub fn enable_report(&self, address: Address) {
        self.shared.enable_report(address);
    }

    /// Disables reporting on a node.
    pub fn disable_report(&self, address: Address) {
        self.shared.disable_report(address);
    }

    /// Runs the startup handshake.
    ///
    /// The node subscribes to the registration topics, registers itself,
    /// then subscribes to the remaining topics and emits
    /// [`NodeEvent::Ready`].
    ///
    /// # Errors
    ///
    /// An error is returned, and emitted as [`NodeEvent::Error`], when
    /// a subscription or the registration fails. The handshake is not
    /// retried.
    pub async fn start(&self) -> Result<()> {
        self.shared.start().await
    }

    /// Registers the node to its manager.
    pub async fn register(&self) -> Reply {
        self.shared.register().await
    }

    /// Deregisters the node and closes the transport.
    pub async fn deregister(&self) -> Reply {
        self.shared.deregister().await
    }

    /// Updates the registration attributes.
    ///
    /// The attributes are a `JSON` object with the `lifetime`, `ip` and
    /// `version` keys.
    pub async fn update(&self, attributes: Value) -> Reply {
        self.shared.update(attributes).await
    }

    /// Checks that the manager is reachable.
    ///
    /// On reply, the data is the round-trip time in milliseconds.
    pub async fn ping(&self) -> Reply {
        self.shared.ping().await
    }

    /// Stops every timer and closes the transport without deregistering.
    ///
    /// # Errors
    ///
    /// An error is returned when the transport fails to disconnect.
    pub async fn close(&self) -> Result<()> {
        self.shared.close().await
    }

    /// Runs the control loop consuming the events of the transport.
    ///
    /// Returns once the transport drops its event sender.
    pub async fn run(&self, mut receiver: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = receiver.recv().await {
            self.shared.handle_event(event);
        }
        debug!("Transport events ended, control loop stopped");
    }

    /// Spawns the control loop on the `tokio` runtime.
    #[must_use]
    pub fn spawn(&self, receiver: mpsc::Receiver<TransportEvent>) -> JoinHandle<()> {
        let node = self.clone();
        tokio::spawn(async move { node.run(receiver).await })
    }
}
