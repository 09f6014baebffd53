use std::time::Duration;

use bytes::Bytes;

use rumqttc::Outgoing;
use rumqttc::v5::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions,
    mqttbytes::QoS,
    mqttbytes::v5::{Filter, Packet},
};

use tokio::sync::mpsc;

use tokio_util::sync::CancellationToken;

use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportEvent};

// The capacity of the bounded asynchronous channel.
const ASYNC_CHANNEL_CAPACITY: usize = 10;

// Keep alive time to send `pingreq` to broker when the connection is idle.
const KEEP_ALIVE_TIME: Duration = Duration::from_secs(5);

// Time to wait before polling again after a connection error.
const RECONNECTION_DELAY: Duration = Duration::from_secs(1);

/// The broker a [`MqttTransport`] connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    address: String,
    port: u16,
    keep_alive: Duration,
    channel_capacity: usize,
}

impl BrokerConfig {
    /// Creates a [`BrokerConfig`] for the given broker address and port.
    #[must_use]
    #[inline]
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            keep_alive: KEEP_ALIVE_TIME,
            channel_capacity: ASYNC_CHANNEL_CAPACITY,
        }
    }

    /// Sets the keep alive time of the connection.
    #[must_use]
    pub const fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Sets the capacity of the channels between the transport and
    /// its node.
    #[must_use]
    pub const fn channel_capacity(mut self, channel_capacity: usize) -> Self {
        self.channel_capacity = channel_capacity;
        self
    }
}

/// A [`Transport`] over an `MQTT` v5 broker.
///
/// Messages are published and received with the `AtLeastOnce` quality of
/// service.
#[derive(Debug)]
pub struct MqttTransport {
    client: AsyncClient,
    cancellation_token: CancellationToken,
}

impl MqttTransport {
    /// Connects to a broker and starts the task polling the connection.
    ///
    /// Returns the transport together with the receiver of its events, to be
    /// passed to the node control loop.
    ///
    /// Must be called within a `tokio` runtime.
    #[must_use]
    pub fn start(client_id: &str, broker: &BrokerConfig) -> (Self, mpsc::Receiver<TransportEvent>) {
        let mut mqttoptions = MqttOptions::new(client_id, broker.address.as_str(), broker.port);
        mqttoptions.set_keep_alive(broker.keep_alive);

        let (client, eventloop) = AsyncClient::new(mqttoptions, broker.channel_capacity);
        let (sender, receiver) = mpsc::channel(broker.channel_capacity);
        let cancellation_token = CancellationToken::new();

        tokio::spawn(run_event_loop(
            eventloop,
            cancellation_token.clone(),
            sender,
        ));

        (
            Self {
                client,
                cancellation_token,
            },
            receiver,
        )
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}

impl Transport for MqttTransport {
    async fn publish(&self, topic: String, payload: Bytes) -> Result<()> {
        self.client
            .publish(topic.as_str(), QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| {
                error!("Impossible to publish on topic {topic}: {e}");
                e.into()
            })
    }

    async fn subscribe(&self, topics: Vec<String>) -> Result<()> {
        if topics.is_empty() {
            return Ok(());
        }

        let filters = topics
            .into_iter()
            .map(|topic| Filter::new(topic, QoS::AtLeastOnce))
            .collect::<Vec<_>>();

        self.client.subscribe_many(filters).await.map_err(|e| {
            error!("Impossible to subscribe to topics: {e}");
            e.into()
        })
    }

    async fn disconnect(&self) -> Result<()> {
        // The polling task stops once the disconnection packet is sent.
        self.client.disconnect().await.map_err(Error::from)
    }
}

#[inline]
fn parse_event(event: std::result::Result<Event, ConnectionError>) -> Option<TransportEvent> {
    let event = match event {
        Ok(event) => event,
        Err(e) => {
            error!("Error in receiving the event: {e}");
            return Some(TransportEvent::Error(e.to_string()));
        }
    };

    let packet = match event {
        Event::Incoming(packet) => packet,
        Event::Outgoing(Outgoing::Disconnect) => return Some(TransportEvent::Closed),
        Event::Outgoing(outgoing) => {
            debug!("Outgoing packet: {:?}", outgoing);
            return None;
        }
    };

    match packet {
        Packet::ConnAck(_) => Some(TransportEvent::Connected),
        // The event loop reconnects on the next poll.
        Packet::Disconnect(_) => Some(TransportEvent::Error(
            "The broker closed the connection".into(),
        )),
        Packet::Publish(publish) => match String::from_utf8(publish.topic.to_vec()) {
            Ok(topic) => Some(TransportEvent::Message {
                topic,
                payload: publish.payload,
            }),
            Err(e) => {
                warn!("Topic is not valid UTF-8, discard the message: {e}");
                None
            }
        },
        packet => {
            debug!("Packet ignored: {:?}", packet);
            None
        }
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    cancellation_token: CancellationToken,
    sender: mpsc::Sender<TransportEvent>,
) {
    loop {
        tokio::select! {
            // Use the cancellation token to stop the loop
            () = cancellation_token.cancelled() => {
                if sender.send(TransportEvent::Closed).await.is_err() {
                    debug!("Transport closed without a node listening");
                }
                break;
            }
            // Poll the `MQTT` event coming from the network
            event = eventloop.poll() => {
                let failed = event.is_err();
                let Some(event) = parse_event(event) else {
                    continue;
                };
                let closed = event == TransportEvent::Closed;

                if sender.send(event).await.is_err() {
                    warn!("The node stopped receiving transport events");
                    break;
                }

                if closed {
                    break;
                }

                if failed {
                    // The event loop reconnects on the next poll.
                    tokio::time::sleep(RECONNECTION_DELAY).await;
                }
            }
        }
    }
    drop(sender);
    drop(eventloop);
}

