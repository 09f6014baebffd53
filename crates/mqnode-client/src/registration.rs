use std::sync::Arc;

use mqnode::envelope::{Registration, Reply};
use mqnode::status::StatusCode;
use mqnode::topic::{ANNOUNCE_TOPIC, Interface, server_request_topic};

use serde_json::{Map, Value, json};

use tokio::time::{Instant, interval_at};

use tokio_util::sync::CancellationToken;

use tracing::{debug, error, info, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::events::NodeEvent;
use crate::node::Shared;
use crate::transport::Transport;
use crate::tree::lock;

// Registration attributes a client may update.
const UPDATABLE_ATTRIBUTES: &[&str] = &["lifetime", "ip", "version"];

impl<T: Transport> Shared<T> {
    pub(crate) async fn start(self: &Arc<Self>) -> Result<()> {
        let result = self.handshake().await;
        if let Err(e) = &result {
            error!("Startup handshake failed: {e}");
            self.emit(NodeEvent::Error(e.clone()));
        }
        result
    }

    async fn handshake(self: &Arc<Self>) -> Result<()> {
        let client_id = self.config.client_id.as_str();

        self.correlator
            .transport()
            .subscribe(vec![
                Interface::Register.response_topic(client_id),
                Interface::Deregister.response_topic(client_id),
                server_request_topic(client_id),
            ])
            .await?;

        let reply = self.register().await;
        if !matches!(reply.status, StatusCode::Ok | StatusCode::Created) {
            return Err(Error::new(
                ErrorKind::Handshake,
                format!("Registration answered with {}", reply.status),
            ));
        }

        self.correlator
            .transport()
            .subscribe(vec![
                Interface::Notify.response_topic(client_id),
                Interface::Update.response_topic(client_id),
                Interface::Ping.response_topic(client_id),
                ANNOUNCE_TOPIC.into(),
            ])
            .await?;

        info!("Client {client_id} ready");
        self.emit(NodeEvent::Ready);
        Ok(())
    }

    pub(crate) async fn register(self: &Arc<Self>) -> Reply {
        let registration = {
            let device = lock(&self.device);
            Registration {
                lifetime: device.lifetime,
                ip: device.ip.clone(),
                mac: device.mac.clone(),
                version: device.version.clone(),
                obj_list: self.tree.object_list(),
            }
        };

        let payload = match serde_json::to_value(&registration) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Impossible to serialize the registration: {e}");
                return Reply::local(StatusCode::InternalError);
            }
        };

        let reply = self.correlator.request(Interface::Register, payload).await;
        if matches!(reply.status, StatusCode::Ok | StatusCode::Created) {
            info!("Registered with status {}", reply.status);
            self.start_keep_alive();
            self.emit(NodeEvent::Registered);
        } else {
            warn!("Registration answered with {}", reply.status);
        }
        reply
    }

    pub(crate) async fn deregister(self: &Arc<Self>) -> Reply {
        let reply = self
            .correlator
            .request(Interface::Deregister, json!({}))
            .await;

        if reply.status == StatusCode::Deleted {
            info!("Deregistered");
            self.stop_keep_alive();
            self.disable_all_reports();
            self.emit(NodeEvent::Deregistered);
            if let Err(e) = self.correlator.transport().disconnect().await {
                error!("Impossible to close the transport: {e}");
                self.emit(NodeEvent::Error(e));
            }
        } else {
            warn!("Deregistration answered with {}", reply.status);
        }
        reply
    }

    pub(crate) async fn update(self: &Arc<Self>, attributes: Value) -> Reply {
        let Value::Object(attributes) = attributes else {
            return Reply::local(StatusCode::BadRequest);
        };

        if let Some(key) = attributes
            .keys()
            .find(|key| key.as_str() != "mac" && !UPDATABLE_ATTRIBUTES.contains(&key.as_str()))
        {
            warn!("Unknown registration attribute `{key}`");
            return Reply::local(StatusCode::BadRequest);
        }

        if attributes.contains_key("mac") {
            warn!("The MAC address cannot be updated");
            return Reply::local(StatusCode::NotAllowed);
        }

        let Some(diff) = self.diff(&attributes) else {
            return Reply::local(StatusCode::BadRequest);
        };

        if diff.is_empty() {
            debug!("Registration attributes unchanged");
            return Reply::local(StatusCode::Ok);
        }

        let reply = self
            .correlator
            .request(Interface::Update, Value::Object(diff.clone()))
            .await;

        if matches!(reply.status, StatusCode::Ok | StatusCode::Changed) {
            let mut device = lock(&self.device);
            for (key, value) in diff {
                match (key.as_str(), value) {
                    ("lifetime", value) => {
                        if let Some(lifetime) = value.as_u64() {
                            device.lifetime = lifetime;
                        }
                    }
                    ("ip", Value::String(ip)) => device.ip = ip,
                    ("version", Value::String(version)) => device.version = version,
                    _ => {}
                }
            }
        }
        reply
    }

    // Returns the attributes differing from the local ones, or `None` when
    // an attribute has the wrong type.
    fn diff(&self, attributes: &Map<String, Value>) -> Option<Map<String, Value>> {
        let device = lock(&self.device);
        let mut diff = Map::new();

        for (key, value) in attributes {
            let changed = match key.as_str() {
                "lifetime" => value.as_u64()? != device.lifetime,
                "ip" => value.as_str()? != device.ip,
                "version" => value.as_str()? != device.version,
                _ => false,
            };
            if changed {
                diff.insert(key.clone(), value.clone());
            }
        }

        Some(diff)
    }

    pub(crate) async fn ping(self: &Arc<Self>) -> Reply {
        let sent = Instant::now();
        let mut reply = self.correlator.request(Interface::Ping, json!({})).await;

        if reply.status != StatusCode::Timeout {
            let elapsed = u64::try_from(sent.elapsed().as_millis()).unwrap_or(u64::MAX);
            reply.data = Some(elapsed.into());
        }
        reply
    }

    pub(crate) async fn close(self: &Arc<Self>) -> Result<()> {
        self.stop_keep_alive();
        self.disable_all_reports();
        self.correlator.transport().disconnect().await
    }

    // Counts the registration lifetime down and refreshes it through an
    // update when it expires.
    fn start_keep_alive(self: &Arc<Self>) {
        let token = CancellationToken::new();
        if let Some(previous) = lock(&self.keep_alive).replace(token.clone()) {
            previous.cancel();
        }

        let shared = self.clone();
        let tick = self.config.lifetime_tick;
        tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + tick, tick);
            let mut elapsed = 0;

            loop {
                tokio::select! {
                    () = token.cancelled() => { break; }
                    _ = interval.tick() => {
                        elapsed += 1;
                        let lifetime = lock(&shared.device).lifetime;
                        if elapsed < lifetime {
                            continue;
                        }
                        elapsed = 0;

                        debug!("Lifetime expired, refresh the registration");
                        if let Err(e) = shared
                            .correlator
                            .publish(Interface::Update, json!({ "lifetime": lifetime }))
                            .await
                        {
                            warn!("Impossible to refresh the registration lifetime: {e}");
                        }
                    }
                }
            }
            debug!("Lifetime keep-alive stopped");
        });
    }

    fn stop_keep_alive(&self) {
        if let Some(token) = lock(&self.keep_alive).take() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mqnode::status::StatusCode;
    use mqnode::topic::Interface;

    use serde_json::json;

    use crate::config::Config;
    use crate::events::NodeEvent;
    use crate::resource::Resources;
    use crate::tests::Harness;

    #[tokio::test(start_paused = true)]
    async fn handshake() {
        let mut harness = Harness::with_config(
            Config::new("dev01")
                .lifetime(600)
                .ip("192.168.1.10")
                .mac("00:0c:29:3e:5b:7a"),
        );
        harness
            .node
            .add_object(3303, 0, Resources::new().value(5700, json!(21.5)))
            .unwrap();

        let node = harness.node.clone();
        let start = tokio::spawn(async move { node.start().await });

        let registration = harness.transport.wait_published("register/dev01", 1).await;
        assert_eq!(
            registration[0],
            json!({
                "transId": 0,
                "lifetime": 600,
                "ip": "192.168.1.10",
                "mac": "00:0c:29:3e:5b:7a",
                "version": "v0.0.1",
                "objList": { "3303": [0] }
            })
        );
        assert_eq!(
            harness.transport.subscriptions(),
            ["register/response/dev01", "deregister/response/dev01", "request/dev01"]
        );

        harness
            .reply(Interface::Register, json!({ "transId": 0, "status": 201 }))
            .await;
        start.await.unwrap().unwrap();

        assert_eq!(harness.transport.subscriptions().len(), 7);
        assert_eq!(harness.next_event().await, NodeEvent::Registered);
        assert_eq!(harness.next_event().await, NodeEvent::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_registration_halts_handshake() {
        let mut harness = Harness::new();

        let node = harness.node.clone();
        let start = tokio::spawn(async move { node.start().await });

        harness.transport.wait_published("register/dev01", 1).await;
        harness
            .reply(Interface::Register, json!({ "transId": 0, "status": 400 }))
            .await;

        assert!(start.await.unwrap().is_err());
        assert_eq!(harness.transport.subscriptions().len(), 3);
        assert!(matches!(harness.next_event().await, NodeEvent::Error(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn lifetime_keep_alive() {
        let harness = Harness::with_config(Config::new("dev01").lifetime(30));

        let node = harness.node.clone();
        let register = tokio::spawn(async move { node.register().await });
        harness.transport.wait_published("register/dev01", 1).await;
        harness
            .reply(Interface::Register, json!({ "transId": 0, "status": 201 }))
            .await;
        assert_eq!(register.await.unwrap().status, StatusCode::Created);

        tokio::time::sleep(Duration::from_millis(29_500)).await;
        assert!(harness.transport.published("update/dev01").is_empty());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            harness.transport.published("update/dev01"),
            [json!({ "transId": 0, "lifetime": 30 })]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_registration_keeps_timer_stopped() {
        let harness = Harness::with_config(Config::new("dev01").lifetime(5));

        let node = harness.node.clone();
        let register = tokio::spawn(async move { node.register().await });
        harness.transport.wait_published("register/dev01", 1).await;
        harness
            .reply(Interface::Register, json!({ "transId": 0, "status": 400 }))
            .await;
        assert_eq!(register.await.unwrap().status, StatusCode::BadRequest);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(harness.transport.published("update/dev01").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn local_update_outcomes() {
        let harness = Harness::with_config(Config::new("dev01").ip("10.0.0.1"));

        assert_eq!(
            harness.node.update(json!({ "color": "red" })).await.status,
            StatusCode::BadRequest
        );
        assert_eq!(
            harness.node.update(json!({ "mac": "aa:bb" })).await.status,
            StatusCode::NotAllowed
        );
        assert_eq!(
            harness.node.update(json!({ "ip": "10.0.0.1" })).await.status,
            StatusCode::Ok
        );
        assert!(harness.transport.published("update/dev01").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn update_publishes_the_diff() {
        let harness = Harness::with_config(Config::new("dev01").ip("10.0.0.1"));

        let node = harness.node.clone();
        let update = tokio::spawn(async move {
            node.update(json!({ "ip": "10.0.0.2", "version": "v0.0.1" }))
                .await
        });

        let published = harness.transport.wait_published("update/dev01", 1).await;
        assert_eq!(published[0], json!({ "transId": 0, "ip": "10.0.0.2" }));

        harness
            .reply(Interface::Update, json!({ "transId": 0, "status": 204 }))
            .await;
        assert_eq!(update.await.unwrap().status, StatusCode::Changed);

        // Applied locally, so nothing changes anymore.
        assert_eq!(
            harness.node.update(json!({ "ip": "10.0.0.2" })).await.status,
            StatusCode::Ok
        );
    }

    #[tokio::test(start_paused = true)]
    async fn ping_round_trip() {
        let harness = Harness::new();

        let node = harness.node.clone();
        let ping = tokio::spawn(async move { node.ping().await });

        harness.transport.wait_published("ping/dev01", 1).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        harness
            .reply(Interface::Ping, json!({ "transId": 0, "status": 200 }))
            .await;

        let reply = ping.await.unwrap();
        assert_eq!(reply.status, StatusCode::Ok);
        assert!(reply.data.unwrap().as_u64().unwrap() >= 40);

        let timeout = harness.node.ping().await;
        assert_eq!(timeout.status, StatusCode::Timeout);
        assert!(timeout.data.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn deregistration_closes_transport() {
        let mut harness = Harness::new();

        let node = harness.node.clone();
        let deregister = tokio::spawn(async move { node.deregister().await });

        harness.transport.wait_published("deregister/dev01", 1).await;
        harness
            .reply(Interface::Deregister, json!({ "transId": 0, "status": 202 }))
            .await;

        assert_eq!(deregister.await.unwrap().status, StatusCode::Deleted);
        assert!(harness.transport.is_disconnected());
        assert_eq!(harness.next_event().await, NodeEvent::Deregistered);
    }
}
