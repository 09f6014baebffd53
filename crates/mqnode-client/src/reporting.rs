use std::sync::Arc;
use std::time::Duration;

use mqnode::address::{Address, AddressKind};
use mqnode::attributes::ReportAttributes;
use mqnode::envelope::Notification;
use mqnode::topic::Interface;

use serde_json::Value;

use tokio::time::{Instant, Interval, interval_at, sleep_until};

use tokio_util::sync::CancellationToken;

use tracing::{debug, info, warn};

use crate::node::Shared;
use crate::transport::Transport;
use crate::tree::lock;

/// Decides whether a value must be reported according to the attributes
/// of its node.
///
/// Muting and cancellation are not considered.
///
/// - Structured values are reported when any field differs from the last
///   report, a field appeared or disappeared, or nothing structured has
///   been reported yet.
/// - Numbers follow the thresholds. When `gt` and `lt` delimit a band
///   (`lt > gt`), only changed values strictly inside the band are
///   reported and `step` is ignored. Otherwise a changed value is
///   reported when it is above `gt` or below `lt`, and any value moving
///   more than `step` away from the last report is reported.
/// - Any other value is reported when it differs from the last report.
#[must_use]
pub(crate) fn needs_report(attributes: &ReportAttributes, value: &Value) -> bool {
    let last = attributes.last_reported.as_ref();

    match value {
        Value::Object(current) => match last {
            Some(Value::Object(last)) => {
                current.len() != last.len()
                    || current
                        .iter()
                        .any(|(key, value)| last.get(key) != Some(value))
            }
            _ => true,
        },
        Value::Number(number) => {
            let Some(current) = number.as_f64() else {
                return last != Some(value);
            };
            let last = last.and_then(Value::as_f64);
            let changed = last != Some(current);

            if let (Some(gt), Some(lt)) = (attributes.gt, attributes.lt) {
                if lt > gt {
                    return changed && gt < current && current < lt;
                }
            }

            let above = attributes.gt.is_some_and(|gt| current > gt);
            let below = attributes.lt.is_some_and(|lt| current < lt);
            let stepped = attributes
                .step
                .zip(last)
                .is_some_and(|(step, last)| (current - last).abs() > step);

            (changed && (above || below)) || stepped
        }
        _ => last != Some(value),
    }
}

async fn deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn tick(poller: Option<&mut Interval>) {
    match poller {
        Some(poller) => {
            poller.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl<T: Transport> Shared<T> {
    /// Enables reporting on an instance or a resource.
    ///
    /// Does nothing if reporting is already enabled.
    pub(crate) fn enable_report(self: &Arc<Self>, address: Address) {
        let address = address.normalized();
        let mut reporters = lock(&self.reporters);
        if reporters.contains_key(&address) {
            debug!("Reporting already enabled on {address}");
            return;
        }

        self.tree.with_attributes(&address, |attributes| {
            attributes.cancel = false;
            attributes.mute = true;
        });

        reporters.insert(address, self.spawn_reporter(address));
        info!("Reporting enabled on {address}");
    }

    /// Restarts a running reporter, so that new periods take effect.
    pub(crate) fn restart_report(self: &Arc<Self>, address: Address) {
        let address = address.normalized();
        let mut reporters = lock(&self.reporters);
        let Some(token) = reporters.get_mut(&address) else {
            return;
        };

        token.cancel();
        // Muted again until the new pmin elapses.
        self.tree.with_existing_attributes(&address, |attributes| {
            attributes.mute = true;
        });
        *token = self.spawn_reporter(address);
        debug!("Reporting restarted on {address}");
    }

    /// Disables reporting on a node, keeping its thresholds.
    pub(crate) fn disable_report(&self, address: Address) {
        let address = address.normalized();
        if let Some(token) = lock(&self.reporters).remove(&address) {
            token.cancel();
            info!("Reporting disabled on {address}");
        }

        self.tree.with_attributes(&address, |attributes| {
            attributes.cancel = true;
            attributes.mute = true;
        });
    }

    /// Disables reporting on every node.
    pub(crate) fn disable_all_reports(&self) {
        let reporters = lock(&self.reporters).drain().collect::<Vec<_>>();
        for (address, token) in reporters {
            token.cancel();
            self.tree.with_existing_attributes(&address, |attributes| {
                attributes.cancel = true;
                attributes.mute = true;
            });
        }
    }

    /// Stops the reporters of an instance and of its resources.
    pub(crate) fn stop_instance_reports(&self, oid: u16, iid: u16) {
        lock(&self.reporters).retain(|address, token| {
            let removed = address.oid == Some(oid) && address.iid == Some(iid);
            if removed {
                token.cancel();
            }
            !removed
        });
    }

    /// Reports a new value of a node when its attributes require it.
    ///
    /// A changed resource is also checked against its observed instance.
    pub(crate) async fn check_and_report(self: &Arc<Self>, address: &Address, value: &Value) {
        if self.mark_reported(address, value) {
            self.spawn_notify(*address, value.clone());
        }

        if address.kind() != AddressKind::Resource {
            return;
        }

        let Some(instance) = address.parent_instance() else {
            return;
        };

        let observed = self
            .tree
            .existing_attributes(&instance)
            .is_some_and(|attributes| !attributes.cancel && !attributes.mute);
        if !observed {
            return;
        }

        match self.tree.dump(&instance).await {
            Ok(dump) => {
                if self.mark_reported(&instance, &dump) {
                    self.spawn_notify(instance, dump);
                }
            }
            Err(e) => debug!("Impossible to dump the observed instance {instance}: {e}"),
        }
    }

    // Records the value as reported when a report is due.
    fn mark_reported(&self, address: &Address, value: &Value) -> bool {
        self.tree
            .with_existing_attributes(address, |attributes| {
                if attributes.cancel || attributes.mute || !needs_report(attributes, value) {
                    return false;
                }
                attributes.last_reported = Some(value.clone());
                true
            })
            .unwrap_or(false)
    }

    fn spawn_reporter(self: &Arc<Self>, address: Address) -> CancellationToken {
        let token = CancellationToken::new();
        tokio::spawn(self.clone().run_reporter(address, token.clone()));
        token
    }

    async fn run_reporter(self: Arc<Self>, address: Address, token: CancellationToken) {
        let ReportAttributes {
            pmin, pmax, pintvl, ..
        } = self.tree.attributes(&address);

        let pmin = Duration::from_secs(pmin);
        let pmax = Duration::from_secs(pmax);

        let start = Instant::now();
        let mut pmin_deadline = Some(start + pmin);
        let mut pmax_deadline = (!pmax.is_zero()).then(|| start + pmax);
        let mut poller = pintvl.filter(|pintvl| *pintvl > 0).map(|pintvl| {
            let period = Duration::from_secs(pintvl);
            interval_at(start + period, period)
        });

        loop {
            tokio::select! {
                () = token.cancelled() => { break; }
                () = deadline(pmin_deadline) => {
                    pmin_deadline = None;
                    self.tree.with_existing_attributes(&address, |attributes| {
                        attributes.mute = false;
                    });
                    if !pmin.is_zero() {
                        self.spawn_forced_report(address);
                    }
                }
                () = deadline(pmax_deadline) => {
                    let now = Instant::now();
                    pmax_deadline = Some(now + pmax);
                    self.spawn_forced_report(address);
                    self.tree.with_existing_attributes(&address, |attributes| {
                        attributes.mute = true;
                    });
                    pmin_deadline = Some(now + pmin);
                }
                () = tick(poller.as_mut()) => {
                    // The change check runs on the polled value.
                    if let Err(e) = self.read(&address, false).await {
                        warn!("Impossible to poll {address}: {e}");
                    }
                }
            }
        }

        debug!("Reporter of {address} stopped");
    }

    fn spawn_forced_report(self: &Arc<Self>, address: Address) {
        let shared = self.clone();
        tokio::spawn(async move {
            let value = match address.kind() {
                AddressKind::Resource => shared.tree.read(&address, false).await,
                _ => shared.tree.dump(&address).await,
            };

            let value = match value {
                Ok(value) => value,
                Err(e) => {
                    warn!("Impossible to read the observed node {address}: {e}");
                    return;
                }
            };

            let enabled = shared
                .tree
                .with_existing_attributes(&address, |attributes| {
                    if attributes.cancel {
                        return false;
                    }
                    attributes.last_reported = Some(value.clone());
                    true
                })
                .unwrap_or(false);

            if enabled {
                shared.notify(address, value).await;
            }
        });
    }

    fn spawn_notify(self: &Arc<Self>, address: Address, value: Value) {
        let shared = self.clone();
        tokio::spawn(async move { shared.notify(address, value).await });
    }

    async fn notify(&self, address: Address, data: Value) {
        let Some(oid) = address.oid else {
            return;
        };

        let notification = Notification {
            oid,
            iid: address.iid,
            rid: address.rid,
            data,
        };

        let payload = match serde_json::to_value(&notification) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Impossible to serialize the notification of {address}: {e}");
                return;
            }
        };

        let reply = self.correlator.request(Interface::Notify, payload).await;
        if reply.cancel {
            info!("The manager cancelled reporting on {address}");
            self.disable_report(address);
        } else if !reply.status.is_success() {
            warn!("Notification of {address} answered with {}", reply.status);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mqnode::address::Address;
    use mqnode::attributes::{AttributesPatch, ReportAttributes};
    use mqnode::topic::Interface;

    use serde_json::{Value, json};

    use crate::resource::Resources;
    use crate::tests::Harness;

    use super::needs_report;

    fn attributes(
        gt: Option<f64>,
        lt: Option<f64>,
        step: Option<f64>,
        last: Option<Value>,
    ) -> ReportAttributes {
        ReportAttributes {
            gt,
            lt,
            step,
            last_reported: last,
            ..ReportAttributes::new(1, 60)
        }
    }

    #[test]
    fn band() {
        let band = attributes(Some(10.), Some(20.), Some(1.), Some(json!(15)));

        assert!(needs_report(&band, &json!(18)));
        assert!(needs_report(&band, &json!(10.5)));
        assert!(!needs_report(&band, &json!(15)));
        // Values outside the band never report, whatever the step.
        assert!(!needs_report(&band, &json!(25)));
        assert!(!needs_report(&band, &json!(5)));
        assert!(!needs_report(&band, &json!(10)));
        assert!(!needs_report(&band, &json!(20)));
    }

    #[test]
    fn thresholds() {
        let thresholds = attributes(Some(20.), Some(10.), None, Some(json!(15)));

        assert!(needs_report(&thresholds, &json!(21)));
        assert!(needs_report(&thresholds, &json!(9)));
        assert!(!needs_report(&thresholds, &json!(16)));

        let last = attributes(Some(20.), None, None, Some(json!(21)));
        assert!(!needs_report(&last, &json!(21)));
    }

    #[test]
    fn step() {
        let step = attributes(None, None, Some(2.), Some(json!(10)));

        assert!(needs_report(&step, &json!(12.5)));
        assert!(needs_report(&step, &json!(7)));
        assert!(!needs_report(&step, &json!(12)));
        assert!(!needs_report(&step, &json!(10)));

        // Nothing to measure the step from.
        let first = attributes(None, None, Some(2.), None);
        assert!(!needs_report(&first, &json!(100)));
    }

    #[test]
    fn plain_values() {
        let none = attributes(None, None, None, Some(json!("Cel")));
        assert!(needs_report(&none, &json!("Far")));
        assert!(!needs_report(&none, &json!("Cel")));
        assert!(needs_report(&none, &json!(true)));

        // Numbers without thresholds are only reported by the timers.
        let number = attributes(None, None, None, Some(json!(1)));
        assert!(!needs_report(&number, &json!(2)));
    }

    #[test]
    fn structured_values() {
        let first = attributes(None, None, None, None);
        assert!(needs_report(&first, &json!({ "5700": 21 })));

        let last = attributes(None, None, None, Some(json!({ "5700": 21, "5701": "Cel" })));
        assert!(!needs_report(&last, &json!({ "5700": 21, "5701": "Cel" })));
        assert!(needs_report(&last, &json!({ "5700": 22, "5701": "Cel" })));
        // A resource removed from the instance.
        assert!(needs_report(&last, &json!({ "5700": 21 })));
        assert!(needs_report(&last, &json!({ "5702": 0 })));
    }

    fn sensor(harness: &Harness, pmin: u64, pmax: u64, step: Option<f64>) -> Address {
        harness
            .node
            .add_object(3303, 0, Resources::new().value(5700, json!(20.0)))
            .unwrap();

        let address = Address::resource(3303, 0, 5700);
        let patch = AttributesPatch {
            pmin: Some(pmin),
            pmax: Some(pmax),
            step: step.map(Some),
            ..AttributesPatch::default()
        };
        harness.node.tree().set_attributes(&address, &patch);
        address
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_reports() {
        let harness = Harness::new();
        let address = sensor(&harness, 2, 10, None);

        harness.node.enable_report(address);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        let notified = harness.transport.published("notify/dev01");
        assert_eq!(notified.len(), 1);
        assert_eq!(
            notified[0],
            json!({ "transId": 0, "oid": 3303, "iid": 0, "rid": 5700, "data": 20.0 })
        );

        tokio::time::sleep(Duration::from_secs(8)).await;
        assert_eq!(harness.transport.published("notify/dev01").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn change_driven_reports() {
        let harness = Harness::new();
        let address = sensor(&harness, 1, 0, Some(1.));

        harness.node.enable_report(address);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(harness.transport.published("notify/dev01").len(), 1);

        harness.node.write(&address, json!(20.5)).await.unwrap();
        harness.node.write(&address, json!(22.0)).await.unwrap();
        let notified = harness.transport.wait_published("notify/dev01", 2).await;
        assert_eq!(notified[1]["data"], json!(22.0));

        harness.node.disable_report(address);
        harness.node.write(&address, json!(30.0)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(harness.transport.published("notify/dev01").len(), 2);

        let attributes = harness.node.tree().attributes(&address);
        assert!(attributes.cancel && attributes.mute);
        assert_eq!(attributes.step, Some(1.));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_reply_disables_reporting() {
        let harness = Harness::new();
        let address = sensor(&harness, 1, 0, None);

        harness.node.enable_report(address);
        let notified = harness.transport.wait_published("notify/dev01", 1).await;
        let trans_id = notified[0]["transId"].as_u64().unwrap();

        harness
            .reply(
                Interface::Notify,
                json!({ "transId": trans_id, "status": 200, "cancel": true }),
            )
            .await;

        harness
            .wait_until(|| harness.node.tree().attributes(&address).cancel)
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn removed_instances_stop_reporting() {
        let harness = Harness::new();
        let address = sensor(&harness, 1, 5, None);

        harness.node.enable_report(address);
        harness.transport.wait_published("notify/dev01", 1).await;

        assert!(harness.node.remove_instance(3303, 0));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(harness.transport.published("notify/dev01").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn instance_reports_follow_resource_changes() {
        let harness = Harness::new();
        harness
            .node
            .add_object(
                3303,
                0,
                Resources::new()
                    .value(5700, json!(20.0))
                    .value(5701, json!("Cel")),
            )
            .unwrap();

        let instance = Address::instance(3303, 0);
        let patch = AttributesPatch {
            pmin: Some(0),
            pmax: Some(0),
            ..AttributesPatch::default()
        };
        harness.node.tree().set_attributes(&instance, &patch);
        harness.node.enable_report(instance);

        // Unmuted right away, without any report.
        harness
            .wait_until(|| !harness.node.tree().attributes(&instance).mute)
            .await;
        assert!(harness.transport.published("notify/dev01").is_empty());

        harness
            .node
            .write(&Address::resource(3303, 0, 5700), json!(21.0))
            .await
            .unwrap();

        let notified = harness.transport.wait_published("notify/dev01", 1).await;
        assert_eq!(
            notified[0],
            json!({
                "transId": 0,
                "oid": 3303,
                "iid": 0,
                "data": { "5700": 21.0, "5701": "Cel" }
            })
        );
    }
}
