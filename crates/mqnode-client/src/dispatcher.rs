use std::sync::Arc;

use mqnode::address::{Address, AddressKind};
use mqnode::attributes::{AttributesPatch, ReportAttributes};
use mqnode::command::CommandId;
use mqnode::envelope::{Request, Response};
use mqnode::is_truthy;
use mqnode::status::StatusCode;

use serde_json::{Value, json};

use tracing::{debug, error, warn};

use crate::error::ResourceError;
use crate::node::Shared;
use crate::transport::Transport;

type Outcome = (StatusCode, Option<Value>);

// Finds the transaction identifier of a payload which is not a valid
// request envelope.
fn salvage_trans_id(payload: &Value) -> Option<u8> {
    match payload {
        Value::Object(map) => map
            .get("transId")
            .and_then(Value::as_u64)
            .and_then(|id| u8::try_from(id).ok()),
        Value::String(text) => {
            let (_, rest) = text.split_once("\"transId\"")?;
            let rest = rest.trim_start().strip_prefix(':')?.trim_start();
            let end = rest
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(rest.len());
            rest[..end].parse().ok()
        }
        _ => None,
    }
}

fn salvage_command(payload: &Value) -> CommandId {
    payload
        .get("cmdId")
        .cloned()
        .and_then(|cmd_id| serde_json::from_value(cmd_id).ok())
        .unwrap_or(CommandId::Unknown)
}

fn attributes_data(attributes: &ReportAttributes) -> Option<Value> {
    // Runtime reporting state is never serialized.
    match serde_json::to_value(attributes) {
        Ok(data) => Some(data),
        Err(e) => {
            error!("Impossible to serialize report attributes: {e}");
            None
        }
    }
}

impl<T: Transport> Shared<T> {
    /// Handles a request of the manager in its own task.
    ///
    /// Every request carrying a transaction identifier is answered exactly
    /// once.
    pub(crate) fn dispatch(self: &Arc<Self>, payload: Value) {
        let request = match serde_json::from_value::<Request>(payload.clone()) {
            Ok(request) => request,
            Err(e) => {
                let Some(trans_id) = salvage_trans_id(&payload) else {
                    warn!("Discard a malformed request without transaction identifier: {e}");
                    return;
                };
                warn!("Malformed request {trans_id}: {e}");
                let response =
                    Response::new(trans_id, salvage_command(&payload), StatusCode::BadRequest);
                let shared = self.clone();
                tokio::spawn(async move { shared.respond(&response).await });
                return;
            }
        };

        let shared = self.clone();
        tokio::spawn(async move {
            let response = shared.handle_request(request).await;
            shared.respond(&response).await;
        });
    }

    async fn respond(&self, response: &Response) {
        if let Err(e) = self.correlator.respond(response).await {
            error!(
                "Impossible to answer the `{}` request {}: {e}",
                response.cmd_id, response.trans_id
            );
        }
    }

    pub(crate) async fn handle_request(self: &Arc<Self>, request: Request) -> Response {
        debug!("Handle the `{}` request {}", request.cmd_id, request.trans_id);

        let (status, data) = self.process(&request).await;
        Response {
            data,
            ..Response::new(request.trans_id, request.cmd_id, status)
        }
    }

    async fn process(self: &Arc<Self>, request: &Request) -> Outcome {
        if request.cmd_id == CommandId::Ping {
            return (StatusCode::Ok, None);
        }

        let address = match Address::resolve(
            request.oid.as_ref(),
            request.iid.as_ref(),
            request.rid.as_ref(),
        ) {
            Ok(address) => address,
            Err(e) => {
                warn!("Request {} has a malformed address: {e}", request.trans_id);
                return (StatusCode::BadRequest, None);
            }
        };

        let (kind, exists) = self.tree.exists(&address);
        if kind == AddressKind::Root {
            return (StatusCode::BadRequest, None);
        }
        if !exists {
            return (StatusCode::NotFound, None);
        }

        let data = request.data.clone();
        match request.cmd_id {
            CommandId::Read => self.read_command(&address).await,
            CommandId::Write => self.write_command(&address, kind, data).await,
            CommandId::Discover => self.discover_command(&address, kind),
            CommandId::WriteAttrs => self.write_attributes_command(&address, data),
            CommandId::Execute => self.execute_command(&address, kind, data).await,
            CommandId::Observe => self.observe_command(address, kind, data.as_ref()),
            CommandId::Ping => (StatusCode::Ok, None),
            CommandId::Notify | CommandId::Unknown => (StatusCode::BadRequest, None),
        }
    }

    async fn read_command(self: &Arc<Self>, address: &Address) -> Outcome {
        match self.read(address, true).await {
            Ok(value) => (StatusCode::Content, Some(value)),
            Err(ResourceError::NotFound) => (StatusCode::NotFound, None),
            Err(ResourceError::Unreadable(_)) => (StatusCode::NotAllowed, None),
            Err(e) => {
                warn!("Read of {address} failed: {e}");
                (StatusCode::InternalError, None)
            }
        }
    }

    async fn write_command(
        self: &Arc<Self>,
        address: &Address,
        kind: AddressKind,
        data: Option<Value>,
    ) -> Outcome {
        if kind != AddressKind::Resource {
            return (StatusCode::NotAllowed, None);
        }

        match self
            .write(address, data.unwrap_or(Value::Null), true)
            .await
        {
            Ok(value) => (StatusCode::Changed, Some(value)),
            Err(ResourceError::NotFound) => (StatusCode::NotFound, None),
            Err(ResourceError::BadType) => (StatusCode::BadRequest, None),
            Err(e) => {
                debug!("Write of {address} refused: {e}");
                (StatusCode::NotAllowed, None)
            }
        }
    }

    fn discover_command(&self, address: &Address, kind: AddressKind) -> Outcome {
        let attributes = self.tree.attributes(address);
        let Some(mut data) = attributes_data(&attributes) else {
            return (StatusCode::InternalError, None);
        };

        if kind == AddressKind::Object {
            let resources = address
                .oid
                .map(|oid| self.tree.resource_list(oid))
                .unwrap_or_default();
            data["resrcList"] = json!(resources);
        }

        (StatusCode::Content, Some(data))
    }

    fn write_attributes_command(self: &Arc<Self>, address: &Address, data: Option<Value>) -> Outcome {
        let patch: AttributesPatch = match serde_json::from_value(data.unwrap_or(Value::Null)) {
            Ok(patch) => patch,
            Err(e) => {
                warn!("Attributes of {address} rejected: {e}");
                return (StatusCode::BadRequest, None);
            }
        };

        if patch.cancels() {
            self.disable_report(*address);
        }

        let attributes = self.tree.set_attributes(address, &patch);

        if !patch.cancels() && patch.changes_periods() {
            self.restart_report(*address);
        }

        match attributes_data(&attributes) {
            Some(data) => (StatusCode::Changed, Some(data)),
            None => (StatusCode::InternalError, None),
        }
    }

    async fn execute_command(
        &self,
        address: &Address,
        kind: AddressKind,
        data: Option<Value>,
    ) -> Outcome {
        if kind != AddressKind::Resource {
            return (StatusCode::NotAllowed, None);
        }

        match self.tree.execute(address, data).await {
            Ok(outcome) => (outcome.status.unwrap_or(StatusCode::Changed), outcome.data),
            Err(ResourceError::NotFound) => (StatusCode::NotFound, None),
            Err(ResourceError::BadArguments) => (StatusCode::BadRequest, None),
            Err(ResourceError::Unexecutable) => (StatusCode::NotAllowed, None),
            Err(e) => {
                warn!("Execution of {address} failed: {e}");
                (StatusCode::InternalError, None)
            }
        }
    }

    fn observe_command(
        self: &Arc<Self>,
        address: Address,
        kind: AddressKind,
        data: Option<&Value>,
    ) -> Outcome {
        if kind == AddressKind::Object {
            return (StatusCode::NotAllowed, None);
        }

        let cancel = data
            .and_then(|data| data.get("option"))
            .is_some_and(is_truthy);

        if cancel {
            self.disable_report(address);
        } else {
            self.enable_report(address);
        }

        (StatusCode::Content, None)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mqnode::address::Address;

    use serde_json::{Value, json};

    use crate::error::{Error, ErrorKind};
    use crate::resource::{Callable, ExecOutcome, Resources};
    use crate::tests::Harness;

    use super::salvage_trans_id;

    fn device(harness: &Harness) {
        harness
            .node
            .add_object(
                3303,
                0,
                Resources::new()
                    .value(5700, json!(21.5))
                    .value(5701, json!("Cel"))
                    .value(5750, json!("kitchen"))
                    .callable(
                        5605,
                        Callable::new().exec(|_| async { Ok(ExecOutcome::done()) }),
                    ),
            )
            .unwrap();
        harness
            .node
            .add_object(
                3,
                0,
                Resources::new()
                    .value(0, json!("ACME"))
                    .callable(
                        4,
                        Callable::new().exec(|args: Vec<Value>| async move {
                            if args.is_empty() {
                                Ok(ExecOutcome::with_data(json!("rebooting")))
                            } else {
                                Err(Error::new(ErrorKind::Callback, "Unexpected arguments"))
                            }
                        }),
                    ),
            )
            .unwrap();
    }

    #[test]
    fn trans_id_salvage() {
        assert_eq!(salvage_trans_id(&json!({ "transId": 7, "cmdId": 42.5 })), Some(7));
        assert_eq!(salvage_trans_id(&json!(r#"{"transId" : 12, "oid": }"#)), Some(12));
        assert_eq!(salvage_trans_id(&json!("{}")), None);
        assert_eq!(salvage_trans_id(&json!({ "transId": 300 })), None);
    }

    #[tokio::test(start_paused = true)]
    async fn targeting() {
        let harness = Harness::new();
        device(&harness);

        let root = harness.request(json!({ "transId": 1, "cmdId": "read" })).await;
        assert_eq!(root["status"], 400);

        let missing = harness
            .request(json!({ "transId": 2, "cmdId": "read", "oid": 3303, "iid": 9 }))
            .await;
        assert_eq!(missing["status"], 404);

        let malformed = harness
            .request(json!({ "transId": 3, "cmdId": "read", "oid": "nothing" }))
            .await;
        assert_eq!(malformed["status"], 400);

        let ping = harness.request(json!({ "transId": 4, "cmdId": "ping" })).await;
        assert_eq!(ping, json!({ "transId": 4, "cmdId": "ping", "status": 200 }));

        let unknown = harness
            .request(json!({ "transId": 5, "cmdId": "format", "oid": 3303 }))
            .await;
        assert_eq!(unknown["status"], 400);
    }

    #[tokio::test(start_paused = true)]
    async fn reads() {
        let harness = Harness::new();
        device(&harness);

        let value = harness
            .request(json!({
                "transId": 1, "cmdId": "read",
                "oid": "temperature", "iid": 0, "rid": "sensorValue"
            }))
            .await;
        assert_eq!(
            value,
            json!({ "transId": 1, "cmdId": "read", "status": 205, "data": 21.5 })
        );

        let exec_only = harness
            .request(json!({ "transId": 2, "cmdId": "read", "oid": 3303, "iid": 0, "rid": 5605 }))
            .await;
        assert_eq!(exec_only["status"], 405);

        let instance = harness
            .request(json!({ "transId": 3, "cmdId": 0, "oid": 3303, "iid": 0 }))
            .await;
        assert_eq!(instance["cmdId"], "read");
        assert_eq!(
            instance["data"],
            json!({ "5700": 21.5, "5701": "Cel", "5750": "kitchen", "5605": "_exec_" })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn writes() {
        let harness = Harness::new();
        device(&harness);

        let read_only = harness
            .request(json!({ "transId": 1, "cmdId": "write", "oid": 3303, "iid": 0, "rid": 5700, "data": 30 }))
            .await;
        assert_eq!(read_only["status"], 405);

        let bad_type = harness
            .request(json!({ "transId": 2, "cmdId": "write", "oid": 3303, "iid": 0, "rid": 5750, "data": 3 }))
            .await;
        assert_eq!(bad_type["status"], 400);

        let instance = harness
            .request(json!({ "transId": 3, "cmdId": "write", "oid": 3303, "iid": 0, "data": {} }))
            .await;
        assert_eq!(instance["status"], 405);

        let written = harness
            .request(json!({ "transId": 4, "cmdId": 1, "oid": 3303, "iid": 0, "rid": 5750, "data": "hall" }))
            .await;
        assert_eq!(written["status"], 204);
        assert_eq!(
            harness.node.read(&Address::resource(3303, 0, 5750)).await,
            Ok(json!("hall"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn executions() {
        let harness = Harness::new();
        device(&harness);

        let reboot = harness
            .request(json!({ "transId": 1, "cmdId": "execute", "oid": "device", "iid": 0, "rid": "reboot" }))
            .await;
        assert_eq!(
            reboot,
            json!({ "transId": 1, "cmdId": "execute", "status": 204, "data": "rebooting" })
        );

        let bad_arguments = harness
            .request(json!({ "transId": 2, "cmdId": "execute", "oid": 3, "iid": 0, "rid": 4, "data": { "now": true } }))
            .await;
        assert_eq!(bad_arguments["status"], 400);

        let failing = harness
            .request(json!({ "transId": 3, "cmdId": "execute", "oid": 3, "iid": 0, "rid": 4, "data": [1] }))
            .await;
        assert_eq!(failing["status"], 500);

        let value = harness
            .request(json!({ "transId": 4, "cmdId": "execute", "oid": 3, "iid": 0, "rid": 0 }))
            .await;
        assert_eq!(value["status"], 405);
    }

    #[tokio::test(start_paused = true)]
    async fn attributes() {
        let harness = Harness::new();
        device(&harness);
        let address = Address::resource(3303, 0, 5700);

        let unknown = harness
            .request(json!({
                "transId": 1, "cmdId": "writeAttrs",
                "oid": 3303, "iid": 0, "rid": 5700, "data": { "foo": 1 }
            }))
            .await;
        assert_eq!(unknown["status"], 400);
        assert_eq!(harness.node.tree().attributes(&address).pmin, 1);

        let written = harness
            .request(json!({
                "transId": 2, "cmdId": "writeAttrs",
                "oid": 3303, "iid": 0, "rid": 5700, "data": { "pmin": 5, "gt": 30 }
            }))
            .await;
        assert_eq!(
            written,
            json!({
                "transId": 2, "cmdId": "writeAttrs", "status": 204,
                "data": { "pmin": 5, "pmax": 60, "gt": 30.0, "cancel": true }
            })
        );

        let discovered = harness
            .request(json!({ "transId": 3, "cmdId": "discover", "oid": 3303 }))
            .await;
        assert_eq!(discovered["status"], 205);
        assert_eq!(discovered["data"]["resrcList"], json!({ "0": [5700, 5701, 5750, 5605] }));
        assert!(discovered["data"].get("mute").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn null_clears_attributes() {
        let harness = Harness::new();
        device(&harness);
        let address = Address::resource(3303, 0, 5700);

        harness
            .request(json!({
                "transId": 1, "cmdId": "writeAttrs",
                "oid": 3303, "iid": 0, "rid": 5700, "data": { "gt": 10, "step": 1 }
            }))
            .await;

        let cleared = harness
            .request(json!({
                "transId": 2, "cmdId": "writeAttrs",
                "oid": 3303, "iid": 0, "rid": 5700, "data": { "gt": null }
            }))
            .await;
        assert_eq!(cleared["status"], 204);
        assert_eq!(
            cleared["data"],
            json!({ "pmin": 1, "pmax": 60, "step": 1.0, "cancel": true })
        );

        let attributes = harness.node.tree().attributes(&address);
        assert_eq!(attributes.gt, None);
        assert_eq!(attributes.step, Some(1.));
    }

    #[tokio::test(start_paused = true)]
    async fn new_periods_mute_until_pmin() {
        let harness = Harness::new();
        device(&harness);
        let address = Address::resource(3303, 0, 5750);

        harness
            .request(json!({
                "transId": 1, "cmdId": "writeAttrs",
                "oid": 3303, "iid": 0, "rid": 5750, "data": { "pmin": 1, "pmax": 0 }
            }))
            .await;
        harness
            .request(json!({ "transId": 2, "cmdId": "observe", "oid": 3303, "iid": 0, "rid": 5750 }))
            .await;

        let notified = harness.transport.wait_published("notify/dev01", 1).await;
        assert_eq!(notified[0]["data"], "kitchen");
        assert!(!harness.node.tree().attributes(&address).mute);

        harness
            .request(json!({
                "transId": 3, "cmdId": "writeAttrs",
                "oid": 3303, "iid": 0, "rid": 5750, "data": { "pmin": 100 }
            }))
            .await;
        assert!(harness.node.tree().attributes(&address).mute);

        // Changes are held back while the new pmin runs.
        harness.node.write(&address, json!("hall")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(harness.transport.published("notify/dev01").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn observation() {
        let harness = Harness::new();
        device(&harness);
        let instance = Address::instance(3303, 0);

        let object = harness
            .request(json!({ "transId": 1, "cmdId": "observe", "oid": 3303 }))
            .await;
        assert_eq!(object["status"], 405);

        let enabled = harness
            .request(json!({ "transId": 2, "cmdId": "observe", "oid": 3303, "iid": 0 }))
            .await;
        assert_eq!(enabled["status"], 205);
        assert!(!harness.node.tree().attributes(&instance).cancel);

        let disabled = harness
            .request(json!({
                "transId": 3, "cmdId": "observe",
                "oid": 3303, "iid": 0, "data": { "option": 1 }
            }))
            .await;
        assert_eq!(disabled["status"], 205);
        assert!(harness.node.tree().attributes(&instance).cancel);

        harness
            .node
            .write(&Address::resource(3303, 0, 5700), json!(40.0))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(harness.transport.published("notify/dev01").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_envelopes() {
        let harness = Harness::new();

        harness.raw_request(r#"{"transId": 9, "cmdId": "read", "oid": }"#).await;
        let responses = harness.transport.wait_published("response/dev01", 1).await;
        assert_eq!(
            responses[0],
            json!({ "transId": 9, "cmdId": "unknown", "status": 400 })
        );

        harness.raw_request(r#"{"cmdId": "read"}"#).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(harness.transport.published("response/dev01").len(), 1);
    }
}
