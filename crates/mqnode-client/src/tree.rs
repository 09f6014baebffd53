use std::mem::discriminant;
use std::sync::{Mutex, MutexGuard, PoisonError};

use mqnode::address::{Address, AddressKind};
use mqnode::attributes::{AttributesPatch, ReportAttributes};
use mqnode::dictionary::access;
use mqnode::envelope::ObjectList;

use hashbrown::{DefaultHashBuilder, HashMap};

use indexmap::IndexMap;

use futures_util::future::join_all;

use serde_json::{Map, Value};

use crate::error::{Error, ErrorKind, ResourceError, Restriction, Result};
use crate::resource::{Callable, ExecOutcome, ResourceNode, Resources};

type Instance = IndexMap<u16, ResourceNode, DefaultHashBuilder>;
type Object = IndexMap<u16, Instance, DefaultHashBuilder>;
type Objects = IndexMap<u16, Object, DefaultHashBuilder>;

/// Instance identifiers mapped to the identifiers of their resources.
pub type ResourceList = IndexMap<u16, Vec<u16>, DefaultHashBuilder>;

// Tables are never left half-updated, so a poisoned lock is still usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The addressable resource tree of a client.
///
/// The tree stores every object, instance, and resource together with the
/// report attributes of the observed nodes. Operations never hold a lock
/// while a resource function runs, so functions may freely access the tree.
#[derive(Debug)]
pub struct ResourceTree {
    objects: Mutex<Objects>,
    attributes: Mutex<HashMap<Address, ReportAttributes>>,
    default_pmin: u64,
    default_pmax: u64,
}

impl ResourceTree {
    pub(crate) fn new(default_pmin: u64, default_pmax: u64) -> Self {
        Self {
            objects: Mutex::new(Objects::default()),
            attributes: Mutex::new(HashMap::new()),
            default_pmin,
            default_pmax,
        }
    }

    /// Adds the resources of an object instance.
    ///
    /// Resources of an already existing instance are replaced one by one,
    /// the others are kept.
    ///
    /// # Errors
    ///
    /// An error is returned if a [`Callable`] resource has no functions.
    /// In that case the tree is left untouched.
    pub fn add_object(&self, oid: u16, iid: u16, resources: Resources) -> Result<()> {
        if let Some((rid, _)) = resources
            .0
            .iter()
            .find(|(_, node)| matches!(node, ResourceNode::Callable(callable) if callable.is_empty()))
        {
            return Err(Error::new(
                ErrorKind::InvalidResource,
                format!("Resource {} has no functions", Address::resource(oid, iid, *rid)),
            ));
        }

        let mut objects = lock(&self.objects);
        let instance = objects
            .entry(oid)
            .or_default()
            .entry(iid)
            .or_default();
        instance.extend(resources.0);

        Ok(())
    }

    /// Removes an object instance, together with the report attributes of
    /// the instance and of its resources.
    ///
    /// Returns whether the instance existed.
    pub fn remove_instance(&self, oid: u16, iid: u16) -> bool {
        let removed = {
            let mut objects = lock(&self.objects);
            let Some(object) = objects.get_mut(&oid) else {
                return false;
            };
            let removed = object.shift_remove(&iid).is_some();
            if object.is_empty() {
                objects.shift_remove(&oid);
            }
            removed
        };

        if removed {
            lock(&self.attributes)
                .retain(|address, _| address.oid != Some(oid) || address.iid != Some(iid));
        }

        removed
    }

    /// Returns the kind of the addressed node and whether it exists.
    ///
    /// Absent intermediate nodes simply make the node not existent.
    #[must_use]
    pub fn exists(&self, address: &Address) -> (AddressKind, bool) {
        let kind = address.kind();
        let objects = lock(&self.objects);

        let exists = match (address.oid, address.iid, address.rid) {
            (None, _, _) => true,
            (Some(oid), None, _) => objects.contains_key(&oid),
            (Some(oid), Some(iid), None) => objects
                .get(&oid)
                .is_some_and(|object| object.contains_key(&iid)),
            (Some(oid), Some(iid), Some(rid)) => objects
                .get(&oid)
                .and_then(|object| object.get(&iid))
                .is_some_and(|instance| instance.contains_key(&rid)),
        };

        (kind, exists)
    }

    /// Returns all objects and their instances.
    #[must_use]
    pub fn object_list(&self) -> ObjectList {
        lock(&self.objects)
            .iter()
            .map(|(oid, object)| (*oid, object.keys().copied().collect()))
            .collect()
    }

    /// Returns the resource identifiers of every instance of an object.
    #[must_use]
    pub fn resource_list(&self, oid: u16) -> ResourceList {
        lock(&self.objects).get(&oid).map_or_else(ResourceList::default, |object| {
            object
                .iter()
                .map(|(iid, instance)| (*iid, instance.keys().copied().collect()))
                .collect()
        })
    }

    fn node(&self, address: &Address) -> std::result::Result<ResourceNode, ResourceError> {
        let (Some(oid), Some(iid), Some(rid)) = (address.oid, address.iid, address.rid) else {
            return Err(ResourceError::NotFound);
        };

        lock(&self.objects)
            .get(&oid)
            .and_then(|object| object.get(&iid))
            .and_then(|instance| instance.get(&rid))
            .cloned()
            .ok_or(ResourceError::NotFound)
    }

    /// Reads a resource.
    ///
    /// The read function of a [`Callable`] resource is always invoked.
    /// A stored value is returned unless `enforce_access` is set and the
    /// access mode of the resource forbids reading.
    ///
    /// # Errors
    ///
    /// - [`ResourceError::NotFound`] when the resource does not exist
    /// - [`ResourceError::Unreadable`] when the resource cannot be read
    /// - [`ResourceError::Callback`] when the read function fails
    pub async fn read(
        &self,
        address: &Address,
        enforce_access: bool,
    ) -> std::result::Result<Value, ResourceError> {
        match self.node(address)? {
            ResourceNode::Callable(Callable {
                read: Some(read), ..
            }) => read().await.map_err(ResourceError::Callback),
            ResourceNode::Callable(callable) if callable.is_exec_only() => {
                Err(ResourceError::Unreadable(Restriction::ExecOnly))
            }
            ResourceNode::Callable(_) => Err(ResourceError::Unreadable(Restriction::Denied)),
            ResourceNode::Value(value) => {
                if enforce_access && !resource_access(address).is_readable() {
                    Err(ResourceError::Unreadable(Restriction::Denied))
                } else {
                    Ok(value)
                }
            }
        }
    }

    /// Writes a resource and returns the written value.
    ///
    /// A stored value is only replaced by a value of the same `JSON` type.
    /// The write function of a [`Callable`] resource decides the
    /// written value.
    ///
    /// # Errors
    ///
    /// - [`ResourceError::NotFound`] when the resource does not exist
    /// - [`ResourceError::BadType`] when the value type differs from the
    ///   stored one
    /// - [`ResourceError::Unwritable`] when the resource cannot be written
    /// - [`ResourceError::Callback`] when the write function fails
    pub async fn write(
        &self,
        address: &Address,
        value: Value,
        enforce_access: bool,
    ) -> std::result::Result<Value, ResourceError> {
        match self.node(address)? {
            ResourceNode::Callable(Callable {
                write: Some(write), ..
            }) => write(value).await.map_err(ResourceError::Callback),
            ResourceNode::Callable(callable) if callable.is_exec_only() => {
                Err(ResourceError::Unwritable(Restriction::ExecOnly))
            }
            ResourceNode::Callable(_) => Err(ResourceError::Unwritable(Restriction::Denied)),
            ResourceNode::Value(stored) => {
                if enforce_access && !resource_access(address).is_writable() {
                    return Err(ResourceError::Unwritable(Restriction::Denied));
                }
                if discriminant(&stored) != discriminant(&value) {
                    return Err(ResourceError::BadType);
                }
                self.store(address, value.clone())?;
                Ok(value)
            }
        }
    }

    fn store(&self, address: &Address, value: Value) -> std::result::Result<(), ResourceError> {
        let (Some(oid), Some(iid), Some(rid)) = (address.oid, address.iid, address.rid) else {
            return Err(ResourceError::NotFound);
        };

        // The resource may have been removed or replaced while unlocked.
        match lock(&self.objects)
            .get_mut(&oid)
            .and_then(|object| object.get_mut(&iid))
            .and_then(|instance| instance.get_mut(&rid))
        {
            Some(ResourceNode::Value(stored)) => {
                *stored = value;
                Ok(())
            }
            Some(ResourceNode::Callable(_)) => Err(ResourceError::BadType),
            None => Err(ResourceError::NotFound),
        }
    }

    /// Executes a resource with the given arguments.
    ///
    /// Missing arguments are an empty sequence.
    ///
    /// # Errors
    ///
    /// - [`ResourceError::NotFound`] when the resource does not exist
    /// - [`ResourceError::BadArguments`] when the arguments are not a
    ///   sequence
    /// - [`ResourceError::Unexecutable`] when the resource has no execute
    ///   function
    /// - [`ResourceError::Callback`] when the execute function fails
    pub async fn execute(
        &self,
        address: &Address,
        args: Option<Value>,
    ) -> std::result::Result<ExecOutcome, ResourceError> {
        let node = self.node(address)?;

        let args = match args {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(args)) => args,
            Some(_) => return Err(ResourceError::BadArguments),
        };

        match node {
            ResourceNode::Callable(Callable {
                exec: Some(exec), ..
            }) => exec(args).await.map_err(ResourceError::Callback),
            _ => Err(ResourceError::Unexecutable),
        }
    }

    /// Reads every resource of an object or of an instance.
    ///
    /// Resources are read concurrently and merged once all reads complete.
    /// Resources refusing to be read are replaced by a tag. Object dumps
    /// are keyed by instance identifier, then by resource identifier.
    ///
    /// # Errors
    ///
    /// - [`ResourceError::NotFound`] when the node does not exist or is
    ///   not an object or an instance
    /// - [`ResourceError::Callback`] when a read function fails
    pub async fn dump(&self, address: &Address) -> std::result::Result<Value, ResourceError> {
        match address.kind() {
            AddressKind::Instance => self.dump_instance(address).await,
            AddressKind::Object => {
                let Some(oid) = address.oid else {
                    return Err(ResourceError::NotFound);
                };

                let iids: Vec<u16> = lock(&self.objects)
                    .get(&oid)
                    .ok_or(ResourceError::NotFound)?
                    .keys()
                    .copied()
                    .collect();

                let dumps = join_all(iids.iter().map(|iid| async move {
                    let dump = self.dump_instance(&Address::instance(oid, *iid)).await;
                    (*iid, dump)
                }))
                .await;

                let mut record = Map::new();
                for (iid, dump) in dumps {
                    match dump {
                        Ok(dump) => {
                            record.insert(iid.to_string(), dump);
                        }
                        // Removed while dumping.
                        Err(ResourceError::NotFound) => {}
                        Err(e) => return Err(e),
                    }
                }
                Ok(Value::Object(record))
            }
            AddressKind::Root | AddressKind::Resource => Err(ResourceError::NotFound),
        }
    }

    async fn dump_instance(&self, address: &Address) -> std::result::Result<Value, ResourceError> {
        let (Some(oid), Some(iid)) = (address.oid, address.iid) else {
            return Err(ResourceError::NotFound);
        };

        let rids: Vec<u16> = lock(&self.objects)
            .get(&oid)
            .and_then(|object| object.get(&iid))
            .ok_or(ResourceError::NotFound)?
            .keys()
            .copied()
            .collect();

        let reads = join_all(rids.iter().map(|rid| async move {
            let value = self.read(&Address::resource(oid, iid, *rid), true).await;
            (*rid, value)
        }))
        .await;

        let mut record = Map::new();
        for (rid, value) in reads {
            match value {
                Ok(value) => {
                    record.insert(rid.to_string(), value);
                }
                Err(ResourceError::Unreadable(restriction)) => {
                    record.insert(rid.to_string(), Value::from(restriction.tag()));
                }
                Err(ResourceError::NotFound) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(Value::Object(record))
    }

    /// Returns the report attributes of a node.
    ///
    /// Attributes are created with the default periods on first access.
    #[must_use]
    pub fn attributes(&self, address: &Address) -> ReportAttributes {
        self.with_attributes(address, |attributes| attributes.clone())
    }

    /// Applies an [`AttributesPatch`] to the report attributes of a node and
    /// returns the updated attributes.
    pub fn set_attributes(&self, address: &Address, patch: &AttributesPatch) -> ReportAttributes {
        self.with_attributes(address, |attributes| {
            patch.apply(attributes);
            attributes.clone()
        })
    }

    pub(crate) fn with_attributes<R>(
        &self,
        address: &Address,
        f: impl FnOnce(&mut ReportAttributes) -> R,
    ) -> R {
        let mut attributes = lock(&self.attributes);
        let entry = attributes
            .entry(address.normalized())
            .or_insert_with(|| ReportAttributes::new(self.default_pmin, self.default_pmax));
        f(entry)
    }

    // Reads attributes without creating them.
    pub(crate) fn existing_attributes(&self, address: &Address) -> Option<ReportAttributes> {
        lock(&self.attributes).get(&address.normalized()).cloned()
    }

    pub(crate) fn with_existing_attributes<R>(
        &self,
        address: &Address,
        f: impl FnOnce(&mut ReportAttributes) -> R,
    ) -> Option<R> {
        lock(&self.attributes).get_mut(&address.normalized()).map(f)
    }
}

fn resource_access(address: &Address) -> mqnode::dictionary::Access {
    match (address.oid, address.rid) {
        (Some(oid), Some(rid)) => access(oid, rid),
        _ => mqnode::dictionary::Access::ReadWrite,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use mqnode::address::{Address, AddressKind};
    use mqnode::attributes::AttributesPatch;
    use mqnode::status::StatusCode;

    use serde_json::{Value, json};

    use crate::error::{ResourceError, Restriction};
    use crate::resource::{Callable, ExecOutcome, Resources};

    use super::ResourceTree;

    pub(crate) fn temperature_tree() -> ResourceTree {
        let tree = ResourceTree::new(1, 60);
        tree.add_object(
            3303,
            0,
            Resources::new()
                .value(5700, json!(21.5))
                .value(5701, json!("Cel"))
                .callable(
                    5605,
                    Callable::new().exec(|_| async { Ok(ExecOutcome::done()) }),
                ),
        )
        .unwrap();
        tree.add_object(3303, 1, Resources::new().value(5700, json!(19)))
            .unwrap();
        tree
    }

    #[test]
    fn exists() {
        let tree = temperature_tree();

        assert_eq!(tree.exists(&Address::ROOT), (AddressKind::Root, true));
        assert_eq!(
            tree.exists(&Address::object(3303)),
            (AddressKind::Object, true)
        );
        assert_eq!(
            tree.exists(&Address::resource(3303, 1, 5700)),
            (AddressKind::Resource, true)
        );
        assert_eq!(
            tree.exists(&Address::resource(3303, 7, 5700)),
            (AddressKind::Resource, false)
        );
        assert_eq!(
            tree.exists(&Address::instance(3304, 0)),
            (AddressKind::Instance, false)
        );
    }

    #[test]
    fn empty_callable_is_rejected() {
        let tree = ResourceTree::new(1, 60);
        assert!(
            tree.add_object(3311, 0, Resources::new().callable(5850, Callable::new()))
                .is_err()
        );
        assert!(tree.object_list().is_empty());
    }

    #[tokio::test]
    async fn missing_nodes_are_not_found() {
        let tree = temperature_tree();
        let missing = Address::resource(3303, 0, 9999);

        assert_eq!(tree.read(&missing, true).await, Err(ResourceError::NotFound));
        assert_eq!(
            tree.write(&missing, json!(1), true).await,
            Err(ResourceError::NotFound)
        );
        assert_eq!(
            tree.execute(&missing, None).await,
            Err(ResourceError::NotFound)
        );
        assert_eq!(
            tree.exists(&missing),
            (AddressKind::Resource, false),
            "Failed operations must not create nodes"
        );
    }

    #[tokio::test]
    async fn read_access() {
        let tree = temperature_tree();
        let exec = Address::resource(3303, 0, 5605);

        assert_eq!(
            tree.read(&Address::resource(3303, 0, 5700), true).await,
            Ok(json!(21.5))
        );
        assert_eq!(
            tree.read(&exec, true).await,
            Err(ResourceError::Unreadable(Restriction::ExecOnly))
        );
        // Exec-only resources stay unreadable without access enforcement.
        assert_eq!(
            tree.read(&exec, false).await,
            Err(ResourceError::Unreadable(Restriction::ExecOnly))
        );
    }

    #[tokio::test]
    async fn write_checks() {
        let tree = temperature_tree();
        let value = Address::resource(3303, 1, 5700);

        // `sensorValue` is a read-only resource.
        assert_eq!(
            tree.write(&value, json!(20), true).await,
            Err(ResourceError::Unwritable(Restriction::Denied))
        );
        assert_eq!(
            tree.write(&value, json!("20"), false).await,
            Err(ResourceError::BadType)
        );
        assert_eq!(tree.write(&value, json!(20.5), false).await, Ok(json!(20.5)));
        assert_eq!(tree.read(&value, true).await, Ok(json!(20.5)));
    }

    #[tokio::test]
    async fn callable_write() {
        let tree = ResourceTree::new(1, 60);
        let counter = Arc::new(AtomicU32::new(0));
        let writes = counter.clone();

        tree.add_object(
            3311,
            0,
            Resources::new().callable(
                5850,
                Callable::new().write(move |value: Value| {
                    let writes = writes.clone();
                    async move {
                        writes.fetch_add(1, Ordering::SeqCst);
                        Ok(json!(mqnode::is_truthy(&value)))
                    }
                }),
            ),
        )
        .unwrap();

        let on_off = Address::resource(3311, 0, 5850);
        assert_eq!(tree.write(&on_off, json!(1), true).await, Ok(json!(true)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(
            tree.read(&on_off, true).await,
            Err(ResourceError::Unreadable(Restriction::Denied))
        );
    }

    #[tokio::test]
    async fn execute() {
        let tree = ResourceTree::new(1, 60);
        tree.add_object(
            3,
            0,
            Resources::new().value(0, json!("ACME")).callable(
                4,
                Callable::new().exec(|args| async move {
                    Ok(ExecOutcome::with_data(json!(args.len())).status(StatusCode::Ok))
                }),
            ),
        )
        .unwrap();

        let reboot = Address::resource(3, 0, 4);
        assert_eq!(
            tree.execute(&reboot, Some(json!([1, "now"]))).await,
            Ok(ExecOutcome::with_data(json!(2)).status(StatusCode::Ok))
        );
        assert_eq!(
            tree.execute(&reboot, Some(json!({ "delay": 1 }))).await,
            Err(ResourceError::BadArguments)
        );
        assert_eq!(
            tree.execute(&Address::resource(3, 0, 0), None).await,
            Err(ResourceError::Unexecutable)
        );
    }

    #[tokio::test]
    async fn dump_matches_single_reads() {
        let tree = temperature_tree();
        let instance = Address::instance(3303, 0);

        let dump = tree.dump(&instance).await.unwrap();
        assert_eq!(
            dump,
            json!({ "5700": 21.5, "5701": "Cel", "5605": "_exec_" })
        );

        for (rid, value) in dump.as_object().unwrap() {
            let address = Address::resource(3303, 0, rid.parse().unwrap());
            match tree.read(&address, true).await {
                Ok(read) => assert_eq!(&read, value),
                Err(ResourceError::Unreadable(restriction)) => {
                    assert_eq!(value, restriction.tag());
                }
                Err(e) => panic!("Unexpected read error {e}"),
            }
        }

        assert_eq!(
            tree.dump(&Address::object(3303)).await.unwrap()["1"],
            json!({ "5700": 19 })
        );
    }

    #[test]
    fn lazy_attributes() {
        let tree = temperature_tree();
        let address = Address::resource(3303, 0, 5700);

        let attributes = tree.attributes(&address);
        assert_eq!((attributes.pmin, attributes.pmax), (1, 60));
        assert!(attributes.cancel && attributes.mute);

        let patch: AttributesPatch = serde_json::from_value(json!({ "step": 0.5 })).unwrap();
        assert_eq!(tree.set_attributes(&address, &patch).step, Some(0.5));
    }

    #[test]
    fn removing_an_instance_drops_its_attributes() {
        let tree = temperature_tree();
        let address = Address::resource(3303, 1, 5700);
        let _ = tree.attributes(&address);

        assert!(tree.remove_instance(3303, 1));
        assert!(tree.existing_attributes(&address).is_none());
        assert_eq!(tree.object_list()[&3303], vec![0]);
        assert!(!tree.remove_instance(3303, 1));
    }
}
