use alloc::string::String;

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::dictionary::{object_by_name, resource_by_name};

/// An address component as it appears on the wire.
///
/// A component is either a numeric identifier or a human-readable alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    /// Numeric identifier.
    Id(u16),
    /// Alias, or an identifier written as a string.
    Name(String),
}

impl From<u16> for Key {
    fn from(id: u16) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Self::Name(name.into())
    }
}

/// The kind of tree node an [`Address`] points to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub enum AddressKind {
    /// The whole tree.
    Root,
    /// An object.
    Object,
    /// An object instance.
    Instance,
    /// A single resource.
    Resource,
}

/// An address component which cannot be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidKey {
    /// The component which failed.
    pub component: &'static str,
    /// The rejected value.
    pub value: String,
}

impl fmt::Display for InvalidKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {} `{}`", self.component, self.value)
    }
}

/// A resolved address in the resource tree.
///
/// The first absent component narrows the address, so an address with
/// an object identifier but without an instance identifier always points
/// to an object, whatever follows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    /// Object identifier.
    pub oid: Option<u16>,
    /// Instance identifier.
    pub iid: Option<u16>,
    /// Resource identifier.
    pub rid: Option<u16>,
}

impl Address {
    /// The root address.
    pub const ROOT: Self = Self {
        oid: None,
        iid: None,
        rid: None,
    };

    /// Creates an [`Address`] pointing to an object.
    #[must_use]
    pub const fn object(oid: u16) -> Self {
        Self {
            oid: Some(oid),
            iid: None,
            rid: None,
        }
    }

    /// Creates an [`Address`] pointing to an object instance.
    #[must_use]
    pub const fn instance(oid: u16, iid: u16) -> Self {
        Self {
            oid: Some(oid),
            iid: Some(iid),
            rid: None,
        }
    }

    /// Creates an [`Address`] pointing to a resource.
    #[must_use]
    pub const fn resource(oid: u16, iid: u16, rid: u16) -> Self {
        Self {
            oid: Some(oid),
            iid: Some(iid),
            rid: Some(rid),
        }
    }

    /// Resolves wire components into an [`Address`].
    ///
    /// Object and resource aliases are looked up in the dictionary, while
    /// instance identifiers must be numeric.
    ///
    /// # Errors
    ///
    /// An error is returned when a component is neither a number nor a
    /// known alias.
    pub fn resolve(
        oid: Option<&Key>,
        iid: Option<&Key>,
        rid: Option<&Key>,
    ) -> Result<Self, InvalidKey> {
        let oid = oid
            .map(|key| {
                resolve_key(key, "object", |name| {
                    object_by_name(name).map(|spec| spec.id)
                })
            })
            .transpose()?;
        let iid = iid
            .map(|key| resolve_key(key, "instance", |_| None))
            .transpose()?;
        let rid = rid
            .map(|key| {
                resolve_key(key, "resource", |name| {
                    oid.and_then(|oid| resource_by_name(oid, name).map(|spec| spec.id))
                })
            })
            .transpose()?;

        Ok(Self { oid, iid, rid })
    }

    /// Returns the [`AddressKind`].
    #[must_use]
    pub const fn kind(&self) -> AddressKind {
        match (self.oid, self.iid, self.rid) {
            (None, _, _) => AddressKind::Root,
            (Some(_), None, _) => AddressKind::Object,
            (Some(_), Some(_), None) => AddressKind::Instance,
            (Some(_), Some(_), Some(_)) => AddressKind::Resource,
        }
    }

    /// Returns the address of the instance containing this node, if any.
    #[must_use]
    pub const fn parent_instance(&self) -> Option<Self> {
        match (self.oid, self.iid) {
            (Some(oid), Some(iid)) => Some(Self::instance(oid, iid)),
            _ => None,
        }
    }

    /// Drops the components ignored by the address kind.
    #[must_use]
    pub const fn normalized(self) -> Self {
        match self.kind() {
            AddressKind::Root => Self::ROOT,
            AddressKind::Object => Self {
                iid: None,
                rid: None,
                ..self
            },
            AddressKind::Instance | AddressKind::Resource => self,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("/")?;
        for id in [self.oid, self.iid, self.rid].into_iter().map_while(|id| id) {
            write!(f, "{id}/")?;
        }
        Ok(())
    }
}

fn resolve_key(
    key: &Key,
    component: &'static str,
    alias: impl FnOnce(&str) -> Option<u16>,
) -> Result<u16, InvalidKey> {
    match key {
        Key::Id(id) => Ok(*id),
        Key::Name(name) => name
            .parse::<u16>()
            .ok()
            .or_else(|| alias(name))
            .ok_or_else(|| InvalidKey {
                component,
                value: name.clone(),
            }),
    }
}
