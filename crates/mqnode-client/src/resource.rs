use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use mqnode::status::StatusCode;

use serde_json::Value;

use crate::error::Result;

pub(crate) type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

pub(crate) type ReadFn = Arc<dyn Fn() -> BoxFuture<Result<Value>> + Send + Sync + 'static>;

pub(crate) type WriteFn = Arc<dyn Fn(Value) -> BoxFuture<Result<Value>> + Send + Sync + 'static>;

pub(crate) type ExecFn =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<Result<ExecOutcome>> + Send + Sync + 'static>;

/// The outcome of a resource execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOutcome {
    /// Status code overriding the default `Changed`.
    pub status: Option<StatusCode>,
    /// Data returned to the manager.
    pub data: Option<Value>,
}

impl ExecOutcome {
    /// Creates an [`ExecOutcome`] without data.
    #[must_use]
    pub const fn done() -> Self {
        Self {
            status: None,
            data: None,
        }
    }

    /// Creates an [`ExecOutcome`] carrying data.
    #[must_use]
    pub const fn with_data(data: Value) -> Self {
        Self {
            status: None,
            data: Some(data),
        }
    }

    /// Overrides the status code of the [`ExecOutcome`].
    #[must_use]
    pub const fn status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }
}

/// A resource whose operations are carried out by functions.
///
/// A callable resource needs at least one function. When only the
/// execute function is present, the resource is invocable but neither
/// readable nor writable.
#[derive(Clone, Default)]
pub struct Callable {
    pub(crate) read: Option<ReadFn>,
    pub(crate) write: Option<WriteFn>,
    pub(crate) exec: Option<ExecFn>,
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable")
            .field("read", &self.read.is_some())
            .field("write", &self.write.is_some())
            .field("exec", &self.exec.is_some())
            .finish()
    }
}

impl Callable {
    /// Creates an empty [`Callable`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            read: None,
            write: None,
            exec: None,
        }
    }

    /// Sets the function producing the resource value.
    #[must_use]
    pub fn read<F, Fut>(mut self, read: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.read = Some(Arc::new(move || -> BoxFuture<Result<Value>> { Box::pin(read()) }));
        self
    }

    /// Sets the function storing a new resource value.
    ///
    /// The returned value is the one considered written.
    #[must_use]
    pub fn write<F, Fut>(mut self, write: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.write = Some(Arc::new(move |value| -> BoxFuture<Result<Value>> {
            Box::pin(write(value))
        }));
        self
    }

    /// Sets the function run when the resource is executed.
    #[must_use]
    pub fn exec<F, Fut>(mut self, exec: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ExecOutcome>> + Send + 'static,
    {
        self.exec = Some(Arc::new(move |args| -> BoxFuture<Result<ExecOutcome>> {
            Box::pin(exec(args))
        }));
        self
    }

    pub(crate) const fn is_empty(&self) -> bool {
        self.read.is_none() && self.write.is_none() && self.exec.is_none()
    }

    pub(crate) const fn is_exec_only(&self) -> bool {
        self.exec.is_some() && self.read.is_none() && self.write.is_none()
    }
}

/// The content of a resource.
#[derive(Debug, Clone)]
pub enum ResourceNode {
    /// A stored value.
    Value(Value),
    /// A value produced and consumed by functions.
    Callable(Callable),
}

impl From<Value> for ResourceNode {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<Callable> for ResourceNode {
    fn from(callable: Callable) -> Self {
        Self::Callable(callable)
    }
}

/// The resources of an object instance, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct Resources(pub(crate) Vec<(u16, ResourceNode)>);

impl Resources {
    /// Creates an empty [`Resources`].
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Adds a resource storing a value.
    #[must_use]
    #[inline]
    pub fn value(mut self, rid: u16, value: Value) -> Self {
        self.0.push((rid, ResourceNode::Value(value)));
        self
    }

    /// Adds a [`Callable`] resource.
    #[must_use]
    #[inline]
    pub fn callable(mut self, rid: u16, callable: Callable) -> Self {
        self.0.push((rid, ResourceNode::Callable(callable)));
        self
    }
}
