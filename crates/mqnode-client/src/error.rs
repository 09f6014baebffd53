use std::borrow::Cow;
use std::fmt;

use mqnode::address::InvalidKey;

/// All possible error kinds.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The transport failed to publish, subscribe, or disconnect.
    Transport,
    /// A payload is not valid `JSON`.
    Json,
    /// A payload could not be encrypted or decrypted.
    Cipher,
    /// The registration handshake has been interrupted.
    Handshake,
    /// A resource definition is not valid.
    InvalidResource,
    /// A resource address cannot be resolved.
    Address,
    /// A resource callback failed.
    Callback,
    /// The client configuration is not valid.
    Config,
}

impl ErrorKind {
    pub(crate) const fn description(self) -> &'static str {
        match self {
            Self::Transport => "Transport",
            Self::Json => "Json",
            Self::Cipher => "Cipher",
            Self::Handshake => "Handshake",
            Self::InvalidResource => "Invalid Resource",
            Self::Address => "Address",
            Self::Callback => "Callback",
            Self::Config => "Config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.description().fmt(f)
    }
}

/// A client error.
#[derive(Clone, PartialEq)]
pub struct Error {
    kind: ErrorKind,
    description: Cow<'static, str>,
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error().fmt(f)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error().fmt(f)
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Creates an [`Error`] from an [`ErrorKind`] and a description.
    pub fn new(kind: ErrorKind, description: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }

    /// Returns the [`ErrorKind`].
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    fn error(&self) -> String {
        format!("{}: {}", self.kind, self.description)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorKind::Json, e.to_string())
    }
}

impl From<rumqttc::v5::ClientError> for Error {
    fn from(e: rumqttc::v5::ClientError) -> Self {
        Self::new(ErrorKind::Transport, e.to_string())
    }
}

impl From<InvalidKey> for Error {
    fn from(e: InvalidKey) -> Self {
        Self::new(ErrorKind::Address, e.to_string())
    }
}

/// A specialized [`Result`] type for [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// The reason a resource refuses an operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Restriction {
    /// The resource can only be executed.
    ExecOnly,
    /// The resource access mode forbids the operation.
    Denied,
}

impl Restriction {
    /// Returns the tag placed in dumps in place of the refused value.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::ExecOnly => "_exec_",
            Self::Denied => "_unreadable_",
        }
    }
}

/// All the ways an operation on the resource tree may fail.
#[derive(Clone, Debug, PartialEq)]
pub enum ResourceError {
    /// The addressed node does not exist.
    NotFound,
    /// The resource cannot be read.
    Unreadable(Restriction),
    /// The resource cannot be written.
    Unwritable(Restriction),
    /// The resource cannot be executed.
    Unexecutable,
    /// The written value has a different type than the stored one.
    BadType,
    /// The execution arguments are not a sequence.
    BadArguments,
    /// A resource callback failed.
    Callback(Error),
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => f.write_str("resource not found"),
            Self::Unreadable(restriction) => write!(f, "unreadable resource ({restriction:?})"),
            Self::Unwritable(restriction) => write!(f, "unwritable resource ({restriction:?})"),
            Self::Unexecutable => f.write_str("unexecutable resource"),
            Self::BadType => f.write_str("value type mismatch"),
            Self::BadArguments => f.write_str("execution arguments must be an array"),
            Self::Callback(e) => write!(f, "resource callback failed: {e}"),
        }
    }
}

impl std::error::Error for ResourceError {}
