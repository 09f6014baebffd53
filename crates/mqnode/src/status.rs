use core::fmt;

use serde::{Deserialize, Serialize};

/// All status codes carried by a response envelope.
///
/// Codes follow an HTTP-flavored numeric scheme and are serialized as plain
/// numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum StatusCode {
    /// The operation completed.
    Ok,
    /// A new entity has been created.
    Created,
    /// An entity has been deleted.
    Deleted,
    /// An entity has been changed.
    Changed,
    /// The response carries content.
    Content,
    /// The request is malformed.
    BadRequest,
    /// The requester is not authorized.
    Unauthorized,
    /// The target does not exist.
    NotFound,
    /// The operation is not allowed on the target.
    NotAllowed,
    /// No reply arrived in time.
    Timeout,
    /// The request conflicts with the current state.
    Conflict,
    /// An internal error occurred.
    InternalError,
}

impl StatusCode {
    /// Returns the numeric code.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::Created => 201,
            Self::Deleted => 202,
            Self::Changed => 204,
            Self::Content => 205,
            Self::BadRequest => 400,
            Self::Unauthorized => 401,
            Self::NotFound => 404,
            Self::NotAllowed => 405,
            Self::Timeout => 408,
            Self::Conflict => 409,
            Self::InternalError => 500,
        }
    }

    /// Builds a [`StatusCode`] from its numeric code.
    #[must_use]
    pub const fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            200 => Self::Ok,
            201 => Self::Created,
            202 => Self::Deleted,
            204 => Self::Changed,
            205 => Self::Content,
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            404 => Self::NotFound,
            405 => Self::NotAllowed,
            408 => Self::Timeout,
            409 => Self::Conflict,
            500 => Self::InternalError,
            _ => return None,
        })
    }

    /// Checks whether the code belongs to the `2xx` class.
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.code() < 300
    }
}

impl From<StatusCode> for u16 {
    fn from(status: StatusCode) -> Self {
        status.code()
    }
}

/// A numeric code outside the supported status set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownStatus(pub u16);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown status code {}", self.0)
    }
}

impl TryFrom<u16> for StatusCode {
    type Error = UnknownStatus;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or(UnknownStatus(code))
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "Ok",
            Self::Created => "Created",
            Self::Deleted => "Deleted",
            Self::Changed => "Changed",
            Self::Content => "Content",
            Self::BadRequest => "Bad Request",
            Self::Unauthorized => "Unauthorized",
            Self::NotFound => "Not Found",
            Self::NotAllowed => "Not Allowed",
            Self::Timeout => "Timeout",
            Self::Conflict => "Conflict",
            Self::InternalError => "Internal Error",
        };
        write!(f, "{} {name}", self.code())
    }
}
