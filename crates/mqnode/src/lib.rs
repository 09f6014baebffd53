//! The communication interface among an `mqnode` client and its manager.
//!
//! This crate provides the data exchanged over the publish/subscribe
//! transport:
//!
//! - Status codes and command identifiers of the request/response protocol
//! - Addresses of the resource tree, expressed as object, instance and
//!   resource identifiers, together with a dictionary resolving well-known
//!   aliases such as `temperature` or `sensorValue`
//! - Request, response, reply, registration and notification envelopes
//! - Report attributes controlling when an observed node is notified
//! - The topics each interface publishes and subscribes to
//!
//! A client serializes responses and notifications while a manager
//! deserializes them. A client can avoid importing the deserialization
//! functions it does not need by disabling the `deserialize` feature.
//!
//! This crate can be compiled for both `std` and `no_std` environments.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

/// Resource tree addresses.
pub mod address;
/// Report attributes of observed nodes.
pub mod attributes;
/// Command identifiers.
pub mod command;
/// Well-known objects and resources.
pub mod dictionary;
/// Protocol envelopes.
pub mod envelope;
/// Response status codes.
pub mod status;
/// Interfaces and their topics.
pub mod topic;

use serde_json::Value;

/// Checks whether a JSON value counts as set.
///
/// `null`, `false`, `0`, `NaN` and the empty string are not set,
/// any other value is.
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::is_truthy;

    #[test]
    fn truthiness() {
        assert!(is_truthy(&json!(1)));
        assert!(is_truthy(&json!("yes")));
        assert!(is_truthy(&json!({})));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!("")));
    }
}
