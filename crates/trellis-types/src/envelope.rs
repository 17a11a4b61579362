// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Response envelope type
//!
//! Every JSON response produced by a compiled route, success or failure, is wrapped in
//! the same `{ "status": <int>, "data": <payload> }` shape.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// The `{status, data}` wrapper sent to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T = Value> {
    /// HTTP status code, mirrored in the body
    pub status: u16,
    /// Response payload
    pub data: T,
}

impl<T> Envelope<T> {
    /// Create a new envelope
    pub fn new(status: u16, data: T) -> Self {
        Self { status, data }
    }

    /// Returns whether the mirrored status is in the 2xx range
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl Envelope<Value> {
    /// Envelope for an error message: `{status, data: {error: message}}`
    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            data: json!({ "error": message.into() }),
        }
    }

    /// Default envelope for an uncaught failure
    pub fn internal(message: impl Into<String>) -> Self {
        Self::error(500, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serialization_shape() {
        let envelope = Envelope::new(201, json!({ "id": 7 }));
        let serialized = serde_json::to_value(&envelope).unwrap();
        assert_eq!(serialized, json!({ "status": 201, "data": { "id": 7 } }));
    }

    #[test]
    fn internal_envelope_shape() {
        let envelope = Envelope::internal("boom");
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({ "status": 500, "data": { "error": "boom" } })
        );
        assert!(!envelope.is_success());
    }

    #[test]
    fn typed_envelope_deserialization() {
        let envelope: Envelope<Vec<u32>> =
            serde_json::from_str(r#"{"status":200,"data":[1,2,3]}"#).unwrap();
        assert!(envelope.is_success());
        assert_eq!(envelope.data, vec![1, 2, 3]);
    }
}
