// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Error handling module
//!
//! Two families of errors live here:
//!
//! - [`HttpError`]: the typed HTTP error carrying a status and a structured payload.
//!   Guards, resolvers, hooks and handlers return it to short-circuit a request.
//! - [`RouteError`]: configuration errors raised while building a route. These are
//!   programmer errors and never reach a client.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use trellis_types::{Envelope, SchemaKind};

/// Typed HTTP error with a status code and a JSON payload
///
/// The payload becomes the `data` member of the response envelope. Anything that is not
/// already an `HttpError` (an [`anyhow::Error`], a serialization failure) converts into a
/// 500 whose payload is `{"error": <message>}`.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HttpError {
    status: StatusCode,
    data: Value,
    message: String,
}

impl HttpError {
    /// Create an error with an arbitrary serializable payload
    pub fn new(status: StatusCode, data: impl Serialize) -> Self {
        let data = serde_json::to_value(data)
            .unwrap_or_else(|e| json!({ "error": format!("unserializable error payload: {e}") }));
        let message = Self::describe(status, &data);
        Self {
            status,
            data,
            message,
        }
    }

    /// Create an error whose payload is `{"error": message}`
    pub fn message(status: StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            status,
            data: json!({ "error": message }),
            message,
        }
    }

    /// 400 Bad Request
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::message(StatusCode::BAD_REQUEST, message)
    }

    /// 401 Unauthorized
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::message(StatusCode::UNAUTHORIZED, message)
    }

    /// 403 Forbidden
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::message(StatusCode::FORBIDDEN, message)
    }

    /// 404 Not Found
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::message(StatusCode::NOT_FOUND, message)
    }

    /// 415 Unsupported Media Type
    pub fn unsupported_media_type(message: impl Into<String>) -> Self {
        Self::message(StatusCode::UNSUPPORTED_MEDIA_TYPE, message)
    }

    /// 500 Internal Server Error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::message(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// HTTP status of the error
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Structured payload of the error
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Convert into the `{status, data}` envelope sent to clients
    pub fn into_envelope(self) -> Envelope {
        Envelope::new(self.status.as_u16(), self.data)
    }

    fn describe(status: StatusCode, data: &Value) -> String {
        ["error", "message"]
            .iter()
            .find_map(|key| data.get(key).and_then(Value::as_str))
            .map_or_else(
                || {
                    status
                        .canonical_reason()
                        .unwrap_or("request failed")
                        .to_string()
                },
                ToString::to_string,
            )
    }
}

impl From<anyhow::Error> for HttpError {
    fn from(error: anyhow::Error) -> Self {
        // an HttpError wrapped in anyhow keeps its own status
        match error.downcast::<HttpError>() {
            Ok(http) => http,
            Err(other) => Self::internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for HttpError {
    fn from(error: serde_json::Error) -> Self {
        Self::internal(error.to_string())
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(self.into_envelope())).into_response()
    }
}

/// Route configuration errors, raised synchronously while building a route
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouteError {
    /// `build()` was called without a handler
    #[error("Handler is required")]
    MissingHandler,

    /// `build()` was called without a method or URL
    #[error("Method and URL are required")]
    MissingMethodOrUrl,

    /// A response header references a status code that was never declared
    #[error("cannot set response header {header}: status {status} was not declared with code()")]
    UndeclaredStatus {
        /// Status the header was attached to
        status: u16,
        /// Header name
        header: String,
    },

    /// Header name or value could not be parsed
    #[error("invalid header {name}: {reason}")]
    InvalidHeader {
        /// Header name as given
        name: String,
        /// Parse failure description
        reason: String,
    },

    /// Status code outside the valid HTTP range
    #[error("invalid status code {0}")]
    InvalidStatus(u16),

    /// Identified schema registered twice in the shared schema table
    #[error("schema {id} is already registered")]
    DuplicateSchema {
        /// Stable schema identifier
        id: String,
    },

    /// Same method and path registered twice
    #[error("route {method} {path} is already registered")]
    DuplicateRoute {
        /// HTTP method
        method: String,
        /// Final route path
        path: String,
    },

    /// A schema could not be compiled into a validator
    #[error("invalid {kind} schema for {path}: {reason}")]
    InvalidSchema {
        /// Which schema failed
        kind: SchemaKind,
        /// Route path
        path: String,
        /// Compiler message
        reason: String,
    },

    /// Method has no routing filter in the underlying server
    #[error("unsupported HTTP method {method}")]
    UnsupportedMethod {
        /// Method as given
        method: String,
    },
}

/// Result type for route configuration
pub type RouteResult<T> = Result<T, RouteError>;
