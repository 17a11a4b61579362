// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Handler and hook results
//!
//! A [`Reply`] is either a JSON envelope (`{status, data}`) or a raw payload sent as-is.
//! Hooks that may answer a request early return a [`Flow`].

use axum::{
    body::Bytes,
    http::{HeaderValue, StatusCode},
};
use serde::Serialize;
use serde_json::Value;
use trellis_types::Envelope;

use crate::error::HttpError;

/// Body of a reply before serialization
#[derive(Debug, Clone)]
pub(crate) enum Payload {
    /// `{status, data}` envelope; the error holds a deferred serialization failure
    Envelope(Result<Value, String>),
    /// Raw body sent with the given or the route's content type
    Raw {
        body: Bytes,
        content_type: Option<HeaderValue>,
    },
}

/// The terminal answer to one request
#[derive(Debug, Clone)]
pub struct Reply {
    status: StatusCode,
    payload: Payload,
}

impl Reply {
    /// Envelope reply with the given status and payload
    pub fn new(status: StatusCode, data: impl Serialize) -> Self {
        Self {
            status,
            payload: Payload::Envelope(serde_json::to_value(data).map_err(|e| e.to_string())),
        }
    }

    /// `200 OK` envelope reply
    pub fn ok(data: impl Serialize) -> Self {
        Self::new(StatusCode::OK, data)
    }

    /// `201 Created` envelope reply
    pub fn created(data: impl Serialize) -> Self {
        Self::new(StatusCode::CREATED, data)
    }

    /// Raw reply with status 200, sent with the route's content type (`text/html` by default)
    pub fn raw(body: impl Into<Bytes>) -> Self {
        Self {
            status: StatusCode::OK,
            payload: Payload::Raw {
                body: body.into(),
                content_type: None,
            },
        }
    }

    /// Override the status
    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Override the content type of a raw reply; ignored for envelopes
    #[must_use]
    pub fn with_content_type(mut self, content_type: HeaderValue) -> Self {
        if let Payload::Raw {
            content_type: slot, ..
        } = &mut self.payload
        {
            *slot = Some(content_type);
        }
        self
    }

    /// Status the reply will be sent with
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Whether the reply is a JSON envelope
    pub fn is_envelope(&self) -> bool {
        matches!(self.payload, Payload::Envelope(_))
    }

    /// Envelope payload, if this is an envelope that serialized successfully
    pub fn data(&self) -> Option<&Value> {
        match &self.payload {
            Payload::Envelope(Ok(data)) => Some(data),
            _ => None,
        }
    }

    pub(crate) fn into_payload(self) -> (StatusCode, Payload) {
        (self.status, self.payload)
    }
}

impl From<HttpError> for Reply {
    fn from(error: HttpError) -> Self {
        let status = error.status();
        let envelope = error.into_envelope();
        Self {
            status,
            payload: Payload::Envelope(Ok(envelope.data)),
        }
    }
}

/// Outcome of a hook that may answer the request itself
#[derive(Debug, Clone)]
pub enum Flow {
    /// Continue with the next lifecycle phase
    Continue,
    /// Stop here and send this reply
    Respond(Reply),
}

/// Conversion of handler return values into a [`Reply`]
///
/// Envelopes keep their status; scalar values take the raw path and are sent with the
/// route's configured content type.
pub trait IntoReply {
    /// Perform the conversion
    fn into_reply(self) -> Reply;
}

impl IntoReply for Reply {
    fn into_reply(self) -> Reply {
        self
    }
}

impl IntoReply for HttpError {
    fn into_reply(self) -> Reply {
        Reply::from(self)
    }
}

impl<T: Serialize> IntoReply for Envelope<T> {
    fn into_reply(self) -> Reply {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Reply::new(status, self.data)
    }
}

impl IntoReply for String {
    fn into_reply(self) -> Reply {
        Reply::raw(self)
    }
}

impl IntoReply for &'static str {
    fn into_reply(self) -> Reply {
        Reply::raw(self)
    }
}

impl IntoReply for Bytes {
    fn into_reply(self) -> Reply {
        Reply::raw(self)
    }
}

impl IntoReply for Vec<u8> {
    fn into_reply(self) -> Reply {
        Reply::raw(self)
    }
}
