// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Lifecycle hook slots
//!
//! Each slot holds at most one function. Registering a hook twice replaces the earlier
//! one; hooks are never composed.

use std::{fmt, sync::Arc};

use axum::{
    body::Bytes,
    http::{StatusCode, response::Parts},
    response::Response,
};
use futures::future::BoxFuture;
use serde_json::Value;

use crate::{error::HttpError, reply::Flow, request::RequestContext};

/// Runs first; may answer the request
pub type RequestHook =
    Arc<dyn for<'r> Fn(&'r mut RequestContext) -> BoxFuture<'r, Result<Flow, HttpError>> + Send + Sync>;

/// Sees the raw body before parsing; may replace it
pub type ParsingHook =
    Arc<dyn for<'r> Fn(&'r RequestContext, Bytes) -> BoxFuture<'r, Result<Bytes, HttpError>> + Send + Sync>;

/// Sees an envelope payload before it is serialized; may replace it
pub type SerializationHook = Arc<
    dyn for<'r> Fn(&'r RequestContext, StatusCode, Value) -> BoxFuture<'r, Result<Value, HttpError>>
        + Send
        + Sync,
>;

/// May mutate the response before it is sent
pub type SendHook =
    Arc<dyn for<'r> Fn(&'r RequestContext, &'r mut Response) -> BoxFuture<'r, ()> + Send + Sync>;

/// Observes the response head after it was produced
pub type ResponseHook =
    Arc<dyn for<'r> Fn(&'r RequestContext, &'r Parts) -> BoxFuture<'r, ()> + Send + Sync>;

/// Observes transport-level errors
pub type ErrorHook =
    Arc<dyn for<'r> Fn(&'r RequestContext, &'r HttpError) -> BoxFuture<'r, ()> + Send + Sync>;

/// Replaces the default error to response translation
pub type ErrorHandler =
    Arc<dyn for<'r> Fn(&'r RequestContext, HttpError) -> BoxFuture<'r, Response> + Send + Sync>;

/// The hook slots of one route
#[derive(Clone, Default)]
pub struct HookSlots {
    pub(crate) on_request: Option<RequestHook>,
    pub(crate) pre_parsing: Option<ParsingHook>,
    pub(crate) pre_validation: Option<RequestHook>,
    pub(crate) pre_serialization: Option<SerializationHook>,
    pub(crate) on_send: Option<SendHook>,
    pub(crate) on_response: Option<ResponseHook>,
    pub(crate) on_error: Option<ErrorHook>,
    pub(crate) error_handler: Option<ErrorHandler>,
}

impl fmt::Debug for HookSlots {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookSlots")
            .field("on_request", &self.on_request.is_some())
            .field("pre_parsing", &self.pre_parsing.is_some())
            .field("pre_validation", &self.pre_validation.is_some())
            .field("pre_serialization", &self.pre_serialization.is_some())
            .field("on_send", &self.on_send.is_some())
            .field("on_response", &self.on_response.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("error_handler", &self.error_handler.is_some())
            .finish()
    }
}
