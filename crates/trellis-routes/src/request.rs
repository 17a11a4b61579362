// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Per-request state shared by hooks, guards, the resolver and the handler

use std::{fmt, sync::Arc};

use axum::http::{Extensions, HeaderMap, Method, Uri};
use serde::de::DeserializeOwned;
use serde_json::Value;
use trellis_types::SchemaKind;

use crate::{error::HttpError, files::UploadFile};

/// Identity of a compiled route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    /// HTTP method
    pub method: Method,
    /// Final path, including prefix, controller and version
    pub path: String,
}

impl RouteInfo {
    /// Create a route identity
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
        }
    }
}

impl fmt::Display for RouteInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// The in-flight request as seen by lifecycle hooks
///
/// Parsed parts are held as JSON until validation; the handler receives them
/// deserialized in a [`RouteRequest`]. The resolved state lives in the extensions.
#[derive(Debug)]
pub struct RequestContext {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    route: Arc<RouteInfo>,
    params: Value,
    query: Value,
    body: Value,
    headers_value: Value,
    files: Vec<UploadFile>,
    extensions: Extensions,
}

impl RequestContext {
    pub(crate) fn new(
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        route: Arc<RouteInfo>,
        extensions: Extensions,
    ) -> Self {
        let mut extensions = extensions;
        // routes without a resolver hand the unit state to their handler
        extensions.insert(Arc::new(()));
        Self {
            method,
            uri,
            headers,
            route,
            params: Value::Null,
            query: Value::Null,
            body: Value::Null,
            headers_value: Value::Null,
            files: Vec::new(),
            extensions,
        }
    }

    /// Request method
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request URI
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Raw request headers
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// A header value as a string, if present and valid
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// The route being served
    pub fn route(&self) -> &RouteInfo {
        &self.route
    }

    /// Path parameters
    pub fn params(&self) -> &Value {
        &self.params
    }

    /// Query string
    pub fn query(&self) -> &Value {
        &self.query
    }

    /// Request body
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Mutable request body
    pub fn body_mut(&mut self) -> &mut Value {
        &mut self.body
    }

    /// Staged uploads
    pub fn files(&self) -> &[UploadFile] {
        &self.files
    }

    /// Mutable staged uploads
    pub fn files_mut(&mut self) -> &mut Vec<UploadFile> {
        &mut self.files
    }

    pub(crate) fn body_and_files_mut(&mut self) -> (&mut Value, &mut Vec<UploadFile>) {
        (&mut self.body, &mut self.files)
    }

    /// Parsed value of one request part
    pub fn value_of(&self, kind: SchemaKind) -> &Value {
        match kind {
            SchemaKind::Params => &self.params,
            SchemaKind::Query => &self.query,
            SchemaKind::Headers => &self.headers_value,
            SchemaKind::Body | SchemaKind::Response => &self.body,
        }
    }

    /// Replace the parsed value of one request part
    pub fn set_value(&mut self, kind: SchemaKind, value: Value) {
        match kind {
            SchemaKind::Params => self.params = value,
            SchemaKind::Query => self.query = value,
            SchemaKind::Headers => self.headers_value = value,
            SchemaKind::Body | SchemaKind::Response => self.body = value,
        }
    }

    /// State computed by the route's resolver
    pub fn resolved<R: Send + Sync + 'static>(&self) -> Option<Arc<R>> {
        self.extensions.get::<Arc<R>>().cloned()
    }

    /// Request extensions
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Mutable request extensions
    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}

/// Which request parts declared a schema and reach the handler typed
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Declared {
    pub params: bool,
    pub query: bool,
    pub body: bool,
    pub headers: bool,
}

impl Declared {
    pub(crate) fn set(&mut self, kind: SchemaKind) {
        match kind {
            SchemaKind::Params => self.params = true,
            SchemaKind::Query => self.query = true,
            SchemaKind::Body => self.body = true,
            SchemaKind::Headers => self.headers = true,
            SchemaKind::Response => {}
        }
    }
}

/// Request handed to a route handler, typed by the builder's declarations
///
/// Undeclared parts arrive as `()`. `state` is the resolver's output, or `()` when the
/// route has no resolver.
pub struct RouteRequest<S, P = (), Q = (), B = (), H = (), R = ()> {
    /// Application state
    pub app: S,
    /// Path parameters
    pub params: P,
    /// Query string
    pub query: Q,
    /// Request body
    pub body: B,
    /// Request headers, as declared
    pub headers: H,
    /// Resolved request state
    pub state: Arc<R>,
    /// Staged or persisted uploads
    pub files: Vec<UploadFile>,
    /// Request method
    pub method: Method,
    /// Request URI
    pub uri: Uri,
    /// Raw request headers
    pub raw_headers: HeaderMap,
    /// Request extensions
    pub extensions: Extensions,
}

fn typed<T: DeserializeOwned>(declared: bool, value: &Value, kind: SchemaKind) -> Result<T, HttpError> {
    let value = if declared { value.clone() } else { Value::Null };
    serde_json::from_value(value)
        .map_err(|e| HttpError::bad_request(format!("invalid {kind}: {e}")))
}

impl<S, P, Q, B, H, R> RouteRequest<S, P, Q, B, H, R>
where
    P: DeserializeOwned,
    Q: DeserializeOwned,
    B: DeserializeOwned,
    H: DeserializeOwned,
    R: Send + Sync + 'static,
{
    pub(crate) fn extract(
        app: S,
        ctx: &RequestContext,
        declared: Declared,
    ) -> Result<Self, HttpError> {
        let state = ctx
            .resolved::<R>()
            .ok_or_else(|| HttpError::internal("resolved request state is missing"))?;
        Ok(Self {
            app,
            params: typed(declared.params, &ctx.params, SchemaKind::Params)?,
            query: typed(declared.query, &ctx.query, SchemaKind::Query)?,
            body: typed(declared.body, &ctx.body, SchemaKind::Body)?,
            headers: typed(declared.headers, &ctx.headers_value, SchemaKind::Headers)?,
            state,
            files: ctx.files.clone(),
            method: ctx.method.clone(),
            uri: ctx.uri.clone(),
            raw_headers: ctx.headers.clone(),
            extensions: ctx.extensions.clone(),
        })
    }
}

impl<S, P, Q, B, H, R> fmt::Debug for RouteRequest<S, P, Q, B, H, R>
where
    P: fmt::Debug,
    Q: fmt::Debug,
    B: fmt::Debug,
    H: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteRequest")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("params", &self.params)
            .field("query", &self.query)
            .field("body", &self.body)
            .field("headers", &self.headers)
            .field("files", &self.files)
            .finish_non_exhaustive()
    }
}
