// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Compiled request lifecycle
//!
//! Phases run in a fixed order for every request:
//!
//! 1. `onRequest`
//! 2. body read, `preParsing`, parse
//! 3. `preValidation`, upload policy, persistence, schema validation
//! 4. resolver, guards and pre-handlers
//! 5. handler
//! 6. `preSerialization` and rendering
//! 7. `onSend`, `onResponse`
//!
//! Failures raised by the transport phases or the handler go through `onError` and the
//! route's error handler. Short-circuit replies from hooks, the upload policy or the
//! pre-handler chain are rendered like any other reply. Exactly one response is produced.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
};

use axum::{
    Json, RequestExt,
    body::{Body, Bytes, to_bytes},
    extract::{RawPathParams, Request},
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tracing::{error, info};
use trellis_types::{Envelope, SchemaKind};

use crate::{
    body::{headers_value, parse_body, parse_query},
    error::HttpError,
    files::{FilePersister, FilePolicy, describe_in_body, persist_all, rewrite_body},
    guard::{PreHandler, run_chain},
    hooks::HookSlots,
    reply::{Flow, Payload, Reply},
    request::{Declared, RequestContext, RouteInfo},
    schema::CompiledSchema,
    sniff::ContentSniffer,
};

/// Scalar replies are sent as HTML unless the route sets a content type
pub const DEFAULT_SCALAR_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Handler future, already detached from the request context
pub(crate) type PendingReply = BoxFuture<'static, Result<Reply, HttpError>>;

/// Type-erased handler: extracts the typed request and starts the user's future
pub(crate) type ErasedHandler<S> = Arc<
    dyn Fn(S, &RequestContext, Declared) -> Result<PendingReply, HttpError> + Send + Sync,
>;

/// Why the lifecycle stopped before the handler produced a reply
enum Halt {
    /// Answer with this reply
    Reply(Reply),
    /// Transport-level failure, translated by the error handler
    Fault(HttpError),
}

impl From<HttpError> for Halt {
    fn from(error: HttpError) -> Self {
        Self::Fault(error)
    }
}

pub(crate) struct CompiledRoute<S> {
    pub(crate) info: Arc<RouteInfo>,
    pub(crate) validators: Vec<CompiledSchema>,
    pub(crate) declared: Declared,
    pub(crate) chain: Vec<PreHandler>,
    pub(crate) handler: ErasedHandler<S>,
    pub(crate) hooks: HookSlots,
    pub(crate) file_policy: FilePolicy,
    pub(crate) accepts_multipart: bool,
    pub(crate) persister: Option<Arc<dyn FilePersister>>,
    pub(crate) sniffer: Arc<dyn ContentSniffer>,
    pub(crate) declared_statuses: BTreeSet<u16>,
    pub(crate) response_headers: BTreeMap<u16, HeaderMap>,
    pub(crate) content_type: Option<HeaderValue>,
    pub(crate) cache_control: Option<HeaderValue>,
    pub(crate) body_limit: usize,
}

impl<S> fmt::Debug for CompiledRoute<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledRoute")
            .field("info", &self.info)
            .field("validators", &self.validators)
            .field("chain", &self.chain.len())
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl<S> CompiledRoute<S>
where
    S: Send + 'static,
{
    /// Serve one request
    pub(crate) async fn serve(&self, app: S, mut request: Request) -> Response {
        let params = match request.extract_parts::<RawPathParams>().await {
            Ok(raw) => Value::Object(
                raw.iter()
                    .map(|(key, value)| (key.to_string(), Value::String(value.to_string())))
                    .collect::<Map<_, _>>(),
            ),
            Err(_) => Value::Object(Map::new()),
        };
        let (parts, body) = request.into_parts();
        let query = parse_query(parts.uri.query());
        let headers = headers_value(&parts.headers);

        let mut ctx = RequestContext::new(
            parts.method,
            parts.uri,
            parts.headers,
            Arc::clone(&self.info),
            parts.extensions,
        );
        ctx.set_value(SchemaKind::Params, params);
        ctx.set_value(SchemaKind::Query, query);
        ctx.set_value(SchemaKind::Headers, headers);

        let response = match self.process(app, &mut ctx, body).await {
            Ok(reply) | Err(Halt::Reply(reply)) => match self.render(&ctx, reply).await {
                Ok(response) => response,
                Err(error) => self.fail(&ctx, error).await,
            },
            Err(Halt::Fault(error)) => self.fail(&ctx, error).await,
        };
        self.finish(&ctx, response).await
    }

    async fn process(&self, app: S, ctx: &mut RequestContext, body: Body) -> Result<Reply, Halt> {
        if let Some(hook) = &self.hooks.on_request
            && let Flow::Respond(reply) = hook(&mut *ctx).await?
        {
            return Err(Halt::Reply(reply));
        }

        let bytes = self.read_body(ctx, body).await?;
        let bytes = match &self.hooks.pre_parsing {
            Some(hook) => hook(&*ctx, bytes).await?,
            None => bytes,
        };
        let parsed = parse_body(ctx.headers(), ctx.extensions(), bytes, self.accepts_multipart).await?;
        {
            let (body, files) = ctx.body_and_files_mut();
            *body = parsed.value;
            *files = parsed.files;
            if !files.is_empty() && self.persister.is_none() {
                describe_in_body(body, files, &parsed.array_fields);
            }
        }

        if let Some(hook) = &self.hooks.pre_validation
            && let Flow::Respond(reply) = hook(&mut *ctx).await?
        {
            return Err(Halt::Reply(reply));
        }

        if !ctx.files().is_empty() {
            if let Err(violations) = self.file_policy.check(ctx.files(), self.sniffer.as_ref()) {
                info!(
                    route = %self.info,
                    violations = violations.0.len(),
                    "upload policy rejected request"
                );
                return Err(Halt::Reply(violations.into_error().into()));
            }
            if let Some(persister) = &self.persister {
                let staged = std::mem::take(ctx.files_mut());
                let persisted = persist_all(staged, persister.as_ref(), &self.info).await;
                let (body, files) = ctx.body_and_files_mut();
                rewrite_body(body, &persisted, &parsed.array_fields);
                *files = persisted;
            }
        }

        for validator in &self.validators {
            let kind = validator.kind();
            let value = ctx.value_of(kind).clone();
            ctx.set_value(kind, validator.prepare(value)?);
        }

        if let Err(rejection) = run_chain(&self.chain, ctx).await {
            return Err(Halt::Reply(rejection.into()));
        }

        let pending = (self.handler)(app, ctx, self.declared)?;
        let reply = pending.await.map_err(|error| {
            if error.status().is_server_error() {
                error!(route = %self.info, error = %error, "handler failed");
            }
            Halt::Fault(error)
        })?;

        if reply.is_envelope()
            && !self.declared_statuses.is_empty()
            && !self.declared_statuses.contains(&reply.status().as_u16())
        {
            error!(
                route = %self.info,
                status = reply.status().as_u16(),
                "handler replied with an undeclared status"
            );
            return Err(Halt::Fault(HttpError::internal(format!(
                "response status {} is not declared for this route",
                reply.status().as_u16()
            ))));
        }
        Ok(reply)
    }

    async fn read_body(&self, ctx: &RequestContext, body: Body) -> Result<Bytes, HttpError> {
        let declared_length = ctx
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<usize>().ok());
        if declared_length.is_some_and(|length| length > self.body_limit) {
            return Err(too_large(self.body_limit));
        }
        to_bytes(body, self.body_limit)
            .await
            .map_err(|_| too_large(self.body_limit))
    }

    async fn render(&self, ctx: &RequestContext, reply: Reply) -> Result<Response, HttpError> {
        let (status, payload) = reply.into_payload();
        let mut response = match payload {
            Payload::Envelope(data) => {
                let data = data.map_err(HttpError::internal)?;
                let data = match &self.hooks.pre_serialization {
                    Some(hook) => hook(ctx, status, data).await?,
                    None => data,
                };
                (status, Json(Envelope::new(status.as_u16(), data))).into_response()
            }
            Payload::Raw { body, content_type } => {
                let content_type = content_type
                    .or_else(|| self.content_type.clone())
                    .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_SCALAR_CONTENT_TYPE));
                let mut response = (status, body).into_response();
                response.headers_mut().insert(CONTENT_TYPE, content_type);
                response
            }
        };

        self.declared_headers(&mut response);
        if status.is_success()
            && let Some(cache_control) = &self.cache_control
        {
            response
                .headers_mut()
                .entry(CACHE_CONTROL)
                .or_insert_with(|| cache_control.clone());
        }
        Ok(response)
    }

    async fn fail(&self, ctx: &RequestContext, error: HttpError) -> Response {
        if let Some(hook) = &self.hooks.on_error {
            hook(ctx, &error).await;
        }
        match &self.hooks.error_handler {
            Some(handler) => handler(ctx, error).await,
            None => {
                let mut response = error.into_response();
                self.declared_headers(&mut response);
                response
            }
        }
    }

    /// Headers declared with `response_header` for the response's status
    fn declared_headers(&self, response: &mut Response) {
        if let Some(headers) = self.response_headers.get(&response.status().as_u16()) {
            for (name, value) in headers {
                response.headers_mut().insert(name.clone(), value.clone());
            }
        }
    }

    async fn finish(&self, ctx: &RequestContext, mut response: Response) -> Response {
        if let Some(hook) = &self.hooks.on_send {
            hook(ctx, &mut response).await;
        }
        if let Some(hook) = &self.hooks.on_response {
            let (parts, body) = response.into_parts();
            hook(ctx, &parts).await;
            response = Response::from_parts(parts, body);
        }
        response
    }
}

fn too_large(limit: usize) -> HttpError {
    HttpError::message(
        StatusCode::PAYLOAD_TOO_LARGE,
        format!("request body exceeds {limit} bytes"),
    )
}
