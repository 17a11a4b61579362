// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Fluent route builder
//!
//! A [`RouteBuilder`] accumulates the configuration of one route and compiles it into a
//! single registration on the application router. The builder is type-state: declaring
//! params, query, body, headers or a resolver changes the type the handler receives.
//!
//! ```ignore
//! app.route()
//!     .post("/widgets")
//!     .body(Schema::<WidgetCreate>::of())
//!     .code(201, Schema::<Widget>::of())
//!     .handler(|request| async move {
//!         Ok::<_, HttpError>(Reply::created(Widget::from(request.body)))
//!     })
//!     .build()?;
//! ```

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    future::Future,
    marker::PhantomData,
    sync::Arc,
};

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    routing::{MethodFilter, MethodRouter, on},
};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};
use trellis_types::{SchemaKind, SecurityKind};
use utoipa::openapi::{
    RefOr, Schema as OpenApiSchema,
    schema::{ObjectBuilder, Type},
};

use crate::{
    body::MULTIPART_FORM_DATA,
    context::AppContext,
    error::{HttpError, RouteError, RouteResult},
    files::{FileOptions, FilePolicy},
    guard::{Guard, PreHandler, guard_step, resolver_step},
    hooks::HookSlots,
    lifecycle::{CompiledRoute, ErasedHandler, PendingReply},
    registry::{MetaEntry, MetaRouteEntry, RouteDocs},
    reply::{Flow, IntoReply},
    request::{Declared, RequestContext, RouteInfo, RouteRequest},
    schema::{CompiledSchema, SchemaDef, SchemaTable},
};

type RouteOptions<S> = Box<dyn FnOnce(MethodRouter<S>) -> MethodRouter<S> + Send>;

/// Accumulated configuration of one route
pub struct RouteConfig<S> {
    method: Option<Method>,
    url: Option<String>,
    prefix: Option<String>,
    controller: Option<String>,
    version: Option<String>,
    request_schemas: Vec<(SchemaKind, SchemaDef)>,
    responses: BTreeMap<u16, SchemaDef>,
    declared: Declared,
    guards: Vec<Guard>,
    pre_handlers: Vec<PreHandler>,
    resolver: Option<PreHandler>,
    handler: Option<ErasedHandler<S>>,
    hooks: HookSlots,
    response_headers: BTreeMap<u16, HeaderMap>,
    content_type: Option<HeaderValue>,
    cache_control: Option<HeaderValue>,
    file_policy: FilePolicy,
    docs: RouteDocs,
    route_options: Option<RouteOptions<S>>,
    meta: Vec<MetaEntry>,
    deferred: Vec<RouteError>,
}

impl<S> Default for RouteConfig<S> {
    fn default() -> Self {
        Self {
            method: None,
            url: None,
            prefix: None,
            controller: None,
            version: None,
            request_schemas: Vec::new(),
            responses: BTreeMap::new(),
            declared: Declared::default(),
            guards: Vec::new(),
            pre_handlers: Vec::new(),
            resolver: None,
            handler: None,
            hooks: HookSlots::default(),
            response_headers: BTreeMap::new(),
            content_type: None,
            cache_control: None,
            file_policy: FilePolicy::default(),
            docs: RouteDocs::default(),
            route_options: None,
            meta: Vec::new(),
            deferred: Vec::new(),
        }
    }
}

impl<S> fmt::Debug for RouteConfig<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteConfig")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("prefix", &self.prefix)
            .field("controller", &self.controller)
            .field("version", &self.version)
            .field("responses", &self.responses.keys().collect::<Vec<_>>())
            .field("guards", &self.guards.len())
            .field("pre_handlers", &self.pre_handlers.len())
            .field("resolver", &self.resolver.is_some())
            .field("handler", &self.handler.is_some())
            .field("hooks", &self.hooks)
            .field("file_policy", &self.file_policy)
            .finish_non_exhaustive()
    }
}

impl<S> RouteConfig<S> {
    fn declare(&mut self, kind: SchemaKind, def: SchemaDef) {
        self.meta.retain(|entry| entry.kind != kind);
        self.meta.push(MetaEntry {
            kind,
            id: def.id().map(ToString::to_string),
            schema: def.route_schema(),
            status: None,
        });
        self.request_schemas.retain(|(declared, _)| *declared != kind);
        self.request_schemas.push((kind, def));
        self.declared.set(kind);
    }

    fn declare_response(&mut self, status: u16, def: SchemaDef) {
        if StatusCode::from_u16(status).is_err() {
            self.deferred.push(RouteError::InvalidStatus(status));
            return;
        }
        self.meta
            .retain(|entry| !(entry.kind == SchemaKind::Response && entry.status == Some(status)));
        self.meta.push(MetaEntry {
            kind: SchemaKind::Response,
            id: def.id().map(ToString::to_string),
            schema: envelope_schema(status, def.route_schema()),
            status: Some(status),
        });
        self.responses.insert(status, def);
    }
}

/// `{status: <status>, data: <schema>}`
fn envelope_schema(status: u16, data: RefOr<OpenApiSchema>) -> RefOr<OpenApiSchema> {
    let envelope = ObjectBuilder::new()
        .property(
            "status",
            ObjectBuilder::new()
                .schema_type(Type::Integer)
                .enum_values(Some([status])),
        )
        .required("status")
        .property("data", data)
        .required("data")
        .build();
    RefOr::T(OpenApiSchema::Object(envelope))
}

/// Join the non-empty path segments under `/`
///
/// Each raw segment is stripped of leading and trailing slashes; the version is mounted
/// as `v{version}`. `:name` segments are rewritten to the router's `{name}` form.
pub fn compose_path(prefix: &str, controller: Option<&str>, version: Option<&str>, url: &str) -> String {
    let version = version.map(|version| format!("v{}", version.trim_matches('/')));
    let mut path = String::from("/");
    for segment in [Some(prefix), controller, version.as_deref(), Some(url)]
        .into_iter()
        .flatten()
    {
        let trimmed = segment.trim_matches('/');
        if !trimmed.is_empty() {
            path.push_str(trimmed);
            path.push('/');
        }
    }
    if path.len() > 1 {
        path.pop();
    }
    path.split('/')
        .map(|segment| match segment.strip_prefix(':') {
            Some(name) if !name.is_empty() => format!("{{{name}}}"),
            _ => segment.to_string(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Fluent, type-state route builder scoped to an [`AppContext`]
///
/// `P`, `Q`, `B` and `H` are the types params, query, body and headers deserialize into;
/// `R` is the resolver's output. All default to `()`.
pub struct RouteBuilder<'a, S, P = (), Q = (), B = (), H = (), R = ()> {
    app: &'a mut AppContext<S>,
    config: RouteConfig<S>,
    _types: PhantomData<fn() -> (P, Q, B, H, R)>,
}

impl<S, P, Q, B, H, R> fmt::Debug for RouteBuilder<'_, S, P, Q, B, H, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<'a, S> RouteBuilder<'a, S> {
    pub(crate) fn new(app: &'a mut AppContext<S>) -> Self {
        Self {
            app,
            config: RouteConfig::default(),
            _types: PhantomData,
        }
    }
}

impl<'a, S, P, Q, B, H, R> RouteBuilder<'a, S, P, Q, B, H, R>
where
    S: Clone + Send + Sync + 'static,
{
    fn narrow<P2, Q2, B2, H2, R2>(mut self, declaration: &str) -> RouteBuilder<'a, S, P2, Q2, B2, H2, R2> {
        if self.config.handler.take().is_some() {
            warn!(
                declaration,
                "handler discarded: typed declarations must come before handler()"
            );
        }
        RouteBuilder {
            app: self.app,
            config: self.config,
            _types: PhantomData,
        }
    }

    /// Set the HTTP method
    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.config.method = Some(method);
        self
    }

    /// Set the URL suffix
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.url = Some(url.into());
        self
    }

    fn with(self, method: Method, url: impl Into<String>) -> Self {
        self.method(method).url(url)
    }

    /// `GET` on `url`
    #[must_use]
    pub fn get(self, url: impl Into<String>) -> Self {
        self.with(Method::GET, url)
    }

    /// `POST` on `url`
    #[must_use]
    pub fn post(self, url: impl Into<String>) -> Self {
        self.with(Method::POST, url)
    }

    /// `PUT` on `url`
    #[must_use]
    pub fn put(self, url: impl Into<String>) -> Self {
        self.with(Method::PUT, url)
    }

    /// `DELETE` on `url`
    #[must_use]
    pub fn delete(self, url: impl Into<String>) -> Self {
        self.with(Method::DELETE, url)
    }

    /// `PATCH` on `url`
    #[must_use]
    pub fn patch(self, url: impl Into<String>) -> Self {
        self.with(Method::PATCH, url)
    }

    /// `OPTIONS` on `url`
    #[must_use]
    pub fn options(self, url: impl Into<String>) -> Self {
        self.with(Method::OPTIONS, url)
    }

    /// Override the application's path prefix; an empty prefix mounts at the root
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.prefix = Some(prefix.into());
        self
    }

    /// Controller segment mounted after the prefix
    #[must_use]
    pub fn controller(mut self, controller: impl Into<String>) -> Self {
        self.config.controller = Some(controller.into());
        self
    }

    /// Version segment, mounted as `v{version}`
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.config.version = Some(version.into());
        self
    }

    /// Declare the path parameters
    pub fn params<T>(mut self, schema: crate::Schema<T>) -> RouteBuilder<'a, S, T, Q, B, H, R> {
        self.config.declare(SchemaKind::Params, schema.into());
        self.narrow("params")
    }

    /// Declare the query string
    pub fn query<T>(mut self, schema: crate::Schema<T>) -> RouteBuilder<'a, S, P, T, B, H, R> {
        self.config.declare(SchemaKind::Query, schema.into());
        self.narrow("query")
    }

    /// Declare the request body
    pub fn body<T>(mut self, schema: crate::Schema<T>) -> RouteBuilder<'a, S, P, Q, T, H, R> {
        self.config.declare(SchemaKind::Body, schema.into());
        self.narrow("body")
    }

    /// Declare the request headers
    pub fn headers<T>(mut self, schema: crate::Schema<T>) -> RouteBuilder<'a, S, P, Q, B, T, R> {
        self.config.declare(SchemaKind::Headers, schema.into());
        self.narrow("headers")
    }

    /// Declare the payload sent with `status`, wrapped in the `{status, data}` envelope
    #[must_use]
    pub fn code<T>(mut self, status: u16, schema: crate::Schema<T>) -> Self {
        self.config.declare_response(status, schema.into());
        self
    }

    /// Declare several response payloads at once
    #[must_use]
    pub fn codes<I>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = (u16, SchemaDef)>,
    {
        for (status, def) in codes {
            self.config.declare_response(status, def);
        }
        self
    }

    /// Append a guard; guards run in registration order after the resolver
    #[must_use]
    pub fn guard<F>(mut self, check: F) -> Self
    where
        F: for<'r> Fn(&'r RequestContext) -> BoxFuture<'r, Result<(), HttpError>>
            + Send
            + Sync
            + 'static,
    {
        self.config.guards.push(Arc::new(check));
        self
    }

    /// Declare a security requirement for documentation
    #[must_use]
    pub fn auth(mut self, kind: SecurityKind) -> Self {
        if !self.config.docs.security.contains(&kind) {
            self.config.docs.security.push(kind);
        }
        self
    }

    /// Declare a security requirement and enforce it with a guard
    #[must_use]
    pub fn auth_with<F>(self, kind: SecurityKind, check: F) -> Self
    where
        F: for<'r> Fn(&'r RequestContext) -> BoxFuture<'r, Result<(), HttpError>>
            + Send
            + Sync
            + 'static,
    {
        self.auth(kind).guard(check)
    }

    /// Compute per-request state; the last resolver registered wins
    pub fn resolve<T, F>(mut self, resolver: F) -> RouteBuilder<'a, S, P, Q, B, H, T>
    where
        T: Send + Sync + 'static,
        F: for<'r> Fn(&'r RequestContext) -> BoxFuture<'r, Result<T, HttpError>>
            + Send
            + Sync
            + 'static,
    {
        self.config.resolver = Some(resolver_step(resolver));
        self.narrow("resolve")
    }

    /// Append a step run after the guards and before the handler
    #[must_use]
    pub fn pre_handler<F>(mut self, step: F) -> Self
    where
        F: for<'r> Fn(&'r mut RequestContext) -> BoxFuture<'r, Result<(), HttpError>>
            + Send
            + Sync
            + 'static,
    {
        self.config.pre_handlers.push(Arc::new(step));
        self
    }

    /// First lifecycle hook; may answer the request
    #[must_use]
    pub fn on_request<F>(mut self, hook: F) -> Self
    where
        F: for<'r> Fn(&'r mut RequestContext) -> BoxFuture<'r, Result<Flow, HttpError>>
            + Send
            + Sync
            + 'static,
    {
        self.config.hooks.on_request = Some(Arc::new(hook));
        self
    }

    /// Rewrite the raw body before it is parsed
    #[must_use]
    pub fn pre_parsing<F>(mut self, hook: F) -> Self
    where
        F: for<'r> Fn(&'r RequestContext, axum::body::Bytes) -> BoxFuture<'r, Result<axum::body::Bytes, HttpError>>
            + Send
            + Sync
            + 'static,
    {
        self.config.hooks.pre_parsing = Some(Arc::new(hook));
        self
    }

    /// Runs after parsing, before the upload policy and validation; may answer the request
    #[must_use]
    pub fn pre_validation<F>(mut self, hook: F) -> Self
    where
        F: for<'r> Fn(&'r mut RequestContext) -> BoxFuture<'r, Result<Flow, HttpError>>
            + Send
            + Sync
            + 'static,
    {
        self.config.hooks.pre_validation = Some(Arc::new(hook));
        self
    }

    /// Rewrite an envelope payload before it is serialized
    #[must_use]
    pub fn pre_serialization<F>(mut self, hook: F) -> Self
    where
        F: for<'r> Fn(&'r RequestContext, StatusCode, Value) -> BoxFuture<'r, Result<Value, HttpError>>
            + Send
            + Sync
            + 'static,
    {
        self.config.hooks.pre_serialization = Some(Arc::new(hook));
        self
    }

    /// Mutate the final response
    #[must_use]
    pub fn on_send<F>(mut self, hook: F) -> Self
    where
        F: for<'r> Fn(&'r RequestContext, &'r mut axum::response::Response) -> BoxFuture<'r, ()>
            + Send
            + Sync
            + 'static,
    {
        self.config.hooks.on_send = Some(Arc::new(hook));
        self
    }

    /// Observe the response head
    #[must_use]
    pub fn on_response<F>(mut self, hook: F) -> Self
    where
        F: for<'r> Fn(&'r RequestContext, &'r axum::http::response::Parts) -> BoxFuture<'r, ()>
            + Send
            + Sync
            + 'static,
    {
        self.config.hooks.on_response = Some(Arc::new(hook));
        self
    }

    /// Observe transport-level errors
    #[must_use]
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: for<'r> Fn(&'r RequestContext, &'r HttpError) -> BoxFuture<'r, ()> + Send + Sync + 'static,
    {
        self.config.hooks.on_error = Some(Arc::new(hook));
        self
    }

    /// Replace the default error to response translation
    #[must_use]
    pub fn set_error_handler<F>(mut self, handler: F) -> Self
    where
        F: for<'r> Fn(&'r RequestContext, HttpError) -> BoxFuture<'r, axum::response::Response>
            + Send
            + Sync
            + 'static,
    {
        self.config.hooks.error_handler = Some(Arc::new(handler));
        self
    }

    /// Upload constraints for `field`, or for every field when `None`
    ///
    /// Declaring a policy makes the route accept `multipart/form-data`.
    #[must_use]
    pub fn file_options(mut self, options: FileOptions, field: Option<&str>) -> Self {
        self.config.file_policy.set(field, options);
        if !consumes_multipart(&self.config.docs) {
            self.config.docs.consumes.push(MULTIPART_FORM_DATA.to_string());
        }
        self
    }

    /// Send a header with every response of a declared status
    pub fn response_header(mut self, status: u16, name: &str, value: &str) -> RouteResult<Self> {
        if !self.config.responses.contains_key(&status) {
            return Err(RouteError::UndeclaredStatus {
                status,
                header: name.to_string(),
            });
        }
        let invalid = |reason: String| RouteError::InvalidHeader {
            name: name.to_string(),
            reason,
        };
        let header = HeaderName::try_from(name).map_err(|e| invalid(e.to_string()))?;
        let value = HeaderValue::try_from(value).map_err(|e| invalid(e.to_string()))?;
        self.config
            .docs
            .response_headers
            .entry(status)
            .or_default()
            .push(header.as_str().to_string());
        self.config
            .response_headers
            .entry(status)
            .or_default()
            .insert(header, value);
        Ok(self)
    }

    /// `Cache-Control` sent with successful responses
    #[must_use]
    pub fn cache_control(mut self, value: &str) -> Self {
        match HeaderValue::try_from(value) {
            Ok(value) => self.config.cache_control = Some(value),
            Err(e) => self.config.deferred.push(RouteError::InvalidHeader {
                name: "cache-control".to_string(),
                reason: e.to_string(),
            }),
        }
        self
    }

    /// Content type of scalar replies (default `text/html`)
    #[must_use]
    pub fn content_type(mut self, value: &str) -> Self {
        match HeaderValue::try_from(value) {
            Ok(header) => {
                self.config.content_type = Some(header);
                self.config.docs.content_type = Some(value.to_string());
            }
            Err(e) => self.config.deferred.push(RouteError::InvalidHeader {
                name: "content-type".to_string(),
                reason: e.to_string(),
            }),
        }
        self
    }

    /// Accepted request content types
    #[must_use]
    pub fn consumes<I, T>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.config.docs.consumes = types.into_iter().map(Into::into).collect();
        // a declared upload policy keeps multipart reachable
        if !self.config.file_policy.is_empty() && !consumes_multipart(&self.config.docs) {
            self.config.docs.consumes.push(MULTIPART_FORM_DATA.to_string());
        }
        self
    }

    /// Documentation tags
    #[must_use]
    pub fn tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.config.docs.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Documentation summary
    #[must_use]
    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.config.docs.summary = Some(summary.into());
        self
    }

    /// Documentation description
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.config.docs.description = Some(description.into());
        self
    }

    /// Mark the route deprecated in the documentation
    #[must_use]
    pub fn deprecated(mut self) -> Self {
        self.config.docs.deprecated = true;
        self
    }

    /// Explicit OpenAPI operation id
    #[must_use]
    pub fn operation_id(mut self, id: impl Into<String>) -> Self {
        self.config.docs.operation_id = Some(id.into());
        self
    }

    /// Transform the method router before registration, e.g. to add tower layers
    #[must_use]
    pub fn route_options<F>(mut self, transform: F) -> Self
    where
        F: FnOnce(MethodRouter<S>) -> MethodRouter<S> + Send + 'static,
    {
        self.config.route_options = Some(Box::new(transform));
        self
    }

    /// Set the handler
    ///
    /// Must come after every params, query, body, headers and resolve declaration.
    #[must_use]
    pub fn handler<F, Fut, T, E>(mut self, handler: F) -> Self
    where
        F: Fn(RouteRequest<S, P, Q, B, H, R>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: IntoReply + Send + 'static,
        E: Into<HttpError> + Send + 'static,
        P: DeserializeOwned + Send + 'static,
        Q: DeserializeOwned + Send + 'static,
        B: DeserializeOwned + Send + 'static,
        H: DeserializeOwned + Send + 'static,
        R: Send + Sync + 'static,
    {
        let erased: ErasedHandler<S> = Arc::new(
            move |app: S, ctx: &RequestContext, declared: Declared| -> Result<PendingReply, HttpError> {
                let request = RouteRequest::<S, P, Q, B, H, R>::extract(app, ctx, declared)?;
                let pending = handler(request);
                Ok(Box::pin(async move {
                    pending
                        .await
                        .map(IntoReply::into_reply)
                        .map_err(Into::into)
                }))
            },
        );
        self.config.handler = Some(erased);
        self
    }

    /// Compile the route and register it
    pub fn build(self) -> RouteResult<RouteInfo> {
        let Self {
            app, mut config, ..
        } = self;

        let handler = config.handler.take().ok_or(RouteError::MissingHandler)?;
        let (Some(method), Some(url)) = (config.method.clone(), config.url.clone()) else {
            return Err(RouteError::MissingMethodOrUrl);
        };
        if url.is_empty() {
            return Err(RouteError::MissingMethodOrUrl);
        }
        if let Some(error) = config.deferred.first() {
            return Err(error.clone());
        }

        let prefix = config
            .prefix
            .clone()
            .unwrap_or_else(|| app.prefix().to_string());
        let path = compose_path(
            &prefix,
            config.controller.as_deref(),
            config.version.as_deref(),
            &url,
        );
        if app.has_route(&method, &path) {
            return Err(RouteError::DuplicateRoute {
                method: method.to_string(),
                path,
            });
        }
        let filter = MethodFilter::try_from(method.clone()).map_err(|_| {
            RouteError::UnsupportedMethod {
                method: method.to_string(),
            }
        })?;

        // committed to the context only once the route is registered
        let mut staged = app.schemas().clone();
        for def in config
            .request_schemas
            .iter()
            .map(|(_, def)| def)
            .chain(config.responses.values())
        {
            publish(&mut staged, def);
        }

        let mut validators = Vec::new();
        for kind in SchemaKind::request_kinds() {
            if let Some((_, def)) = config.request_schemas.iter().find(|(k, _)| k == kind) {
                let compiled = CompiledSchema::compile(*kind, &def.route_schema(), &staged)
                    .map_err(|reason| RouteError::InvalidSchema {
                        kind: *kind,
                        path: path.clone(),
                        reason,
                    })?;
                validators.push(compiled);
            }
        }

        let mut chain = Vec::with_capacity(
            usize::from(config.resolver.is_some()) + config.guards.len() + config.pre_handlers.len(),
        );
        chain.extend(config.resolver.take());
        chain.extend(config.guards.drain(..).map(guard_step));
        chain.append(&mut config.pre_handlers);

        let info = Arc::new(RouteInfo::new(method.clone(), path.clone()));
        let accepts_multipart = !config.file_policy.is_empty() || consumes_multipart(&config.docs);
        let compiled = Arc::new(CompiledRoute {
            info: Arc::clone(&info),
            validators,
            declared: config.declared,
            chain,
            handler,
            hooks: config.hooks,
            file_policy: config.file_policy,
            accepts_multipart,
            persister: app.persister(),
            sniffer: app.sniffer(),
            declared_statuses: config.responses.keys().copied().collect::<BTreeSet<_>>(),
            response_headers: config.response_headers,
            content_type: config.content_type,
            cache_control: config.cache_control,
            body_limit: app.body_limit(),
        });

        let mut method_router = on(filter, move |State(state): State<S>, request: Request| {
            let compiled = Arc::clone(&compiled);
            async move { compiled.serve(state, request).await }
        })
        .layer(DefaultBodyLimit::max(app.body_limit()));
        if let Some(transform) = config.route_options.take() {
            method_router = transform(method_router);
        }
        app.register(&method, &path, method_router)?;
        *app.schemas_mut() = staged;

        let mut docs = config.docs;
        docs.version = config.version;
        app.registry_mut().add(MetaRouteEntry {
            path: path.clone(),
            method: method.to_string(),
            entries: config.meta,
            docs,
        });

        info!(method = %method, path = %path, "route registered");
        Ok(RouteInfo::new(method, path))
    }
}

fn consumes_multipart(docs: &RouteDocs) -> bool {
    docs.consumes.iter().any(|consumed| consumed == MULTIPART_FORM_DATA)
}

/// Publish an identified schema and its nested components in `table`
fn publish(table: &mut SchemaTable, def: &SchemaDef) {
    for (name, schema) in def.components() {
        if table.insert_once(name, schema) {
            debug!(schema = %name, "component schema registered");
        }
    }
    if let Some(id) = def.id()
        && table.insert_once(id, def.schema())
    {
        debug!(schema = %id, "schema registered");
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use utoipa::ToSchema;

    use super::*;
    use crate::{Reply, Schema};

    #[derive(Debug, Serialize, Deserialize, ToSchema)]
    struct Profile {
        name: String,
    }

    async fn ok(_request: RouteRequest<()>) -> Result<Reply, HttpError> {
        Ok(Reply::ok("fine"))
    }

    #[test]
    fn path_composition() {
        assert_eq!(
            compose_path("api", Some("users"), Some("2"), "/profile"),
            "/api/users/v2/profile"
        );
        assert_eq!(
            compose_path("api", Some("users"), None, "/profile"),
            "/api/users/profile"
        );
        assert_eq!(compose_path("/api/", None, None, "widgets/"), "/api/widgets");
        assert_eq!(compose_path("", None, None, "health"), "/health");
        assert_eq!(compose_path("", None, None, "/"), "/");
        assert_eq!(
            compose_path("api", None, None, "/widgets/:id"),
            "/api/widgets/{id}"
        );
    }

    #[test]
    fn handler_is_required() {
        let mut app = AppContext::<()>::new();
        let error = app.route().get("/widgets").build().unwrap_err();
        assert_eq!(error, RouteError::MissingHandler);
        assert_eq!(error.to_string(), "Handler is required");
    }

    #[test]
    fn method_and_url_are_required() {
        let mut app = AppContext::<()>::new();
        let error = app.route().handler(ok).build().unwrap_err();
        assert_eq!(error.to_string(), "Method and URL are required");

        let error = app.route().url("/widgets").handler(ok).build().unwrap_err();
        assert_eq!(error, RouteError::MissingMethodOrUrl);

        let error = app.route().get("").handler(ok).build().unwrap_err();
        assert_eq!(error, RouteError::MissingMethodOrUrl);
    }

    #[test]
    fn response_header_requires_declared_status() {
        let mut app = AppContext::<()>::new();
        let error = app
            .route()
            .get("/profile")
            .response_header(200, "x-total", "1")
            .unwrap_err();
        assert!(matches!(error, RouteError::UndeclaredStatus { status: 200, .. }));

        let builder = app
            .route()
            .get("/profile")
            .code(200, Schema::<Profile>::of())
            .response_header(200, "x-total", "1");
        assert!(builder.is_ok());
    }

    #[test]
    fn narrowing_discards_earlier_handler() {
        let mut app = AppContext::<()>::new();
        let error = app
            .route()
            .post("/profile")
            .handler(ok)
            .body(Schema::<Profile>::of())
            .build()
            .unwrap_err();
        assert_eq!(error, RouteError::MissingHandler);
    }

    #[test]
    fn identified_schemas_are_published_once() {
        let mut app = AppContext::<()>::new();
        app.route()
            .post("/profiles")
            .body(Schema::<Profile>::of())
            .handler(|_request: RouteRequest<(), (), (), Profile>| async {
                Ok::<_, HttpError>(Reply::created("made"))
            })
            .build()
            .unwrap();
        app.route()
            .put("/profiles/:id")
            .body(Schema::<Profile>::of())
            .handler(|_request: RouteRequest<(), (), (), Profile>| async {
                Ok::<_, HttpError>(Reply::ok("saved"))
            })
            .build()
            .unwrap();

        assert_eq!(app.schemas().len(), 1);
        assert!(app.has_schema("Profile"));
        assert_eq!(app.registry().len(), 2);
        let ids: Vec<_> = app.registry().schemas().filter_map(|entry| entry.id).collect();
        assert_eq!(ids, vec!["Profile", "Profile"]);
    }

    #[test]
    fn failed_build_leaves_schema_table_untouched() {
        let mut app = AppContext::<()>::new();
        let broken = ObjectBuilder::new()
            .property("code", ObjectBuilder::new().schema_type(Type::String).pattern(Some("(")));
        let error = app
            .route()
            .post("/profiles")
            .query(Schema::<()>::custom(broken).with_id("ProfileFilter"))
            .body(Schema::<Profile>::of())
            .handler(|_request: RouteRequest<(), (), (), Profile>| async {
                Ok::<_, HttpError>(Reply::created("made"))
            })
            .build()
            .unwrap_err();

        assert!(matches!(error, RouteError::InvalidSchema { kind: SchemaKind::Query, .. }));
        assert!(app.schemas().is_empty());
        assert!(app.registry().is_empty());
        assert!(!app.has_route(&Method::POST, "/api/profiles"));
    }

    #[test]
    fn duplicate_routes_are_rejected() {
        let mut app = AppContext::<()>::new();
        app.route().get("/twice").handler(ok).build().unwrap();
        let error = app.route().get("/twice").handler(ok).build().unwrap_err();
        assert_eq!(
            error,
            RouteError::DuplicateRoute {
                method: "GET".to_string(),
                path: "/api/twice".to_string(),
            }
        );
    }

    #[test]
    fn invalid_status_is_reported_at_build() {
        let mut app = AppContext::<()>::new();
        let error = app
            .route()
            .get("/bad")
            .code(1000, Schema::<Profile>::of())
            .handler(ok)
            .build()
            .unwrap_err();
        assert_eq!(error, RouteError::InvalidStatus(1000));
    }

    #[test]
    fn registry_records_envelope_responses() {
        let mut app = AppContext::<()>::new();
        app.route()
            .controller("users")
            .version("2")
            .get("/profile")
            .code(200, Schema::<Profile>::of())
            .tags(["users"])
            .auth(SecurityKind::Bearer)
            .handler(ok)
            .build()
            .unwrap();

        let route = &app.registry().all()[0];
        assert_eq!(route.path, "/api/users/v2/profile");
        assert_eq!(route.method, "GET");
        assert_eq!(route.docs.security, vec![SecurityKind::Bearer]);
        assert_eq!(route.docs.version.as_deref(), Some("2"));

        let response = route.of_kind(SchemaKind::Response).next().unwrap();
        assert_eq!(response.status, Some(200));
        let schema = serde_json::to_value(&response.schema).unwrap();
        assert_eq!(schema["properties"]["status"]["enum"], serde_json::json!([200]));
        assert_eq!(
            schema["properties"]["data"]["$ref"],
            serde_json::json!("#/components/schemas/Profile")
        );
    }
}
