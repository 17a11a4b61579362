// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Application context routes are built against

use std::{collections::BTreeSet, fmt, sync::Arc};

use axum::{Router, http::Method, routing::MethodRouter};
use tracing::debug;
use utoipa::openapi::{RefOr, Schema as OpenApiSchema};

use crate::{
    builder::RouteBuilder,
    error::{RouteError, RouteResult},
    files::FilePersister,
    registry::SchemaRegistry,
    schema::SchemaTable,
    sniff::{ContentSniffer, MagicSniffer},
};

/// Default path prefix
pub const DEFAULT_PREFIX: &str = "api";

/// Default request body limit (1 MiB)
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

/// Owns the router under construction and everything routes register into
pub struct AppContext<S> {
    router: Router<S>,
    routes: BTreeSet<(String, String)>,
    schemas: SchemaTable,
    registry: SchemaRegistry,
    prefix: String,
    persister: Option<Arc<dyn FilePersister>>,
    sniffer: Arc<dyn ContentSniffer>,
    body_limit: usize,
}

/// What a finished [`AppContext`] hands to the server
#[derive(Debug)]
pub struct AppParts<S> {
    /// Router with every registered route
    pub router: Router<S>,
    /// Route schema metadata
    pub registry: SchemaRegistry,
    /// Shared identified schemas
    pub schemas: SchemaTable,
}

impl<S> fmt::Debug for AppContext<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("routes", &self.routes)
            .field("schemas", &self.schemas.len())
            .field("prefix", &self.prefix)
            .field("persister", &self.persister.is_some())
            .field("body_limit", &self.body_limit)
            .finish_non_exhaustive()
    }
}

impl<S> Default for AppContext<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S> AppContext<S>
where
    S: Clone + Send + Sync + 'static,
{
    /// Empty context with the default prefix, body limit and sniffer
    pub fn new() -> Self {
        Self {
            router: Router::new(),
            routes: BTreeSet::new(),
            schemas: SchemaTable::default(),
            registry: SchemaRegistry::new(),
            prefix: DEFAULT_PREFIX.to_string(),
            persister: None,
            sniffer: Arc::new(MagicSniffer),
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    /// Path prefix applied to routes that do not set their own
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Persist uploads through `persister`
    #[must_use]
    pub fn with_persister(mut self, persister: impl FilePersister + 'static) -> Self {
        self.persister = Some(Arc::new(persister));
        self
    }

    /// Replace the content sniffer used by upload policies
    #[must_use]
    pub fn with_sniffer(mut self, sniffer: impl ContentSniffer + 'static) -> Self {
        self.sniffer = Arc::new(sniffer);
        self
    }

    /// Maximum request body size in bytes
    #[must_use]
    pub fn with_body_limit(mut self, bytes: usize) -> Self {
        self.body_limit = bytes;
        self
    }

    /// Start building a route
    pub fn route(&mut self) -> RouteBuilder<'_, S> {
        RouteBuilder::new(self)
    }

    /// Register an identified schema; each id may be registered once
    pub fn add_schema(&mut self, id: impl Into<String>, schema: RefOr<OpenApiSchema>) -> RouteResult<()> {
        let id = id.into();
        self.schemas.add(id.clone(), schema)?;
        debug!(schema = %id, "schema registered");
        Ok(())
    }

    /// Whether an identified schema is registered
    pub fn has_schema(&self, id: &str) -> bool {
        self.schemas.contains(id)
    }

    /// Whether a route is registered for `method` and `path`
    pub fn has_route(&self, method: &Method, path: &str) -> bool {
        self.routes
            .contains(&(method.as_str().to_string(), path.to_string()))
    }

    /// Register one route on the router
    pub fn register(&mut self, method: &Method, path: &str, route: MethodRouter<S>) -> RouteResult<()> {
        if !self
            .routes
            .insert((method.as_str().to_string(), path.to_string()))
        {
            return Err(RouteError::DuplicateRoute {
                method: method.to_string(),
                path: path.to_string(),
            });
        }
        self.router = std::mem::take(&mut self.router).route(path, route);
        Ok(())
    }

    /// Path prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Request body limit
    pub fn body_limit(&self) -> usize {
        self.body_limit
    }

    /// Configured persister
    pub fn persister(&self) -> Option<Arc<dyn FilePersister>> {
        self.persister.clone()
    }

    /// Configured content sniffer
    pub fn sniffer(&self) -> Arc<dyn ContentSniffer> {
        Arc::clone(&self.sniffer)
    }

    /// Shared schema table
    pub fn schemas(&self) -> &SchemaTable {
        &self.schemas
    }

    pub(crate) fn schemas_mut(&mut self) -> &mut SchemaTable {
        &mut self.schemas
    }

    /// Route schema metadata
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Mutable route schema metadata, for clearing between tests
    pub fn registry_mut(&mut self) -> &mut SchemaRegistry {
        &mut self.registry
    }

    /// Router built so far
    pub fn router(&self) -> &Router<S> {
        &self.router
    }

    /// Finish and hand out the router, registry and schema table
    pub fn into_parts(self) -> AppParts<S> {
        AppParts {
            router: self.router,
            registry: self.registry,
            schemas: self.schemas,
        }
    }
}
