// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Schema metadata registry
//!
//! Append-only record of every schema a route declared, in registration order. The
//! bootstrap layer reads it to generate the OpenAPI document; nothing on the request
//! path touches it.

use std::collections::BTreeMap;

use trellis_types::{SchemaKind, SecurityKind};
use utoipa::openapi::{RefOr, Schema as OpenApiSchema};

/// One schema declaration made on a route builder
#[derive(Debug, Clone)]
pub struct MetaEntry {
    /// Which part of the request or response the schema describes
    pub kind: SchemaKind,
    /// Stable identifier when the schema is shared by reference
    pub id: Option<String>,
    /// Schema as referenced from the route
    pub schema: RefOr<OpenApiSchema>,
    /// Status code, only for [`SchemaKind::Response`]
    pub status: Option<u16>,
}

/// Presentation metadata attached to a route
#[derive(Debug, Clone, Default)]
pub struct RouteDocs {
    /// Grouping tags
    pub tags: Vec<String>,
    /// One-line summary
    pub summary: Option<String>,
    /// Long description
    pub description: Option<String>,
    /// Declared security requirements
    pub security: Vec<SecurityKind>,
    /// Accepted request content types
    pub consumes: Vec<String>,
    /// Response header names per declared status
    pub response_headers: BTreeMap<u16, Vec<String>>,
    /// Whether the route is deprecated
    pub deprecated: bool,
    /// Explicit operation id
    pub operation_id: Option<String>,
    /// Version segment the route was mounted under
    pub version: Option<String>,
    /// Content type of scalar replies
    pub content_type: Option<String>,
}

/// Every declaration of one route, recorded at `build()`
#[derive(Debug, Clone)]
pub struct MetaRouteEntry {
    /// Final route path
    pub path: String,
    /// Uppercase HTTP method
    pub method: String,
    /// Declarations in the order they were made
    pub entries: Vec<MetaEntry>,
    /// Presentation metadata
    pub docs: RouteDocs,
}

impl MetaRouteEntry {
    /// Declarations of one kind
    pub fn of_kind(&self, kind: SchemaKind) -> impl Iterator<Item = &MetaEntry> {
        self.entries.iter().filter(move |entry| entry.kind == kind)
    }
}

/// Flattened view of a single declaration, annotated with its route
#[derive(Debug, Clone, Copy)]
pub struct RegisteredSchema<'a> {
    /// Route path
    pub path: &'a str,
    /// Route method
    pub method: &'a str,
    /// Stable identifier, if any
    pub id: Option<&'a str>,
    /// The declaration
    pub entry: &'a MetaEntry,
}

/// Registry of route schema metadata
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    routes: Vec<MetaRouteEntry>,
}

impl SchemaRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a route's declarations
    pub fn add(&mut self, route: MetaRouteEntry) {
        self.routes.push(route);
    }

    /// All routes in registration order
    pub fn all(&self) -> &[MetaRouteEntry] {
        &self.routes
    }

    /// Remove every entry; test isolation only
    pub fn clear(&mut self) {
        self.routes.clear();
    }

    /// Number of recorded routes
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no route has been recorded
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Every declaration of every route, flattened in registration order
    pub fn schemas(&self) -> impl Iterator<Item = RegisteredSchema<'_>> {
        self.routes.iter().flat_map(|route| {
            route.entries.iter().map(move |entry| RegisteredSchema {
                path: &route.path,
                method: &route.method,
                id: entry.id.as_deref(),
                entry,
            })
        })
    }
}
