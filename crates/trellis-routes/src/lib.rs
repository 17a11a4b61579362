// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Typed route building and request lifecycle engine
//!
//! Routes are declared with a fluent [`RouteBuilder`] obtained from an [`AppContext`].
//! Each route compiles into one axum registration that runs a fixed lifecycle:
//! hooks, body parsing, upload policy, schema validation, resolver and guards, the
//! handler and rendering into the `{status, data}` envelope. Every schema a route
//! declares is recorded in the [`SchemaRegistry`] for documentation.

pub mod body;
pub mod builder;
pub mod context;
pub mod error;
pub mod files;
pub mod guard;
pub mod hooks;
pub mod lifecycle;
pub mod registry;
pub mod reply;
pub mod request;
pub mod schema;
pub mod sniff;

pub use builder::{RouteBuilder, RouteConfig, compose_path};
pub use context::{AppContext, AppParts, DEFAULT_BODY_LIMIT, DEFAULT_PREFIX};
pub use error::{HttpError, RouteError, RouteResult};
pub use files::{FileOptions, FilePersister, FilePolicy, PolicyViolations, UploadFile, mime_matches};
pub use guard::{Guard, PreHandler, guard, pre_handler};
pub use hooks::HookSlots;
pub use lifecycle::DEFAULT_SCALAR_CONTENT_TYPE;
pub use registry::{MetaEntry, MetaRouteEntry, RegisteredSchema, RouteDocs, SchemaRegistry};
pub use reply::{Flow, IntoReply, Reply};
pub use request::{RequestContext, RouteInfo, RouteRequest};
pub use schema::{Schema, SchemaDef, SchemaTable};
pub use sniff::{ContentSniffer, MagicSniffer};
pub use trellis_types::{Envelope, SchemaKind, SecurityKind};

/// Boxed future returned by hooks, guards and resolvers
pub use futures::future::BoxFuture;
