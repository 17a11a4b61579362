// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Trellis application server
//!
//! This crate bootstraps an HTTP service around the `trellis-routes` engine: it loads
//! configuration, installs logging, assembles routes contributed by plugins, publishes
//! the `OpenAPI` document built from the route registry and runs the listener with
//! coordinated graceful shutdown.
//!
//! # Module Structure
//!
//! - [`config`]: hierarchical configuration loading and validated settings
//! - [`error`]: server error types and their HTTP rendering
//! - [`logging`]: tracing subscriber setup
//! - [`middleware`]: CORS and security headers
//! - [`openapi`]: document generation from the schema registry, Swagger UI
//! - [`plugin`]: the plugin lifecycle trait
//! - [`routes`]: built-in routes
//! - [`server`]: assembly, lifecycle and shutdown
//! - [`state`]: state shared with every route

pub mod config;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod openapi;
pub mod plugin;
pub mod routes;
pub mod server;
pub mod state;

pub use config::{Environment, ServerConfig};
pub use error::{ServerError, ServerResult};
pub use plugin::Plugin;
pub use server::{Server, ShutdownConfig};
pub use state::{HealthCheck, HealthStatus, ServerState};
