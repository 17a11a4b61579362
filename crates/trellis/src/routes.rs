// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Built-in routes

use trellis_routes::{AppContext, HttpError, Reply, RouteResult, Schema};

use crate::state::{HealthCheck, ServerState};

/// Register the routes every server carries
///
/// `GET /health` is mounted outside the API prefix.
pub fn register_builtin(app: &mut AppContext<ServerState>) -> RouteResult<()> {
    app.route()
        .prefix("")
        .get("/health")
        .code(200, Schema::<HealthCheck>::of())
        .tags(["health"])
        .summary("Service health")
        .description("Version, environment, uptime and loaded plugins")
        .operation_id("health")
        .handler(|request| async move { Ok::<_, HttpError>(Reply::ok(request.app.health_check())) })
        .build()?;
    Ok(())
}
