// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Plugin lifecycle
//!
//! A plugin contributes routes while the application is assembled, then is told when the
//! listener is ready and when the server closes.

use futures::future::BoxFuture;
use trellis_routes::AppContext;

use crate::state::ServerState;

/// Unit of application functionality loaded by the server
pub trait Plugin: Send + Sync {
    /// Name used in logs, errors and the health report
    fn name(&self) -> &str;

    /// Register routes and schemas
    fn register(&self, app: &mut AppContext<ServerState>) -> anyhow::Result<()>;

    /// Called once the listener is bound; an error aborts startup
    fn on_ready<'a>(&'a self, _state: &'a ServerState) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Called after the server stopped accepting requests
    fn on_close<'a>(&'a self, _state: &'a ServerState) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }
}
