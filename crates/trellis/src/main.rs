// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Trellis server
//!
//! Serves the built-in routes and the API documentation.

use anyhow::Result;
use tracing::info;
use trellis::{Server, ServerConfig, ShutdownConfig, logging};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::from_env()?;
    logging::init(&config.log_level);

    info!(environment = %config.environment, "starting trellis server");

    let server = Server::new(config, ShutdownConfig::default(), Vec::new())?;

    // NOTE: the `#[tokio::main]` task does not run a worker future, we must spawn
    tokio::spawn(async move { server.run().await }).await??;

    Ok(())
}
