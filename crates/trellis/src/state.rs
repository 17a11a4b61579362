// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Shared application state
//!
//! Every route registered through the server receives a clone of [`ServerState`] as
//! the `app` field of its request.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use crate::config::{Environment, ServerConfig};

/// Shared application state with cancellation token support
#[derive(Debug, Clone)]
pub struct ServerState {
    config: Arc<ServerConfig>,
    plugins: Arc<[String]>,
    started_at: DateTime<Utc>,
    /// Cancelled when the server begins shutting down
    pub cancellation_token: CancellationToken,
}

impl ServerState {
    /// Create new server state
    ///
    /// # Arguments
    ///
    /// * `config` - Server configuration
    /// * `plugins` - Names of the loaded plugins
    /// * `cancellation_token` - Token for coordinated cancellation
    pub fn new(
        config: ServerConfig,
        plugins: Vec<String>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            config: Arc::new(config),
            plugins: plugins.into(),
            started_at: Utc::now(),
            cancellation_token,
        }
    }

    /// Server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Names of the loaded plugins, in load order
    pub fn plugins(&self) -> &[String] {
        &self.plugins
    }

    /// Current health of the service
    pub fn health_check(&self) -> HealthCheck {
        let now = Utc::now();
        HealthCheck {
            status: if self.cancellation_token.is_cancelled() {
                HealthStatus::ShuttingDown
            } else {
                HealthStatus::Up
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: self.config.environment,
            timestamp: now.to_rfc3339(),
            uptime_seconds: u64::try_from((now - self.started_at).num_seconds()).unwrap_or_default(),
            plugins: self.plugins.to_vec(),
        }
    }
}

/// Health of the service
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Serving requests
    Up,
    /// Draining connections before exit
    ShuttingDown,
}

/// Health check payload
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthCheck {
    /// Service status
    pub status: HealthStatus,
    /// Service version
    pub version: String,
    /// Environment
    pub environment: Environment,
    /// RFC 3339 timestamp
    pub timestamp: String,
    /// Seconds since the state was created
    pub uptime_seconds: u64,
    /// Loaded plugins
    pub plugins: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_state_creation() {
        let state = ServerState::new(
            ServerConfig::default(),
            vec!["widgets".to_string()],
            CancellationToken::new(),
        );

        assert!(!state.cancellation_token.is_cancelled());
        assert_eq!(state.plugins(), ["widgets".to_string()]);

        let health = state.health_check();
        assert_eq!(health.status, HealthStatus::Up);
        assert_eq!(health.environment, Environment::Development);
        assert_eq!(health.plugins, vec!["widgets".to_string()]);
    }

    #[test]
    fn health_reports_shutdown() {
        let token = CancellationToken::new();
        let state = ServerState::new(ServerConfig::for_testing(), Vec::new(), token.child_token());

        token.cancel();
        assert!(state.cancellation_token.is_cancelled());
        assert_eq!(state.health_check().status, HealthStatus::ShuttingDown);
    }
}
