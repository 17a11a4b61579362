// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Server implementation module
//!
//! Assembles the application from the built-in routes and the plugins, wraps it in the
//! middleware stack and drives its lifecycle: bind, `on_ready`, serve, graceful
//! shutdown coordinated through a `CancellationToken`, then `on_close`.

use std::{fmt, future::IntoFuture, net::SocketAddr, time::Duration};

use axum::{Router, http::HeaderName, middleware::from_fn_with_state};
use hyper::Request;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info, info_span, warn};
use trellis_routes::{AppContext, AppParts};

use crate::{
    config::ServerConfig,
    error::{ServerError, ServerResult},
    middleware::{SecurityHeaders, cors_layer, security_headers_middleware},
    openapi,
    plugin::Plugin,
    routes::register_builtin,
    state::ServerState,
};

const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");
const DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_FORCE_SHUTDOWN_TIMEOUT_SECONDS: u64 = 5;

/// Configuration for server shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Maximum time to drain connections once shutdown started
    pub graceful_timeout: Duration,
    /// Maximum time each plugin's `on_close` may take
    pub force_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            graceful_timeout: Duration::from_secs(DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT_SECONDS),
            force_timeout: Duration::from_secs(DEFAULT_FORCE_SHUTDOWN_TIMEOUT_SECONDS),
        }
    }
}

/// Main server struct
pub struct Server {
    config: ServerConfig,
    router: Router,
    state: ServerState,
    plugins: Vec<Box<dyn Plugin>>,
    cancellation_token: CancellationToken,
    shutdown_config: ShutdownConfig,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("plugins", &self.state.plugins())
            .field("shutdown_config", &self.shutdown_config)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Assemble the server
    ///
    /// Registers the built-in routes, then each plugin's routes in order.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Route` if a built-in route fails to build,
    /// `ServerError::Plugin` if a plugin fails to register, or `ServerError::Config`
    /// if the middleware configuration is invalid.
    pub fn new(
        config: ServerConfig,
        shutdown_config: ShutdownConfig,
        plugins: Vec<Box<dyn Plugin>>,
    ) -> ServerResult<Self> {
        let cancellation_token = CancellationToken::new();
        let state = ServerState::new(
            config.clone(),
            plugins.iter().map(|plugin| plugin.name().to_string()).collect(),
            cancellation_token.child_token(),
        );
        let router = Self::create_router(&config, state.clone(), &plugins)?;

        Ok(Self {
            config,
            router,
            state,
            plugins,
            cancellation_token,
            shutdown_config,
        })
    }

    fn create_router(
        config: &ServerConfig,
        state: ServerState,
        plugins: &[Box<dyn Plugin>],
    ) -> ServerResult<Router> {
        let mut app = AppContext::<ServerState>::new()
            .with_prefix(config.api_prefix.clone())
            .with_body_limit(config.body_limit_bytes);

        register_builtin(&mut app)?;
        for plugin in plugins {
            plugin
                .register(&mut app)
                .map_err(|e| ServerError::Plugin {
                    name: plugin.name().to_string(),
                    message: format!("{e:#}"),
                })?;
            info!(plugin = plugin.name(), "plugin registered");
        }

        let AppParts {
            mut router,
            registry,
            schemas,
        } = app.into_parts();
        if config.docs.enabled {
            let document = openapi::build_document(&config.docs, &registry, &schemas);
            router = router.merge(openapi::docs_router(&document, &config.docs.title)?);
        }

        let middleware = ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(REQUEST_ID_HEADER, MakeRequestUuid))
            .layer(
                TraceLayer::new_for_http().make_span_with(|req: &Request<_>| {
                    if let Some(request_id) = req.headers().get(REQUEST_ID_HEADER) {
                        info_span!("http_request", ?request_id, method = %req.method(), uri = %req.uri())
                    } else {
                        error!("failed to extract id from request");
                        info_span!("http_request", request_id = "unknown")
                    }
                }),
            )
            .layer(PropagateRequestIdLayer::new(REQUEST_ID_HEADER))
            .layer(cors_layer(&config.cors)?)
            .layer(TimeoutLayer::new(config.timeout_seconds.value()));

        let mut router = router.layer(middleware).with_state(state);
        if config.security_headers.enabled {
            router = router.layer(from_fn_with_state(
                SecurityHeaders::for_environment(config.environment),
                security_headers_middleware,
            ));
        }
        Ok(router)
    }

    async fn bind(&self) -> ServerResult<(TcpListener, SocketAddr)> {
        let addr = self.config.socket_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                address: addr,
                source,
            })?;
        let actual_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Startup { source })?;
        Ok((listener, actual_addr))
    }

    async fn ready(&self) -> ServerResult<()> {
        for plugin in &self.plugins {
            plugin
                .on_ready(&self.state)
                .await
                .map_err(|e| ServerError::Plugin {
                    name: plugin.name().to_string(),
                    message: format!("{e:#}"),
                })?;
        }
        Ok(())
    }

    /// Run the server with coordinated graceful shutdown
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Bind` if unable to bind to the configured address,
    /// `ServerError::Plugin` if a plugin fails to start, `ServerError::Shutdown` if
    /// serving fails, or `ServerError::Timeout` if connections do not drain in time.
    pub async fn run(self) -> ServerResult<()> {
        let (listener, actual_addr) = self.bind().await?;
        self.ready().await?;

        info!(
            address = %actual_addr,
            environment = %self.config.environment,
            plugins = self.plugins.len(),
            "trellis server starting",
        );

        let Self {
            router,
            state,
            plugins,
            cancellation_token,
            shutdown_config,
            ..
        } = self;

        let signal_token = cancellation_token.clone();
        tokio::spawn(async move {
            info!("spawning the graceful shutdown task");
            Self::shutdown_signal_handler(signal_token).await;
        });

        let serve = axum::serve(listener, router)
            .with_graceful_shutdown(cancellation_token.clone().cancelled_owned())
            .into_future();
        tokio::pin!(serve);

        let result = tokio::select! {
            result = &mut serve => result.map_err(|source| ServerError::Shutdown { source }),
            () = cancellation_token.cancelled() => {
                match tokio::time::timeout(shutdown_config.graceful_timeout, &mut serve).await {
                    Ok(result) => result.map_err(|source| ServerError::Shutdown { source }),
                    Err(_) => {
                        warn!(
                            timeout_seconds = shutdown_config.graceful_timeout.as_secs(),
                            "connections did not drain in time"
                        );
                        Err(ServerError::Timeout {
                            timeout_seconds: shutdown_config.graceful_timeout.as_secs(),
                        })
                    }
                }
            }
        };

        close_plugins(&plugins, &state, shutdown_config.force_timeout).await;
        match &result {
            Ok(()) => info!("trellis server shut down gracefully"),
            Err(e) => error!(error = %e, "server error during shutdown"),
        }
        result
    }

    /// Handle shutdown signals and trigger coordinated cancellation
    ///
    /// Listens for SIGINT and SIGTERM (CTRL+C elsewhere) and cancels the token when one
    /// arrives.
    async fn shutdown_signal_handler(cancellation_token: CancellationToken) {
        tokio::select! {
            signal_name = shutdown_signal() => {
                warn!("Shutdown signal {} received, cancelling all operations...", signal_name);
                cancellation_token.cancel();
            },
            () = cancellation_token.cancelled() => {
                warn!("Cancellation token already cancelled, shutdown signal handler exiting");
            }
        }
    }

    /// Returns a clone of the cancellation token for coordinated shutdown
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Initiates graceful shutdown by cancelling the server's cancellation token
    pub fn shutdown(&self) {
        info!("programmatic shutdown requested");
        self.cancellation_token.cancel();
    }

    /// Run server for testing, returns the bound address
    ///
    /// Cancelling the returned token shuts the server down.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Bind` if unable to bind to the configured address, or
    /// `ServerError::Plugin` if a plugin fails to start.
    pub async fn run_for_testing(self) -> ServerResult<(SocketAddr, CancellationToken)> {
        let (listener, actual_addr) = self.bind().await?;
        self.ready().await?;

        let Self {
            router,
            state,
            plugins,
            cancellation_token,
            shutdown_config,
            ..
        } = self;

        let task = cancellation_token.child_token();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router)
                .with_graceful_shutdown(async move { task.cancelled().await })
                .await;
            close_plugins(&plugins, &state, shutdown_config.force_timeout).await;
        });

        Ok((actual_addr, cancellation_token))
    }

    /// Get server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get server state
    pub fn state(&self) -> &ServerState {
        &self.state
    }
}

async fn close_plugins(plugins: &[Box<dyn Plugin>], state: &ServerState, limit: Duration) {
    for plugin in plugins.iter().rev() {
        if tokio::time::timeout(limit, plugin.on_close(state)).await.is_err() {
            warn!(plugin = plugin.name(), "plugin did not close in time");
        }
    }
}

async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => tokio::select! {
                _ = sigterm.recv() => "SIGTERM",
                _ = sigint.recv() => "SIGINT",
            },
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "failed to register signal handlers");
                std::future::pending().await
            }
        }
    }

    #[cfg(not(unix))]
    {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "CTRL+C",
            Err(e) => {
                error!(error = %e, "failed to install CTRL+C handler");
                std::future::pending().await
            }
        }
    }
}
