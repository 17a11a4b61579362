// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Cross-cutting HTTP middleware: CORS and security headers

use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::{
        HeaderName, HeaderValue,
        header::{REFERRER_POLICY, STRICT_TRANSPORT_SECURITY, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS},
    },
    middleware::Next,
    response::Response,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::debug;

use crate::{
    config::{CorsConfig, Environment},
    error::{ServerError, ServerResult},
};

const HSTS: &str = "max-age=31536000; includeSubDomains";

/// Build the CORS layer
///
/// Without configured origins every origin is allowed. Credentials are only honoured
/// with an explicit origin list, where methods and headers mirror the preflight.
pub fn cors_layer(config: &CorsConfig) -> ServerResult<CorsLayer> {
    let max_age = Duration::from_secs(config.max_age_seconds);
    if config.allowed_origins.is_empty() {
        return Ok(CorsLayer::permissive().max_age(max_age));
    }

    let origins = config
        .allowed_origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin).map_err(|e| ServerError::Config {
                message: format!("invalid CORS origin {origin:?}: {e}"),
            })
        })
        .collect::<ServerResult<Vec<_>>>()?;
    debug!(origins = origins.len(), "CORS restricted to configured origins");

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(config.allow_credentials)
        .max_age(max_age))
}

/// Security headers added to every response
#[derive(Debug, Clone)]
pub struct SecurityHeaders {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl SecurityHeaders {
    /// Headers for `environment`; HSTS is only sent in production
    pub fn for_environment(environment: Environment) -> Self {
        let mut headers = vec![
            (X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff")),
            (X_FRAME_OPTIONS, HeaderValue::from_static("DENY")),
            (REFERRER_POLICY, HeaderValue::from_static("no-referrer")),
        ];
        if environment == Environment::Production {
            headers.push((STRICT_TRANSPORT_SECURITY, HeaderValue::from_static(HSTS)));
        }
        Self { headers }
    }
}

/// Add the security headers a handler did not set itself
pub async fn security_headers_middleware(
    State(security): State<SecurityHeaders>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    for (name, value) in &security.headers {
        headers.entry(name).or_insert_with(|| value.clone());
    }
    response
}

#[cfg(test)]
mod tests {
    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode, header::ACCESS_CONTROL_ALLOW_ORIGIN},
        middleware::from_fn_with_state,
        routing::get,
    };
    use tower::ServiceExt;

    use super::*;

    fn app(security: SecurityHeaders) -> Router {
        Router::new()
            .route(
                "/",
                get(|| async { ([(X_FRAME_OPTIONS, "SAMEORIGIN")], "ok") }),
            )
            .layer(from_fn_with_state(security, security_headers_middleware))
    }

    #[tokio::test]
    async fn security_headers_fill_gaps() {
        let response = app(SecurityHeaders::for_environment(Environment::Development))
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert_eq!(response.headers()[X_FRAME_OPTIONS], "SAMEORIGIN");
        assert!(response.headers().get(STRICT_TRANSPORT_SECURITY).is_none());
    }

    #[test]
    fn hsts_only_in_production() {
        let production = SecurityHeaders::for_environment(Environment::Production);
        assert!(
            production
                .headers
                .iter()
                .any(|(name, _)| name == STRICT_TRANSPORT_SECURITY)
        );
    }

    #[test]
    fn invalid_origin_is_a_config_error() {
        let config = CorsConfig {
            allowed_origins: vec!["bad\norigin".to_string()],
            ..CorsConfig::default()
        };
        assert!(matches!(cors_layer(&config), Err(ServerError::Config { .. })));
    }

    #[tokio::test]
    async fn configured_origins_are_echoed() {
        let config = CorsConfig {
            allowed_origins: vec!["https://app.example".to_string()],
            allow_credentials: true,
            ..CorsConfig::default()
        };
        let router = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(cors_layer(&config).unwrap());

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("origin", "https://app.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://app.example"
        );
    }
}
