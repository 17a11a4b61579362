// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! `OpenAPI` document generation and Swagger UI
//!
//! The document is assembled from the schema metadata registry once all routes are
//! built. Each registered route becomes one operation; identified schemas become
//! components referenced from the operations.

use std::collections::BTreeSet;

use axum::{
    Router,
    body::Bytes,
    http::{StatusCode, header::CONTENT_TYPE},
    response::Html,
    routing::get,
};
use tracing::{debug, warn};
use trellis_routes::{MetaRouteEntry, SchemaKind, SchemaRegistry, SchemaTable, SecurityKind};
use utoipa::openapi::{
    Deprecated, OpenApi, OpenApiBuilder, RefOr, Required,
    content::ContentBuilder,
    header::Header,
    info::InfoBuilder,
    path::{HttpMethod, Operation, OperationBuilder, ParameterBuilder, ParameterIn, PathItem, PathsBuilder},
    request_body::RequestBodyBuilder,
    response::ResponseBuilder,
    schema::{ComponentsBuilder, Object, Schema, Type},
    security::{ApiKey, ApiKeyValue, Http, HttpAuthScheme, HttpBuilder, SecurityRequirement, SecurityScheme},
};

use crate::{
    config::DocsConfig,
    error::{ServerError, ServerResult},
};

/// Path of the JSON document
pub const OPENAPI_PATH: &str = "/api-doc/openapi.json";

/// Path of the Swagger UI page
pub const SWAGGER_PATH: &str = "/swagger-ui";

const JSON: &str = "application/json";

/// Build the document for every route in `registry`
pub fn build_document(docs: &DocsConfig, registry: &SchemaRegistry, schemas: &SchemaTable) -> OpenApi {
    let mut paths = PathsBuilder::new();
    let mut used_security = BTreeSet::new();

    for route in registry.all() {
        let Some(method) = http_method(&route.method) else {
            warn!(method = %route.method, path = %route.path, "method has no OpenAPI equivalent, skipped");
            continue;
        };
        used_security.extend(route.docs.security.iter().copied());
        paths = paths.path(route.path.clone(), PathItem::new(method, operation(route, schemas)));
    }

    let mut components = ComponentsBuilder::new();
    for (id, schema) in schemas.iter() {
        components = components.schema(id, schema.clone());
    }
    for kind in SecurityKind::all() {
        if used_security.contains(kind) {
            components = components.security_scheme(kind.scheme_name(), security_scheme(*kind));
        }
    }

    debug!(routes = registry.len(), components = schemas.len(), "OpenAPI document built");
    OpenApiBuilder::new()
        .info(
            InfoBuilder::new()
                .title(docs.title.clone())
                .version(docs.version.clone())
                .description(docs.description.clone()),
        )
        .paths(paths)
        .components(Some(components.build()))
        .build()
}

fn http_method(method: &str) -> Option<HttpMethod> {
    Some(match method {
        "GET" => HttpMethod::Get,
        "POST" => HttpMethod::Post,
        "PUT" => HttpMethod::Put,
        "DELETE" => HttpMethod::Delete,
        "PATCH" => HttpMethod::Patch,
        "OPTIONS" => HttpMethod::Options,
        "HEAD" => HttpMethod::Head,
        "TRACE" => HttpMethod::Trace,
        _ => return None,
    })
}

fn security_scheme(kind: SecurityKind) -> SecurityScheme {
    match kind {
        SecurityKind::Bearer => SecurityScheme::Http(
            HttpBuilder::new()
                .scheme(HttpAuthScheme::Bearer)
                .bearer_format("JWT")
                .build(),
        ),
        SecurityKind::Basic => SecurityScheme::Http(Http::new(HttpAuthScheme::Basic)),
        SecurityKind::ApiKey => SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(kind.header_name()))),
    }
}

/// Follow component references down to an object schema
fn object_of<'a>(schema: &'a RefOr<Schema>, schemas: &'a SchemaTable) -> Option<&'a Object> {
    match schema {
        RefOr::T(Schema::Object(object)) => Some(object),
        RefOr::Ref(reference) => reference
            .ref_location
            .rsplit('/')
            .next()
            .and_then(|id| schemas.get(id))
            .filter(|resolved| !matches!(resolved, RefOr::Ref(inner) if inner.ref_location == reference.ref_location))
            .and_then(|resolved| object_of(resolved, schemas)),
        _ => None,
    }
}

fn operation(route: &MetaRouteEntry, schemas: &SchemaTable) -> Operation {
    let docs = &route.docs;
    let mut operation = OperationBuilder::new()
        .tags((!docs.tags.is_empty()).then(|| docs.tags.clone()))
        .summary(docs.summary.clone())
        .description(docs.description.clone())
        .operation_id(docs.operation_id.clone());
    if docs.deprecated {
        operation = operation.deprecated(Some(Deprecated::True));
    }

    for (kind, location) in [
        (SchemaKind::Params, ParameterIn::Path),
        (SchemaKind::Query, ParameterIn::Query),
        (SchemaKind::Headers, ParameterIn::Header),
    ] {
        for entry in route.of_kind(kind) {
            let Some(object) = object_of(&entry.schema, schemas) else {
                continue;
            };
            for (name, property) in &object.properties {
                let required = matches!(location, ParameterIn::Path) || object.required.contains(name);
                operation = operation.parameter(
                    ParameterBuilder::new()
                        .name(name.clone())
                        .parameter_in(location.clone())
                        .required(if required { Required::True } else { Required::False })
                        .schema(Some(property.clone())),
                );
            }
        }
    }

    let body = route.of_kind(SchemaKind::Body).next().map(|entry| entry.schema.clone());
    if body.is_some() || !docs.consumes.is_empty() {
        let schema = body.unwrap_or_else(|| RefOr::T(Schema::Object(Object::with_type(Type::Object))));
        let consumes = if docs.consumes.is_empty() {
            vec![JSON.to_string()]
        } else {
            docs.consumes.clone()
        };
        let mut request_body = RequestBodyBuilder::new().required(Some(Required::True));
        for content_type in consumes {
            request_body = request_body.content(
                content_type,
                ContentBuilder::new().schema(Some(schema.clone())).build(),
            );
        }
        operation = operation.request_body(Some(request_body.build()));
    }

    let mut declared = false;
    for entry in route.of_kind(SchemaKind::Response) {
        let Some(status) = entry.status else {
            continue;
        };
        declared = true;
        let description = StatusCode::from_u16(status)
            .ok()
            .and_then(|status| status.canonical_reason())
            .unwrap_or("Response");
        let mut response = ResponseBuilder::new()
            .description(description)
            .content(JSON, ContentBuilder::new().schema(Some(entry.schema.clone())).build());
        for name in docs.response_headers.get(&status).into_iter().flatten() {
            response = response.header(
                name.clone(),
                Header::new(RefOr::T(Schema::Object(Object::with_type(Type::String)))),
            );
        }
        operation = operation.response(status.to_string(), response.build());
    }
    if !declared {
        let content_type = docs.content_type.as_deref().unwrap_or("text/html");
        operation = operation.response(
            "200",
            ResponseBuilder::new()
                .description("OK")
                .content(content_type, ContentBuilder::new().build())
                .build(),
        );
    }

    for kind in &docs.security {
        operation = operation.security(SecurityRequirement::new(kind.scheme_name(), Vec::<String>::new()));
    }

    operation.build()
}

/// Routes serving the document and the Swagger UI
///
/// # Errors
///
/// Returns `ServerError::Config` if the document cannot be serialized.
pub fn docs_router<S>(document: &OpenApi, title: &str) -> ServerResult<Router<S>>
where
    S: Clone + Send + Sync + 'static,
{
    let json = Bytes::from(document.to_pretty_json().map_err(|e| ServerError::Config {
        message: format!("failed to serialize OpenAPI document: {e}"),
    })?);
    let page = Html(swagger_page(title));

    Ok(Router::new()
        .route(
            OPENAPI_PATH,
            get(move || {
                let json = json.clone();
                async move { ([(CONTENT_TYPE, JSON)], json) }
            }),
        )
        .route(
            SWAGGER_PATH,
            get(move || {
                let page = page.clone();
                async move { page }
            }),
        ))
}

/// Escape text for an HTML element body
fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn swagger_page(title: &str) -> String {
    let title = escape_html(title);
    format!(
        r#"
<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>{title}</title>
    <link rel="stylesheet" type="text/css" href="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui.css" />
    <style>
        html {{ box-sizing: border-box; overflow: -moz-scrollbars-vertical; overflow-y: scroll; }}
        *, *:before, *:after {{ box-sizing: inherit; }}
        body {{ margin:0; background: #fafafa; }}
    </style>
</head>
<body>
    <div id="swagger-ui"></div>
    <script src="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui-bundle.js"></script>
    <script src="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui-standalone-preset.js"></script>
    <script>
        window.onload = function() {{
            SwaggerUIBundle({{
                url: '{OPENAPI_PATH}',
                dom_id: '#swagger-ui',
                deepLinking: true,
                presets: [
                    SwaggerUIBundle.presets.apis,
                    SwaggerUIStandalonePreset
                ],
                plugins: [
                    SwaggerUIBundle.plugins.DownloadUrl
                ],
                layout: "StandaloneLayout"
            }});
        }}
    </script>
</body>
</html>
"#
    )
}
