// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Integration tests for a running server with a widgets plugin

use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::http::StatusCode;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use trellis::{Plugin, Server, ServerConfig, ServerState, ShutdownConfig};
use trellis_routes::{AppContext, HttpError, Reply, Schema};
use utoipa::{ToSchema, openapi::ObjectBuilder};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
struct WidgetCreate {
    name: String,
    size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
struct Widget {
    id: u64,
    name: String,
    size: u32,
}

#[derive(Debug, Deserialize, ToSchema)]
struct WidgetPath {
    id: u64,
}

#[derive(Default)]
struct Widgets {
    next_id: Arc<AtomicU64>,
    store: Arc<Mutex<BTreeMap<u64, Widget>>>,
    ready: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl Plugin for Widgets {
    fn name(&self) -> &str {
        "widgets"
    }

    fn register(&self, app: &mut AppContext<ServerState>) -> anyhow::Result<()> {
        let (next_id, store) = (Arc::clone(&self.next_id), Arc::clone(&self.store));
        app.route()
            .post("/widgets")
            .body(Schema::<WidgetCreate>::of())
            .code(201, Schema::<Widget>::of())
            .tags(["widgets"])
            .handler(move |request| {
                let (next_id, store) = (Arc::clone(&next_id), Arc::clone(&store));
                async move {
                    let WidgetCreate { name, size } = request.body;
                    let id = next_id.fetch_add(1, Ordering::SeqCst) + 1;
                    let widget = Widget { id, name, size };
                    store
                        .lock()
                        .map_err(|_| HttpError::internal("widget store poisoned"))?
                        .insert(id, widget.clone());
                    Ok::<_, HttpError>(Reply::created(widget))
                }
            })
            .build()?;

        let store = Arc::clone(&self.store);
        app.route()
            .get("/widgets/:id")
            .params(Schema::<WidgetPath>::inline())
            .code(200, Schema::<Widget>::of())
            .code(404, Schema::<Value>::custom(ObjectBuilder::new()))
            .tags(["widgets"])
            .handler(move |request| {
                let store = Arc::clone(&store);
                async move {
                    let widget = store
                        .lock()
                        .map_err(|_| HttpError::internal("widget store poisoned"))?
                        .get(&request.params.id)
                        .cloned()
                        .ok_or_else(|| HttpError::not_found("no such widget"))?;
                    Ok::<_, HttpError>(Reply::ok(widget))
                }
            })
            .build()?;
        Ok(())
    }

    fn on_ready<'a>(&'a self, _state: &'a ServerState) -> BoxFuture<'a, anyhow::Result<()>> {
        self.ready.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }

    fn on_close<'a>(&'a self, _state: &'a ServerState) -> BoxFuture<'a, ()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Box::pin(async {})
    }
}

struct Running {
    base: String,
    ready: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    token: CancellationToken,
}

async fn start(config: ServerConfig) -> Running {
    let widgets = Widgets::default();
    let (ready, closed) = (Arc::clone(&widgets.ready), Arc::clone(&widgets.closed));
    let (addr, token) = Server::new(config, ShutdownConfig::default(), vec![Box::new(widgets)])
        .expect("Failed to create server")
        .run_for_testing()
        .await
        .expect("Failed to start test server");
    Running {
        base: format!("http://{addr}"),
        ready,
        closed,
        token,
    }
}

#[tokio::test]
async fn widgets_round_trip() {
    let server = start(ServerConfig::for_testing()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/api/widgets", server.base))
        .json(&json!({ "name": "gear", "size": 3 }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(response.headers().contains_key("x-request-id"));
    let created: Value = response.json().await.expect("Failed to read response");
    assert_eq!(
        created,
        json!({ "status": 201, "data": { "id": 1, "name": "gear", "size": 3 } })
    );

    let response = client
        .get(format!("{}/api/widgets/1", server.base))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::OK);
    let fetched: Value = response.json().await.expect("Failed to read response");
    assert_eq!(fetched["data"]["name"], json!("gear"));

    let response = client
        .get(format!("{}/api/widgets/99", server.base))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let missing: Value = response.json().await.expect("Failed to read response");
    assert_eq!(
        missing,
        json!({ "status": 404, "data": { "error": "no such widget" } })
    );
}

#[tokio::test]
async fn invalid_widget_is_rejected() {
    let server = start(ServerConfig::for_testing()).await;
    let response = reqwest::Client::new()
        .post(format!("{}/api/widgets", server.base))
        .json(&json!({ "name": "gear" }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.expect("Failed to read response");
    assert_eq!(body["status"], json!(400));
    assert_eq!(body["data"]["kind"], json!("body"));
}

#[tokio::test]
async fn health_reports_plugins() {
    let server = start(ServerConfig::for_testing()).await;
    let response = reqwest::get(format!("{}/health", server.base))
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    let body: Value = response.json().await.expect("Failed to read response");
    assert_eq!(body["status"], json!(200));
    assert_eq!(body["data"]["status"], json!("up"));
    assert_eq!(body["data"]["environment"], json!("testing"));
    assert_eq!(body["data"]["plugins"], json!(["widgets"]));
    assert_eq!(server.ready.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn openapi_document_lists_routes() {
    let server = start(ServerConfig::for_testing()).await;
    let document: Value = reqwest::get(format!("{}/api-doc/openapi.json", server.base))
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to read response");

    assert!(document["paths"]["/health"]["get"].is_object());
    assert!(document["paths"]["/api/widgets"]["post"]["requestBody"].is_object());
    assert!(document["paths"]["/api/widgets/{id}"]["get"]["responses"]["404"].is_object());
    assert!(document["components"]["schemas"]["WidgetCreate"].is_object());

    let page = reqwest::get(format!("{}/swagger-ui", server.base))
        .await
        .expect("Failed to send request")
        .text()
        .await
        .expect("Failed to read response");
    assert!(page.contains("/api-doc/openapi.json"));
}

#[tokio::test]
async fn docs_can_be_disabled() {
    let mut config = ServerConfig::for_testing();
    config.docs.enabled = false;
    config.api_prefix = "v1".to_string();
    let server = start(config).await;

    let response = reqwest::get(format!("{}/api-doc/openapi.json", server.base))
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = reqwest::get(format!("{}/v1/widgets/1", server.base))
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await.expect("Failed to read response");
    assert_eq!(body["data"]["error"], json!("no such widget"));
}

#[tokio::test]
async fn cancellation_closes_plugins() {
    let server = start(ServerConfig::for_testing()).await;
    server.token.cancel();

    for _ in 0..50 {
        if server.closed.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(server.closed.load(Ordering::SeqCst), 1);
}
