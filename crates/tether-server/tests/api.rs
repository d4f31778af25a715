use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use tether_local_ai::testing::{MemoryStore, ScriptedBackend};
use tether_local_ai::{BackendError, ModelController, TetherConfig};
use tether_server::{router, AppState};

struct TestApp {
    router: Router,
    backend: Arc<ScriptedBackend>,
    _dir: TempDir,
}

fn app_with(store: MemoryStore, backend: ScriptedBackend) -> TestApp {
    let dir = TempDir::new().unwrap();
    let config = TetherConfig::builder()
        .models_dir(dir.path())
        .sample_interval(Duration::from_millis(10))
        .sampler_stop_timeout(Duration::from_millis(100))
        .build();
    let backend = Arc::new(backend);
    let controller = ModelController::from_config(&config, Arc::new(store), backend.clone());
    TestApp {
        router: router(AppState::new(controller, &config)),
        backend,
        _dir: dir,
    }
}

fn app() -> TestApp {
    app_with(MemoryStore::new(), ScriptedBackend::new())
}

async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::get(uri).body(Body::empty()).unwrap();
    send(router, request).await
}

async fn post(router: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = post_request(uri, body);
    send(router, request).await
}

fn post_request(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_load_then_already_loaded() {
    let app = app();

    let (status, body) = post(&app.router, "/api/load", json!({"model": "org/tiny-model"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "loaded", "model": "org/tiny-model"}));

    let (status, body) = post(&app.router, "/api/load", json!({"model": "org/tiny-model"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "already_loaded");
    assert_eq!(app.backend.loads(), 1);

    let (_, health) = get(&app.router, "/health").await;
    assert_eq!(health["modelLoaded"], true);
    assert_eq!(health["modelId"], "org/tiny-model");
    assert_eq!(health["loading"], false);

    let (_, tags) = get(&app.router, "/api/tags").await;
    let models = tags["models"].as_array().unwrap();
    assert_eq!(models.len(), 1);
    assert_eq!(models[0]["name"], "org/tiny-model");
    assert_eq!(models[0]["details"]["format"], "gguf");
}

#[tokio::test]
async fn test_generate_loads_requested_model() {
    let app = app_with(
        MemoryStore::new(),
        ScriptedBackend::new().with_reply("the answer"),
    );
    post(&app.router, "/api/load", json!({"model": "org/first"})).await;

    let (status, body) = post(
        &app.router,
        "/api/generate",
        json!({"model": "org/second", "prompt": "what is it", "options": {"num_predict": 8}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["model"], "org/second");
    assert_eq!(body["response"], "the answer");
    assert_eq!(body["done"], true);
    assert_eq!(body["done_reason"], "stop");
    assert_eq!(body["prompt_eval_count"], 3);
    assert_eq!(body["eval_count"], 2);

    assert_eq!(
        app.backend.events(),
        vec!["load:org--first", "release:org--first", "load:org--second"]
    );
}

#[tokio::test]
async fn test_generate_stream_is_two_ndjson_lines() {
    let app = app_with(MemoryStore::new(), ScriptedBackend::new().with_reply("hi there"));

    let request = post_request(
        "/api/generate",
        json!({"model": "org/m", "prompt": "hello", "stream": true}),
    );
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/x-ndjson"
    );

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    let lines: Vec<Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["done"], false);
    assert_eq!(lines[1]["done"], true);
    assert_eq!(lines[1]["response"], "hi there");
}

#[tokio::test]
async fn test_chat_returns_assistant_message() {
    let app = app_with(MemoryStore::new(), ScriptedBackend::new().with_reply("fine thanks"));

    let (status, body) = post(
        &app.router,
        "/api/chat",
        json!({
            "model": "org/m",
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "how are you"}
            ]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"]["role"], "assistant");
    assert_eq!(body["message"]["content"], "fine thanks");
    assert!(body.get("response").is_none());
}

#[tokio::test]
async fn test_backend_unavailable_is_503() {
    let app = app_with(MemoryStore::new(), ScriptedBackend::unavailable());

    let (_, health) = get(&app.router, "/health").await;
    assert_eq!(health["status"], "ok");
    assert_eq!(health["backendAvailable"], false);

    let (status, body) = post(&app.router, "/api/load", json!({"model": "org/m"})).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["detail"].as_str().unwrap().contains("not installed"));

    let (status, _) = post(
        &app.router,
        "/api/generate",
        json!({"model": "org/m", "prompt": "hi"}),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_idle_status_endpoints() {
    let app = app();

    let (status, progress) = get(&app.router, "/api/download-status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(progress["active"], false);
    assert_eq!(progress["phase"], "idle");
    assert!(progress["percent"].is_null());

    let (_, tags) = get(&app.router, "/api/tags").await;
    assert_eq!(tags, json!({"models": []}));
}

#[tokio::test]
async fn test_download_status_after_load() {
    let app = app();
    post(&app.router, "/api/load", json!({"model": "org/m"})).await;

    let (_, progress) = get(&app.router, "/api/download-status").await;
    assert_eq!(progress["phase"], "done");
    assert_eq!(progress["model"], "org/m");
    assert_eq!(progress["percent"], 100.0);
}

#[tokio::test]
async fn test_concurrent_load_is_409() {
    let app = app_with(
        MemoryStore::new().with_delay(Duration::from_millis(300)),
        ScriptedBackend::new(),
    );

    let first = {
        let router = app.router.clone();
        tokio::spawn(async move {
            router
                .oneshot(post_request("/api/load", json!({"model": "org/slow"})))
                .await
                .unwrap()
                .status()
        })
    };

    let mut loading = false;
    for _ in 0..100 {
        let (_, health) = get(&app.router, "/health").await;
        if health["loading"] == true {
            loading = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(loading);

    let (_, tags) = get(&app.router, "/api/tags").await;
    assert_eq!(tags, json!({"models": []}));

    let (status, body) = post(&app.router, "/api/load", json!({"model": "org/other"})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["detail"].as_str().unwrap().contains("already loading"));

    assert_eq!(first.await.unwrap(), StatusCode::OK);
    let (_, health) = get(&app.router, "/health").await;
    assert_eq!(health["modelId"], "org/slow");
}

#[tokio::test]
async fn test_incomplete_cache_is_500() {
    let backend = ScriptedBackend::new();
    backend.push_failure(BackendError::MissingFile { path: None });
    backend.push_failure(BackendError::MissingFile { path: None });
    let app = app_with(MemoryStore::new(), backend);

    let (status, body) = post(&app.router, "/api/load", json!({"model": "org/broken"})).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["detail"]
        .as_str()
        .unwrap()
        .contains("cache appears incomplete for 'org/broken'"));

    let (_, health) = get(&app.router, "/health").await;
    assert_eq!(health["modelLoaded"], false);
    assert_eq!(health["loading"], false);

    let (_, progress) = get(&app.router, "/api/download-status").await;
    assert_eq!(progress["phase"], "error");
}
