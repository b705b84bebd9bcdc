use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use greeter::config::Hello;
use greeter::GreeterModule;
use modhost::{ConfigStore, HostRuntime, MemoryConfigStore};

struct Apps {
    internal: Router,
    external: Router,
    store: Arc<MemoryConfigStore>,
}

async fn start() -> Apps {
    let store = Arc::new(MemoryConfigStore::new());
    let mut host = HostRuntime::builder(store.clone())
        .module(GreeterModule)
        .build()
        .unwrap();
    host.prepare().await.unwrap();
    Apps {
        internal: host.internal_router(),
        external: host.external_router(),
        store,
    }
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let body = body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty);
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn action(name: &str, input: Value, user_id: &str, role: &str) -> Value {
    json!({
        "action": { "name": name },
        "input": input,
        "session_variables": { "x-hasura-user-id": user_id, "x-hasura-role": role }
    })
}

#[tokio::test]
async fn seeds_default_config() {
    let apps = start().await;
    let stored = apps.store.load("greeter.hello").await.unwrap();
    let hello: Hello = serde_json::from_str(&stored).unwrap();
    assert_eq!(hello, Hello::default());
    assert_eq!(hello.world, "good");
}

#[tokio::test]
async fn ping_pongs() {
    let apps = start().await;
    let (status, body) = send(
        &apps.internal,
        "POST",
        "/actions",
        Some(action("ping", json!({}), "", "user")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "pong": true }));
}

#[tokio::test]
async fn greet_uses_session_and_current_world() {
    let apps = start().await;
    let user = uuid::Uuid::new_v4().to_string();

    let (status, body) = send(
        &apps.internal,
        "POST",
        "/actions",
        Some(action("greet", json!({}), &user, "editor")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "hello editor, welcome to the good world");
    assert_eq!(body["user_id"], user.as_str());
    assert_eq!(body["role"], "editor");

    let (status, body) = send(
        &apps.internal,
        "POST",
        "/actions",
        Some(action("set_world", json!({ "world": "mars" }), &user, "editor")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "world": "mars" }));

    let (_, body) = send(
        &apps.internal,
        "POST",
        "/actions",
        Some(action("greet", json!({ "name": "Ann" }), "", "")),
    )
    .await;
    assert_eq!(body["message"], "hello Ann, welcome to the mars world");
    assert_eq!(body["user_id"], Value::Null);

    let (status, body) = send(&apps.external, "GET", "/greeter/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "greeted": 2 }));
}

#[tokio::test]
async fn empty_world_is_refused() {
    let apps = start().await;
    let (status, body) = send(
        &apps.internal,
        "POST",
        "/actions",
        Some(action("set_world", json!({ "world": " " }), "", "admin")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body,
        json!({ "message": "world must not be empty", "code": "400" })
    );
    assert_eq!(
        apps.store.load("greeter.hello").await.unwrap(),
        r#"{"world":"good"}"#
    );
}

#[tokio::test]
async fn audit_event_echoes_operation() {
    let apps = start().await;
    let envelope = json!({
        "id": "b6b2c5f0-0f4e-4d8e-9f0e-3c2a5b0e9a11",
        "created_at": "2024-05-01T10:00:00Z",
        "trigger": { "name": "greeter_audit" },
        "table": { "schema": "public", "name": "greetings" },
        "event": {
            "session_variables": { "x-hasura-role": "admin" },
            "op": "DELETE",
            "data": { "old": { "id": 7 }, "new": null }
        }
    });
    let (status, body) = send(&apps.internal, "POST", "/events", Some(envelope)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "seen": "DELETE" }));
}

#[tokio::test]
async fn rest_hello_is_mounted_under_module_name() {
    let apps = start().await;
    let (status, body) = send(&apps.external, "POST", "/greeter/hello", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("world"));
}
