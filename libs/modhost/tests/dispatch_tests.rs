//! Trigger endpoints exercised in-process through the internal router.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use tower::ServiceExt;

use modhost::{
    async_trait, CreatedCtx, Event, EventOp, HostRuntime, MemoryConfigStore, Module, RequestCtx,
    Session,
};

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Event>>,
    sessions: Mutex<Vec<Session>>,
    calls: AtomicUsize,
}

struct TriggerModule {
    recorder: Arc<Recorder>,
}

#[async_trait]
impl Module for TriggerModule {
    fn name(&self) -> String {
        "triggers".into()
    }

    async fn created(&self, ctx: &CreatedCtx) -> anyhow::Result<()> {
        ctx.handle_action("ping", |_req: RequestCtx, _input: Value| async move {
            Ok::<_, anyhow::Error>(json!({ "pong": true }))
        })?;

        let recorder = self.recorder.clone();
        ctx.handle_action("whoami", move |req: RequestCtx, _input: Value| {
            let recorder = recorder.clone();
            async move {
                recorder.calls.fetch_add(1, Ordering::SeqCst);
                recorder.sessions.lock().push(req.session().clone());
                Ok::<_, anyhow::Error>(json!({ "role": req.session().role() }))
            }
        })?;

        #[derive(Deserialize)]
        struct Divide {
            a: i64,
            b: i64,
        }
        ctx.handle_action("divide", |_req: RequestCtx, input: Divide| async move {
            if input.b == 0 {
                anyhow::bail!("division by zero");
            }
            Ok(json!({ "q": input.a / input.b }))
        })?;

        let recorder = self.recorder.clone();
        ctx.handle_event("on_insert", move |_req: RequestCtx, event: Event| {
            let recorder = recorder.clone();
            async move {
                recorder.events.lock().push(event);
                Ok::<_, anyhow::Error>(json!({ "ok": true }))
            }
        })?;

        // registered twice: the second binding is the one that answers
        ctx.handle_action("version", |_req: RequestCtx, _input: Value| async move {
            Ok::<_, anyhow::Error>(json!(1))
        })?;
        ctx.handle_action("version", |_req: RequestCtx, _input: Value| async move {
            Ok::<_, anyhow::Error>(json!(2))
        })?;
        Ok(())
    }
}

async fn router(recorder: Arc<Recorder>) -> Router {
    let mut host = HostRuntime::builder(Arc::new(MemoryConfigStore::new()))
        .module(TriggerModule { recorder })
        .build()
        .unwrap();
    host.prepare().await.unwrap();
    host.internal_router()
}

async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn event_envelope(trigger: &str, op: &str, old: Value, new: Value) -> Value {
    json!({
        "id": "85558393-c75d-4d2f-9c15-e80591b83894",
        "created_at": "2018-09-05T07:14:21.601701Z",
        "trigger": { "name": trigger },
        "table": { "schema": "public", "name": "users" },
        "event": {
            "session_variables": { "x-hasura-role": "admin" },
            "op": op,
            "data": { "old": old, "new": new }
        }
    })
}

#[tokio::test]
async fn ping_action_returns_handler_output() {
    let app = router(Arc::default()).await;
    let (status, body) = post(
        &app,
        "/actions",
        json!({
            "action": { "name": "ping" },
            "input": {},
            "session_variables": { "x-hasura-user-id": "", "x-hasura-role": "user" }
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "pong": true }));
}

#[tokio::test]
async fn unregistered_action_is_a_client_error_and_invokes_nothing() {
    let recorder = Arc::new(Recorder::default());
    let app = router(recorder.clone()).await;
    let (status, body) = post(
        &app,
        "/actions",
        json!({
            "action": { "name": "missing" },
            "input": {},
            "session_variables": { "x-hasura-role": "user" }
        }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "400");
    assert!(body["message"].as_str().unwrap().contains("missing"));
    assert_eq!(recorder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn malformed_envelope_is_a_client_error() {
    let recorder = Arc::new(Recorder::default());
    let app = router(recorder.clone()).await;
    let (status, body) = post(&app, "/actions", json!({ "input": {} })).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "400");
    assert_eq!(recorder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn handler_errors_and_bad_input_map_to_400() {
    let app = router(Arc::default()).await;

    let (status, body) = post(
        &app,
        "/actions",
        json!({ "action": { "name": "divide" }, "input": { "a": 6, "b": 3 } }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "q": 2 }));

    let (status, body) = post(
        &app,
        "/actions",
        json!({ "action": { "name": "divide" }, "input": { "a": 6, "b": 0 } }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "message": "division by zero", "code": "400" }));

    let (status, body) = post(
        &app,
        "/actions",
        json!({ "action": { "name": "divide" }, "input": { "a": "six" } }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "400");
}

#[tokio::test]
async fn last_registration_wins() {
    let app = router(Arc::default()).await;
    let (status, body) = post(
        &app,
        "/actions",
        json!({ "action": { "name": "version" }, "input": null }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!(2));
}

#[tokio::test]
async fn session_is_rebuilt_per_request() {
    let recorder = Arc::new(Recorder::default());
    let app = router(recorder.clone()).await;
    let user = uuid::Uuid::new_v4();

    let (_, body) = post(
        &app,
        "/actions",
        json!({
            "action": { "name": "whoami" },
            "input": {},
            "session_variables": { "x-hasura-user-id": user.to_string(), "x-hasura-role": "editor" }
        }),
    )
    .await;
    assert_eq!(body, json!({ "role": "editor" }));

    post(
        &app,
        "/actions",
        json!({
            "action": { "name": "whoami" },
            "input": {},
            "session_variables": { "x-hasura-user-id": "", "x-hasura-role": "" }
        }),
    )
    .await;

    let sessions = recorder.sessions.lock();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].user_id(), Some(user));
    assert_eq!(sessions[0].role(), "editor");
    assert_eq!(sessions[1].user_id(), None);
    assert_eq!(sessions[1].role(), "");
}

#[tokio::test]
async fn insert_event_reaches_handler_normalized() {
    let recorder = Arc::new(Recorder::default());
    let app = router(recorder.clone()).await;
    let (status, body) = post(
        &app,
        "/events",
        event_envelope("on_insert", "INSERT", Value::Null, json!({ "id": 1 })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true }));

    let events = recorder.events.lock();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.op, EventOp::Insert);
    assert_eq!(event.new, Some(json!({ "id": 1 })));
    assert_eq!(event.old, None);
    assert_eq!(event.trigger, "on_insert");
    assert_eq!(event.table.schema, "public");
}

#[tokio::test]
async fn events_and_actions_do_not_share_names() {
    let app = router(Arc::default()).await;

    // "ping" is an action, not an event
    let (status, body) = post(
        &app,
        "/events",
        event_envelope("ping", "UPDATE", json!({ "id": 1 }), json!({ "id": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "400");
}

#[tokio::test]
async fn unfamiliar_op_is_passed_through() {
    let recorder = Arc::new(Recorder::default());
    let app = router(recorder.clone()).await;
    let (status, _) = post(
        &app,
        "/events",
        event_envelope("on_insert", "TRUNCATE", Value::Null, Value::Null),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let events = recorder.events.lock();
    assert_eq!(events[0].op, EventOp::Other("TRUNCATE".into()));
}
