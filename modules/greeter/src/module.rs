use std::sync::Arc;

use async_trait::async_trait;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use modhost::{BeforeCreatedCtx, CreatedCtx, Definition, Event, Module, RequestCtx, ScopedConfig};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{GreeterOptions, Hello};
use crate::service::GreeterService;

pub const MODULE_NAME: &str = "greeter";
pub const HELLO_KEY: &str = "hello";
pub const OPTIONS_DEF: &str = "greeter.options";
pub const SERVICE_DEF: &str = "greeter.service";

#[derive(Debug, Default, Deserialize)]
pub struct GreetInput {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GreetOutput {
    pub message: String,
    pub user_id: Option<Uuid>,
    pub role: String,
}

/// Reference module touching every context capability.
#[derive(Debug, Default)]
pub struct GreeterModule;

#[async_trait]
impl Module for GreeterModule {
    fn name(&self) -> String {
        MODULE_NAME.to_string()
    }

    async fn before_created(&self, ctx: &BeforeCreatedCtx) -> anyhow::Result<()> {
        if ctx.init_config(HELLO_KEY, &Hello::default()).await? {
            info!(parent: ctx.logger(), "Seeded default greeter config");
        }

        let opts: GreeterOptions = ctx.load_from_env()?;
        debug!(
            parent: ctx.logger(),
            greeting = %opts.greeting,
            heartbeat = %opts.heartbeat,
            "Greeter options"
        );

        let greeting = opts.greeting.clone();
        ctx.add([
            Definition::value(OPTIONS_DEF, opts),
            Definition::new(SERVICE_DEF, move |_c: &modhost::Container| {
                Ok(GreeterService::new(greeting))
            }),
        ])?;
        Ok(())
    }

    async fn created(&self, ctx: &CreatedCtx) -> anyhow::Result<()> {
        let hello: Hello = ctx.load_config(HELLO_KEY).await?;
        info!(parent: ctx.logger(), world = %hello.world, "Greeter config loaded");

        let svc = ctx.get::<GreeterService>(SERVICE_DEF)?;
        let opts = ctx.get::<GreeterOptions>(OPTIONS_DEF)?;

        ctx.handle_action("ping", ping)?;

        let cfg = ctx.config_handle();
        let greet_svc = Arc::clone(&svc);
        ctx.handle_action("greet", move |req: RequestCtx, input: GreetInput| {
            greet(req, input, cfg.clone(), Arc::clone(&greet_svc))
        })?;

        let cfg = ctx.config_handle();
        ctx.handle_action("set_world", move |req: RequestCtx, input: Hello| {
            set_world(req, input, cfg.clone())
        })?;

        ctx.handle_event("greeter_audit", audit)?;

        let beat_svc = Arc::clone(&svc);
        ctx.handle_cron("heartbeat", &opts.heartbeat, move || {
            debug!(module = MODULE_NAME, greeted = beat_svc.greeted(), "Greeter heartbeat");
        })?;

        ctx.rest(routes(svc));
        Ok(())
    }
}

async fn ping(_req: RequestCtx, _input: Value) -> anyhow::Result<Value> {
    Ok(json!({ "pong": true }))
}

async fn greet(
    req: RequestCtx,
    input: GreetInput,
    cfg: ScopedConfig,
    svc: Arc<GreeterService>,
) -> anyhow::Result<GreetOutput> {
    let hello: Hello = cfg.load_config(HELLO_KEY).await?;
    let session = req.session();
    Ok(GreetOutput {
        message: svc.greet(input.name.as_deref(), session, &hello.world),
        user_id: session.user_id(),
        role: session.role().to_string(),
    })
}

async fn set_world(req: RequestCtx, input: Hello, cfg: ScopedConfig) -> anyhow::Result<Hello> {
    if input.world.trim().is_empty() {
        anyhow::bail!("world must not be empty");
    }
    cfg.save_config(HELLO_KEY, &input).await?;
    info!(
        module = MODULE_NAME,
        world = %input.world,
        user_id = ?req.session().user_id(),
        "Greeter world changed"
    );
    Ok(input)
}

async fn audit(_req: RequestCtx, event: Event) -> anyhow::Result<Value> {
    info!(
        module = MODULE_NAME,
        table = %format!("{}.{}", event.table.schema, event.table.name),
        op = %event.op,
        id = %event.id,
        "Row change observed"
    );
    Ok(json!({ "seen": event.op }))
}

pub fn routes(svc: Arc<GreeterService>) -> Router {
    Router::new()
        .route("/hello", post(hello))
        .route("/stats", get(stats))
        .layer(Extension(svc))
}

async fn hello() -> Json<&'static str> {
    Json("world")
}

async fn stats(Extension(svc): Extension<Arc<GreeterService>>) -> Json<Value> {
    Json(json!({ "greeted": svc.greeted() }))
}
