//! Capability surfaces handed to modules during the two lifecycle phases.

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::AnyPool;
use tokio_util::sync::CancellationToken;

use crate::config_store::{ConfigError, ConfigStore, ScopedConfig};
use crate::di::{Container, ContainerBuilder, ContainerError, Definition};
use crate::handlers::{Handler, HandlerKind, HandlerRegistry};
use crate::runtime::HostError;
use crate::scheduler::{ScheduleError, Scheduler};
use crate::session::{RequestCtx, Session};

/// State written by modules while the host is bootstrapping.
///
/// Only reachable through the phase contexts, which the host hands out by
/// reference for the duration of one hook call.
#[derive(Default)]
pub(crate) struct Wiring {
    pub(crate) definitions: Mutex<ContainerBuilder>,
    pub(crate) handlers: Mutex<HandlerRegistry>,
    pub(crate) routes: Mutex<Vec<(String, Router)>>,
    pub(crate) scheduler: Arc<Scheduler>,
}

/// Builds per-module contexts over the host's shared wiring.
#[derive(Clone)]
pub struct ModuleContextBuilder {
    store: Arc<dyn ConfigStore>,
    db: Option<AnyPool>,
    wiring: Arc<Wiring>,
    cancel: CancellationToken,
}

impl ModuleContextBuilder {
    pub(crate) fn new(
        store: Arc<dyn ConfigStore>,
        wiring: Arc<Wiring>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            db: store.db_pool(),
            store,
            wiring,
            cancel,
        }
    }

    pub fn for_module(&self, name: &str) -> BeforeCreatedCtx {
        BeforeCreatedCtx {
            name: name.to_owned(),
            config: ScopedConfig::new(name, Arc::clone(&self.store)),
            db: self.db.clone(),
            wiring: Arc::clone(&self.wiring),
            span: tracing::info_span!("module", module = %name),
        }
    }

    pub fn created_for(&self, name: &str, container: Arc<Container>) -> CreatedCtx {
        CreatedCtx {
            name: name.to_owned(),
            config: ScopedConfig::new(name, Arc::clone(&self.store)),
            db: self.db.clone(),
            container,
            wiring: Arc::clone(&self.wiring),
            cancel: self.cancel.clone(),
            span: tracing::info_span!("module", module = %name),
        }
    }
}

/// Phase 1 surface: env options, dependency definitions, config seeding.
pub struct BeforeCreatedCtx {
    name: String,
    config: ScopedConfig,
    db: Option<AnyPool>,
    wiring: Arc<Wiring>,
    span: tracing::Span,
}

impl BeforeCreatedCtx {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Span carrying `module = <name>`.
    pub fn logger(&self) -> &tracing::Span {
        &self.span
    }

    /// Shared database pool, when the host's config store is SQL-backed.
    /// Use it to create module-owned tables.
    pub fn db(&self) -> Option<&AnyPool> {
        self.db.as_ref()
    }

    /// Populate `T` from `{MODULE}_*` environment variables over `T::default()`.
    pub fn load_from_env<T>(&self) -> anyhow::Result<T>
    where
        T: DeserializeOwned + Serialize + Default,
    {
        let opts = modhost_bootstrap::load_prefixed(&self.name)?;
        tracing::debug!(core = "env", module = %self.name, "Options loaded from environment");
        Ok(opts)
    }

    /// Add dependency definitions. Names are global across modules.
    pub fn add(&self, defs: impl IntoIterator<Item = Definition>) -> Result<(), ContainerError> {
        self.wiring.definitions.lock().add(defs)
    }

    /// Store `default` under `key` unless the module already has that entry.
    pub async fn init_config<T>(&self, key: &str, default: &T) -> Result<bool, ConfigError>
    where
        T: Serialize + Sync,
    {
        self.config.init_config(key, default).await
    }
}

/// Phase 2 surface: dependency lookup, handlers, routes, jobs, config.
///
/// Config entries can be loaded and updated here but not created:
///
/// ```compile_fail
/// async fn seed_late(ctx: &modhost::CreatedCtx) {
///     let _ = ctx.init_config("hello", &1u32).await;
/// }
/// ```
pub struct CreatedCtx {
    name: String,
    config: ScopedConfig,
    db: Option<AnyPool>,
    container: Arc<Container>,
    wiring: Arc<Wiring>,
    cancel: CancellationToken,
    span: tracing::Span,
}

impl CreatedCtx {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn logger(&self) -> &tracing::Span {
        &self.span
    }

    pub fn db(&self) -> Option<&AnyPool> {
        self.db.as_ref()
    }

    pub fn get<T>(&self, name: &str) -> Result<Arc<T>, ContainerError>
    where
        T: Send + Sync + 'static,
    {
        self.container.get(name)
    }

    /// The caller identity of a request. Always present.
    pub fn session<'a>(&self, req: &'a RequestCtx) -> &'a Session {
        req.session()
    }

    /// Host-wide shutdown signal, for background work spawned by the module.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Mount `router` under `/{module}` on the external listener.
    pub fn rest(&self, router: Router) {
        self.wiring.routes.lock().push((self.name.clone(), router));
    }

    pub fn handle_action<F, Fut, I, O, E>(&self, name: &str, f: F) -> Result<(), HostError>
    where
        F: Fn(RequestCtx, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, E>> + Send + 'static,
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        self.register(HandlerKind::Action, name, Handler::new(f))
    }

    pub fn handle_event<F, Fut, I, O, E>(&self, name: &str, f: F) -> Result<(), HostError>
    where
        F: Fn(RequestCtx, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, E>> + Send + 'static,
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        self.register(HandlerKind::Event, name, Handler::new(f))
    }

    pub fn register_action(&self, name: &str, handler: Handler) -> Result<(), HostError> {
        self.register(HandlerKind::Action, name, handler)
    }

    pub fn register_event(&self, name: &str, handler: Handler) -> Result<(), HostError> {
        self.register(HandlerKind::Event, name, handler)
    }

    fn register(&self, kind: HandlerKind, name: &str, handler: Handler) -> Result<(), HostError> {
        if name.trim().is_empty() {
            return Err(HostError::InvalidHandlerName {
                module: self.name.clone(),
                kind,
            });
        }
        let previous = self.wiring.handlers.lock().insert(kind, name, handler);
        if previous.is_some() {
            tracing::warn!(
                core = kind.as_str(),
                module = %self.name,
                handler = %name,
                "Handler re-registered; last registration wins"
            );
        } else {
            tracing::debug!(core = kind.as_str(), module = %self.name, handler = %name, "Handler registered");
        }
        Ok(())
    }

    /// Run `f` on a cron schedule (5, 6 or 7 fields) until shutdown.
    pub fn handle_cron<F>(&self, name: &str, spec: &str, f: F) -> Result<(), ScheduleError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let job = format!("{}.{}", self.name, name);
        self.wiring.scheduler.add(job, spec, Arc::new(f))
    }

    pub async fn load_config<T>(&self, key: &str) -> Result<T, ConfigError>
    where
        T: DeserializeOwned,
    {
        self.config.load_config(key).await
    }

    pub async fn save_config<T>(&self, key: &str, value: &T) -> Result<(), ConfigError>
    where
        T: Serialize + Sync,
    {
        self.config.save_config(key, value).await
    }

    /// Cloneable config handle for use inside handlers.
    pub fn config_handle(&self) -> ScopedConfig {
        self.config.clone()
    }
}
