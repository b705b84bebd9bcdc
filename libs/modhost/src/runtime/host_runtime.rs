//! Host runtime: owns the modules and drives them through the lifecycle
//! Constructed → PreparingModules → ContainerBuilt → FinalizingModules → Serving → Stopped.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use modhost_bootstrap::{rest_base_url, ServerConfig};

use crate::config_store::ConfigStore;
use crate::context::{ModuleContextBuilder, Wiring};
use crate::contracts::Module;
use crate::di::{Container, ContainerError};
use crate::handlers::{HandlerKind, HandlerRegistry};
use crate::registry::{ModuleRegistry, RegistryBuilder, RegistryError};
use crate::runtime::dispatch::Dispatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPhase {
    Constructed,
    PreparingModules,
    ContainerBuilt,
    FinalizingModules,
    Serving,
    Stopped,
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("before_created failed for module '{module}'")]
    BeforeCreated {
        module: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("dependency container build failed")]
    ContainerBuild(#[source] ContainerError),
    #[error("created failed for module '{module}'")]
    Created {
        module: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("module '{module}' registered an {kind} handler with an empty name")]
    InvalidHandlerName { module: String, kind: HandlerKind },
    #[error("lifecycle phase out of order: expected {expected:?}, host is {actual:?}")]
    PhaseOrder {
        expected: HostPhase,
        actual: HostPhase,
    },
    #[error("failed to bind {listener} listener on {addr}")]
    Bind {
        listener: &'static str,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("{listener} listener failed")]
    Serve {
        listener: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Collects the config store and modules for a [`HostRuntime`].
pub struct HostBuilder {
    store: Arc<dyn ConfigStore>,
    registry: RegistryBuilder,
    cancel: Option<CancellationToken>,
}

impl HostBuilder {
    pub fn module<M: Module>(mut self, module: M) -> Self {
        self.registry.register(Arc::new(module));
        self
    }

    pub fn module_arc(mut self, module: Arc<dyn Module>) -> Self {
        self.registry.register(module);
        self
    }

    /// Drive shutdown from an external token instead of a fresh one.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn build(self) -> Result<HostRuntime, HostError> {
        let registry = self.registry.build()?;
        let cancel = self.cancel.unwrap_or_default();
        let wiring = Arc::new(Wiring::default());
        let ctx_builder = ModuleContextBuilder::new(self.store, Arc::clone(&wiring), cancel.clone());

        Ok(HostRuntime {
            registry,
            ctx_builder,
            wiring,
            phase: HostPhase::Constructed,
            container: None,
            handlers: Arc::new(HandlerRegistry::default()),
            routes: Vec::new(),
            cancel,
        })
    }
}

/// One application host. Independent instances share nothing.
pub struct HostRuntime {
    registry: ModuleRegistry,
    ctx_builder: ModuleContextBuilder,
    wiring: Arc<Wiring>,
    phase: HostPhase,
    container: Option<Arc<Container>>,
    handlers: Arc<HandlerRegistry>,
    routes: Vec<(String, Router)>,
    cancel: CancellationToken,
}

impl HostRuntime {
    pub fn builder(store: Arc<dyn ConfigStore>) -> HostBuilder {
        HostBuilder {
            store,
            registry: RegistryBuilder::default(),
            cancel: None,
        }
    }

    pub fn phase(&self) -> HostPhase {
        self.phase
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Handlers frozen at the end of module finalization.
    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn container(&self) -> Option<&Container> {
        self.container.as_deref()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn advance(&mut self, expected: HostPhase, next: HostPhase) -> Result<(), HostError> {
        if self.phase != expected {
            return Err(HostError::PhaseOrder {
                expected,
                actual: self.phase,
            });
        }
        tracing::debug!(from = ?expected, to = ?next, "Host phase transition");
        self.phase = next;
        Ok(())
    }

    /// Phase 1: `before_created` on every module, in registration order.
    pub async fn prepare_modules(&mut self) -> Result<(), HostError> {
        self.advance(HostPhase::Constructed, HostPhase::PreparingModules)?;
        tracing::info!("Phase: before_created");

        for entry in self.registry.modules() {
            let ctx = self.ctx_builder.for_module(&entry.name);
            let span = ctx.logger().clone();
            entry
                .module
                .before_created(&ctx)
                .instrument(span)
                .await
                .map_err(|source| HostError::BeforeCreated {
                    module: entry.name.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Build every definition added in phase 1.
    pub fn build_container(&mut self) -> Result<(), HostError> {
        self.advance(HostPhase::PreparingModules, HostPhase::ContainerBuilt)?;

        let definitions = std::mem::take(&mut *self.wiring.definitions.lock());
        let count = definitions.len();
        let container = definitions.build().map_err(HostError::ContainerBuild)?;
        tracing::info!(definitions = count, "Dependency container built");

        self.container = Some(Arc::new(container));
        Ok(())
    }

    /// Phase 2: `created` on every module, then freeze handlers and routes.
    pub async fn finalize_modules(&mut self) -> Result<(), HostError> {
        self.advance(HostPhase::ContainerBuilt, HostPhase::FinalizingModules)?;
        tracing::info!("Phase: created");

        let container = self.container.clone().unwrap_or_default();
        for entry in self.registry.modules() {
            let ctx = self.ctx_builder.created_for(&entry.name, Arc::clone(&container));
            let span = ctx.logger().clone();
            entry
                .module
                .created(&ctx)
                .instrument(span)
                .await
                .map_err(|source| HostError::Created {
                    module: entry.name.clone(),
                    source,
                })?;
        }

        self.handlers = Arc::new(std::mem::take(&mut *self.wiring.handlers.lock()));
        self.routes = std::mem::take(&mut *self.wiring.routes.lock());

        tracing::info!(
            actions = ?self.handlers.names(HandlerKind::Action),
            events = ?self.handlers.names(HandlerKind::Event),
            jobs = self.wiring.scheduler.len(),
            "Modules finalized"
        );
        Ok(())
    }

    /// Both module phases with the container build in between.
    pub async fn prepare(&mut self) -> Result<(), HostError> {
        self.prepare_modules().await?;
        self.build_container()?;
        self.finalize_modules().await
    }

    /// Trigger endpoints: `POST /actions` and `POST /events`.
    pub fn internal_router(&self) -> Router {
        Dispatcher::new(Arc::clone(&self.handlers), self.cancel.clone())
            .router()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Module routes, each nested under `/{module}`.
    pub fn external_router(&self) -> Router {
        let mut grouped: Vec<(&str, Router)> = Vec::new();
        for (module, router) in &self.routes {
            match grouped.iter_mut().find(|(name, _)| name == module) {
                Some((_, merged)) => *merged = std::mem::take(merged).merge(router.clone()),
                None => grouped.push((module.as_str(), router.clone())),
            }
        }

        let mut app = Router::new();
        for (module, router) in grouped {
            let prefix = format!("/{module}");
            tracing::info!(core = "rest", module = %module, prefix = %prefix, "Module routes mounted");
            app = app.nest(&prefix, router);
        }
        app.layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Serve on already-bound listeners until cancellation, then drain.
    pub async fn serve_with_listeners(
        &mut self,
        internal: TcpListener,
        external: TcpListener,
    ) -> Result<(), HostError> {
        self.advance(HostPhase::FinalizingModules, HostPhase::Serving)?;

        let internal_app = self.internal_router();
        let external_app = self.external_router();

        self.wiring.scheduler.start(self.cancel.clone());

        let internal_srv = serve_until_cancelled("internal", internal, internal_app, self.cancel.clone());
        let external_srv = serve_until_cancelled("external", external, external_app, self.cancel.clone());
        let result = tokio::try_join!(internal_srv, external_srv).map(|_| ());

        // one listener failing takes the whole host down
        self.cancel.cancel();
        self.wiring.scheduler.join().await;
        self.phase = HostPhase::Stopped;
        tracing::info!("Host stopped");
        result
    }

    /// Bind both listeners from `server` and serve.
    pub async fn serve(&mut self, server: &ServerConfig) -> Result<(), HostError> {
        let internal_addr = server.internal_bind_addr();
        if server.production {
            tracing::warn!(
                core = "api",
                addr = %internal_addr,
                "Internal listener binds all interfaces; keep it off the public network"
            );
        }
        let internal = bind("internal", internal_addr).await?;
        let external = bind("external", server.external_bind_addr()).await?;
        tracing::info!(core = "rest", base_url = %rest_base_url(server), "Public REST base URL");

        self.serve_with_listeners(internal, external).await
    }

    pub async fn run(mut self, server: &ServerConfig) -> Result<(), HostError> {
        self.prepare().await?;
        self.serve(server).await
    }
}

async fn bind(listener: &'static str, addr: SocketAddr) -> Result<TcpListener, HostError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| HostError::Bind {
            listener,
            addr,
            source,
        })
}

async fn serve_until_cancelled(
    listener: &'static str,
    tcp: TcpListener,
    app: Router,
    cancel: CancellationToken,
) -> Result<(), HostError> {
    if let Ok(addr) = tcp.local_addr() {
        tracing::info!(core = "api", listener, %addr, "HTTP listener bound");
    }
    let shutdown = async move {
        cancel.cancelled().await;
        tracing::info!(core = "api", listener, "HTTP listener shutting down gracefully");
    };
    axum::serve(tcp, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|source| HostError::Serve { listener, source })
}
