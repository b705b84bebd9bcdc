//! Runner: the whole host lifecycle in one call.
//!
//! Phase order: **before_created → container build → created → serve → drain**.
//! Shutdown can be driven by OS signals, an external `CancellationToken`,
//! or an arbitrary future.

use std::{future::Future, pin::Pin, sync::Arc};

use tokio_util::sync::CancellationToken;

use modhost_bootstrap::{wait_for_shutdown, ServerConfig};

use crate::config_store::ConfigStore;
use crate::contracts::Module;
use crate::runtime::HostRuntime;

/// How the runtime should decide when to stop.
pub enum ShutdownOptions {
    /// Listen for OS signals (Ctrl+C / SIGTERM).
    Signals,
    /// An external `CancellationToken` controls the lifecycle.
    Token(CancellationToken),
    /// An arbitrary future; when it completes, we initiate shutdown.
    Future(Pin<Box<dyn Future<Output = ()> + Send>>),
}

pub struct RunOptions {
    pub server: ServerConfig,
    pub store: Arc<dyn ConfigStore>,
    /// Modules in the order their hooks run.
    pub modules: Vec<Arc<dyn Module>>,
    pub shutdown: ShutdownOptions,
}

pub async fn run(opts: RunOptions) -> anyhow::Result<()> {
    let cancel = match &opts.shutdown {
        ShutdownOptions::Token(t) => t.clone(),
        _ => CancellationToken::new(),
    };

    match opts.shutdown {
        ShutdownOptions::Signals => {
            let c = cancel.clone();
            tokio::spawn(async move {
                match wait_for_shutdown().await {
                    Ok(()) => {
                        tracing::info!("shutdown: signal received");
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            "shutdown: primary waiter failed; falling back to ctrl_c()"
                        );
                        let _ = tokio::signal::ctrl_c().await;
                    }
                }
                c.cancel();
            });
        }
        ShutdownOptions::Future(waiter) => {
            let c = cancel.clone();
            tokio::spawn(async move {
                waiter.await;
                tracing::info!("shutdown: external future completed");
                c.cancel();
            });
        }
        ShutdownOptions::Token(_) => {
            tracing::info!("shutdown: external token will control lifecycle");
        }
    }

    let host = opts
        .modules
        .into_iter()
        .fold(HostRuntime::builder(opts.store), |b, m| b.module_arc(m))
        .cancellation(cancel)
        .build()?;

    host.run(&opts.server).await?;
    Ok(())
}
