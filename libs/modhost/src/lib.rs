//! # ModHost - two-phase module host
//!
//! Modules implement [`Module`] and are driven through two ordered hooks:
//!
//! - `before_created`: seed persisted config, read env options, add
//!   dependency [`Definition`]s;
//! - `created`: resolve dependencies, register action/event handlers,
//!   cron jobs and public routes.
//!
//! The host then serves `POST /actions` and `POST /events` on the internal
//! listener and every module's routes under `/{module}` on the external one.
//!
//! ```rust,ignore
//! use modhost::{async_trait, CreatedCtx, Module, RequestCtx};
//!
//! struct Ping;
//!
//! #[async_trait]
//! impl Module for Ping {
//!     async fn created(&self, ctx: &CreatedCtx) -> anyhow::Result<()> {
//!         ctx.handle_action("ping", |_req: RequestCtx, _in: serde_json::Value| async move {
//!             Ok::<_, anyhow::Error>(serde_json::json!({ "pong": true }))
//!         })?;
//!         Ok(())
//!     }
//! }
//! ```

pub use anyhow::Result;
pub use async_trait::async_trait;

pub mod config_store;
pub mod context;
pub mod contracts;
pub mod di;
pub mod envelope;
pub mod handlers;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod session;

pub use config_store::{
    ConfigError, ConfigStore, ConfigStoreError, MemoryConfigStore, ScopedConfig, SqlConfigStore,
};
pub use context::{BeforeCreatedCtx, CreatedCtx, ModuleContextBuilder};
pub use contracts::Module;
pub use di::{Container, ContainerError, Definition};
pub use envelope::{ErrorBody, Event, EventOp, TableRef};
pub use handlers::{Handler, HandlerKind, InvokeError};
pub use registry::{ModuleRegistry, RegistryError};
pub use runtime::{
    run, DispatchError, Dispatcher, HostError, HostPhase, HostRuntime, RunOptions,
    ShutdownOptions,
};
pub use scheduler::ScheduleError;
pub use session::{RequestCtx, Session};
