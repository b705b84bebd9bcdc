use async_trait::async_trait;
use heck::ToSnakeCase;

use crate::context::{BeforeCreatedCtx, CreatedCtx};

/// A unit of application logic hosted by the runtime.
///
/// The host calls `before_created` on every module, builds the dependency
/// container, then calls `created` on every module, always in registration
/// order. Nothing from the container is available before `created`.
#[async_trait]
pub trait Module: Send + Sync + 'static {
    /// Module name: URL prefix on the external listener, config namespace and
    /// env prefix. Defaults to the snake_cased type name (`GreeterModule` ->
    /// `greeter_module`).
    fn name(&self) -> String {
        default_module_name::<Self>()
    }

    /// Phase 1: seed config, read env options, add dependency definitions.
    async fn before_created(&self, _ctx: &BeforeCreatedCtx) -> anyhow::Result<()> {
        Ok(())
    }

    /// Phase 2: resolve dependencies, register handlers, routes and jobs.
    async fn created(&self, ctx: &CreatedCtx) -> anyhow::Result<()>;
}

/// Snake-cased last path segment of the type name, generics stripped.
pub fn default_module_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    let last = base.rsplit("::").next().unwrap_or(base);
    last.to_snake_case()
}
