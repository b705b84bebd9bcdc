mod dispatch;
mod host_runtime;
mod runner;

pub use dispatch::{DispatchError, Dispatcher};
pub use host_runtime::{HostBuilder, HostError, HostPhase, HostRuntime};
pub use runner::{run, RunOptions, ShutdownOptions};
