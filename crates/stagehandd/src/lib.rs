//! Control server for a scene-authoring host.
//!
//! The daemon accepts JSON-RPC 2.0 requests over two transports, newline
//! delimited messages on standard input and HTTP with a server-sent event
//! stream, and routes them to a [`Dispatcher`]. Handlers operate on the
//! services in [`stagehand_core`] and reach the host's scene graph through a
//! task queue that is drained on the main thread by a [`SceneHost`].
//!
//! Long-running work follows an acknowledge-then-poll pattern: the handler
//! replies at once with a token and the client polls `dtack` until the
//! operation settles. Destructive scene changes take two steps, a request
//! that yields a confirmation token and a second call that spends it.
//!
//! Start-up is split in two. [`bootstrap_with`] loads configuration,
//! installs telemetry and assembles the services; [`serve`] then starts the
//! transports and runs the scene host until a shutdown signal arrives.

mod bootstrap;
pub mod dispatch;
pub mod events;
mod health;
mod notes;
mod process;
pub mod scene;
mod telemetry;
pub mod transport;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Daemon, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use dispatch::{DispatchError, Dispatcher, ServerContext};
pub use events::{EventBus, EventSink, ServerEvent};
pub use health::{HealthReporter, StructuredHealthReporter, TransportKind};
pub use notes::OperatorNotes;
pub use process::{
    FlagShutdown, LaunchError, ShutdownError, ShutdownSignal, SystemShutdownSignal,
    report_launch_failure, run_daemon, serve,
};
pub use scene::{MemorySceneGraph, SceneGraph, SceneHost, SceneQueue};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
