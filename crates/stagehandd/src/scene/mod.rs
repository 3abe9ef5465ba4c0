//! Host scene graph and the bridge that keeps it on the main thread.
//!
//! Scene mutations are only safe from the thread that owns the
//! [`SceneGraph`]. Handlers running on transport threads therefore submit
//! closures through a [`SceneQueue`]; the main loop drains them via
//! [`SceneHost::pump_for`].

mod errors;
mod graph;
mod memory;
mod queue;

pub use self::errors::SceneError;
pub use self::graph::{BoundingBox, ImportOutcome, ImportRequest, SceneGraph, SceneNode};
pub use self::memory::MemorySceneGraph;
pub use self::queue::{SceneHost, SceneQueue, SceneTask, SceneTaskReceiver, channel};

/// Tracing target for scene host activity.
pub(crate) const SCENE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::scene");
