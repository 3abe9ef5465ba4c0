use std::io;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Failures reported by scene graph operations and the main-thread bridge.
#[derive(Debug, Error)]
pub enum SceneError {
    #[error("scene node '{path}' not found")]
    NodeNotFound { path: String },
    #[error("'{path}' is not a valid scene path")]
    InvalidPath { path: String },
    #[error("'{name}' is not a valid node name")]
    InvalidName { name: String },
    #[error("a node named '{name}' already exists under '{parent}'")]
    NameTaken { parent: String, name: String },
    #[error("property '{property}' is read-only")]
    ReadOnlyProperty { property: String },
    #[error("invalid value for property '{property}': {reason}")]
    InvalidValue { property: String, reason: String },
    #[error("the scene root cannot be {action}")]
    RootImmutable { action: &'static str },
    #[error("the scene has no file to save to")]
    NoScenePath,
    #[error("failed to write scene file '{path}': {source}")]
    Write {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode scene: {0}")]
    Encode(#[from] serde_json::Error),
    /// The main thread has stopped draining the queue.
    #[error("scene host is not running")]
    HostUnavailable,
    /// The main thread did not pick the call up in time. It will not run.
    #[error("scene host did not respond in time; the request was withdrawn")]
    TimedOut,
}

impl SceneError {
    /// Whether the failure lies with the bridge rather than the operation.
    pub fn is_bridge_failure(&self) -> bool {
        matches!(self, Self::HostUnavailable | Self::TimedOut)
    }
}
