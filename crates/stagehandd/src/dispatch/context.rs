//! Services shared by every handler.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use stagehand_config::{DEFAULT_CONFIRMATION_TTL, DEFAULT_SCENE_CALL_TIMEOUT};
use stagehand_core::{AsyncOperationTable, ConfirmationStore, GroupMappingStore, StageRegistry};

use super::errors::DispatchError;
use crate::events::EventBus;
use crate::notes::OperatorNotes;
use crate::scene::{SceneError, SceneGraph, SceneQueue};

/// Everything a handler can reach. Built once at startup and shared by
/// every transport thread.
pub struct ServerContext {
    pub(crate) registry: StageRegistry,
    pub(crate) ops: Arc<AsyncOperationTable>,
    pub(crate) confirmations: ConfirmationStore,
    pub(crate) mappings: GroupMappingStore,
    pub(crate) scene: SceneQueue,
    pub(crate) scene_timeout: Duration,
    pub(crate) notes: OperatorNotes,
    pub(crate) events: EventBus,
    pub(crate) host_version: String,
    pub(crate) initialized: AtomicBool,
}

impl ServerContext {
    /// Assembles a context with default timeouts and no subscribers.
    pub fn new(
        registry: StageRegistry,
        mappings: GroupMappingStore,
        scene: SceneQueue,
        notes: OperatorNotes,
    ) -> Self {
        Self {
            registry,
            ops: Arc::new(AsyncOperationTable::new()),
            confirmations: ConfirmationStore::new(DEFAULT_CONFIRMATION_TTL),
            mappings,
            scene,
            scene_timeout: DEFAULT_SCENE_CALL_TIMEOUT,
            notes,
            events: EventBus::new(),
            host_version: String::from("unknown"),
            initialized: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_confirmation_ttl(mut self, ttl: Duration) -> Self {
        self.confirmations = ConfirmationStore::new(ttl);
        self
    }

    #[must_use]
    pub fn with_scene_timeout(mut self, timeout: Duration) -> Self {
        self.scene_timeout = timeout;
        self
    }

    /// Host name and version reported by `initialize`.
    #[must_use]
    pub fn with_host_version(mut self, version: impl Into<String>) -> Self {
        self.host_version = version.into();
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn notes(&self) -> &OperatorNotes {
        &self.notes
    }

    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    pub fn mappings(&self) -> &GroupMappingStore {
        &self.mappings
    }

    /// Runs `f` on the main thread and flattens bridge and scene failures.
    pub(crate) fn scene_call<R, F>(&self, action: &str, f: F) -> Result<R, DispatchError>
    where
        R: Send + 'static,
        F: FnOnce(&mut dyn SceneGraph) -> Result<R, SceneError> + Send + 'static,
    {
        self.scene
            .call(self.scene_timeout, f)
            .and_then(|outcome| outcome)
            .map_err(|error| DispatchError::from_scene(action, error))
    }
}
