//! Shared state services for the Stagehand control server.
//!
//! Each service is an explicitly constructed value guarded by its own lock:
//!
//! - [`StageRegistry`] maps opaque [`StageHandle`]s to versioned stage records
//!   and routes document operations to a [`DocumentEngine`].
//! - [`AsyncOperationTable`] tracks acknowledge-then-poll operations.
//! - [`ConfirmationStore`] issues single-use tokens for two-phase mutations.
//! - [`GroupMappingStore`] persists file-to-scene-group associations.
//!
//! None of the services calls into another, so callers may use them from any
//! thread without risking lock-order inversions.

pub mod confirm;
pub mod mapping;
pub mod ops;
pub mod stage;

pub use confirm::{ConfirmError, ConfirmationStore, PendingConfirmation};
pub use mapping::{GroupMapping, GroupMappingStore, MappingError};
pub use ops::{
    AckToken, AsyncOperationTable, CancelHook, CancelResolution, OperationStatus, OpsError,
    PollReport, Settlement,
};
pub use stage::{
    AttributeValue, DocumentEngine, EngineError, MemoryDocumentEngine, PrimSummary,
    RegistryError, StageDocument, StageHandle, StageRecord, StageRegistry, StageSnapshot, StageSummary,
    Transform,
};
