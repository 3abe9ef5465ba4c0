//! Versioned stage records and the document-engine seam.
//!
//! The [`StageRegistry`] is the only owner of stage records. Callers address
//! records through [`StageHandle`]s and reach document content only through
//! registry methods, which run under the registry lock for their full
//! duration. Document content itself is produced by a [`DocumentEngine`];
//! [`MemoryDocumentEngine`] is the reference implementation.

mod engine;
mod errors;
mod handle;
mod memory;
mod registry;

pub use self::engine::{AttributeValue, DocumentEngine, PrimSummary, StageDocument, Transform};
pub use self::errors::{EngineError, RegistryError};
pub use self::handle::StageHandle;
pub use self::memory::MemoryDocumentEngine;
pub use self::registry::{StageRecord, StageRegistry, StageSnapshot, StageSummary};

const STAGE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::stage");
