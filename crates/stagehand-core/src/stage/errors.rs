//! Error types for stage documents and the registry.

use std::io;

use camino::Utf8PathBuf;
use thiserror::Error;

use super::handle::StageHandle;

/// Failures reported by a document engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The prim path is not absolute or contains an invalid segment.
    #[error("invalid prim path '{path}'")]
    InvalidPrimPath { path: String },
    /// No prim exists at the requested path.
    #[error("prim '{path}' not found")]
    PrimNotFound { path: String },
    /// The prim carries no attribute with the requested name.
    #[error("attribute '{name}' not found on prim '{prim_path}'")]
    AttributeNotFound { prim_path: String, name: String },
    /// The attribute name is empty or malformed.
    #[error("invalid attribute name '{name}'")]
    InvalidAttributeName { name: String },
    /// The declared value type is not supported by the engine.
    #[error("unsupported value type '{value_type}'")]
    UnsupportedValueType { value_type: String },
    /// The value text does not parse as its declared type.
    #[error("'{value}' is not a valid {value_type}")]
    InvalidValue { value_type: String, value: String },
    /// A transform component was not finite.
    #[error("transform for '{prim_path}' contains a non-finite component")]
    NonFiniteTransform { prim_path: String },
    /// The target directory for a new document does not exist.
    #[error("parent directory of '{path}' does not exist")]
    MissingParent { path: Utf8PathBuf },
    /// Reading a document failed.
    #[error("failed to read '{path}': {source}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    /// Writing a document failed.
    #[error("failed to write '{path}': {source}")]
    Write {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    /// The file exists but does not hold a stage document.
    #[error("'{path}' is not a valid stage document: {source}")]
    Decode {
        path: Utf8PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// Serialising a document failed.
    #[error("failed to serialise stage document: {source}")]
    Encode {
        #[source]
        source: serde_json::Error,
    },
}

/// Failures reported by [`super::StageRegistry`].
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No record exists for the handle.
    #[error("stage {handle} not found")]
    StageNotFound { handle: StageHandle },
    /// The record is unloaded and has no file to reload from.
    #[error("stage {handle} has no backing file")]
    NoBackingFile { handle: StageHandle },
    /// The handle allocator ran out of values.
    #[error("stage handles exhausted")]
    HandlesExhausted,
    /// The document engine rejected the operation.
    #[error("document engine failed: {0}")]
    Engine(#[from] EngineError),
    /// A previous holder of the registry lock panicked.
    #[error("stage registry lock poisoned")]
    Poisoned,
}
