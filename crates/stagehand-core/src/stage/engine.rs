//! Traits implemented by stage document engines.

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use super::errors::EngineError;

/// A typed attribute value as exchanged with clients.
///
/// The value stays in its textual wire form; engines validate it against
/// `value_type` when it is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeValue {
    /// Declared type name, for example `float` or `double3`.
    pub value_type: String,
    /// Textual representation of the value.
    pub value: String,
}

impl AttributeValue {
    /// Builds a value from its type name and text.
    pub fn new(value_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            value_type: value_type.into(),
            value: value.into(),
        }
    }
}

/// Local transform expressed as translate, rotate (degrees, XYZ order) and
/// scale components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// Translation along X, Y and Z.
    pub translate: [f64; 3],
    /// Rotation around X, Y and Z in degrees.
    pub rotate: [f64; 3],
    /// Scale along X, Y and Z.
    pub scale: [f64; 3],
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translate: [0.0; 3],
            rotate: [0.0; 3],
            scale: [1.0; 3],
        }
    }
}

/// Path and type of a prim, as listed by [`StageDocument::prims`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimSummary {
    /// Absolute prim path.
    pub path: String,
    /// Schema type name; empty for untyped prims.
    pub prim_type: String,
}

/// A loaded stage document.
///
/// Documents are owned by the registry and only touched while its lock is
/// held, so implementations need not be `Sync`.
pub trait StageDocument: Send {
    /// Defines (or re-types) the prim at `path`, creating missing ancestors.
    fn define_prim(&mut self, path: &str, prim_type: &str) -> Result<(), EngineError>;

    /// Writes an attribute on an existing prim.
    fn set_attribute(
        &mut self,
        prim_path: &str,
        name: &str,
        value: AttributeValue,
    ) -> Result<(), EngineError>;

    /// Reads an attribute from an existing prim.
    fn attribute(&self, prim_path: &str, name: &str) -> Result<AttributeValue, EngineError>;

    /// Replaces the local transform of an existing prim.
    fn set_transform(&mut self, prim_path: &str, transform: &Transform) -> Result<(), EngineError>;

    /// Lists every prim in depth-first path order.
    fn prims(&self) -> Vec<PrimSummary>;

    /// Writes the document back to the file it was created or opened from.
    /// In-memory documents treat this as a no-op.
    fn save(&mut self) -> Result<(), EngineError>;

    /// Writes a copy of the document to `path` without retargeting it.
    fn export(&self, path: &Utf8Path) -> Result<(), EngineError>;

    /// Serialises the document to text.
    fn export_text(&self) -> Result<String, EngineError>;
}

/// Factory for stage documents.
pub trait DocumentEngine: Send + Sync {
    /// Human-readable engine name.
    fn name(&self) -> &str;

    /// Engine version reported in the server descriptor.
    fn version(&self) -> &str;

    /// Creates a new document, bound to `path` when one is given and held
    /// purely in memory otherwise.
    fn create(&self, path: Option<&Utf8Path>) -> Result<Box<dyn StageDocument>, EngineError>;

    /// Loads an existing document from `path`.
    fn open(&self, path: &Utf8Path) -> Result<Box<dyn StageDocument>, EngineError>;
}
