//! The scene graph seam and the values crossing it.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde_json::{Map, Value};
use stagehand_core::PrimSummary;

use super::SceneError;

/// One node of a scene tree listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneNode {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub children: Vec<SceneNode>,
    /// Set when children exist below the requested depth.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

/// Axis-aligned bounds in scene space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl BoundingBox {
    /// Degenerate box around one point.
    pub fn point(at: [f64; 3]) -> Self {
        Self { min: at, max: at }
    }

    /// Smallest box containing both.
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        let mut out = self;
        for axis in 0..3 {
            out.min[axis] = out.min[axis].min(other.min[axis]);
            out.max[axis] = out.max[axis].max(other.max[axis]);
        }
        out
    }

    /// Extent along each axis.
    pub fn size(&self) -> [f64; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }
}

/// A stage document flattened for import into the scene.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportRequest {
    pub file_path: Utf8PathBuf,
    pub group_name: String,
    pub prims: Vec<PrimSummary>,
    /// Stage generation the prims were read at, when a registered stage
    /// supplied them.
    pub generation: Option<u64>,
}

/// What an import did to the scene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportOutcome {
    pub group_path: String,
    pub node_count: usize,
    pub replaced: bool,
}

/// Operations the host scene graph offers. Implementations are driven from
/// one thread only.
pub trait SceneGraph {
    /// Host application name and version, reported by `initialize`.
    fn host_version(&self) -> String;

    /// The subtree at `path`, cut off below `depth` levels when given.
    fn query(&self, path: &str, depth: Option<usize>) -> Result<SceneNode, SceneError>;

    /// Every property of the node at `path`.
    fn node_properties(&self, path: &str) -> Result<Map<String, Value>, SceneError>;

    /// Sets one property on the node at `path`.
    fn update_node_property(
        &mut self,
        path: &str,
        property: &str,
        value: Value,
    ) -> Result<(), SceneError>;

    /// Copies the subtree at `path` next to itself and returns the copy's path.
    fn duplicate_node(&mut self, path: &str, new_name: Option<&str>) -> Result<String, SceneError>;

    /// Writes the scene to `path`, or to its own file when `None`.
    fn save_scene(&mut self, path: Option<&Utf8Path>) -> Result<Utf8PathBuf, SceneError>;

    /// Bounds of the subtree at `path`.
    fn bounding_box(&self, path: &str) -> Result<BoundingBox, SceneError>;

    /// Paths of the currently selected nodes.
    fn selection(&self) -> Vec<String>;

    /// Replaces the group named in `request` with nodes built from its prims.
    fn import_document_as_group(
        &mut self,
        request: &ImportRequest,
    ) -> Result<ImportOutcome, SceneError>;
}
