//! A self-contained scene tree used when no external host is attached.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use super::graph::{BoundingBox, ImportOutcome, ImportRequest, SceneGraph, SceneNode};
use super::{SCENE_TARGET, SceneError};

const ROOT_NAME: &str = "root";
const VECTOR_PROPERTIES: [&str; 4] = ["position", "rotation", "scale", "size"];
const READ_ONLY_PROPERTIES: [&str; 4] = ["name", "type", "path", "child_count"];

#[derive(Debug, Clone, Serialize)]
struct Node {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    properties: Map<String, Value>,
    children: Vec<Node>,
}

impl Node {
    fn new(name: &str, kind: &str) -> Self {
        let mut properties = Map::new();
        properties.insert("position".into(), json!([0.0, 0.0, 0.0]));
        properties.insert("rotation".into(), json!([0.0, 0.0, 0.0]));
        properties.insert("scale".into(), json!([1.0, 1.0, 1.0]));
        properties.insert("visible".into(), Value::Bool(true));
        if kind == "MeshInstance3D" {
            properties.insert("size".into(), json!([1.0, 1.0, 1.0]));
        }
        Self {
            name: name.to_owned(),
            kind: kind.to_owned(),
            properties,
            children: Vec::new(),
        }
    }

    fn walk(&self, indices: &[usize]) -> &Self {
        indices.iter().fold(self, |node, &index| &node.children[index])
    }

    fn walk_mut(&mut self, indices: &[usize]) -> &mut Self {
        let mut node = self;
        for &index in indices {
            node = &mut node.children[index];
        }
        node
    }

    fn child_index(&self, name: &str) -> Option<usize> {
        self.children.iter().position(|child| child.name == name)
    }

    fn vector(&self, property: &str, fallback: f64) -> [f64; 3] {
        let mut out = [fallback; 3];
        if let Some(Value::Array(items)) = self.properties.get(property) {
            for (slot, item) in out.iter_mut().zip(items) {
                *slot = item.as_f64().unwrap_or(fallback);
            }
        }
        out
    }

    fn count(&self) -> usize {
        1 + self.children.iter().map(Self::count).sum::<usize>()
    }

    fn listing(&self, path: String, depth: Option<usize>) -> SceneNode {
        let expand = depth != Some(0);
        let children = if expand {
            self.children
                .iter()
                .map(|child| {
                    child.listing(
                        format!("{path}/{}", child.name),
                        depth.map(|d| d.saturating_sub(1)),
                    )
                })
                .collect()
        } else {
            Vec::new()
        };
        SceneNode {
            name: self.name.clone(),
            kind: self.kind.clone(),
            truncated: !expand && !self.children.is_empty(),
            path,
            children,
        }
    }

    fn bounds(&self, origin: [f64; 3]) -> BoundingBox {
        let position = add(origin, self.vector("position", 0.0));
        let own = if self.properties.contains_key("size") {
            let scale = self.vector("scale", 1.0);
            let size = self.vector("size", 0.0);
            let half = [
                (size[0] * scale[0]).abs() / 2.0,
                (size[1] * scale[1]).abs() / 2.0,
                (size[2] * scale[2]).abs() / 2.0,
            ];
            BoundingBox {
                min: sub(position, half),
                max: add(position, half),
            }
        } else {
            BoundingBox::point(position)
        };
        self.children
            .iter()
            .fold(own, |acc, child| acc.union(child.bounds(position)))
    }
}

fn add(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn is_valid_name(name: &str) -> bool {
    !name.trim().is_empty()
        && !name
            .chars()
            .any(|c| matches!(c, '/' | ':' | '@' | '.' | '%' | '"') || c.is_control())
}

fn node_kind(prim_type: &str) -> &'static str {
    match prim_type {
        "Mesh" | "Cube" | "Sphere" | "Cylinder" | "Cone" | "Capsule" | "Plane" => "MeshInstance3D",
        "Camera" => "Camera3D",
        "DistantLight" => "DirectionalLight3D",
        "SphereLight" => "OmniLight3D",
        "RectLight" | "DiskLight" => "SpotLight3D",
        "Scope" => "Node",
        _ => "Node3D",
    }
}

/// In-process scene tree rooted at `/root`.
///
/// Nodes carry `position`, `rotation`, `scale` and `visible` properties;
/// mesh nodes add a `size`. Bounds ignore rotation.
#[derive(Debug, Clone)]
pub struct MemorySceneGraph {
    root: Node,
    scene_path: Option<Utf8PathBuf>,
    selection: Vec<String>,
}

impl Default for MemorySceneGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySceneGraph {
    /// An empty scene holding only the root node.
    pub fn new() -> Self {
        Self {
            root: Node::new(ROOT_NAME, "Node3D"),
            scene_path: None,
            selection: Vec::new(),
        }
    }

    /// Sets the file `save_scene` writes to by default.
    #[must_use]
    pub fn with_scene_path(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.scene_path = Some(path.into());
        self
    }

    /// Adds a child under `parent` and returns its path.
    pub fn add_node(&mut self, parent: &str, name: &str, kind: &str) -> Result<String, SceneError> {
        if !is_valid_name(name) {
            return Err(SceneError::InvalidName { name: name.to_owned() });
        }
        let indices = self.locate(parent)?;
        let node = self.root.walk_mut(&indices);
        if node.child_index(name).is_some() {
            return Err(SceneError::NameTaken {
                parent: parent.to_owned(),
                name: name.to_owned(),
            });
        }
        node.children.push(Node::new(name, kind));
        Ok(format!("{}/{name}", parent.trim_end_matches('/')))
    }

    /// Replaces the selection.
    pub fn select<I, S>(&mut self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selection = paths.into_iter().map(Into::into).collect();
    }

    fn locate(&self, path: &str) -> Result<Vec<usize>, SceneError> {
        let invalid = || SceneError::InvalidPath { path: path.to_owned() };
        let trimmed = path.strip_prefix('/').ok_or_else(invalid)?;
        let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
        let mut segments = trimmed.split('/');
        let first = segments.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        if first != self.root.name {
            return Err(SceneError::NodeNotFound { path: path.to_owned() });
        }
        let mut node = &self.root;
        let mut indices = Vec::new();
        for segment in segments {
            if segment.is_empty() {
                return Err(invalid());
            }
            let index = node
                .child_index(segment)
                .ok_or_else(|| SceneError::NodeNotFound { path: path.to_owned() })?;
            indices.push(index);
            node = &node.children[index];
        }
        Ok(indices)
    }

    fn node(&self, path: &str) -> Result<&Node, SceneError> {
        let indices = self.locate(path)?;
        Ok(self.root.walk(&indices))
    }

    fn path_of(&self, indices: &[usize]) -> String {
        let mut path = format!("/{}", self.root.name);
        let mut node = &self.root;
        for &index in indices {
            node = &node.children[index];
            path.push('/');
            path.push_str(&node.name);
        }
        path
    }

    fn unique_child_name(parent: &Node, base: &str) -> String {
        (2..)
            .map(|n| format!("{base}{n}"))
            .find(|candidate| parent.child_index(candidate).is_none())
            .unwrap_or_else(|| base.to_owned())
    }
}

fn validate_property(property: &str, value: &Value) -> Result<(), SceneError> {
    let invalid = |reason: &str| SceneError::InvalidValue {
        property: property.to_owned(),
        reason: reason.to_owned(),
    };
    if property.trim().is_empty() {
        return Err(invalid("property name is empty"));
    }
    if READ_ONLY_PROPERTIES.contains(&property) {
        return Err(SceneError::ReadOnlyProperty {
            property: property.to_owned(),
        });
    }
    if VECTOR_PROPERTIES.contains(&property) {
        let ok = value.as_array().is_some_and(|items| {
            items.len() == 3
                && items
                    .iter()
                    .all(|item| item.as_f64().is_some_and(f64::is_finite))
        });
        if !ok {
            return Err(invalid("expected an array of three finite numbers"));
        }
    }
    if property == "visible" && !value.is_boolean() {
        return Err(invalid("expected a boolean"));
    }
    Ok(())
}

impl SceneGraph for MemorySceneGraph {
    fn host_version(&self) -> String {
        format!("stagehand memory scene {}", env!("CARGO_PKG_VERSION"))
    }

    fn query(&self, path: &str, depth: Option<usize>) -> Result<SceneNode, SceneError> {
        let indices = self.locate(path)?;
        Ok(self.root.walk(&indices).listing(self.path_of(&indices), depth))
    }

    fn node_properties(&self, path: &str) -> Result<Map<String, Value>, SceneError> {
        let indices = self.locate(path)?;
        let node = self.root.walk(&indices);
        let mut properties = Map::new();
        properties.insert("name".into(), Value::String(node.name.clone()));
        properties.insert("type".into(), Value::String(node.kind.clone()));
        properties.insert("path".into(), Value::String(self.path_of(&indices)));
        properties.insert("child_count".into(), Value::from(node.children.len()));
        properties.extend(node.properties.clone());
        Ok(properties)
    }

    fn update_node_property(
        &mut self,
        path: &str,
        property: &str,
        value: Value,
    ) -> Result<(), SceneError> {
        let indices = self.locate(path)?;
        validate_property(property, &value)?;
        self.root
            .walk_mut(&indices)
            .properties
            .insert(property.to_owned(), value);
        Ok(())
    }

    fn duplicate_node(&mut self, path: &str, new_name: Option<&str>) -> Result<String, SceneError> {
        let indices = self.locate(path)?;
        let Some((&index, parent_indices)) = indices.split_last() else {
            return Err(SceneError::RootImmutable { action: "duplicated" });
        };
        let parent_path = self.path_of(parent_indices);
        let parent = self.root.walk_mut(parent_indices);
        let mut copy = parent.children[index].clone();
        copy.name = match new_name {
            Some(name) if !is_valid_name(name) => {
                return Err(SceneError::InvalidName { name: name.to_owned() });
            }
            Some(name) if parent.child_index(name).is_some() => {
                return Err(SceneError::NameTaken {
                    parent: parent_path,
                    name: name.to_owned(),
                });
            }
            Some(name) => name.to_owned(),
            None => Self::unique_child_name(parent, &copy.name),
        };
        let copy_path = format!("{parent_path}/{}", copy.name);
        parent.children.insert(index + 1, copy);
        debug!(target: SCENE_TARGET, source = path, copy = %copy_path, "node duplicated");
        Ok(copy_path)
    }

    fn save_scene(&mut self, path: Option<&Utf8Path>) -> Result<Utf8PathBuf, SceneError> {
        let target = path
            .map(Utf8Path::to_path_buf)
            .or_else(|| self.scene_path.clone())
            .ok_or(SceneError::NoScenePath)?;
        let text = serde_json::to_string_pretty(&self.root)?;
        fs::write(&target, text).map_err(|source| SceneError::Write {
            path: target.clone(),
            source,
        })?;
        if self.scene_path.is_none() {
            self.scene_path = Some(target.clone());
        }
        Ok(target)
    }

    fn bounding_box(&self, path: &str) -> Result<BoundingBox, SceneError> {
        let indices = self.locate(path)?;
        let parent_indices = &indices[..indices.len().saturating_sub(1)];
        let mut origin = [0.0; 3];
        if !indices.is_empty() {
            origin = self.root.vector("position", 0.0);
            let mut node = &self.root;
            for &index in parent_indices {
                node = &node.children[index];
                origin = add(origin, node.vector("position", 0.0));
            }
        }
        Ok(self.root.walk(&indices).bounds(origin))
    }

    fn selection(&self) -> Vec<String> {
        self.selection
            .iter()
            .filter(|path| self.node(path).is_ok())
            .cloned()
            .collect()
    }

    fn import_document_as_group(
        &mut self,
        request: &ImportRequest,
    ) -> Result<ImportOutcome, SceneError> {
        if !is_valid_name(&request.group_name) {
            return Err(SceneError::InvalidName {
                name: request.group_name.clone(),
            });
        }
        let mut group = Node::new(&request.group_name, "Node3D");
        group.properties.insert(
            "source_file".into(),
            Value::String(request.file_path.to_string()),
        );
        group
            .properties
            .insert("stage_generation".into(), json!(request.generation));

        let mut prims: Vec<_> = request.prims.iter().collect();
        prims.sort_by(|a, b| a.path.cmp(&b.path));
        for prim in prims {
            let segments: Vec<&str> = prim.path.split('/').filter(|s| !s.is_empty()).collect();
            if segments.is_empty() {
                continue;
            }
            let mut node = &mut group;
            for segment in segments {
                let index = match node.child_index(segment) {
                    Some(index) => index,
                    None => {
                        node.children.push(Node::new(segment, "Node3D"));
                        node.children.len() - 1
                    }
                };
                node = &mut node.children[index];
            }
            let kind = node_kind(&prim.prim_type);
            if node.kind != kind {
                let mut typed = Node::new(&node.name, kind);
                typed.children = std::mem::take(&mut node.children);
                *node = typed;
            }
            node.properties
                .insert("prim_path".into(), Value::String(prim.path.clone()));
            node.properties
                .insert("prim_type".into(), Value::String(prim.prim_type.clone()));
        }

        let node_count = group.count();
        let group_path = format!("/{}/{}", self.root.name, request.group_name);
        let replaced = match self.root.child_index(&request.group_name) {
            Some(index) => {
                self.root.children[index] = group;
                true
            }
            None => {
                self.root.children.push(group);
                false
            }
        };
        debug!(
            target: SCENE_TARGET,
            group = %group_path,
            node_count,
            replaced,
            "stage imported as scene group"
        );
        Ok(ImportOutcome {
            group_path,
            node_count,
            replaced,
        })
    }
}
