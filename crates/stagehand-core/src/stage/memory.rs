//! Reference document engine holding prims in memory and persisting JSON.

use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use super::engine::{AttributeValue, DocumentEngine, PrimSummary, StageDocument, Transform};
use super::errors::EngineError;

const FORMAT_TAG: &str = "stagehand-stage";
const FORMAT_VERSION: u32 = 1;

/// Engine producing [`MemoryDocument`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryDocumentEngine;

impl MemoryDocumentEngine {
    /// Builds the engine.
    pub fn new() -> Self {
        Self
    }
}

impl DocumentEngine for MemoryDocumentEngine {
    fn name(&self) -> &str {
        "memory"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn create(&self, path: Option<&Utf8Path>) -> Result<Box<dyn StageDocument>, EngineError> {
        if let Some(path) = path {
            let parent_exists = path
                .parent()
                .is_none_or(|parent| parent.as_str().is_empty() || parent.is_dir());
            if !parent_exists {
                return Err(EngineError::MissingParent {
                    path: path.to_owned(),
                });
            }
        }
        Ok(Box::new(MemoryDocument {
            path: path.map(Utf8Path::to_owned),
            body: DocumentBody::default(),
        }))
    }

    fn open(&self, path: &Utf8Path) -> Result<Box<dyn StageDocument>, EngineError> {
        let text = fs::read_to_string(path).map_err(|source| EngineError::Read {
            path: path.to_owned(),
            source,
        })?;
        let body: DocumentBody =
            serde_json::from_str(&text).map_err(|source| EngineError::Decode {
                path: path.to_owned(),
                source,
            })?;
        Ok(Box::new(MemoryDocument {
            path: Some(path.to_owned()),
            body,
        }))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DocumentBody {
    format: String,
    version: u32,
    prims: BTreeMap<String, PrimData>,
}

impl Default for DocumentBody {
    fn default() -> Self {
        Self {
            format: FORMAT_TAG.to_owned(),
            version: FORMAT_VERSION,
            prims: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PrimData {
    #[serde(default, rename = "type")]
    prim_type: String,
    #[serde(default)]
    attributes: BTreeMap<String, AttributeValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transform: Option<Transform>,
}

/// Document produced by [`MemoryDocumentEngine`].
#[derive(Debug)]
pub struct MemoryDocument {
    path: Option<Utf8PathBuf>,
    body: DocumentBody,
}

impl MemoryDocument {
    fn prim_mut(&mut self, path: &str) -> Result<&mut PrimData, EngineError> {
        self.body
            .prims
            .get_mut(path)
            .ok_or_else(|| EngineError::PrimNotFound {
                path: path.to_owned(),
            })
    }

    fn write_to(&self, path: &Utf8Path) -> Result<(), EngineError> {
        let text = self.export_text()?;
        fs::write(path, text).map_err(|source| EngineError::Write {
            path: path.to_owned(),
            source,
        })
    }
}

impl StageDocument for MemoryDocument {
    fn define_prim(&mut self, path: &str, prim_type: &str) -> Result<(), EngineError> {
        let ancestors = validate_prim_path(path)?;
        for ancestor in ancestors {
            self.body.prims.entry(ancestor).or_default();
        }
        let prim = self.body.prims.entry(path.to_owned()).or_default();
        if !prim_type.is_empty() {
            prim.prim_type = prim_type.to_owned();
        }
        Ok(())
    }

    fn set_attribute(
        &mut self,
        prim_path: &str,
        name: &str,
        value: AttributeValue,
    ) -> Result<(), EngineError> {
        if !is_attribute_name(name) {
            return Err(EngineError::InvalidAttributeName {
                name: name.to_owned(),
            });
        }
        validate_value(&value)?;
        let prim = self.prim_mut(prim_path)?;
        prim.attributes.insert(name.to_owned(), value);
        Ok(())
    }

    fn attribute(&self, prim_path: &str, name: &str) -> Result<AttributeValue, EngineError> {
        let prim = self
            .body
            .prims
            .get(prim_path)
            .ok_or_else(|| EngineError::PrimNotFound {
                path: prim_path.to_owned(),
            })?;
        prim.attributes
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::AttributeNotFound {
                prim_path: prim_path.to_owned(),
                name: name.to_owned(),
            })
    }

    fn set_transform(&mut self, prim_path: &str, transform: &Transform) -> Result<(), EngineError> {
        let finite = transform
            .translate
            .iter()
            .chain(&transform.rotate)
            .chain(&transform.scale)
            .all(|component| component.is_finite());
        if !finite {
            return Err(EngineError::NonFiniteTransform {
                prim_path: prim_path.to_owned(),
            });
        }
        let prim = self.prim_mut(prim_path)?;
        prim.transform = Some(*transform);
        Ok(())
    }

    fn prims(&self) -> Vec<PrimSummary> {
        self.body
            .prims
            .iter()
            .map(|(path, prim)| PrimSummary {
                path: path.clone(),
                prim_type: prim.prim_type.clone(),
            })
            .collect()
    }

    fn save(&mut self) -> Result<(), EngineError> {
        match &self.path {
            Some(path) => self.write_to(path),
            None => Ok(()),
        }
    }

    fn export(&self, path: &Utf8Path) -> Result<(), EngineError> {
        self.write_to(path)
    }

    fn export_text(&self) -> Result<String, EngineError> {
        serde_json::to_string_pretty(&self.body).map_err(|source| EngineError::Encode { source })
    }
}

/// Validates an absolute prim path and returns its proper ancestors,
/// outermost first.
fn validate_prim_path(path: &str) -> Result<Vec<String>, EngineError> {
    let invalid = || EngineError::InvalidPrimPath {
        path: path.to_owned(),
    };
    let relative = path.strip_prefix('/').ok_or_else(invalid)?;
    if relative.is_empty() {
        return Err(invalid());
    }
    let mut ancestors = Vec::new();
    let mut current = String::new();
    for segment in relative.split('/') {
        if !is_identifier(segment) {
            return Err(invalid());
        }
        if !current.is_empty() {
            ancestors.push(current.clone());
        }
        current.push('/');
        current.push_str(segment);
    }
    Ok(ancestors)
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Attribute names are identifiers optionally namespaced with `:`.
fn is_attribute_name(name: &str) -> bool {
    !name.is_empty() && name.split(':').all(is_identifier)
}

fn validate_value(value: &AttributeValue) -> Result<(), EngineError> {
    let text = value.value.trim();
    let valid = match value.value_type.as_str() {
        "string" | "token" | "asset" => true,
        "bool" => matches!(text, "true" | "false" | "0" | "1"),
        "int" | "int64" => text.parse::<i64>().is_ok(),
        "uint" | "uint64" => text.parse::<u64>().is_ok(),
        "half" | "float" | "double" => text.parse::<f64>().is_ok(),
        "float2" | "double2" => parses_tuple(text, 2),
        "float3" | "double3" | "color3f" | "point3f" | "vector3f" | "normal3f" => {
            parses_tuple(text, 3)
        }
        "float4" | "double4" | "color4f" | "quatf" | "quatd" => parses_tuple(text, 4),
        other => {
            return Err(EngineError::UnsupportedValueType {
                value_type: other.to_owned(),
            });
        }
    };
    if valid {
        Ok(())
    } else {
        Err(EngineError::InvalidValue {
            value_type: value.value_type.clone(),
            value: value.value.clone(),
        })
    }
}

/// Accepts `x, y, z` optionally wrapped in parentheses or brackets.
fn parses_tuple(text: &str, arity: usize) -> bool {
    let inner = text
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
        .or_else(|| text.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')))
        .unwrap_or(text);
    let parts: Vec<&str> = inner.split(',').map(str::trim).collect();
    parts.len() == arity && parts.iter().all(|part| part.parse::<f64>().is_ok())
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::*;

    #[fixture]
    fn document() -> Box<dyn StageDocument> {
        MemoryDocumentEngine::new()
            .create(None)
            .expect("in-memory document")
    }

    #[rstest]
    fn define_prim_creates_untyped_ancestors(mut document: Box<dyn StageDocument>) {
        document
            .define_prim("/World/Car/Wheel", "Mesh")
            .expect("define prim");
        let prims = document.prims();
        let paths: Vec<&str> = prims.iter().map(|prim| prim.path.as_str()).collect();
        assert_eq!(paths, ["/World", "/World/Car", "/World/Car/Wheel"]);
        assert_eq!(prims.last().map(|prim| prim.prim_type.as_str()), Some("Mesh"));
        assert_eq!(prims.first().map(|prim| prim.prim_type.as_str()), Some(""));
    }

    #[rstest]
    #[case("World")]
    #[case("/")]
    #[case("/World//Car")]
    #[case("/World/1car")]
    fn define_prim_rejects_malformed_paths(
        mut document: Box<dyn StageDocument>,
        #[case] path: &str,
    ) {
        let error = document.define_prim(path, "Xform").expect_err("path rejected");
        assert!(matches!(error, EngineError::InvalidPrimPath { .. }));
    }

    #[rstest]
    #[case("float", "1.5")]
    #[case("double3", "(1, 2.5, -3)")]
    #[case("bool", "true")]
    #[case("string", "anything at all")]
    fn accepts_well_formed_values(
        mut document: Box<dyn StageDocument>,
        #[case] value_type: &str,
        #[case] value: &str,
    ) {
        document.define_prim("/A", "Xform").expect("define prim");
        document
            .set_attribute("/A", "custom:value", AttributeValue::new(value_type, value))
            .expect("value accepted");
        let stored = document.attribute("/A", "custom:value").expect("read back");
        assert_eq!(stored.value, value);
    }

    #[rstest]
    #[case("float", "fast", false)]
    #[case("double3", "1, 2", false)]
    #[case("matrix9d", "0", true)]
    fn rejects_bad_values(
        mut document: Box<dyn StageDocument>,
        #[case] value_type: &str,
        #[case] value: &str,
        #[case] unsupported: bool,
    ) {
        document.define_prim("/A", "Xform").expect("define prim");
        let error = document
            .set_attribute("/A", "size", AttributeValue::new(value_type, value))
            .expect_err("value rejected");
        if unsupported {
            assert!(matches!(error, EngineError::UnsupportedValueType { .. }));
        } else {
            assert!(matches!(error, EngineError::InvalidValue { .. }));
        }
    }

    #[rstest]
    fn attribute_on_missing_prim_fails(document: Box<dyn StageDocument>) {
        let error = document.attribute("/Missing", "size").expect_err("no prim");
        assert!(matches!(error, EngineError::PrimNotFound { .. }));
    }

    #[rstest]
    fn transform_rejects_non_finite_components(mut document: Box<dyn StageDocument>) {
        document.define_prim("/A", "Xform").expect("define prim");
        let transform = Transform {
            translate: [f64::NAN, 0.0, 0.0],
            ..Transform::default()
        };
        let error = document
            .set_transform("/A", &transform)
            .expect_err("nan rejected");
        assert!(matches!(error, EngineError::NonFiniteTransform { .. }));
    }

    #[rstest]
    fn saved_documents_reopen_with_their_prims() {
        let dir = TempDir::new().expect("temp dir");
        let path = Utf8PathBuf::from_path_buf(dir.path().join("scene.usda")).expect("utf8 path");
        let engine = MemoryDocumentEngine::new();
        let mut document = engine.create(Some(path.as_path())).expect("create");
        document.define_prim("/World/Cube", "Cube").expect("define");
        document.save().expect("save");

        let reopened = engine.open(&path).expect("open");
        assert_eq!(reopened.prims(), document.prims());
    }

    #[rstest]
    fn create_rejects_missing_parent_directory() {
        let error = MemoryDocumentEngine::new()
            .create(Some(Utf8Path::new("/definitely/not/here/scene.usda")))
            .err()
            .expect("missing parent rejected");
        assert!(matches!(error, EngineError::MissingParent { .. }));
    }

    #[rstest]
    fn open_rejects_foreign_files() {
        let dir = TempDir::new().expect("temp dir");
        let path = Utf8PathBuf::from_path_buf(dir.path().join("notes.txt")).expect("utf8 path");
        fs::write(&path, "not a stage").expect("write file");
        let error = MemoryDocumentEngine::new()
            .open(&path)
            .err()
            .expect("foreign file rejected");
        assert!(matches!(error, EngineError::Decode { .. }));
    }
}
