//! Persistent associations between stage files and scene groups.
//!
//! The table is stored as JSON:
//!
//! ```json
//! {"version":1,"mappings":[{"file_path":"/f.usd","group_name":"car","last_generation":3}]}
//! ```
//!
//! Every mutation writes the whole table to a temporary file beside the
//! target and renames it into place before the call returns. The in-memory
//! table only changes once the write has succeeded.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::sync::{Mutex, MutexGuard};

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

const MAPPING_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::mapping");
const FORMAT_VERSION: u32 = 1;

/// Association between a stage file and the scene group it was reflected
/// into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMapping {
    /// Stage file; the key of the table.
    pub file_path: Utf8PathBuf,
    /// Scene group holding the reflected content.
    pub group_name: String,
    /// Stage generation at the last successful reflect.
    pub last_generation: u64,
}

/// Failures reported while persisting the table.
#[derive(Debug, Error)]
pub enum MappingError {
    /// Writing the table to disk failed.
    #[error("failed to persist group mappings to '{path}': {source}")]
    Persist {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    /// Serialising the table failed.
    #[error("failed to serialise group mappings: {0}")]
    Encode(#[from] serde_json::Error),
    /// A previous holder of the store lock panicked.
    #[error("group mapping lock poisoned")]
    Poisoned,
}

#[derive(Serialize)]
struct PersistedTable<'a> {
    version: u32,
    mappings: Vec<&'a GroupMapping>,
}

#[derive(Deserialize)]
struct LoadedTable {
    #[serde(default)]
    version: Option<u32>,
    mappings: Vec<LoadedRecord>,
}

#[derive(Deserialize)]
struct LoadedRecord {
    #[serde(default)]
    file_path: Option<Utf8PathBuf>,
    #[serde(default)]
    group_name: Option<String>,
    #[serde(default)]
    last_generation: Option<u64>,
}

type Table = BTreeMap<Utf8PathBuf, GroupMapping>;

/// Thread-safe, write-through group-mapping table.
pub struct GroupMappingStore {
    path: Utf8PathBuf,
    table: Mutex<Table>,
}

impl GroupMappingStore {
    /// Loads the table stored at `path`.
    ///
    /// A missing file yields an empty table. An unreadable or malformed file
    /// also yields an empty table and logs a warning; loading never fails.
    pub fn open(path: impl Into<Utf8PathBuf>) -> Self {
        let path = path.into();
        let table = load_table(&path);
        debug!(
            target: MAPPING_TARGET,
            path = %path,
            count = table.len(),
            "group mappings loaded"
        );
        Self {
            path,
            table: Mutex::new(table),
        }
    }

    /// File the table is persisted to.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Associates `file_path` with `group_name`. Re-mapping an existing file
    /// keeps its recorded generation.
    ///
    /// # Errors
    ///
    /// Returns an error when the table cannot be persisted; the mapping is
    /// left unchanged in that case.
    pub fn set(&self, file_path: &Utf8Path, group_name: &str) -> Result<(), MappingError> {
        self.mutate(|table| {
            table
                .entry(file_path.to_owned())
                .and_modify(|mapping| mapping.group_name = group_name.to_owned())
                .or_insert_with(|| GroupMapping {
                    file_path: file_path.to_owned(),
                    group_name: group_name.to_owned(),
                    last_generation: 0,
                });
            true
        })
        .map(|_| ())
    }

    /// Returns the mapping for `file_path`.
    ///
    /// # Errors
    ///
    /// Fails only when the lock is poisoned.
    pub fn get(&self, file_path: &Utf8Path) -> Result<Option<GroupMapping>, MappingError> {
        Ok(self.lock()?.get(file_path).cloned())
    }

    /// Returns the group mapped to `file_path`.
    ///
    /// # Errors
    ///
    /// Fails only when the lock is poisoned.
    pub fn get_group_name(&self, file_path: &Utf8Path) -> Result<Option<String>, MappingError> {
        Ok(self
            .lock()?
            .get(file_path)
            .map(|mapping| mapping.group_name.clone()))
    }

    /// Whether `file_path` has a mapping.
    ///
    /// # Errors
    ///
    /// Fails only when the lock is poisoned.
    pub fn has(&self, file_path: &Utf8Path) -> Result<bool, MappingError> {
        Ok(self.lock()?.contains_key(file_path))
    }

    /// Whether the stage changed since its last reflect. Unmapped files never
    /// need an update.
    ///
    /// # Errors
    ///
    /// Fails only when the lock is poisoned.
    pub fn needs_update(
        &self,
        file_path: &Utf8Path,
        current_generation: u64,
    ) -> Result<bool, MappingError> {
        Ok(self
            .lock()?
            .get(file_path)
            .is_some_and(|mapping| current_generation > mapping.last_generation))
    }

    /// Records the generation reflected for `file_path`. Returns `false`
    /// without writing when the file is unmapped.
    ///
    /// # Errors
    ///
    /// Returns an error when the table cannot be persisted.
    pub fn update_generation(
        &self,
        file_path: &Utf8Path,
        generation: u64,
    ) -> Result<bool, MappingError> {
        self.mutate(|table| match table.get_mut(file_path) {
            Some(mapping) => {
                mapping.last_generation = generation;
                true
            }
            None => false,
        })
    }

    /// Deletes the mapping for `file_path`. Returns `false` when there was
    /// none.
    ///
    /// # Errors
    ///
    /// Returns an error when the table cannot be persisted.
    pub fn remove(&self, file_path: &Utf8Path) -> Result<bool, MappingError> {
        self.mutate(|table| table.remove(file_path).is_some())
    }

    /// Every mapping, ordered by file path.
    ///
    /// # Errors
    ///
    /// Fails only when the lock is poisoned.
    pub fn list(&self) -> Result<Vec<GroupMapping>, MappingError> {
        Ok(self.lock()?.values().cloned().collect())
    }

    /// Applies `change` to a copy of the table and, when it reports a change,
    /// persists the copy before installing it.
    fn mutate<F>(&self, change: F) -> Result<bool, MappingError>
    where
        F: FnOnce(&mut Table) -> bool,
    {
        let mut table = self.lock()?;
        let mut next = table.clone();
        if !change(&mut next) {
            return Ok(false);
        }
        persist(&self.path, &next)?;
        *table = next;
        Ok(true)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Table>, MappingError> {
        self.table.lock().map_err(|_| MappingError::Poisoned)
    }
}

fn load_table(path: &Utf8Path) -> Table {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Table::new(),
        Err(error) => {
            warn!(
                target: MAPPING_TARGET,
                path = %path,
                error = %error,
                "group mapping file unreadable; starting empty"
            );
            return Table::new();
        }
    };
    let loaded: LoadedTable = match serde_json::from_str(&text) {
        Ok(loaded) => loaded,
        Err(error) => {
            warn!(
                target: MAPPING_TARGET,
                path = %path,
                error = %error,
                "group mapping file malformed; starting empty"
            );
            return Table::new();
        }
    };
    if loaded.version.is_some_and(|version| version > FORMAT_VERSION) {
        warn!(
            target: MAPPING_TARGET,
            path = %path,
            version = ?loaded.version,
            "group mapping file written by a newer format"
        );
    }
    loaded
        .mappings
        .into_iter()
        .filter_map(|record| {
            let file_path = record.file_path.filter(|path| !path.as_str().is_empty())?;
            let group_name = record.group_name?;
            Some((
                file_path.clone(),
                GroupMapping {
                    file_path,
                    group_name,
                    last_generation: record.last_generation.unwrap_or(0),
                },
            ))
        })
        .collect()
}

fn persist(path: &Utf8Path, table: &Table) -> Result<(), MappingError> {
    let document = PersistedTable {
        version: FORMAT_VERSION,
        mappings: table.values().collect(),
    };
    let mut text = serde_json::to_string_pretty(&document)?;
    text.push('\n');

    let persist_error = |source: io::Error| MappingError::Persist {
        path: path.to_owned(),
        source,
    };
    let directory = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    fs::create_dir_all(directory).map_err(persist_error)?;
    let mut file = NamedTempFile::new_in(directory).map_err(persist_error)?;
    file.write_all(text.as_bytes()).map_err(persist_error)?;
    file.as_file().sync_all().map_err(persist_error)?;
    file.persist(path).map_err(|error| persist_error(error.error))?;
    debug!(target: MAPPING_TARGET, path = %path, count = table.len(), "group mappings persisted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::*;

    struct Fixture {
        _dir: TempDir,
        path: Utf8PathBuf,
    }

    #[fixture]
    fn location() -> Fixture {
        let dir = TempDir::new().expect("temp dir");
        let path = Utf8PathBuf::from_path_buf(dir.path().join(".usd_stage_mappings.json"))
            .expect("utf8 path");
        Fixture { _dir: dir, path }
    }

    #[rstest]
    fn set_then_get_returns_group(location: Fixture) {
        let store = GroupMappingStore::open(location.path.clone());
        store
            .set(Utf8Path::new("/f.usd"), "car_group")
            .expect("set");
        assert_eq!(
            store.get_group_name(Utf8Path::new("/f.usd")).expect("get"),
            Some("car_group".to_owned())
        );
        assert!(store.has(Utf8Path::new("/f.usd")).expect("has"));
    }

    #[rstest]
    fn unmapped_files_never_need_update(location: Fixture) {
        let store = GroupMappingStore::open(location.path.clone());
        for generation in [0, 1, u64::MAX] {
            assert!(!store
                .needs_update(Utf8Path::new("/nothing.usd"), generation)
                .expect("needs_update"));
        }
    }

    #[rstest]
    fn staleness_compares_against_last_reflect(location: Fixture) {
        let store = GroupMappingStore::open(location.path.clone());
        let file = Utf8Path::new("/f.usd");
        store.set(file, "group").expect("set");
        assert!(store.needs_update(file, 1).expect("needs_update"));

        assert!(store.update_generation(file, 4).expect("update"));
        assert!(!store.needs_update(file, 4).expect("needs_update"));
        assert!(store.needs_update(file, 5).expect("needs_update"));
    }

    #[rstest]
    fn remapping_keeps_generation(location: Fixture) {
        let store = GroupMappingStore::open(location.path.clone());
        let file = Utf8Path::new("/f.usd");
        store.set(file, "first").expect("set");
        store.update_generation(file, 3).expect("update");
        store.set(file, "second").expect("re-set");

        let mapping = store.get(file).expect("get").expect("mapping present");
        assert_eq!(mapping.group_name, "second");
        assert_eq!(mapping.last_generation, 3);
    }

    #[rstest]
    fn update_generation_ignores_unmapped_files(location: Fixture) {
        let store = GroupMappingStore::open(location.path.clone());
        assert!(!store
            .update_generation(Utf8Path::new("/f.usd"), 2)
            .expect("update"));
        assert!(!location.path.exists());
    }

    #[rstest]
    fn reload_reproduces_mappings(location: Fixture) {
        let store = GroupMappingStore::open(location.path.clone());
        store.set(Utf8Path::new("/a.usd"), "a").expect("set a");
        store.set(Utf8Path::new("/b.usd"), "b").expect("set b");
        store
            .update_generation(Utf8Path::new("/b.usd"), 8)
            .expect("update");
        store.remove(Utf8Path::new("/a.usd")).expect("remove");

        let reloaded = GroupMappingStore::open(location.path.clone());
        assert_eq!(reloaded.list().expect("list"), store.list().expect("list"));
        assert_eq!(reloaded.list().expect("list").len(), 1);
    }

    #[rstest]
    fn persisted_file_carries_version(location: Fixture) {
        let store = GroupMappingStore::open(location.path.clone());
        store.set(Utf8Path::new("/a.usd"), "a").expect("set");
        let text = fs::read_to_string(&location.path).expect("read file");
        let value: serde_json::Value = serde_json::from_str(&text).expect("json");
        assert_eq!(value["version"], 1);
        assert_eq!(value["mappings"][0]["group_name"], "a");
        assert_eq!(value["mappings"][0]["last_generation"], 0);
    }

    #[rstest]
    #[case("{not json")]
    #[case("{\"version\":1}")]
    #[case("[]")]
    fn corrupt_files_load_empty(location: Fixture, #[case] contents: &str) {
        fs::write(&location.path, contents).expect("write corrupt file");
        let store = GroupMappingStore::open(location.path.clone());
        assert!(store.list().expect("list").is_empty());
    }

    #[rstest]
    fn incomplete_records_are_skipped(location: Fixture) {
        fs::write(
            &location.path,
            r#"{"version":1,"mappings":[{"file_path":"/a.usd"},{"file_path":"/b.usd","group_name":"b"}]}"#,
        )
        .expect("write file");
        let store = GroupMappingStore::open(location.path.clone());
        let mappings = store.list().expect("list");
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings.first().map(|m| m.last_generation), Some(0));
    }
}
