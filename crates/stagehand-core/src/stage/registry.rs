//! Registry owning every stage record.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::debug;

use super::STAGE_TARGET;
use super::engine::{AttributeValue, DocumentEngine, PrimSummary, StageDocument, Transform};
use super::errors::{EngineError, RegistryError};
use super::handle::StageHandle;

/// A stage tracked by the registry.
///
/// Records are only reachable through [`StageRegistry::with_record`], so a
/// reference never outlives the registry lock.
pub struct StageRecord {
    handle: StageHandle,
    file_path: Option<Utf8PathBuf>,
    generation: u64,
    document: Option<Box<dyn StageDocument>>,
}

impl StageRecord {
    /// Handle addressing this record.
    pub fn handle(&self) -> StageHandle {
        self.handle
    }

    /// Backing file, or `None` for in-memory stages.
    pub fn file_path(&self) -> Option<&Utf8Path> {
        self.file_path.as_deref()
    }

    /// Whether the document is currently resident.
    pub fn is_loaded(&self) -> bool {
        self.document.is_some()
    }

    /// Count of content mutations applied through the registry.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn summary(&self) -> StageSummary {
        StageSummary {
            handle: self.handle,
            file_path: self.file_path.clone(),
            loaded: self.is_loaded(),
            generation: self.generation,
        }
    }
}

/// Prims of a stage together with the generation they belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSnapshot {
    /// Handle of the record the snapshot was taken from.
    pub handle: StageHandle,
    /// Generation the prims reflect.
    pub generation: u64,
    /// Every prim in the stage.
    pub prims: Vec<PrimSummary>,
}

/// Snapshot of a record, detached from the registry lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageSummary {
    /// Handle addressing the record.
    pub handle: StageHandle,
    /// Backing file, if any.
    pub file_path: Option<Utf8PathBuf>,
    /// Whether the document was resident when the snapshot was taken.
    pub loaded: bool,
    /// Generation at snapshot time.
    pub generation: u64,
}

struct Inner {
    records: BTreeMap<StageHandle, StageRecord>,
    next_handle: u64,
}

impl Inner {
    fn allocate(&mut self) -> Result<StageHandle, RegistryError> {
        let handle =
            StageHandle::from_raw(self.next_handle).ok_or(RegistryError::HandlesExhausted)?;
        self.next_handle = self
            .next_handle
            .checked_add(1)
            .ok_or(RegistryError::HandlesExhausted)?;
        Ok(handle)
    }

    fn record_mut(&mut self, handle: StageHandle) -> Result<&mut StageRecord, RegistryError> {
        self.records
            .get_mut(&handle)
            .ok_or(RegistryError::StageNotFound { handle })
    }
}

/// Thread-safe map from [`StageHandle`]s to stage records.
///
/// Every method takes the single registry lock for its full duration,
/// including any document load or save it triggers. Handles are allocated
/// from a counter that starts at one and never reuses a value.
pub struct StageRegistry {
    engine: Arc<dyn DocumentEngine>,
    inner: Mutex<Inner>,
}

impl StageRegistry {
    /// Builds an empty registry backed by `engine`.
    pub fn new(engine: Arc<dyn DocumentEngine>) -> Self {
        Self {
            engine,
            inner: Mutex::new(Inner {
                records: BTreeMap::new(),
                next_handle: 1,
            }),
        }
    }

    /// Engine producing this registry's documents.
    pub fn engine(&self) -> &dyn DocumentEngine {
        self.engine.as_ref()
    }

    /// Creates a document, in memory when `path` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Engine`] when the engine rejects the path; no
    /// record is retained in that case.
    pub fn create(&self, path: Option<&Utf8Path>) -> Result<StageHandle, RegistryError> {
        let mut inner = self.lock()?;
        let document = self.engine.create(path)?;
        let handle = inner.allocate()?;
        inner.records.insert(
            handle,
            StageRecord {
                handle,
                file_path: path.map(Utf8Path::to_owned),
                generation: 0,
                document: Some(document),
            },
        );
        debug!(target: STAGE_TARGET, %handle, path = ?path, "stage created");
        Ok(handle)
    }

    /// Loads an existing document from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Engine`] when the file cannot be loaded; no
    /// record is retained in that case.
    pub fn open(&self, path: &Utf8Path) -> Result<StageHandle, RegistryError> {
        let mut inner = self.lock()?;
        let document = self.engine.open(path)?;
        let handle = inner.allocate()?;
        inner.records.insert(
            handle,
            StageRecord {
                handle,
                file_path: Some(path.to_owned()),
                generation: 0,
                document: Some(document),
            },
        );
        debug!(target: STAGE_TARGET, %handle, %path, "stage opened");
        Ok(handle)
    }

    /// Catalogues `path` without loading it. The document is read on first
    /// access.
    ///
    /// # Errors
    ///
    /// Fails only when the lock is poisoned or handles are exhausted.
    pub fn register(&self, path: &Utf8Path, generation: u64) -> Result<StageHandle, RegistryError> {
        let mut inner = self.lock()?;
        let handle = inner.allocate()?;
        inner.records.insert(
            handle,
            StageRecord {
                handle,
                file_path: Some(path.to_owned()),
                generation,
                document: None,
            },
        );
        debug!(target: STAGE_TARGET, %handle, %path, generation, "stage registered");
        Ok(handle)
    }

    /// Drops the record. Returns `false` when the handle was unknown.
    ///
    /// # Errors
    ///
    /// Fails only when the lock is poisoned.
    pub fn close(&self, handle: StageHandle) -> Result<bool, RegistryError> {
        let removed = self.lock()?.records.remove(&handle).is_some();
        if removed {
            debug!(target: STAGE_TARGET, %handle, "stage closed");
        }
        Ok(removed)
    }

    /// Releases the document while keeping the record catalogued.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NoBackingFile`] for in-memory stages, whose
    /// content could not be reloaded.
    pub fn unload(&self, handle: StageHandle) -> Result<(), RegistryError> {
        let mut inner = self.lock()?;
        let record = inner.record_mut(handle)?;
        if record.file_path.is_none() {
            return Err(RegistryError::NoBackingFile { handle });
        }
        record.document = None;
        debug!(target: STAGE_TARGET, %handle, "stage unloaded");
        Ok(())
    }

    /// Runs `f` against the record while holding the registry lock.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::StageNotFound`] for unknown handles.
    pub fn with_record<F, R>(&self, handle: StageHandle, f: F) -> Result<R, RegistryError>
    where
        F: FnOnce(&StageRecord) -> R,
    {
        let mut inner = self.lock()?;
        let record = inner.record_mut(handle)?;
        Ok(f(record))
    }

    /// Saves the stage to its own file, or exports a copy to `path` without
    /// changing the record's file. Returns the unchanged generation.
    ///
    /// # Errors
    ///
    /// Returns an error when the stage is unknown or the engine fails.
    pub fn save(&self, handle: StageHandle, path: Option<&Utf8Path>) -> Result<u64, RegistryError> {
        self.read_or_write(handle, |document| match path {
            Some(target) => document.export(target),
            None => document.save(),
        })
    }

    /// Current generation of the stage.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::StageNotFound`] for unknown handles.
    pub fn generation(&self, handle: StageHandle) -> Result<u64, RegistryError> {
        self.with_record(handle, StageRecord::generation)
    }

    /// Generation of the most recently allocated record backed by `path`.
    ///
    /// # Errors
    ///
    /// Fails only when the lock is poisoned.
    pub fn generation_for_path(&self, path: &Utf8Path) -> Result<Option<u64>, RegistryError> {
        let inner = self.lock()?;
        Ok(inner
            .records
            .values()
            .rev()
            .find(|record| record.file_path.as_deref() == Some(path))
            .map(StageRecord::generation))
    }

    /// Reads the prims and generation of the most recently allocated record
    /// backed by `path` under a single lock acquisition.
    ///
    /// # Errors
    ///
    /// Returns an error when the record exists but cannot be loaded.
    pub fn snapshot_for_path(&self, path: &Utf8Path) -> Result<Option<StageSnapshot>, RegistryError> {
        let mut inner = self.lock()?;
        let Some(record) = inner
            .records
            .values_mut()
            .rev()
            .find(|record| record.file_path.as_deref() == Some(path))
        else {
            return Ok(None);
        };
        let handle = record.handle;
        let generation = record.generation;
        let document = ensure_loaded(self.engine.as_ref(), record)?;
        Ok(Some(StageSnapshot {
            handle,
            generation,
            prims: document.prims(),
        }))
    }

    /// Defines a prim and bumps the generation.
    ///
    /// # Errors
    ///
    /// Returns an error when the stage is unknown or the engine rejects the
    /// prim; the generation is untouched on failure.
    pub fn create_prim(
        &self,
        handle: StageHandle,
        prim_path: &str,
        prim_type: &str,
    ) -> Result<u64, RegistryError> {
        self.mutate(handle, |document| document.define_prim(prim_path, prim_type))
    }

    /// Writes an attribute and bumps the generation.
    ///
    /// # Errors
    ///
    /// Returns an error when the stage or prim is unknown or the value is
    /// rejected.
    pub fn set_attribute(
        &self,
        handle: StageHandle,
        prim_path: &str,
        name: &str,
        value: AttributeValue,
    ) -> Result<u64, RegistryError> {
        self.mutate(handle, |document| {
            document.set_attribute(prim_path, name, value)
        })
    }

    /// Replaces a prim's transform and bumps the generation.
    ///
    /// # Errors
    ///
    /// Returns an error when the stage or prim is unknown.
    pub fn set_transform(
        &self,
        handle: StageHandle,
        prim_path: &str,
        transform: &Transform,
    ) -> Result<u64, RegistryError> {
        self.mutate(handle, |document| {
            document.set_transform(prim_path, transform)
        })
    }

    /// Reads an attribute.
    ///
    /// # Errors
    ///
    /// Returns an error when the stage, prim or attribute is unknown.
    pub fn get_attribute(
        &self,
        handle: StageHandle,
        prim_path: &str,
        name: &str,
    ) -> Result<AttributeValue, RegistryError> {
        self.read(handle, |document| document.attribute(prim_path, name))
    }

    /// Lists the stage's prims.
    ///
    /// # Errors
    ///
    /// Returns an error when the stage is unknown or cannot be loaded.
    pub fn list_prims(&self, handle: StageHandle) -> Result<Vec<PrimSummary>, RegistryError> {
        self.read(handle, |document| Ok(document.prims()))
    }

    /// Serialises the stage to text.
    ///
    /// # Errors
    ///
    /// Returns an error when the stage is unknown or cannot be loaded.
    pub fn export_text(&self, handle: StageHandle) -> Result<String, RegistryError> {
        self.read(handle, |document| document.export_text())
    }

    /// Handles of every record in allocation order.
    ///
    /// # Errors
    ///
    /// Fails only when the lock is poisoned.
    pub fn list(&self) -> Result<Vec<StageHandle>, RegistryError> {
        Ok(self.lock()?.records.keys().copied().collect())
    }

    /// Snapshots of every record in allocation order.
    ///
    /// # Errors
    ///
    /// Fails only when the lock is poisoned.
    pub fn summaries(&self) -> Result<Vec<StageSummary>, RegistryError> {
        Ok(self
            .lock()?
            .records
            .values()
            .map(StageRecord::summary)
            .collect())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, RegistryError> {
        self.inner.lock().map_err(|_| RegistryError::Poisoned)
    }

    fn mutate<F>(&self, handle: StageHandle, f: F) -> Result<u64, RegistryError>
    where
        F: FnOnce(&mut dyn StageDocument) -> Result<(), EngineError>,
    {
        let mut inner = self.lock()?;
        let record = inner.record_mut(handle)?;
        {
            let document = ensure_loaded(self.engine.as_ref(), record)?;
            f(&mut **document)?;
        }
        record.generation = record.generation.saturating_add(1);
        debug!(
            target: STAGE_TARGET,
            %handle,
            generation = record.generation,
            "stage mutated"
        );
        Ok(record.generation)
    }

    /// Runs a non-mutating document operation and returns the generation.
    fn read_or_write<F>(&self, handle: StageHandle, f: F) -> Result<u64, RegistryError>
    where
        F: FnOnce(&mut dyn StageDocument) -> Result<(), EngineError>,
    {
        let mut inner = self.lock()?;
        let record = inner.record_mut(handle)?;
        {
            let document = ensure_loaded(self.engine.as_ref(), record)?;
            f(&mut **document)?;
        }
        Ok(record.generation)
    }

    fn read<F, R>(&self, handle: StageHandle, f: F) -> Result<R, RegistryError>
    where
        F: FnOnce(&dyn StageDocument) -> Result<R, EngineError>,
    {
        let mut inner = self.lock()?;
        let record = inner.record_mut(handle)?;
        let document = ensure_loaded(self.engine.as_ref(), record)?;
        Ok(f(&**document)?)
    }
}

fn ensure_loaded<'r>(
    engine: &dyn DocumentEngine,
    record: &'r mut StageRecord,
) -> Result<&'r mut Box<dyn StageDocument>, RegistryError> {
    if record.document.is_none() {
        let path = record
            .file_path
            .as_deref()
            .ok_or(RegistryError::NoBackingFile {
                handle: record.handle,
            })?;
        let document = engine.open(path)?;
        debug!(target: STAGE_TARGET, handle = %record.handle, %path, "stage loaded on demand");
        record.document = Some(document);
    }
    record
        .document
        .as_mut()
        .ok_or(RegistryError::NoBackingFile {
            handle: record.handle,
        })
}
