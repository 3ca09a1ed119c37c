//! File-backed state store.
//!
//! Layout of the store directory:
//!
//! ```text
//! <store_path>/
//! ├─ LOCK          # Advisory lock for single-writer
//! └─ STATE         # CBOR snapshot of every entity
//! ```
//!
//! Every mutation rewrites the snapshot through a temporary file followed by
//! a rename, so a crash leaves either the old or the new snapshot on disk.

use super::{MemoryStateStore, StateStore};
use crate::entity::{EntityKind, EntityRef, SyncEntity};
use crate::error::{CoreError, CoreResult};
use crate::state::SyncState;
use fs2::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const STATE_FILE: &str = "STATE";
const STATE_TEMP: &str = "STATE.tmp";
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    entities: Vec<SyncEntity>,
}

/// A state store persisted to a directory.
///
/// The store holds an exclusive advisory lock on the directory for its
/// lifetime; a second process opening the same directory gets
/// `StoreLocked`.
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    inner: MemoryStateStore,
    persist: Mutex<()>,
    _lock_file: File,
}

impl FileStateStore {
    /// Opens or creates a store directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another process holds the lock (`StoreLocked`)
    /// - The snapshot cannot be decoded (`Codec`)
    /// - I/O errors occur
    pub fn open(path: &Path) -> CoreResult<Self> {
        fs::create_dir_all(path)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::StoreLocked);
        }

        let inner = MemoryStateStore::new();
        let state_path = path.join(STATE_FILE);
        if state_path.exists() {
            let reader = BufReader::new(File::open(&state_path)?);
            let snapshot: Snapshot =
                ciborium::from_reader(reader).map_err(|e| CoreError::Codec(e.to_string()))?;
            if snapshot.version != SNAPSHOT_VERSION {
                return Err(CoreError::Codec(format!(
                    "unsupported snapshot version {}",
                    snapshot.version
                )));
            }
            for entity in snapshot.entities {
                inner.insert(entity)?;
            }
            tracing::debug!(path = %path.display(), entities = inner.len(), "state store loaded");
        }

        Ok(Self {
            path: path.to_path_buf(),
            inner,
            persist: Mutex::new(()),
            _lock_file: lock_file,
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns a copy of every stored entity.
    pub fn snapshot(&self) -> Vec<SyncEntity> {
        self.inner.snapshot()
    }

    /// Applies `change` to the in-memory copy and, if it changed anything,
    /// writes the snapshot. When the write fails the entity is put back as
    /// it was, so memory never runs ahead of disk.
    fn commit(
        &self,
        entity: &EntityRef,
        change: impl FnOnce(&MemoryStateStore) -> CoreResult<bool>,
    ) -> CoreResult<bool> {
        let _guard = self.persist.lock();
        let prior = self.inner.find_by_id(entity)?;
        if !change(&self.inner)? {
            return Ok(false);
        }
        if let Err(err) = self.write_snapshot() {
            match prior {
                Some(record) => self.inner.restore(record),
                None => {
                    self.inner.remove(entity);
                }
            }
            tracing::warn!(entity = %entity, error = %err, "snapshot write failed, change rolled back");
            return Err(err);
        }
        Ok(true)
    }

    fn write_snapshot(&self) -> CoreResult<()> {
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            entities: self.inner.snapshot(),
        };

        let temp_path = self.path.join(STATE_TEMP);
        {
            let file = File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);
            ciborium::into_writer(&snapshot, &mut writer)
                .map_err(|e| CoreError::Codec(e.to_string()))?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&temp_path, self.path.join(STATE_FILE))?;
        Ok(())
    }
}

impl StateStore for FileStateStore {
    fn insert(&self, entity: SyncEntity) -> CoreResult<()> {
        let reference = entity.reference();
        self.commit(&reference, |inner| inner.insert(entity).map(|()| true))?;
        Ok(())
    }

    fn find_by_id(&self, entity: &EntityRef) -> CoreResult<Option<SyncEntity>> {
        self.inner.find_by_id(entity)
    }

    fn find_by_state(&self, kind: EntityKind, state: SyncState) -> CoreResult<Vec<SyncEntity>> {
        self.inner.find_by_state(kind, state)
    }

    fn conditional_transition(
        &self,
        entity: &EntityRef,
        allowed_from: &[SyncState],
        to: SyncState,
    ) -> CoreResult<bool> {
        self.commit(entity, |inner| {
            inner.conditional_transition(entity, allowed_from, to)
        })
    }

    fn conditional_transition_with_error(
        &self,
        entity: &EntityRef,
        allowed_from: &[SyncState],
        to: SyncState,
        message: &str,
    ) -> CoreResult<bool> {
        self.commit(entity, |inner| {
            inner.conditional_transition_with_error(entity, allowed_from, to, message)
        })
    }

    fn set_error_message(&self, entity: &EntityRef, message: &str) -> CoreResult<()> {
        self.commit(entity, |inner| {
            inner.set_error_message(entity, message).map(|()| true)
        })?;
        Ok(())
    }
}
