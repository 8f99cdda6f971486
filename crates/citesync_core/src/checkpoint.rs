//! Checkpoint persistence.

use crate::error::{CoreError, CoreResult};
use citesync_protocol::{from_cbor, to_cbor, Checkpoint};
use parking_lot::Mutex;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Durable storage for the sync checkpoint.
///
/// The checkpoint is read once at the start of a session and written
/// exactly once per merge batch. Crash-recovery correctness depends on
/// the saved value never running ahead of the merged state, so `save`
/// must only be called after a batch has been fully applied.
pub trait CheckpointStore: Send + Sync {
    /// Loads the last saved checkpoint, if one exists.
    fn load(&self) -> CoreResult<Option<Checkpoint>>;

    /// Durably saves the checkpoint.
    fn save(&self, checkpoint: &Checkpoint) -> CoreResult<()>;
}

/// File-backed checkpoint store with atomic replacement.
///
/// Writes go to a sibling temporary file which is then renamed over the
/// target, so a crash mid-write leaves the previous checkpoint intact.
/// Re-pulling from an older checkpoint is idempotent, so a stale-but-
/// consistent checkpoint is always safe.
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    /// Creates a store persisting to the given path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the backing path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self) -> CoreResult<Option<Checkpoint>> {
        match fs::read(&self.path) {
            Ok(bytes) => {
                let checkpoint = from_cbor(&bytes)
                    .map_err(|e| CoreError::Checkpoint(format!("corrupt checkpoint: {e}")))?;
                Ok(Some(checkpoint))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CoreError::Io(e)),
        }
    }

    fn save(&self, checkpoint: &Checkpoint) -> CoreResult<()> {
        let bytes = to_cbor(checkpoint)
            .map_err(|e| CoreError::Checkpoint(format!("encode checkpoint: {e}")))?;

        let temp = self.temp_path();
        {
            let mut file = fs::File::create(&temp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

/// In-memory checkpoint store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    slot: Mutex<Option<Checkpoint>>,
}

impl MemoryCheckpointStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the store to a specific checkpoint, or clears it.
    ///
    /// Used by crash-replay tests to rewind a client to a stale position.
    pub fn reset(&self, checkpoint: Option<Checkpoint>) {
        *self.slot.lock() = checkpoint;
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self) -> CoreResult<Option<Checkpoint>> {
        Ok(*self.slot.lock())
    }

    fn save(&self, checkpoint: &Checkpoint) -> CoreResult<()> {
        *self.slot.lock() = Some(*checkpoint);
        Ok(())
    }
}
