use anyhow::{Context, Result};
use fs2::FileExt;
use log::debug;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::domains::sessions::entity::STATE_DIR;

pub const SYNC_LOCK_FILE: &str = "sync.lock";

/// Session guards owned by one engine, keyed by volume path. Each guard also
/// holds an advisory lock on `<volume>/.enclave/sync.lock`, so engines in
/// other processes working on the same volume are excluded too.
#[derive(Clone, Default)]
pub struct SyncLocks {
    active: Arc<Mutex<HashSet<PathBuf>>>,
}

/// Held for the duration of one synchronization or deletion. Releases both
/// locks on drop.
pub struct SyncLockGuard {
    key: PathBuf,
    active: Arc<Mutex<HashSet<PathBuf>>>,
    file: Option<File>,
}

impl Drop for SyncLockGuard {
    fn drop(&mut self) {
        let mut active = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        active.remove(&self.key);
    }
}

impl SyncLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Ok(None)` when the volume is already held, by this engine or by
    /// another process. A volume directory that does not exist is guarded
    /// in-process only.
    pub fn try_acquire(&self, volume: &Path) -> Result<Option<SyncLockGuard>> {
        let key = volume.to_path_buf();
        {
            let mut active = self
                .active
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if !active.insert(key.clone()) {
                return Ok(None);
            }
        }
        // From here on the guard owns the in-process entry.
        let mut guard = SyncLockGuard {
            key,
            active: Arc::clone(&self.active),
            file: None,
        };

        if !volume.is_dir() {
            return Ok(Some(guard));
        }
        let state_dir = volume.join(STATE_DIR);
        fs::create_dir_all(&state_dir)
            .with_context(|| format!("Failed to create {}", state_dir.display()))?;
        let lock_path = state_dir.join(SYNC_LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file {}", lock_path.display()))?;

        if file.try_lock_exclusive().is_err() {
            debug!("{} is held by another process", lock_path.display());
            return Ok(None);
        }
        guard.file = Some(file);
        Ok(Some(guard))
    }
}

impl SyncLockGuard {
    /// Gives up the advisory lock early while keeping the in-process entry.
    /// Needed before deleting the directory that contains the lock file.
    pub fn release_file(&mut self) {
        self.file = None;
    }
}
