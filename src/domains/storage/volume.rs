use anyhow::{Context, Result, anyhow};
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

const VOLUME_PREFIX: &str = "enclave-";
const VOLUME_SUFFIX: &str = "-workspace";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

/// A mounted volume. Directory semantics; the mode is enforced by callers
/// through `ensure_writable`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub name: String,
    pub path: PathBuf,
    pub mode: AccessMode,
}

impl VolumeMount {
    pub fn join(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.path.join(relative)
    }

    pub fn is_writable(&self) -> bool {
        self.mode == AccessMode::ReadWrite
    }

    pub fn ensure_writable(&self) -> Result<()> {
        if !self.is_writable() {
            return Err(anyhow!("Volume '{}' is mounted read-only", self.name));
        }
        Ok(())
    }
}

/// Durable keyed volume store.
pub trait VolumeStore: Send + Sync {
    fn exists(&self, name: &str) -> Result<bool>;
    /// Creates the volume. Creating an existing volume is not an error.
    fn create(&self, name: &str) -> Result<VolumeMount>;
    fn mount(&self, name: &str, mode: AccessMode) -> Result<VolumeMount>;
    fn delete(&self, name: &str) -> Result<()>;
    fn list(&self) -> Result<Vec<String>>;
}

pub fn volume_name_for(session: &str) -> String {
    format!("{VOLUME_PREFIX}{session}{VOLUME_SUFFIX}")
}

/// Inverse of [`volume_name_for`]; `None` for volumes this crate does not own.
pub fn session_from_volume_name(volume: &str) -> Option<&str> {
    volume
        .strip_prefix(VOLUME_PREFIX)?
        .strip_suffix(VOLUME_SUFFIX)
        .filter(|s| !s.is_empty())
}

/// One directory per volume under a root directory.
pub struct LocalVolumeStore {
    root: PathBuf,
}

impl LocalVolumeStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn volume_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty()
            || name.contains(['/', '\\'])
            || name == "."
            || name == ".."
        {
            return Err(anyhow!("Invalid volume name '{name}'"));
        }
        Ok(self.root.join(name))
    }
}

impl VolumeStore for LocalVolumeStore {
    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.volume_path(name)?.is_dir())
    }

    fn create(&self, name: &str) -> Result<VolumeMount> {
        let path = self.volume_path(name)?;
        fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create volume directory {}", path.display()))?;
        info!("Created volume '{name}' at {}", path.display());
        Ok(VolumeMount {
            name: name.to_string(),
            path,
            mode: AccessMode::ReadWrite,
        })
    }

    fn mount(&self, name: &str, mode: AccessMode) -> Result<VolumeMount> {
        let path = self.volume_path(name)?;
        if !path.is_dir() {
            return Err(anyhow!("Volume '{name}' does not exist"));
        }
        debug!("Mounted volume '{name}' ({mode:?})");
        Ok(VolumeMount {
            name: name.to_string(),
            path,
            mode,
        })
    }

    fn delete(&self, name: &str) -> Result<()> {
        let path = self.volume_path(name)?;
        if !path.exists() {
            debug!("Volume '{name}' already absent");
            return Ok(());
        }
        fs::remove_dir_all(&path)
            .with_context(|| format!("Failed to delete volume directory {}", path.display()))?;
        info!("Deleted volume '{name}'");
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)
            .with_context(|| format!("Failed to read volume root {}", self.root.display()))?
        {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn create_is_idempotent_and_listed() {
        let temp = TempDir::new().unwrap();
        let store = LocalVolumeStore::new(temp.path().join("volumes"));

        assert!(!store.exists("enclave-demo-workspace").unwrap());
        let mount = store.create("enclave-demo-workspace").unwrap();
        std::fs::write(mount.join("marker"), "x").unwrap();
        store.create("enclave-demo-workspace").unwrap();

        assert!(mount.join("marker").exists());
        assert_eq!(store.list().unwrap(), vec!["enclave-demo-workspace"]);
    }

    #[test]
    fn read_only_mount_rejects_writes() {
        let temp = TempDir::new().unwrap();
        let store = LocalVolumeStore::new(temp.path());
        store.create("v").unwrap();

        let mount = store.mount("v", AccessMode::ReadOnly).unwrap();
        assert!(mount.ensure_writable().is_err());
        assert!(
            store
                .mount("v", AccessMode::ReadWrite)
                .unwrap()
                .ensure_writable()
                .is_ok()
        );
    }

    #[test]
    fn mount_of_missing_volume_fails_and_delete_is_tolerant() {
        let temp = TempDir::new().unwrap();
        let store = LocalVolumeStore::new(temp.path());
        assert!(store.mount("ghost", AccessMode::ReadOnly).is_err());
        store.delete("ghost").unwrap();
    }

    #[test]
    fn rejects_path_like_volume_names() {
        let temp = TempDir::new().unwrap();
        let store = LocalVolumeStore::new(temp.path());
        assert!(store.create("../escape").is_err());
        assert!(store.exists("a/b").is_err());
    }

    #[test]
    fn volume_names_round_trip_to_sessions() {
        let volume = volume_name_for("demo");
        assert_eq!(volume, "enclave-demo-workspace");
        assert_eq!(session_from_volume_name(&volume), Some("demo"));
        assert_eq!(session_from_volume_name("postgres-data"), None);
        assert_eq!(session_from_volume_name("enclave--workspace"), None);
    }
}
