use anyhow::{Context, Result};
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::entity::Project;
use super::manifest::{Manifest, VOLUME_MANIFEST_FILE};
use super::validation::validate_project_name;
use crate::domains::storage::{AccessMode, VolumeMount, VolumeStore, volume_name_for};
use crate::errors::EnclaveError;

/// Reads and writes the two manifest copies of a session: the one embedded
/// in the volume and the supplemental one on the host.
#[derive(Clone)]
pub struct ConfigStore {
    store: Arc<dyn VolumeStore>,
    host_manifest_dir: PathBuf,
}

impl ConfigStore {
    pub fn new(store: Arc<dyn VolumeStore>, host_manifest_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            host_manifest_dir: host_manifest_dir.into(),
        }
    }

    pub fn volume_manifest_path(mount: &VolumeMount) -> PathBuf {
        mount.join(VOLUME_MANIFEST_FILE)
    }

    pub fn host_manifest_path(&self, session: &str) -> PathBuf {
        self.host_manifest_dir.join(format!("{session}.yaml"))
    }

    /// Writes the volume copy in full. Only done once, at creation.
    pub fn write_volume_manifest(
        &self,
        mount: &VolumeMount,
        session: &str,
        projects: &[Project],
    ) -> Result<()> {
        mount.ensure_writable()?;
        let path = Self::volume_manifest_path(mount);
        Manifest::new(session, projects.to_vec()).write(&path)?;
        debug!(
            "Wrote manifest for session '{session}' with {} project(s) to {}",
            projects.len(),
            path.display()
        );
        Ok(())
    }

    /// All projects of a session: volume copy first, then host additions.
    /// A name present in both copies is ambiguous and rejected.
    pub fn load(&self, session: &str) -> Result<Vec<Project>> {
        let volume = volume_name_for(session);
        if !self.store.exists(&volume)? {
            return Err(EnclaveError::session_not_found(session).into());
        }
        let mount = self.store.mount(&volume, AccessMode::ReadOnly)?;
        self.load_from(&mount, session)
    }

    pub fn load_from(&self, mount: &VolumeMount, session: &str) -> Result<Vec<Project>> {
        let volume_path = Self::volume_manifest_path(mount);
        if !volume_path.exists() {
            return Err(EnclaveError::configuration(format!(
                "Session '{session}' has no manifest at {}",
                volume_path.display()
            ))
            .into());
        }
        let mut projects = Manifest::read(&volume_path, session)?.projects;

        let host_path = self.host_manifest_path(session);
        if host_path.exists() {
            let host = Manifest::read(&host_path, session)?;
            for project in host.projects {
                if projects.iter().any(|p| p.name == project.name) {
                    return Err(EnclaveError::configuration(format!(
                        "Project '{}' is defined in both {} and {}",
                        project.name,
                        volume_path.display(),
                        host_path.display()
                    ))
                    .into());
                }
                projects.push(project);
            }
        }

        Ok(projects)
    }

    /// Appends a discovered project to the host manifest.
    pub fn persist(&self, session: &str, project: &Project) -> Result<()> {
        validate_project_name(&project.name)?;
        let existing = self.load(session)?;
        if existing.iter().any(|p| p.name == project.name) {
            return Err(EnclaveError::validation(
                "name",
                format!("session '{session}' already has a project named '{}'", project.name),
            )
            .into());
        }

        let path = self.host_manifest_path(session);
        Manifest::append(&path, session, project)
            .with_context(|| format!("Failed to persist project '{}'", project.name))?;
        info!(
            "Persisted {:?} project '{}' for session '{session}'",
            project.provenance, project.name
        );
        Ok(())
    }

    pub fn remove_host_manifest(&self, session: &str) -> Result<()> {
        remove_if_exists(&self.host_manifest_path(session))
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}
