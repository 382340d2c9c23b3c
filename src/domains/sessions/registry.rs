use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use super::entity::{OpenSession, ProjectState, STATE_DB_FILE, STATE_DIR, SessionView};
use crate::domains::divergence::{CloneBaseline, Divergence, DivergenceTracker};
use crate::domains::merge::types::MergePoint;
use crate::domains::projects::{
    ConfigStore, Project, validate_project_name, validate_session_name,
};
use crate::domains::storage::{
    AccessMode, VolumeMount, VolumeStore, session_from_volume_name, volume_name_for,
};
use crate::errors::EnclaveError;
use crate::infrastructure::database::{CloneBaselineMethods, Database, MergePointMethods};

const DISCOVERY_MAX_DEPTH: usize = 2;

pub fn state_db_path(mount: &VolumeMount) -> PathBuf {
    mount.join(STATE_DIR).join(STATE_DB_FILE)
}

/// View over the volume store mapping session names to their projects and
/// merge points. Holds no state of its own.
#[derive(Clone)]
pub struct SessionRegistry {
    store: Arc<dyn VolumeStore>,
    config_store: ConfigStore,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn VolumeStore>, config_store: ConfigStore) -> Self {
        Self {
            store,
            config_store,
        }
    }

    pub fn config_store(&self) -> &ConfigStore {
        &self.config_store
    }

    pub fn list_sessions(&self) -> Result<Vec<String>> {
        let mut sessions: Vec<String> = self
            .store
            .list()?
            .iter()
            .filter_map(|volume| session_from_volume_name(volume))
            .map(str::to_string)
            .collect();
        sessions.sort();
        Ok(sessions)
    }

    pub fn exists(&self, session: &str) -> Result<bool> {
        validate_session_name(session)?;
        self.store.exists(&volume_name_for(session))
    }

    pub fn open(&self, session: &str, mode: AccessMode) -> Result<OpenSession> {
        if !self.exists(session)? {
            return Err(EnclaveError::session_not_found(session).into());
        }
        let mount = self.store.mount(&volume_name_for(session), mode)?;
        let projects = self.config_store.load_from(&mount, session)?;

        let db_path = state_db_path(&mount);
        let db = match mode {
            AccessMode::ReadWrite => Some(Database::open(&db_path)?),
            AccessMode::ReadOnly => Database::open_read_only(&db_path)?,
        };

        debug!(
            "Opened session '{session}' ({mode:?}) with {} project(s)",
            projects.len()
        );
        Ok(OpenSession {
            name: session.to_string(),
            mount,
            projects,
            db,
        })
    }

    pub fn merge_points(&self, session: &OpenSession) -> Result<HashMap<String, MergePoint>> {
        let Some(db) = &session.db else {
            return Ok(HashMap::new());
        };
        Ok(db
            .list_merge_points()?
            .into_iter()
            .map(|mp| (mp.project.clone(), mp))
            .collect())
    }

    /// Commit each configured project was cloned at, keyed by project.
    pub fn clone_baselines(&self, session: &OpenSession) -> Result<HashMap<String, CloneBaseline>> {
        let Some(db) = &session.db else {
            return Ok(HashMap::new());
        };
        Ok(db
            .list_clone_baselines()?
            .into_iter()
            .map(|b| (b.project.clone(), b))
            .collect())
    }

    pub fn describe(&self, session: &str, tracker: &DivergenceTracker) -> Result<SessionView> {
        let open = self.open(session, AccessMode::ReadOnly)?;
        let mut merge_points = self.merge_points(&open)?;
        let clone_baselines = self.clone_baselines(&open)?;

        let projects = open
            .projects
            .iter()
            .map(|project| {
                let clone_path = open.clone_path(project);
                let merge_point = merge_points.remove(&project.name);
                let divergence = tracker
                    .commits_since(
                        &clone_path,
                        project,
                        merge_point.as_ref(),
                        clone_baselines.get(&project.name),
                    )
                    .unwrap_or_else(|e| Divergence::Unavailable {
                        reason: format!("{e:#}"),
                    });
                ProjectState {
                    project: project.clone(),
                    clone_path,
                    merge_point,
                    divergence,
                }
            })
            .collect();

        Ok(SessionView {
            name: open.name,
            volume: open.mount.name,
            path: open.mount.path,
            projects,
        })
    }

    /// Finds repositories the agent created inside the volume that no
    /// manifest lists yet and records each one as a discovered project whose
    /// host location is `<host_root>/<name>`.
    pub fn discover_projects(&self, session: &str, host_root: &Path) -> Result<Vec<Project>> {
        let open = self.open(session, AccessMode::ReadOnly)?;
        let known: Vec<PathBuf> = open.projects.iter().map(|p| open.clone_path(p)).collect();
        let root = open.mount.path.clone();

        let mut found = Vec::new();
        let mut walker = WalkDir::new(&root)
            .min_depth(1)
            .max_depth(DISCOVERY_MAX_DEPTH)
            .sort_by_file_name()
            .into_iter();

        while let Some(entry) = walker.next() {
            let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy();
            if file_name == STATE_DIR || file_name == ".git" {
                walker.skip_current_dir();
                continue;
            }
            if known.iter().any(|k| k == entry.path()) {
                walker.skip_current_dir();
                continue;
            }
            if !entry.path().join(".git").exists() {
                continue;
            }
            walker.skip_current_dir();

            let Ok(relative) = entry.path().strip_prefix(&root) else {
                continue;
            };
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect::<Vec<_>>()
                .join("/");
            if let Err(e) = validate_project_name(&name) {
                warn!("Skipping repository at {}: {e}", entry.path().display());
                continue;
            }
            if known.iter().any(|k| entry.path().starts_with(k) || k.starts_with(entry.path())) {
                warn!("Skipping repository '{name}': it overlaps a configured project");
                continue;
            }

            found.push(Project::discovered(name.clone(), host_root.join(relative)));
        }

        for project in &found {
            self.config_store.persist(session, project)?;
        }
        info!(
            "Discovered {} new project(s) in session '{session}'",
            found.len()
        );
        Ok(found)
    }
}
