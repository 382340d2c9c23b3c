use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task;

use crate::domains::divergence::CloneBaseline;
use crate::domains::git::service as git;
use crate::domains::git::{CloneRequest, RepositoryAdapter};
use crate::domains::merge::lock::SyncLocks;
use crate::domains::projects::{
    ConfigStore, Project, ProjectSpec, Provenance, validate_session_name, validate_unique_names,
};
use crate::domains::sessions::entity::SessionHandle;
use crate::domains::sessions::registry::state_db_path;
use crate::domains::settings::{EngineConfig, Identity};
use crate::domains::storage::{AccessMode, VolumeMount, VolumeStore, volume_name_for};
use crate::errors::EnclaveError;
use crate::infrastructure::database::{CloneBaselineMethods, Database};
use crate::utils::path_utils::safe_canonicalize;

const OPERATION_LABEL: &str = "create_session";

/// A project that passed validation, with the branch that will be cloned.
#[derive(Debug, Clone)]
struct PreparedProject {
    project: Project,
    clone_branch: Option<String>,
}

/// Creates session volumes and fills them with isolated clones.
pub struct IsolationManager {
    config: EngineConfig,
    store: Arc<dyn VolumeStore>,
    git: Arc<dyn RepositoryAdapter>,
    config_store: ConfigStore,
    locks: SyncLocks,
}

impl IsolationManager {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn VolumeStore>,
        git: Arc<dyn RepositoryAdapter>,
        config_store: ConfigStore,
        locks: SyncLocks,
    ) -> Self {
        Self {
            config,
            store,
            git,
            config_store,
            locks,
        }
    }

    /// Creates the session, or resumes it untouched when its volume exists.
    /// Either every project is cloned or no volume is left behind.
    pub async fn create_session(&self, name: &str, specs: &[ProjectSpec]) -> Result<SessionHandle> {
        validate_session_name(name)?;
        let volume = volume_name_for(name);

        if self.store.exists(&volume)? {
            info!("{OPERATION_LABEL}: volume '{volume}' exists, resuming session '{name}'");
            let mount = self.store.mount(&volume, AccessMode::ReadOnly)?;
            let projects = self.config_store.load_from(&mount, name)?;
            return Ok(SessionHandle {
                name: name.to_string(),
                volume,
                path: mount.path,
                projects,
                resumed: true,
            });
        }

        let prepared = self.prepare_projects(name, specs)?;
        info!(
            "{OPERATION_LABEL}: creating session '{name}' with {} project(s)",
            prepared.len()
        );

        let mount = self.store.create(&volume)?;
        match self.populate(name, &mount, &prepared).await {
            Ok(()) => {
                info!("{OPERATION_LABEL}: session '{name}' ready at {}", mount.path.display());
                Ok(SessionHandle {
                    name: name.to_string(),
                    volume,
                    path: mount.path,
                    projects: prepared.into_iter().map(|p| p.project).collect(),
                    resumed: false,
                })
            }
            Err(err) => {
                error!("{OPERATION_LABEL}: session '{name}' failed, rolling back: {err:#}");
                if let Err(cleanup) = self.store.delete(&volume) {
                    warn!("{OPERATION_LABEL}: failed to delete volume '{volume}': {cleanup:#}");
                }
                Err(err)
            }
        }
    }

    /// Removes the session volume and its host manifest.
    pub fn delete_session(&self, name: &str) -> Result<()> {
        validate_session_name(name)?;
        let volume = volume_name_for(name);
        let host_manifest = self.config_store.host_manifest_path(name);
        let volume_exists = self.store.exists(&volume)?;
        if !volume_exists && !host_manifest.exists() {
            return Err(EnclaveError::session_not_found(name).into());
        }

        // Keyed like synchronization so a running sync on this volume blocks us.
        let lock_key = if volume_exists {
            self.store.mount(&volume, AccessMode::ReadOnly)?.path
        } else {
            host_manifest.clone()
        };
        let mut guard = self
            .locks
            .try_acquire(&lock_key)?
            .ok_or_else(|| EnclaveError::SyncInProgress {
                session: name.to_string(),
            })?;
        // The lock file lives inside the volume about to be removed.
        guard.release_file();

        self.store.delete(&volume)?;
        self.config_store.remove_host_manifest(name)?;
        info!("Deleted session '{name}'");
        Ok(())
    }

    /// Validates every spec before anything is created.
    fn prepare_projects(&self, session: &str, specs: &[ProjectSpec]) -> Result<Vec<PreparedProject>> {
        let mut prepared = Vec::with_capacity(specs.len());
        for spec in specs {
            let name = spec.resolved_name()?;
            let source_path = validate_source(&name, &spec.source_path)?;
            let clone_branch = resolve_clone_branch(&source_path, spec.branch.as_deref(), session)?;

            prepared.push(PreparedProject {
                project: Project {
                    name,
                    source_path,
                    branch: clone_branch.clone(),
                    tracked: spec.tracked,
                    provenance: Provenance::Configured,
                },
                clone_branch,
            });
        }
        validate_unique_names(prepared.iter().map(|p| p.project.name.as_str()))?;
        Ok(prepared)
    }

    async fn populate(&self, session: &str, mount: &VolumeMount, prepared: &[PreparedProject]) -> Result<()> {
        let projects: Vec<Project> = prepared.iter().map(|p| p.project.clone()).collect();
        self.config_store.write_volume_manifest(mount, session, &projects)?;
        let db = Database::open(&state_db_path(mount)).context("Failed to initialise session state")?;

        let mut pending = FuturesUnordered::new();
        for item in prepared {
            let git = Arc::clone(&self.git);
            let destination = item.project.clone_path(&mount.path);
            let source = item.project.source_path.clone();
            let branch = item.clone_branch.clone();
            let depth = self.config.clone_depth;
            let identity = self.config.agent_identity.clone();
            let name = item.project.name.clone();

            pending.push(async move {
                let result = task::spawn_blocking(move || {
                    clone_isolated(git.as_ref(), &source, &destination, branch.as_deref(), depth, &identity)
                })
                .await
                .map_err(|e| anyhow!("Clone task panicked: {e}"))
                .and_then(|inner| inner);
                (name, result)
            });
        }

        let total = pending.len();
        let mut failures = Vec::new();
        while let Some((name, result)) = pending.next().await {
            let recorded = result.and_then(|head| {
                db.record_clone_baseline(&CloneBaseline {
                    project: name.clone(),
                    commit_id: head,
                    recorded_at: Utc::now(),
                })
            });
            match recorded {
                Ok(()) => info!("{OPERATION_LABEL}: cloned '{name}' into session '{session}'"),
                Err(err) => {
                    error!("{OPERATION_LABEL}: clone of '{name}' failed: {err:#}");
                    failures.push((name, err));
                }
            }
        }

        if failures.is_empty() {
            return Ok(());
        }
        let names = failures
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let (_, first) = failures.remove(0);
        Err(first.context(format!(
            "{} of {total} clone(s) failed for session '{session}': {names}",
            failures.len() + 1
        )))
    }
}

fn clone_isolated(
    git: &dyn RepositoryAdapter,
    source: &Path,
    destination: &Path,
    branch: Option<&str>,
    depth: Option<u32>,
    identity: &Identity,
) -> Result<Option<String>> {
    git.clone_repository(&CloneRequest {
        source,
        destination,
        branch,
        depth,
    })?;
    let removed = git.strip_remotes(destination)?;
    log::debug!(
        "{OPERATION_LABEL}: removed remotes {removed:?} from {}",
        destination.display()
    );
    git.set_identity(destination, identity)?;
    git.resolve_commit(destination, "HEAD")
}

fn validate_source(name: &str, source: &Path) -> Result<PathBuf> {
    if !source.exists() {
        return Err(EnclaveError::validation(
            "source_path",
            format!("source of '{name}' does not exist: {}", source.display()),
        )
        .into());
    }
    let canonical = safe_canonicalize(source).map_err(|e| {
        EnclaveError::io("canonicalize", source.display(), e)
    })?;
    if !git::is_git_repository(&canonical) {
        return Err(EnclaveError::validation(
            "source_path",
            format!("source of '{name}' is not a git repository: {}", canonical.display()),
        )
        .into());
    }
    Ok(canonical)
}

/// Explicit branch if it exists, then a branch named after the session, then
/// whatever the source has checked out. `None` clones the source's HEAD.
fn resolve_clone_branch(source: &Path, requested: Option<&str>, session: &str) -> Result<Option<String>> {
    if !git::repository_has_commits(source)? {
        return Ok(None);
    }

    if let Some(branch) = requested.map(str::trim).filter(|b| !b.is_empty()) {
        if git::branch_exists(source, branch)? {
            return Ok(Some(branch.to_string()));
        }
        warn!(
            "{OPERATION_LABEL}: branch '{branch}' not found in {}, cloning its current HEAD",
            source.display()
        );
        return Ok(git::get_current_branch(source)?);
    }

    if git::branch_exists(source, session)? {
        info!(
            "{OPERATION_LABEL}: using branch '{session}' of {} matching the session name",
            source.display()
        );
        return Ok(Some(session.to_string()));
    }

    Ok(git::get_current_branch(source)?)
}
