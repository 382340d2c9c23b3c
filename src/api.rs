use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::task;

use crate::domains::divergence::{CommitSummary, Divergence, DivergenceTracker};
use crate::domains::git::{GitCli, RepositoryAdapter};
use crate::domains::merge::lock::SyncLocks;
use crate::domains::merge::{Approver, SyncEngine, SyncHistoryEntry, SyncReport, SyncRequest};
use crate::domains::projects::{ConfigStore, Project, ProjectSpec};
use crate::domains::sessions::{IsolationManager, SessionHandle, SessionRegistry, SessionView};
use crate::domains::settings::EngineConfig;
use crate::domains::storage::{AccessMode, LocalVolumeStore, VolumeStore};
use crate::errors::EnclaveError;
use crate::infrastructure::database::{MergePointMethods, SyncHistoryMethods};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DivergenceReport {
    /// Commit counts for every tracked project.
    Summary {
        projects: BTreeMap<String, Divergence<u32>>,
    },
    /// Commit list for a single project, oldest first.
    Detail {
        project: String,
        commits: Divergence<Vec<CommitSummary>>,
    },
}

/// Entry point for embedding the engine. Every operation takes the session
/// name explicitly; nothing is read from ambient process state.
pub struct Enclave {
    config: EngineConfig,
    registry: SessionRegistry,
    isolation: IsolationManager,
    sync: SyncEngine,
    tracker: DivergenceTracker,
}

impl Enclave {
    /// Engine backed by local directories and the configured git binary.
    pub fn new(config: EngineConfig) -> Result<Self, EnclaveError> {
        config.validate().map_err(EnclaveError::from_internal)?;
        let store: Arc<dyn VolumeStore> = Arc::new(LocalVolumeStore::new(&config.volume_root));
        let git: Arc<dyn RepositoryAdapter> = Arc::new(GitCli::new(&config.git_binary));
        Ok(Self::with_components(config, store, git))
    }

    pub fn with_components(
        config: EngineConfig,
        store: Arc<dyn VolumeStore>,
        git: Arc<dyn RepositoryAdapter>,
    ) -> Self {
        let config_store = ConfigStore::new(Arc::clone(&store), &config.host_manifest_dir);
        let registry = SessionRegistry::new(Arc::clone(&store), config_store.clone());
        let locks = SyncLocks::new();
        let isolation = IsolationManager::new(
            config.clone(),
            Arc::clone(&store),
            Arc::clone(&git),
            config_store,
            locks.clone(),
        );
        let sync = SyncEngine::new(config.clone(), Arc::clone(&git), locks);
        let tracker = DivergenceTracker::new(git);

        Self {
            config,
            registry,
            isolation,
            sync,
            tracker,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub async fn create_session(
        &self,
        name: &str,
        projects: &[ProjectSpec],
    ) -> Result<SessionHandle, EnclaveError> {
        self.isolation
            .create_session(name, projects)
            .await
            .map_err(EnclaveError::from_internal)
    }

    /// Per-project commit counts, or the commit list of `project` when given.
    /// Untracked projects are left out of the summary.
    pub async fn get_divergence(
        &self,
        session: &str,
        project: Option<&str>,
    ) -> Result<DivergenceReport, EnclaveError> {
        let registry = self.registry.clone();
        let tracker = self.tracker.clone();
        let session = session.to_string();
        let project = project.map(str::to_string);

        task::spawn_blocking(move || divergence_report(&registry, &tracker, &session, project.as_deref()))
            .await
            .map_err(|e| EnclaveError::from_internal(anyhow!("Divergence task panicked: {e}")))?
            .map_err(EnclaveError::from_internal)
    }

    /// Replays each tracked project's new commits onto its host repository.
    /// Per-project failures are reported, not returned as errors.
    pub async fn synchronize(
        &self,
        session: &str,
        request: &SyncRequest,
        approver: &dyn Approver,
    ) -> Result<SyncReport, EnclaveError> {
        let mode = if request.dry_run {
            AccessMode::ReadOnly
        } else {
            AccessMode::ReadWrite
        };
        let open = self
            .registry
            .open(session, mode)
            .map_err(EnclaveError::from_internal)?;
        self.sync
            .synchronize(&open, request, approver)
            .await
            .map_err(EnclaveError::from_internal)
    }

    pub fn delete_session(&self, name: &str) -> Result<(), EnclaveError> {
        self.isolation
            .delete_session(name)
            .map_err(EnclaveError::from_internal)
    }

    pub fn list_sessions(&self) -> Result<Vec<String>, EnclaveError> {
        self.registry
            .list_sessions()
            .map_err(EnclaveError::from_internal)
    }

    pub fn describe_session(&self, session: &str) -> Result<SessionView, EnclaveError> {
        self.registry
            .describe(session, &self.tracker)
            .map_err(EnclaveError::from_internal)
    }

    pub fn discover_projects(
        &self,
        session: &str,
        host_root: &Path,
    ) -> Result<Vec<Project>, EnclaveError> {
        self.registry
            .discover_projects(session, host_root)
            .map_err(EnclaveError::from_internal)
    }

    /// Newest first.
    pub fn sync_history(
        &self,
        session: &str,
        project: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SyncHistoryEntry>, EnclaveError> {
        let open = self
            .registry
            .open(session, AccessMode::ReadOnly)
            .map_err(EnclaveError::from_internal)?;
        match &open.db {
            Some(db) => db
                .list_sync_history(project, limit)
                .map_err(EnclaveError::from_internal),
            None => Ok(Vec::new()),
        }
    }
}

fn divergence_report(
    registry: &SessionRegistry,
    tracker: &DivergenceTracker,
    session: &str,
    project: Option<&str>,
) -> Result<DivergenceReport> {
    let open = registry.open(session, AccessMode::ReadOnly)?;

    if let Some(name) = project {
        let project = open.project(name).ok_or_else(|| {
            EnclaveError::validation("project", format!("session '{session}' has no project '{name}'"))
        })?;
        let merge_point = match &open.db {
            Some(db) => db.get_merge_point(name)?,
            None => None,
        };
        let cloned_at = registry.clone_baselines(&open)?.remove(name);
        let commits = tracker.commit_list(
            &open.clone_path(project),
            project,
            merge_point.as_ref(),
            cloned_at.as_ref(),
        )?;
        return Ok(DivergenceReport::Detail {
            project: name.to_string(),
            commits,
        });
    }

    let merge_points = registry.merge_points(&open)?;
    let clone_baselines = registry.clone_baselines(&open)?;
    let projects = open
        .tracked_projects()
        .map(|project| {
            let count = tracker
                .commits_since(
                    &open.clone_path(project),
                    project,
                    merge_points.get(&project.name),
                    clone_baselines.get(&project.name),
                )
                .unwrap_or_else(|e| Divergence::Unavailable {
                    reason: format!("{e:#}"),
                });
            (project.name.clone(), count)
        })
        .collect();
    Ok(DivergenceReport::Summary { projects })
}
