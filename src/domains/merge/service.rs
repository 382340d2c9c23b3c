use anyhow::{Context, Result, anyhow};
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task;

use crate::domains::divergence::{CloneBaseline, Divergence, DivergencePlan, DivergenceTracker};
use crate::domains::git::service as git;
use crate::domains::git::{ApplyOutcome, CommitRange, RepositoryAdapter};
use crate::domains::merge::lock::SyncLocks;
use crate::domains::merge::target::{TargetPlan, plan_target, realize_target};
use crate::domains::merge::types::{
    ApprovalRequest, Approver, MergePoint, ProjectSyncResult, SyncHistoryEntry, SyncOutcome,
    SyncPhase, SyncReport, SyncRequest,
};
use crate::domains::projects::Project;
use crate::domains::sessions::OpenSession;
use crate::domains::settings::{EngineConfig, Identity, TargetPolicy};
use crate::errors::EnclaveError;
use crate::infrastructure::database::{
    CloneBaselineMethods, Database, MergePointMethods, SyncHistoryMethods,
};

const OPERATION_LABEL: &str = "synchronize";

/// Per-project phase bookkeeping; rejects out-of-order transitions.
struct PhaseTracker<'a> {
    project: &'a str,
    phase: SyncPhase,
}

impl<'a> PhaseTracker<'a> {
    fn new(project: &'a str) -> Self {
        Self::resume(project, SyncPhase::Idle)
    }

    fn resume(project: &'a str, phase: SyncPhase) -> Self {
        Self { project, phase }
    }

    fn advance(&mut self, next: SyncPhase) -> Result<()> {
        if !self.phase.can_advance_to(next) {
            return Err(anyhow!(
                "invalid synchronization transition {:?} -> {next:?} for '{}'",
                self.phase,
                self.project
            ));
        }
        debug!(
            "{OPERATION_LABEL}: '{}' {:?} -> {next:?}",
            self.project, self.phase
        );
        self.phase = next;
        Ok(())
    }
}

/// Inputs of the blocking preparation step for one project.
struct ProjectJob {
    clone_path: PathBuf,
    project: Project,
    merge_point: Option<MergePoint>,
    cloned_at: Option<CloneBaseline>,
    source_branch: Option<String>,
    target_branch: Option<String>,
    policy: TargetPolicy,
    worktree_root: Option<PathBuf>,
}

/// What the blocking preparation step hands back to the async driver.
struct Prepared {
    plan: DivergencePlan,
    range: CommitRange,
    head: String,
    target: TargetPlan,
    result: ProjectSyncResult,
}

enum Preparation {
    Done(ProjectSyncResult),
    Ready(Box<Prepared>),
}

/// Replays isolated commits onto host repositories, one project at a time.
pub struct SyncEngine {
    config: EngineConfig,
    git: Arc<dyn RepositoryAdapter>,
    tracker: DivergenceTracker,
    locks: SyncLocks,
}

impl SyncEngine {
    pub fn new(config: EngineConfig, git: Arc<dyn RepositoryAdapter>, locks: SyncLocks) -> Self {
        let tracker = DivergenceTracker::new(Arc::clone(&git));
        Self {
            config,
            git,
            tracker,
            locks,
        }
    }

    pub async fn synchronize(
        &self,
        session: &OpenSession,
        request: &SyncRequest,
        approver: &dyn Approver,
    ) -> Result<SyncReport> {
        let _guard = self
            .locks
            .try_acquire(&session.mount.path)?
            .ok_or_else(|| EnclaveError::SyncInProgress {
                session: session.name.clone(),
            })?;

        if !request.dry_run && session.db.is_none() {
            return Err(anyhow!(
                "Session '{}' must be opened read-write to synchronize",
                session.name
            ));
        }

        info!(
            "{OPERATION_LABEL}: session '{}' (target={:?}, source={:?}, dry_run={}, auto_approve={})",
            session.name,
            request.target_branch,
            request.source_branch,
            request.dry_run,
            request.auto_approve
        );

        let mut projects = Vec::new();
        // Sequential on purpose: each apply mutates a host working tree.
        for project in session.tracked_projects() {
            let result = self.sync_project(session, project, request, approver).await;
            let result = result.unwrap_or_else(|err| {
                error!("{OPERATION_LABEL}: '{}' failed: {err:#}", project.name);
                ProjectSyncResult::error(&project.name, format!("{err:#}"))
            });

            if !request.dry_run
                && let Some(db) = &session.db
            {
                record_history(db, &result);
            }
            info!(
                "{OPERATION_LABEL}: '{}' -> {} ({} commit(s))",
                result.name, result.outcome, result.commits_applied
            );
            projects.push(result);
        }

        let report = SyncReport {
            session: session.name.clone(),
            dry_run: request.dry_run,
            projects,
        };
        info!(
            "{OPERATION_LABEL}: session '{}' finished: {} merged, {} failed",
            report.session,
            report.merged_count(),
            report.failed_count()
        );
        Ok(report)
    }

    async fn sync_project(
        &self,
        session: &OpenSession,
        project: &Project,
        request: &SyncRequest,
        approver: &dyn Approver,
    ) -> Result<ProjectSyncResult> {
        let (merge_point, cloned_at) = match &session.db {
            Some(db) => (
                db.get_merge_point(&project.name)?,
                db.get_clone_baseline(&project.name)?,
            ),
            None => (None, None),
        };
        let target_branch = request
            .target_branch
            .clone()
            .or_else(|| merge_point.as_ref().and_then(|mp| mp.target_branch.clone()));

        let prepared = {
            let tracker = self.tracker.clone();
            let job = ProjectJob {
                clone_path: session.clone_path(project),
                project: project.clone(),
                merge_point: merge_point.clone(),
                cloned_at,
                source_branch: request.source_branch.clone(),
                target_branch: target_branch.clone(),
                policy: self.config.target_policy,
                worktree_root: self.config.worktree_root.clone(),
            };
            task::spawn_blocking(move || prepare(&tracker, &job))
                .await
                .map_err(|e| anyhow!("Preparation task panicked: {e}"))??
        };

        let prepared = match prepared {
            Preparation::Done(result) => return Ok(result),
            Preparation::Ready(prepared) => *prepared,
        };

        if request.dry_run {
            let mut result = prepared.result;
            result.outcome = SyncOutcome::Planned;
            result.message = Some(format!(
                "would apply {} commit(s) to {}",
                prepared.plan.count,
                prepared.target.path().display()
            ));
            return Ok(result);
        }

        if !request.auto_approve {
            let approval = ApprovalRequest {
                session: session.name.clone(),
                project: project.name.clone(),
                target_path: prepared.target.path().to_path_buf(),
                target_branch: prepared.target.branch().map(str::to_string),
                commits: prepared.result.commits.clone(),
            };
            if !approver.approve(&approval).await {
                info!("{OPERATION_LABEL}: '{}' declined by approver", project.name);
                let mut result = prepared.result;
                result.outcome = SyncOutcome::Declined;
                result.message = Some("patch series declined".to_string());
                return Ok(result);
            }
        }

        let Prepared {
            plan,
            range,
            head,
            target,
            mut result,
        } = prepared;

        let applied = {
            let git = Arc::clone(&self.git);
            let clone_path = session.clone_path(project);
            let committer = self.config.host_identity.clone();
            let name = project.name.clone();
            task::spawn_blocking(move || {
                apply(git.as_ref(), &name, &clone_path, &range, &target, committer.as_ref())
            })
            .await
            .map_err(|e| anyhow!("Apply task panicked: {e}"))??
        };

        result.target_path = Some(applied.target_path.clone());
        match applied.outcome {
            ApplyOutcome::Applied => {
                let db = session
                    .db
                    .as_ref()
                    .ok_or_else(|| anyhow!("Session state database is not open"))?;
                db.record_merge_point(&MergePoint {
                    project: project.name.clone(),
                    commit_id: head.clone(),
                    target_branch: target_branch.clone(),
                    commits_applied: applied.patch_count,
                    updated_at: chrono::Utc::now(),
                })
                .with_context(|| {
                    format!(
                        "Patches for '{}' were applied to {} but the merge point could not be recorded",
                        project.name,
                        applied.target_path.display()
                    )
                })?;

                if applied.patch_count != plan.count {
                    let skipped = plan.count.saturating_sub(applied.patch_count);
                    warn!(
                        "{OPERATION_LABEL}: '{}' exported {} patch(es) for {} commit(s); merge commits are not replayed",
                        project.name, applied.patch_count, plan.count
                    );
                    result.message = Some(format!(
                        "{skipped} merge commit(s) were not replayed; changes made only inside them, such as conflict resolutions, did not reach the host"
                    ));
                }
                result.outcome = SyncOutcome::Merged;
                result.commits_applied = applied.patch_count;
                result.merge_point = Some(head);
            }
            ApplyOutcome::Conflict { message } => {
                let files = git::conflicting_paths(&applied.target_path).unwrap_or_else(|e| {
                    warn!("{OPERATION_LABEL}: could not read conflicts: {e:#}");
                    Vec::new()
                });
                warn!(
                    "{OPERATION_LABEL}: '{}' conflicted in {} ({} file(s))",
                    project.name,
                    applied.target_path.display(),
                    files.len()
                );
                result.outcome = SyncOutcome::Conflict;
                result.conflicting_paths = files;
                result.message = Some(conflict_guidance(&applied.target_path, &message));
            }
        }
        Ok(result)
    }
}

fn prepare(tracker: &DivergenceTracker, job: &ProjectJob) -> Result<Preparation> {
    let project = &job.project;
    let mut phase = PhaseTracker::new(&project.name);
    phase.advance(SyncPhase::Counting)?;

    let plan = match tracker.plan(
        &job.clone_path,
        project,
        job.merge_point.as_ref(),
        job.cloned_at.as_ref(),
        job.source_branch.as_deref(),
    )? {
        Divergence::Available(plan) => plan,
        Divergence::Unavailable { reason } => {
            return Ok(Preparation::Done(ProjectSyncResult::error(
                &project.name,
                format!("clone unavailable: {reason}"),
            )));
        }
    };

    let mut result = ProjectSyncResult::new(&project.name, SyncOutcome::NoChanges);
    result.from_commit = job.merge_point.as_ref().map(|mp| mp.commit_id.clone());
    result.merge_point = result.from_commit.clone();

    let (Some(range), Some(head)) = (plan.range.clone(), plan.head.clone()) else {
        phase.advance(SyncPhase::NoChanges)?;
        return Ok(Preparation::Done(result));
    };

    phase.advance(SyncPhase::PatchReady)?;
    result.commits = tracker.commits_in(&job.clone_path, &plan)?;
    let target = plan_target(
        project,
        job.target_branch.as_deref(),
        job.policy,
        job.worktree_root.as_deref(),
    )?;
    result.target_path = Some(target.path().to_path_buf());
    result.target_branch = target.branch().map(str::to_string);

    debug!(
        "{OPERATION_LABEL}: '{}' has {} commit(s) for {target:?}",
        project.name, plan.count
    );

    Ok(Preparation::Ready(Box::new(Prepared {
        plan,
        range,
        head,
        target,
        result,
    })))
}

struct Applied {
    target_path: PathBuf,
    patch_count: u32,
    outcome: ApplyOutcome,
}

fn apply(
    git: &dyn RepositoryAdapter,
    project: &str,
    clone_path: &Path,
    range: &CommitRange,
    target: &TargetPlan,
    committer: Option<&Identity>,
) -> Result<Applied> {
    let mut phase = PhaseTracker::resume(project, SyncPhase::PatchReady);

    if target.mutates_host() {
        info!(
            "{OPERATION_LABEL}: preparing {} for '{project}': {target:?}",
            target.path().display()
        );
    }
    let target_path = realize_target(target)?;
    if git.am_in_progress(&target_path)? {
        return Err(anyhow!(
            "{} has an unfinished `git am`; run `git am --continue` or `git am --abort` there first",
            target_path.display()
        ));
    }
    if git::repository_has_commits(&target_path)? && git::has_uncommitted_changes(&target_path)? {
        return Err(anyhow!(
            "{} has uncommitted changes; commit or stash them before synchronizing",
            target_path.display()
        ));
    }

    let patch_dir = tempfile::Builder::new()
        .prefix("enclave-patches-")
        .tempdir()
        .context("Failed to create patch directory")?;
    let patches = git.format_patches(clone_path, range, patch_dir.path())?;
    let patch_count = u32::try_from(patches.len()).unwrap_or(u32::MAX);

    phase.advance(SyncPhase::Applying)?;
    info!(
        "{OPERATION_LABEL}: applying {patch_count} patch(es) for '{project}' in {}",
        target_path.display()
    );
    let outcome = git.apply_patches(&target_path, &patches, committer)?;
    match outcome {
        ApplyOutcome::Applied => phase.advance(SyncPhase::Merged)?,
        ApplyOutcome::Conflict { .. } => phase.advance(SyncPhase::Conflict)?,
    }

    Ok(Applied {
        target_path,
        patch_count,
        outcome,
    })
}

fn conflict_guidance(target: &Path, detail: &str) -> String {
    let mut message = format!(
        "Patch replay stopped in {}. Resolve the conflicts there, `git add` the files and run `git am --continue`, or run `git am --abort` to drop the series. The merge point was not advanced; synchronize again once the target is clean.",
        target.display()
    );
    if !detail.is_empty() {
        message.push_str("\n\n");
        message.push_str(detail);
    }
    message
}

fn record_history(db: &Database, result: &ProjectSyncResult) {
    let entry = SyncHistoryEntry::new(
        &result.name,
        result.outcome,
        result.from_commit.clone(),
        result.merge_point.clone(),
        result.commits_applied,
        result.message.clone(),
    );
    if let Err(err) = db.append_sync_history(&entry) {
        warn!(
            "{OPERATION_LABEL}: failed to record history for '{}': {err:#}",
            result.name
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_tracker_rejects_skipping_states() {
        let mut phase = PhaseTracker::new("web");
        assert!(phase.advance(SyncPhase::Applying).is_err());
        phase.advance(SyncPhase::Counting).unwrap();
        phase.advance(SyncPhase::PatchReady).unwrap();
        phase.advance(SyncPhase::Applying).unwrap();
        phase.advance(SyncPhase::Merged).unwrap();
        assert!(phase.advance(SyncPhase::Conflict).is_err());
    }

    #[test]
    fn conflict_guidance_names_continue_and_abort() {
        let message = conflict_guidance(Path::new("/repo"), "Patch failed at 0001");
        assert!(message.contains("git am --continue"));
        assert!(message.contains("git am --abort"));
        assert!(message.ends_with("Patch failed at 0001"));
    }
}
