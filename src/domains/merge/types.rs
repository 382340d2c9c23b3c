use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::domains::divergence::types::CommitSummary;
use crate::errors::EnclaveError;

/// Last commit of a project's isolated clone already replayed onto the host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MergePoint {
    pub project: String,
    pub commit_id: String,
    /// Branch the last successful run applied into. Reused when a later run
    /// names no target.
    pub target_branch: Option<String>,
    pub commits_applied: u32,
    pub updated_at: DateTime<Utc>,
}

/// Per-project state during one synchronization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Counting,
    NoChanges,
    PatchReady,
    Applying,
    Merged,
    Conflict,
}

impl SyncPhase {
    pub fn can_advance_to(self, next: SyncPhase) -> bool {
        matches!(
            (self, next),
            (SyncPhase::Idle, SyncPhase::Counting)
                | (SyncPhase::Counting, SyncPhase::NoChanges)
                | (SyncPhase::Counting, SyncPhase::PatchReady)
                | (SyncPhase::PatchReady, SyncPhase::Applying)
                | (SyncPhase::Applying, SyncPhase::Merged)
                | (SyncPhase::Applying, SyncPhase::Conflict)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    NoChanges,
    Merged,
    Conflict,
    Error,
    /// Dry run: the plan was computed, nothing was touched.
    Planned,
    /// The approver refused the patch series.
    Declined,
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::NoChanges => "no_changes",
            SyncOutcome::Merged => "merged",
            SyncOutcome::Conflict => "conflict",
            SyncOutcome::Error => "error",
            SyncOutcome::Planned => "planned",
            SyncOutcome::Declined => "declined",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, SyncOutcome::Conflict | SyncOutcome::Error)
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no_changes" => Ok(SyncOutcome::NoChanges),
            "merged" => Ok(SyncOutcome::Merged),
            "conflict" => Ok(SyncOutcome::Conflict),
            "error" => Ok(SyncOutcome::Error),
            "planned" => Ok(SyncOutcome::Planned),
            "declined" => Ok(SyncOutcome::Declined),
            other => Err(format!("unknown outcome '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Host branch to apply into. Falls back to the branch remembered from
    /// the previous successful run, then to whatever the source has checked out.
    pub target_branch: Option<String>,
    /// Branch of the isolated clone to export. Defaults to the clone's HEAD.
    pub source_branch: Option<String>,
    pub auto_approve: bool,
    pub dry_run: bool,
}

impl SyncRequest {
    pub fn into_branch(mut self, branch: impl Into<String>) -> Self {
        self.target_branch = Some(branch.into());
        self
    }

    pub fn from_branch(mut self, branch: impl Into<String>) -> Self {
        self.source_branch = Some(branch.into());
        self
    }

    pub fn approved(mut self) -> Self {
        self.auto_approve = true;
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSyncResult {
    pub name: String,
    pub outcome: SyncOutcome,
    pub commits_applied: u32,
    /// Merge point the run started from.
    pub from_commit: Option<String>,
    /// Commit recorded as the merge point after this run, if any.
    pub merge_point: Option<String>,
    pub target_path: Option<PathBuf>,
    pub target_branch: Option<String>,
    /// Commits that were (or, for a dry run, would be) replayed.
    pub commits: Vec<CommitSummary>,
    pub conflicting_paths: Vec<String>,
    pub message: Option<String>,
}

impl ProjectSyncResult {
    pub fn new(name: impl Into<String>, outcome: SyncOutcome) -> Self {
        Self {
            name: name.into(),
            outcome,
            commits_applied: 0,
            from_commit: None,
            merge_point: None,
            target_path: None,
            target_branch: None,
            commits: Vec::new(),
            conflicting_paths: Vec::new(),
            message: None,
        }
    }

    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        let mut result = Self::new(name, SyncOutcome::Error);
        result.message = Some(message.into());
        result
    }

    /// Failure detail in the public error taxonomy. `None` for non-failures.
    pub fn as_error(&self) -> Option<EnclaveError> {
        let message = self.message.clone().unwrap_or_default();
        match self.outcome {
            SyncOutcome::Conflict => Some(EnclaveError::MergeConflict {
                project: self.name.clone(),
                files: self.conflicting_paths.clone(),
                message,
            }),
            SyncOutcome::Error => Some(EnclaveError::git(
                &format!("synchronize {}", self.name),
                message,
            )),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub session: String,
    pub dry_run: bool,
    pub projects: Vec<ProjectSyncResult>,
}

impl SyncReport {
    pub fn merged_count(&self) -> usize {
        self.projects
            .iter()
            .filter(|p| p.outcome == SyncOutcome::Merged)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.projects
            .iter()
            .filter(|p| p.outcome.is_failure())
            .count()
    }

    pub fn has_failures(&self) -> bool {
        self.failed_count() > 0
    }

    pub fn get(&self, project: &str) -> Option<&ProjectSyncResult> {
        self.projects.iter().find(|p| p.name == project)
    }
}

/// Audit row appended for every synchronization attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncHistoryEntry {
    pub id: String,
    pub project: String,
    pub outcome: SyncOutcome,
    pub from_commit: Option<String>,
    pub to_commit: Option<String>,
    pub commits: u32,
    pub detail: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl SyncHistoryEntry {
    pub fn new(
        project: &str,
        outcome: SyncOutcome,
        from_commit: Option<String>,
        to_commit: Option<String>,
        commits: u32,
        detail: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project: project.to_string(),
            outcome,
            from_commit,
            to_commit,
            commits,
            detail,
            recorded_at: Utc::now(),
        }
    }
}

/// What the approver is asked to sign off on.
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub session: String,
    pub project: String,
    pub target_path: PathBuf,
    pub target_branch: Option<String>,
    pub commits: Vec<CommitSummary>,
}

/// Consulted once per project when a run is not auto-approved.
#[async_trait]
pub trait Approver: Send + Sync {
    async fn approve(&self, request: &ApprovalRequest) -> bool;
}

pub struct AutoApprove;

#[async_trait]
impl Approver for AutoApprove {
    async fn approve(&self, _request: &ApprovalRequest) -> bool {
        true
    }
}
