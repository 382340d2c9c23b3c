use anyhow::{Result, anyhow};
use log::debug;
use std::path::Path;
use std::sync::Arc;

use super::types::{Baseline, CloneBaseline, CommitSummary, Divergence, DivergencePlan};
use crate::domains::git::{CommitRange, RepositoryAdapter};
use crate::domains::merge::types::MergePoint;
use crate::domains::projects::Project;
use crate::errors::EnclaveError;

const OPERATION_LABEL: &str = "divergence";

/// Read-only view of how far a project's clone is ahead of its merge point.
#[derive(Clone)]
pub struct DivergenceTracker {
    git: Arc<dyn RepositoryAdapter>,
}

impl DivergenceTracker {
    pub fn new(git: Arc<dyn RepositoryAdapter>) -> Self {
        Self { git }
    }

    /// Works out the commit range still to be synchronized. The merge point
    /// wins over the clone baseline; `source_rev` selects the exported
    /// revision (clone HEAD when `None`).
    pub fn plan(
        &self,
        clone_path: &Path,
        project: &Project,
        merge_point: Option<&MergePoint>,
        cloned_at: Option<&CloneBaseline>,
        source_rev: Option<&str>,
    ) -> Result<Divergence<DivergencePlan>> {
        if !clone_path.is_dir() {
            return Ok(Divergence::Unavailable {
                reason: format!("clone directory {} is missing", clone_path.display()),
            });
        }
        if !clone_path.join(".git").exists() {
            return Ok(Divergence::Unavailable {
                reason: format!("{} is not a git repository", clone_path.display()),
            });
        }

        let rev = source_rev.unwrap_or("HEAD");
        let head = self.git.resolve_commit(clone_path, rev)?;
        let Some(head) = head else {
            if source_rev.is_some() {
                return Err(EnclaveError::validation(
                    "source_branch",
                    format!("'{rev}' does not name a commit in '{}'", project.name),
                )
                .into());
            }
            debug!(
                "{OPERATION_LABEL}: '{}' has no commits yet",
                project.name
            );
            let baseline = merge_point
                .map(|mp| Baseline::MergePoint(mp.commit_id.clone()))
                .unwrap_or(Baseline::Empty);
            return Ok(Divergence::Available(DivergencePlan::empty(None, baseline)));
        };

        let baseline = match (merge_point, cloned_at) {
            (Some(mp), _) => Baseline::MergePoint(mp.commit_id.clone()),
            (None, _) if project.is_discovered() => Baseline::Empty,
            (None, Some(clone)) => clone
                .commit_id
                .clone()
                .map(Baseline::Cloned)
                .unwrap_or(Baseline::Empty),
            (None, None) => Baseline::Root(self.git.root_commits(clone_path, &head)?),
        };

        let range = match &baseline {
            Baseline::Empty => CommitRange::Full { head: head.clone() },
            Baseline::Root(roots) => CommitRange::Since {
                bases: roots.clone(),
                head: head.clone(),
            },
            Baseline::MergePoint(base) | Baseline::Cloned(base) => {
                if *base == head {
                    return Ok(Divergence::Available(DivergencePlan::empty(
                        Some(head.clone()),
                        baseline.clone(),
                    )));
                }
                if !self.git.is_ancestor(clone_path, base, &head)? {
                    return Err(anyhow!(
                        "baseline {base} of '{}' is not an ancestor of {head}; the clone's history was rewritten",
                        project.name
                    ));
                }
                CommitRange::Since {
                    bases: vec![base.clone()],
                    head: head.clone(),
                }
            }
        };

        let count = self.git.count_commits(clone_path, &range)?;
        debug!(
            "{OPERATION_LABEL}: '{}' is {count} commit(s) ahead of {baseline:?}",
            project.name
        );

        Ok(Divergence::Available(DivergencePlan {
            head: Some(head),
            baseline,
            range: (count > 0).then_some(range),
            count,
        }))
    }

    pub fn commits_since(
        &self,
        clone_path: &Path,
        project: &Project,
        merge_point: Option<&MergePoint>,
        cloned_at: Option<&CloneBaseline>,
    ) -> Result<Divergence<u32>> {
        Ok(self
            .plan(clone_path, project, merge_point, cloned_at, None)?
            .map(|plan| plan.count))
    }

    /// Oldest first.
    pub fn commit_list(
        &self,
        clone_path: &Path,
        project: &Project,
        merge_point: Option<&MergePoint>,
        cloned_at: Option<&CloneBaseline>,
    ) -> Result<Divergence<Vec<CommitSummary>>> {
        match self.plan(clone_path, project, merge_point, cloned_at, None)? {
            Divergence::Available(plan) => Ok(Divergence::Available(self.commits_in(clone_path, &plan)?)),
            Divergence::Unavailable { reason } => Ok(Divergence::Unavailable { reason }),
        }
    }

    pub fn commits_in(&self, clone_path: &Path, plan: &DivergencePlan) -> Result<Vec<CommitSummary>> {
        match &plan.range {
            Some(range) => self.git.list_commits(clone_path, range),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::git::GitCli;
    use crate::domains::projects::Provenance;
    use chrono::Utc;
    use std::path::PathBuf;
    use std::process::Command;
    use tempfile::TempDir;

    fn git(dir: &Path, args: &[&str]) -> String {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(output.status.success(), "git {:?} failed", args);
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    fn repo_with_commits(dir: &Path, count: usize) -> Vec<String> {
        std::fs::create_dir_all(dir).unwrap();
        git(dir, &["init", "--initial-branch=main"]);
        git(dir, &["config", "user.email", "test@example.com"]);
        git(dir, &["config", "user.name", "Test User"]);
        (0..count)
            .map(|i| {
                std::fs::write(dir.join("file.txt"), format!("{i}\n")).unwrap();
                git(dir, &["add", "."]);
                git(dir, &["commit", "-m", &format!("commit {i}")]);
                git(dir, &["rev-parse", "HEAD"])
            })
            .collect()
    }

    fn project(provenance: Provenance) -> Project {
        Project {
            name: "web".to_string(),
            source_path: PathBuf::from("/src/web"),
            branch: None,
            tracked: true,
            provenance,
        }
    }

    fn merge_point(commit: &str) -> MergePoint {
        MergePoint {
            project: "web".to_string(),
            commit_id: commit.to_string(),
            target_branch: None,
            commits_applied: 0,
            updated_at: Utc::now(),
        }
    }

    fn cloned_at(commit: Option<&str>) -> CloneBaseline {
        CloneBaseline {
            project: "web".to_string(),
            commit_id: commit.map(str::to_string),
            recorded_at: Utc::now(),
        }
    }

    fn tracker() -> DivergenceTracker {
        DivergenceTracker::new(Arc::new(GitCli::default()))
    }

    #[test]
    fn unrecorded_clone_counts_past_root() {
        let temp = TempDir::new().unwrap();
        repo_with_commits(temp.path(), 3);
        let count = tracker()
            .commits_since(temp.path(), &project(Provenance::Configured), None, None)
            .unwrap();
        assert_eq!(count, Divergence::Available(2));
    }

    #[test]
    fn full_clone_counts_from_the_commit_it_was_cloned_at() {
        let temp = TempDir::new().unwrap();
        let commits = repo_with_commits(temp.path(), 4);
        let tracker = tracker();
        let web = project(Provenance::Configured);

        let plan = tracker
            .plan(temp.path(), &web, None, Some(&cloned_at(Some(&commits[2]))), None)
            .unwrap();
        let plan = plan.available().unwrap();
        assert_eq!(plan.count, 1);
        assert_eq!(plan.baseline, Baseline::Cloned(commits[2].clone()));

        let untouched = cloned_at(Some(&commits[3]));
        assert_eq!(
            tracker.commits_since(temp.path(), &web, None, Some(&untouched)).unwrap(),
            Divergence::Available(0)
        );
    }

    #[test]
    fn merge_point_takes_precedence_over_clone_commit() {
        let temp = TempDir::new().unwrap();
        let commits = repo_with_commits(temp.path(), 4);
        let count = tracker()
            .commits_since(
                temp.path(),
                &project(Provenance::Configured),
                Some(&merge_point(&commits[2])),
                Some(&cloned_at(Some(&commits[0]))),
            )
            .unwrap();
        assert_eq!(count, Divergence::Available(1));
    }

    #[test]
    fn clone_of_empty_source_counts_everything() {
        let temp = TempDir::new().unwrap();
        repo_with_commits(temp.path(), 2);
        let plan = tracker()
            .plan(
                temp.path(),
                &project(Provenance::Configured),
                None,
                Some(&cloned_at(None)),
                None,
            )
            .unwrap();
        let plan = plan.available().unwrap();
        assert_eq!(plan.count, 2);
        assert_eq!(plan.baseline, Baseline::Empty);
    }

    #[test]
    fn clone_commit_missing_from_history_is_an_error() {
        let temp = TempDir::new().unwrap();
        let commits = repo_with_commits(temp.path(), 2);
        git(temp.path(), &["reset", "--hard", &commits[0]]);
        git(temp.path(), &["commit", "--allow-empty", "-m", "replacement"]);

        let err = tracker()
            .plan(
                temp.path(),
                &project(Provenance::Configured),
                None,
                Some(&cloned_at(Some(&commits[1]))),
                None,
            )
            .unwrap_err();
        assert!(format!("{err:#}").contains("rewritten"));
    }

    #[test]
    fn discovered_project_counts_whole_history() {
        let temp = TempDir::new().unwrap();
        repo_with_commits(temp.path(), 3);
        let plan = tracker()
            .plan(temp.path(), &project(Provenance::Discovered), None, None, None)
            .unwrap();
        let plan = plan.available().unwrap();
        assert_eq!(plan.count, 3);
        assert_eq!(plan.baseline, Baseline::Empty);
    }

    #[test]
    fn discovered_project_without_commits_is_zero() {
        let temp = TempDir::new().unwrap();
        repo_with_commits(temp.path(), 0);
        let count = tracker()
            .commits_since(temp.path(), &project(Provenance::Discovered), None, None)
            .unwrap();
        assert_eq!(count, Divergence::Available(0));
    }

    #[test]
    fn merge_point_at_head_is_zero_and_earlier_point_counts() {
        let temp = TempDir::new().unwrap();
        let commits = repo_with_commits(temp.path(), 4);
        let tracker = tracker();
        let web = project(Provenance::Configured);

        let at_head = merge_point(&commits[3]);
        assert_eq!(
            tracker.commits_since(temp.path(), &web, Some(&at_head), None).unwrap(),
            Divergence::Available(0)
        );

        let earlier = merge_point(&commits[1]);
        let listed = tracker
            .commit_list(temp.path(), &web, Some(&earlier), None)
            .unwrap();
        let listed = listed.available().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].summary, "commit 2");
    }

    #[test]
    fn rewritten_history_is_an_error() {
        let temp = TempDir::new().unwrap();
        let commits = repo_with_commits(temp.path(), 3);
        git(temp.path(), &["reset", "--hard", &commits[0]]);
        std::fs::write(temp.path().join("other.txt"), "x").unwrap();
        git(temp.path(), &["add", "."]);
        git(temp.path(), &["commit", "-m", "diverged"]);

        let result = tracker().plan(
            temp.path(),
            &project(Provenance::Configured),
            Some(&merge_point(&commits[2])),
            None,
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn missing_directory_is_unavailable() {
        let temp = TempDir::new().unwrap();
        let result = tracker()
            .commits_since(
                &temp.path().join("gone"),
                &project(Provenance::Configured),
                None,
                None,
            )
            .unwrap();
        assert!(result.is_unavailable());
    }
}
