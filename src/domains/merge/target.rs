use anyhow::{Result, anyhow};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::domains::git::service as git;
use crate::domains::projects::Project;
use crate::domains::settings::TargetPolicy;
use crate::errors::EnclaveError;
use crate::utils::path_utils::branch_dir_name;

const DEFAULT_INIT_BRANCH: &str = "main";

/// Where patches for a project will be replayed, decided without touching
/// the host so it can back a dry run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetPlan {
    /// The source checkout as it is.
    Source { path: PathBuf },
    /// A worktree (main or linked) already on the requested branch.
    ExistingWorktree { path: PathBuf, branch: String },
    CreateWorktree {
        repo: PathBuf,
        path: PathBuf,
        branch: String,
    },
    SwitchMainTree { path: PathBuf, branch: String },
    /// Discovered project with nothing on the host yet.
    InitRepository { path: PathBuf, branch: String },
}

impl TargetPlan {
    pub fn path(&self) -> &Path {
        match self {
            TargetPlan::Source { path }
            | TargetPlan::ExistingWorktree { path, .. }
            | TargetPlan::CreateWorktree { path, .. }
            | TargetPlan::SwitchMainTree { path, .. }
            | TargetPlan::InitRepository { path, .. } => path,
        }
    }

    pub fn branch(&self) -> Option<&str> {
        match self {
            TargetPlan::Source { .. } => None,
            TargetPlan::ExistingWorktree { branch, .. }
            | TargetPlan::CreateWorktree { branch, .. }
            | TargetPlan::SwitchMainTree { branch, .. }
            | TargetPlan::InitRepository { branch, .. } => Some(branch),
        }
    }

    /// True when realizing the plan changes the host before any patch is applied.
    pub fn mutates_host(&self) -> bool {
        !matches!(
            self,
            TargetPlan::Source { .. } | TargetPlan::ExistingWorktree { .. }
        )
    }
}

pub fn plan_target(
    project: &Project,
    branch: Option<&str>,
    policy: TargetPolicy,
    worktree_root: Option<&Path>,
) -> Result<TargetPlan> {
    let source = &project.source_path;
    let branch = branch.map(str::trim).filter(|b| !b.is_empty());

    if !source.exists() {
        if project.is_discovered() {
            return Ok(TargetPlan::InitRepository {
                path: source.clone(),
                branch: branch.unwrap_or(DEFAULT_INIT_BRANCH).to_string(),
            });
        }
        return Err(EnclaveError::validation(
            "source_path",
            format!("source of '{}' no longer exists: {}", project.name, source.display()),
        )
        .into());
    }
    if !git::is_git_repository(source) {
        return Err(EnclaveError::validation(
            "source_path",
            format!(
                "source of '{}' is no longer a git repository: {}",
                project.name,
                source.display()
            ),
        )
        .into());
    }

    let Some(branch) = branch else {
        return Ok(TargetPlan::Source {
            path: source.clone(),
        });
    };

    if let Some(worktree) = git::find_worktree_for_branch(source, branch)? {
        return Ok(TargetPlan::ExistingWorktree {
            path: worktree.path,
            branch: branch.to_string(),
        });
    }

    let main = git::main_workdir(source)?;
    match policy {
        TargetPolicy::CreateWorktree if git::repository_has_commits(&main)? => {
            let repo_name = main
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| project.name.replace('/', "-"));
            let parent = match worktree_root {
                Some(root) => root.to_path_buf(),
                None => main
                    .parent()
                    .map(Path::to_path_buf)
                    .ok_or_else(|| anyhow!("{} has no parent directory", main.display()))?,
            };
            let path = parent.join(format!("{repo_name}-{}", branch_dir_name(branch)));
            if path.exists() {
                return Err(EnclaveError::validation(
                    "target_branch",
                    format!(
                        "cannot create a worktree for '{branch}': {} already exists",
                        path.display()
                    ),
                )
                .into());
            }
            Ok(TargetPlan::CreateWorktree {
                repo: main,
                path,
                branch: branch.to_string(),
            })
        }
        // An unborn repository cannot host a linked worktree, so it switches instead.
        TargetPolicy::CreateWorktree | TargetPolicy::SwitchMainTree => {
            Ok(TargetPlan::SwitchMainTree {
                path: main,
                branch: branch.to_string(),
            })
        }
        TargetPolicy::RequireExistingWorktree => Err(EnclaveError::validation(
            "target_branch",
            format!(
                "no worktree of {} has '{branch}' checked out; create one with `git worktree add`",
                main.display()
            ),
        )
        .into()),
    }
}

/// Carries out a plan and returns the directory to apply patches in.
pub fn realize_target(plan: &TargetPlan) -> Result<PathBuf> {
    match plan {
        TargetPlan::Source { path } | TargetPlan::ExistingWorktree { path, .. } => {
            Ok(path.clone())
        }
        TargetPlan::CreateWorktree { repo, path, branch } => {
            git::create_worktree_for_branch(repo, branch, path)?;
            Ok(path.clone())
        }
        TargetPlan::SwitchMainTree { path, branch } => {
            info!("Switching {} to branch '{branch}'", path.display());
            git::switch_to_branch(path, branch)?;
            Ok(path.clone())
        }
        TargetPlan::InitRepository { path, branch } => {
            git::init_repository(path, branch)?;
            Ok(path.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::projects::Provenance;
    use crate::utils::path_utils::same_location;
    use std::process::Command;
    use tempfile::TempDir;

    fn git_cmd(dir: &Path, args: &[&str]) {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(output.status.success(), "git {:?} failed", args);
    }

    fn init_repo(dir: &Path) {
        std::fs::create_dir_all(dir).unwrap();
        git_cmd(dir, &["init", "--initial-branch=main"]);
        git_cmd(dir, &["config", "user.email", "test@example.com"]);
        git_cmd(dir, &["config", "user.name", "Test User"]);
        git_cmd(dir, &["commit", "--allow-empty", "-m", "init"]);
    }

    fn project(path: &Path, provenance: Provenance) -> Project {
        Project {
            name: "web".to_string(),
            source_path: path.to_path_buf(),
            branch: None,
            tracked: true,
            provenance,
        }
    }

    #[test]
    fn no_branch_uses_source_checkout() {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("web");
        init_repo(&repo);

        let plan = plan_target(
            &project(&repo, Provenance::Configured),
            None,
            TargetPolicy::default(),
            None,
        )
        .unwrap();
        assert_eq!(plan, TargetPlan::Source { path: repo });
        assert!(!plan.mutates_host());
    }

    #[test]
    fn prefers_existing_worktree_on_branch() {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("web");
        init_repo(&repo);
        let linked = temp.path().join("web-review");
        git_cmd(
            &repo,
            &["worktree", "add", "-b", "review", linked.to_str().unwrap()],
        );

        let plan = plan_target(
            &project(&repo, Provenance::Configured),
            Some("review"),
            TargetPolicy::SwitchMainTree,
            None,
        )
        .unwrap();
        assert!(matches!(plan, TargetPlan::ExistingWorktree { .. }));
        assert!(same_location(plan.path(), &linked));

        let main = plan_target(
            &project(&repo, Provenance::Configured),
            Some("main"),
            TargetPolicy::RequireExistingWorktree,
            None,
        )
        .unwrap();
        assert!(same_location(main.path(), &repo));
    }

    #[test]
    fn creates_worktree_next_to_source_by_default() {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("web");
        init_repo(&repo);

        let plan = plan_target(
            &project(&repo, Provenance::Configured),
            Some("agent/feature"),
            TargetPolicy::CreateWorktree,
            None,
        )
        .unwrap();
        let expected = temp.path().join("web-agent-feature");
        assert!(plan.mutates_host());
        assert_eq!(plan.branch(), Some("agent/feature"));
        assert!(!expected.exists());

        let path = realize_target(&plan).unwrap();
        assert!(same_location(&path, &expected));
        assert!(git::find_worktree_for_branch(&repo, "agent/feature").unwrap().is_some());
    }

    #[test]
    fn require_existing_worktree_refuses() {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("web");
        init_repo(&repo);

        let err = plan_target(
            &project(&repo, Provenance::Configured),
            Some("release"),
            TargetPolicy::RequireExistingWorktree,
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("git worktree add"));
    }

    #[test]
    fn missing_source_initialises_only_for_discovered_projects() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("tool");

        assert!(plan_target(
            &project(&missing, Provenance::Configured),
            None,
            TargetPolicy::default(),
            None
        )
        .is_err());

        let plan = plan_target(
            &project(&missing, Provenance::Discovered),
            None,
            TargetPolicy::default(),
            None,
        )
        .unwrap();
        assert_eq!(
            plan,
            TargetPlan::InitRepository {
                path: missing.clone(),
                branch: "main".to_string()
            }
        );
        realize_target(&plan).unwrap();
        assert!(git::is_git_repository(&missing));
    }
}
