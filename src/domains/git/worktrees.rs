use super::repository::{get_current_branch, open_main_repository};
use anyhow::{Context, Result, anyhow};
use git2::{BranchType, Repository, StatusOptions, WorktreeAddOptions};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

const CONFLICT_SAMPLE_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    /// `None` for a detached HEAD.
    pub branch: Option<String>,
    pub is_main: bool,
}

/// The main working tree followed by every valid linked worktree.
pub fn list_worktrees(repo_path: &Path) -> Result<Vec<WorktreeInfo>> {
    let repo = open_main_repository(repo_path)?;
    let mut worktrees = Vec::new();

    if let Some(workdir) = repo.workdir() {
        worktrees.push(WorktreeInfo {
            path: workdir.to_path_buf(),
            branch: get_current_branch(workdir)?,
            is_main: true,
        });
    }

    for wt_name in repo.worktrees()?.iter().flatten() {
        let Ok(wt) = repo.find_worktree(wt_name) else {
            continue;
        };
        if wt.validate().is_err() {
            log::debug!("Skipping stale worktree '{wt_name}'");
            continue;
        }
        let path = wt.path().to_path_buf();
        let branch = get_current_branch(&path).unwrap_or(None);
        worktrees.push(WorktreeInfo {
            path,
            branch,
            is_main: false,
        });
    }

    Ok(worktrees)
}

pub fn find_worktree_for_branch(repo_path: &Path, branch: &str) -> Result<Option<WorktreeInfo>> {
    Ok(list_worktrees(repo_path)?
        .into_iter()
        .find(|wt| wt.branch.as_deref() == Some(branch)))
}

/// Adds a linked worktree at `worktree_path` checked out to `branch_name`,
/// creating the branch from HEAD when missing.
pub fn create_worktree_for_branch(
    repo_path: &Path,
    branch_name: &str,
    worktree_path: &Path,
) -> Result<()> {
    if worktree_path.exists() {
        return Err(anyhow!(
            "Cannot create worktree for '{branch_name}': {} already exists",
            worktree_path.display()
        ));
    }
    if let Some(parent) = worktree_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let repo = open_main_repository(repo_path)?;
    let branch = match repo.find_branch(branch_name, BranchType::Local) {
        Ok(branch) => branch,
        Err(_) => {
            let head_commit = repo.head().and_then(|h| h.peel_to_commit()).map_err(|e| {
                anyhow!("Cannot resolve HEAD commit to create branch '{branch_name}': {e}")
            })?;
            log::info!("Creating branch '{branch_name}' at {}", head_commit.id());
            repo.branch(branch_name, &head_commit, false)?
        }
    };
    let branch_ref = branch.into_reference();

    let mut opts = WorktreeAddOptions::new();
    opts.reference(Some(&branch_ref));

    let name = worktree_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(branch_name);
    repo.worktree(name, worktree_path, Some(&opts))
        .with_context(|| format!("Failed to add worktree at {}", worktree_path.display()))?;

    log::info!(
        "Created worktree for '{branch_name}' at {}",
        worktree_path.display()
    );
    Ok(())
}

/// True when tracked files differ from HEAD in the index or working tree.
pub fn has_uncommitted_changes(path: &Path) -> Result<bool> {
    let repo = Repository::open(path)?;
    let mut opts = StatusOptions::new();
    opts.include_untracked(false).include_ignored(false);
    let statuses = repo
        .statuses(Some(&mut opts))
        .with_context(|| format!("Failed to read status of {}", path.display()))?;
    Ok(!statuses.is_empty())
}

/// Up to five paths with unresolved conflicts in the index at `path`.
pub fn conflicting_paths(path: &Path) -> Result<Vec<String>> {
    let repo = Repository::open(path)?;
    let index = repo.index().context("Failed to open repository index")?;
    if !index.has_conflicts() {
        return Ok(Vec::new());
    }
    collect_conflicting_paths(&index)
}

fn collect_conflicting_paths(index: &git2::Index) -> Result<Vec<String>> {
    let mut seen = BTreeSet::new();
    let mut conflicts_iter = index
        .conflicts()
        .with_context(|| "Failed to read merge conflicts")?;

    for conflict in conflicts_iter.by_ref() {
        let conflict = conflict?;
        let path = conflict
            .our
            .as_ref()
            .and_then(index_entry_path)
            .or_else(|| conflict.their.as_ref().and_then(index_entry_path))
            .or_else(|| conflict.ancestor.as_ref().and_then(index_entry_path));

        if let Some(path) = path {
            seen.insert(path);
            if seen.len() == CONFLICT_SAMPLE_LIMIT {
                break;
            }
        }
    }

    Ok(seen.into_iter().collect())
}

fn index_entry_path(entry: &git2::IndexEntry) -> Option<String> {
    std::str::from_utf8(entry.path.as_ref())
        .ok()
        .map(|s| s.trim_end_matches(char::from(0)).to_string())
}
