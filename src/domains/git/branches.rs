use super::repository::{get_current_branch, repository_has_commits};
use anyhow::{Result, anyhow};
use git2::build::CheckoutBuilder;
use git2::{BranchType, Repository};
use std::path::Path;

pub fn branch_exists(repo_path: &Path, branch_name: &str) -> Result<bool> {
    let repo = Repository::open(repo_path)?;

    match repo.find_branch(branch_name, BranchType::Local) {
        Ok(_) => Ok(true),
        Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(false),
        // Treat corrupted branches as non-existent
        Err(e)
            if e.code() == git2::ErrorCode::InvalidSpec
                || e.code() == git2::ErrorCode::GenericError =>
        {
            Ok(false)
        }
        Err(e) => Err(anyhow!("Error checking branch existence: {e}")),
    }
}

/// Switches the working tree at `repo_path` to `branch_name`, creating the
/// branch from HEAD when it does not exist. Refuses to run over uncommitted
/// changes so a developer's edits are never overwritten.
pub fn switch_to_branch(repo_path: &Path, branch_name: &str) -> Result<()> {
    let repo = Repository::open(repo_path)?;

    if get_current_branch(repo_path)?.as_deref() == Some(branch_name) {
        return Ok(());
    }

    if !repository_has_commits(repo_path)? {
        // Nothing to check out yet; point the unborn HEAD at the new name.
        repo.set_head(&format!("refs/heads/{branch_name}"))
            .map_err(|e| anyhow!("Failed to update HEAD to '{branch_name}': {e}"))?;
        return Ok(());
    }

    if super::worktrees::has_uncommitted_changes(repo_path)? {
        return Err(anyhow!(
            "Cannot switch {} to '{branch_name}': working tree has uncommitted changes",
            repo_path.display()
        ));
    }

    if repo.find_branch(branch_name, BranchType::Local).is_err() {
        let head_commit = repo
            .head()
            .and_then(|h| h.peel_to_commit())
            .map_err(|e| {
                anyhow!("Cannot resolve HEAD commit to create branch '{branch_name}': {e}")
            })?;
        repo.branch(branch_name, &head_commit, false)
            .map_err(|e| anyhow!("Failed to create branch '{branch_name}': {e}"))?;
        log::info!("Created branch '{branch_name}' from HEAD");
    }

    checkout_branch(&repo, branch_name)
}

fn checkout_branch(repo: &Repository, branch_name: &str) -> Result<()> {
    let target = repo
        .find_branch(branch_name, BranchType::Local)?
        .into_reference()
        .peel_to_tree()
        .map_err(|e| anyhow!("Failed to resolve tree of '{branch_name}': {e}"))?;

    let mut checkout = CheckoutBuilder::new();
    checkout.safe();
    repo.checkout_tree(target.as_object(), Some(&mut checkout))
        .map_err(|e| anyhow!("Failed to checkout branch '{branch_name}': {e}"))?;
    repo.set_head(&format!("refs/heads/{branch_name}"))
        .map_err(|e| anyhow!("Failed to update HEAD to '{branch_name}': {e}"))?;

    Ok(())
}
