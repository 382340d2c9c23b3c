// Re-export the host-side git helpers used across domains
pub use super::branches::{branch_exists, switch_to_branch};
pub use super::repository::{
    get_current_branch, init_repository, is_git_repository, main_workdir, open_main_repository,
    repository_has_commits,
};
pub use super::worktrees::{
    WorktreeInfo, conflicting_paths, create_worktree_for_branch, find_worktree_for_branch,
    has_uncommitted_changes, list_worktrees,
};
