use anyhow::{Context, Result, anyhow};
use git2::{Repository, RepositoryInitOptions};
use std::path::{Path, PathBuf};

/// Opens the repository containing `path`, resolving a linked worktree back
/// to its main repository.
pub fn open_main_repository(path: &Path) -> Result<Repository> {
    let repo = Repository::open(path)
        .with_context(|| format!("Failed to open git repository at {}", path.display()))?;
    if !repo.is_worktree() {
        return Ok(repo);
    }

    let common = repo.commondir().to_path_buf();
    Repository::open(&common).with_context(|| {
        format!(
            "Failed to open main repository {} for worktree {}",
            common.display(),
            path.display()
        )
    })
}

pub fn is_git_repository(path: &Path) -> bool {
    Repository::open(path).is_ok()
}

/// Working directory of the main repository behind `path`.
pub fn main_workdir(path: &Path) -> Result<PathBuf> {
    let repo = open_main_repository(path)?;
    repo.workdir()
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow!("Repository at {} is bare", path.display()))
}

pub fn init_repository(path: &Path, initial_branch: &str) -> Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut opts = RepositoryInitOptions::new();
    opts.initial_head(initial_branch);
    Repository::init_opts(path, &opts)
        .with_context(|| format!("Failed to initialise repository at {}", path.display()))?;
    log::info!(
        "Initialised repository at {} on '{initial_branch}'",
        path.display()
    );
    Ok(())
}

pub fn repository_has_commits(path: &Path) -> Result<bool> {
    let repo = Repository::open(path)?;
    match repo.head() {
        Ok(head) => Ok(head.target().is_some()),
        Err(e)
            if e.code() == git2::ErrorCode::UnbornBranch
                || e.code() == git2::ErrorCode::NotFound =>
        {
            Ok(false)
        }
        Err(e) => Err(anyhow!("Failed to read HEAD: {e}")),
    }
}

/// Branch checked out at `path`, `None` for a detached HEAD. An unborn HEAD
/// reports the branch it will create.
pub fn get_current_branch(path: &Path) -> Result<Option<String>> {
    let repo = Repository::open(path)?;
    match repo.head() {
        Ok(head) if head.is_branch() => Ok(head.shorthand().map(str::to_string)),
        Ok(_) => Ok(None),
        Err(e) if e.code() == git2::ErrorCode::UnbornBranch => {
            let head = repo.find_reference("HEAD")?;
            Ok(head
                .symbolic_target()
                .and_then(|t| t.strip_prefix("refs/heads/"))
                .map(str::to_string))
        }
        Err(e) => Err(anyhow!("Failed to read HEAD: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::TempDir;

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(status.status.success(), "git {:?} failed", args);
    }

    #[test]
    fn init_reports_unborn_branch() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("fresh");
        init_repository(&path, "main").unwrap();

        assert!(is_git_repository(&path));
        assert!(!repository_has_commits(&path).unwrap());
        assert_eq!(get_current_branch(&path).unwrap().as_deref(), Some("main"));
    }

    #[test]
    fn worktree_resolves_to_main_repository() {
        let temp = TempDir::new().unwrap();
        let main = temp.path().join("main");
        std::fs::create_dir_all(&main).unwrap();
        git(&main, &["init", "--initial-branch=main"]);
        git(&main, &["config", "user.email", "test@example.com"]);
        git(&main, &["config", "user.name", "Test User"]);
        git(&main, &["commit", "--allow-empty", "-m", "init"]);
        let linked = temp.path().join("linked");
        git(
            &main,
            &["worktree", "add", "-b", "topic", linked.to_str().unwrap()],
        );

        let workdir = main_workdir(&linked).unwrap();
        assert_eq!(
            workdir.canonicalize().unwrap(),
            main.canonicalize().unwrap()
        );
        assert_eq!(get_current_branch(&linked).unwrap().as_deref(), Some("topic"));
    }
}
