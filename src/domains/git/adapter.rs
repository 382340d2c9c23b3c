use anyhow::{Context, Result, anyhow};
use log::{debug, error, info, warn};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use crate::domains::divergence::types::CommitSummary;
use crate::domains::settings::Identity;

const OPERATION_LABEL: &str = "git_cli";
const FIELD_SEPARATOR: char = '\u{1f}';
const LOG_FORMAT: &str = "--format=%H%x1f%an%x1f%ae%x1f%aI%x1f%s";

#[derive(Debug, Clone)]
pub struct CloneRequest<'a> {
    pub source: &'a Path,
    pub destination: &'a Path,
    pub branch: Option<&'a str>,
    /// `None` clones the full history.
    pub depth: Option<u32>,
}

/// Commits reachable from `head` that a range covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitRange {
    /// Everything reachable from `head` but not from any of `bases`.
    Since { bases: Vec<String>, head: String },
    /// The whole history of `head`, root commit included.
    Full { head: String },
}

impl CommitRange {
    pub fn head(&self) -> &str {
        match self {
            CommitRange::Since { head, .. } | CommitRange::Full { head } => head,
        }
    }

    fn rev_args(&self) -> Vec<OsString> {
        match self {
            CommitRange::Since { bases, head } => {
                let mut args = vec![OsString::from(head)];
                args.extend(bases.iter().map(|b| OsString::from(format!("^{b}"))));
                args
            }
            CommitRange::Full { head } => vec![OsString::from(head)],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The replay stopped part way and the target is left mid-`am`.
    Conflict { message: String },
}

/// Version-control primitives the engine needs. The engine never reimplements
/// history operations itself.
pub trait RepositoryAdapter: Send + Sync {
    fn clone_repository(&self, request: &CloneRequest) -> Result<()>;
    /// Removes every configured remote and returns their names.
    fn strip_remotes(&self, repo: &Path) -> Result<Vec<String>>;
    fn set_identity(&self, repo: &Path, identity: &Identity) -> Result<()>;
    /// Full commit id for a revision, `None` if it does not name a commit
    /// (including an unborn HEAD).
    fn resolve_commit(&self, repo: &Path, rev: &str) -> Result<Option<String>>;
    fn root_commits(&self, repo: &Path, head: &str) -> Result<Vec<String>>;
    fn count_commits(&self, repo: &Path, range: &CommitRange) -> Result<u32>;
    /// Oldest first.
    fn list_commits(&self, repo: &Path, range: &CommitRange) -> Result<Vec<CommitSummary>>;
    fn is_ancestor(&self, repo: &Path, ancestor: &str, descendant: &str) -> Result<bool>;
    /// Writes one mbox patch per commit into `out_dir`, in replay order.
    fn format_patches(&self, repo: &Path, range: &CommitRange, out_dir: &Path)
    -> Result<Vec<PathBuf>>;
    fn apply_patches(
        &self,
        target: &Path,
        patches: &[PathBuf],
        committer: Option<&Identity>,
    ) -> Result<ApplyOutcome>;
    fn am_in_progress(&self, target: &Path) -> Result<bool>;
}

/// Adapter that shells out to the git binary.
#[derive(Debug, Clone)]
pub struct GitCli {
    binary: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new(crate::domains::settings::types::DEFAULT_GIT_BINARY)
    }
}

impl GitCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self, current_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.current_dir(current_dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C");
        cmd
    }

    fn output(&self, current_dir: &Path, args: &[OsString]) -> Result<Output> {
        debug!(
            "{OPERATION_LABEL}: running git {args:?} in {path}",
            path = current_dir.display()
        );
        self.command(current_dir)
            .args(args)
            .output()
            .with_context(|| format!("Failed to execute git command: {args:?}"))
    }

    /// Runs git and returns trimmed stdout; non-zero exit becomes an error
    /// carrying stderr (or stdout when stderr is empty).
    fn run_git(&self, current_dir: &Path, args: Vec<OsString>) -> Result<String> {
        let output = self.output(current_dir, &args)?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
        }
        Err(command_failure(&args, &output))
    }
}

fn command_failure(args: &[OsString], output: &Output) -> anyhow::Error {
    let stderr_output = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

    error!(
        "{OPERATION_LABEL}: git command failed {args:?}, status: {status:?}, stderr: {stderr}",
        status = output.status.code(),
        stderr = stderr_output
    );

    let combined = if !stderr_output.is_empty() {
        stderr_output
    } else {
        stdout
    };
    anyhow!(combined)
}

fn args<I, S>(items: I) -> Vec<OsString>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    items.into_iter().map(Into::into).collect()
}

fn file_url(path: &Path) -> String {
    let display = path.to_string_lossy().replace('\\', "/");
    if display.starts_with('/') {
        format!("file://{display}")
    } else {
        format!("file:///{display}")
    }
}

impl RepositoryAdapter for GitCli {
    fn clone_repository(&self, request: &CloneRequest) -> Result<()> {
        if request.destination.exists() {
            return Err(anyhow!(
                "Destination directory already exists: {}",
                request.destination.display()
            ));
        }
        let parent = request
            .destination
            .parent()
            .ok_or_else(|| anyhow!("Clone destination has no parent directory"))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;

        // A file:// URL forces the transport path so --depth is honoured for local sources.
        let mut clone_args = args(["clone", "--no-tags"]);
        if let Some(depth) = request.depth {
            clone_args.push(OsString::from(format!("--depth={depth}")));
        }
        if let Some(branch) = request.branch {
            clone_args.extend(args(["--branch", branch]));
        }
        clone_args.push(OsString::from(file_url(request.source)));
        clone_args.push(request.destination.as_os_str().to_os_string());

        info!(
            "{OPERATION_LABEL}: cloning {} into {} (branch={:?}, depth={:?})",
            request.source.display(),
            request.destination.display(),
            request.branch,
            request.depth
        );

        if let Err(err) = self.run_git(parent, clone_args) {
            let _ = fs::remove_dir_all(request.destination);
            return Err(err.context(format!(
                "git clone of {} failed",
                request.source.display()
            )));
        }
        Ok(())
    }

    fn strip_remotes(&self, repo: &Path) -> Result<Vec<String>> {
        let listing = self.run_git(repo, args(["remote"]))?;
        let remotes: Vec<String> = listing
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        for remote in &remotes {
            self.run_git(repo, args(["remote", "remove", remote.as_str()]))
                .with_context(|| format!("Failed to remove remote '{remote}'"))?;
        }
        Ok(remotes)
    }

    fn set_identity(&self, repo: &Path, identity: &Identity) -> Result<()> {
        self.run_git(repo, args(["config", "user.name", identity.name.as_str()]))?;
        self.run_git(repo, args(["config", "user.email", identity.email.as_str()]))?;
        Ok(())
    }

    fn resolve_commit(&self, repo: &Path, rev: &str) -> Result<Option<String>> {
        let spec = format!("{rev}^{{commit}}");
        let output = self.output(repo, &args(["rev-parse", "--verify", "--quiet", spec.as_str()]))?;
        if !output.status.success() {
            return Ok(None);
        }
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!id.is_empty()).then_some(id))
    }

    fn root_commits(&self, repo: &Path, head: &str) -> Result<Vec<String>> {
        let listing = self.run_git(repo, args(["rev-list", "--max-parents=0", head]))?;
        Ok(listing.lines().map(str::to_string).collect())
    }

    fn count_commits(&self, repo: &Path, range: &CommitRange) -> Result<u32> {
        let mut rev_args = args(["rev-list", "--count"]);
        rev_args.extend(range.rev_args());
        let raw = self.run_git(repo, rev_args)?;
        raw.parse::<u32>()
            .with_context(|| format!("Unexpected rev-list count output '{raw}'"))
    }

    fn list_commits(&self, repo: &Path, range: &CommitRange) -> Result<Vec<CommitSummary>> {
        let mut log_args = args(["log", "--reverse", LOG_FORMAT]);
        log_args.extend(range.rev_args());
        log_args.push(OsString::from("--"));
        let raw = self.run_git(repo, log_args)?;

        raw.lines()
            .filter(|l| !l.is_empty())
            .map(|line| {
                let fields: Vec<&str> = line.splitn(5, FIELD_SEPARATOR).collect();
                match fields.as_slice() {
                    [id, name, email, date, subject] => Ok(CommitSummary::new(
                        *id, *name, *email, *date, *subject,
                    )),
                    _ => Err(anyhow!("Malformed git log line: {line}")),
                }
            })
            .collect()
    }

    fn is_ancestor(&self, repo: &Path, ancestor: &str, descendant: &str) -> Result<bool> {
        let merge_args = args(["merge-base", "--is-ancestor", ancestor, descendant]);
        let output = self.output(repo, &merge_args)?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(command_failure(&merge_args, &output)),
        }
    }

    fn format_patches(
        &self,
        repo: &Path,
        range: &CommitRange,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(out_dir)
            .with_context(|| format!("Failed to create patch directory {}", out_dir.display()))?;

        let mut patch_args = args(["format-patch", "-k", "--no-signature", "-o"]);
        patch_args.push(out_dir.as_os_str().to_os_string());
        match range {
            CommitRange::Full { head } => {
                patch_args.extend(args(["--root", head.as_str()]));
            }
            CommitRange::Since { bases, head } if bases.len() == 1 => {
                patch_args.push(OsString::from(format!("{}..{head}", bases[0])));
            }
            CommitRange::Since { .. } => patch_args.extend(range.rev_args()),
        }

        let listing = self.run_git(repo, patch_args)?;
        let patches: Vec<PathBuf> = listing
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| {
                let path = PathBuf::from(l);
                if path.is_absolute() { path } else { repo.join(path) }
            })
            .collect();
        debug!(
            "{OPERATION_LABEL}: exported {} patch(es) from {}",
            patches.len(),
            repo.display()
        );
        Ok(patches)
    }

    fn apply_patches(
        &self,
        target: &Path,
        patches: &[PathBuf],
        committer: Option<&Identity>,
    ) -> Result<ApplyOutcome> {
        if patches.is_empty() {
            return Ok(ApplyOutcome::Applied);
        }

        let mut am_args = args(["am", "--3way", "-k", "--committer-date-is-author-date"]);
        am_args.extend(patches.iter().map(|p| p.as_os_str().to_os_string()));

        debug!(
            "{OPERATION_LABEL}: applying {} patch(es) in {}",
            patches.len(),
            target.display()
        );
        let mut cmd = self.command(target);
        if let Some(identity) = committer {
            cmd.env("GIT_COMMITTER_NAME", &identity.name)
                .env("GIT_COMMITTER_EMAIL", &identity.email);
        }
        let output = cmd
            .args(&am_args)
            .output()
            .with_context(|| format!("Failed to execute git am in {}", target.display()))?;

        if output.status.success() {
            return Ok(ApplyOutcome::Applied);
        }

        if self.am_in_progress(target)? {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            warn!(
                "{OPERATION_LABEL}: git am stopped in {}: {stderr}",
                target.display()
            );
            let message = [stdout, stderr]
                .into_iter()
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            return Ok(ApplyOutcome::Conflict { message });
        }

        Err(command_failure(&am_args, &output))
    }

    fn am_in_progress(&self, target: &Path) -> Result<bool> {
        let raw = self.run_git(target, args(["rev-parse", "--git-path", "rebase-apply"]))?;
        let path = PathBuf::from(raw);
        let path = if path.is_absolute() {
            path
        } else {
            target.join(path)
        };
        Ok(path.exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn git(dir: &Path, args: &[&str]) -> String {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    fn init_repo(dir: &Path) {
        fs::create_dir_all(dir).unwrap();
        git(dir, &["init", "--initial-branch=main"]);
        git(dir, &["config", "user.email", "test@example.com"]);
        git(dir, &["config", "user.name", "Test User"]);
    }

    fn commit_file(dir: &Path, name: &str, content: &str, message: &str) -> String {
        fs::write(dir.join(name), content).unwrap();
        git(dir, &["add", name]);
        git(dir, &["commit", "-m", message]);
        git(dir, &["rev-parse", "HEAD"])
    }

    #[test]
    fn shallow_clone_honours_depth_and_branch() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("source");
        init_repo(&source);
        commit_file(&source, "a.txt", "1", "first");
        commit_file(&source, "a.txt", "2", "second");
        git(&source, &["checkout", "-b", "feature"]);
        let feature_head = commit_file(&source, "b.txt", "x", "feature work");
        git(&source, &["checkout", "main"]);

        let cli = GitCli::default();
        let destination = temp.path().join("clone");
        cli.clone_repository(&CloneRequest {
            source: &source,
            destination: &destination,
            branch: Some("feature"),
            depth: Some(1),
        })
        .unwrap();

        assert_eq!(git(&destination, &["rev-parse", "HEAD"]), feature_head);
        assert_eq!(git(&destination, &["rev-list", "--count", "HEAD"]), "1");
        assert_eq!(cli.root_commits(&destination, "HEAD").unwrap(), vec![feature_head]);
    }

    #[test]
    fn failed_clone_leaves_no_destination() {
        let temp = TempDir::new().unwrap();
        let destination = temp.path().join("clone");
        let result = GitCli::default().clone_repository(&CloneRequest {
            source: &temp.path().join("missing"),
            destination: &destination,
            branch: None,
            depth: Some(1),
        });
        assert!(result.is_err());
        assert!(!destination.exists());
    }

    #[test]
    fn strip_remotes_and_identity() {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("repo");
        init_repo(&repo);
        git(&repo, &["remote", "add", "origin", "https://example.com/a.git"]);
        git(&repo, &["remote", "add", "upstream", "https://example.com/b.git"]);

        let cli = GitCli::default();
        let mut removed = cli.strip_remotes(&repo).unwrap();
        removed.sort();
        assert_eq!(removed, vec!["origin", "upstream"]);
        assert_eq!(git(&repo, &["remote"]), "");

        cli.set_identity(&repo, &Identity::new("Agent", "agent@example.com"))
            .unwrap();
        assert_eq!(git(&repo, &["config", "user.name"]), "Agent");
    }

    #[test]
    fn resolve_commit_handles_unborn_head() {
        let temp = TempDir::new().unwrap();
        init_repo(temp.path());
        let cli = GitCli::default();
        assert_eq!(cli.resolve_commit(temp.path(), "HEAD").unwrap(), None);

        let head = commit_file(temp.path(), "a.txt", "1", "first");
        assert_eq!(cli.resolve_commit(temp.path(), "HEAD").unwrap(), Some(head));
        assert_eq!(cli.resolve_commit(temp.path(), "no-such-branch").unwrap(), None);
    }

    #[test]
    fn counts_and_lists_ranges() {
        let temp = TempDir::new().unwrap();
        init_repo(temp.path());
        let root = commit_file(temp.path(), "a.txt", "1", "first");
        commit_file(temp.path(), "a.txt", "2", "second");
        let head = commit_file(temp.path(), "a.txt", "3", "third");

        let cli = GitCli::default();
        let since = CommitRange::Since {
            bases: vec![root.clone()],
            head: head.clone(),
        };
        let full = CommitRange::Full { head: head.clone() };
        assert_eq!(cli.count_commits(temp.path(), &since).unwrap(), 2);
        assert_eq!(cli.count_commits(temp.path(), &full).unwrap(), 3);

        let commits = cli.list_commits(temp.path(), &since).unwrap();
        let subjects: Vec<_> = commits.iter().map(|c| c.summary.as_str()).collect();
        assert_eq!(subjects, vec!["second", "third"]);
        assert_eq!(commits[1].id, head);
        assert_eq!(commits[0].author_email, "test@example.com");

        assert!(cli.is_ancestor(temp.path(), &root, &head).unwrap());
        assert!(!cli.is_ancestor(temp.path(), &head, &root).unwrap());
    }

    #[test]
    fn patches_replay_with_author_metadata() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("source");
        init_repo(&source);
        commit_file(&source, "a.txt", "base\n", "base");

        let cli = GitCli::default();
        let target = temp.path().join("target");
        cli.clone_repository(&CloneRequest {
            source: &source,
            destination: &target,
            branch: None,
            depth: None,
        })
        .unwrap();
        git(&target, &["config", "user.email", "host@example.com"]);
        git(&target, &["config", "user.name", "Host"]);

        let base = git(&source, &["rev-parse", "HEAD"]);
        git(&source, &["config", "user.name", "Agent Smith"]);
        commit_file(&source, "b.txt", "new\n", "add b");
        let head = git(&source, &["rev-parse", "HEAD"]);

        let patches_dir = temp.path().join("patches");
        let patches = cli
            .format_patches(
                &source,
                &CommitRange::Since {
                    bases: vec![base],
                    head: head.clone(),
                },
                &patches_dir,
            )
            .unwrap();
        assert_eq!(patches.len(), 1);

        let outcome = cli
            .apply_patches(&target, &patches, Some(&Identity::new("Bot", "bot@example.com")))
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(git(&target, &["log", "-1", "--format=%an|%s|%cn"]), "Agent Smith|add b|Bot");
        assert!(!cli.am_in_progress(&target).unwrap());
    }

    #[test]
    fn conflicting_patch_leaves_am_in_progress() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("source");
        init_repo(&source);
        let base = commit_file(&source, "a.txt", "base\n", "base");

        let cli = GitCli::default();
        let target = temp.path().join("target");
        cli.clone_repository(&CloneRequest {
            source: &source,
            destination: &target,
            branch: None,
            depth: None,
        })
        .unwrap();
        git(&target, &["config", "user.email", "host@example.com"]);
        git(&target, &["config", "user.name", "Host"]);
        commit_file(&target, "a.txt", "host edit\n", "host change");

        let head = commit_file(&source, "a.txt", "agent edit\n", "agent change");
        let patches = cli
            .format_patches(
                &source,
                &CommitRange::Since {
                    bases: vec![base],
                    head,
                },
                &temp.path().join("patches"),
            )
            .unwrap();

        let outcome = cli.apply_patches(&target, &patches, None).unwrap();
        assert!(matches!(outcome, ApplyOutcome::Conflict { .. }));
        assert!(cli.am_in_progress(&target).unwrap());
    }
}
