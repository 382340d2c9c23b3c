#![allow(dead_code)]

use enclave::{Enclave, EngineConfig, Identity};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

pub struct Sandbox {
    pub temp: TempDir,
    pub config: EngineConfig,
}

impl Sandbox {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let mut config = EngineConfig::rooted_at(&temp.path().join("state"));
        config.worktree_root = Some(temp.path().join("worktrees"));
        config.host_identity = Some(Identity::new("Host Operator", "host@example.com"));
        Self { temp, config }
    }

    pub fn engine(&self) -> Enclave {
        Enclave::new(self.config.clone()).unwrap()
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.temp.path().join(relative)
    }

    /// Host repository on `main` with one commit containing `README.md`.
    pub fn host_repo(&self, relative: &str) -> PathBuf {
        let dir = self.path(relative);
        init_repo(&dir);
        commit_file(&dir, "README.md", &format!("# {relative}\n"), "Initial commit");
        dir
    }
}

pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} in {} failed: {}",
        args,
        dir.display(),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

pub fn init_repo(dir: &Path) {
    fs::create_dir_all(dir).unwrap();
    git(dir, &["init", "--initial-branch=main"]);
    git(dir, &["config", "user.email", "test@example.com"]);
    git(dir, &["config", "user.name", "Test User"]);
}

pub fn commit_file(dir: &Path, name: &str, content: &str, message: &str) -> String {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
    git(dir, &["add", name]);
    git(dir, &["commit", "-m", message]);
    git(dir, &["rev-parse", "HEAD"])
}

pub fn head(dir: &Path) -> String {
    git(dir, &["rev-parse", "HEAD"])
}

pub fn current_branch(dir: &Path) -> String {
    git(dir, &["rev-parse", "--abbrev-ref", "HEAD"])
}

pub fn subjects(dir: &Path, rev: &str) -> Vec<String> {
    git(dir, &["log", "--format=%s", rev])
        .lines()
        .map(str::to_string)
        .collect()
}
