use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_GIT_BINARY: &str = "git";
pub const DEFAULT_CLONE_DEPTH: u32 = 1;

/// Committer identity written into git config or passed through the environment.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

impl Identity {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    pub fn agent_default() -> Self {
        Self::new("Enclave Agent", "agent@enclave.invalid")
    }
}

/// What to do when a synchronization targets a branch that no worktree has checked out.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TargetPolicy {
    /// Add a linked worktree for the branch next to the source repository.
    #[default]
    CreateWorktree,
    /// Switch the main working tree to the branch, creating it from HEAD if needed.
    SwitchMainTree,
    /// Refuse and let the operator create the worktree.
    RequireExistingWorktree,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding one sub-directory per session volume.
    pub volume_root: PathBuf,
    /// Directory holding host-side supplemental manifests (`<session>.yaml`).
    pub host_manifest_dir: PathBuf,
    /// Parent directory for worktrees created during synchronization. Defaults
    /// to the source repository's parent directory.
    pub worktree_root: Option<PathBuf>,
    /// `None` performs a full clone.
    pub clone_depth: Option<u32>,
    pub agent_identity: Identity,
    /// Committer used when replaying patches on the host. `None` keeps the
    /// host's own git identity.
    pub host_identity: Option<Identity>,
    pub target_policy: TargetPolicy,
    pub git_binary: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let data_root = dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("enclave");
        let config_root = dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("enclave");

        Self {
            volume_root: data_root.join("volumes"),
            host_manifest_dir: config_root.join("sessions"),
            worktree_root: None,
            clone_depth: Some(DEFAULT_CLONE_DEPTH),
            agent_identity: Identity::agent_default(),
            host_identity: None,
            target_policy: TargetPolicy::default(),
            git_binary: DEFAULT_GIT_BINARY.to_string(),
        }
    }
}
