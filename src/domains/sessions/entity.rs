use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::domains::divergence::Divergence;
use crate::domains::merge::types::MergePoint;
use crate::domains::projects::Project;
use crate::domains::storage::VolumeMount;
use crate::infrastructure::database::Database;

pub const STATE_DIR: &str = ".enclave";
pub const STATE_DB_FILE: &str = "state.sqlite";

/// Returned by session creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHandle {
    pub name: String,
    pub volume: String,
    pub path: PathBuf,
    pub projects: Vec<Project>,
    /// The volume already existed and nothing was cloned.
    pub resumed: bool,
}

/// A mounted session with its merged project list and state database.
#[derive(Clone)]
pub struct OpenSession {
    pub name: String,
    pub mount: VolumeMount,
    pub projects: Vec<Project>,
    /// `None` when mounted read-only and no state has been written yet.
    pub db: Option<Database>,
}

impl OpenSession {
    pub fn project(&self, name: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.name == name)
    }

    pub fn clone_path(&self, project: &Project) -> PathBuf {
        project.clone_path(&self.mount.path)
    }

    pub fn tracked_projects(&self) -> impl Iterator<Item = &Project> {
        self.projects.iter().filter(|p| p.tracked)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectState {
    pub project: Project,
    pub clone_path: PathBuf,
    pub merge_point: Option<MergePoint>,
    pub divergence: Divergence<u32>,
}

/// Derived, read-only picture of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionView {
    pub name: String,
    pub volume: String,
    pub path: PathBuf,
    pub projects: Vec<ProjectState>,
}
