use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::validation::validate_project_name;
use crate::errors::EnclaveError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Listed when the session was created and cloned from its source.
    #[default]
    Configured,
    /// Created by the agent inside the session; has no baseline on the host.
    Discovered,
}

fn default_tracked() -> bool {
    true
}

/// One repository mapped between a session clone and its host source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    #[serde(rename = "path")]
    pub source_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default = "default_tracked")]
    pub tracked: bool,
    #[serde(default)]
    pub provenance: Provenance,
}

impl Project {
    pub fn discovered(name: impl Into<String>, source_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            source_path: source_path.into(),
            branch: None,
            tracked: true,
            provenance: Provenance::Discovered,
        }
    }

    /// Location of this project's clone inside a mounted volume.
    pub fn clone_path(&self, volume_root: &Path) -> PathBuf {
        self.name
            .split('/')
            .fold(volume_root.to_path_buf(), |acc, part| acc.join(part))
    }

    pub fn is_discovered(&self) -> bool {
        self.provenance == Provenance::Discovered
    }
}

/// Caller-supplied description of a project to clone into a new session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSpec {
    /// Defaults to the final component of `source_path`.
    pub name: Option<String>,
    pub source_path: PathBuf,
    pub branch: Option<String>,
    pub tracked: bool,
}

impl ProjectSpec {
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        Self {
            name: None,
            source_path: source_path.into(),
            branch: None,
            tracked: true,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn on_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn untracked(mut self) -> Self {
        self.tracked = false;
        self
    }

    pub fn resolved_name(&self) -> Result<String, EnclaveError> {
        let name = match &self.name {
            Some(name) => name.trim().trim_matches('/').to_string(),
            None => self
                .source_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .ok_or_else(|| {
                    EnclaveError::validation(
                        "name",
                        format!(
                            "cannot derive a project name from '{}'",
                            self.source_path.display()
                        ),
                    )
                })?,
        };
        validate_project_name(&name)?;
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_defaults_to_directory() {
        let spec = ProjectSpec::new("/src/web-app");
        assert_eq!(spec.resolved_name().unwrap(), "web-app");
        assert_eq!(spec.named("backend/api/").resolved_name().unwrap(), "backend/api");
    }

    #[test]
    fn nested_names_map_to_nested_clone_paths() {
        let project = Project::discovered("backend/api", "/host/backend/api");
        assert_eq!(
            project.clone_path(Path::new("/vol")),
            PathBuf::from("/vol/backend/api")
        );
    }

    #[test]
    fn yaml_defaults_fill_missing_fields() {
        let project: Project = serde_yaml::from_str("name: web\npath: /src/web\n").unwrap();
        assert!(project.tracked);
        assert_eq!(project.provenance, Provenance::Configured);
        assert_eq!(project.branch, None);
    }
}
