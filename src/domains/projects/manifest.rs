use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use super::entity::Project;
use super::validation::{validate_project_name, validate_unique_names};
use crate::errors::EnclaveError;

pub const MANIFEST_VERSION: u32 = 1;
pub const VOLUME_MANIFEST_FILE: &str = "enclave.yaml";

/// On-disk project list. `projects` stays the last key so new entries can be
/// appended to the file without rewriting it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub session: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub projects: Vec<Project>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Project>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<Project>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Manifest {
    pub fn new(session: &str, projects: Vec<Project>) -> Self {
        Self {
            version: MANIFEST_VERSION,
            session: session.to_string(),
            projects,
        }
    }

    /// Reads and checks a manifest. Any structural problem is a
    /// configuration error since nothing can proceed from an ambiguous list.
    pub fn read(path: &Path, session: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        let manifest: Manifest = serde_yaml::from_str(&content).map_err(|e| {
            EnclaveError::configuration(format!("Failed to parse {}: {e}", path.display()))
        })?;

        if manifest.version != MANIFEST_VERSION {
            return Err(EnclaveError::configuration(format!(
                "{} has unsupported version {} (expected {MANIFEST_VERSION})",
                path.display(),
                manifest.version
            ))
            .into());
        }
        if manifest.session != session {
            return Err(EnclaveError::configuration(format!(
                "{} belongs to session '{}', not '{session}'",
                path.display(),
                manifest.session
            ))
            .into());
        }
        for project in &manifest.projects {
            validate_project_name(&project.name).map_err(|e| {
                EnclaveError::configuration(format!("{}: {e}", path.display()))
            })?;
        }
        validate_unique_names(manifest.projects.iter().map(|p| p.name.as_str()))
            .map_err(|e| EnclaveError::configuration(format!("{}: {e}", path.display())))?;

        Ok(manifest)
    }

    /// Writes the whole manifest through a temp file and rename.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let yaml = serde_yaml::to_string(self).context("Failed to serialize manifest")?;
        let tmp = path.with_extension("yaml.tmp");
        fs::write(&tmp, yaml).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("Failed to move manifest into {}", path.display()))?;
        Ok(())
    }

    /// Serialized form of an empty manifest, ending in an open `projects:` sequence.
    fn open_header(&self) -> Result<String> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize manifest header")?;
        Ok(match yaml.trim_end().strip_suffix("projects: []") {
            Some(head) => format!("{head}projects:\n"),
            None => yaml,
        })
    }

    /// Appends one project entry to the end of the manifest at `path`,
    /// creating the header if the file does not exist yet. Existing entries
    /// are never rewritten or reordered.
    pub fn append(path: &Path, session: &str, project: &Project) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        if path.exists() {
            let existing = Self::read(path, session)?;
            if existing.projects.iter().any(|p| p.name == project.name) {
                return Err(EnclaveError::validation(
                    "name",
                    format!("project '{}' is already listed in {}", project.name, path.display()),
                )
                .into());
            }
            normalize_empty_sequence(path)?;
        } else {
            let header = Self::new(session, Vec::new()).open_header()?;
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => file
                    .write_all(header.as_bytes())
                    .with_context(|| format!("Failed to write {}", path.display()))?,
                // Another writer created it first; its header is identical.
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to create {}", path.display()));
                }
            }
        }

        let entry = serde_yaml::to_string(&vec![project.clone()])
            .context("Failed to serialize project entry")?;
        let mut file = OpenOptions::new()
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open {} for append", path.display()))?;
        file.write_all(entry.as_bytes())
            .with_context(|| format!("Failed to append to {}", path.display()))?;
        Ok(())
    }
}

/// A manifest written with no projects ends in `projects: []`; turn that into
/// an open block sequence so entries can follow it.
fn normalize_empty_sequence(path: &Path) -> Result<()> {
    let content = fs::read_to_string(path)?;
    let trimmed = content.trim_end();
    if let Some(head) = trimmed.strip_suffix("projects: []") {
        fs::write(path, format!("{head}projects:\n"))
            .with_context(|| format!("Failed to rewrite {}", path.display()))?;
    } else if !content.ends_with('\n') {
        let mut file = OpenOptions::new().append(true).open(path)?;
        file.write_all(b"\n")?;
    }
    Ok(())
}
