pub mod types;

pub use types::{EngineConfig, Identity, TargetPolicy};

use crate::errors::EnclaveError;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub const ENV_VOLUME_ROOT: &str = "ENCLAVE_VOLUME_ROOT";
pub const ENV_HOST_MANIFEST_DIR: &str = "ENCLAVE_HOST_MANIFEST_DIR";
pub const ENV_CLONE_DEPTH: &str = "ENCLAVE_CLONE_DEPTH";

impl EngineConfig {
    /// Config rooted under a single directory. Used by embedders that keep all
    /// state together (and by tests).
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            volume_root: root.join("volumes"),
            host_manifest_dir: root.join("manifests"),
            ..Self::default()
        }
    }

    /// Read a TOML config file, then apply environment overrides. A missing
    /// file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            toml::from_str::<EngineConfig>(&content).map_err(|e| {
                EnclaveError::configuration(format!("Failed to parse {}: {e}", path.display()))
            })?
        } else {
            log::debug!("No config at {}, using defaults", path.display());
            EngineConfig::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup(ENV_VOLUME_ROOT).filter(|v| !v.trim().is_empty()) {
            self.volume_root = PathBuf::from(root);
        }
        if let Some(dir) = lookup(ENV_HOST_MANIFEST_DIR).filter(|v| !v.trim().is_empty()) {
            self.host_manifest_dir = PathBuf::from(dir);
        }
        if let Some(depth) = lookup(ENV_CLONE_DEPTH) {
            let trimmed = depth.trim();
            self.clone_depth = match trimmed {
                "" | "0" | "full" => None,
                value => Some(value.parse::<u32>().map_err(|e| {
                    EnclaveError::configuration(format!(
                        "{ENV_CLONE_DEPTH} must be a positive integer or 'full': {e}"
                    ))
                })?),
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.volume_root.as_os_str().is_empty() {
            return Err(EnclaveError::configuration("volume_root must not be empty").into());
        }
        if self.host_manifest_dir.as_os_str().is_empty() {
            return Err(
                EnclaveError::configuration("host_manifest_dir must not be empty").into(),
            );
        }
        if self.agent_identity.name.trim().is_empty() || self.agent_identity.email.trim().is_empty()
        {
            return Err(
                EnclaveError::configuration("agent_identity needs a name and an email").into(),
            );
        }
        which::which(&self.git_binary).map_err(|e| {
            EnclaveError::configuration(format!(
                "git binary '{}' not found: {e}",
                self.git_binary
            ))
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_file_yields_defaults() {
        let temp = TempDir::new().unwrap();
        let config = EngineConfig::load(&temp.path().join("absent.toml")).unwrap();
        assert_eq!(config.clone_depth, Some(types::DEFAULT_CLONE_DEPTH));
        assert_eq!(config.target_policy, TargetPolicy::CreateWorktree);
        assert_eq!(config.git_binary, "git");
    }

    #[test]
    fn parses_toml_with_partial_fields() {
        let config: EngineConfig = toml::from_str(
            r#"
volume_root = "/srv/enclave/volumes"
target_policy = "switch_main_tree"

[agent_identity]
name = "Sandbox"
email = "sandbox@example.com"
"#,
        )
        .unwrap();

        assert_eq!(config.volume_root, PathBuf::from("/srv/enclave/volumes"));
        assert_eq!(config.target_policy, TargetPolicy::SwitchMainTree);
        assert_eq!(config.agent_identity.name, "Sandbox");
        assert!(config.host_identity.is_none());
    }

    #[test]
    fn rejects_malformed_toml_as_configuration_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "volume_root = [").unwrap();

        let err = EngineConfig::load(&path).unwrap_err();
        assert!(matches!(
            EnclaveError::from_internal(err),
            EnclaveError::ConfigurationError { .. }
        ));
    }

    #[test]
    fn overrides_replace_roots_and_depth() {
        let temp = TempDir::new().unwrap();
        let mut config = EngineConfig::rooted_at(temp.path());
        config
            .apply_overrides(lookup(&[
                (ENV_VOLUME_ROOT, "/tmp/volumes"),
                (ENV_CLONE_DEPTH, "full"),
            ]))
            .unwrap();

        assert_eq!(config.volume_root, PathBuf::from("/tmp/volumes"));
        assert_eq!(config.host_manifest_dir, temp.path().join("manifests"));
        assert_eq!(config.clone_depth, None);

        config
            .apply_overrides(lookup(&[(ENV_CLONE_DEPTH, "5")]))
            .unwrap();
        assert_eq!(config.clone_depth, Some(5));
    }

    #[test]
    fn invalid_depth_override_is_rejected() {
        let mut config = EngineConfig::default();
        let err = config
            .apply_overrides(lookup(&[(ENV_CLONE_DEPTH, "shallow")]))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_CLONE_DEPTH));
    }

    #[test]
    fn validate_rejects_missing_git_binary() {
        let temp = TempDir::new().unwrap();
        let mut config = EngineConfig::rooted_at(temp.path());
        config.git_binary = "definitely-not-a-git-binary-xyz".to_string();
        assert!(config.validate().is_err());
    }
}
