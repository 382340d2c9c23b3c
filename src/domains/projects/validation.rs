use crate::errors::EnclaveError;
use std::collections::HashSet;

/// Top-level entries a project may not occupy inside a session volume.
pub const RESERVED_PROJECT_NAMES: &[&str] = &[
    ".git",
    ".claude",
    ".devcontainer",
    "workspace",
    "session",
    ".enclave",
    "enclave.yaml",
];

const MAX_SESSION_NAME_LEN: usize = 64;
const MAX_COMPONENT_LEN: usize = 255;

pub fn validate_session_name(name: &str) -> Result<(), EnclaveError> {
    if name.is_empty() {
        return Err(EnclaveError::validation("session", "name must not be empty"));
    }
    if name.len() > MAX_SESSION_NAME_LEN {
        return Err(EnclaveError::validation(
            "session",
            format!("name must be at most {MAX_SESSION_NAME_LEN} characters"),
        ));
    }
    if name.starts_with('-') {
        return Err(EnclaveError::validation(
            "session",
            "name must not start with '-'",
        ));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(EnclaveError::validation(
            "session",
            format!("'{name}' contains '{bad}'; use letters, digits, '_' or '-'"),
        ));
    }
    Ok(())
}

/// Project names are relative paths inside the volume, so `backend/api` is
/// allowed but nothing that escapes or shadows bookkeeping entries.
pub fn validate_project_name(name: &str) -> Result<(), EnclaveError> {
    if name.is_empty() {
        return Err(EnclaveError::validation("name", "project name must not be empty"));
    }
    if name.starts_with('/') || name.contains('\\') || name.contains(':') {
        return Err(EnclaveError::validation(
            "name",
            format!("'{name}' must be a relative path using '/' separators"),
        ));
    }
    if name.chars().any(char::is_control) {
        return Err(EnclaveError::validation(
            "name",
            format!("'{}' contains control characters", name.escape_debug()),
        ));
    }

    for (index, component) in name.split('/').enumerate() {
        if component.is_empty() || component == "." || component == ".." {
            return Err(EnclaveError::validation(
                "name",
                format!("'{name}' has an invalid path component '{component}'"),
            ));
        }
        if component.len() > MAX_COMPONENT_LEN {
            return Err(EnclaveError::validation(
                "name",
                format!("'{name}' has a component longer than {MAX_COMPONENT_LEN} bytes"),
            ));
        }
        let reserved = if index == 0 {
            RESERVED_PROJECT_NAMES.contains(&component)
        } else {
            component == ".git"
        };
        if reserved {
            return Err(EnclaveError::validation(
                "name",
                format!("'{name}' uses the reserved name '{component}'"),
            ));
        }
    }
    Ok(())
}

/// Names must be unique and no project may live inside another one's clone.
pub fn validate_unique_names<'a, I>(names: I) -> Result<(), EnclaveError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen: HashSet<&str> = HashSet::new();
    let names: Vec<&str> = names.into_iter().collect();
    for name in &names {
        if !seen.insert(*name) {
            return Err(EnclaveError::validation(
                "name",
                format!("duplicate project name '{name}'"),
            ));
        }
    }
    for outer in &names {
        let prefix = format!("{outer}/");
        if let Some(inner) = names.iter().find(|n| n.starts_with(&prefix)) {
            return Err(EnclaveError::validation(
                "name",
                format!("project '{inner}' would be nested inside project '{outer}'"),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_names() {
        assert!(validate_session_name("demo_1-x").is_ok());
        assert!(validate_session_name("").is_err());
        assert!(validate_session_name("-flag").is_err());
        assert!(validate_session_name("has space").is_err());
        assert!(validate_session_name("a/b").is_err());
        assert!(validate_session_name(&"x".repeat(65)).is_err());
        assert!(validate_session_name(&"x".repeat(64)).is_ok());
    }

    #[test]
    fn reserved_names_are_rejected_at_top_level() {
        for reserved in RESERVED_PROJECT_NAMES {
            let err = validate_project_name(reserved).unwrap_err();
            assert!(matches!(err, EnclaveError::ValidationError { .. }));
        }
        assert!(validate_project_name("workspace/api").is_err());
        assert!(validate_project_name("backend/workspace").is_ok());
        assert!(validate_project_name("backend/.git").is_err());
    }

    #[test]
    fn path_escapes_are_rejected() {
        for bad in ["../up", "/abs", "a//b", "a/./b", "a\\b", "c:drive"] {
            assert!(validate_project_name(bad).is_err(), "{bad} should be rejected");
        }
        assert!(validate_project_name("backend/api").is_ok());
    }

    #[test]
    fn duplicates_and_nesting() {
        assert!(validate_unique_names(["web", "lib"]).is_ok());
        assert!(validate_unique_names(["web", "web"]).is_err());
        assert!(validate_unique_names(["backend", "backend/api"]).is_err());
        assert!(validate_unique_names(["backend-x", "backend/api"]).is_ok());
    }
}
