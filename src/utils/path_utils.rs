use std::io;
use std::path::{Component, Path, PathBuf};

/// Canonicalize a path, stripping the Windows extended path prefix (\\?\) if present.
pub fn safe_canonicalize(path: &Path) -> io::Result<PathBuf> {
    let canonical = std::fs::canonicalize(path)?;
    Ok(strip_extended_path_prefix(canonical))
}

#[cfg(windows)]
pub fn strip_extended_path_prefix(path: PathBuf) -> PathBuf {
    let path_str = path.to_string_lossy();
    if let Some(stripped) = path_str.strip_prefix(r"\\?\") {
        PathBuf::from(stripped)
    } else {
        path
    }
}

#[cfg(not(windows))]
pub fn strip_extended_path_prefix(path: PathBuf) -> PathBuf {
    path
}

/// Compare two paths after canonicalization, falling back to the raw paths
/// when either side does not exist (macOS `/private` symlinks, removed dirs).
pub fn same_location(a: &Path, b: &Path) -> bool {
    match (safe_canonicalize(a), safe_canonicalize(b)) {
        (Ok(left), Ok(right)) => left == right,
        _ => normalize_lexically(a) == normalize_lexically(b),
    }
}

/// Resolve `.` and `..` components without touching the filesystem.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Turn a branch name into something usable as a directory name.
pub fn branch_dir_name(branch: &str) -> String {
    branch
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | ' ' => '-',
            other => other,
        })
        .collect::<String>()
        .trim_matches('-')
        .to_string()
}
