//! Repository-relative path checks.

use patchwork_core::{ApplyError, ApplyErrorKind};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Ensure the given path is a safe relative path (no absolute, no parent components)
pub fn is_safe_relative(path: &Path) -> bool {
    if path.is_absolute() {
        return false;
    }
    path.components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

/// Lexical form of a relative path: `.` segments dropped and `..` folded
/// into the segment before it. Nothing is read from disk.
pub fn normalize_relative(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir if normalized.file_name().is_some() => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Resolves a repository-relative path to an absolute one inside `repo`.
///
/// The deepest existing ancestor of the result is canonicalised so that a
/// symlink pointing out of the repository is caught even when the final file
/// does not exist yet.
///
/// # Errors
/// Returns `ApplyErrorKind::PathTraversal` when the path is absolute, climbs
/// with `..`, or escapes through a symlink, and `ApplyErrorKind::MissingFile`
/// when the repository root itself cannot be resolved.
pub fn resolve_in_repo(repo: &Path, relative: &str) -> Result<PathBuf, ApplyError> {
    let relative_path = Path::new(relative);
    if relative.is_empty() || !is_safe_relative(relative_path) {
        return Err(ApplyError::new(
            ApplyErrorKind::PathTraversal,
            format!("path `{relative}` is not inside the repository"),
        )
        .with_path(relative));
    }

    let root = fs::canonicalize(repo).map_err(|error| {
        ApplyError::new(
            ApplyErrorKind::MissingFile,
            format!("repository root {} is not accessible: {error}", repo.display()),
        )
    })?;
    let joined = root.join(relative_path);

    let mut probe = Some(joined.as_path());
    while let Some(candidate) = probe {
        if fs::symlink_metadata(candidate).is_ok() {
            let resolved = fs::canonicalize(candidate).map_err(|error| {
                ApplyError::new(
                    ApplyErrorKind::PathTraversal,
                    format!("cannot resolve `{relative}`: {error}"),
                )
                .with_path(relative)
            })?;
            if !resolved.starts_with(&root) {
                return Err(ApplyError::new(
                    ApplyErrorKind::PathTraversal,
                    format!("path `{relative}` resolves outside the repository"),
                )
                .with_path(relative));
            }
            break;
        }
        probe = candidate.parent();
    }

    Ok(joined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_safe_relative() {
        assert!(is_safe_relative(Path::new("src/a.ts")));
        assert!(is_safe_relative(Path::new("./src/a.ts")));
        assert!(!is_safe_relative(Path::new("../a.ts")));
        assert!(!is_safe_relative(Path::new("src/../../a.ts")));
        assert!(!is_safe_relative(Path::new("/etc/passwd")));
    }

    #[test]
    fn test_normalize_relative() {
        assert_eq!(normalize_relative(Path::new("./src/a.ts")), Path::new("src/a.ts"));
        assert_eq!(normalize_relative(Path::new("src/./lib/../a.ts")), Path::new("src/a.ts"));
        assert_eq!(normalize_relative(Path::new("../../a.ts")), Path::new("../../a.ts"));
        assert_eq!(normalize_relative(Path::new("src/a.ts")), Path::new("src/a.ts"));
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let temp = match TempDir::new() {
            Ok(temp) => temp,
            Err(error) => panic!("tempdir: {error}"),
        };
        let error = match resolve_in_repo(temp.path(), "../outside.txt") {
            Ok(path) => panic!("expected traversal error, got {}", path.display()),
            Err(error) => error,
        };
        assert_eq!(error.kind, ApplyErrorKind::PathTraversal);
        if let Err(error) = resolve_in_repo(temp.path(), "new/dir/file.txt") {
            panic!("nested new file rejected: {error}");
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_symlink_escape() {
        use std::os::unix::fs::symlink;

        let (Ok(repo), Ok(outside)) = (TempDir::new(), TempDir::new()) else {
            panic!("tempdir creation failed");
        };
        if let Err(error) = symlink(outside.path(), repo.path().join("link")) {
            panic!("symlink: {error}");
        }
        let error = match resolve_in_repo(repo.path(), "link/file.txt") {
            Ok(path) => panic!("expected traversal error, got {}", path.display()),
            Err(error) => error,
        };
        assert_eq!(error.kind, ApplyErrorKind::PathTraversal);
    }
}
