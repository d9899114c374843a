// src/config/project.rs
// Project identification - resolve a stable group_id from a working directory

use std::path::Path;

/// Fallback group id when no project root can be found
pub const UNKNOWN_PROJECT: &str = "unknown";

/// Markers that identify a project root, checked in order at each level.
/// Version-control root first, then language manifests, then an explicit
/// opt-in marker file.
const ROOT_MARKERS: &[&str] = &[
    ".git",
    "Cargo.toml",
    "package.json",
    "pyproject.toml",
    "go.mod",
    ".project-root",
];

/// Resolve a stable project identifier from a working directory.
///
/// Walks up from `cwd` looking for a project-root marker and returns the
/// root directory's name, sanitized to a keyword-safe identifier. Falls
/// back to `"unknown"` when no marker is found. Deterministic and
/// side-effect-free: the same path always resolves to the same group id.
pub fn detect_project(cwd: &str) -> String {
    let start = Path::new(cwd);
    let mut current = Some(start);

    while let Some(dir) = current {
        for marker in ROOT_MARKERS {
            if dir.join(marker).exists() {
                return dir
                    .file_name()
                    .map(|n| sanitize_group_id(&n.to_string_lossy()))
                    .unwrap_or_else(|| UNKNOWN_PROJECT.to_string());
            }
        }
        current = dir.parent();
    }

    UNKNOWN_PROJECT.to_string()
}

/// Normalize a directory name into a group id: lowercase, with anything
/// outside `[a-z0-9._-]` collapsed to a hyphen. Empty input maps to
/// "unknown".
fn sanitize_group_id(name: &str) -> String {
    let sanitized: String = name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = sanitized.trim_matches('-');
    if trimmed.is_empty() {
        UNKNOWN_PROJECT.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_project_finds_marker() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("My Project");
        let nested = root.join("src").join("deep");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(root.join("Cargo.toml"), "[package]").unwrap();

        let group_id = detect_project(nested.to_str().unwrap());
        assert_eq!(group_id, "my-project");
    }

    #[test]
    fn test_detect_project_unknown_without_marker() {
        let dir = tempfile::tempdir().unwrap();
        let group_id = detect_project(dir.path().to_str().unwrap());
        // The tempdir itself has no marker; parents may, so only assert
        // the deterministic fallback when nothing matched at all.
        if group_id != UNKNOWN_PROJECT {
            // A marker exists somewhere above the tempdir on this machine;
            // determinism still holds.
            assert_eq!(group_id, detect_project(dir.path().to_str().unwrap()));
        }
    }

    #[test]
    fn test_detect_project_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("proj");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join(".project-root"), "").unwrap();
        let a = detect_project(root.to_str().unwrap());
        let b = detect_project(root.to_str().unwrap());
        assert_eq!(a, b);
        assert_eq!(a, "proj");
    }

    #[test]
    fn test_sanitize_group_id() {
        assert_eq!(sanitize_group_id("My Cool Project!"), "my-cool-project");
        assert_eq!(sanitize_group_id("api_v2.1"), "api_v2.1");
        assert_eq!(sanitize_group_id(""), "unknown");
    }
}
