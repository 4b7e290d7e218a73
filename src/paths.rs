//! Filesystem path resolution against a fixed project root.
//!
//! All pipeline artifacts live under a single media root captured once at
//! process start. Relative paths are resolved against that root and are
//! rejected if, after normalization, they would land outside it.

use std::path::{Component, Path, PathBuf};

/// Errors that can occur while resolving paths.
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("path '{path}' escapes the media root '{root}'")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("failed to create directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Resolves relative paths against a project root captured at construction.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    /// Create a resolver rooted at `root`. The root is captured once; it is
    /// never re-derived from the environment at call time.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// The media root this resolver was built with.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a path to an absolute one.
    ///
    /// Absolute inputs are returned unchanged: callers hand the pipeline
    /// already-uploaded files that may live anywhere on disk. Relative
    /// inputs are joined onto the root and normalized; a normalized path
    /// that climbs out of the root is rejected.
    ///
    /// # Errors
    ///
    /// Returns `PathError::OutsideRoot` if a relative path escapes the root
    /// via `..` components.
    pub fn resolve(&self, path: &Path) -> Result<PathBuf, PathError> {
        if path.is_absolute() {
            return Ok(path.to_path_buf());
        }

        let mut resolved = self.root.clone();
        for component in path.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    // Popping past the root means the input escapes it.
                    if resolved == self.root || !resolved.pop() {
                        return Err(PathError::OutsideRoot {
                            path: path.to_path_buf(),
                            root: self.root.clone(),
                        });
                    }
                    if !resolved.starts_with(&self.root) {
                        return Err(PathError::OutsideRoot {
                            path: path.to_path_buf(),
                            root: self.root.clone(),
                        });
                    }
                }
                // Prefix/RootDir components cannot appear in a relative path
                // on unix; ignore them rather than guessing.
                _ => {}
            }
        }
        Ok(resolved)
    }

    /// Create all missing parent directories of `path`.
    ///
    /// Idempotent: succeeds if the directories already exist.
    ///
    /// # Errors
    ///
    /// Returns `PathError::CreateDir` if directory creation fails.
    pub fn ensure_parent(&self, path: &Path) -> Result<(), PathError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PathError::CreateDir {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative_joins_root() {
        let resolver = PathResolver::new(PathBuf::from("/srv/media"));
        let resolved = resolver.resolve(Path::new("output/clip.mp4")).unwrap();
        assert_eq!(resolved, PathBuf::from("/srv/media/output/clip.mp4"));
    }

    #[test]
    fn test_resolve_absolute_passes_through() {
        let resolver = PathResolver::new(PathBuf::from("/srv/media"));
        let resolved = resolver.resolve(Path::new("/uploads/face.png")).unwrap();
        assert_eq!(resolved, PathBuf::from("/uploads/face.png"));
    }

    #[test]
    fn test_resolve_curdir_components_ignored() {
        let resolver = PathResolver::new(PathBuf::from("/srv/media"));
        let resolved = resolver.resolve(Path::new("./output/./clip.mp4")).unwrap();
        assert_eq!(resolved, PathBuf::from("/srv/media/output/clip.mp4"));
    }

    #[test]
    fn test_resolve_parent_inside_root_is_allowed() {
        let resolver = PathResolver::new(PathBuf::from("/srv/media"));
        let resolved = resolver.resolve(Path::new("output/../work/a.wav")).unwrap();
        assert_eq!(resolved, PathBuf::from("/srv/media/work/a.wav"));
    }

    #[test]
    fn test_resolve_escaping_root_is_rejected() {
        let resolver = PathResolver::new(PathBuf::from("/srv/media"));
        let result = resolver.resolve(Path::new("../etc/passwd"));
        assert!(matches!(result, Err(PathError::OutsideRoot { .. })));
    }

    #[test]
    fn test_resolve_deep_escape_is_rejected() {
        let resolver = PathResolver::new(PathBuf::from("/srv/media"));
        let result = resolver.resolve(Path::new("output/../../outside"));
        assert!(matches!(result, Err(PathError::OutsideRoot { .. })));
    }

    #[test]
    fn test_ensure_parent_creates_missing_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new(dir.path().to_path_buf());
        let target = dir.path().join("a").join("b").join("out.mp4");

        assert!(!target.parent().unwrap().exists());
        resolver.ensure_parent(&target).unwrap();
        assert!(target.parent().unwrap().exists());
    }

    #[test]
    fn test_ensure_parent_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new(dir.path().to_path_buf());
        let target = dir.path().join("nested").join("out.mp4");

        resolver.ensure_parent(&target).unwrap();
        resolver.ensure_parent(&target).unwrap();
        assert!(target.parent().unwrap().exists());
    }

    #[test]
    fn test_outside_root_error_display() {
        let err = PathError::OutsideRoot {
            path: PathBuf::from("../x"),
            root: PathBuf::from("/srv/media"),
        };
        let msg = err.to_string();
        assert!(msg.contains("../x"));
        assert!(msg.contains("/srv/media"));
    }
}
