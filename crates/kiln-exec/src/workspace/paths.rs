//! Confinement of workspace writes.
//!
//! The cloned repository is untrusted: it may ship symlinks at the paths we write to.
//! Every directory we create and every file we write is checked not to be one.

use std::{
    io,
    path::{Component, Path, PathBuf},
};

use crate::{error::WorkspaceError, util::is_contained};

/// `rel` as a path below the workspace root. Empty is rejected.
pub(crate) fn checked_relative(rel: &str) -> Result<&Path, WorkspaceError> {
    if rel.is_empty() || !is_contained(rel) {
        return Err(WorkspaceError::InvalidPath(rel.to_string()));
    }
    Ok(Path::new(rel))
}

/// Create `root/rel` one component at a time, refusing symlinks and non-directories on the way.
pub(crate) async fn create_dir_within(root: &Path, rel: &Path) -> Result<PathBuf, WorkspaceError> {
    let mut dir = root.to_path_buf();
    for component in rel.components() {
        let Component::Normal(part) = component else {
            continue;
        };
        dir.push(part);
        match tokio::fs::symlink_metadata(&dir).await {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(WorkspaceError::InvalidPath(format!("{} is a symlink", dir.display())));
            }
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(WorkspaceError::InvalidPath(format!("{} is not a directory", dir.display())));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tokio::fs::create_dir(&dir)
                    .await
                    .map_err(|e| WorkspaceError::io(format!("create {}", dir.display()), e))?;
            }
            Err(e) => return Err(WorkspaceError::io(format!("inspect {}", dir.display()), e)),
        }
    }
    Ok(dir)
}

/// Fail when `path` exists as a symlink; writing through it would land outside the workspace.
pub(crate) async fn refuse_symlink(path: &Path) -> Result<(), WorkspaceError> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.file_type().is_symlink() => {
            Err(WorkspaceError::InvalidPath(format!("{} is a symlink", path.display())))
        }
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(WorkspaceError::io(format!("inspect {}", path.display()), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escaping_paths_are_rejected() {
        assert!(checked_relative("a/b.txt").is_ok());
        assert!(checked_relative("./a").is_ok());
        for bad in ["", "/etc/passwd", "../x", "a/../../x"] {
            assert!(checked_relative(bad).is_err(), "{bad}");
        }
    }

    #[tokio::test]
    async fn creates_nested_dirs() {
        let root = tempfile::tempdir().unwrap();
        let dir = create_dir_within(root.path(), Path::new("a/./b")).await.unwrap();
        assert_eq!(dir, root.path().join("a/b"));
        assert!(dir.is_dir());

        // Existing directories are reused.
        create_dir_within(root.path(), Path::new("a")).await.unwrap();
    }

    #[tokio::test]
    async fn regular_file_in_the_way_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("a"), "x").unwrap();
        let err = create_dir_within(root.path(), Path::new("a/b")).await.unwrap_err();
        assert!(matches!(err, WorkspaceError::InvalidPath(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinked_component_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.path().join("link")).unwrap();

        let err = create_dir_within(root.path(), Path::new("link/sub")).await.unwrap_err();
        assert!(matches!(err, WorkspaceError::InvalidPath(_)));
        assert!(!outside.path().join("sub").exists());

        assert!(refuse_symlink(&root.path().join("link")).await.is_err());
        assert!(refuse_symlink(&root.path().join("missing")).await.is_ok());
    }
}
