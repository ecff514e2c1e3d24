//! Workspace and skills directories.
//!
//! The configured workspace root is bind-mounted read-write into the
//! sandbox at `/workspace`. Free-form state lives directly under it,
//! user-authored skill modules under `skills/`, generated tool bindings
//! under `generated/`. Skills are ordinary modules consumed by import;
//! nothing here parses or validates them. Scripts report results through
//! stdout only; the host never reads their output files asynchronously.

use std::path::{Path, PathBuf};

/// Well-known paths under the workspace root.
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    root: PathBuf,
}

impl WorkspacePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Free-form state shared with the sandbox; script files are staged
    /// here too.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// User-authored script modules.
    pub fn skills(&self) -> PathBuf {
        self.root.join("skills")
    }

    /// Generated tool bindings.
    pub fn generated(&self) -> PathBuf {
        self.root.join("generated")
    }

    /// The broker's credential storage.
    pub fn oauth(&self) -> PathBuf {
        self.root.join(".oauth")
    }

    /// Guarantee the directories exist before any script runs.
    pub fn ensure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.skills())?;
        std::fs::create_dir_all(self.generated())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let paths = WorkspacePaths::new(dir.path());

        paths.ensure().unwrap();
        assert!(paths.skills().is_dir());
        assert!(paths.generated().is_dir());
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let paths = WorkspacePaths::new(dir.path());

        paths.ensure().unwrap();
        paths.ensure().unwrap();
        assert!(paths.skills().is_dir());
    }

    #[test]
    fn test_layout() {
        let paths = WorkspacePaths::new("/w");
        assert_eq!(paths.skills(), PathBuf::from("/w/skills"));
        assert_eq!(paths.generated(), PathBuf::from("/w/generated"));
        assert_eq!(paths.oauth(), PathBuf::from("/w/.oauth"));
    }
}
