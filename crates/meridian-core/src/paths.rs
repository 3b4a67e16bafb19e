//! Data-root layout.
//!
//! ```text
//! <data_root>/
//!   memory/
//!     conversations/<session-id>.json
//!     notes.json
//!   cron/
//!     jobs.json
//!     results/<job-id>_<timestamp>.txt
//!   skills/
//!   registry/
//!     catalog.json
//! ```

use std::path::{Path, PathBuf};

/// Resolved on-disk layout for all persistent runtime state.
#[derive(Debug, Clone)]
pub struct DataRoot {
    root: PathBuf,
}

impl DataRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Default root: `~/.meridian`.
    pub fn default_root() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            root: home.join(".meridian"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn memory_dir(&self) -> PathBuf {
        self.root.join("memory")
    }

    pub fn conversations_dir(&self) -> PathBuf {
        self.memory_dir().join("conversations")
    }

    pub fn notes_path(&self) -> PathBuf {
        self.memory_dir().join("notes.json")
    }

    pub fn cron_dir(&self) -> PathBuf {
        self.root.join("cron")
    }

    pub fn jobs_path(&self) -> PathBuf {
        self.cron_dir().join("jobs.json")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.cron_dir().join("results")
    }

    pub fn skills_dir(&self) -> PathBuf {
        self.root.join("skills")
    }

    pub fn registry_dir(&self) -> PathBuf {
        self.root.join("registry")
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.registry_dir().join("catalog.json")
    }

    /// Create every directory in the layout. Idempotent.
    pub fn ensure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.conversations_dir())?;
        std::fs::create_dir_all(self.results_dir())?;
        std::fs::create_dir_all(self.skills_dir())?;
        std::fs::create_dir_all(self.registry_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_builds_full_tree() {
        let dir = tempfile::tempdir().unwrap();
        let root = DataRoot::new(dir.path().join("data"));
        root.ensure().unwrap();
        assert!(root.conversations_dir().is_dir());
        assert!(root.results_dir().is_dir());
        assert!(root.skills_dir().is_dir());
        assert!(root.registry_dir().is_dir());
    }
}
