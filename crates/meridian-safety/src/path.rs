//! Filesystem sandboxing for file-operation tools.
//!
//! Every path is canonicalized (following symlinks) before checking, so a
//! symlink out of the workspace cannot smuggle an operation past the root
//! containment test.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

/// Paths that must never be touched regardless of workspace configuration.
static ALWAYS_BLOCKED: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)[\\/]\.ssh[\\/]",
        r"(?i)[\\/]\.gnupg[\\/]",
        r"(?i)[\\/]\.aws[\\/]credentials",
        r"(?i)[\\/]\.env$",
        r"(?i)[\\/]\.docker[\\/]config\.json",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid pattern"))
    .collect()
});

/// Workspace-rooted path validator.
#[derive(Debug, Clone, Default)]
pub struct PathSandbox {
    workspace_root: Option<PathBuf>,
}

impl PathSandbox {
    /// Unrestricted sandbox: only the always-blocked patterns apply.
    pub fn unrestricted() -> Self {
        Self {
            workspace_root: None,
        }
    }

    /// Restrict file operations to `root` (canonicalized at construction).
    pub fn rooted(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = std::fs::canonicalize(root)?;
        Ok(Self {
            workspace_root: Some(root),
        })
    }

    pub fn workspace_root(&self) -> Option<&Path> {
        self.workspace_root.as_deref()
    }

    /// Validate `path` for `operation` (used in error text only).
    ///
    /// Returns the resolved path on success, a stable error string on
    /// refusal.
    pub fn validate(&self, path: &str, operation: &str) -> Result<PathBuf, String> {
        let resolved = resolve(path);
        let text = resolved.to_string_lossy();

        for pattern in ALWAYS_BLOCKED.iter() {
            if pattern.is_match(&text) {
                return Err(format!(
                    "Cannot {operation}: path matches a sensitive file pattern."
                ));
            }
        }

        if let Some(root) = &self.workspace_root {
            if resolved != *root && !resolved.starts_with(root) {
                return Err(format!(
                    "Cannot {operation}: path '{path}' is outside the workspace directory '{}'.",
                    root.display()
                ));
            }
        }

        Ok(resolved)
    }
}

/// Canonicalize as far as the filesystem allows.
///
/// A target that does not exist yet (e.g. a file about to be written) is
/// resolved through its nearest existing ancestor so symlinked parents are
/// still followed.
fn resolve(path: &str) -> PathBuf {
    let expanded = expand_home(path);
    if let Ok(canonical) = std::fs::canonicalize(&expanded) {
        return canonical;
    }

    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(&expanded))
            .unwrap_or(expanded)
    };

    // Walk up to the nearest existing ancestor, canonicalize it, and
    // re-append the missing tail lexically.
    let mut existing = absolute.clone();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => return lexical_normalize(&absolute),
        }
    }

    let mut resolved = std::fs::canonicalize(&existing).unwrap_or(existing);
    for part in tail.iter().rev() {
        match part.to_str() {
            Some("..") => {
                resolved.pop();
            }
            Some(".") => {}
            _ => resolved.push(part),
        }
    }
    resolved
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}
