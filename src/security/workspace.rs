use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// Nearest ancestor (inclusive) holding a `.git` entry. A worktree's `.git`
/// is a file, so each worktree resolves to itself rather than the main
/// checkout. Falls back to the canonical start directory.
pub fn resolve_workspace_root(start: &Path) -> std::io::Result<PathBuf> {
    let canonical = fs::canonicalize(start)?;
    let mut cursor = canonical.as_path();
    loop {
        if cursor.join(".git").exists() {
            return Ok(cursor.to_path_buf());
        }
        match cursor.parent() {
            Some(parent) => cursor = parent,
            None => return Ok(canonical),
        }
    }
}

pub fn workspace_fingerprint(root: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(root.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
