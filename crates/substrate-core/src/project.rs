//! Project identity.
//!
//! Every row in the store is scoped to a project via a stable, deterministic hash of the
//! working directory it was captured from, so a single database file can serve multiple
//! checkouts without cross-talk.

use sha2::{Digest, Sha256};
use std::path::Path;

/// Number of hex characters kept from the SHA-256 digest.
pub const PROJECT_HASH_LEN: usize = 16;

/// Compute the 16-hex-character project identity for `path`.
///
/// The path is canonicalized first (symlinks resolved, made absolute) so that two different
/// ways of referring to the same checkout — a symlinked worktree, a relative path from a
/// different cwd — hash identically. If canonicalization fails (the path does not exist, or is
/// not reachable), the original path is hashed instead so callers can still scope observations
/// taken against directories that have since been removed.
pub fn project_hash(path: &Path) -> String {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    let hex = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();
    hex[..PROJECT_HASH_LEN].to_string()
}

/// Compute the project identity for the current working directory.
pub fn current_project_hash() -> crate::error::Result<String> {
    let cwd = std::env::current_dir()?;
    Ok(project_hash(&cwd))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_sixteen_hex_chars() {
        let hash = project_hash(Path::new("/tmp"));
        assert_eq!(hash.len(), PROJECT_HASH_LEN);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hash_is_deterministic() {
        let a = project_hash(Path::new("/tmp/some/project"));
        let b = project_hash(Path::new("/tmp/some/project"));
        assert_eq!(a, b);
    }

    #[test]
    fn different_paths_hash_differently() {
        let a = project_hash(Path::new("/tmp/project-a"));
        let b = project_hash(Path::new("/tmp/project-b"));
        assert_ne!(a, b);
    }
}
