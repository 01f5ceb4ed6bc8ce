//! Shared data model for the merge engine.
//!
//! Everything that crosses a component boundary lives here: typed semantic
//! changes, conflict regions, merge results, per-task snapshots, and the
//! file-centric timeline entities. All persisted types derive serde and
//! round-trip through JSON.

pub mod change;
pub mod conflict;
pub mod evolution;
pub mod merge;
pub mod timeline;

use sha2::{Digest, Sha256};

/// Content hash used for baseline and snapshot comparison: the first 16 hex
/// characters of the SHA-256 of the UTF-8 bytes.
#[must_use]
pub fn compute_content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..16].to_owned()
}

/// Convert a repo-relative file path into a flat storage name.
///
/// Replaces `/`, `\` and `.` with `_`. Not reversible; the `file_path`
/// field inside each persisted record stays authoritative.
#[must_use]
pub fn sanitize_path_for_storage(file_path: &str) -> String {
    file_path
        .chars()
        .map(|c| match c {
            '/' | '\\' | '.' => '_',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_16_hex() {
        let hash = compute_content_hash("import os\n");
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn content_hash_is_stable() {
        assert_eq!(
            compute_content_hash("fn main() {}"),
            compute_content_hash("fn main() {}")
        );
        assert_ne!(compute_content_hash("a"), compute_content_hash("b"));
    }

    #[test]
    fn empty_content_hashes() {
        // sha256("") prefix — pinned so stored hashes stay comparable.
        assert_eq!(compute_content_hash(""), "e3b0c44298fc1c14");
    }

    #[test]
    fn sanitize_flattens_separators() {
        assert_eq!(
            sanitize_path_for_storage("src/components/App.tsx"),
            "src_components_App_tsx"
        );
        assert_eq!(sanitize_path_for_storage("a\\b.py"), "a_b_py");
    }
}
