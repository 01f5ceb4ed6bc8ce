//! Durable state persistence for the Braid engine.
//!
//! All persisted state lives under `<project>/.braid/` and is written with
//! temp-file + rename so a killed process never leaves a half-written JSON
//! document behind. Reads are lenient: a missing file is an empty store, and
//! an unreadable file is quarantined (renamed with a `.corrupt.<timestamp>`
//! suffix) so the engine can continue with a fresh store while the evidence
//! is preserved on disk.
//!
//! Concurrent writers to the same project directory are unsupported; the
//! advisory [`MergeLock`] fails fast when another merge holds the state root.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::BraidError;

// ---------------------------------------------------------------------------
// Atomic writes
// ---------------------------------------------------------------------------

/// Write `bytes` to `path` atomically (temp file in the same directory, then
/// rename). Parent directories are created as needed.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically to `path`.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), BraidError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes).map_err(|e| BraidError::Storage {
        path: path.to_path_buf(),
        detail: format!("atomic write failed: {e}"),
    })
}

// ---------------------------------------------------------------------------
// Lenient reads with quarantine
// ---------------------------------------------------------------------------

/// Outcome of a lenient JSON load.
#[derive(Debug)]
pub struct LoadOutcome<T> {
    /// The loaded value, or the default when nothing usable was on disk.
    pub value: T,
    /// Where the corrupt original was moved, if quarantine fired.
    pub quarantined: Option<PathBuf>,
}

/// Load JSON from `path`, tolerating absence and corruption.
///
/// - Missing file → `T::default()`.
/// - Unreadable or unparseable file → the file is renamed to
///   `<name>.corrupt.<unix-seconds>`, a warning is logged, and
///   `T::default()` is returned with the quarantine path recorded.
pub fn load_json_lenient<T>(path: &Path) -> LoadOutcome<T>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        return LoadOutcome {
            value: T::default(),
            quarantined: None,
        };
    }

    let parsed = std::fs::read(path)
        .map_err(|e| e.to_string())
        .and_then(|bytes| serde_json::from_slice::<T>(&bytes).map_err(|e| e.to_string()));

    match parsed {
        Ok(value) => LoadOutcome {
            value,
            quarantined: None,
        },
        Err(detail) => {
            let quarantine = quarantine_path(path);
            warn!(
                path = %path.display(),
                quarantine = %quarantine.display(),
                %detail,
                "state file unreadable, quarantining and starting empty"
            );
            if let Err(e) = std::fs::rename(path, &quarantine) {
                warn!(path = %path.display(), error = %e, "quarantine rename failed");
            }
            LoadOutcome {
                value: T::default(),
                quarantined: Some(quarantine),
            }
        }
    }
}

fn quarantine_path(path: &Path) -> PathBuf {
    let ts = chrono::Utc::now().timestamp();
    let name = path
        .file_name()
        .map_or_else(|| "state".to_owned(), |n| n.to_string_lossy().into_owned());
    path.with_file_name(format!("{name}.corrupt.{ts}"))
}

// ---------------------------------------------------------------------------
// Advisory merge lock
// ---------------------------------------------------------------------------

/// Advisory lock guarding a project's state root against concurrent merges.
///
/// The lock is a plain file (`merge.lock`) containing the holder's PID.
/// Acquisition fails fast when the file already exists; the guard removes
/// the file on drop. This is advisory only — it protects against accidental
/// double invocation, not hostile writers.
#[derive(Debug)]
pub struct MergeLock {
    path: PathBuf,
}

impl MergeLock {
    /// Acquire the merge lock for `state_root`, creating the directory if
    /// needed. Fails with [`BraidError::StateLocked`] when already held.
    pub fn acquire(state_root: &Path) -> Result<Self, BraidError> {
        std::fs::create_dir_all(state_root)?;
        let path = state_root.join("merge.lock");

        // create_new gives us the existence check and creation in one step.
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                let _ = writeln!(file, "{}", std::process::id());
                debug!(path = %path.display(), "acquired merge lock");
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(BraidError::StateLocked { path })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for MergeLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove merge lock");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn write_atomic_creates_parents() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("a/b/c.json");
        write_atomic(&path, b"{}").expect("write");
        assert_eq!(std::fs::read(&path).expect("read"), b"{}");
    }

    #[test]
    fn write_atomic_replaces_existing() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("x.json");
        write_atomic(&path, b"one").expect("write");
        write_atomic(&path, b"two").expect("write");
        assert_eq!(std::fs::read(&path).expect("read"), b"two");
    }

    #[test]
    fn json_round_trip() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("map.json");
        let mut map = BTreeMap::new();
        map.insert("k".to_owned(), 7_i64);
        write_json_atomic(&path, &map).expect("write");

        let out: LoadOutcome<BTreeMap<String, i64>> = load_json_lenient(&path);
        assert_eq!(out.value, map);
        assert!(out.quarantined.is_none());
    }

    #[test]
    fn missing_file_loads_default() {
        let dir = TempDir::new().expect("tempdir");
        let out: LoadOutcome<Vec<String>> = load_json_lenient(&dir.path().join("nope.json"));
        assert!(out.value.is_empty());
        assert!(out.quarantined.is_none());
    }

    #[test]
    fn corrupt_file_is_quarantined() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("bad.json");
        std::fs::write(&path, b"{ not json").expect("write");

        let out: LoadOutcome<BTreeMap<String, i64>> = load_json_lenient(&path);
        assert!(out.value.is_empty());
        let quarantine = out.quarantined.expect("quarantine path");
        assert!(quarantine.exists());
        assert!(!path.exists());
        assert!(
            quarantine
                .file_name()
                .expect("name")
                .to_string_lossy()
                .contains(".corrupt.")
        );
    }

    #[test]
    fn lock_fails_fast_when_held() {
        let dir = TempDir::new().expect("tempdir");
        let lock = MergeLock::acquire(dir.path()).expect("first acquire");
        let second = MergeLock::acquire(dir.path());
        assert!(matches!(second, Err(BraidError::StateLocked { .. })));
        drop(lock);
        // Released on drop: a fresh acquire succeeds.
        let third = MergeLock::acquire(dir.path()).expect("re-acquire");
        assert!(third.path().exists());
    }
}
