//! Unified error type for the Braid merge engine.
//!
//! Defines [`BraidError`], the error surface shared by the evolution store,
//! timeline tracker, and merge orchestrator. Error messages are written for
//! the coordinating agent framework: each variant names what went wrong and
//! what the caller can do about it.
//!
//! Most failures never reach this type — the merge pipeline degrades at
//! file-level granularity (a bad file becomes a `failed` entry in the merge
//! report) and the analyzer never errors at all. `BraidError` is for the
//! failures that make an operation as a whole unusable: broken state
//! directories, unreadable configuration, a VCS that will not answer.

use std::fmt;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// BraidError
// ---------------------------------------------------------------------------

/// Unified error type for Braid operations.
#[derive(Debug)]
pub enum BraidError {
    /// A git command failed.
    Vcs {
        /// The command that was run (e.g. `"git merge-base main HEAD"`).
        command: String,
        /// Captured stderr from the subprocess.
        stderr: String,
        /// Process exit code, if the process exited at all.
        exit_code: Option<i32>,
    },

    /// A git command exceeded the configured timeout and was killed.
    VcsTimeout {
        /// The command that was killed.
        command: String,
        /// The timeout that was exceeded, in seconds.
        timeout_secs: u64,
    },

    /// A persisted state file could not be read or written.
    Storage {
        /// Path to the offending file.
        path: PathBuf,
        /// Human-readable description of the problem.
        detail: String,
    },

    /// Serializing or deserializing persisted JSON failed.
    Serialize(serde_json::Error),

    /// The configuration file could not be loaded or parsed.
    Config {
        /// Path to the configuration file.
        path: PathBuf,
        /// Human-readable description of the problem.
        detail: String,
    },

    /// The project root or state directory is unusable.
    ///
    /// This is the fatal-configuration case: no merge can proceed, and the
    /// orchestrator surfaces it as a report with `success = false`.
    InvalidStateRoot {
        /// The directory that was rejected.
        path: PathBuf,
        /// Why it was rejected.
        detail: String,
    },

    /// Another process holds the advisory merge lock for this project.
    StateLocked {
        /// Path to the lock file.
        path: PathBuf,
    },

    /// An I/O error outside the storage layer.
    Io(std::io::Error),
}

impl fmt::Display for BraidError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vcs {
                command,
                stderr,
                exit_code,
            } => {
                write!(f, "git command failed: {command}")?;
                if let Some(code) = exit_code {
                    write!(f, " (exit {code})")?;
                }
                if !stderr.is_empty() {
                    write!(f, "\n  stderr: {stderr}")?;
                }
                write!(
                    f,
                    "\n  To fix: check the repository state and retry. Run `git status` for details."
                )
            }
            Self::VcsTimeout {
                command,
                timeout_secs,
            } => {
                write!(
                    f,
                    "git command timed out after {timeout_secs}s: {command}\n  To fix: check for repository locks or raise merge.vcs_timeout_secs in .braid/config.toml."
                )
            }
            Self::Storage { path, detail } => {
                write!(
                    f,
                    "state file error at '{}': {}\n  To fix: check permissions under the .braid directory.",
                    path.display(),
                    detail
                )
            }
            Self::Serialize(err) => {
                write!(f, "state serialization failed: {err}")
            }
            Self::Config { path, detail } => {
                write!(
                    f,
                    "configuration error in '{}': {}\n  To fix: edit the config file and correct the issue.",
                    path.display(),
                    detail
                )
            }
            Self::InvalidStateRoot { path, detail } => {
                write!(
                    f,
                    "unusable state directory '{}': {}\n  To fix: point Braid at a writable project directory.",
                    path.display(),
                    detail
                )
            }
            Self::StateLocked { path } => {
                write!(
                    f,
                    "another merge is in progress (lock file present at '{}').\n  To fix: wait for it to finish, or delete the lock file if the process is gone.",
                    path.display()
                )
            }
            Self::Io(err) => {
                write!(
                    f,
                    "I/O error: {err}\n  To fix: check file permissions and disk space."
                )
            }
        }
    }
}

impl std::error::Error for BraidError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Serialize(err) => Some(err),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// From impls
// ---------------------------------------------------------------------------

impl From<std::io::Error> for BraidError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for BraidError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialize(err)
    }
}

impl From<crate::vcs::VcsError> for BraidError {
    fn from(err: crate::vcs::VcsError) -> Self {
        match err {
            crate::vcs::VcsError::Command {
                command,
                stderr,
                exit_code,
            } => Self::Vcs {
                command,
                stderr,
                exit_code,
            },
            crate::vcs::VcsError::Timeout {
                command,
                timeout_secs,
            } => Self::VcsTimeout {
                command,
                timeout_secs,
            },
            crate::vcs::VcsError::Io(io) => Self::Io(io),
        }
    }
}

impl From<crate::config::ConfigError> for BraidError {
    fn from(err: crate::config::ConfigError) -> Self {
        Self::Config {
            path: err.path.unwrap_or_default(),
            detail: err.message,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BraidError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_vcs_error() {
        let err = BraidError::Vcs {
            command: "git merge-base main HEAD".to_owned(),
            stderr: "fatal: not a git repository".to_owned(),
            exit_code: Some(128),
        };
        let msg = format!("{err}");
        assert!(msg.contains("git merge-base main HEAD"));
        assert!(msg.contains("exit 128"));
        assert!(msg.contains("not a git repository"));
        assert!(msg.contains("git status"));
    }

    #[test]
    fn display_vcs_error_empty_stderr() {
        let err = BraidError::Vcs {
            command: "git rev-parse HEAD".to_owned(),
            stderr: String::new(),
            exit_code: None,
        };
        let msg = format!("{err}");
        assert!(msg.contains("git rev-parse HEAD"));
        assert!(!msg.contains("stderr:"));
    }

    #[test]
    fn display_vcs_timeout() {
        let err = BraidError::VcsTimeout {
            command: "git diff --name-only abc..HEAD".to_owned(),
            timeout_secs: 30,
        };
        let msg = format!("{err}");
        assert!(msg.contains("timed out after 30s"));
        assert!(msg.contains("vcs_timeout_secs"));
    }

    #[test]
    fn display_storage_error() {
        let err = BraidError::Storage {
            path: PathBuf::from(".braid/evolutions.json"),
            detail: "truncated file".to_owned(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("evolutions.json"));
        assert!(msg.contains("truncated file"));
    }

    #[test]
    fn display_state_locked() {
        let err = BraidError::StateLocked {
            path: PathBuf::from(".braid/merge.lock"),
        };
        let msg = format!("{err}");
        assert!(msg.contains("merge.lock"));
        assert!(msg.contains("in progress"));
    }

    #[test]
    fn display_invalid_state_root() {
        let err = BraidError::InvalidStateRoot {
            path: PathBuf::from("/nonexistent"),
            detail: "not a directory".to_owned(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("/nonexistent"));
        assert!(msg.contains("not a directory"));
    }

    #[test]
    fn error_source_io() {
        let err = BraidError::Io(std::io::Error::other("disk full"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn error_source_vcs_is_none() {
        let err = BraidError::Vcs {
            command: "git show".to_owned(),
            stderr: String::new(),
            exit_code: Some(1),
        };
        assert!(std::error::Error::source(&err).is_none());
    }

    #[test]
    fn from_io_error() {
        let err: BraidError = std::io::Error::other("nope").into();
        assert!(matches!(err, BraidError::Io(_)));
    }

    #[test]
    fn from_vcs_error() {
        let vcs = crate::vcs::VcsError::Command {
            command: "git show abc:file".to_owned(),
            stderr: "fatal: bad object".to_owned(),
            exit_code: Some(128),
        };
        let err: BraidError = vcs.into();
        assert!(matches!(err, BraidError::Vcs { .. }));
    }
}
