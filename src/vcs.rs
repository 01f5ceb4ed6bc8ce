//! VCS collaborator interface.
//!
//! The merge engine needs a handful of read-only repository operations:
//! two-dot changed-file listings, file content at a revision, merge-base
//! computation, ref verification, and commit metadata for the timeline.
//! [`VcsClient`] is the seam; [`GitCli`] is the default implementation that
//! shells out to the `git` binary.
//!
//! Every subprocess call is bounded by a timeout (default 30 seconds). On
//! timeout the child is killed and the call fails with
//! [`VcsError::Timeout`]; callers treat the affected file or task as failed
//! and keep going. All output is decoded as UTF-8 with replacement.

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::debug;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from VCS subprocess calls.
#[derive(Debug)]
pub enum VcsError {
    /// The command ran and exited non-zero.
    Command {
        /// The full command string (for diagnostics).
        command: String,
        /// Stderr from the subprocess.
        stderr: String,
        /// Process exit code, if available.
        exit_code: Option<i32>,
    },
    /// The command exceeded its deadline and was killed.
    Timeout {
        /// The full command string.
        command: String,
        /// The deadline that was exceeded, in seconds.
        timeout_secs: u64,
    },
    /// Spawning or talking to the subprocess failed.
    Io(std::io::Error),
}

impl fmt::Display for VcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command {
                command,
                stderr,
                exit_code,
            } => {
                write!(f, "`{command}` failed")?;
                if let Some(code) = exit_code {
                    write!(f, " (exit {code})")?;
                }
                if !stderr.is_empty() {
                    write!(f, ": {stderr}")?;
                }
                Ok(())
            }
            Self::Timeout {
                command,
                timeout_secs,
            } => write!(f, "`{command}` timed out after {timeout_secs}s"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for VcsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        if let Self::Io(e) = self {
            Some(e)
        } else {
            None
        }
    }
}

impl From<std::io::Error> for VcsError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

// ---------------------------------------------------------------------------
// CommitInfo
// ---------------------------------------------------------------------------

/// Metadata for a single commit, as needed by the timeline tracker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitInfo {
    /// Full commit hash.
    pub hash: String,
    /// Author name.
    pub author: String,
    /// Author timestamp.
    pub timestamp: DateTime<Utc>,
    /// Full commit message (subject + body), trailing whitespace trimmed.
    pub message: String,
}

// ---------------------------------------------------------------------------
// VcsClient trait
// ---------------------------------------------------------------------------

/// Read-only repository operations the merge engine depends on.
///
/// All paths are repo-relative with forward slashes, matching the rest of
/// the engine's file addressing.
pub trait VcsClient {
    /// Names of files changed between `base` and `head` (two-dot diff).
    fn changed_files(&self, repo: &Path, base: &str, head: &str)
    -> Result<Vec<String>, VcsError>;

    /// File content at `rev`, or `None` if the file does not exist there.
    fn show_file(&self, repo: &Path, rev: &str, path: &str) -> Result<Option<String>, VcsError>;

    /// Unified diff of one file between `base` and `head`.
    fn file_diff(&self, repo: &Path, base: &str, head: &str, path: &str)
    -> Result<String, VcsError>;

    /// Merge-base of two refs.
    fn merge_base(&self, repo: &Path, a: &str, b: &str) -> Result<String, VcsError>;

    /// Whether `reference` resolves to a commit.
    fn ref_exists(&self, repo: &Path, reference: &str) -> bool;

    /// Hash of the current `HEAD` commit.
    fn head_commit(&self, repo: &Path) -> Result<String, VcsError>;

    /// Metadata for one commit.
    fn commit_info(&self, repo: &Path, rev: &str) -> Result<CommitInfo, VcsError>;

    /// Files touched by one commit.
    fn files_in_commit(&self, repo: &Path, rev: &str) -> Result<Vec<String>, VcsError>;
}

// ---------------------------------------------------------------------------
// GitCli
// ---------------------------------------------------------------------------

/// Default [`VcsClient`] backed by the `git` binary.
#[derive(Clone, Debug)]
pub struct GitCli {
    binary: PathBuf,
    timeout: Duration,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl GitCli {
    /// Create a client with the given subprocess timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            binary: PathBuf::from("git"),
            timeout,
        }
    }

    /// Override the binary (used by tests to simulate slow tools).
    #[must_use]
    pub fn with_binary(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    /// Run the binary in `dir` with `args`, enforcing the timeout.
    ///
    /// Returns stdout decoded as UTF-8 with replacement, without trimming.
    pub(crate) fn run(&self, dir: &Path, args: &[&str]) -> Result<String, VcsError> {
        let rendered = format!("{} {}", self.binary.display(), args.join(" "));
        debug!(command = %rendered, "running vcs command");

        let mut child = Command::new(&self.binary)
            .args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Drain both pipes on threads so a chatty child can never deadlock
        // against the deadline poll below.
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_handle = std::thread::spawn(move || drain(stdout));
        let err_handle = std::thread::spawn(move || drain(stderr));

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait()? {
                Some(status) => break status,
                None if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = out_handle.join();
                    let _ = err_handle.join();
                    return Err(VcsError::Timeout {
                        command: rendered,
                        timeout_secs: self.timeout.as_secs(),
                    });
                }
                None => std::thread::sleep(Duration::from_millis(10)),
            }
        };

        let stdout_bytes = out_handle.join().unwrap_or_default();
        let stderr_bytes = err_handle.join().unwrap_or_default();
        let stdout_text = String::from_utf8_lossy(&stdout_bytes).into_owned();

        if status.success() {
            Ok(stdout_text)
        } else {
            Err(VcsError::Command {
                command: rendered,
                stderr: String::from_utf8_lossy(&stderr_bytes).trim().to_owned(),
                exit_code: status.code(),
            })
        }
    }
}

fn drain(pipe: Option<impl Read>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf);
    }
    buf
}

impl VcsClient for GitCli {
    fn changed_files(
        &self,
        repo: &Path,
        base: &str,
        head: &str,
    ) -> Result<Vec<String>, VcsError> {
        let range = format!("{base}..{head}");
        let out = self.run(repo, &["diff", "--name-only", &range])?;
        Ok(out.lines().filter(|l| !l.is_empty()).map(String::from).collect())
    }

    fn show_file(&self, repo: &Path, rev: &str, path: &str) -> Result<Option<String>, VcsError> {
        let spec = format!("{rev}:{path}");
        match self.run(repo, &["show", &spec]) {
            Ok(content) => Ok(Some(content)),
            // Path not present at that revision — distinct from a broken repo,
            // which still surfaces as an error upstream via exit diagnostics.
            Err(VcsError::Command { stderr, .. })
                if stderr.contains("does not exist")
                    || stderr.contains("exists on disk, but not in")
                    || stderr.contains("invalid object name")
                    || stderr.contains("bad object") =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn file_diff(
        &self,
        repo: &Path,
        base: &str,
        head: &str,
        path: &str,
    ) -> Result<String, VcsError> {
        let range = format!("{base}..{head}");
        self.run(repo, &["diff", &range, "--", path])
    }

    fn merge_base(&self, repo: &Path, a: &str, b: &str) -> Result<String, VcsError> {
        let out = self.run(repo, &["merge-base", a, b])?;
        Ok(out.trim().to_owned())
    }

    fn ref_exists(&self, repo: &Path, reference: &str) -> bool {
        self.run(repo, &["rev-parse", "--verify", "--quiet", reference])
            .is_ok()
    }

    fn head_commit(&self, repo: &Path) -> Result<String, VcsError> {
        let out = self.run(repo, &["rev-parse", "HEAD"])?;
        Ok(out.trim().to_owned())
    }

    fn commit_info(&self, repo: &Path, rev: &str) -> Result<CommitInfo, VcsError> {
        // NUL-separated fields so the free-form message can't break parsing.
        let out = self.run(repo, &["show", "-s", "--format=%H%x00%an%x00%aI%x00%B", rev])?;
        let mut parts = out.splitn(4, '\0');
        let hash = parts.next().unwrap_or_default().trim().to_owned();
        let author = parts.next().unwrap_or_default().to_owned();
        let raw_ts = parts.next().unwrap_or_default().trim().to_owned();
        let message = parts.next().unwrap_or_default().trim_end().to_owned();

        let timestamp = DateTime::parse_from_rfc3339(&raw_ts)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| VcsError::Command {
                command: format!("git show -s {rev}"),
                stderr: format!("unparseable author date {raw_ts:?}: {e}"),
                exit_code: None,
            })?;

        Ok(CommitInfo {
            hash,
            author,
            timestamp,
            message,
        })
    }

    fn files_in_commit(&self, repo: &Path, rev: &str) -> Result<Vec<String>, VcsError> {
        let out = self.run(
            repo,
            &["diff-tree", "--no-commit-id", "--name-only", "-r", rev],
        )?;
        Ok(out.lines().filter(|l| !l.is_empty()).map(String::from).collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    fn init_repo(dir: &Path) {
        for args in [
            vec!["init", "-b", "main"],
            vec!["config", "user.email", "test@example.com"],
            vec!["config", "user.name", "Test"],
        ] {
            let out = Command::new("git")
                .args(&args)
                .current_dir(dir)
                .output()
                .expect("git");
            assert!(out.status.success(), "git {args:?} failed");
        }
    }

    fn commit_file(dir: &Path, name: &str, content: &str, message: &str) -> String {
        std::fs::write(dir.join(name), content).expect("write");
        for args in [vec!["add", "."], vec!["commit", "-m", message]] {
            let out = Command::new("git")
                .args(&args)
                .current_dir(dir)
                .output()
                .expect("git");
            assert!(out.status.success(), "git {args:?} failed");
        }
        let out = Command::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(dir)
            .output()
            .expect("git");
        String::from_utf8_lossy(&out.stdout).trim().to_owned()
    }

    #[test]
    fn show_file_and_changed_files() {
        if !git_available() {
            return;
        }
        let dir = TempDir::new().expect("tempdir");
        init_repo(dir.path());
        let c1 = commit_file(dir.path(), "a.py", "import os\n", "add a");
        let c2 = commit_file(dir.path(), "b.py", "import sys\n", "add b");

        let git = GitCli::default();
        let content = git
            .show_file(dir.path(), &c1, "a.py")
            .expect("show")
            .expect("present");
        assert_eq!(content, "import os\n");
        assert_eq!(git.show_file(dir.path(), &c1, "b.py").expect("show"), None);

        let changed = git.changed_files(dir.path(), &c1, &c2).expect("diff");
        assert_eq!(changed, vec!["b.py".to_owned()]);
    }

    #[test]
    fn merge_base_and_refs() {
        if !git_available() {
            return;
        }
        let dir = TempDir::new().expect("tempdir");
        init_repo(dir.path());
        let c1 = commit_file(dir.path(), "a.py", "x = 1\n", "one");

        let git = GitCli::default();
        assert_eq!(git.merge_base(dir.path(), "main", "HEAD").expect("mb"), c1);
        assert!(git.ref_exists(dir.path(), "main"));
        assert!(!git.ref_exists(dir.path(), "no-such-branch"));
        assert_eq!(git.head_commit(dir.path()).expect("head"), c1);
    }

    #[test]
    fn commit_info_fields() {
        if !git_available() {
            return;
        }
        let dir = TempDir::new().expect("tempdir");
        init_repo(dir.path());
        let hash = commit_file(dir.path(), "a.py", "x = 1\n", "feat: add a thing");

        let git = GitCli::default();
        let info = git.commit_info(dir.path(), &hash).expect("info");
        assert_eq!(info.hash, hash);
        assert_eq!(info.author, "Test");
        assert_eq!(info.message, "feat: add a thing");

        let files = git.files_in_commit(dir.path(), &hash).expect("files");
        assert_eq!(files, vec!["a.py".to_owned()]);
    }

    #[test]
    fn timeout_kills_slow_commands() {
        let dir = TempDir::new().expect("tempdir");
        let slow = GitCli::with_binary("sleep", Duration::from_millis(100));
        let start = Instant::now();
        let err = slow.run(dir.path(), &["5"]).expect_err("should time out");
        assert!(matches!(err, VcsError::Timeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn command_failure_carries_stderr() {
        if !git_available() {
            return;
        }
        let dir = TempDir::new().expect("tempdir");
        let git = GitCli::default();
        let err = git
            .run(dir.path(), &["rev-parse", "HEAD"])
            .expect_err("not a repo");
        match err {
            VcsError::Command { stderr, .. } => assert!(!stderr.is_empty()),
            other => panic!("expected Command error, got {other:?}"),
        }
    }
}
