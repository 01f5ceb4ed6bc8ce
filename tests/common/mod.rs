//! Shared test fixtures for Braid integration tests.
//!
//! All tests run against throwaway git repositories in temp directories —
//! no side effects on the real repo. Tests that need git skip themselves
//! when the binary is unavailable.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

/// Whether a usable `git` binary is on PATH.
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success())
}

/// A throwaway git repository with `main` checked out.
///
/// Commits get deterministic, strictly increasing timestamps (one minute
/// apart) so timeline ordering and drift are exact regardless of wall
/// clock.
pub struct TestProject {
    dir: TempDir,
    commit_seq: std::cell::Cell<u64>,
}

impl TestProject {
    /// Initialize a fresh repo with user config set.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        run_git(dir.path(), &["init", "-b", "main"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        run_git(dir.path(), &["config", "user.name", "Test"]);
        Self {
            dir,
            commit_seq: std::cell::Cell::new(0),
        }
    }

    fn next_commit_date(&self) -> String {
        let n = self.commit_seq.get();
        self.commit_seq.set(n + 1);
        format!("{} +0000", 1_700_000_000 + n * 60)
    }

    /// The repository root.
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file (creating parents) without committing.
    pub fn write_file(&self, rel: &str, content: &str) {
        let path = self.dir.path().join(rel);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, content).expect("write file");
    }

    /// Stage everything and commit, returning the commit hash.
    pub fn commit_all(&self, message: &str) -> String {
        let date = self.next_commit_date();
        run_git(self.root(), &["add", "."]);
        run_git_dated(self.root(), &["commit", "-m", message], &date);
        self.rev_parse("HEAD")
    }

    /// Write + commit in one step.
    pub fn commit_file(&self, rel: &str, content: &str, message: &str) -> String {
        self.write_file(rel, content);
        self.commit_all(message)
    }

    /// Resolve a revision to its hash.
    pub fn rev_parse(&self, rev: &str) -> String {
        let out = Command::new("git")
            .args(["rev-parse", rev])
            .current_dir(self.root())
            .output()
            .expect("git rev-parse");
        assert!(out.status.success(), "git rev-parse {rev} failed");
        String::from_utf8_lossy(&out.stdout).trim().to_owned()
    }

    /// Create a worktree on a new branch forked from `main`.
    ///
    /// The worktree lands outside the repo root so the project tree stays
    /// clean; the returned guard removes it on drop via the TempDir.
    pub fn add_worktree(&self, branch: &str) -> Worktree {
        let host = TempDir::new().expect("worktree temp dir");
        let path = host.path().join(branch);
        let path_str = path.to_string_lossy().into_owned();
        run_git(
            self.root(),
            &["worktree", "add", "-b", branch, &path_str, "main"],
        );
        Worktree { _host: host, path }
    }
}

/// A task worktree created by [`TestProject::add_worktree`].
pub struct Worktree {
    _host: TempDir,
    pub path: PathBuf,
}

impl Worktree {
    /// Write a file inside the worktree.
    pub fn write_file(&self, rel: &str, content: &str) {
        let path = self.path.join(rel);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, content).expect("write file");
    }

    /// Stage everything and commit inside the worktree.
    pub fn commit_all(&self, message: &str) {
        run_git(&self.path, &["add", "."]);
        run_git(&self.path, &["commit", "-m", message]);
    }
}

fn run_git(dir: &Path, args: &[&str]) {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("failed to run git");
    assert!(
        out.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
}

fn run_git_dated(dir: &Path, args: &[&str], date: &str) {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_DATE", date)
        .env("GIT_COMMITTER_DATE", date)
        .output()
        .expect("failed to run git");
    assert!(
        out.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
}
