//! Per-task snapshots and per-file evolution records.
//!
//! A [`TaskSnapshot`] captures what one task did to one file; a
//! [`FileEvolution`] owns the file's baseline metadata plus every task's
//! snapshot. Snapshots are kept sorted by `started_at` (ties by task id) so
//! time-ordered strategies are deterministic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::change::SemanticChange;

// ---------------------------------------------------------------------------
// TaskSnapshot
// ---------------------------------------------------------------------------

/// A snapshot of one task's changes to one file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// The task identifier.
    pub task_id: String,
    /// One-sentence description of what the task intended.
    #[serde(default)]
    pub task_intent: String,
    /// When the task started working on this file.
    pub started_at: DateTime<Utc>,
    /// When the task finished; `None` while still active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Content hash when the task started (16-hex SHA-256 prefix).
    #[serde(default)]
    pub content_hash_before: String,
    /// Content hash after the task's latest modification.
    #[serde(default)]
    pub content_hash_after: String,
    /// The semantic changes made, in detection order.
    #[serde(default)]
    pub semantic_changes: Vec<SemanticChange>,
    /// Raw unified diff, for reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_diff: Option<String>,
}

impl TaskSnapshot {
    /// Create a fresh snapshot for a task that just started touching a file.
    #[must_use]
    pub fn new(
        task_id: impl Into<String>,
        task_intent: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            task_intent: task_intent.into(),
            started_at,
            completed_at: None,
            content_hash_before: String::new(),
            content_hash_after: String::new(),
            semantic_changes: Vec::new(),
            raw_diff: None,
        }
    }

    /// Whether the task has finished with this file.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

// ---------------------------------------------------------------------------
// FileEvolution
// ---------------------------------------------------------------------------

/// Complete evolution record of a single file: baseline plus one snapshot
/// per task that modified it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileEvolution {
    /// Project-relative path, forward slashes.
    pub file_path: String,
    /// Commit hash of the baseline (empty when no VCS head was available).
    #[serde(default)]
    pub baseline_commit: String,
    /// When the baseline was captured.
    pub baseline_captured_at: DateTime<Utc>,
    /// Content hash of the baseline.
    #[serde(default)]
    pub baseline_content_hash: String,
    /// Where the baseline bytes are stored (empty when not stored).
    #[serde(default)]
    pub baseline_snapshot_path: String,
    /// Task snapshots ordered by `started_at`.
    #[serde(default)]
    pub task_snapshots: Vec<TaskSnapshot>,
}

impl FileEvolution {
    /// Look up a task's snapshot.
    #[must_use]
    pub fn task_snapshot(&self, task_id: &str) -> Option<&TaskSnapshot> {
        self.task_snapshots.iter().find(|s| s.task_id == task_id)
    }

    /// Mutable lookup of a task's snapshot.
    pub fn task_snapshot_mut(&mut self, task_id: &str) -> Option<&mut TaskSnapshot> {
        self.task_snapshots
            .iter_mut()
            .find(|s| s.task_id == task_id)
    }

    /// Add or replace a task's snapshot, keeping the ordering invariant.
    ///
    /// There is exactly one snapshot per task id: a new snapshot for an
    /// existing task replaces the old one.
    pub fn add_task_snapshot(&mut self, snapshot: TaskSnapshot) {
        self.task_snapshots.retain(|s| s.task_id != snapshot.task_id);
        self.task_snapshots.push(snapshot);
        self.task_snapshots
            .sort_by(|a, b| (a.started_at, &a.task_id).cmp(&(b.started_at, &b.task_id)));
    }

    /// Task IDs that modified this file, in snapshot order.
    #[must_use]
    pub fn tasks_involved(&self) -> Vec<&str> {
        self.task_snapshots
            .iter()
            .map(|s| s.task_id.as_str())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
