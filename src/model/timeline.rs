//! File-centric timeline entities.
//!
//! Instead of asking "what did task X change?", the timeline asks "what
//! happened to file Y over time, from ALL sources?" — main-branch commits
//! form the spine, and each task holds an isolated view (branch point,
//! worktree state, intent, drift) hanging off it. [`MergeContext`] is the
//! situational-awareness bundle handed to the AI resolver at merge time.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// EventSource
// ---------------------------------------------------------------------------

/// Where a main-branch change came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// A human (or at least non-task) commit.
    Human,
    /// A previously merged task's changes landing on main.
    MergedTask,
}

// ---------------------------------------------------------------------------
// MainBranchEvent
// ---------------------------------------------------------------------------

/// One commit to the main branch affecting a file.
///
/// Events form the authoritative history all task worktrees diverge from and
/// merge back into.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MainBranchEvent {
    /// Commit hash.
    pub commit_hash: String,
    /// Commit timestamp.
    pub timestamp: DateTime<Utc>,
    /// File content at this commit.
    pub content: String,
    /// Source of the change.
    pub source: EventSource,
    /// The task that was merged, when `source == MergedTask`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_from_task: Option<String>,
    /// Commit message.
    #[serde(default)]
    pub commit_message: String,
    /// Commit author, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Compact diff description (e.g. `"+15 -3 lines"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_summary: Option<String>,
}

// ---------------------------------------------------------------------------
// BranchPoint / WorktreeState / TaskIntent
// ---------------------------------------------------------------------------

/// The exact point a task branched from main.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BranchPoint {
    /// Commit the worktree was forked at.
    pub commit_hash: String,
    /// File content at that commit (the task's baseline for this file).
    pub content: String,
    /// When that commit was made.
    pub timestamp: DateTime<Utc>,
}

/// Current state of a file in a task's worktree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorktreeState {
    /// Current file content in the worktree.
    pub content: String,
    /// When the worktree copy was last observed changing.
    pub last_modified: DateTime<Utc>,
}

/// What a task intends to do with a file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskIntent {
    /// Short title.
    #[serde(default)]
    pub title: String,
    /// Longer description.
    #[serde(default)]
    pub description: String,
    /// Whether the intent came from the plan document.
    #[serde(default)]
    pub from_plan: bool,
}

impl TaskIntent {
    /// Create an intent with title only.
    #[must_use]
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            from_plan: false,
        }
    }

    /// The best single-line rendering: description when present, else title.
    #[must_use]
    pub fn summary(&self) -> &str {
        if self.description.is_empty() {
            &self.title
        } else {
            &self.description
        }
    }
}

// ---------------------------------------------------------------------------
// TaskFileView
// ---------------------------------------------------------------------------

/// Lifecycle of a task's relationship with a file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// The task is still working (or awaiting merge).
    #[default]
    Active,
    /// The task's changes have landed on main.
    Merged,
    /// The task was abandoned; its changes will never land.
    Abandoned,
}

/// A single task's relationship with a specific file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskFileView {
    /// The task identifier.
    pub task_id: String,
    /// Where the task branched from main.
    pub branch_point: BranchPoint,
    /// Current worktree state; `None` until the task first touches the file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_state: Option<WorktreeState>,
    /// What the task intends to do.
    #[serde(default)]
    pub task_intent: TaskIntent,
    /// How many main commits landed on this file since the task branched.
    #[serde(default)]
    pub commits_behind_main: u32,
    /// Lifecycle status.
    #[serde(default)]
    pub status: TaskStatus,
    /// When the task merged, for `status == Merged`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// FileTimeline
// ---------------------------------------------------------------------------

/// Complete per-file history: the main-branch spine plus every task's view.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileTimeline {
    /// Project-relative path.
    pub file_path: String,
    /// Main-branch events ordered by `(timestamp, commit_hash)`. Append-only.
    #[serde(default)]
    pub main_branch_history: Vec<MainBranchEvent>,
    /// Each task's isolated view of this file.
    #[serde(default)]
    pub task_views: BTreeMap<String, TaskFileView>,
    /// When this timeline was created.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub last_updated: DateTime<Utc>,
}

impl FileTimeline {
    /// Create an empty timeline for a file.
    #[must_use]
    pub fn new(file_path: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            file_path: file_path.into(),
            main_branch_history: Vec::new(),
            task_views: BTreeMap::new(),
            created_at: now,
            last_updated: now,
        }
    }

    /// Record a main-branch event, keeping the history sorted by
    /// `(timestamp, commit_hash)` and refreshing drift for active views.
    ///
    /// Duplicate commit hashes are ignored. Drift is recomputed from the
    /// branch point rather than incremented so the invariant
    /// `commits_behind_main == |events strictly after branch point|` holds
    /// even when events are observed out of order.
    pub fn add_main_event(&mut self, event: MainBranchEvent, now: DateTime<Utc>) {
        if self
            .main_branch_history
            .iter()
            .any(|e| e.commit_hash == event.commit_hash)
        {
            return;
        }
        let key = (event.timestamp, event.commit_hash.clone());
        let idx = self
            .main_branch_history
            .partition_point(|e| (e.timestamp, e.commit_hash.clone()) <= key);
        self.main_branch_history.insert(idx, event);
        self.last_updated = now;
        self.refresh_drift();
    }

    /// Recompute `commits_behind_main` for every active view.
    fn refresh_drift(&mut self) {
        let history = &self.main_branch_history;
        for view in self.task_views.values_mut() {
            if view.status == TaskStatus::Active {
                let behind = history
                    .iter()
                    .filter(|e| e.timestamp > view.branch_point.timestamp)
                    .count();
                view.commits_behind_main = u32::try_from(behind).unwrap_or(u32::MAX);
            }
        }
    }

    /// Add or replace a task's view of this file.
    pub fn add_task_view(&mut self, view: TaskFileView, now: DateTime<Utc>) {
        self.task_views.insert(view.task_id.clone(), view);
        self.last_updated = now;
        self.refresh_drift();
    }

    /// A task's view, when present.
    #[must_use]
    pub fn task_view(&self, task_id: &str) -> Option<&TaskFileView> {
        self.task_views.get(task_id)
    }

    /// Views for tasks that are still active.
    pub fn active_views(&self) -> impl Iterator<Item = &TaskFileView> {
        self.task_views
            .values()
            .filter(|v| v.status == TaskStatus::Active)
    }

    /// All main events strictly after `timestamp`, oldest first.
    #[must_use]
    pub fn events_after(&self, timestamp: DateTime<Utc>) -> Vec<&MainBranchEvent> {
        self.main_branch_history
            .iter()
            .filter(|e| e.timestamp > timestamp)
            .collect()
    }

    /// The most recent main-branch event.
    #[must_use]
    pub fn current_main_state(&self) -> Option<&MainBranchEvent> {
        self.main_branch_history.last()
    }
}

// ---------------------------------------------------------------------------
// MergeContext
// ---------------------------------------------------------------------------

/// Summary of a sibling task still pending on the same file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingTaskInfo {
    /// The sibling task's id.
    pub task_id: String,
    /// Its intent, single line.
    pub intent: String,
    /// Where it branched.
    pub branch_point_commit: String,
    /// Its current drift.
    pub commits_behind: u32,
}

/// The complete context package for one task × file merge decision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MergeContext {
    /// The file being merged.
    pub file_path: String,
    /// The task being merged.
    pub task_id: String,
    /// What the task set out to do.
    pub task_intent: TaskIntent,
    /// The task's starting point.
    pub task_branch_point: BranchPoint,
    /// Main-branch events since the branch point, oldest first.
    pub main_evolution: Vec<MainBranchEvent>,
    /// The task's current file content.
    pub task_worktree_content: String,
    /// Current content on main.
    pub current_main_content: String,
    /// Current main commit hash.
    pub current_main_commit: String,
    /// Other active tasks touching this file.
    pub other_pending_tasks: Vec<PendingTaskInfo>,
    /// Convenience: `main_evolution.len()` as recorded at context build time.
    pub total_commits_behind: u32,
    /// Convenience: `other_pending_tasks.len()` at context build time.
    pub total_pending_tasks: u32,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
