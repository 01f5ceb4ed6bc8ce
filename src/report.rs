//! Merge reports and statistics.
//!
//! A [`MergeReport`] is the orchestrator's durable output: per-file
//! [`MergeResult`]s plus aggregate [`MergeStats`], serialized as JSON under
//! `.braid/merge_reports/<name>_<YYYYMMDD_HHMMSS>.json`. Timestamps are
//! ISO-8601; enums serialize as their snake_case wire values.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::merge::{MergeDecision, MergeResult};
use crate::storage;

// ---------------------------------------------------------------------------
// MergeStats
// ---------------------------------------------------------------------------

/// Aggregate counters for one merge invocation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeStats {
    /// Files the pipeline looked at.
    pub files_processed: u64,
    /// Files merged purely by deterministic rules.
    pub files_auto_merged: u64,
    /// Files where the AI resolver settled at least one conflict.
    pub files_ai_merged: u64,
    /// Files flagged for human review.
    pub files_need_review: u64,
    /// Files that failed outright.
    pub files_failed: u64,
    /// AI calls made across all files.
    pub ai_calls_made: u64,
    /// Estimated tokens spent on AI calls.
    pub estimated_tokens_used: u64,
    /// Conflicts detected across all files.
    pub conflicts_detected: u64,
    /// Conflicts resolved by deterministic strategies.
    pub conflicts_auto_resolved: u64,
    /// Conflicts resolved by the AI.
    pub conflicts_ai_resolved: u64,
    /// Wall-clock duration of the invocation.
    pub duration_seconds: f64,
}

impl MergeStats {
    /// Fold one file's result into the counters.
    pub fn absorb(&mut self, result: &MergeResult) {
        self.files_processed += 1;
        self.ai_calls_made += u64::from(result.ai_calls_made);
        self.estimated_tokens_used += result.tokens_used;
        self.conflicts_detected +=
            (result.conflicts_resolved.len() + result.conflicts_remaining.len()) as u64;
        match result.decision {
            MergeDecision::AutoMerged => {
                self.files_auto_merged += 1;
                self.conflicts_auto_resolved += result.conflicts_resolved.len() as u64;
            }
            MergeDecision::AiMerged => {
                self.files_ai_merged += 1;
                self.conflicts_ai_resolved += result.conflicts_resolved.len() as u64;
            }
            MergeDecision::NeedsHumanReview => self.files_need_review += 1,
            MergeDecision::Failed => self.files_failed += 1,
        }
    }
}

// ---------------------------------------------------------------------------
// TaskMergeRequest
// ---------------------------------------------------------------------------

/// One task's entry in a multi-task merge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMergeRequest {
    /// The task to merge.
    pub task_id: String,
    /// The task's worktree, when known (enables retroactive refresh).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<PathBuf>,
    /// Higher priority merges first.
    #[serde(default)]
    pub priority: i32,
}

impl TaskMergeRequest {
    /// A request with default priority and no worktree.
    #[must_use]
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            worktree_path: None,
            priority: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// MergeReport
// ---------------------------------------------------------------------------

/// Durable record of one merge invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MergeReport {
    /// When the invocation started.
    pub started_at: DateTime<Utc>,
    /// When it finished; `None` only while in flight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Tasks included in this merge.
    #[serde(default)]
    pub tasks_merged: Vec<String>,
    /// Aggregate counters.
    #[serde(default)]
    pub stats: MergeStats,
    /// Per-file outcomes, keyed by project-relative path.
    #[serde(default)]
    pub file_results: BTreeMap<String, MergeResult>,
    /// Whether the invocation as a whole succeeded (no failed files, no
    /// global error).
    #[serde(default)]
    pub success: bool,
    /// Global error, for invocation-level failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MergeReport {
    /// Start a report for the given tasks.
    #[must_use]
    pub fn begin(tasks_merged: Vec<String>) -> Self {
        Self {
            started_at: Utc::now(),
            completed_at: None,
            tasks_merged,
            stats: MergeStats::default(),
            file_results: BTreeMap::new(),
            success: true,
            error: None,
        }
    }

    /// Record a per-file result and fold it into the stats.
    pub fn record(&mut self, file_path: &str, result: MergeResult) {
        self.stats.absorb(&result);
        self.file_results.insert(file_path.to_owned(), result);
    }

    /// Close the report: timestamps, duration, and the no-failures flag.
    pub fn finish(&mut self) {
        let now = Utc::now();
        self.stats.duration_seconds = (now - self.started_at)
            .to_std()
            .map_or(0.0, |d| d.as_secs_f64());
        self.completed_at = Some(now);
        if self.error.is_none() {
            self.success = self.stats.files_failed == 0;
        }
    }

    /// Mark the whole invocation failed.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.success = false;
        self.error = Some(error.into());
    }

    /// One-line summary: `"N files: A auto, B ai, C review, D failed"`.
    #[must_use]
    pub fn summary_line(&self) -> String {
        format!(
            "{} files: {} auto, {} ai, {} review, {} failed",
            self.stats.files_processed,
            self.stats.files_auto_merged,
            self.stats.files_ai_merged,
            self.stats.files_need_review,
            self.stats.files_failed
        )
    }

    /// Persist the report as pretty JSON (atomic write).
    pub fn save(&self, path: &Path) -> Result<()> {
        storage::write_json_atomic(path, self)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn result(decision: MergeDecision) -> MergeResult {
        MergeResult::new(decision, "a.py")
    }

    #[test]
    fn stats_absorb_by_decision() {
        let mut stats = MergeStats::default();
        stats.absorb(&result(MergeDecision::AutoMerged));
        stats.absorb(&result(MergeDecision::AiMerged));
        stats.absorb(&result(MergeDecision::NeedsHumanReview));
        stats.absorb(&result(MergeDecision::Failed));

        assert_eq!(stats.files_processed, 4);
        assert_eq!(stats.files_auto_merged, 1);
        assert_eq!(stats.files_ai_merged, 1);
        assert_eq!(stats.files_need_review, 1);
        assert_eq!(stats.files_failed, 1);
    }

    #[test]
    fn stats_absorb_ai_counters() {
        let mut stats = MergeStats::default();
        let mut r = result(MergeDecision::AiMerged);
        r.ai_calls_made = 2;
        r.tokens_used = 1500;
        stats.absorb(&r);
        assert_eq!(stats.ai_calls_made, 2);
        assert_eq!(stats.estimated_tokens_used, 1500);
    }

    #[test]
    fn report_finish_sets_success_from_failures() {
        let mut report = MergeReport::begin(vec!["t1".to_owned()]);
        report.record("a.py", result(MergeDecision::AutoMerged));
        report.finish();
        assert!(report.success);
        assert!(report.completed_at.is_some());

        let mut bad = MergeReport::begin(vec!["t1".to_owned()]);
        bad.record("a.py", result(MergeDecision::Failed));
        bad.finish();
        assert!(!bad.success);
    }

    #[test]
    fn report_fail_is_sticky() {
        let mut report = MergeReport::begin(vec![]);
        report.fail("could not find worktree for task t1");
        report.finish();
        assert!(!report.success);
        assert_eq!(
            report.error.as_deref(),
            Some("could not find worktree for task t1")
        );
    }

    #[test]
    fn summary_line_format() {
        let mut report = MergeReport::begin(vec!["t1".to_owned(), "t2".to_owned()]);
        report.record("a.py", result(MergeDecision::AutoMerged));
        report.record("b.py", result(MergeDecision::NeedsHumanReview));
        assert_eq!(report.summary_line(), "2 files: 1 auto, 0 ai, 1 review, 0 failed");
    }

    #[test]
    fn report_json_round_trip() {
        let dir = TempDir::new().expect("tempdir");
        let mut report = MergeReport::begin(vec!["task-001".to_owned()]);
        let mut r = result(MergeDecision::AutoMerged);
        r.merged_content = Some("import os\nimport sys\n".to_owned());
        r.explanation = "Combined 1 imports from 2 tasks".to_owned();
        report.record("a.py", r);
        report.finish();

        let path = dir.path().join("merge_reports/run_20260801_120000.json");
        report.save(&path).expect("save");
        let raw = std::fs::read_to_string(&path).expect("read");
        let back: MergeReport = serde_json::from_str(&raw).expect("deserialize");
        assert_eq!(back, report);
        // Enums serialize as wire strings, timestamps as ISO-8601.
        assert!(raw.contains("\"auto_merged\""));
        assert!(raw.contains(&report.started_at.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true)[..10]));
    }
}
