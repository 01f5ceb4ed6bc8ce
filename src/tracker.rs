//! File timeline tracker.
//!
//! Maintains the per-file, file-centric timeline: every main-branch commit
//! touching a file becomes a [`MainBranchEvent`], and every task holds a
//! [`TaskFileView`] with its branch point, worktree state, intent, and
//! drift. At merge time [`TimelineTracker::get_merge_context`] assembles the
//! full situational-awareness bundle for the resolver.
//!
//! Persistence is one JSON document per timeline under
//! `.braid/timelines/<sanitized_path>.json`, written atomically after each
//! mutation. `main_branch_history` is append-only; `task_views` entries are
//! rewritten as status changes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use crate::analyze::SemanticAnalyzer;
use crate::config::STATE_DIR;
use crate::error::{BraidError, Result};
use crate::model::sanitize_path_for_storage;
use crate::model::timeline::{
    BranchPoint, EventSource, FileTimeline, MainBranchEvent, MergeContext, PendingTaskInfo,
    TaskFileView, TaskIntent, TaskStatus, WorktreeState,
};
use crate::storage;
use crate::vcs::VcsClient;

/// Commit messages that mark a main commit as a merged task, capturing the
/// task id: "merge task <id>", "merged task: <id>", case-insensitive.
static MERGED_TASK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)merged?\s+task[:\s]+([\w./-]+)").expect("merged-task pattern")
});

// ---------------------------------------------------------------------------
// TimelineTracker
// ---------------------------------------------------------------------------

/// Owns all file timelines for one project.
pub struct TimelineTracker {
    project_dir: PathBuf,
    timelines_dir: PathBuf,
    timelines: BTreeMap<String, FileTimeline>,
    analyzer: SemanticAnalyzer,
    vcs: std::sync::Arc<dyn VcsClient>,
}

impl TimelineTracker {
    /// Open (or create) the timeline tracker for a project, loading every
    /// persisted timeline. Corrupt timeline files are quarantined
    /// individually and skipped.
    pub fn open(
        project_dir: &Path,
        analyzer: SemanticAnalyzer,
        vcs: std::sync::Arc<dyn VcsClient>,
    ) -> Result<Self> {
        let timelines_dir = project_dir.join(STATE_DIR).join("timelines");
        std::fs::create_dir_all(&timelines_dir).map_err(|e| BraidError::InvalidStateRoot {
            path: timelines_dir.clone(),
            detail: format!("cannot create timelines directory: {e}"),
        })?;

        let mut timelines = BTreeMap::new();
        for entry in std::fs::read_dir(&timelines_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let loaded = storage::load_json_lenient::<Option<FileTimeline>>(&path);
            if let Some(timeline) = loaded.value {
                timelines.insert(timeline.file_path.clone(), timeline);
            }
        }

        debug!(
            project = %project_dir.display(),
            timelines = timelines.len(),
            "timeline tracker opened"
        );
        Ok(Self {
            project_dir: project_dir.to_path_buf(),
            timelines_dir,
            timelines,
            analyzer,
            vcs,
        })
    }

    fn save_timeline(&self, timeline: &FileTimeline) -> Result<()> {
        let name = format!("{}.json", sanitize_path_for_storage(&timeline.file_path));
        storage::write_json_atomic(&self.timelines_dir.join(name), timeline)
    }

    fn timeline_entry(&mut self, file_path: &str) -> &mut FileTimeline {
        self.timelines
            .entry(file_path.to_owned())
            .or_insert_with(|| FileTimeline::new(file_path, Utc::now()))
    }

    // -----------------------------------------------------------------------
    // Task lifecycle
    // -----------------------------------------------------------------------

    /// Register a starting task: one [`TaskFileView`] per file it plans to
    /// modify, with the branch point populated from the VCS.
    pub fn on_task_start(
        &mut self,
        task_id: &str,
        files_to_modify: &[String],
        branch_point_commit: &str,
        task_intent: TaskIntent,
    ) -> Result<()> {
        let branch_ts = self
            .vcs
            .commit_info(&self.project_dir, branch_point_commit)
            .map_or_else(
                |e| {
                    debug!(error = %e, "no commit info for branch point, using now");
                    Utc::now()
                },
                |info| info.timestamp,
            );

        for file in files_to_modify {
            let content = self
                .vcs
                .show_file(&self.project_dir, branch_point_commit, file)
                .ok()
                .flatten()
                .unwrap_or_default();

            let view = TaskFileView {
                task_id: task_id.to_owned(),
                branch_point: BranchPoint {
                    commit_hash: branch_point_commit.to_owned(),
                    content,
                    timestamp: branch_ts,
                },
                worktree_state: None,
                task_intent: task_intent.clone(),
                commits_behind_main: 0,
                status: TaskStatus::Active,
                merged_at: None,
            };
            let timeline = self.timeline_entry(file);
            timeline.add_task_view(view, Utc::now());
            let snapshot = timeline.clone();
            self.save_timeline(&snapshot)?;
        }
        info!(
            task = task_id,
            files = files_to_modify.len(),
            branch_point = branch_point_commit,
            "task registered on timelines"
        );
        Ok(())
    }

    /// Record the latest worktree content for a task's file.
    pub fn on_worktree_modification(
        &mut self,
        task_id: &str,
        file_path: &str,
        new_content: &str,
    ) -> Result<()> {
        let Some(timeline) = self.timelines.get_mut(file_path) else {
            warn!(task = task_id, file = file_path, "worktree update for unknown timeline");
            return Ok(());
        };
        let Some(view) = timeline.task_views.get_mut(task_id) else {
            warn!(task = task_id, file = file_path, "worktree update for unknown task view");
            return Ok(());
        };
        view.worktree_state = Some(WorktreeState {
            content: new_content.to_owned(),
            last_modified: Utc::now(),
        });
        timeline.last_updated = Utc::now();
        let snapshot = timeline.clone();
        self.save_timeline(&snapshot)
    }

    /// Record a main-branch commit, classifying its source from the commit
    /// message (`merge task <id>` ⇒ merged task, otherwise human).
    pub fn on_main_branch_commit(&mut self, commit_hash: &str) -> Result<()> {
        self.record_main_commit(commit_hash, None)
    }

    /// Record a main-branch commit with an explicit source hint.
    pub fn on_main_branch_commit_with_source(
        &mut self,
        commit_hash: &str,
        source: EventSource,
        merged_from_task: Option<&str>,
    ) -> Result<()> {
        self.record_main_commit(commit_hash, Some((source, merged_from_task.map(ToOwned::to_owned))))
    }

    fn record_main_commit(
        &mut self,
        commit_hash: &str,
        hint: Option<(EventSource, Option<String>)>,
    ) -> Result<()> {
        let info = self.vcs.commit_info(&self.project_dir, commit_hash)?;
        let files = self.vcs.files_in_commit(&self.project_dir, commit_hash)?;

        let (source, merged_from_task) = hint.unwrap_or_else(|| {
            MERGED_TASK_RE.captures(&info.message).map_or(
                (EventSource::Human, None),
                |caps| {
                    (
                        EventSource::MergedTask,
                        caps.get(1).map(|m| m.as_str().to_owned()),
                    )
                },
            )
        });

        for file in &files {
            // New timelines only spring up for files the analyzer supports;
            // files already on a timeline always receive their events.
            if !self.timelines.contains_key(file) && !self.analyzer.is_supported(file) {
                continue;
            }
            let content = self
                .vcs
                .show_file(&self.project_dir, commit_hash, file)
                .ok()
                .flatten()
                .unwrap_or_default();

            let event = MainBranchEvent {
                commit_hash: info.hash.clone(),
                timestamp: info.timestamp,
                content,
                source,
                merged_from_task: merged_from_task.clone(),
                commit_message: info.message.clone(),
                author: Some(info.author.clone()),
                diff_summary: None,
            };
            let timeline = self.timeline_entry(file);
            timeline.add_main_event(event, Utc::now());
            let snapshot = timeline.clone();
            self.save_timeline(&snapshot)?;
        }
        debug!(
            commit = commit_hash,
            files = files.len(),
            source = ?source,
            "recorded main branch commit"
        );
        Ok(())
    }

    /// Mark every view of a task as merged and record the merge commit as a
    /// merged-task main event.
    pub fn on_task_merged(&mut self, task_id: &str, merge_commit: &str) -> Result<()> {
        let now = Utc::now();
        let mut touched = Vec::new();
        for (file, timeline) in &mut self.timelines {
            if let Some(view) = timeline.task_views.get_mut(task_id) {
                view.status = TaskStatus::Merged;
                view.merged_at = Some(now);
                timeline.last_updated = now;
                touched.push(file.clone());
            }
        }
        for file in &touched {
            if let Some(timeline) = self.timelines.get(file) {
                let snapshot = timeline.clone();
                self.save_timeline(&snapshot)?;
            }
        }

        // The merge commit itself is main-branch evolution for everyone else.
        if let Err(e) =
            self.on_main_branch_commit_with_source(merge_commit, EventSource::MergedTask, Some(task_id))
        {
            warn!(task = task_id, commit = merge_commit, error = %e, "could not record merge commit event");
        }
        info!(task = task_id, commit = merge_commit, files = touched.len(), "task merged");
        Ok(())
    }

    /// Bootstrap timeline state for a task directly from its worktree.
    ///
    /// Used when a task was started outside the tracker's sight: the branch
    /// point is the merge-base with the detected target branch, the files
    /// are the worktree's two-dot diff, and worktree states are read from
    /// disk.
    pub fn initialize_from_worktree(
        &mut self,
        task_id: &str,
        worktree_path: &Path,
        task_intent: &str,
        task_title: &str,
    ) -> Result<()> {
        let target = self.detect_target_branch(worktree_path);
        let branch_point = self
            .vcs
            .merge_base(worktree_path, &target, "HEAD")
            .map_err(BraidError::from)?;
        let files = self
            .vcs
            .changed_files(worktree_path, &branch_point, "HEAD")
            .map_err(BraidError::from)?;

        let intent = TaskIntent {
            title: task_title.to_owned(),
            description: task_intent.to_owned(),
            from_plan: false,
        };
        self.on_task_start(task_id, &files, &branch_point, intent)?;

        for file in &files {
            let abs = worktree_path.join(file);
            if abs.exists() {
                let content = std::fs::read(&abs)
                    .map(|b| String::from_utf8_lossy(&b).into_owned())
                    .unwrap_or_default();
                self.on_worktree_modification(task_id, file, &content)?;
            }
        }
        Ok(())
    }

    fn detect_target_branch(&self, worktree_path: &Path) -> String {
        for branch in ["main", "master", "develop"] {
            if self.vcs.merge_base(worktree_path, branch, "HEAD").is_ok() {
                return branch.to_owned();
            }
        }
        "main".to_owned()
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// The timeline for a file, if one exists.
    #[must_use]
    pub fn get_timeline(&self, file_path: &str) -> Option<&FileTimeline> {
        self.timelines.get(file_path)
    }

    /// Per-file drift for a task: how many main commits landed on each of
    /// its files since the task branched.
    #[must_use]
    pub fn get_task_drift(&self, task_id: &str) -> BTreeMap<String, u32> {
        self.timelines
            .iter()
            .filter_map(|(file, timeline)| {
                timeline
                    .task_view(task_id)
                    .map(|view| (file.clone(), view.commits_behind_main))
            })
            .collect()
    }

    /// Assemble the complete merge context for one task × file.
    ///
    /// Returns `None` when the file has no timeline or the task no view on
    /// it.
    #[must_use]
    pub fn get_merge_context(&self, task_id: &str, file_path: &str) -> Option<MergeContext> {
        let timeline = self.timelines.get(file_path)?;
        let view = timeline.task_view(task_id)?;

        let main_evolution: Vec<MainBranchEvent> = timeline
            .events_after(view.branch_point.timestamp)
            .into_iter()
            .cloned()
            .collect();

        let (current_main_content, current_main_commit) = timeline.current_main_state().map_or_else(
            || {
                (
                    view.branch_point.content.clone(),
                    view.branch_point.commit_hash.clone(),
                )
            },
            |event| (event.content.clone(), event.commit_hash.clone()),
        );

        let other_pending_tasks: Vec<PendingTaskInfo> = timeline
            .active_views()
            .filter(|v| v.task_id != task_id)
            .map(|v| PendingTaskInfo {
                task_id: v.task_id.clone(),
                intent: v.task_intent.summary().to_owned(),
                branch_point_commit: v.branch_point.commit_hash.clone(),
                commits_behind: v.commits_behind_main,
            })
            .collect();

        let total_commits_behind = u32::try_from(main_evolution.len()).unwrap_or(u32::MAX);
        let total_pending_tasks = u32::try_from(other_pending_tasks.len()).unwrap_or(u32::MAX);
        Some(MergeContext {
            file_path: file_path.to_owned(),
            task_id: task_id.to_owned(),
            task_intent: view.task_intent.clone(),
            task_branch_point: view.branch_point.clone(),
            main_evolution,
            task_worktree_content: view
                .worktree_state
                .as_ref()
                .map(|w| w.content.clone())
                .unwrap_or_default(),
            current_main_content,
            current_main_commit,
            other_pending_tasks,
            total_commits_behind,
            total_pending_tasks,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
