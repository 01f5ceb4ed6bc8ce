//! Multi-file, multi-task merge orchestration.
//!
//! [`MergeOrchestrator`] is the top-level entry point: it refreshes the
//! evolution store from task worktrees, walks every file the tasks touched
//! (in stable lexicographic order, so reports reproduce), runs the per-file
//! pipeline, and aggregates a [`MergeReport`] persisted under
//! `.braid/merge_reports/`.
//!
//! Failure policy: everything is caught at file-level granularity — a bad
//! file becomes a `failed` entry and the merge continues. Only fatal
//! configuration problems (unusable project root, held merge lock) fail the
//! whole report, as `success = false` with no file results.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::analyze::SemanticAnalyzer;
use crate::config::BraidConfig;
use crate::error::Result;
use crate::model::change::FileAnalysis;
use crate::model::conflict::ConflictRegion;
use crate::model::evolution::TaskSnapshot;
use crate::model::merge::MergeResult;
use crate::report::{MergeReport, TaskMergeRequest};
use crate::storage::{self, MergeLock};
use crate::store::EvolutionStore;
use crate::vcs::{GitCli, VcsClient};

use super::pipeline::MergePipeline;
use super::resolver::{AiResolve, AiResolver};

// ---------------------------------------------------------------------------
// Preview types
// ---------------------------------------------------------------------------

/// Summary block of a merge preview.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PreviewSummary {
    /// Files any previewed task modified.
    pub total_files: usize,
    /// Files modified by two or more tasks.
    pub conflict_files: usize,
    /// Conflict regions found.
    pub total_conflicts: usize,
    /// Regions deterministic rules could handle.
    pub auto_mergeable: usize,
}

/// What a merge of the given tasks would do, without mutating anything.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MergePreview {
    /// The tasks previewed.
    pub tasks: Vec<String>,
    /// Every file those tasks modified.
    pub files_to_merge: Vec<String>,
    /// Files with snapshots from two or more of the tasks.
    pub files_with_potential_conflicts: Vec<String>,
    /// Conflict regions across all those files.
    pub conflicts: Vec<ConflictRegion>,
    /// Aggregate counts.
    pub summary: PreviewSummary,
}

// ---------------------------------------------------------------------------
// MergeOrchestrator
// ---------------------------------------------------------------------------

/// Coordinates merges across tasks and files.
pub struct MergeOrchestrator {
    project_dir: PathBuf,
    config: BraidConfig,
    store: EvolutionStore,
    pipeline: MergePipeline,
    resolver: AiResolver,
    vcs: Arc<dyn VcsClient>,
}

impl MergeOrchestrator {
    /// Open an orchestrator for a project, loading `.braid/config.toml`.
    pub fn open(project_dir: &Path) -> Result<Self> {
        let config = BraidConfig::load(project_dir)?;
        Self::open_with_config(project_dir, config)
    }

    /// Open with an explicit configuration.
    pub fn open_with_config(project_dir: &Path, config: BraidConfig) -> Result<Self> {
        let vcs: Arc<dyn VcsClient> = Arc::new(GitCli::new(Duration::from_secs(
            config.merge.vcs_timeout_secs,
        )));
        Self::open_with(project_dir, config, vcs)
    }

    /// Open with an explicit configuration and VCS client (the seam tests
    /// and embedding hosts use).
    pub fn open_with(
        project_dir: &Path,
        config: BraidConfig,
        vcs: Arc<dyn VcsClient>,
    ) -> Result<Self> {
        let analyzer = SemanticAnalyzer::from_config(&config.analyzer);
        let store = EvolutionStore::open(project_dir, analyzer, Arc::clone(&vcs))?;
        let resolver = AiResolver::new(None, config.merge.max_context_tokens as u64);
        Ok(Self {
            project_dir: project_dir.to_path_buf(),
            config,
            store,
            pipeline: MergePipeline::default(),
            resolver,
            vcs,
        })
    }

    /// Install the AI function for hard conflicts.
    ///
    /// Ignored (with a warning) when `merge.enable_ai` is off — the engine
    /// then behaves as if every AI call returned `needs_human_review`.
    pub fn set_ai(&mut self, ai: Box<dyn AiResolve>) {
        if self.config.merge.enable_ai {
            self.resolver.set_ai(ai);
        } else {
            warn!("merge.enable_ai is false; AI resolver not installed");
        }
    }

    /// The evolution store (for host queries).
    #[must_use]
    pub const fn store(&self) -> &EvolutionStore {
        &self.store
    }

    /// Mutable evolution store access (baseline capture, modification
    /// recording).
    pub fn store_mut(&mut self) -> &mut EvolutionStore {
        &mut self.store
    }

    /// Resolver usage counters for this orchestrator.
    #[must_use]
    pub const fn resolver_stats(&self) -> super::resolver::ResolverStats {
        self.resolver.stats()
    }

    // -----------------------------------------------------------------------
    // Merging
    // -----------------------------------------------------------------------

    /// Merge a single task's changes against `target_branch`.
    pub fn merge_task(
        &mut self,
        task_id: &str,
        worktree_path: Option<&Path>,
        target_branch: &str,
    ) -> MergeReport {
        let mut report = MergeReport::begin(vec![task_id.to_owned()]);
        let _lock = match MergeLock::acquire(self.store.state_root()) {
            Ok(lock) => lock,
            Err(e) => {
                report.fail(e.to_string());
                report.finish();
                return report;
            }
        };

        let worktree = worktree_path
            .map(Path::to_path_buf)
            .or_else(|| self.find_worktree(task_id));
        match worktree {
            Some(worktree) => {
                if let Err(e) = self.store.refresh_from_git(
                    task_id,
                    &worktree,
                    Some(target_branch),
                    None,
                ) {
                    warn!(task = task_id, error = %e, "worktree refresh failed, merging from recorded state");
                }
            }
            None => {
                debug!(task = task_id, "no worktree found, merging from recorded state");
            }
        }

        let modifications = self.store.get_task_modifications(task_id);
        if modifications.is_empty() {
            info!(task = task_id, "no modifications found");
            report.finish();
            return report;
        }

        for (file_path, snapshot) in modifications {
            let result = self.merge_one(&file_path, vec![snapshot], target_branch);
            report.record(&file_path, result);
        }

        report.finish();
        self.persist_report(&report, task_id);
        info!(task = task_id, summary = %report.summary_line(), "merge complete");
        report
    }

    /// Merge several tasks together, highest priority first.
    pub fn merge_tasks(
        &mut self,
        mut requests: Vec<TaskMergeRequest>,
        target_branch: &str,
    ) -> MergeReport {
        requests.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        let task_ids: Vec<String> = requests.iter().map(|r| r.task_id.clone()).collect();
        let mut report = MergeReport::begin(task_ids.clone());

        let _lock = match MergeLock::acquire(self.store.state_root()) {
            Ok(lock) => lock,
            Err(e) => {
                report.fail(e.to_string());
                report.finish();
                return report;
            }
        };

        for request in &requests {
            if let Some(worktree) = request
                .worktree_path
                .as_deref()
                .filter(|p| p.exists())
            {
                if let Err(e) = self.store.refresh_from_git(
                    &request.task_id,
                    worktree,
                    Some(target_branch),
                    None,
                ) {
                    warn!(task = %request.task_id, error = %e, "worktree refresh failed");
                }
            }
        }

        // BTreeMap keys give the stable lexicographic file order.
        let file_tasks = self.store.get_files_modified_by_tasks(&task_ids);
        for (file_path, modifying_tasks) in file_tasks {
            let snapshots: Vec<TaskSnapshot> = {
                let Some(evolution) = self.store.get_file_evolution(&file_path) else {
                    continue;
                };
                modifying_tasks
                    .iter()
                    .filter_map(|tid| evolution.task_snapshot(tid).cloned())
                    .collect()
            };
            if snapshots.is_empty() {
                continue;
            }
            let result = self.merge_one(&file_path, snapshots, target_branch);
            report.record(&file_path, result);
        }

        report.finish();
        self.persist_report(&report, "multi");
        info!(tasks = ?task_ids, summary = %report.summary_line(), "multi-task merge complete");
        report
    }

    fn merge_one(
        &mut self,
        file_path: &str,
        snapshots: Vec<TaskSnapshot>,
        target_branch: &str,
    ) -> MergeResult {
        match self.baseline_for(file_path, target_branch) {
            Ok(baseline) => {
                self.pipeline
                    .merge_file(&mut self.resolver, file_path, &baseline, &snapshots)
            }
            Err(e) => {
                warn!(file = file_path, error = %format!("{e:#}"), "skipping file");
                MergeResult::failed(file_path, format!("{e:#}"))
            }
        }
    }

    /// Baseline bytes for a file: the stored blob when one exists, the
    /// target branch content otherwise, empty for files born in a task.
    fn baseline_for(&self, file_path: &str, target_branch: &str) -> anyhow::Result<String> {
        if let Some(content) = self.store.get_baseline_content(file_path) {
            return Ok(content);
        }
        let shown = self
            .vcs
            .show_file(&self.project_dir, target_branch, file_path)
            .with_context(|| format!("reading {file_path} from {target_branch}"))?;
        Ok(shown.unwrap_or_default())
    }

    // -----------------------------------------------------------------------
    // Preview & pending conflicts
    // -----------------------------------------------------------------------

    /// Describe what merging `task_ids` would do, without mutating state.
    #[must_use]
    pub fn preview_merge(&self, task_ids: &[String]) -> MergePreview {
        let file_tasks = self.store.get_files_modified_by_tasks(task_ids);
        let conflicting = self.store.get_conflicting_files(task_ids);

        let mut conflicts = Vec::new();
        for file_path in &conflicting {
            conflicts.extend(self.detect_for_file(file_path, task_ids));
        }

        let summary = PreviewSummary {
            total_files: file_tasks.len(),
            conflict_files: conflicting.len(),
            total_conflicts: conflicts.len(),
            auto_mergeable: conflicts.iter().filter(|c| c.can_auto_merge).count(),
        };
        MergePreview {
            tasks: task_ids.to_vec(),
            files_to_merge: file_tasks.into_keys().collect(),
            files_with_potential_conflicts: conflicting,
            conflicts,
            summary,
        }
    }

    /// Files whose active tasks have conflicts no rule can auto-merge.
    #[must_use]
    pub fn get_pending_conflicts(&self) -> Vec<(String, Vec<ConflictRegion>)> {
        let active: Vec<String> = self.store.get_active_tasks().into_iter().collect();
        if active.len() < 2 {
            return Vec::new();
        }
        let mut pending = Vec::new();
        for file_path in self.store.get_conflicting_files(&active) {
            let hard: Vec<ConflictRegion> = self
                .detect_for_file(&file_path, &active)
                .into_iter()
                .filter(|c| !c.can_auto_merge)
                .collect();
            if !hard.is_empty() {
                pending.push((file_path, hard));
            }
        }
        pending
    }

    fn detect_for_file(&self, file_path: &str, task_ids: &[String]) -> Vec<ConflictRegion> {
        let Some(evolution) = self.store.get_file_evolution(file_path) else {
            return Vec::new();
        };
        let analyses: BTreeMap<String, FileAnalysis> = evolution
            .task_snapshots
            .iter()
            .filter(|s| task_ids.contains(&s.task_id))
            .map(|s| {
                (
                    s.task_id.clone(),
                    FileAnalysis::from_changes(file_path, s.semantic_changes.clone(), 0),
                )
            })
            .collect();
        self.pipeline.detector().detect_conflicts(&analyses)
    }

    // -----------------------------------------------------------------------
    // Outputs
    // -----------------------------------------------------------------------

    /// Write every merged file under `out_dir` (default
    /// `.braid/merge_output/`), mirroring project-relative paths.
    pub fn write_merged_files(
        &self,
        report: &MergeReport,
        out_dir: Option<&Path>,
    ) -> Result<Vec<PathBuf>> {
        if self.config.merge.dry_run {
            info!("dry run, not writing merged files");
            return Ok(Vec::new());
        }
        let out_dir = out_dir
            .map_or_else(|| self.store.state_root().join("merge_output"), Path::to_path_buf);

        let mut written = Vec::new();
        for (file_path, result) in &report.file_results {
            if let Some(content) = result.merged_content.as_deref() {
                let out_path = out_dir.join(file_path);
                storage::write_atomic(&out_path, content.as_bytes())?;
                written.push(out_path);
            }
        }
        info!(count = written.len(), dir = %out_dir.display(), "wrote merged files");
        Ok(written)
    }

    /// Write successful merges straight into the project tree.
    ///
    /// Returns `true` when every eligible file was applied.
    pub fn apply_to_project(&self, report: &MergeReport) -> bool {
        if self.config.merge.dry_run {
            info!("dry run, not applying to project");
            return true;
        }
        let mut all_ok = true;
        for (file_path, result) in &report.file_results {
            if result.success()
                && let Some(content) = result.merged_content.as_deref()
            {
                let target = self.project_dir.join(file_path);
                if let Err(e) = storage::write_atomic(&target, content.as_bytes()) {
                    warn!(file = file_path, error = %e, "failed to apply merged content");
                    all_ok = false;
                }
            }
        }
        all_ok
    }

    fn persist_report(&self, report: &MergeReport, name: &str) {
        if self.config.merge.dry_run {
            return;
        }
        let reports_dir = self.store.state_root().join("merge_reports");
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let path = reports_dir.join(format!("{name}_{stamp}.json"));
        if let Err(e) = report.save(&path) {
            warn!(error = %e, "could not persist merge report");
        } else {
            info!(path = %path.display(), "saved merge report");
        }
    }

    /// Probe the conventional worktree locations for a task.
    fn find_worktree(&self, task_id: &str) -> Option<PathBuf> {
        let candidates = [
            self.store.state_root().join("worktrees").join(task_id),
            self.project_dir.join("worktrees").join(task_id),
        ];
        candidates.into_iter().find(|p| p.is_dir())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
