//! File evolution store.
//!
//! Persists per-task baselines and typed per-task snapshots under the
//! project's state root:
//!
//! ```text
//! .braid/baselines/<task_id>/<sanitized_path>.blob   raw baseline bytes
//! .braid/evolutions.json                             FileEvolution map
//! ```
//!
//! The store supports two capture modes: real-time (`record_modification`
//! called as a task edits files) and retroactive (`refresh_from_git`
//! reconstructing everything from a worktree's merge-base diff). Retroactive
//! refresh is best-effort — individual file failures are logged and skipped,
//! and the result is always a usable (possibly partial) evolution map.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::analyze::SemanticAnalyzer;
use crate::config::STATE_DIR;
use crate::error::{BraidError, Result};
use crate::model::evolution::{FileEvolution, TaskSnapshot};
use crate::model::{compute_content_hash, sanitize_path_for_storage};
use crate::storage;
use crate::vcs::VcsClient;

// ---------------------------------------------------------------------------
// MergeExport / EvolutionSummary
// ---------------------------------------------------------------------------

/// Evolution data for one file, shaped for the merge pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MergeExport {
    /// Project-relative file path.
    pub file_path: String,
    /// Baseline bytes, when a baseline blob is stored.
    pub baseline_content: Option<String>,
    /// Baseline commit hash.
    pub baseline_commit: String,
    /// Baseline content hash.
    pub baseline_hash: String,
    /// Snapshots of the requested tasks, in `started_at` order.
    pub tasks: Vec<TaskSnapshot>,
}

/// Aggregate statistics over tracked evolutions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvolutionSummary {
    /// Files with at least one tracked baseline or snapshot.
    pub total_files_tracked: usize,
    /// Distinct task ids seen.
    pub total_tasks: usize,
    /// Files touched by two or more tasks.
    pub files_with_potential_conflicts: usize,
    /// Sum of semantic change counts across all snapshots.
    pub total_semantic_changes: usize,
    /// Tasks with at least one incomplete snapshot.
    pub active_tasks: usize,
}

// ---------------------------------------------------------------------------
// EvolutionStore
// ---------------------------------------------------------------------------

/// Owns baselines and per-task snapshots for one project.
pub struct EvolutionStore {
    project_dir: PathBuf,
    state_root: PathBuf,
    baselines_dir: PathBuf,
    evolutions_path: PathBuf,
    evolutions: BTreeMap<String, FileEvolution>,
    analyzer: SemanticAnalyzer,
    vcs: std::sync::Arc<dyn VcsClient>,
    quarantined: Option<PathBuf>,
}

impl std::fmt::Debug for EvolutionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvolutionStore")
            .field("project_dir", &self.project_dir)
            .field("state_root", &self.state_root)
            .field("baselines_dir", &self.baselines_dir)
            .field("evolutions_path", &self.evolutions_path)
            .field("evolutions", &self.evolutions)
            .field("analyzer", &self.analyzer)
            .field("vcs", &"<dyn VcsClient>")
            .field("quarantined", &self.quarantined)
            .finish()
    }
}

impl EvolutionStore {
    /// Open (or create) the evolution store for a project.
    ///
    /// The project directory must exist; the state root is created on
    /// demand. A corrupt `evolutions.json` is quarantined and the store
    /// starts empty (the quarantine path is retrievable for reporting).
    pub fn open(
        project_dir: &Path,
        analyzer: SemanticAnalyzer,
        vcs: std::sync::Arc<dyn VcsClient>,
    ) -> Result<Self> {
        if !project_dir.is_dir() {
            return Err(BraidError::InvalidStateRoot {
                path: project_dir.to_path_buf(),
                detail: "project directory does not exist".to_owned(),
            });
        }
        let state_root = project_dir.join(STATE_DIR);
        std::fs::create_dir_all(&state_root).map_err(|e| BraidError::InvalidStateRoot {
            path: state_root.clone(),
            detail: format!("cannot create state directory: {e}"),
        })?;

        let evolutions_path = state_root.join("evolutions.json");
        let loaded = storage::load_json_lenient::<BTreeMap<String, FileEvolution>>(
            &evolutions_path,
        );

        debug!(
            project = %project_dir.display(),
            evolutions = loaded.value.len(),
            "evolution store opened"
        );
        Ok(Self {
            project_dir: project_dir.to_path_buf(),
            baselines_dir: state_root.join("baselines"),
            state_root,
            evolutions_path,
            evolutions: loaded.value,
            analyzer,
            vcs,
            quarantined: loaded.quarantined,
        })
    }

    /// Where a corrupt evolutions file was quarantined, if that happened.
    #[must_use]
    pub fn quarantined(&self) -> Option<&Path> {
        self.quarantined.as_deref()
    }

    /// The project root this store serves.
    #[must_use]
    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// The state root (`<project>/.braid`).
    #[must_use]
    pub fn state_root(&self) -> &Path {
        &self.state_root
    }

    fn save(&self) -> Result<()> {
        storage::write_json_atomic(&self.evolutions_path, &self.evolutions)
    }

    /// Normalize a path to the project-relative, forward-slash form used as
    /// the evolution key.
    #[must_use]
    pub fn rel_path(&self, file_path: &Path) -> String {
        let stripped = file_path
            .strip_prefix(&self.project_dir)
            .unwrap_or(file_path);
        stripped.to_string_lossy().replace('\\', "/")
    }

    fn blob_rel_path(task_id: &str, rel: &str) -> String {
        format!(
            "baselines/{task_id}/{}.blob",
            sanitize_path_for_storage(rel)
        )
    }

    // -----------------------------------------------------------------------
    // Baseline capture
    // -----------------------------------------------------------------------

    /// Capture baseline state of `files` for a task.
    ///
    /// Call when creating the task's worktree. Stores the current project
    /// bytes as the baseline blob and records commit/hash/capture-time
    /// metadata. Idempotent: re-capturing an already-tracked file updates
    /// only the task's intent metadata and never rewrites the blob.
    pub fn capture_baselines(
        &mut self,
        task_id: &str,
        files: &[String],
        intent: &str,
    ) -> Result<BTreeMap<String, FileEvolution>> {
        let head = self
            .vcs
            .head_commit(&self.project_dir)
            .unwrap_or_else(|e| {
                debug!(error = %e, "no VCS head for baseline capture");
                String::new()
            });

        let mut captured = BTreeMap::new();
        for file in files {
            let rel = self.rel_path(Path::new(file));
            let content = read_text_lossy(&self.project_dir.join(&rel));

            // Blobs are write-once per (task, file); re-capture never
            // rewrites one.
            let blob_rel = Self::blob_rel_path(task_id, &rel);
            let blob_abs = self.state_root.join(&blob_rel);
            if !blob_abs.exists() {
                storage::write_atomic(&blob_abs, content.as_bytes()).map_err(|e| {
                    BraidError::Storage {
                        path: blob_abs.clone(),
                        detail: format!("baseline blob write failed: {e}"),
                    }
                })?;
            }

            if !self.evolutions.contains_key(&rel) {
                self.evolutions.insert(
                    rel.clone(),
                    FileEvolution {
                        file_path: rel.clone(),
                        baseline_commit: head.clone(),
                        baseline_captured_at: Utc::now(),
                        baseline_content_hash: compute_content_hash(&content),
                        baseline_snapshot_path: blob_rel,
                        task_snapshots: Vec::new(),
                    },
                );
            }

            // One snapshot per task: create it on first capture so the task
            // shows up as active, refresh only the intent afterwards.
            let evolution = self
                .evolutions
                .get_mut(&rel)
                .unwrap_or_else(|| unreachable!("evolution inserted above"));
            if let Some(snapshot) = evolution.task_snapshot_mut(task_id) {
                snapshot.task_intent = intent.to_owned();
            } else {
                let mut snapshot = TaskSnapshot::new(task_id, intent, Utc::now());
                snapshot.content_hash_before = compute_content_hash(&content);
                evolution.add_task_snapshot(snapshot);
            }
            captured.insert(rel.clone(), evolution.clone());
        }

        self.save()?;
        info!(
            task = task_id,
            files = captured.len(),
            "captured baselines"
        );
        Ok(captured)
    }

    // -----------------------------------------------------------------------
    // Modification recording
    // -----------------------------------------------------------------------

    /// Record a file modification by a task.
    ///
    /// Returns `None` (without error) when the file is not tracked — files
    /// outside the captured baseline set are ignored, matching the
    /// best-effort contract. With `skip_semantic` only hashes and the raw
    /// diff are stored (the fast path for files with no known conflict).
    pub fn record_modification(
        &mut self,
        task_id: &str,
        file_path: &str,
        old_content: &str,
        new_content: &str,
        raw_diff: Option<String>,
        skip_semantic: bool,
    ) -> Result<Option<TaskSnapshot>> {
        let snapshot =
            self.record_modification_inner(task_id, file_path, old_content, new_content, raw_diff, skip_semantic);
        if snapshot.is_some() {
            self.save()?;
        }
        Ok(snapshot)
    }

    fn record_modification_inner(
        &mut self,
        task_id: &str,
        file_path: &str,
        old_content: &str,
        new_content: &str,
        raw_diff: Option<String>,
        skip_semantic: bool,
    ) -> Option<TaskSnapshot> {
        let rel = self.rel_path(Path::new(file_path));
        if !self.evolutions.contains_key(&rel) {
            debug!(file = %rel, "file not tracked, skipping modification");
            return None;
        }

        let semantic_changes = if skip_semantic {
            Vec::new()
        } else {
            self.analyzer
                .analyze_diff(&rel, old_content, new_content)
                .changes
        };
        // Callers that diffed via the VCS pass the diff through; everyone
        // else gets one rendered from the content pair.
        let raw_diff = raw_diff.or_else(|| {
            if skip_semantic {
                None
            } else {
                let rendered =
                    crate::analyze::linediff::render_unified(old_content, new_content, &rel);
                (!rendered.is_empty()).then_some(rendered)
            }
        });

        let evolution = self.evolutions.get_mut(&rel)?;
        let mut snapshot = evolution.task_snapshot(task_id).cloned().unwrap_or_else(|| {
            let mut fresh = TaskSnapshot::new(task_id, "", Utc::now());
            fresh.content_hash_before = compute_content_hash(old_content);
            fresh
        });

        snapshot.content_hash_after = compute_content_hash(new_content);
        snapshot.semantic_changes = semantic_changes;
        snapshot.raw_diff = raw_diff;

        evolution.add_task_snapshot(snapshot.clone());
        info!(
            task = task_id,
            file = %rel,
            changes = snapshot.semantic_changes.len(),
            lightweight = skip_semantic,
            "recorded modification"
        );
        Some(snapshot)
    }

    // -----------------------------------------------------------------------
    // Retroactive reconstruction
    // -----------------------------------------------------------------------

    /// Rebuild task snapshots from a worktree's git state.
    ///
    /// Finds the merge-base between the target branch and the worktree's
    /// head, then records a modification for every file in the two-dot
    /// diff, auto-creating missing evolutions. Full semantic analysis runs
    /// only for files in `analyze_only_files` when that filter is given.
    /// Best-effort: per-file failures are logged and skipped.
    pub fn refresh_from_git(
        &mut self,
        task_id: &str,
        worktree_path: &Path,
        target_branch: Option<&str>,
        analyze_only_files: Option<&BTreeSet<String>>,
    ) -> Result<()> {
        let target = target_branch.map_or_else(
            || self.detect_target_branch(worktree_path),
            ToOwned::to_owned,
        );

        let merge_base = match self.vcs.merge_base(worktree_path, &target, "HEAD") {
            Ok(base) => base,
            Err(e) => {
                warn!(task = task_id, target = %target, error = %e, "refresh_from_git: no merge-base");
                return Ok(());
            }
        };
        let changed = match self.vcs.changed_files(worktree_path, &merge_base, "HEAD") {
            Ok(files) => files,
            Err(e) => {
                warn!(task = task_id, error = %e, "refresh_from_git: diff failed");
                return Ok(());
            }
        };

        debug!(
            task = task_id,
            target = %target,
            merge_base = %merge_base,
            changed = changed.len(),
            "refreshing from git"
        );

        let mut processed = 0_usize;
        for file in &changed {
            let raw_diff = match self.vcs.file_diff(worktree_path, &merge_base, "HEAD", file) {
                Ok(diff) => Some(diff),
                Err(e) => {
                    warn!(file = %file, error = %e, "refresh_from_git: skipping file");
                    continue;
                }
            };
            let old_content = match self.vcs.show_file(worktree_path, &merge_base, file) {
                Ok(content) => content.unwrap_or_default(),
                Err(e) => {
                    warn!(file = %file, error = %e, "refresh_from_git: skipping file");
                    continue;
                }
            };
            let new_content = read_text_lossy(&worktree_path.join(file));

            let rel = self.rel_path(Path::new(file));
            if !self.evolutions.contains_key(&rel) {
                // Retroactive tracking: capture_baselines was never called
                // for this file, so synthesize the evolution entry from the
                // merge-base pre-image (no blob stored).
                self.evolutions.insert(
                    rel.clone(),
                    FileEvolution {
                        file_path: rel.clone(),
                        baseline_commit: merge_base.clone(),
                        baseline_captured_at: Utc::now(),
                        baseline_content_hash: compute_content_hash(&old_content),
                        baseline_snapshot_path: String::new(),
                        task_snapshots: Vec::new(),
                    },
                );
                debug!(file = %rel, "auto-created evolution entry");
            }

            let skip = analyze_only_files.is_some_and(|only| !only.contains(&rel));
            self.record_modification_inner(
                task_id,
                &rel,
                &old_content,
                &new_content,
                raw_diff,
                skip,
            );
            processed += 1;
        }

        self.save()?;
        info!(
            task = task_id,
            processed,
            total = changed.len(),
            "refreshed from worktree"
        );
        Ok(())
    }

    /// Probe for the branch this worktree diverged from.
    ///
    /// Tries `main`, `master`, `develop` (first with a valid merge-base
    /// wins), falls back to `main` if it at least exists, and finally to
    /// the `HEAD~10` comparison-depth heuristic.
    fn detect_target_branch(&self, worktree_path: &Path) -> String {
        for branch in ["main", "master", "develop"] {
            if self.vcs.merge_base(worktree_path, branch, "HEAD").is_ok() {
                debug!(branch, "detected target branch");
                return branch.to_owned();
            }
        }
        if self.vcs.ref_exists(worktree_path, "main") {
            warn!("no merge-base with standard branches, defaulting to 'main'");
            return "main".to_owned();
        }
        warn!("no standard target branch found, falling back to HEAD~10");
        "HEAD~10".to_owned()
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// The evolution record for a file, if tracked.
    #[must_use]
    pub fn get_file_evolution(&self, file_path: &str) -> Option<&FileEvolution> {
        let rel = self.rel_path(Path::new(file_path));
        self.evolutions.get(&rel)
    }

    /// The stored baseline bytes for a file, when a blob exists.
    #[must_use]
    pub fn get_baseline_content(&self, file_path: &str) -> Option<String> {
        let evolution = self.get_file_evolution(file_path)?;
        if evolution.baseline_snapshot_path.is_empty() {
            return None;
        }
        let blob = self.state_root.join(&evolution.baseline_snapshot_path);
        blob.exists().then(|| read_text_lossy(&blob))
    }

    /// All `(file, snapshot)` modifications made by one task.
    ///
    /// Baseline-only snapshots (no semantic changes, unchanged hash) are
    /// not modifications and are excluded.
    #[must_use]
    pub fn get_task_modifications(&self, task_id: &str) -> Vec<(String, TaskSnapshot)> {
        self.evolutions
            .iter()
            .filter_map(|(path, evolution)| {
                evolution
                    .task_snapshot(task_id)
                    .filter(|s| !s.semantic_changes.is_empty() || has_content_change(s))
                    .map(|s| (path.clone(), s.clone()))
            })
            .collect()
    }

    /// Files modified by any of `task_ids`, mapped to the modifying tasks.
    #[must_use]
    pub fn get_files_modified_by_tasks(
        &self,
        task_ids: &[String],
    ) -> BTreeMap<String, Vec<String>> {
        let mut file_tasks: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (path, evolution) in &self.evolutions {
            for snapshot in &evolution.task_snapshots {
                if task_ids.contains(&snapshot.task_id)
                    && (!snapshot.semantic_changes.is_empty() || has_content_change(snapshot))
                {
                    file_tasks
                        .entry(path.clone())
                        .or_default()
                        .push(snapshot.task_id.clone());
                }
            }
        }
        file_tasks
    }

    /// Files modified by two or more of `task_ids`.
    #[must_use]
    pub fn get_conflicting_files(&self, task_ids: &[String]) -> Vec<String> {
        self.get_files_modified_by_tasks(task_ids)
            .into_iter()
            .filter(|(_, tasks)| tasks.len() > 1)
            .map(|(path, _)| path)
            .collect()
    }

    /// Task ids with at least one incomplete snapshot.
    #[must_use]
    pub fn get_active_tasks(&self) -> BTreeSet<String> {
        self.evolutions
            .values()
            .flat_map(|e| &e.task_snapshots)
            .filter(|s| s.completed_at.is_none())
            .map(|s| s.task_id.clone())
            .collect()
    }

    /// Set `completed_at` on every incomplete snapshot of a task.
    pub fn mark_task_completed(&mut self, task_id: &str) -> Result<()> {
        let now = Utc::now();
        for evolution in self.evolutions.values_mut() {
            if let Some(snapshot) = evolution.task_snapshot_mut(task_id)
                && snapshot.completed_at.is_none()
            {
                snapshot.completed_at = Some(now);
            }
        }
        self.save()
    }

    /// Remove all snapshots for a task and optionally its baseline blobs.
    ///
    /// Evolutions left with no snapshots are dropped entirely.
    pub fn cleanup_task(&mut self, task_id: &str, remove_baselines: bool) -> Result<()> {
        for evolution in self.evolutions.values_mut() {
            evolution.task_snapshots.retain(|s| s.task_id != task_id);
        }
        self.evolutions.retain(|_, e| !e.task_snapshots.is_empty());

        if remove_baselines {
            let dir = self.baselines_dir.join(task_id);
            if dir.exists() {
                std::fs::remove_dir_all(&dir)?;
                debug!(task = task_id, "removed baseline blobs");
            }
        }
        self.save()?;
        info!(task = task_id, "cleaned up task data");
        Ok(())
    }

    /// Export one file's evolution in the shape the merge pipeline wants.
    #[must_use]
    pub fn export_for_merge(
        &self,
        file_path: &str,
        task_ids: Option<&[String]>,
    ) -> Option<MergeExport> {
        let evolution = self.get_file_evolution(file_path)?;
        let tasks = evolution
            .task_snapshots
            .iter()
            .filter(|s| task_ids.is_none_or(|ids| ids.contains(&s.task_id)))
            .cloned()
            .collect();
        Some(MergeExport {
            file_path: evolution.file_path.clone(),
            baseline_content: self.get_baseline_content(file_path),
            baseline_commit: evolution.baseline_commit.clone(),
            baseline_hash: evolution.baseline_content_hash.clone(),
            tasks,
        })
    }

    /// Aggregate statistics over everything tracked.
    #[must_use]
    pub fn evolution_summary(&self) -> EvolutionSummary {
        let mut all_tasks = BTreeSet::new();
        let mut files_with_multiple = 0_usize;
        let mut total_changes = 0_usize;
        for evolution in self.evolutions.values() {
            if evolution.task_snapshots.len() > 1 {
                files_with_multiple += 1;
            }
            for snapshot in &evolution.task_snapshots {
                all_tasks.insert(snapshot.task_id.clone());
                total_changes += snapshot.semantic_changes.len();
            }
        }
        EvolutionSummary {
            total_files_tracked: self.evolutions.len(),
            total_tasks: all_tasks.len(),
            files_with_potential_conflicts: files_with_multiple,
            total_semantic_changes: total_changes,
            active_tasks: self.get_active_tasks().len(),
        }
    }
}

/// A snapshot counts as a modification when the content hash moved.
fn has_content_change(snapshot: &TaskSnapshot) -> bool {
    !snapshot.content_hash_after.is_empty()
        && snapshot.content_hash_after != snapshot.content_hash_before
}

fn read_text_lossy(path: &Path) -> String {
    std::fs::read(path)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
