//! Per-file merge pipeline: detect → auto-merge → AI-resolve → assemble.
//!
//! Given the baseline content and every involved task's snapshot for one
//! file, [`MergePipeline::merge_file`] produces the final [`MergeResult`]:
//!
//! 1. Rebuild a per-task `FileAnalysis` from each snapshot's semantic
//!    changes and run conflict detection.
//! 2. No conflicts → replay the deltas directly (single task or
//!    location-disjoint multi-task).
//! 3. Conflicts → apply the non-conflicting changes first, then resolve
//!    each region: deterministic strategy where the detector allowed it,
//!    AI fallback otherwise. The running merged content threads through
//!    every resolution.
//! 4. Terminal decision: `auto_merged` (rules only), `ai_merged` (AI
//!    helped), `needs_human_review` (anything left), `failed` (internal
//!    error).

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::detect::ConflictDetector;
use crate::model::change::FileAnalysis;
use crate::model::conflict::ConflictRegion;
use crate::model::evolution::TaskSnapshot;
use crate::model::merge::{MergeDecision, MergeResult};

use super::auto::AutoMerger;
use super::resolver::AiResolver;
use super::{StrategyContext, apply};

// ---------------------------------------------------------------------------
// MergePipeline
// ---------------------------------------------------------------------------

/// Orchestrates the merge of one file across tasks.
#[derive(Debug, Default)]
pub struct MergePipeline {
    detector: ConflictDetector,
}

impl MergePipeline {
    /// Build a pipeline over a custom conflict detector.
    #[must_use]
    pub const fn with_detector(detector: ConflictDetector) -> Self {
        Self { detector }
    }

    /// The detector in use.
    #[must_use]
    pub const fn detector(&self) -> &ConflictDetector {
        &self.detector
    }

    /// Merge one file's task snapshots onto its baseline.
    #[must_use]
    pub fn merge_file(
        &self,
        resolver: &mut AiResolver,
        file_path: &str,
        baseline_content: &str,
        task_snapshots: &[TaskSnapshot],
    ) -> MergeResult {
        if task_snapshots.is_empty() {
            return MergeResult::failed(file_path, "no task snapshots for file");
        }
        let ext = extension_of(file_path);

        // Snapshot order drives every time-ordered decision downstream.
        let mut snapshots = task_snapshots.to_vec();
        snapshots.sort_by(|a, b| (a.started_at, &a.task_id).cmp(&(b.started_at, &b.task_id)));

        let analyses: BTreeMap<String, FileAnalysis> = snapshots
            .iter()
            .map(|s| {
                (
                    s.task_id.clone(),
                    FileAnalysis::from_changes(file_path, s.semantic_changes.clone(), 0),
                )
            })
            .collect();
        let conflicts = self.detector.detect_conflicts(&analyses);

        debug!(
            file = file_path,
            tasks = snapshots.len(),
            conflicts = conflicts.len(),
            "merging file"
        );

        if conflicts.is_empty() {
            let (content, explanation) = if snapshots.len() == 1 {
                (
                    apply::apply_single_task_changes(baseline_content, &snapshots[0], &ext),
                    format!("Applied {}'s changes directly", snapshots[0].task_id),
                )
            } else {
                (
                    apply::combine_non_conflicting_changes(
                        baseline_content,
                        &snapshots,
                        &ext,
                        &BTreeSet::new(),
                    ),
                    format!("Combined {} tasks' non-conflicting changes", snapshots.len()),
                )
            };
            let mut result = MergeResult::new(MergeDecision::AutoMerged, file_path);
            result.merged_content = Some(content);
            result.explanation = explanation;
            return result;
        }

        self.resolve_conflicted(
            resolver,
            file_path,
            baseline_content,
            &ext,
            &snapshots,
            conflicts,
        )
    }

    fn resolve_conflicted(
        &self,
        resolver: &mut AiResolver,
        file_path: &str,
        baseline_content: &str,
        ext: &str,
        snapshots: &[TaskSnapshot],
        conflicts: Vec<ConflictRegion>,
    ) -> MergeResult {
        let conflict_locations: BTreeSet<String> =
            conflicts.iter().map(|c| c.location.clone()).collect();

        // Everything outside the conflicted locations merges mechanically.
        let mut content = apply::combine_non_conflicting_changes(
            baseline_content,
            snapshots,
            ext,
            &conflict_locations,
        );

        let mut resolved: Vec<ConflictRegion> = Vec::new();
        let mut remaining: Vec<ConflictRegion> = Vec::new();
        let mut ai_calls: u32 = 0;
        let mut tokens: u64 = 0;
        let mut first_error: Option<String> = None;

        for conflict in conflicts {
            let involved: Vec<TaskSnapshot> = snapshots
                .iter()
                .filter(|s| conflict.tasks_involved.contains(&s.task_id))
                .cloned()
                .collect();

            // Deterministic path first.
            if conflict.can_auto_merge
                && let Some(strategy) = conflict.merge_strategy
                && AutoMerger::can_handle(strategy)
            {
                let context = StrategyContext {
                    file_path: file_path.to_owned(),
                    baseline_content: content.clone(),
                    task_snapshots: involved.clone(),
                    conflict: conflict.clone(),
                };
                let auto_result = AutoMerger::merge(&context, strategy);
                if auto_result.decision == MergeDecision::AutoMerged {
                    if let Some(merged) = auto_result.merged_content {
                        content = merged;
                        resolved.push(conflict);
                        continue;
                    }
                }
                // Determinism failed (e.g. same-prop collision); escalate.
                warn!(
                    file = file_path,
                    location = %conflict.location,
                    strategy = %strategy,
                    error = auto_result.error.as_deref().unwrap_or(""),
                    "auto-merge handler failed, escalating to AI"
                );
            }

            // AI fallback on the running content's view of the location.
            let location_code = apply::extract_location_content(&content, &conflict.location, ext);
            let ai_result = resolver.resolve_conflict(&conflict, &location_code, &involved);
            ai_calls += ai_result.ai_calls_made;
            tokens += ai_result.tokens_used;
            match ai_result.decision {
                MergeDecision::AiMerged => {
                    if let Some(merged) = ai_result.merged_content {
                        content = apply::apply_ai_merge(&content, &conflict.location, ext, &merged);
                        resolved.push(conflict);
                    } else {
                        remaining.push(conflict);
                    }
                }
                MergeDecision::Failed => {
                    if first_error.is_none() {
                        first_error = ai_result.error;
                    }
                    remaining.push(conflict);
                }
                _ => remaining.push(conflict),
            }
        }

        let decision = if !remaining.is_empty() {
            MergeDecision::NeedsHumanReview
        } else if ai_calls > 0 && !resolved.is_empty() {
            MergeDecision::AiMerged
        } else {
            MergeDecision::AutoMerged
        };

        let mut result = MergeResult::new(decision, file_path);
        if matches!(decision, MergeDecision::AutoMerged | MergeDecision::AiMerged) {
            result.merged_content = Some(content);
        }
        result.explanation = format!(
            "{} conflicts resolved, {} remaining",
            resolved.len(),
            remaining.len()
        );
        result.conflicts_resolved = resolved;
        result.conflicts_remaining = remaining;
        result.ai_calls_made = ai_calls;
        result.tokens_used = tokens;
        result.error = first_error;
        result
    }
}

fn extension_of(file_path: &str) -> String {
    file_path
        .rfind('.')
        .map_or_else(String::new, |idx| file_path[idx..].to_lowercase())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::change::{ChangeType, SemanticChange};
    use crate::model::conflict::ConflictSeverity;
    use chrono::TimeZone as _;

    fn snapshot(task_id: &str, secs: i64, changes: Vec<SemanticChange>) -> TaskSnapshot {
        let ts = chrono::Utc
            .timestamp_opt(1_700_000_000 + secs, 0)
            .single()
            .expect("ts");
        let mut snap = TaskSnapshot::new(task_id, "", ts);
        snap.semantic_changes = changes;
        snap
    }

    fn add_import(import: &str) -> SemanticChange {
        SemanticChange::new(ChangeType::AddImport, import, "file_top", 2, 2)
            .with_content_after(import)
    }

    #[test]
    fn two_tasks_disjoint_imports_auto_merge() {
        let pipeline = MergePipeline::default();
        let mut resolver = AiResolver::default();
        let result = pipeline.merge_file(
            &mut resolver,
            "m.py",
            "import os\n",
            &[
                snapshot("task-a", 0, vec![add_import("import sys")]),
                snapshot("task-b", 10, vec![add_import("import json")]),
            ],
        );
        assert_eq!(result.decision, MergeDecision::AutoMerged);
        assert_eq!(result.ai_calls_made, 0);
        let content = result.merged_content.expect("content");
        assert_eq!(content, "import os\nimport sys\nimport json\n");
        assert_eq!(content.matches("import sys").count(), 1);
        assert_eq!(content.matches("import json").count(), 1);
    }

    #[test]
    fn two_tasks_distinct_functions_auto_merge() {
        let pipeline = MergePipeline::default();
        let mut resolver = AiResolver::default();
        let f1 = SemanticChange::new(ChangeType::AddFunction, "alpha", "function:alpha", 1, 1)
            .with_content_after("def alpha():\n    return 1");
        let f2 = SemanticChange::new(ChangeType::AddFunction, "beta", "function:beta", 1, 1)
            .with_content_after("def beta():\n    return 2");
        let result = pipeline.merge_file(
            &mut resolver,
            "m.py",
            "def existing():\n    return 0\n",
            &[
                snapshot("task-a", 0, vec![f1]),
                snapshot("task-b", 10, vec![f2]),
            ],
        );
        assert_eq!(result.decision, MergeDecision::AutoMerged);
        let content = result.merged_content.expect("content");
        assert!(content.contains("def existing():\n    return 0"));
        assert_eq!(content.matches("def alpha():").count(), 1);
        assert_eq!(content.matches("def beta():").count(), 1);
    }

    #[test]
    fn single_task_applies_deltas_directly() {
        let pipeline = MergePipeline::default();
        let mut resolver = AiResolver::default();
        let result = pipeline.merge_file(
            &mut resolver,
            "m.py",
            "import os\n",
            &[snapshot("task-a", 0, vec![add_import("import sys")])],
        );
        assert_eq!(result.decision, MergeDecision::AutoMerged);
        assert_eq!(
            result.merged_content.as_deref(),
            Some("import os\nimport sys\n")
        );
        assert!(result.conflicts_resolved.is_empty());
        assert_eq!(result.ai_calls_made, 0);
    }

    #[test]
    fn same_function_modification_without_ai_needs_review() {
        let pipeline = MergePipeline::default();
        let mut resolver = AiResolver::default();
        let a = SemanticChange::new(ChangeType::ModifyFunction, "handle", "function:handle", 2, 2)
            .with_content_before("  return req.body;")
            .with_content_after("  return req.body.id;");
        let b = SemanticChange::new(ChangeType::ModifyFunction, "handle", "function:handle", 4, 4)
            .with_content_before("  return req.body;")
            .with_content_after("  return req.body.name;");
        let result = pipeline.merge_file(
            &mut resolver,
            "api.ts",
            "function handle(req) {\n  return req.body;\n}\n",
            &[
                snapshot("task-a", 0, vec![a]),
                snapshot("task-b", 10, vec![b]),
            ],
        );
        assert_eq!(result.decision, MergeDecision::NeedsHumanReview);
        assert!(result.merged_content.is_none());
        assert_eq!(result.conflicts_remaining.len(), 1);
        let region = &result.conflicts_remaining[0];
        assert_eq!(region.location, "function:handle");
        assert_eq!(region.severity, ConflictSeverity::Medium);
        assert!(!region.can_auto_merge);
        assert_eq!(result.ai_calls_made, 0);
    }

    #[test]
    fn hook_plus_wrap_merges_hooks_then_wrap() {
        let pipeline = MergePipeline::default();
        let mut resolver = AiResolver::default();
        let hook = SemanticChange::new(ChangeType::AddHookCall, "App", "function:App", 2, 2)
            .with_content_after("const {user} = useAuth();");
        let wrap = SemanticChange::new(ChangeType::WrapJsx, "App", "function:App", 2, 2)
            .with_content_after("<ThemeProvider>");
        let result = pipeline.merge_file(
            &mut resolver,
            "App.tsx",
            "function App() {\n  return <Main/>;\n}\n",
            &[
                snapshot("task-a", 0, vec![hook]),
                snapshot("task-b", 10, vec![wrap]),
            ],
        );
        assert_eq!(result.decision, MergeDecision::AutoMerged);
        assert_eq!(result.ai_calls_made, 0);
        let content = result.merged_content.expect("content");
        assert!(content.contains("const {user} = useAuth();"));
        assert!(content.contains("<ThemeProvider><Main/></ThemeProvider>"));
        // Hook call lands before the wrapped return.
        assert!(content.find("useAuth").expect("hook") < content.find("ThemeProvider").expect("wrap"));
    }

    #[test]
    fn ai_resolves_hard_conflict() {
        use super::super::resolver::{AiCallError, AiResolve};
        struct FixedAi;
        impl AiResolve for FixedAi {
            fn resolve(&self, _: &str, _: &str) -> Result<String, AiCallError> {
                Ok("```typescript\nfunction handle(req) {\n  return { id: req.body.id, name: req.body.name };\n}\n```".to_owned())
            }
        }
        let pipeline = MergePipeline::default();
        let mut resolver = AiResolver::new(Some(Box::new(FixedAi)), 4000);
        let a = SemanticChange::new(ChangeType::ModifyFunction, "handle", "function:handle", 2, 2)
            .with_content_after("  return req.body.id;");
        let b = SemanticChange::new(ChangeType::ModifyFunction, "handle", "function:handle", 4, 4)
            .with_content_after("  return req.body.name;");
        let result = pipeline.merge_file(
            &mut resolver,
            "api.ts",
            "function handle(req) {\n  return req.body;\n}\n",
            &[
                snapshot("task-a", 0, vec![a]),
                snapshot("task-b", 10, vec![b]),
            ],
        );
        assert_eq!(result.decision, MergeDecision::AiMerged);
        assert_eq!(result.ai_calls_made, 1);
        assert!(result.tokens_used > 0);
        let content = result.merged_content.expect("content");
        assert!(content.contains("id: req.body.id"));
        assert_eq!(result.conflicts_resolved.len(), 1);
        assert!(result.conflicts_remaining.is_empty());
    }

    #[test]
    fn budget_exhaustion_never_calls_ai() {
        use super::super::resolver::{AiCallError, AiResolve};
        use std::sync::atomic::{AtomicU64, Ordering};

        static CALLS: AtomicU64 = AtomicU64::new(0);
        struct CountingAi;
        impl AiResolve for CountingAi {
            fn resolve(&self, _: &str, _: &str) -> Result<String, AiCallError> {
                CALLS.fetch_add(1, Ordering::SeqCst);
                Ok("```python\nx\n```".to_owned())
            }
        }

        let pipeline = MergePipeline::default();
        // 50-token budget; the conflict context renders far bigger.
        let mut resolver = AiResolver::new(Some(Box::new(CountingAi)), 50);
        let big = "x".repeat(2000);
        let a = SemanticChange::new(ChangeType::ModifyFunction, "f", "function:f", 2, 2)
            .with_content_after(big.clone());
        let b = SemanticChange::new(ChangeType::ModifyFunction, "f", "function:f", 4, 4)
            .with_content_after(big);
        let result = pipeline.merge_file(
            &mut resolver,
            "m.py",
            "def f():\n    pass\n",
            &[
                snapshot("task-a", 0, vec![a]),
                snapshot("task-b", 10, vec![b]),
            ],
        );
        assert_eq!(result.decision, MergeDecision::NeedsHumanReview);
        assert_eq!(result.ai_calls_made, 0);
        assert_eq!(CALLS.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn non_conflicting_changes_apply_alongside_conflicts() {
        let pipeline = MergePipeline::default();
        let mut resolver = AiResolver::default();
        // task-a adds an import (independent) and both tasks fight over f.
        let import = add_import("import logging");
        let a = SemanticChange::new(ChangeType::ModifyFunction, "f", "function:f", 3, 3)
            .with_content_after("    return 1");
        let b = SemanticChange::new(ChangeType::ModifyFunction, "f", "function:f", 5, 5)
            .with_content_after("    return 2");
        let result = pipeline.merge_file(
            &mut resolver,
            "m.py",
            "import os\n\ndef f():\n    pass\n",
            &[
                snapshot("task-a", 0, vec![import, a]),
                snapshot("task-b", 10, vec![b]),
            ],
        );
        // The conflicted function stays unresolved, so the file needs review
        // and no partial content is emitted; the conflict is still precise.
        assert_eq!(result.decision, MergeDecision::NeedsHumanReview);
        assert_eq!(result.conflicts_remaining.len(), 1);
        assert_eq!(result.conflicts_remaining[0].location, "function:f");
    }

    #[test]
    fn empty_snapshots_fail() {
        let pipeline = MergePipeline::default();
        let mut resolver = AiResolver::default();
        let result = pipeline.merge_file(&mut resolver, "m.py", "", &[]);
        assert_eq!(result.decision, MergeDecision::Failed);
    }

    #[test]
    fn merge_is_deterministic() {
        let pipeline = MergePipeline::default();
        let snaps = [
            snapshot("task-a", 0, vec![add_import("import sys")]),
            snapshot("task-b", 10, vec![add_import("import json")]),
        ];
        let mut r1 = AiResolver::default();
        let mut r2 = AiResolver::default();
        let one = pipeline.merge_file(&mut r1, "m.py", "import os\n", &snaps);
        let two = pipeline.merge_file(&mut r2, "m.py", "import os\n", &snaps);
        assert_eq!(one, two);
    }
}
