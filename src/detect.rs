//! Conflict detection across parallel tasks.
//!
//! [`ConflictDetector`] groups every task's typed changes by location and
//! applies the [`RuleBook`] to each location where two or more tasks touched
//! the same target. The output is a list of [`ConflictRegion`]s: compatible
//! regions carry the deterministic strategy to run, incompatible ones carry
//! a severity grade and the AI routing marker.
//!
//! Determinism: task analyses are processed in sorted task-id order and
//! pairs are examined in that order, so identical inputs always yield
//! identical regions (including the "last compatible rule wins" strategy
//! choice).

use std::collections::BTreeMap;

use tracing::debug;

use crate::model::change::{ChangeType, FileAnalysis, SemanticChange};
use crate::model::conflict::{ConflictRegion, ConflictSeverity};
use crate::model::merge::MergeStrategy;
use crate::rules::{CompatibilityRule, RuleBook};

// ---------------------------------------------------------------------------
// ConflictDetector
// ---------------------------------------------------------------------------

/// Detects and classifies conflicts between task changes.
#[derive(Clone, Debug, Default)]
pub struct ConflictDetector {
    rules: RuleBook,
}

impl ConflictDetector {
    /// Build a detector over a custom rule book.
    #[must_use]
    pub const fn with_rules(rules: RuleBook) -> Self {
        Self { rules }
    }

    /// Extend the rule book at runtime.
    pub fn add_rule(&mut self, rule: CompatibilityRule) {
        self.rules.add_rule(rule);
    }

    /// The underlying rule book.
    #[must_use]
    pub const fn rules(&self) -> &RuleBook {
        &self.rules
    }

    /// Detect conflicts between multiple tasks' changes to the same file.
    ///
    /// With zero or one task there is nothing to conflict with and the
    /// result is empty.
    #[must_use]
    pub fn detect_conflicts(
        &self,
        task_analyses: &BTreeMap<String, FileAnalysis>,
    ) -> Vec<ConflictRegion> {
        if task_analyses.len() <= 1 {
            return Vec::new();
        }

        let file_path = task_analyses
            .values()
            .next()
            .map(|a| a.file_path.clone())
            .unwrap_or_default();

        // Group (task, change) pairs by location. BTreeMap iteration keeps
        // the region order stable across runs.
        let mut by_location: BTreeMap<&str, Vec<(&str, &SemanticChange)>> = BTreeMap::new();
        for (task_id, analysis) in task_analyses {
            for change in &analysis.changes {
                by_location
                    .entry(change.location.as_str())
                    .or_default()
                    .push((task_id.as_str(), change));
            }
        }

        let mut conflicts = Vec::new();
        for (location, entries) in &by_location {
            // A location only one task touched cannot conflict.
            let first_task = entries[0].0;
            if entries.iter().all(|(task, _)| *task == first_task) {
                continue;
            }
            if let Some(region) = self.analyze_location(&file_path, location, entries) {
                conflicts.push(region);
            }
        }

        debug!(
            file = %file_path,
            tasks = task_analyses.len(),
            conflicts = conflicts.len(),
            auto_mergeable = conflicts.iter().filter(|c| c.can_auto_merge).count(),
            "conflict detection complete"
        );
        conflicts
    }

    /// Analyze all changes at one location.
    ///
    /// Returns `None` when the changes address different targets (e.g. two
    /// different functions added "at" the same coarse location) — those are
    /// independent.
    fn analyze_location(
        &self,
        file_path: &str,
        location: &str,
        entries: &[(&str, &SemanticChange)],
    ) -> Option<ConflictRegion> {
        let mut targets: Vec<&str> = entries.iter().map(|(_, c)| c.target.as_str()).collect();
        targets.sort_unstable();
        targets.dedup();
        if targets.len() > 1 {
            return None;
        }

        let tasks: Vec<String> = entries.iter().map(|(t, _)| (*t).to_owned()).collect();
        let changes: Vec<&SemanticChange> = entries.iter().map(|(_, c)| *c).collect();
        let change_types: Vec<ChangeType> = changes.iter().map(|c| c.change_type).collect();

        let mut all_compatible = true;
        let mut final_strategy: Option<MergeStrategy> = None;
        let mut reasons: Vec<String> = Vec::new();

        for (i, a) in change_types.iter().enumerate() {
            for b in &change_types[i + 1..] {
                let (compatible, strategy, reason) = self.rules.analyze_pair(*a, *b);
                if compatible {
                    if strategy.is_some() {
                        final_strategy = strategy;
                    }
                } else {
                    all_compatible = false;
                    reasons.push(reason);
                }
            }
        }

        let severity = if all_compatible {
            ConflictSeverity::None
        } else {
            assess_severity(&change_types, &changes)
        };

        Some(ConflictRegion {
            file_path: file_path.to_owned(),
            location: location.to_owned(),
            tasks_involved: tasks,
            change_types,
            severity,
            can_auto_merge: all_compatible,
            merge_strategy: if all_compatible {
                final_strategy
            } else {
                Some(MergeStrategy::AiRequired)
            },
            reason: if reasons.is_empty() {
                "Changes are compatible".to_owned()
            } else {
                reasons.join(" | ")
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Severity assessment
// ---------------------------------------------------------------------------

/// Grade an incompatible region.
///
/// - `Critical`: two or more modify-style changes with overlapping ranges.
/// - `High`: any structural change (wrap/unwrap/removal) present.
/// - `Medium`: at least one modify-style change, no range overlap.
/// - `Low`: everything else.
fn assess_severity(change_types: &[ChangeType], changes: &[&SemanticChange]) -> ConflictSeverity {
    let modify_count = change_types
        .iter()
        .filter(|ct| ct.is_modify_style())
        .count();

    if modify_count >= 2 {
        let ranges: Vec<(u32, u32)> = changes
            .iter()
            .filter(|c| c.change_type.is_modify_style())
            .map(|c| (c.line_start, c.line_end))
            .collect();
        if ranges_overlap(&ranges) {
            return ConflictSeverity::Critical;
        }
    }

    if change_types.iter().any(|ct| ct.is_structural()) {
        return ConflictSeverity::High;
    }

    if modify_count >= 1 {
        return ConflictSeverity::Medium;
    }

    ConflictSeverity::Low
}

/// Whether any of the (inclusive) line ranges overlap.
fn ranges_overlap(ranges: &[(u32, u32)]) -> bool {
    let mut sorted = ranges.to_vec();
    sorted.sort_unstable();
    sorted.windows(2).any(|w| w[0].1 >= w[1].0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
