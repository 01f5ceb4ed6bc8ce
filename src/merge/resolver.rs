//! AI conflict resolution with minimal context.
//!
//! [`AiResolver`] handles the conflicts the deterministic strategies cannot:
//! it builds a [`ConflictContext`] holding only the baseline snippet and the
//! involved tasks' relevant changes, renders a focused prompt, and parses
//! exactly one fenced code block out of the response. A token budget guards
//! every call — contexts estimated above it are flagged for human review
//! without spending a single AI call.
//!
//! The AI itself is opaque: anything implementing [`AiResolve`] (a plain
//! `(system, user) -> text` function). When none is configured the resolver
//! degrades to `needs_human_review` across the board.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::model::change::SemanticChange;
use crate::model::conflict::ConflictRegion;
use crate::model::evolution::TaskSnapshot;
use crate::model::merge::{MergeDecision, MergeResult};

use super::prompts;

// ---------------------------------------------------------------------------
// AiResolve trait
// ---------------------------------------------------------------------------

/// Error from the opaque AI transport.
#[derive(Debug)]
pub struct AiCallError(pub String);

impl std::fmt::Display for AiCallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AI call failed: {}", self.0)
    }
}

impl std::error::Error for AiCallError {}

/// The opaque AI function: `(system_prompt, user_prompt) -> response text`.
///
/// The core makes no assumption about the provider; whatever text comes
/// back is parsed for a fenced code block.
pub trait AiResolve: Send + Sync {
    /// Send one prompt pair and return the raw response text.
    fn resolve(&self, system_prompt: &str, user_prompt: &str) -> Result<String, AiCallError>;
}

impl<F> AiResolve for F
where
    F: Fn(&str, &str) -> Result<String, AiCallError> + Send + Sync,
{
    fn resolve(&self, system_prompt: &str, user_prompt: &str) -> Result<String, AiCallError> {
        self(system_prompt, user_prompt)
    }
}

// ---------------------------------------------------------------------------
// ConflictContext
// ---------------------------------------------------------------------------

/// Maximum characters of change content included per change.
const CONTENT_SNIPPET_LIMIT: usize = 500;

/// Minimal context needed to resolve one conflict.
#[derive(Clone, Debug)]
pub struct ConflictContext {
    /// The file containing the conflict.
    pub file_path: String,
    /// The conflicted location.
    pub location: String,
    /// Language name for fenced code blocks, inferred from the extension.
    pub language: String,
    /// The code before any task modified it (location snippet).
    pub baseline_code: String,
    /// `(task_id, intent, relevant_changes)` per involved task.
    pub task_changes: Vec<(String, String, Vec<SemanticChange>)>,
    /// One-line description of the conflict.
    pub conflict_description: String,
}

impl ConflictContext {
    /// Render the context as prompt text.
    #[must_use]
    pub fn to_prompt_context(&self) -> String {
        let mut lines = vec![
            format!("File: {}", self.file_path),
            format!("Location: {}", self.location),
            format!("Language: {}", self.language),
            String::new(),
            "--- BASELINE CODE (before any changes) ---".to_owned(),
            self.baseline_code.clone(),
            "--- END BASELINE ---".to_owned(),
            String::new(),
            "CHANGES FROM EACH TASK:".to_owned(),
        ];
        for (task_id, intent, changes) in &self.task_changes {
            lines.push(format!("\n[Task: {task_id}]"));
            lines.push(format!("Intent: {intent}"));
            lines.push("Changes:".to_owned());
            for change in changes {
                lines.push(format!("  - {}: {}", change.change_type, change.target));
                if let Some(content) = change.content_after.as_deref() {
                    let snippet = if content.len() > CONTENT_SNIPPET_LIMIT {
                        let end = floor_boundary(content, CONTENT_SNIPPET_LIMIT);
                        format!("{}{}", &content[..end], prompts::TRUNCATION_MARKER)
                    } else {
                        content.to_owned()
                    };
                    lines.push(format!("    Code: {snippet}"));
                }
            }
        }
        lines.push(String::new());
        lines.push(format!("CONFLICT: {}", self.conflict_description));
        lines.join("\n")
    }

    /// Rough token estimate: four characters per token of rendered text.
    #[must_use]
    pub fn estimated_tokens(&self) -> u64 {
        (self.to_prompt_context().len() / 4) as u64
    }
}

fn floor_boundary(s: &str, mut idx: usize) -> usize {
    idx = idx.min(s.len());
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Fenced-code-block language for a file path.
#[must_use]
pub fn infer_language(file_path: &str) -> &'static str {
    let ext = file_path.rfind('.').map_or("", |idx| &file_path[idx..]);
    match ext {
        ".py" => "python",
        ".ts" | ".tsx" => "typescript",
        ".js" | ".jsx" => "javascript",
        _ => "text",
    }
}

/// Whether two coarse locations refer to overlapping code.
///
/// Exact equality, or one location's target nested inside the other (e.g.
/// `function:App` vs `class:Shell.App`).
#[must_use]
pub fn locations_overlap(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let target = |loc: &str| {
        loc.split_once(':')
            .map(|(_, t)| t.to_owned())
            .unwrap_or_default()
    };
    let (ta, tb) = (target(a), target(b));
    if ta.is_empty() || tb.is_empty() {
        return false;
    }
    ta.split('.').any(|part| part == tb) || tb.split('.').any(|part| part == ta)
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Running resolver usage counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverStats {
    /// AI calls made since the last reset.
    pub calls_made: u64,
    /// Estimated tokens spent since the last reset.
    pub estimated_tokens_used: u64,
}

// ---------------------------------------------------------------------------
// AiResolver
// ---------------------------------------------------------------------------

/// Default token budget for a single resolution context.
pub const DEFAULT_MAX_CONTEXT_TOKENS: u64 = 4000;

/// Resolves conflicts via the opaque AI function, under a token budget.
pub struct AiResolver {
    ai: Option<Box<dyn AiResolve>>,
    max_context_tokens: u64,
    stats: ResolverStats,
}

impl Default for AiResolver {
    fn default() -> Self {
        Self::new(None, DEFAULT_MAX_CONTEXT_TOKENS)
    }
}

impl AiResolver {
    /// Build a resolver with an optional AI function and a token budget.
    #[must_use]
    pub fn new(ai: Option<Box<dyn AiResolve>>, max_context_tokens: u64) -> Self {
        Self {
            ai,
            max_context_tokens,
            stats: ResolverStats::default(),
        }
    }

    /// Install or replace the AI function.
    pub fn set_ai(&mut self, ai: Box<dyn AiResolve>) {
        self.ai = Some(ai);
    }

    /// Whether an AI function is configured.
    #[must_use]
    pub const fn has_ai(&self) -> bool {
        self.ai.is_some()
    }

    /// Current usage counters.
    #[must_use]
    pub const fn stats(&self) -> ResolverStats {
        self.stats
    }

    /// Zero the usage counters.
    pub fn reset_stats(&mut self) {
        self.stats = ResolverStats::default();
    }

    /// Invoke the AI function, or `None` when none is configured.
    ///
    /// Returning an owned result keeps the borrow of the boxed function out
    /// of the caller's way.
    fn try_call(&self, user_prompt: &str) -> Option<Result<String, AiCallError>> {
        self.ai
            .as_deref()
            .map(|ai| ai.resolve(prompts::SYSTEM_PROMPT, user_prompt))
    }

    /// Build the minimal context for one conflict.
    #[must_use]
    pub fn build_context(
        conflict: &ConflictRegion,
        baseline_code: &str,
        task_snapshots: &[TaskSnapshot],
    ) -> ConflictContext {
        let mut task_changes = Vec::new();
        for snapshot in task_snapshots {
            if !conflict.tasks_involved.contains(&snapshot.task_id) {
                continue;
            }
            let relevant: Vec<SemanticChange> = snapshot
                .semantic_changes
                .iter()
                .filter(|c| {
                    c.location == conflict.location
                        || locations_overlap(&c.location, &conflict.location)
                })
                .cloned()
                .collect();
            if !relevant.is_empty() {
                let intent = if snapshot.task_intent.is_empty() {
                    "No intent specified".to_owned()
                } else {
                    snapshot.task_intent.clone()
                };
                task_changes.push((snapshot.task_id.clone(), intent, relevant));
            }
        }

        let change_types: Vec<&str> = conflict
            .change_types
            .iter()
            .map(|ct| ct.as_str())
            .collect();
        let description = format!(
            "Tasks {} made conflicting changes: {}. Severity: {}. {}",
            conflict.tasks_involved.join(", "),
            change_types.join(", "),
            conflict.severity,
            conflict.reason
        );

        ConflictContext {
            file_path: conflict.file_path.clone(),
            location: conflict.location.clone(),
            language: infer_language(&conflict.file_path).to_owned(),
            baseline_code: baseline_code.to_owned(),
            task_changes,
            conflict_description: description,
        }
    }

    /// Resolve one conflict.
    ///
    /// Outcomes: `ai_merged` with the merged snippet, `needs_human_review`
    /// when no AI is configured / the context exceeds the budget / the
    /// response holds no code block, or `failed` when the transport errors.
    pub fn resolve_conflict(
        &mut self,
        conflict: &ConflictRegion,
        baseline_code: &str,
        task_snapshots: &[TaskSnapshot],
    ) -> MergeResult {
        if !self.has_ai() {
            let mut result =
                MergeResult::new(MergeDecision::NeedsHumanReview, conflict.file_path.clone());
            result.explanation = "No AI function configured".to_owned();
            result.conflicts_remaining = vec![conflict.clone()];
            return result;
        }

        let context = Self::build_context(conflict, baseline_code, task_snapshots);
        let estimated = context.estimated_tokens();
        if estimated > self.max_context_tokens {
            warn!(
                file = %conflict.file_path,
                location = %conflict.location,
                estimated,
                budget = self.max_context_tokens,
                "context too large, flagging for human review"
            );
            let mut result =
                MergeResult::new(MergeDecision::NeedsHumanReview, conflict.file_path.clone());
            result.explanation =
                format!("Context too large for AI ({estimated} tokens)");
            result.conflicts_remaining = vec![conflict.clone()];
            return result;
        }

        let prompt = prompts::format_merge_prompt(&context.to_prompt_context(), &context.language);
        info!(
            file = %conflict.file_path,
            location = %conflict.location,
            estimated,
            "calling AI to resolve conflict"
        );
        let Some(call) = self.try_call(&prompt) else {
            let mut result =
                MergeResult::new(MergeDecision::NeedsHumanReview, conflict.file_path.clone());
            result.explanation = "No AI function configured".to_owned();
            result.conflicts_remaining = vec![conflict.clone()];
            return result;
        };
        match call {
            Ok(response) => {
                self.stats.calls_made += 1;
                self.stats.estimated_tokens_used += estimated + (response.len() / 4) as u64;

                match prompts::extract_code_block(&response, &context.language) {
                    Some(merged) => {
                        let mut result =
                            MergeResult::new(MergeDecision::AiMerged, conflict.file_path.clone());
                        result.merged_content = Some(merged);
                        result.conflicts_resolved = vec![conflict.clone()];
                        result.ai_calls_made = 1;
                        result.tokens_used = estimated;
                        result.explanation =
                            format!("AI resolved conflict at {}", conflict.location);
                        result
                    }
                    None => {
                        warn!(file = %conflict.file_path, "could not parse AI response");
                        let mut result = MergeResult::new(
                            MergeDecision::NeedsHumanReview,
                            conflict.file_path.clone(),
                        );
                        result.explanation = "Could not parse AI merge response".to_owned();
                        result.conflicts_remaining = vec![conflict.clone()];
                        result.ai_calls_made = 1;
                        result.tokens_used = estimated;
                        result
                    }
                }
            }
            Err(e) => {
                warn!(file = %conflict.file_path, error = %e, "AI call failed");
                let mut result = MergeResult::failed(conflict.file_path.clone(), e.to_string());
                result.conflicts_remaining = vec![conflict.clone()];
                result
            }
        }
    }

    /// Resolve several conflicts, batching same-file conflicts into one
    /// call when the combined context stays under budget.
    pub fn resolve_multiple_conflicts(
        &mut self,
        conflicts: &[ConflictRegion],
        baseline_codes: &BTreeMap<String, String>,
        task_snapshots: &[TaskSnapshot],
        batch: bool,
    ) -> Vec<MergeResult> {
        if !batch || conflicts.len() <= 1 {
            return conflicts
                .iter()
                .map(|c| {
                    let baseline = baseline_codes.get(&c.location).map_or("", String::as_str);
                    self.resolve_conflict(c, baseline, task_snapshots)
                })
                .collect();
        }

        let mut by_file: BTreeMap<&str, Vec<&ConflictRegion>> = BTreeMap::new();
        for conflict in conflicts {
            by_file
                .entry(conflict.file_path.as_str())
                .or_default()
                .push(conflict);
        }

        let mut results = Vec::new();
        for (_, file_conflicts) in by_file {
            if file_conflicts.len() == 1 {
                let conflict = file_conflicts[0];
                let baseline = baseline_codes
                    .get(&conflict.location)
                    .map_or("", String::as_str);
                results.push(self.resolve_conflict(conflict, baseline, task_snapshots));
            } else {
                results.extend(self.resolve_file_batch(
                    &file_conflicts,
                    baseline_codes,
                    task_snapshots,
                ));
            }
        }
        results
    }

    /// One AI call for all conflicts in one file; per-location resolutions
    /// are matched back by `--- LOCATION ---` tags, and unmatched locations
    /// fall back to individual calls.
    fn resolve_file_batch(
        &mut self,
        conflicts: &[&ConflictRegion],
        baseline_codes: &BTreeMap<String, String>,
        task_snapshots: &[TaskSnapshot],
    ) -> Vec<MergeResult> {
        let resolve_individually = |resolver: &mut Self| {
            conflicts
                .iter()
                .map(|c| {
                    let baseline = baseline_codes.get(&c.location).map_or("", String::as_str);
                    resolver.resolve_conflict(c, baseline, task_snapshots)
                })
                .collect::<Vec<_>>()
        };

        if !self.has_ai() {
            return resolve_individually(self);
        }

        let contexts: Vec<ConflictContext> = conflicts
            .iter()
            .map(|c| {
                let baseline = baseline_codes.get(&c.location).map_or("", String::as_str);
                Self::build_context(c, baseline, task_snapshots)
            })
            .collect();
        let total_tokens: u64 = contexts.iter().map(ConflictContext::estimated_tokens).sum();
        if total_tokens > self.max_context_tokens {
            debug!(total_tokens, "batch over budget, resolving individually");
            return resolve_individually(self);
        }

        let combined: String = contexts
            .iter()
            .map(|ctx| {
                format!(
                    "--- LOCATION: {} ---\n{}",
                    ctx.location,
                    ctx.to_prompt_context()
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");
        let language = contexts
            .first()
            .map_or("text", |ctx| infer_language(&ctx.file_path));
        let file_path = conflicts[0].file_path.clone();
        let prompt = prompts::format_batch_merge_prompt(
            &file_path,
            conflicts.len(),
            &combined,
            language,
        );

        let Some(call) = self.try_call(&prompt) else {
            return resolve_individually(self);
        };
        let response = match call {
            Ok(response) => response,
            Err(e) => {
                warn!(file = %file_path, error = %e, "batch AI call failed");
                return conflicts
                    .iter()
                    .map(|c| {
                        let mut r = MergeResult::failed(c.file_path.clone(), e.to_string());
                        r.conflicts_remaining = vec![(*c).clone()];
                        r
                    })
                    .collect();
            }
        };
        self.stats.calls_made += 1;
        self.stats.estimated_tokens_used += total_tokens + (response.len() / 4) as u64;

        let mut results = Vec::new();
        let mut unresolved = Vec::new();
        for conflict in conflicts {
            match prompts::extract_batch_code_block(&response, &conflict.location, language) {
                Some(merged) => {
                    let mut result =
                        MergeResult::new(MergeDecision::AiMerged, conflict.file_path.clone());
                    result.merged_content = Some(merged);
                    result.conflicts_resolved = vec![(*conflict).clone()];
                    result.tokens_used = total_tokens / conflicts.len() as u64;
                    result.explanation =
                        format!("Batch-resolved conflict at {}", conflict.location);
                    results.push(result);
                }
                None => unresolved.push(*conflict),
            }
        }
        if let Some(first) = results.first_mut() {
            first.ai_calls_made = 1;
        }

        // Anything the batch response missed gets its own call.
        for conflict in unresolved {
            let baseline = baseline_codes
                .get(&conflict.location)
                .map_or("", String::as_str);
            results.push(self.resolve_conflict(conflict, baseline, task_snapshots));
        }
        results
    }

    /// Full-file fallback for conflict-marker-bearing content: ask for
    /// per-hunk resolutions and stitch the file back together.
    ///
    /// Hunks the response does not cover default to the feature side.
    pub fn resolve_marker_file(&mut self, file_path: &str, content: &str) -> MergeResult {
        let Some(segments) = prompts::parse_conflict_markers(content) else {
            return MergeResult::failed(file_path, "no conflict markers found");
        };
        if !self.has_ai() {
            let mut result = MergeResult::new(MergeDecision::NeedsHumanReview, file_path);
            result.explanation = "No AI function configured".to_owned();
            return result;
        }

        let language = infer_language(file_path);
        let prompt = prompts::build_conflict_only_prompt(file_path, &segments, language);
        let estimated = (prompt.len() / 4) as u64;
        if estimated > self.max_context_tokens {
            let mut result = MergeResult::new(MergeDecision::NeedsHumanReview, file_path);
            result.explanation = format!("Context too large for AI ({estimated} tokens)");
            return result;
        }

        let Some(call) = self.try_call(&prompt) else {
            let mut result = MergeResult::new(MergeDecision::NeedsHumanReview, file_path);
            result.explanation = "No AI function configured".to_owned();
            return result;
        };
        match call {
            Ok(response) => {
                self.stats.calls_made += 1;
                self.stats.estimated_tokens_used += estimated + (response.len() / 4) as u64;
                let resolutions = prompts::extract_conflict_resolutions(&response);
                let merged = prompts::reassemble_with_resolutions(&segments, &resolutions);
                let hunks = segments
                    .iter()
                    .filter(|s| matches!(s, prompts::MarkerSegment::Conflict { .. }))
                    .count();
                let mut result = MergeResult::new(MergeDecision::AiMerged, file_path);
                result.merged_content = Some(merged);
                result.ai_calls_made = 1;
                result.tokens_used = estimated;
                result.explanation =
                    format!("Resolved {}/{hunks} conflict hunks", resolutions.len());
                result
            }
            Err(e) => MergeResult::failed(file_path, e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::change::ChangeType;
    use crate::model::conflict::ConflictSeverity;
    use crate::model::merge::MergeStrategy;
    use chrono::TimeZone as _;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// AI double that records calls and returns a canned response.
    struct CannedAi {
        response: String,
        calls: AtomicU64,
        last_prompt: Mutex<String>,
    }

    impl CannedAi {
        fn new(response: &str) -> Self {
            Self {
                response: response.to_owned(),
                calls: AtomicU64::new(0),
                last_prompt: Mutex::new(String::new()),
            }
        }
    }

    /// Boxable handle onto a shared [`CannedAi`].
    struct SharedAi(std::sync::Arc<CannedAi>);

    impl AiResolve for SharedAi {
        fn resolve(&self, _system: &str, user: &str) -> Result<String, AiCallError> {
            self.0.calls.fetch_add(1, Ordering::SeqCst);
            *self.0.last_prompt.lock().expect("lock") = user.to_owned();
            Ok(self.0.response.clone())
        }
    }

    fn conflict(location: &str) -> ConflictRegion {
        ConflictRegion {
            file_path: "src/api.ts".to_owned(),
            location: location.to_owned(),
            tasks_involved: vec!["task-001".to_owned(), "task-002".to_owned()],
            change_types: vec![ChangeType::ModifyFunction, ChangeType::ModifyFunction],
            severity: ConflictSeverity::Medium,
            can_auto_merge: false,
            merge_strategy: Some(MergeStrategy::AiRequired),
            reason: "Multiple modifications to same function need analysis".to_owned(),
        }
    }

    fn snapshots() -> Vec<TaskSnapshot> {
        let ts = chrono::Utc.timestamp_opt(1_700_000_000, 0).single().expect("ts");
        let mut a = TaskSnapshot::new("task-001", "narrow to id", ts);
        a.semantic_changes = vec![
            SemanticChange::new(ChangeType::ModifyFunction, "handle", "function:handle", 2, 2)
                .with_content_after("return req.body.id;"),
        ];
        let mut b = TaskSnapshot::new("task-002", "narrow to name", ts);
        b.semantic_changes = vec![
            SemanticChange::new(ChangeType::ModifyFunction, "handle", "function:handle", 2, 2)
                .with_content_after("return req.body.name;"),
        ];
        vec![a, b]
    }

    #[test]
    fn no_ai_means_human_review() {
        let mut resolver = AiResolver::default();
        let result = resolver.resolve_conflict(&conflict("function:handle"), "code", &snapshots());
        assert_eq!(result.decision, MergeDecision::NeedsHumanReview);
        assert_eq!(result.conflicts_remaining.len(), 1);
        assert_eq!(result.ai_calls_made, 0);
        assert_eq!(resolver.stats().calls_made, 0);
    }

    #[test]
    fn successful_resolution_parses_code_block() {
        let ai = std::sync::Arc::new(CannedAi::new(
            "```typescript\nfunction handle(req) { return { id: req.body.id, name: req.body.name }; }\n```",
        ));
        let mut resolver = AiResolver::new(Some(Box::new(SharedAi(std::sync::Arc::clone(&ai)))), 4000);
        let result = resolver.resolve_conflict(
            &conflict("function:handle"),
            "function handle(req) { return req.body; }",
            &snapshots(),
        );
        assert_eq!(result.decision, MergeDecision::AiMerged);
        assert!(result.merged_content.expect("content").contains("id: req.body.id"));
        assert_eq!(result.ai_calls_made, 1);
        assert_eq!(resolver.stats().calls_made, 1);
        assert!(resolver.stats().estimated_tokens_used > 0);

        // The prompt carried the intents and the baseline.
        let prompt = ai.last_prompt.lock().expect("lock").clone();
        assert!(prompt.contains("narrow to id"));
        assert!(prompt.contains("narrow to name"));
        assert!(prompt.contains("--- BASELINE CODE"));
    }

    #[test]
    fn unparseable_response_needs_review_but_counts_call() {
        let ai = std::sync::Arc::new(CannedAi::new("I cannot merge this, sorry."));
        let mut resolver = AiResolver::new(Some(Box::new(SharedAi(std::sync::Arc::clone(&ai)))), 4000);
        let result = resolver.resolve_conflict(&conflict("function:handle"), "code", &snapshots());
        assert_eq!(result.decision, MergeDecision::NeedsHumanReview);
        assert_eq!(result.ai_calls_made, 1);
        assert_eq!(resolver.stats().calls_made, 1);
    }

    #[test]
    fn budget_guard_blocks_call_entirely() {
        let ai = std::sync::Arc::new(CannedAi::new("```typescript\nx\n```"));
        // Budget of 10 tokens; any real context exceeds it.
        let mut resolver = AiResolver::new(Some(Box::new(SharedAi(std::sync::Arc::clone(&ai)))), 10);
        let huge_baseline = "x".repeat(5000);
        let result =
            resolver.resolve_conflict(&conflict("function:handle"), &huge_baseline, &snapshots());
        assert_eq!(result.decision, MergeDecision::NeedsHumanReview);
        assert_eq!(result.ai_calls_made, 0);
        assert_eq!(ai.calls.load(Ordering::SeqCst), 0);
        assert_eq!(resolver.stats().calls_made, 0);
        assert!(result.explanation.contains("too large"));
    }

    #[test]
    fn transport_error_fails_conflict() {
        struct FailingAi;
        impl AiResolve for FailingAi {
            fn resolve(&self, _: &str, _: &str) -> Result<String, AiCallError> {
                Err(AiCallError("connection refused".to_owned()))
            }
        }
        let mut resolver = AiResolver::new(Some(Box::new(FailingAi)), 4000);
        let result = resolver.resolve_conflict(&conflict("function:handle"), "code", &snapshots());
        assert_eq!(result.decision, MergeDecision::Failed);
        assert!(result.error.expect("error").contains("connection refused"));
    }

    #[test]
    fn batch_resolves_by_location_tag() {
        let response = "--- LOCATION: function:handle ---\n```typescript\nmerged handle\n```\n\
                        --- LOCATION: function:other ---\n```typescript\nmerged other\n```\n";
        let ai = std::sync::Arc::new(CannedAi::new(response));
        let mut resolver = AiResolver::new(Some(Box::new(SharedAi(std::sync::Arc::clone(&ai)))), 100_000);

        let conflicts = vec![conflict("function:handle"), conflict("function:other")];
        let baselines: BTreeMap<String, String> = conflicts
            .iter()
            .map(|c| (c.location.clone(), "base".to_owned()))
            .collect();
        let results =
            resolver.resolve_multiple_conflicts(&conflicts, &baselines, &snapshots(), true);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.decision == MergeDecision::AiMerged));
        // One transport call for the whole batch.
        assert_eq!(ai.calls.load(Ordering::SeqCst), 1);
        assert_eq!(results.iter().map(|r| u64::from(r.ai_calls_made)).sum::<u64>(), 1);
    }

    #[test]
    fn reset_stats_zeroes_counters() {
        let ai = std::sync::Arc::new(CannedAi::new("```typescript\nx\n```"));
        let mut resolver = AiResolver::new(Some(Box::new(SharedAi(std::sync::Arc::clone(&ai)))), 4000);
        let _ = resolver.resolve_conflict(&conflict("function:handle"), "code", &snapshots());
        assert!(resolver.stats().calls_made > 0);
        resolver.reset_stats();
        assert_eq!(resolver.stats(), ResolverStats::default());
    }

    #[test]
    fn marker_file_resolution_stitches_hunks() {
        let response = "--- CONFLICT_1 RESOLVED ---\n```typescript\nconst merged = true;\n```\n";
        let ai = std::sync::Arc::new(CannedAi::new(response));
        let mut resolver = AiResolver::new(Some(Box::new(SharedAi(std::sync::Arc::clone(&ai)))), 100_000);

        let content = "head\n<<<<<<< HEAD\nconst a = 1;\n=======\nconst b = 2;\n>>>>>>> task\ntail\n";
        let result = resolver.resolve_marker_file("src/x.ts", content);
        assert_eq!(result.decision, MergeDecision::AiMerged);
        assert_eq!(
            result.merged_content.as_deref(),
            Some("head\nconst merged = true;\ntail\n")
        );
    }

    #[test]
    fn language_inference() {
        assert_eq!(infer_language("a.py"), "python");
        assert_eq!(infer_language("a.tsx"), "typescript");
        assert_eq!(infer_language("a.jsx"), "javascript");
        assert_eq!(infer_language("a.rs"), "text");
    }

    #[test]
    fn location_overlap_rules() {
        assert!(locations_overlap("function:App", "function:App"));
        assert!(locations_overlap("function:App", "class:Shell.App"));
        assert!(!locations_overlap("function:App", "function:Other"));
        assert!(!locations_overlap("file_top", "function:App"));
    }
}
