//! Merge strategies, decisions, and per-file results.

use serde::{Deserialize, Serialize};

use super::conflict::ConflictRegion;

// ---------------------------------------------------------------------------
// MergeStrategy
// ---------------------------------------------------------------------------

/// A deterministic recipe for combining compatible changes, or a routing
/// marker (`AiRequired`, `HumanRequired`) when no recipe applies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Union new imports into the import block, honoring removals.
    CombineImports,
    /// Insert hook calls at the start of the function body.
    HooksFirst,
    /// Hooks first, then wrap the return expression.
    HooksThenWrap,
    /// Append additive statements in task order.
    AppendStatements,
    /// Append new function definitions before the module-export tail.
    AppendFunctions,
    /// Insert new methods before the class's closing delimiter.
    AppendMethods,
    /// Union new JSX/object props at the same site.
    CombineProps,
    /// Apply all changes in fixed priority order (imports → hooks → wraps → ...).
    OrderByDependency,
    /// Apply whole-content substitutions in `started_at` order.
    OrderByTime,
    /// Deterministic rules cannot handle this; ask the AI.
    AiRequired,
    /// Neither rules nor AI should decide; a human must.
    HumanRequired,
}

impl MergeStrategy {
    /// The wire value (matches the serde representation).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CombineImports => "combine_imports",
            Self::HooksFirst => "hooks_first",
            Self::HooksThenWrap => "hooks_then_wrap",
            Self::AppendStatements => "append_statements",
            Self::AppendFunctions => "append_functions",
            Self::AppendMethods => "append_methods",
            Self::CombineProps => "combine_props",
            Self::OrderByDependency => "order_by_dependency",
            Self::OrderByTime => "order_by_time",
            Self::AiRequired => "ai_required",
            Self::HumanRequired => "human_required",
        }
    }

    /// Whether a deterministic handler exists for this strategy.
    #[must_use]
    pub const fn is_deterministic(self) -> bool {
        !matches!(self, Self::AiRequired | Self::HumanRequired)
    }
}

impl std::fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// MergeDecision
// ---------------------------------------------------------------------------

/// Terminal outcome of a merge for one file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeDecision {
    /// Deterministic rules handled everything; no AI involved.
    AutoMerged,
    /// The AI resolver settled at least one conflict.
    AiMerged,
    /// One or more conflicts remain for a human.
    NeedsHumanReview,
    /// The merge could not be performed.
    Failed,
}

impl MergeDecision {
    /// The wire value (matches the serde representation).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AutoMerged => "auto_merged",
            Self::AiMerged => "ai_merged",
            Self::NeedsHumanReview => "needs_human_review",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for MergeDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// MergeResult
// ---------------------------------------------------------------------------

/// Result of merging one file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MergeResult {
    /// The merge decision outcome.
    pub decision: MergeDecision,
    /// Path to the merged file.
    pub file_path: String,
    /// The final merged content, when one was produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_content: Option<String>,
    /// Conflicts that were resolved (by rules or AI).
    #[serde(default)]
    pub conflicts_resolved: Vec<ConflictRegion>,
    /// Conflicts left for human review.
    #[serde(default)]
    pub conflicts_remaining: Vec<ConflictRegion>,
    /// Number of AI calls made for this file.
    #[serde(default)]
    pub ai_calls_made: u32,
    /// Estimated tokens spent on AI calls for this file.
    #[serde(default)]
    pub tokens_used: u64,
    /// Human-readable explanation of what was done.
    #[serde(default)]
    pub explanation: String,
    /// Error message when `decision == Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MergeResult {
    /// A skeleton result for `file_path` with the given decision.
    #[must_use]
    pub fn new(decision: MergeDecision, file_path: impl Into<String>) -> Self {
        Self {
            decision,
            file_path: file_path.into(),
            merged_content: None,
            conflicts_resolved: Vec::new(),
            conflicts_remaining: Vec::new(),
            ai_calls_made: 0,
            tokens_used: 0,
            explanation: String::new(),
            error: None,
        }
    }

    /// A failed result carrying an error message.
    #[must_use]
    pub fn failed(file_path: impl Into<String>, error: impl Into<String>) -> Self {
        let mut result = Self::new(MergeDecision::Failed, file_path);
        result.error = Some(error.into());
        result
    }

    /// Whether the merge produced usable content.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(
            self.decision,
            MergeDecision::AutoMerged | MergeDecision::AiMerged
        )
    }

    /// Whether a human needs to look at this file.
    #[must_use]
    pub fn needs_human_review(&self) -> bool {
        !self.conflicts_remaining.is_empty()
            || matches!(self.decision, MergeDecision::NeedsHumanReview)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
