//! The merge engine: deterministic strategies, AI fallback, per-file
//! pipeline, and the multi-task orchestrator.
//!
//! Flow for one file: the pipeline rebuilds a [`FileAnalysis`] per task from
//! its snapshot, asks the conflict detector for regions, then dispatches
//! each region to the auto merger ([`auto`]) and falls back to the AI
//! resolver ([`resolver`]) for anything the rules cannot handle. The
//! orchestrator ([`orchestrator`]) runs that pipeline across every file a
//! set of tasks touched and aggregates a [`crate::report::MergeReport`].
//!
//! [`FileAnalysis`]: crate::model::change::FileAnalysis

pub mod apply;
pub mod auto;
pub mod helpers;
pub mod orchestrator;
pub mod pipeline;
pub mod prompts;
pub mod resolver;

use crate::model::conflict::ConflictRegion;
use crate::model::evolution::TaskSnapshot;

// ---------------------------------------------------------------------------
// StrategyContext
// ---------------------------------------------------------------------------

/// Everything a deterministic strategy handler reads: the content to merge
/// onto, the snapshots of the involved tasks (sorted by `started_at`), and
/// the conflict being resolved.
///
/// `baseline_content` is the running merged content when a file has several
/// conflicts — each handler builds on its predecessors' output.
#[derive(Clone, Debug)]
pub struct StrategyContext {
    /// Project-relative path of the file.
    pub file_path: String,
    /// The content the strategy merges onto.
    pub baseline_content: String,
    /// Snapshots of the tasks involved, ordered by `started_at`.
    pub task_snapshots: Vec<TaskSnapshot>,
    /// The conflict region being resolved.
    pub conflict: ConflictRegion,
}

impl StrategyContext {
    /// File extension (lowercased, with dot) used for language-specific
    /// splicing.
    #[must_use]
    pub fn extension(&self) -> String {
        self.file_path
            .rfind('.')
            .map_or_else(String::new, |idx| self.file_path[idx..].to_lowercase())
    }
}
