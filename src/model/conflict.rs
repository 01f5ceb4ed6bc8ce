//! Conflict regions and severity.
//!
//! A [`ConflictRegion`] is the conflict detector's verdict for one location
//! where two or more tasks changed the same target: either a compatible
//! region with a deterministic merge strategy, or an incompatible one with a
//! severity grade and an AI/human routing decision.

use serde::{Deserialize, Serialize};

use super::change::ChangeType;
use super::merge::MergeStrategy;

// ---------------------------------------------------------------------------
// ConflictSeverity
// ---------------------------------------------------------------------------

/// How serious a conflict is.
///
/// Ordered: `None < Low < Medium < High < Critical`.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSeverity {
    /// No conflict; the region auto-merges.
    #[default]
    None,
    /// Minor overlap, likely resolvable.
    Low,
    /// Significant overlap, may need AI assistance.
    Medium,
    /// Structural change present; likely needs review.
    High,
    /// Overlapping modifications of the same body; definitely needs review.
    Critical,
}

impl ConflictSeverity {
    /// The wire value (matches the serde representation).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for ConflictSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ConflictRegion
// ---------------------------------------------------------------------------

/// A detected conflict between multiple tasks' changes at one location.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConflictRegion {
    /// The file containing the conflict.
    pub file_path: String,
    /// The specific location (e.g. `function:App`).
    pub location: String,
    /// Task IDs that changed this location, in detection order.
    pub tasks_involved: Vec<String>,
    /// The change types contributed, parallel to `tasks_involved`.
    pub change_types: Vec<ChangeType>,
    /// Severity grade.
    pub severity: ConflictSeverity,
    /// Whether deterministic rules can handle this region.
    pub can_auto_merge: bool,
    /// The strategy to use when `can_auto_merge` (or `ai_required` when not).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_strategy: Option<MergeStrategy>,
    /// Human-readable explanation.
    #[serde(default)]
    pub reason: String,
}

impl ConflictRegion {
    /// Whether the region is routed to the AI resolver.
    #[must_use]
    pub fn needs_ai(&self) -> bool {
        !self.can_auto_merge
            || matches!(self.merge_strategy, Some(MergeStrategy::AiRequired) | None)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering() {
        assert!(ConflictSeverity::None < ConflictSeverity::Low);
        assert!(ConflictSeverity::Low < ConflictSeverity::Medium);
        assert!(ConflictSeverity::Medium < ConflictSeverity::High);
        assert!(ConflictSeverity::High < ConflictSeverity::Critical);
    }

    #[test]
    fn severity_wire_values() {
        assert_eq!(ConflictSeverity::Critical.as_str(), "critical");
        let json = serde_json::to_string(&ConflictSeverity::Medium).expect("serialize");
        assert_eq!(json, "\"medium\"");
    }

    #[test]
    fn region_needs_ai() {
        let auto = ConflictRegion {
            file_path: "a.py".to_owned(),
            location: "file_top".to_owned(),
            tasks_involved: vec!["t1".to_owned(), "t2".to_owned()],
            change_types: vec![ChangeType::AddImport, ChangeType::AddImport],
            severity: ConflictSeverity::None,
            can_auto_merge: true,
            merge_strategy: Some(MergeStrategy::CombineImports),
            reason: String::new(),
        };
        assert!(!auto.needs_ai());

        let hard = ConflictRegion {
            can_auto_merge: false,
            merge_strategy: Some(MergeStrategy::AiRequired),
            severity: ConflictSeverity::Medium,
            ..auto
        };
        assert!(hard.needs_ai());
    }

    #[test]
    fn region_json_round_trip() {
        let region = ConflictRegion {
            file_path: "src/api.ts".to_owned(),
            location: "function:handle".to_owned(),
            tasks_involved: vec!["task-001".to_owned(), "task-002".to_owned()],
            change_types: vec![ChangeType::ModifyFunction, ChangeType::ModifyFunction],
            severity: ConflictSeverity::Medium,
            can_auto_merge: false,
            merge_strategy: Some(MergeStrategy::AiRequired),
            reason: "Multiple modifications to same function need analysis".to_owned(),
        };
        let json = serde_json::to_string(&region).expect("serialize");
        let back: ConflictRegion = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, region);
    }
}
