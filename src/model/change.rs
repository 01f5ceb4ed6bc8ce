//! Typed semantic changes.
//!
//! A [`SemanticChange`] is one logical edit — "added the `useAuth` hook",
//! "removed the `legacy_sort` function" — rather than a line-level diff.
//! [`ChangeType`] is the closed vocabulary the compatibility rules are
//! written against, and [`FileAnalysis`] aggregates everything the analyzer
//! found for one file.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ChangeType
// ---------------------------------------------------------------------------

/// Semantic classification of a code change.
///
/// These represent WHAT changed at a semantic level. The conflict detector
/// consults the rule book by pairs of these to decide compatibility.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    // Imports
    AddImport,
    RemoveImport,
    ModifyImport,

    // Functions
    AddFunction,
    RemoveFunction,
    ModifyFunction,
    RenameFunction,

    // React / JSX
    AddHookCall,
    RemoveHookCall,
    WrapJsx,
    UnwrapJsx,
    AddJsxElement,
    ModifyJsxProps,

    // Variables / constants
    AddVariable,
    RemoveVariable,
    ModifyVariable,
    AddConstant,

    // Classes / methods
    AddClass,
    RemoveClass,
    ModifyClass,
    AddMethod,
    RemoveMethod,
    ModifyMethod,
    AddProperty,

    // TypeScript types
    AddType,
    ModifyType,
    AddInterface,
    ModifyInterface,

    // Python decorators
    AddDecorator,
    RemoveDecorator,

    // Generic
    AddComment,
    ModifyComment,
    FormattingOnly,
    Unknown,
}

impl ChangeType {
    /// The wire value (matches the serde representation).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AddImport => "add_import",
            Self::RemoveImport => "remove_import",
            Self::ModifyImport => "modify_import",
            Self::AddFunction => "add_function",
            Self::RemoveFunction => "remove_function",
            Self::ModifyFunction => "modify_function",
            Self::RenameFunction => "rename_function",
            Self::AddHookCall => "add_hook_call",
            Self::RemoveHookCall => "remove_hook_call",
            Self::WrapJsx => "wrap_jsx",
            Self::UnwrapJsx => "unwrap_jsx",
            Self::AddJsxElement => "add_jsx_element",
            Self::ModifyJsxProps => "modify_jsx_props",
            Self::AddVariable => "add_variable",
            Self::RemoveVariable => "remove_variable",
            Self::ModifyVariable => "modify_variable",
            Self::AddConstant => "add_constant",
            Self::AddClass => "add_class",
            Self::RemoveClass => "remove_class",
            Self::ModifyClass => "modify_class",
            Self::AddMethod => "add_method",
            Self::RemoveMethod => "remove_method",
            Self::ModifyMethod => "modify_method",
            Self::AddProperty => "add_property",
            Self::AddType => "add_type",
            Self::ModifyType => "modify_type",
            Self::AddInterface => "add_interface",
            Self::ModifyInterface => "modify_interface",
            Self::AddDecorator => "add_decorator",
            Self::RemoveDecorator => "remove_decorator",
            Self::AddComment => "add_comment",
            Self::ModifyComment => "modify_comment",
            Self::FormattingOnly => "formatting_only",
            Self::Unknown => "unknown",
        }
    }

    /// Whether this change only adds code (never touches existing lines).
    #[must_use]
    pub const fn is_additive(self) -> bool {
        matches!(
            self,
            Self::AddImport
                | Self::AddFunction
                | Self::AddHookCall
                | Self::AddVariable
                | Self::AddConstant
                | Self::AddClass
                | Self::AddMethod
                | Self::AddProperty
                | Self::AddType
                | Self::AddInterface
                | Self::AddDecorator
                | Self::AddJsxElement
                | Self::AddComment
        )
    }

    /// Whether this change rewrites an existing body (the severity-critical
    /// family: overlapping modifications of these escalate a conflict).
    #[must_use]
    pub const fn is_modify_style(self) -> bool {
        matches!(self, Self::ModifyFunction | Self::ModifyMethod | Self::ModifyClass)
    }

    /// Whether this change alters structure in a way that can break
    /// compilation for everyone else (wraps, unwraps, removals).
    #[must_use]
    pub const fn is_structural(self) -> bool {
        matches!(
            self,
            Self::WrapJsx | Self::UnwrapJsx | Self::RemoveFunction | Self::RemoveClass
        )
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// SemanticChange
// ---------------------------------------------------------------------------

/// A single semantic change within a file.
///
/// `location` is a coarse code address (`file_top`, `function:App`,
/// `class:User.method`) used to group changes for conflict detection.
/// Line numbers are 1-indexed positions in the new file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SemanticChange {
    /// The semantic classification of the change.
    pub change_type: ChangeType,
    /// What was changed (function name, import path, component name, ...).
    pub target: String,
    /// Where in the file the change lives.
    pub location: String,
    /// Starting line (1-indexed).
    pub line_start: u32,
    /// Ending line (1-indexed, `>= line_start`).
    pub line_end: u32,
    /// The code before the change, for modifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_before: Option<String>,
    /// The code after the change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_after: Option<String>,
    /// Additional context (dependency hints, prop names, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl SemanticChange {
    /// Create a change with no captured content.
    ///
    /// `location` must be non-empty and `line_start <= line_end`; both are
    /// programmer-error invariants, not input validation.
    #[must_use]
    pub fn new(
        change_type: ChangeType,
        target: impl Into<String>,
        location: impl Into<String>,
        line_start: u32,
        line_end: u32,
    ) -> Self {
        let location = location.into();
        debug_assert!(!location.is_empty(), "location must be non-empty");
        debug_assert!(line_start <= line_end, "line_start must be <= line_end");
        Self {
            change_type,
            target: target.into(),
            location,
            line_start,
            line_end,
            content_before: None,
            content_after: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Attach the post-change content.
    #[must_use]
    pub fn with_content_after(mut self, content: impl Into<String>) -> Self {
        self.content_after = Some(content.into());
        self
    }

    /// Attach the pre-change content.
    #[must_use]
    pub fn with_content_before(mut self, content: impl Into<String>) -> Self {
        self.content_before = Some(content.into());
        self
    }

    /// Whether this is a purely additive change.
    #[must_use]
    pub const fn is_additive(&self) -> bool {
        self.change_type.is_additive()
    }

    /// Whether this change overlaps another: same location, or intersecting
    /// line ranges.
    #[must_use]
    pub fn overlaps_with(&self, other: &Self) -> bool {
        if self.location == other.location {
            return true;
        }
        self.line_end >= other.line_start && other.line_end >= self.line_start
    }
}

// ---------------------------------------------------------------------------
// FileAnalysis
// ---------------------------------------------------------------------------

/// Complete semantic analysis of changes to a single file.
///
/// The derived sets are precomputed from the change list on construction and
/// kept alongside it for cheap conflict screening.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FileAnalysis {
    /// Project-relative path of the analyzed file.
    pub file_path: String,
    /// Every semantic change detected.
    #[serde(default)]
    pub changes: Vec<SemanticChange>,
    /// Function/method names that were modified.
    #[serde(default)]
    pub functions_modified: BTreeSet<String>,
    /// Newly added function names.
    #[serde(default)]
    pub functions_added: BTreeSet<String>,
    /// Added import statements.
    #[serde(default)]
    pub imports_added: BTreeSet<String>,
    /// Removed import statements.
    #[serde(default)]
    pub imports_removed: BTreeSet<String>,
    /// Modified class names.
    #[serde(default)]
    pub classes_modified: BTreeSet<String>,
    /// Added plus removed line count from the underlying diff.
    #[serde(default)]
    pub total_lines_changed: u32,
}

impl FileAnalysis {
    /// Build an analysis from a change list, populating the derived sets.
    #[must_use]
    pub fn from_changes(
        file_path: impl Into<String>,
        changes: Vec<SemanticChange>,
        total_lines_changed: u32,
    ) -> Self {
        let mut analysis = Self {
            file_path: file_path.into(),
            changes,
            total_lines_changed,
            ..Self::default()
        };
        analysis.rebuild_derived();
        analysis
    }

    /// An empty analysis (unsupported or binary file).
    #[must_use]
    pub fn empty(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            ..Self::default()
        }
    }

    /// Recompute the derived sets from `changes`.
    pub fn rebuild_derived(&mut self) {
        self.functions_modified.clear();
        self.functions_added.clear();
        self.imports_added.clear();
        self.imports_removed.clear();
        self.classes_modified.clear();
        for change in &self.changes {
            match change.change_type {
                ChangeType::AddImport => {
                    self.imports_added.insert(change.target.clone());
                }
                ChangeType::RemoveImport => {
                    self.imports_removed.insert(change.target.clone());
                }
                ChangeType::AddFunction => {
                    self.functions_added.insert(change.target.clone());
                }
                ChangeType::ModifyFunction | ChangeType::ModifyMethod => {
                    self.functions_modified.insert(change.target.clone());
                }
                ChangeType::ModifyClass => {
                    self.classes_modified.insert(change.target.clone());
                }
                _ => {}
            }
        }
    }

    /// All changes at a specific location.
    #[must_use]
    pub fn changes_at_location(&self, location: &str) -> Vec<&SemanticChange> {
        self.changes
            .iter()
            .filter(|c| c.location == location)
            .collect()
    }

    /// Whether every change is purely additive.
    #[must_use]
    pub fn is_additive_only(&self) -> bool {
        self.changes.iter().all(SemanticChange::is_additive)
    }

    /// The set of locations touched.
    #[must_use]
    pub fn locations_changed(&self) -> BTreeSet<&str> {
        self.changes.iter().map(|c| c.location.as_str()).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
