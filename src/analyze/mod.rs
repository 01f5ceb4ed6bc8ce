//! Semantic analyzer (diff classification).
//!
//! Given two versions of a file, [`SemanticAnalyzer`] produces a
//! [`FileAnalysis`]: a list of typed [`SemanticChange`]s plus derived
//! summary sets. The analysis is deterministic, side-effect free, and never
//! errors — unsupported extensions and binary-looking content yield an
//! empty analysis, and anything the recognizers cannot classify degrades to
//! an `unknown`-typed change at the top level.
//!
//! Recognition is regex-level by design (see [`patterns`]): the downstream
//! rule base tolerates imprecision by demoting unclear pairs to AI
//! resolution.

pub mod blocks;
pub mod linediff;
pub mod patterns;

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::config::AnalyzerConfig;
use crate::model::change::{ChangeType, FileAnalysis, SemanticChange};
use linediff::{LineOp, diff_ops, normalize_line_endings};

// ---------------------------------------------------------------------------
// SemanticAnalyzer
// ---------------------------------------------------------------------------

/// Classifies diffs into typed semantic changes.
#[derive(Clone, Debug)]
pub struct SemanticAnalyzer {
    extensions: BTreeSet<String>,
}

impl Default for SemanticAnalyzer {
    fn default() -> Self {
        Self {
            extensions: [".py", ".js", ".jsx", ".ts", ".tsx"]
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
        }
    }
}

impl SemanticAnalyzer {
    /// Build an analyzer honoring the configured extension whitelist.
    #[must_use]
    pub fn from_config(config: &AnalyzerConfig) -> Self {
        Self {
            extensions: config.extensions.iter().cloned().collect(),
        }
    }

    /// Whether a file's extension is in the whitelist.
    #[must_use]
    pub fn is_supported(&self, file_path: &str) -> bool {
        self.extensions.contains(&extension_of(file_path))
    }

    /// Analyze a single file's structure by diffing against nothing: every
    /// element shows up as an addition.
    #[must_use]
    pub fn analyze_file(&self, file_path: &str, content: &str) -> FileAnalysis {
        self.analyze_diff(file_path, "", content)
    }

    /// Analyze the semantic difference between two versions of a file.
    #[must_use]
    pub fn analyze_diff(&self, file_path: &str, before: &str, after: &str) -> FileAnalysis {
        let ext = extension_of(file_path);
        if !self.extensions.contains(&ext) {
            return FileAnalysis::empty(file_path);
        }
        if looks_binary(before) || looks_binary(after) {
            debug!(file = file_path, "binary-looking content, skipping analysis");
            return FileAnalysis::empty(file_path);
        }

        let before = normalize_line_endings(before);
        let after = normalize_line_endings(after);

        // One walk of the op sequence, keeping both numbering schemes:
        // new-file positions drive reported line numbers, old-file positions
        // drive enclosing-function attribution for removed lines.
        let mut added: Vec<(u32, String)> = Vec::new();
        let mut removed: Vec<(u32, u32, String)> = Vec::new();
        let mut new_line: u32 = 1;
        let mut old_line: u32 = 1;
        for op in diff_ops(&before, &after) {
            match op {
                LineOp::Equal(_) => {
                    new_line += 1;
                    old_line += 1;
                }
                LineOp::Add(text) => {
                    added.push((new_line, text));
                    new_line += 1;
                }
                LineOp::Remove(text) => {
                    removed.push((new_line, old_line, text));
                    old_line += 1;
                }
            }
        }
        let total_changed = u32::try_from(added.len() + removed.len()).unwrap_or(u32::MAX);

        let mut changes = Vec::new();

        // -- Imports ---------------------------------------------------------
        let import_re = patterns::import_pattern(&ext);
        if let Some(import_re) = import_re {
            for (line_no, text) in &added {
                if import_re.is_match(text.trim()) {
                    changes.push(
                        SemanticChange::new(
                            ChangeType::AddImport,
                            text.trim(),
                            "file_top",
                            *line_no,
                            *line_no,
                        )
                        .with_content_after(text.clone()),
                    );
                }
            }
            for (line_no, _, text) in &removed {
                if import_re.is_match(text.trim()) {
                    changes.push(
                        SemanticChange::new(
                            ChangeType::RemoveImport,
                            text.trim(),
                            "file_top",
                            *line_no,
                            *line_no,
                        )
                        .with_content_before(text.clone()),
                    );
                }
            }
        }

        // -- Function add/remove (set difference over both full texts) -------
        let mut added_funcs: BTreeSet<String> = BTreeSet::new();
        let mut removed_funcs: BTreeSet<String> = BTreeSet::new();
        if let Some(func_re) = patterns::function_pattern(&ext) {
            let funcs_before: BTreeSet<String> =
                patterns::function_names(func_re, &before).into_iter().collect();
            let funcs_after: BTreeSet<String> =
                patterns::function_names(func_re, &after).into_iter().collect();

            // Added/removed functions carry their full definition block so
            // the merge layer can replay (or excise) them verbatim.
            for name in funcs_after.difference(&funcs_before) {
                added_funcs.insert(name.clone());
                let block = blocks::function_block(&after, name, &ext);
                let (start, end) = block
                    .as_ref()
                    .map_or((1, 1), |b| (b.start_line, b.end_line));
                let mut change = SemanticChange::new(
                    ChangeType::AddFunction,
                    name.clone(),
                    format!("function:{name}"),
                    start,
                    end,
                );
                change.content_after = block.map(|b| b.text);
                changes.push(change);
            }
            for name in funcs_before.difference(&funcs_after) {
                removed_funcs.insert(name.clone());
                let block = blocks::function_block(&before, name, &ext);
                let mut change = SemanticChange::new(
                    ChangeType::RemoveFunction,
                    name.clone(),
                    format!("function:{name}"),
                    1,
                    1,
                );
                change.content_before = block.map(|b| b.text);
                changes.push(change);
            }

            // -- Body modifications ------------------------------------------
            changes.extend(attribute_modifications(
                func_re,
                &before,
                &after,
                &added,
                &removed,
                import_re,
                &added_funcs,
                &removed_funcs,
            ));
        }

        debug!(
            file = file_path,
            changes = changes.len(),
            lines_changed = total_changed,
            "analysis complete"
        );
        FileAnalysis::from_changes(file_path, changes, total_changed)
    }
}

// ---------------------------------------------------------------------------
// Modification attribution
// ---------------------------------------------------------------------------

/// Per-function accumulation of body edits.
#[derive(Default)]
struct BodyEdit {
    line_min: u32,
    line_max: u32,
    removed: Vec<String>,
    added: Vec<String>,
}

impl BodyEdit {
    fn record(&mut self, line: u32) {
        if self.line_min == 0 || line < self.line_min {
            self.line_min = line;
        }
        if line > self.line_max {
            self.line_max = line;
        }
    }
}

/// Attribute non-import, non-definition changed lines to their enclosing
/// function (`modify_function`), or to the module top level (`unknown`).
#[allow(clippy::too_many_arguments)]
fn attribute_modifications(
    func_re: &regex::Regex,
    before: &str,
    after: &str,
    added: &[(u32, String)],
    removed: &[(u32, u32, String)],
    import_re: Option<&'static regex::Regex>,
    added_funcs: &BTreeSet<String>,
    removed_funcs: &BTreeSet<String>,
) -> Vec<SemanticChange> {
    let defs_after = patterns::function_definition_lines(func_re, after);
    let defs_before = patterns::function_definition_lines(func_re, before);

    let enclosing = |defs: &[(u32, String)], line: u32| -> Option<String> {
        defs.iter()
            .rev()
            .find(|(def_line, _)| *def_line <= line)
            .map(|(_, name)| name.clone())
    };

    let is_classifiable = |text: &str| -> bool {
        let trimmed = text.trim();
        !trimmed.is_empty()
            && !import_re.is_some_and(|re| re.is_match(trimmed))
            && !func_re.is_match(text)
    };

    let mut edits: BTreeMap<String, BodyEdit> = BTreeMap::new();
    let mut top_level = BodyEdit::default();
    let mut top_level_touched = false;

    for (new_line, text) in added {
        if !is_classifiable(text) {
            continue;
        }
        match enclosing(&defs_after, *new_line) {
            Some(name) if !added_funcs.contains(&name) && !removed_funcs.contains(&name) => {
                let edit = edits.entry(name).or_default();
                edit.record(*new_line);
                edit.added.push(text.clone());
            }
            Some(_) => {}
            None => {
                top_level.record(*new_line);
                top_level.added.push(text.clone());
                top_level_touched = true;
            }
        }
    }
    for (new_line, old_line, text) in removed {
        if !is_classifiable(text) {
            continue;
        }
        match enclosing(&defs_before, *old_line) {
            Some(name) if !added_funcs.contains(&name) && !removed_funcs.contains(&name) => {
                let edit = edits.entry(name).or_default();
                edit.record(*new_line);
                edit.removed.push(text.clone());
            }
            Some(_) => {}
            None => {
                top_level.record(*new_line);
                top_level.removed.push(text.clone());
                top_level_touched = true;
            }
        }
    }

    let mut changes = Vec::new();
    for (name, edit) in edits {
        let mut change = SemanticChange::new(
            ChangeType::ModifyFunction,
            name.clone(),
            format!("function:{name}"),
            edit.line_min.max(1),
            edit.line_max.max(1),
        );
        if !edit.removed.is_empty() {
            change.content_before = Some(edit.removed.join("\n"));
        }
        if !edit.added.is_empty() {
            change.content_after = Some(edit.added.join("\n"));
        }
        changes.push(change);
    }
    if top_level_touched {
        let mut change = SemanticChange::new(
            ChangeType::Unknown,
            "module",
            "file_top",
            top_level.line_min.max(1),
            top_level.line_max.max(1),
        );
        if !top_level.removed.is_empty() {
            change.content_before = Some(top_level.removed.join("\n"));
        }
        if !top_level.added.is_empty() {
            change.content_after = Some(top_level.added.join("\n"));
        }
        changes.push(change);
    }
    changes
}

fn extension_of(file_path: &str) -> String {
    file_path
        .rfind('.')
        .map_or_else(String::new, |idx| file_path[idx..].to_lowercase())
}

fn looks_binary(text: &str) -> bool {
    text.contains('\0')
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
