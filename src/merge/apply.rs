//! Change application: turning snapshots into file content.
//!
//! Three jobs live here:
//!
//! 1. [`apply_single_task_changes`] — the no-conflict fast path: replay one
//!    task's semantic deltas onto the baseline.
//! 2. [`extract_location_content`] — cut the snippet a location refers to
//!    (function block, import section, class body) out of a file, for
//!    minimal-context AI prompts.
//! 3. [`apply_ai_merge`] — splice an AI-resolved snippet back over the
//!    location it replaces.

use tracing::debug;

use crate::analyze::blocks;
use crate::model::change::{ChangeType, SemanticChange};
use crate::model::evolution::TaskSnapshot;

use super::helpers;

// ---------------------------------------------------------------------------
// Delta application
// ---------------------------------------------------------------------------

/// Index of the first line past the import section.
#[must_use]
pub fn find_import_end(content: &str, ext: &str) -> usize {
    let lines: Vec<&str> = content.lines().collect();
    helpers::find_import_section_end(&lines, ext)
}

/// Apply one semantic change to `content`.
#[must_use]
pub fn apply_change(content: &str, change: &SemanticChange, ext: &str) -> String {
    match change.change_type {
        ChangeType::AddImport => {
            let Some(import) = change.content_after.as_deref().map(str::trim) else {
                return content.to_owned();
            };
            insert_import(content, import, ext)
        }
        ChangeType::RemoveImport => {
            let Some(import) = change.content_before.as_deref().map(str::trim) else {
                return content.to_owned();
            };
            remove_matching_lines(content, import)
        }
        ChangeType::AddHookCall => {
            let func = location_target(&change.location).unwrap_or(&change.target);
            helpers::extract_hook_call(change).map_or_else(
                || content.to_owned(),
                |hook| helpers::insert_hooks_into_function(content, func, &[hook]),
            )
        }
        ChangeType::WrapJsx => {
            let func = location_target(&change.location).unwrap_or(&change.target);
            helpers::extract_jsx_wrapper(change).map_or_else(
                || content.to_owned(),
                |(wrapper, props)| {
                    helpers::wrap_function_return(content, func, &wrapper, &props)
                },
            )
        }
        ChangeType::AddFunction
        | ChangeType::AddClass
        | ChangeType::AddType
        | ChangeType::AddInterface => change.content_after.as_deref().map_or_else(
            || content.to_owned(),
            |body| append_definition(content, body),
        ),
        ChangeType::AddMethod => {
            let (Some(body), Some(class)) = (
                change.content_after.as_deref(),
                change.target.split('.').next().filter(|c| !c.is_empty()),
            ) else {
                return content.to_owned();
            };
            helpers::insert_methods_into_class(content, class, &[body.to_owned()])
        }
        _ if change.content_before.is_some() && change.content_after.is_some() => {
            helpers::apply_content_change(
                content,
                change.content_before.as_deref(),
                change.content_after.as_deref().unwrap_or_default(),
            )
        }
        _ if change.is_additive() => change.content_after.as_deref().map_or_else(
            || content.to_owned(),
            |body| append_statement(content, body),
        ),
        _ => content.to_owned(),
    }
}

/// Replay one task's semantic deltas onto the baseline.
#[must_use]
pub fn apply_single_task_changes(
    baseline: &str,
    snapshot: &TaskSnapshot,
    ext: &str,
) -> String {
    let mut content = baseline.to_owned();
    for change in &snapshot.semantic_changes {
        content = apply_change(&content, change, ext);
    }
    debug!(
        task = %snapshot.task_id,
        changes = snapshot.semantic_changes.len(),
        "applied single-task deltas"
    );
    content
}

/// Replay several tasks' non-conflicting deltas, in snapshot order,
/// skipping changes at any location in `excluded_locations`.
#[must_use]
pub fn combine_non_conflicting_changes(
    baseline: &str,
    snapshots: &[TaskSnapshot],
    ext: &str,
    excluded_locations: &std::collections::BTreeSet<String>,
) -> String {
    let mut content = baseline.to_owned();
    for snapshot in snapshots {
        for change in &snapshot.semantic_changes {
            if excluded_locations.contains(&change.location) {
                continue;
            }
            content = apply_change(&content, change, ext);
        }
    }
    content
}

/// Insert an import at the end of the import section, skipping duplicates.
fn insert_import(content: &str, import: &str, ext: &str) -> String {
    let mut lines: Vec<String> = content.lines().map(ToOwned::to_owned).collect();
    if lines.iter().any(|l| l.trim() == import) {
        return content.to_owned();
    }
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    let pos = helpers::find_import_section_end(&refs, ext);
    lines.insert(pos, import.to_owned());
    join_lines(lines, content)
}

/// Drop every line whose trimmed form equals `target`.
fn remove_matching_lines(content: &str, target: &str) -> String {
    let lines: Vec<String> = content
        .lines()
        .filter(|l| l.trim() != target)
        .map(ToOwned::to_owned)
        .collect();
    join_lines(lines, content)
}

/// Append a function/class/type definition, before any module-export tail.
/// Already-present definitions are not duplicated.
fn append_definition(content: &str, body: &str) -> String {
    let trimmed = body.trim_end_matches('\n');
    if trimmed.is_empty() || content.contains(trimmed) {
        return content.to_owned();
    }
    if let Some(pos) = helpers::find_function_insert_position(content) {
        let mut lines: Vec<String> = content.lines().map(ToOwned::to_owned).collect();
        lines.insert(pos, String::new());
        lines.insert(pos + 1, body.to_owned());
        join_lines(lines, content)
    } else {
        let mut out = content.trim_end_matches('\n').to_owned();
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(body.trim_end_matches('\n'));
        out.push('\n');
        out
    }
}

/// Append a loose statement at the file end.
fn append_statement(content: &str, body: &str) -> String {
    let mut out = content.trim_end_matches('\n').to_owned();
    if !out.is_empty() {
        out.push('\n');
    }
    out.push_str(body.trim_end_matches('\n'));
    out.push('\n');
    out
}

fn join_lines(lines: Vec<String>, original: &str) -> String {
    let mut out = lines.join("\n");
    if original.ends_with('\n') {
        out.push('\n');
    }
    out
}

fn location_target(location: &str) -> Option<&str> {
    location.split_once(':').map(|(_, name)| name)
}

// ---------------------------------------------------------------------------
// Location extraction & AI splice-back
// ---------------------------------------------------------------------------

/// Cut the snippet `location` refers to out of `content`.
///
/// - `file_top` → the import section (or the first lines when there is
///   none).
/// - `function:<name>` / `class:<name>` → the definition block, found by
///   indentation for Python and brace matching for JS/TS.
/// - Anything else → the whole content.
#[must_use]
pub fn extract_location_content(content: &str, location: &str, ext: &str) -> String {
    if location == "file_top" {
        let lines: Vec<&str> = content.lines().collect();
        let end = helpers::find_import_section_end(&lines, ext).max(1).min(lines.len());
        return lines[..end].join("\n");
    }
    if let Some((kind, name)) = location.split_once(':') {
        let name = name.split('.').next().unwrap_or(name);
        let block = if ext == ".py" {
            let keyword = if kind == "class" { "class" } else { "def" };
            blocks::python_block(content, keyword, name)
        } else {
            blocks::braced_block(content, kind, name)
        };
        if let Some(block) = block {
            return block.text;
        }
    }
    content.to_owned()
}

/// Replace the snippet `location` refers to with `merged_snippet`.
///
/// When the location cannot be isolated the snippet replaces the whole
/// file (the resolver asked for a full rewrite in that case).
#[must_use]
pub fn apply_ai_merge(content: &str, location: &str, ext: &str, merged_snippet: &str) -> String {
    let original = extract_location_content(content, location, ext);
    if original == content || original.is_empty() {
        return merged_snippet.to_owned();
    }
    helpers::apply_content_change(content, Some(&original), merged_snippet)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
