//! Deterministic auto-merge strategies.
//!
//! [`AutoMerger`] maps each deterministic [`MergeStrategy`] to a handler.
//! Handlers read the [`StrategyContext`] (running content + involved
//! snapshots + conflict) and produce a [`MergeResult`] without ever calling
//! the AI. A handler that cannot keep its determinism promise — notably
//! `combine_props` when two tasks set the same prop to different values —
//! returns `failed`, and the pipeline re-routes the conflict to the
//! resolver.

use std::collections::BTreeMap;

use tracing::debug;

use crate::model::change::ChangeType;
use crate::model::merge::{MergeDecision, MergeResult, MergeStrategy};

use super::StrategyContext;
use super::apply;
use super::helpers;

// ---------------------------------------------------------------------------
// AutoMerger
// ---------------------------------------------------------------------------

/// Dispatches deterministic merge strategies.
#[derive(Clone, Copy, Debug, Default)]
pub struct AutoMerger;

impl AutoMerger {
    /// Whether a handler exists for `strategy`.
    #[must_use]
    pub const fn can_handle(strategy: MergeStrategy) -> bool {
        strategy.is_deterministic()
    }

    /// Run the handler for `strategy` over `context`.
    ///
    /// Unknown strategies produce `failed`; handlers themselves degrade to
    /// `failed` with an error message rather than panic.
    #[must_use]
    pub fn merge(context: &StrategyContext, strategy: MergeStrategy) -> MergeResult {
        debug!(
            file = %context.file_path,
            strategy = %strategy,
            tasks = context.task_snapshots.len(),
            "running auto-merge strategy"
        );
        match strategy {
            MergeStrategy::CombineImports => combine_imports(context),
            MergeStrategy::HooksFirst => hooks_first(context),
            MergeStrategy::HooksThenWrap => hooks_then_wrap(context),
            MergeStrategy::AppendFunctions => append_definitions(context, ChangeType::AddFunction),
            MergeStrategy::AppendMethods => append_methods(context),
            MergeStrategy::AppendStatements => append_statements(context),
            MergeStrategy::CombineProps => combine_props(context),
            MergeStrategy::OrderByDependency => order_by_dependency(context),
            MergeStrategy::OrderByTime => order_by_time(context),
            MergeStrategy::AiRequired | MergeStrategy::HumanRequired => MergeResult::failed(
                context.file_path.clone(),
                format!("No handler for strategy: {strategy}"),
            ),
        }
    }
}

fn success(context: &StrategyContext, content: String, explanation: String) -> MergeResult {
    let mut result = MergeResult::new(MergeDecision::AutoMerged, context.file_path.clone());
    result.merged_content = Some(content);
    result.conflicts_resolved = vec![context.conflict.clone()];
    result.explanation = explanation;
    result
}

// ---------------------------------------------------------------------------
// Imports
// ---------------------------------------------------------------------------

/// Union added imports across tasks, honor removals, splice at the import
/// section end, and deduplicate against the file and each other.
fn combine_imports(context: &StrategyContext) -> MergeResult {
    let ext = context.extension();
    let mut to_add: Vec<String> = Vec::new();
    let mut to_remove: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();

    for snapshot in &context.task_snapshots {
        for change in &snapshot.semantic_changes {
            match change.change_type {
                ChangeType::AddImport => {
                    if let Some(after) = change.content_after.as_deref() {
                        to_add.push(after.trim().to_owned());
                    }
                }
                ChangeType::RemoveImport => {
                    if let Some(before) = change.content_before.as_deref() {
                        to_remove.insert(before.trim().to_owned());
                    }
                }
                _ => {}
            }
        }
    }

    // Drop removed lines first, then splice the surviving new imports.
    let mut lines: Vec<String> = context
        .baseline_content
        .lines()
        .filter(|l| !to_remove.contains(l.trim()))
        .map(ToOwned::to_owned)
        .collect();

    let existing: std::collections::BTreeSet<String> = lines
        .iter()
        .map(|l| l.trim().to_owned())
        .filter(|l| helpers::is_import_line(l, &ext))
        .collect();

    let mut seen = std::collections::BTreeSet::new();
    let new_imports: Vec<String> = to_add
        .into_iter()
        .filter(|imp| {
            !existing.contains(imp) && !to_remove.contains(imp) && seen.insert(imp.clone())
        })
        .collect();

    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    let mut pos = helpers::find_import_section_end(&refs, &ext);
    let added = new_imports.len();
    for imp in new_imports {
        lines.insert(pos, imp);
        pos += 1;
    }

    let mut content = lines.join("\n");
    if context.baseline_content.ends_with('\n') {
        content.push('\n');
    }
    let explanation = format!(
        "Combined {added} imports from {} tasks",
        context.task_snapshots.len()
    );
    success(context, content, explanation)
}

// ---------------------------------------------------------------------------
// Hooks & JSX
// ---------------------------------------------------------------------------

fn conflict_function(context: &StrategyContext) -> Option<&str> {
    context
        .conflict
        .location
        .strip_prefix("function:")
}

/// Insert every task's hook calls at the start of the conflicted function,
/// in task order.
fn hooks_first(context: &StrategyContext) -> MergeResult {
    let hooks: Vec<String> = context
        .task_snapshots
        .iter()
        .flat_map(|s| s.semantic_changes.iter())
        .filter(|c| c.change_type == ChangeType::AddHookCall)
        .filter_map(helpers::extract_hook_call)
        .collect();

    let content = conflict_function(context).map_or_else(
        || context.baseline_content.clone(),
        |func| helpers::insert_hooks_into_function(&context.baseline_content, func, &hooks),
    );
    let explanation = format!("Added {} hooks to function start", hooks.len());
    success(context, content, explanation)
}

/// Hooks first, then wrap the function's return, innermost-first.
fn hooks_then_wrap(context: &StrategyContext) -> MergeResult {
    let mut hooks: Vec<String> = Vec::new();
    let mut wraps: Vec<(String, String)> = Vec::new();
    for snapshot in &context.task_snapshots {
        for change in &snapshot.semantic_changes {
            match change.change_type {
                ChangeType::AddHookCall => {
                    if let Some(hook) = helpers::extract_hook_call(change) {
                        hooks.push(hook);
                    }
                }
                ChangeType::WrapJsx => {
                    if let Some(wrapper) = helpers::extract_jsx_wrapper(change) {
                        wraps.push(wrapper);
                    }
                }
                _ => {}
            }
        }
    }

    let mut content = context.baseline_content.clone();
    if let Some(func) = conflict_function(context) {
        content = helpers::insert_hooks_into_function(&content, func, &hooks);
        for (wrapper, props) in &wraps {
            content = helpers::wrap_function_return(&content, func, wrapper, props);
        }
    }
    let explanation = format!("Added {} hooks and {} JSX wrappers", hooks.len(), wraps.len());
    success(context, content, explanation)
}

// ---------------------------------------------------------------------------
// Appends
// ---------------------------------------------------------------------------

/// Append new definitions (functions, classes, types, interfaces) before
/// any module-export tail.
fn append_definitions(context: &StrategyContext, primary: ChangeType) -> MergeResult {
    let definition_kinds = [
        primary,
        ChangeType::AddClass,
        ChangeType::AddType,
        ChangeType::AddInterface,
    ];
    let ext = context.extension();
    let mut content = context.baseline_content.clone();
    let mut appended = 0_usize;
    for snapshot in &context.task_snapshots {
        for change in &snapshot.semantic_changes {
            if definition_kinds.contains(&change.change_type) && change.content_after.is_some() {
                content = apply::apply_change(&content, change, &ext);
                appended += 1;
            }
        }
    }
    let explanation = format!("Appended {appended} new definitions");
    success(context, content, explanation)
}

/// Insert new methods into their classes (target form `Class.method`).
fn append_methods(context: &StrategyContext) -> MergeResult {
    let mut by_class: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for snapshot in &context.task_snapshots {
        for change in &snapshot.semantic_changes {
            if change.change_type == ChangeType::AddMethod
                && let Some(body) = change.content_after.as_deref()
                && let Some((class, _)) = change.target.split_once('.')
            {
                by_class
                    .entry(class.to_owned())
                    .or_default()
                    .push(body.to_owned());
            }
        }
    }

    let mut content = context.baseline_content.clone();
    let total: usize = by_class.values().map(Vec::len).sum();
    let class_count = by_class.len();
    for (class, methods) in by_class {
        content = helpers::insert_methods_into_class(&content, &class, &methods);
    }
    let explanation = format!("Added {total} methods to {class_count} classes");
    success(context, content, explanation)
}

/// Append additive content at the file end, in task order.
fn append_statements(context: &StrategyContext) -> MergeResult {
    let ext = context.extension();
    let mut content = context.baseline_content.clone();
    let mut appended = 0_usize;
    for snapshot in &context.task_snapshots {
        for change in &snapshot.semantic_changes {
            if change.is_additive() && change.content_after.is_some() {
                content = apply::apply_change(&content, change, &ext);
                appended += 1;
            }
        }
    }
    let explanation = format!("Appended {appended} statements");
    success(context, content, explanation)
}

// ---------------------------------------------------------------------------
// Props
// ---------------------------------------------------------------------------

/// Union new JSX props across tasks at the same site.
///
/// When two tasks add the same prop name with different values there is no
/// deterministic answer; the handler fails and the pipeline escalates to
/// the AI resolver.
fn combine_props(context: &StrategyContext) -> MergeResult {
    // (prop name) -> (value, owning task)
    let mut merged_props: BTreeMap<String, (String, String)> = BTreeMap::new();
    let mut prop_changes = Vec::new();
    for snapshot in &context.task_snapshots {
        for change in &snapshot.semantic_changes {
            if change.change_type == ChangeType::ModifyJsxProps {
                for (name, value) in helpers::extract_new_props(change) {
                    if let Some((existing, owner)) = merged_props.get(&name)
                        && *existing != value
                        && *owner != snapshot.task_id
                    {
                        return MergeResult::failed(
                            context.file_path.clone(),
                            format!(
                                "prop '{name}' set to different values by {owner} and {}",
                                snapshot.task_id
                            ),
                        );
                    }
                    merged_props.insert(name, (value, snapshot.task_id.clone()));
                }
                prop_changes.push(change.clone());
            }
        }
    }

    let Some(first) = prop_changes.first() else {
        return MergeResult::failed(context.file_path.clone(), "no prop changes to combine");
    };
    let Some(site) = first.content_before.as_deref() else {
        return MergeResult::failed(context.file_path.clone(), "prop change missing site content");
    };

    // Start from the first task's rendering of the site, then graft every
    // other task's new props before the closing `>`.
    let mut merged_site = first
        .content_after
        .clone()
        .unwrap_or_else(|| site.to_owned());
    for change in prop_changes.iter().skip(1) {
        for (name, value) in helpers::extract_new_props(change) {
            if merged_site.contains(&format!("{name}=")) {
                continue;
            }
            if let Some(close) = merged_site.rfind('>') {
                let self_closing = merged_site[..close].ends_with('/');
                let insert_at = if self_closing { close - 1 } else { close };
                merged_site.insert_str(insert_at, &format!(" {name}={{{value}}}"));
            }
        }
    }

    let content = helpers::apply_content_change(&context.baseline_content, Some(site), &merged_site);
    let explanation = format!("Combined {} props at one JSX site", merged_props.len());
    success(context, content, explanation)
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

/// Apply all changes in fixed dependency priority order (imports → hooks →
/// bindings → wraps → elements → modifications).
fn order_by_dependency(context: &StrategyContext) -> MergeResult {
    let ext = context.extension();
    let ordered = helpers::sort_changes_by_dependency(&context.task_snapshots);
    let count = ordered.len();
    let mut content = context.baseline_content.clone();
    for change in &ordered {
        content = apply::apply_change(&content, change, &ext);
    }
    success(
        context,
        content,
        format!("Applied {count} changes in dependency order"),
    )
}

/// Apply whole-content substitutions in ascending `started_at` order
/// (snapshot order; ties already broken by task id).
fn order_by_time(context: &StrategyContext) -> MergeResult {
    let mut content = context.baseline_content.clone();
    let mut applied = 0_usize;
    for snapshot in &context.task_snapshots {
        for change in &snapshot.semantic_changes {
            if change.content_before.is_some() && change.content_after.is_some() {
                content = helpers::apply_content_change(
                    &content,
                    change.content_before.as_deref(),
                    change.content_after.as_deref().unwrap_or_default(),
                );
                applied += 1;
            }
        }
    }
    success(
        context,
        content,
        format!("Applied {applied} changes in chronological order"),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
