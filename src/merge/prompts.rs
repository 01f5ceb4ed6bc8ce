//! Prompt construction and response parsing for AI conflict resolution.
//!
//! Two prompt families live here:
//!
//! - **Minimal-context prompts** — one conflict (or a batch of conflicts in
//!   one file) rendered from [`ConflictContext`](super::resolver::ConflictContext)
//!   text, answered with fenced code blocks.
//! - **Timeline prompts** — the full situational-awareness rendering of a
//!   [`MergeContext`]: branch point, main evolution, task changes, pending
//!   sibling tasks.
//!
//! Plus the conflict-marker tools for whole files bearing git-style
//! `<<<<<<<`/`=======`/`>>>>>>>` markers: parse, prompt per hunk, extract
//! `--- CONFLICT_N RESOLVED ---` answers, and stitch the file back
//! together (unresolved hunks keep the feature side).

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;

use crate::model::timeline::{EventSource, MergeContext};

/// Fixed system prompt: the resolver's role and output contract.
pub const SYSTEM_PROMPT: &str = "You are a merge specialist for parallel development. \
Multiple tasks edited the same code region; your job is to produce a single merged \
version that preserves every task's intent. Respond with exactly one fenced code \
block containing the merged code, and nothing else.";

// ---------------------------------------------------------------------------
// Minimal-context prompts
// ---------------------------------------------------------------------------

/// Render the user prompt for a single conflict.
#[must_use]
pub fn format_merge_prompt(context_text: &str, language: &str) -> String {
    format!(
        "Resolve the following merge conflict.\n\n{context_text}\n\n\
         Produce the complete merged code for this location. Preserve the intent of \
         every task. Reply with one ```{language} code block only."
    )
}

/// Render the user prompt for several conflicts in one file.
///
/// The response is expected to contain one section per location:
/// `--- LOCATION: <location> ---` followed by a fenced code block.
#[must_use]
pub fn format_batch_merge_prompt(
    file_path: &str,
    num_conflicts: usize,
    combined_context: &str,
    language: &str,
) -> String {
    format!(
        "Resolve {num_conflicts} merge conflicts in {file_path}.\n\n{combined_context}\n\n\
         For each conflict, output a section of the form:\n\
         --- LOCATION: <location> ---\n\
         ```{language}\n<merged code for that location>\n```\n\
         Output nothing else."
    )
}

// ---------------------------------------------------------------------------
// Timeline prompt
// ---------------------------------------------------------------------------

const RULE: &str = "───────────────────────────────────────────────────────────────────────────────";
const BAR: &str = "===============================================================================";

/// Render the full situational-awareness merge prompt from a
/// [`MergeContext`].
#[must_use]
pub fn build_timeline_merge_prompt(context: &MergeContext) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "MERGING: {}\nTASK: {} ({})\n\n{BAR}\n",
        context.file_path,
        context.task_id,
        context.task_intent.title
    );

    let _ = writeln!(
        out,
        "TASK'S STARTING POINT\nBranched from commit: {}\nBranched at: {}\n{RULE}\n```\n{}\n```\n\n{BAR}\n",
        short_hash(&context.task_branch_point.commit_hash),
        context.task_branch_point.timestamp.to_rfc3339(),
        context.task_branch_point.content.trim_end()
    );

    out.push_str(&main_evolution_section(context));

    let _ = writeln!(
        out,
        "\nCURRENT MAIN CONTENT (commit {}):\n{RULE}\n```\n{}\n```\n\n{BAR}\n",
        short_hash(&context.current_main_commit),
        context.current_main_content.trim_end()
    );

    let _ = writeln!(
        out,
        "TASK'S CHANGES\nIntent: \"{}\"\n{RULE}\n```\n{}\n```\n\n{BAR}\n",
        context.task_intent.summary(),
        context.task_worktree_content.trim_end()
    );

    out.push_str(&pending_tasks_section(context));

    let _ = writeln!(
        out,
        "\nYOUR TASK:\n\n\
         1. Merge {}'s changes into the current main version\n\n\
         2. PRESERVE all changes from main branch commits listed above\n\n\
         3. APPLY the task's changes so they achieve the stated intent\n\n\
         4. ENSURE COMPATIBILITY with the pending tasks listed above\n\n\
         5. OUTPUT only the complete merged file content\n\n{BAR}",
        context.task_id
    );
    out
}

fn main_evolution_section(context: &MergeContext) -> String {
    if context.main_evolution.is_empty() {
        return format!(
            "MAIN BRANCH EVOLUTION (0 commits since task branched)\n{RULE}\n\
             No changes have been made to main branch since this task started.\n"
        );
    }

    let mut out = format!(
        "MAIN BRANCH EVOLUTION ({} commits since task branched)\n{RULE}\n",
        context.main_evolution.len()
    );
    for event in &context.main_evolution {
        let source_label = match (&event.source, &event.merged_from_task) {
            (EventSource::MergedTask, Some(task)) => format!("MERGED FROM {task}"),
            (EventSource::MergedTask, None) => "MERGED TASK".to_owned(),
            (EventSource::Human, _) => "HUMAN".to_owned(),
        };
        let _ = writeln!(
            out,
            "\nCOMMIT {} [{source_label}]: \"{}\"\nTimestamp: {}\n```\n{}\n```",
            short_hash(&event.commit_hash),
            event.commit_message,
            event.timestamp.to_rfc3339(),
            event.content.trim_end()
        );
    }
    out
}

fn pending_tasks_section(context: &MergeContext) -> String {
    if context.other_pending_tasks.is_empty() {
        return format!("PENDING TASKS\n{RULE}\nNo other active tasks touch this file.\n");
    }
    let mut out = format!(
        "PENDING TASKS ({} other active tasks touch this file)\n{RULE}\n",
        context.other_pending_tasks.len()
    );
    for task in &context.other_pending_tasks {
        let _ = writeln!(
            out,
            "- {} (branched at {}, {} commits behind): {}",
            task.task_id,
            short_hash(&task.branch_point_commit),
            task.commits_behind,
            task.intent
        );
    }
    out.push_str(
        "Avoid rewrites that would make these tasks' pending changes impossible to apply.\n",
    );
    out
}

fn short_hash(hash: &str) -> &str {
    if hash.len() > 12 { &hash[..12] } else { hash }
}

// ---------------------------------------------------------------------------
// Prompt length control
// ---------------------------------------------------------------------------

/// Truncation marker appended to shortened content.
pub const TRUNCATION_MARKER: &str = "... (truncated)";

/// Shrink an over-long prompt to roughly `max_chars` by cutting out the
/// middle, keeping the head and tail intact.
#[must_use]
pub fn optimize_prompt_for_length(prompt: &str, max_chars: usize) -> String {
    if prompt.len() <= max_chars || max_chars < TRUNCATION_MARKER.len() + 2 {
        return prompt.to_owned();
    }
    let keep = max_chars - TRUNCATION_MARKER.len();
    let head = keep * 2 / 3;
    let tail = keep - head;
    let head_end = floor_char_boundary(prompt, head);
    let tail_start = floor_char_boundary(prompt, prompt.len() - tail);
    format!(
        "{}{TRUNCATION_MARKER}{}",
        &prompt[..head_end],
        &prompt[tail_start..]
    )
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    idx = idx.min(s.len());
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

// ---------------------------------------------------------------------------
// Code block extraction
// ---------------------------------------------------------------------------

static ANY_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:[A-Za-z0-9_+-]*)\n(.*?)```").expect("fence pattern")
});

/// Extract the first fenced code block, preferring a fence tagged with
/// `language`.
#[must_use]
pub fn extract_code_block(response: &str, language: &str) -> Option<String> {
    if !language.is_empty() {
        let tagged = Regex::new(&format!(
            r"(?s)```{}\n(.*?)```",
            regex::escape(language)
        ))
        .ok()?;
        if let Some(caps) = tagged.captures(response) {
            return Some(caps[1].trim_end_matches('\n').to_owned());
        }
    }
    ANY_FENCE
        .captures(response)
        .map(|caps| caps[1].trim_end_matches('\n').to_owned())
}

/// Extract the code block for one location from a batch response
/// (`--- LOCATION: <location> ---` sections).
#[must_use]
pub fn extract_batch_code_block(
    response: &str,
    location: &str,
    language: &str,
) -> Option<String> {
    let marker = format!("--- LOCATION: {location} ---");
    let start = response.find(&marker)? + marker.len();
    let section_end = response[start..]
        .find("--- LOCATION:")
        .map_or(response.len(), |rel| start + rel);
    extract_code_block(&response[start..section_end], language)
}

// ---------------------------------------------------------------------------
// Conflict-marker tools
// ---------------------------------------------------------------------------

/// One segment of a conflict-marker-bearing file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MarkerSegment {
    /// Plain text outside any conflict.
    Text(String),
    /// One conflict hunk.
    Conflict {
        /// 1-based conflict index (`CONFLICT_1`, `CONFLICT_2`, ...).
        index: usize,
        /// The `<<<<<<<` (current/main) side.
        ours: String,
        /// The `>>>>>>>` (feature) side.
        theirs: String,
    },
}

impl MarkerSegment {
    /// The `CONFLICT_N` identifier for conflict segments.
    #[must_use]
    pub fn conflict_id(&self) -> Option<String> {
        match self {
            Self::Conflict { index, .. } => Some(format!("CONFLICT_{index}")),
            Self::Text(_) => None,
        }
    }
}

/// Parse git-style conflict markers into an ordered segment list.
///
/// Returns `None` when the content holds no complete conflict hunk.
#[must_use]
pub fn parse_conflict_markers(content: &str) -> Option<Vec<MarkerSegment>> {
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut lines = content.lines().peekable();
    let mut index = 0_usize;
    let mut found_any = false;

    while let Some(line) = lines.next() {
        if line.starts_with("<<<<<<<") {
            let mut ours = String::new();
            let mut theirs = String::new();
            let mut in_theirs = false;
            let mut closed = false;
            for inner in lines.by_ref() {
                if inner.starts_with("=======") {
                    in_theirs = true;
                } else if inner.starts_with(">>>>>>>") {
                    closed = true;
                    break;
                } else if in_theirs {
                    theirs.push_str(inner);
                    theirs.push('\n');
                } else {
                    ours.push_str(inner);
                    ours.push('\n');
                }
            }
            if !closed {
                return None;
            }
            if !text.is_empty() {
                segments.push(MarkerSegment::Text(std::mem::take(&mut text)));
            }
            index += 1;
            found_any = true;
            segments.push(MarkerSegment::Conflict { index, ours, theirs });
        } else {
            text.push_str(line);
            text.push('\n');
        }
    }
    if !text.is_empty() {
        segments.push(MarkerSegment::Text(text));
    }
    found_any.then_some(segments)
}

/// Render the per-hunk resolution request for a parsed marker file.
#[must_use]
pub fn build_conflict_only_prompt(
    file_path: &str,
    segments: &[MarkerSegment],
    language: &str,
) -> String {
    let mut out = format!(
        "The file {file_path} contains merge conflicts. Resolve each conflict below.\n\n"
    );
    for segment in segments {
        if let MarkerSegment::Conflict { index, ours, theirs } = segment {
            let _ = writeln!(
                out,
                "--- CONFLICT_{index} ---\nCURRENT (main):\n```{language}\n{}\n```\nINCOMING (feature):\n```{language}\n{}\n```",
                ours.trim_end(),
                theirs.trim_end()
            );
        }
    }
    let _ = writeln!(
        out,
        "\nFor each conflict, respond with:\n--- CONFLICT_N RESOLVED ---\n```{language}\n<resolved code>\n```"
    );
    out
}

static RESOLUTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)---\s*(CONFLICT_\d+)\s*RESOLVED\s*---\s*\n```(?:[A-Za-z0-9_+-]*)\n(.*?)```")
        .expect("resolution pattern")
});

/// Pull `CONFLICT_N -> resolved code` out of a response.
#[must_use]
pub fn extract_conflict_resolutions(response: &str) -> BTreeMap<String, String> {
    RESOLUTION
        .captures_iter(response)
        .map(|caps| (caps[1].to_owned(), caps[2].to_owned()))
        .collect()
}

/// Stitch a marker file back together from per-hunk resolutions.
///
/// Hunks without a resolution keep the feature (incoming) side.
#[must_use]
pub fn reassemble_with_resolutions(
    segments: &[MarkerSegment],
    resolutions: &BTreeMap<String, String>,
) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            MarkerSegment::Text(text) => out.push_str(text),
            MarkerSegment::Conflict { index, theirs, .. } => {
                let id = format!("CONFLICT_{index}");
                match resolutions.get(&id) {
                    Some(resolved) => {
                        out.push_str(resolved);
                        if !resolved.ends_with('\n') {
                            out.push('\n');
                        }
                    }
                    None => out.push_str(theirs),
                }
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
