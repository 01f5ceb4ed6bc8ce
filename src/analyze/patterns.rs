//! Per-language recognizer patterns.
//!
//! Regex-level recognition is a deliberate lower bound: fast, portable
//! across the supported languages, and imprecise in ways the downstream
//! rule base tolerates (unclear pairs demote to AI resolution). Patterns
//! are selected by file extension.

use std::sync::LazyLock;

use regex::Regex;

// ---------------------------------------------------------------------------
// Import recognizers
// ---------------------------------------------------------------------------

static PY_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:from\s+\S+\s+)?import\s+").expect("py import pattern")
});

static JS_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^import\s+").expect("js import pattern"));

/// The import-statement pattern for an extension, or `None` when the
/// language is not supported.
#[must_use]
pub fn import_pattern(ext: &str) -> Option<&'static Regex> {
    match ext {
        ".py" => Some(&PY_IMPORT),
        ".js" | ".jsx" | ".ts" | ".tsx" => Some(&JS_IMPORT),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Function-definition recognizers
// ---------------------------------------------------------------------------

static PY_FUNCTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"def\s+(\w+)\s*\(").expect("py function pattern"));

// `function name(...)` or `const name = (...) =>` / `= function`.
static JS_FUNCTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:function\s+(\w+)|(?:const|let|var)\s+(\w+)\s*=\s*(?:async\s+)?(?:function|\([^)]*\)\s*=>))",
    )
    .expect("js function pattern")
});

// TS additionally allows a type annotation between the name and `=`.
static TS_FUNCTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:function\s+(\w+)|(?:const|let|var)\s+(\w+)\s*(?::\s*\w+)?\s*=\s*(?:async\s+)?(?:function|\([^)]*\)\s*=>))",
    )
    .expect("ts function pattern")
});

/// The function-definition pattern for an extension.
#[must_use]
pub fn function_pattern(ext: &str) -> Option<&'static Regex> {
    match ext {
        ".py" => Some(&PY_FUNCTION),
        ".js" | ".jsx" => Some(&JS_FUNCTION),
        ".ts" | ".tsx" => Some(&TS_FUNCTION),
        _ => None,
    }
}

/// Extract the defined function names from `text`, in first-seen order.
///
/// JS/TS patterns use alternation, so the name may land in either capture
/// group; the first non-empty group wins.
#[must_use]
pub fn function_names(pattern: &Regex, text: &str) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    let mut names = Vec::new();
    for caps in pattern.captures_iter(text) {
        let name = caps
            .iter()
            .skip(1)
            .flatten()
            .map(|m| m.as_str())
            .find(|s| !s.is_empty());
        if let Some(name) = name
            && seen.insert(name.to_owned())
        {
            names.push(name.to_owned());
        }
    }
    names
}

/// Extract `(line_number, name)` for every function-definition line.
///
/// Used to attribute body edits to their enclosing function. Line numbers
/// are 1-indexed.
#[must_use]
pub fn function_definition_lines(pattern: &Regex, text: &str) -> Vec<(u32, String)> {
    let mut defs = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if let Some(caps) = pattern.captures(line) {
            let name = caps
                .iter()
                .skip(1)
                .flatten()
                .map(|m| m.as_str())
                .find(|s| !s.is_empty());
            if let Some(name) = name {
                defs.push((u32::try_from(i + 1).unwrap_or(u32::MAX), name.to_owned()));
            }
        }
    }
    defs
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn python_imports() {
        let p = import_pattern(".py").expect("pattern");
        assert!(p.is_match("import os"));
        assert!(p.is_match("from pathlib import Path"));
        assert!(!p.is_match("x = 1"));
        assert!(!p.is_match("# import nothing"));
    }

    #[test]
    fn js_imports() {
        let p = import_pattern(".tsx").expect("pattern");
        assert!(p.is_match("import React from 'react';"));
        assert!(p.is_match("import { useAuth } from './auth';"));
        assert!(!p.is_match("const x = require('x');"));
    }

    #[test]
    fn unsupported_extension_has_no_patterns() {
        assert!(import_pattern(".rs").is_none());
        assert!(function_pattern(".go").is_none());
    }

    #[test]
    fn python_function_names() {
        let p = function_pattern(".py").expect("pattern");
        let names = function_names(p, "def alpha():\n    pass\n\ndef beta(x, y):\n    pass\n");
        assert_eq!(names, vec!["alpha".to_owned(), "beta".to_owned()]);
    }

    #[test]
    fn js_function_forms() {
        let p = function_pattern(".js").expect("pattern");
        let text = "function classic() {}\nconst arrow = () => {};\nlet anon = function(a) {};\n";
        let names = function_names(p, text);
        assert_eq!(
            names,
            vec!["classic".to_owned(), "arrow".to_owned(), "anon".to_owned()]
        );
    }

    #[test]
    fn ts_typed_arrow() {
        let p = function_pattern(".ts").expect("pattern");
        let names = function_names(p, "const handler: Handler = async (req) => req.body;\n");
        assert_eq!(names, vec!["handler".to_owned()]);
    }

    #[test]
    fn duplicate_names_reported_once() {
        let p = function_pattern(".py").expect("pattern");
        let names = function_names(p, "def f():\n    pass\ndef f():\n    pass\n");
        assert_eq!(names, vec!["f".to_owned()]);
    }

    #[test]
    fn definition_lines_are_one_indexed() {
        let p = function_pattern(".py").expect("pattern");
        let defs =
            function_definition_lines(p, "import os\n\ndef first():\n    pass\n\ndef second():\n");
        assert_eq!(
            defs,
            vec![(3, "first".to_owned()), (6, "second".to_owned())]
        );
    }
}
