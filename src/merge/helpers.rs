//! Splice helpers shared by the deterministic strategies.
//!
//! These are text-level operations: locating the import section, inserting
//! hook calls at a function's opening brace, wrapping a return expression,
//! inserting methods before a class's closing brace. They are regex- and
//! scan-based rather than AST-based, matching the analyzer's precision
//! level; anything they cannot place lands with the AI resolver instead.

use std::sync::LazyLock;

use regex::Regex;

use crate::model::change::{ChangeType, SemanticChange};
use crate::model::evolution::TaskSnapshot;

// ---------------------------------------------------------------------------
// Import section
// ---------------------------------------------------------------------------

/// Whether a (trimmed) line is an import statement for the language.
#[must_use]
pub fn is_import_line(line: &str, ext: &str) -> bool {
    match ext {
        ".py" => line.starts_with("import ") || line.starts_with("from "),
        ".js" | ".jsx" | ".ts" | ".tsx" => {
            line.starts_with("import ") || line.starts_with("export ")
        }
        _ => false,
    }
}

/// Index of the line just past the import section (0 when there is none).
///
/// The import section ends at the first non-empty, non-comment line after
/// the last import.
#[must_use]
pub fn find_import_section_end(lines: &[&str], ext: &str) -> usize {
    let mut last_import_line = 0;
    for (i, line) in lines.iter().enumerate() {
        let stripped = line.trim();
        if is_import_line(stripped, ext) {
            last_import_line = i + 1;
        } else if !stripped.is_empty()
            && !stripped.starts_with('#')
            && !stripped.starts_with("//")
            && last_import_line > 0
        {
            break;
        }
    }
    last_import_line
}

// ---------------------------------------------------------------------------
// Hook calls
// ---------------------------------------------------------------------------

static HOOK_CALL_DESTRUCTURED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(const\s*\{[^}]+\}\s*=\s*)?use\w+\([^)]*\);?").expect("hook pattern")
});

/// Extract the hook call (with optional destructuring) from a change.
#[must_use]
pub fn extract_hook_call(change: &SemanticChange) -> Option<String> {
    let content = change.content_after.as_deref()?;
    HOOK_CALL_DESTRUCTURED
        .find(content)
        .map(|m| m.as_str().to_owned())
}

/// Insert hook calls right after the opening brace of `func_name`'s body.
///
/// Recognizes `function Name(...) {`, `const Name = (...) => {`, and
/// `const Name = function(...) {` forms. When the function cannot be
/// located the content is returned unchanged.
#[must_use]
pub fn insert_hooks_into_function(content: &str, func_name: &str, hooks: &[String]) -> String {
    if hooks.is_empty() {
        return content.to_owned();
    }
    let escaped = regex::escape(func_name);
    let patterns = [
        format!(r"function\s+{escaped}\s*\([^)]*\)\s*\{{"),
        format!(r"(?:const|let|var)\s+{escaped}\s*=\s*(?:async\s+)?(?:\([^)]*\)|[^=\n]+)\s*=>\s*\{{"),
        format!(r"(?:const|let|var)\s+{escaped}\s*=\s*function\s*\([^)]*\)\s*\{{"),
    ];

    for pattern in &patterns {
        let Ok(re) = Regex::new(pattern) else {
            continue;
        };
        if let Some(m) = re.find(content) {
            let insert_pos = m.end();
            let hook_text: String = hooks
                .iter()
                .map(|h| format!("\n  {h}"))
                .collect();
            let mut out = String::with_capacity(content.len() + hook_text.len());
            out.push_str(&content[..insert_pos]);
            out.push_str(&hook_text);
            out.push_str(&content[insert_pos..]);
            return out;
        }
    }
    content.to_owned()
}

// ---------------------------------------------------------------------------
// JSX wrapping
// ---------------------------------------------------------------------------

static JSX_WRAPPER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(\w+)([^>]*)>").expect("jsx wrapper pattern"));

/// Extract the wrapping component name and its props from a change.
#[must_use]
pub fn extract_jsx_wrapper(change: &SemanticChange) -> Option<(String, String)> {
    let content = change.content_after.as_deref()?;
    JSX_WRAPPER.captures(content).map(|caps| {
        (
            caps[1].to_owned(),
            caps.get(2).map_or("", |m| m.as_str()).trim().to_owned(),
        )
    })
}

/// Wrap the return expression of `func_name` in `<wrapper props>...</wrapper>`.
///
/// Handles `return (...)` (balanced parens) and `return <jsx ...>;` forms.
/// Applied repeatedly, earlier wraps end up innermost. Unlocatable returns
/// leave the content unchanged.
#[must_use]
pub fn wrap_function_return(
    content: &str,
    func_name: &str,
    wrapper_name: &str,
    wrapper_props: &str,
) -> String {
    // Narrow the search to just past the function header when we can find
    // it; otherwise operate on the first return in the file.
    let start = {
        let escaped = regex::escape(func_name);
        Regex::new(&format!(
            r"(?:function\s+{escaped}\s*\(|(?:const|let|var)\s+{escaped}\s*=)"
        ))
        .ok()
        .and_then(|re| re.find(content))
        .map_or(0, |m| m.end())
    };

    let Some(rel_ret) = content[start..].find("return") else {
        return content.to_owned();
    };
    let ret_pos = start + rel_ret;
    let after_return = &content[ret_pos + "return".len()..];
    let trimmed_offset = after_return.len() - after_return.trim_start().len();
    let expr_start = ret_pos + "return".len() + trimmed_offset;
    let rest = &content[expr_start..];

    let props = if wrapper_props.is_empty() {
        String::new()
    } else {
        format!(" {wrapper_props}")
    };

    let (expr_end, inner) = if rest.starts_with('(') {
        // Balanced-paren scan for `return ( ... )`.
        let mut depth = 0_i32;
        let mut end = None;
        for (i, c) in rest.char_indices() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(i);
                        break;
                    }
                }
                _ => {}
            }
        }
        let Some(end) = end else {
            return content.to_owned();
        };
        (expr_start + end + 1, rest[1..end].trim().to_owned())
    } else if rest.starts_with('<') {
        // `return <jsx ...>;` — the expression runs to the next semicolon.
        let Some(semi) = rest.find(';') else {
            return content.to_owned();
        };
        (expr_start + semi, rest[..semi].trim().to_owned())
    } else {
        return content.to_owned();
    };

    let wrapped = if rest.starts_with('(') {
        format!(
            "(\n    <{wrapper_name}{props}>\n      {inner}\n    </{wrapper_name}>\n  )"
        )
    } else {
        format!("<{wrapper_name}{props}>{inner}</{wrapper_name}>")
    };

    let mut out = String::with_capacity(content.len() + wrapped.len());
    out.push_str(&content[..expr_start]);
    out.push_str(&wrapped);
    out.push_str(&content[expr_end..]);
    out
}

// ---------------------------------------------------------------------------
// Function / method insertion
// ---------------------------------------------------------------------------

/// Line index to insert new functions at: just before a trailing
/// `module.exports` / `export default`, or `None` to append at file end.
#[must_use]
pub fn find_function_insert_position(content: &str) -> Option<usize> {
    let lines: Vec<&str> = content.lines().collect();
    for (i, line) in lines.iter().enumerate().rev() {
        let stripped = line.trim();
        if stripped.starts_with("module.exports") || stripped.starts_with("export default") {
            return Some(i);
        }
    }
    None
}

/// Insert methods before the closing brace of `class_name`'s body
/// (brace-matched). Unlocatable classes leave the content unchanged.
#[must_use]
pub fn insert_methods_into_class(content: &str, class_name: &str, methods: &[String]) -> String {
    if methods.is_empty() {
        return content.to_owned();
    }
    let escaped = regex::escape(class_name);
    let Ok(re) = Regex::new(&format!(
        r"class\s+{escaped}\s*(?:extends\s+\w+\s*)?\{{"
    )) else {
        return content.to_owned();
    };
    let Some(m) = re.find(content) else {
        return content.to_owned();
    };

    let mut depth = 1_i32;
    let mut pos = m.end();
    let bytes = content.as_bytes();
    while pos < bytes.len() && depth > 0 {
        match bytes[pos] {
            b'{' => depth += 1,
            b'}' => depth -= 1,
            _ => {}
        }
        pos += 1;
    }
    if depth != 0 {
        return content.to_owned();
    }

    let insert_pos = pos - 1;
    let method_text: String = methods
        .iter()
        .map(|mth| format!("\n\n  {mth}"))
        .collect::<String>()
        + "\n";
    let mut out = String::with_capacity(content.len() + method_text.len());
    out.push_str(&content[..insert_pos]);
    out.push_str(&method_text);
    out.push_str(&content[insert_pos..]);
    out
}

// ---------------------------------------------------------------------------
// Props
// ---------------------------------------------------------------------------

static PROP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w+)=\{([^}]+)\}").expect("prop pattern"));

/// Props present in `content_after` but not `content_before`, as
/// `(name, value)` pairs.
#[must_use]
pub fn extract_new_props(change: &SemanticChange) -> Vec<(String, String)> {
    let (Some(after), Some(before)) =
        (change.content_after.as_deref(), change.content_before.as_deref())
    else {
        return Vec::new();
    };
    let before_names: std::collections::BTreeSet<&str> = PROP
        .captures_iter(before)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    PROP.captures_iter(after)
        .filter(|c| !before_names.contains(&c[1]))
        .map(|c| (c[1].to_owned(), c[2].to_owned()))
        .collect()
}

// ---------------------------------------------------------------------------
// Content substitution & ordering
// ---------------------------------------------------------------------------

/// Replace the first occurrence of `old` with `new`; no-op when `old` is
/// absent or empty.
#[must_use]
pub fn apply_content_change(content: &str, old: Option<&str>, new: &str) -> String {
    match old {
        Some(old) if !old.is_empty() && content.contains(old) => {
            content.replacen(old, new, 1)
        }
        _ => content.to_owned(),
    }
}

/// Fixed application priority for dependency-ordered merges: imports first,
/// then hooks and bindings, then structure, then modifications.
#[must_use]
pub const fn change_priority(change_type: ChangeType) -> u8 {
    match change_type {
        ChangeType::AddImport => 0,
        ChangeType::AddHookCall => 1,
        ChangeType::AddVariable | ChangeType::AddConstant => 2,
        ChangeType::WrapJsx => 3,
        ChangeType::AddJsxElement => 4,
        ChangeType::ModifyFunction | ChangeType::ModifyJsxProps => 5,
        _ => 10,
    }
}

/// Flatten all snapshots' changes and stable-sort them by
/// [`change_priority`]. Snapshot order (already `started_at`-sorted)
/// breaks ties.
#[must_use]
pub fn sort_changes_by_dependency(snapshots: &[TaskSnapshot]) -> Vec<SemanticChange> {
    let mut changes: Vec<SemanticChange> = snapshots
        .iter()
        .flat_map(|s| s.semantic_changes.iter().cloned())
        .collect();
    changes.sort_by_key(|c| change_priority(c.change_type));
    changes
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn change_with_after(change_type: ChangeType, after: &str) -> SemanticChange {
        SemanticChange::new(change_type, "t", "function:App", 1, 1).with_content_after(after)
    }

    #[test]
    fn import_section_end_python() {
        let lines = vec!["import os", "import sys", "", "x = 1"];
        assert_eq!(find_import_section_end(&lines, ".py"), 2);
    }

    #[test]
    fn import_section_end_skips_comments() {
        let lines = vec!["# header", "import os", "# note", "import sys", "x = 1"];
        assert_eq!(find_import_section_end(&lines, ".py"), 4);
    }

    #[test]
    fn import_section_end_none() {
        let lines = vec!["x = 1", "y = 2"];
        assert_eq!(find_import_section_end(&lines, ".py"), 0);
    }

    #[test]
    fn extract_hook_with_destructuring() {
        let change = change_with_after(
            ChangeType::AddHookCall,
            "  const {user} = useAuth();\n",
        );
        assert_eq!(
            extract_hook_call(&change).as_deref(),
            Some("const {user} = useAuth();")
        );
    }

    #[test]
    fn extract_bare_hook() {
        let change = change_with_after(ChangeType::AddHookCall, "useEffect(() => {});");
        // The call itself is matched up to the first closing paren — the
        // regex is shallow by design.
        assert!(extract_hook_call(&change).expect("hook").starts_with("useEffect("));
    }

    #[test]
    fn insert_hooks_classic_function() {
        let content = "function App() {\n  return <Main/>;\n}\n";
        let hooks = vec!["const {user} = useAuth();".to_owned()];
        let out = insert_hooks_into_function(content, "App", &hooks);
        assert!(out.starts_with("function App() {\n  const {user} = useAuth();\n"));
    }

    #[test]
    fn insert_hooks_arrow_function() {
        let content = "const App = () => {\n  return <Main/>;\n};\n";
        let out =
            insert_hooks_into_function(content, "App", &["useTheme();".to_owned()]);
        assert!(out.contains("=> {\n  useTheme();"));
    }

    #[test]
    fn insert_hooks_unknown_function_is_noop() {
        let content = "function Other() {}\n";
        let out = insert_hooks_into_function(content, "App", &["useX();".to_owned()]);
        assert_eq!(out, content);
    }

    #[test]
    fn extract_wrapper_with_props() {
        let change = change_with_after(ChangeType::WrapJsx, "<ThemeProvider theme={dark}>");
        assert_eq!(
            extract_jsx_wrapper(&change),
            Some(("ThemeProvider".to_owned(), "theme={dark}".to_owned()))
        );
    }

    #[test]
    fn wrap_simple_return() {
        let content = "function App() {\n  return <Main/>;\n}\n";
        let out = wrap_function_return(content, "App", "ThemeProvider", "");
        assert!(out.contains("return <ThemeProvider><Main/></ThemeProvider>;"));
    }

    #[test]
    fn wrap_parenthesized_return() {
        let content = "function App() {\n  return (\n    <Main/>\n  );\n}\n";
        let out = wrap_function_return(content, "App", "Theme", "mode=\"dark\"");
        assert!(out.contains("<Theme mode=\"dark\">"));
        assert!(out.contains("</Theme>"));
        assert!(out.contains("<Main/>"));
    }

    #[test]
    fn double_wrap_nests_first_innermost() {
        let content = "function App() {\n  return <Main/>;\n}\n";
        let once = wrap_function_return(content, "App", "Inner", "");
        let twice = wrap_function_return(&once, "App", "Outer", "");
        assert!(twice.contains("<Outer><Inner><Main/></Inner></Outer>"));
    }

    #[test]
    fn function_insert_position_before_exports() {
        let content = "function a() {}\n\nmodule.exports = { a };\n";
        assert_eq!(find_function_insert_position(content), Some(2));
        assert_eq!(find_function_insert_position("function a() {}\n"), None);
    }

    #[test]
    fn insert_methods_before_class_close() {
        let content = "class User {\n  name() { return this.n; }\n}\n";
        let out = insert_methods_into_class(
            content,
            "User",
            &["email() { return this.e; }".to_owned()],
        );
        assert!(out.contains("email() { return this.e; }"));
        // The method lands inside the class body.
        let class_close = out.rfind('}').expect("close");
        let method_pos = out.find("email()").expect("method");
        assert!(method_pos < class_close);
    }

    #[test]
    fn insert_methods_nested_braces() {
        let content = "class A {\n  f() { if (x) { y(); } }\n}\nclass B {}\n";
        let out = insert_methods_into_class(content, "A", &["g() {}".to_owned()]);
        let a_end = out.find("class B").expect("class B");
        assert!(out.find("g() {}").expect("method") < a_end);
    }

    #[test]
    fn new_props_are_diffed() {
        let change = SemanticChange::new(ChangeType::ModifyJsxProps, "Button", "jsx:Button", 1, 1)
            .with_content_before("<Button size={small}>")
            .with_content_after("<Button size={small} color={red}>");
        assert_eq!(
            extract_new_props(&change),
            vec![("color".to_owned(), "red".to_owned())]
        );
    }

    #[test]
    fn apply_content_change_first_occurrence_only() {
        let out = apply_content_change("a b a", Some("a"), "c");
        assert_eq!(out, "c b a");
        assert_eq!(apply_content_change("x", Some("missing"), "y"), "x");
        assert_eq!(apply_content_change("x", None, "y"), "x");
    }

    #[test]
    fn dependency_sort_orders_imports_first() {
        use chrono::TimeZone as _;
        let ts = chrono::Utc.timestamp_opt(1_700_000_000, 0).single().expect("ts");
        let mut snap = TaskSnapshot::new("t1", "", ts);
        snap.semantic_changes = vec![
            change_with_after(ChangeType::WrapJsx, "<P>"),
            change_with_after(ChangeType::AddImport, "import x"),
            change_with_after(ChangeType::AddHookCall, "useX();"),
        ];
        let sorted = sort_changes_by_dependency(&[snap]);
        let kinds: Vec<ChangeType> = sorted.iter().map(|c| c.change_type).collect();
        assert_eq!(
            kinds,
            vec![ChangeType::AddImport, ChangeType::AddHookCall, ChangeType::WrapJsx]
        );
    }
}
