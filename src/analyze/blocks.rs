//! Definition-block extraction.
//!
//! Cuts a named `def`/`function`/`class` block out of a file: indentation
//! scoped for Python, brace matched for JS/TS. Used by the analyzer to
//! capture added-function bodies and by the merge layer to isolate the
//! code a conflict location refers to.

use regex::Regex;

/// An extracted definition block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    /// 1-indexed line of the definition header.
    pub start_line: u32,
    /// 1-indexed last line of the block.
    pub end_line: u32,
    /// The block's text, without a trailing newline.
    pub text: String,
}

/// Extract a Python `def`/`class` block: the header line plus every
/// following line with deeper indentation (interior blank lines included,
/// trailing ones trimmed).
#[must_use]
pub fn python_block(content: &str, keyword: &str, name: &str) -> Option<Block> {
    let lines: Vec<&str> = content.lines().collect();
    let header_re =
        Regex::new(&format!(r"^(\s*){keyword}\s+{}\b", regex::escape(name))).ok()?;

    let (start, indent) = lines.iter().enumerate().find_map(|(i, line)| {
        header_re
            .captures(line)
            .map(|caps| (i, caps.get(1).map_or(0, |m| m.as_str().len())))
    })?;

    let mut end = start + 1;
    while end < lines.len() {
        let line = lines[end];
        if line.trim().is_empty() {
            end += 1;
            continue;
        }
        let line_indent = line.len() - line.trim_start().len();
        if line_indent <= indent {
            break;
        }
        end += 1;
    }
    while end > start + 1 && lines[end - 1].trim().is_empty() {
        end -= 1;
    }

    Some(Block {
        start_line: u32::try_from(start + 1).unwrap_or(u32::MAX),
        end_line: u32::try_from(end).unwrap_or(u32::MAX),
        text: lines[start..end].join("\n"),
    })
}

/// Extract a JS/TS definition block: the header through its balanced
/// closing brace (plus a trailing `);`/`;` for expression forms).
///
/// `kind` is `"class"` or anything else for function-like forms.
#[must_use]
pub fn braced_block(content: &str, kind: &str, name: &str) -> Option<Block> {
    let escaped = regex::escape(name);
    let pattern = if kind == "class" {
        format!(r"class\s+{escaped}[\s{{]")
    } else {
        format!(
            r"(?:function\s+{escaped}\s*\(|(?:const|let|var)\s+{escaped}\s*(?::\s*\w+)?\s*=)"
        )
    };
    let re = Regex::new(&pattern).ok()?;
    let m = re.find(content)?;
    let open = content[m.start()..].find('{')? + m.start();

    let bytes = content.as_bytes();
    let mut depth = 0_i32;
    let mut pos = open;
    while pos < bytes.len() {
        match bytes[pos] {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    let mut end = pos + 1;
                    while end < bytes.len() && (bytes[end] == b')' || bytes[end] == b';') {
                        end += 1;
                    }
                    let start_line = line_of(content, m.start());
                    let end_line = line_of(content, end.saturating_sub(1));
                    return Some(Block {
                        start_line,
                        end_line,
                        text: content[m.start()..end].to_owned(),
                    });
                }
            }
            _ => {}
        }
        pos += 1;
    }
    None
}

/// Extract a function block by extension: Python by indentation, JS/TS by
/// braces.
#[must_use]
pub fn function_block(content: &str, name: &str, ext: &str) -> Option<Block> {
    if ext == ".py" {
        python_block(content, "def", name)
    } else {
        braced_block(content, "function", name)
    }
}

/// 1-indexed line number of a byte offset.
fn line_of(content: &str, offset: usize) -> u32 {
    let offset = offset.min(content.len());
    let count = content.as_bytes()[..offset]
        .iter()
        .filter(|b| **b == b'\n')
        .count()
        + 1;
    u32::try_from(count).unwrap_or(u32::MAX)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn python_block_spans_body() {
        let content = "import os\n\ndef f():\n    a = 1\n    return a\n\ndef g():\n    pass\n";
        let block = python_block(content, "def", "f").expect("block");
        assert_eq!(block.start_line, 3);
        assert_eq!(block.end_line, 5);
        assert_eq!(block.text, "def f():\n    a = 1\n    return a");
    }

    #[test]
    fn python_block_keeps_interior_blanks() {
        let content = "def f():\n    a = 1\n\n    return a\n\nx = 1\n";
        let block = python_block(content, "def", "f").expect("block");
        assert_eq!(block.text, "def f():\n    a = 1\n\n    return a");
    }

    #[test]
    fn python_block_missing_name() {
        assert!(python_block("def g():\n    pass\n", "def", "f").is_none());
    }

    #[test]
    fn braced_block_matches_nesting() {
        let content = "function f() {\n  if (x) { y(); }\n  return 1;\n}\nfunction g() {}\n";
        let block = braced_block(content, "function", "f").expect("block");
        assert_eq!(block.start_line, 1);
        assert_eq!(block.end_line, 4);
        assert!(block.text.ends_with('}'));
    }

    #[test]
    fn braced_block_arrow_with_tail() {
        let content = "const f = () => {\n  return 1;\n};\n";
        let block = braced_block(content, "function", "f").expect("block");
        assert!(block.text.ends_with("};"));
    }

    #[test]
    fn braced_block_class() {
        let content = "class User {\n  name() { return 1; }\n}\n";
        let block = braced_block(content, "class", "User").expect("block");
        assert!(block.text.starts_with("class User {"));
        assert!(block.text.ends_with('}'));
    }

    #[test]
    fn function_block_dispatches_by_extension() {
        assert!(function_block("def f():\n    pass\n", "f", ".py").is_some());
        assert!(function_block("function f() {}\n", "f", ".ts").is_some());
        assert!(function_block("function f() {}\n", "g", ".ts").is_none());
    }
}
