//! Splits a normalized module into ordered textual segments.
//!
//! A segment is either an outer function (class methods included) or the
//! lines between such functions. Segments are plain strings and are not
//! individually guaranteed to be valid source. The module is serialized and
//! re-parsed first so that positions come from the canonical text rather
//! than whatever the original file looked like.

use regex::Regex;
use std::sync::OnceLock;

use crate::python::{find_function_ranges, unparse_module, unparse_stmt, Module, ParseError};

/// One segment: zero-based start line, exclusive end line, text.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s+$").expect("static regex"))
}

fn is_whitespace_only(s: &str) -> bool {
    whitespace_re().is_match(s)
}

/// Segment a (normalized) module.
pub fn segment(module: &Module) -> Result<Vec<Segment>, ParseError> {
    segment_source(&unparse_module(module))
}

/// Segment canonical source text directly.
pub fn segment_source(text: &str) -> Result<Vec<Segment>, ParseError> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let ranges = find_function_ranges(text)?;
    let lines: Vec<&str> = text.split_inclusive('\n').collect();

    let mut out = Vec::new();
    let mut prev = 0usize;
    for (start, end, func) in ranges {
        if prev != start {
            if let Some(between) = between_segment(&lines[prev..start]) {
                out.push(Segment { start: prev, end: start, text: between });
            }
        }
        out.push(Segment { start, end, text: unparse_stmt(&func) });
        prev = end;
    }
    if prev != lines.len() {
        if let Some(between) = between_segment(&lines[prev..]) {
            out.push(Segment { start: prev, end: lines.len(), text: between });
        }
    }
    Ok(out)
}

/// Join the lines between two covered ranges: whitespace-only bookend lines
/// stripped, dedented to column zero. `None` when nothing remains.
fn between_segment(lines: &[&str]) -> Option<String> {
    let mut slice = lines;
    while let Some(first) = slice.first() {
        if is_whitespace_only(first) {
            slice = &slice[1..];
        } else {
            break;
        }
    }
    while let Some(last) = slice.last() {
        if is_whitespace_only(last) {
            slice = &slice[..slice.len() - 1];
        } else {
            break;
        }
    }
    let joined: String = slice.concat();
    if joined.is_empty() || is_whitespace_only(&joined) {
        return None;
    }
    Some(dedent(&joined))
}

/// Remove the longest common leading whitespace from all content lines.
fn dedent(text: &str) -> String {
    let mut margin: Option<&str> = None;
    for line in text.split_inclusive('\n') {
        let content = line.strip_suffix('\n').unwrap_or(line);
        if content.trim().is_empty() {
            continue;
        }
        let trimmed = content.trim_start_matches([' ', '\t']);
        let indent = &content[..content.len() - trimmed.len()];
        margin = Some(match margin {
            None => indent,
            Some(m) => common_prefix(m, indent),
        });
    }
    match margin {
        None | Some("") => text.to_string(),
        Some(margin) => text
            .split_inclusive('\n')
            .map(|line| line.strip_prefix(margin).unwrap_or(line))
            .collect(),
    }
}

fn common_prefix<'a>(a: &'a str, b: &str) -> &'a str {
    let mut end = 0;
    for (ca, cb) in a.chars().zip(b.chars()) {
        if ca != cb {
            break;
        }
        end += ca.len_utf8();
    }
    &a[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::python::parse_module;

    fn segs(src: &str) -> Vec<(usize, usize, String)> {
        segment(&parse_module(src).expect("parse"))
            .expect("segment")
            .into_iter()
            .map(|s| (s.start, s.end, s.text))
            .collect()
    }

    #[test]
    fn test_basic_split() {
        let actual = segs("def f():\n    pass\n\ndef g():\n    pass");
        assert_eq!(actual[0], (0, 2, "def f():\n    pass".to_string()));
        assert_eq!(actual[1], (3, 5, "def g():\n    pass".to_string()));
    }

    #[test]
    fn test_split_between() {
        let actual = segs("def f():\n    pass\n\nimport foo\n\ndef g():\n    pass");
        assert_eq!(actual[0], (0, 2, "def f():\n    pass".to_string()));
        assert_eq!(actual[1], (2, 4, "import foo\n".to_string()));
        assert_eq!(actual[2], (4, 6, "def g():\n    pass".to_string()));
    }

    #[test]
    fn test_split_after() {
        let actual = segs("def f():\n    pass\n\nimport foo");
        assert_eq!(actual[0], (0, 2, "def f():\n    pass".to_string()));
        assert_eq!(actual[1], (2, 3, "import foo".to_string()));
    }

    #[test]
    fn test_class_with_method() {
        let actual = segs("class X:\n    def func(self):\n        pass\n    var1 = 1\nvar2 = 2");
        assert_eq!(actual.len(), 3);
        assert_eq!(actual[0].2, "class X:\n");
        // methods are unparsed from scratch, so they land at column zero
        assert_eq!(actual[1].2, "def func(self):\n    pass");
        assert_eq!(actual[2].2, "    var1 = 1\nvar2 = 2");
    }

    #[test]
    fn test_no_functions_single_segment() {
        let actual = segs("import foo\nx = 1");
        assert_eq!(actual, vec![(0, 2, "import foo\nx = 1".to_string())]);
    }

    #[test]
    fn test_empty_module_no_segments() {
        assert!(segs("").is_empty());
    }

    #[test]
    fn test_decorated_function_range() {
        let actual = segs("@dec\ndef f():\n    pass");
        assert_eq!(actual.len(), 1);
        assert_eq!(actual[0], (0, 3, "@dec\ndef f():\n    pass".to_string()));
    }

    #[test]
    fn test_segments_never_whitespace_only() {
        for src in ["def f():\n    pass\n\n\n", "x = 1\n\n\ndef f():\n    pass"] {
            for seg in segs(src) {
                assert!(!seg.2.trim().is_empty());
            }
        }
    }

    #[test]
    fn test_dedent() {
        assert_eq!(dedent("    a\n      b\n"), "a\n  b\n");
        assert_eq!(dedent("a\n    b\n"), "a\n    b\n");
        assert_eq!(dedent("    a\n\n    b\n"), "a\n\nb\n");
    }
}
