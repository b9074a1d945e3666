//! Patch synthesis: insert `#include` lines after the last existing include.

use crate::core::extractor::is_include_line;
use crate::core::types::{Edit, EditSet, IncludeSet};

/// Return `content` with one `#include <h>` line per header inserted directly
/// after the last include directive (or at the top when there is none).
///
/// Every other line is kept verbatim and in order. The trailing-newline
/// convention and the line ending (`\n` or `\r\n`) of `content` are preserved.
pub fn synthesize_insertion(content: &str, headers: &IncludeSet) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let insert_at = insertion_index(&lines);
    let newline = if content.contains("\r\n") { "\r\n" } else { "\n" };

    let declarations: Vec<String> = headers.iter().map(include_directive).collect();
    let mut out: Vec<&str> = Vec::with_capacity(lines.len() + declarations.len());
    out.extend_from_slice(&lines[..insert_at]);
    out.extend(declarations.iter().map(String::as_str));
    out.extend_from_slice(&lines[insert_at..]);

    let mut replacement = out.join(newline);
    if content.ends_with('\n') {
        replacement.push_str(newline);
    }
    replacement
}

/// Index just past the last include directive; the highest one wins.
fn insertion_index(lines: &[&str]) -> usize {
    lines
        .iter()
        .rposition(|line| is_include_line(line))
        .map_or(0, |idx| idx + 1)
}

/// The `#include <header>` line declaring `header`.
pub fn include_directive(header: &str) -> String {
    format!("#include <{header}>")
}

/// Number of lines in `content` as the engine addresses them.
///
/// The engine splits on `\n` only, and a trailing newline opens one final
/// empty line, so `"a\n"` has two lines. Empty content has none.
pub fn line_count(content: &str) -> usize {
    if content.is_empty() {
        0
    } else {
        content.split('\n').count()
    }
}

/// Build the edit set replacing the whole of `path` (line 1 through the last
/// line of `content`) with `replacement`.
///
/// The range always comes from the content just read, never from an earlier copy.
pub fn whole_file_edit(path: &str, content: &str, replacement: String) -> EditSet {
    EditSet {
        edits: vec![Edit {
            path: path.to_string(),
            start_line: 1,
            end_line: line_count(content),
            replacement,
        }],
    }
}
