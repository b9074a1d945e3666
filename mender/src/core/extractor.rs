//! Diagnostic extraction: map raw build diagnostics to missing standard headers.
//!
//! The rule set is an allow-list. Each known standard-library symbol is paired
//! with the header that declares it, and each symbol gets a small group of
//! compiler-specific signatures. Unrecognized diagnostics yield an empty set;
//! the pipeline treats that as an unsupported failure instead of guessing.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::IncludeSet;

/// Whether a known symbol names a namespace or a type/function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    /// `std::chrono`, `std::this_thread`: diagnostics may name members of the
    /// namespace, and no common header drags the namespace in transitively.
    Namespace,
    /// Class templates and functions. An error about one of their members is
    /// a misuse, not a missing header, and bare usages are often satisfied
    /// transitively (`<iostream>` pulls in `<string>`).
    Type,
}

/// Known `std::` symbols, the header that declares each, and their kind, in rule order.
pub const KNOWN_SYMBOLS: &[(&str, &str, SymbolKind)] = &[
    ("chrono", "chrono", SymbolKind::Namespace),
    ("this_thread", "thread", SymbolKind::Namespace),
    ("thread", "thread", SymbolKind::Type),
    ("vector", "vector", SymbolKind::Type),
    ("string", "string", SymbolKind::Type),
    ("optional", "optional", SymbolKind::Type),
    ("map", "map", SymbolKind::Type),
    ("unordered_map", "unordered_map", SymbolKind::Type),
    ("mutex", "mutex", SymbolKind::Type),
    ("function", "functional", SymbolKind::Type),
    ("unique_ptr", "memory", SymbolKind::Type),
    ("shared_ptr", "memory", SymbolKind::Type),
];

// Compilers quote identifiers with ASCII quotes (clang) or typographic ones (gcc).
const OPEN: &str = "['‘\"]";
const CLOSE: &str = "['’\"]";

struct DiagnosticRule {
    header: &'static str,
    signatures: Vec<Regex>,
    /// Bare-usage pattern for the content scan; namespaces only.
    usage: Option<Regex>,
}

impl DiagnosticRule {
    fn for_symbol(symbol: &'static str, header: &'static str, kind: SymbolKind) -> Self {
        let sym = regex::escape(symbol);
        let mut patterns = vec![
            // clang: no member named 'chrono' in namespace 'std'
            // gcc:   'chrono' is not a member of 'std'
            format!(
                r"(?:no member named|is not a member of)\s+{OPEN}{sym}{CLOSE}\s+in\s+namespace\s+{OPEN}std{CLOSE}"
            ),
            format!(r"{OPEN}{sym}{CLOSE}\s+is not a member of\s+{OPEN}std{CLOSE}"),
            format!(r"{OPEN}std::{sym}{CLOSE}\s+has not been declared"),
        ];
        let usage = match kind {
            SymbolKind::Namespace => {
                // clang, namespace partially declared by another header:
                // no member named 'sleep_for' in namespace 'std::this_thread'
                patterns.push(format!(r"namespace\s+{OPEN}std::{sym}{CLOSE}"));
                Some(Regex::new(&format!(r"\bstd::{sym}::")).expect("usage regex"))
            }
            SymbolKind::Type => None,
        };
        let signatures = patterns
            .iter()
            .map(|p| Regex::new(p).expect("diagnostic signature regex"))
            .collect();
        Self {
            header,
            signatures,
            usage,
        }
    }

    fn matches_diagnostic(&self, text: &str) -> bool {
        self.signatures.iter().any(|re| re.is_match(text))
    }
}

static RULES: LazyLock<Vec<DiagnosticRule>> = LazyLock::new(|| {
    KNOWN_SYMBOLS
        .iter()
        .map(|&(symbol, header, kind)| DiagnosticRule::for_symbol(symbol, header, kind))
        .collect()
});

// gcc: note: 'std::vector' is defined in header '<vector>'; did you forget to '#include <vector>'?
static INCLUDE_HINT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"did you forget to\s+['‘]#include <([A-Za-z_]+)>['’]").expect("include hint regex")
});

static INCLUDE_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*#\s*include\s*[<"]([^>"]+)[>"]"#).expect("include line regex")
});

/// Extract missing headers from build diagnostics.
///
/// Each rule that matches appends its header once; the result is ordered by
/// rule order, then by compiler hints in order of appearance.
pub fn extract_missing(build_stderr: &str) -> IncludeSet {
    let mut missing = IncludeSet::new();
    for rule in RULES.as_slice() {
        if rule.matches_diagnostic(build_stderr) {
            missing.insert(rule.header);
        }
    }
    for caps in INCLUDE_HINT_RE.captures_iter(build_stderr) {
        let header = &caps[1];
        if is_known_header(header) {
            missing.insert(header);
        }
    }
    missing
}

/// Headers implied by qualified namespace usages (`std::chrono::...`) in `content`.
///
/// Some compilers only report the first error, so the file itself is scanned
/// for namespaces whose header may also be missing.
pub fn scan_usages(content: &str) -> IncludeSet {
    let mut used = IncludeSet::new();
    for rule in RULES.as_slice() {
        if rule.usage.as_ref().is_some_and(|re| re.is_match(content)) {
            used.insert(rule.header);
        }
    }
    used
}

/// Headers declared by `#include` lines in `content`, in file order.
pub fn declared_includes(content: &str) -> IncludeSet {
    content
        .lines()
        .filter_map(|line| INCLUDE_LINE_RE.captures(line))
        .map(|caps| caps[1].trim().to_string())
        .collect()
}

/// Whether `line` is an `#include` directive.
pub fn is_include_line(line: &str) -> bool {
    INCLUDE_LINE_RE.is_match(line)
}

/// Merge diagnostics with usages found in `content`, then drop headers the
/// file already declares.
pub fn remaining_missing(extracted: &IncludeSet, content: &str) -> IncludeSet {
    let mut missing = extracted.clone();
    for header in scan_usages(content).iter() {
        missing.insert(header);
    }
    let declared = declared_includes(content);
    missing.retain(|header| !declared.contains(header));
    missing
}

fn is_known_header(header: &str) -> bool {
    KNOWN_SYMBOLS.iter().any(|(_, h, _)| *h == header)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLANG_CHRONO: &str = "main.cpp:7:33: error: no member named 'chrono' in namespace 'std'\n  std::this_thread::sleep_for(std::chrono::milliseconds(10));\n                              ~~~~~^\n";
    const GCC_THREAD: &str = "main.cpp: In function 'int main()':\nmain.cpp:7:8: error: 'std::this_thread' has not been declared\n";

    #[test]
    fn clang_chrono_signature_yields_chrono() {
        assert_eq!(extract_missing(CLANG_CHRONO).to_vec(), vec!["chrono"]);
    }

    #[test]
    fn gcc_typographic_quotes_are_recognized() {
        let stderr = "main.cpp:7:33: error: ‘chrono’ is not a member of ‘std’\n";
        assert_eq!(extract_missing(stderr).to_vec(), vec!["chrono"]);
    }

    #[test]
    fn nested_namespace_maps_this_thread_to_thread() {
        let stderr = "error: no member named 'sleep_for' in namespace 'std::this_thread'\n";
        assert_eq!(extract_missing(stderr).to_vec(), vec!["thread"]);
        assert_eq!(extract_missing(GCC_THREAD).to_vec(), vec!["thread"]);
    }

    #[test]
    fn repeated_signatures_yield_header_once() {
        let stderr = format!("{CLANG_CHRONO}{CLANG_CHRONO}{GCC_THREAD}{GCC_THREAD}");
        assert_eq!(extract_missing(&stderr).to_vec(), vec!["chrono", "thread"]);
    }

    #[test]
    fn include_hint_for_known_header_is_used() {
        let stderr = "note: 'std::vector' is defined in header '<vector>'; did you forget to '#include <vector>'?\n";
        assert_eq!(extract_missing(stderr).to_vec(), vec!["vector"]);
    }

    #[test]
    fn include_hint_for_unknown_header_is_ignored() {
        let stderr = "note: did you forget to '#include <cstdio>'?\n";
        assert!(extract_missing(stderr).is_empty());
    }

    #[test]
    fn unrelated_diagnostics_yield_nothing() {
        let stderr = "/usr/bin/ld: main.o: undefined reference to `foo()'\ncollect2: error: ld returned 1 exit status\n";
        assert!(extract_missing(stderr).is_empty());
        assert!(extract_missing("").is_empty());
    }

    #[test]
    fn member_errors_on_std_types_are_not_missing_headers() {
        let gcc = "main.cpp:5:22: error: 'nposx' is not a member of 'std::string' {aka 'std::__cxx11::basic_string<char>'}\n";
        assert!(extract_missing(gcc).is_empty());
        let clang = "main.cpp:5:22: error: no member named 'emplace_front' in 'std::vector<int>'\n";
        assert!(extract_missing(clang).is_empty());
    }

    #[test]
    fn misspelled_namespace_member_under_gcc_is_not_a_missing_header() {
        let stderr = "main.cpp:6:24: error: 'sleep_fo' is not a member of 'std::this_thread'\n";
        assert!(extract_missing(stderr).is_empty());
    }

    #[test]
    fn scan_usages_ignores_types_satisfied_transitively() {
        let content = "#include <iostream>\nint main() {\n    std::string s;\n    std::vector<int> xs;\n    std::cout << s;\n}\n";
        assert!(scan_usages(content).is_empty());
    }

    #[test]
    fn remaining_missing_keeps_only_reported_header_for_type_usages() {
        let content = "#include <iostream>\n#include <thread>\nint main() {\n    std::string s = \"x\";\n    std::this_thread::sleep_for(std::chrono::milliseconds(1));\n}\n";
        let extracted = extract_missing(CLANG_CHRONO);
        assert_eq!(remaining_missing(&extracted, content).to_vec(), vec!["chrono"]);
    }

    #[test]
    fn scan_usages_respects_token_boundaries() {
        let content = "std::string_view v;\nstd::this_thread::yield();\n";
        assert_eq!(scan_usages(content).to_vec(), vec!["thread"]);
    }

    #[test]
    fn declared_includes_accepts_spacing_variants() {
        let content = "#include <iostream>\n  # include <thread>\n#include \"local.h\"\nint x;\n";
        assert_eq!(
            declared_includes(content).to_vec(),
            vec!["iostream", "thread", "local.h"]
        );
    }

    #[test]
    fn remaining_missing_drops_declared_and_adds_usages() {
        let content = "#include <thread>\nint main() { std::this_thread::sleep_for(std::chrono::seconds(1)); }\n";
        let extracted: IncludeSet = ["thread"].into_iter().collect();
        assert_eq!(remaining_missing(&extracted, content).to_vec(), vec!["chrono"]);
    }

    #[test]
    fn remaining_missing_is_empty_when_all_declared() {
        let content = "#include <thread>\n#include <chrono>\nint main() { std::this_thread::sleep_for(std::chrono::seconds(1)); }\n";
        let extracted: IncludeSet = ["thread"].into_iter().collect();
        assert!(remaining_missing(&extracted, content).is_empty());
    }
}
