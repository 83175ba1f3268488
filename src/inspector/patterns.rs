//! Textual Pattern Detection
//!
//! Regex scan over raw module source. Catches constructs the syntax-tree
//! walk does not expose directly: dynamic evaluation, subprocess use,
//! unsafe deserialization, and a set of inefficiency heuristics. Tables
//! are fixed and ordered; findings carry the table severity.

use anyhow::{Context, Result};
use regex::Regex;

use crate::types::Issue;

/// Unsafe construct patterns: (regex, pattern id, severity).
const UNSAFE_PATTERNS: &[(&str, &str, u8)] = &[
    (r"eval\s*\(", "eval_usage", 8),
    (r"exec\s*\(", "exec_usage", 8),
    (r"__import__\s*\(", "dynamic_import", 7),
    (r"subprocess", "subprocess_usage", 9),
    (r"os\.system", "os_system", 9),
    (r"open\s*\(.+w", "file_write", 6),
    (r"pickle\.loads?", "pickle_usage", 7),
    (r"yaml\.load\s*\(", "unsafe_yaml", 6),
];

/// Inefficiency heuristics: (regex, pattern id, severity).
const INEFFICIENCY_PATTERNS: &[(&str, &str, u8)] = &[
    (r"for .+ in range\(len\(.+\)\)", "range_len_antipattern", 2),
    (r"== True|== False", "explicit_bool_compare", 1),
    (r"\+= .+\n.*\+= ", "string_concat_loop", 3),
    (r"except:\s*\n\s*pass", "bare_except_pass", 4),
    (r"global\s+\w+", "global_usage", 2),
];

/// Compiled pattern tables. Unsafe findings are reported before
/// inefficiency findings, each table in declaration order.
pub struct PatternDetector {
    unsafe_rules: Vec<(Regex, &'static str, u8)>,
    inefficiency_rules: Vec<(Regex, &'static str, u8)>,
}

impl PatternDetector {
    pub fn new() -> Result<Self> {
        Ok(PatternDetector {
            unsafe_rules: compile_table(UNSAFE_PATTERNS)?,
            inefficiency_rules: compile_table(INEFFICIENCY_PATTERNS)?,
        })
    }

    /// Scan `code` against both tables. Every match becomes one issue
    /// with the byte offset and the matched text (truncated).
    pub fn detect(&self, code: &str) -> Vec<Issue> {
        let mut issues = Vec::new();
        for (re, name, severity) in &self.unsafe_rules {
            for m in re.find_iter(code) {
                issues.push(Issue::textual(name, *severity, m.start(), m.as_str()));
            }
        }
        for (re, name, severity) in &self.inefficiency_rules {
            for m in re.find_iter(code) {
                issues.push(Issue::textual(name, *severity, m.start(), m.as_str()));
            }
        }
        issues
    }
}

fn compile_table(
    table: &[(&str, &'static str, u8)],
) -> Result<Vec<(Regex, &'static str, u8)>> {
    table
        .iter()
        .map(|(pattern, name, severity)| {
            let re = Regex::new(pattern)
                .with_context(|| format!("Invalid detection pattern: {}", name))?;
            Ok((re, *name, *severity))
        })
        .collect()
}
