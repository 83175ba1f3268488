//! Syntax Tree Analysis
//!
//! Structural pass over a module's python source. Parses with
//! tree-sitter, counts functions, classes, imports, try blocks, loops
//! and conditionals, and flags bare except clauses and oversized
//! function bodies. Loops and conditionals each feed the complexity
//! counter.

use anyhow::{anyhow, Result};
use tree_sitter::{Node, Parser};

use crate::types::{Issue, ModuleMetrics};

/// Statement count above which a function body is flagged.
const LONG_FUNCTION_STATEMENTS: usize = 50;

/// Result of one structural pass.
pub struct SyntaxAnalysis {
    pub metrics: ModuleMetrics,
    pub issues: Vec<Issue>,
}

/// Either a completed analysis or the location of a syntax error.
pub enum AnalysisOutcome {
    Parsed(SyntaxAnalysis),
    SyntaxError { message: String, line: usize },
}

/// Parse `source` and run the structural pass over it.
///
/// A source that does not parse cleanly is reported as a syntax error
/// with the 1-based line of the first invalid node. Err is reserved for
/// grammar loading failures.
pub fn analyze(source: &str) -> Result<AnalysisOutcome> {
    let mut parser = Parser::new();
    let language = tree_sitter_python::LANGUAGE;
    parser
        .set_language(&language.into())
        .map_err(|e| anyhow!("Failed to load python grammar: {}", e))?;

    let tree = match parser.parse(source, None) {
        Some(t) => t,
        None => {
            return Ok(AnalysisOutcome::SyntaxError {
                message: "invalid syntax".to_string(),
                line: 1,
            })
        }
    };

    let root = tree.root_node();
    if root.has_error() {
        let line = first_error_line(root).unwrap_or(1);
        return Ok(AnalysisOutcome::SyntaxError {
            message: format!("invalid syntax at line {}", line),
            line,
        });
    }

    Ok(AnalysisOutcome::Parsed(collect(root, source.as_bytes())))
}

/// Walk the tree in document order, accumulating metrics and issues.
fn collect(root: Node, source: &[u8]) -> SyntaxAnalysis {
    let mut metrics = ModuleMetrics::default();
    let mut issues = Vec::new();

    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        match node.kind() {
            "function_definition" => {
                metrics.functions += 1;
                check_function_length(&node, source, &mut issues);
            }
            "class_definition" => {
                metrics.classes += 1;
            }
            "import_statement" | "import_from_statement" | "future_import_statement" => {
                metrics.imports += 1;
            }
            "try_statement" => {
                metrics.try_blocks += 1;
                flag_bare_excepts(&node, &mut issues);
            }
            "for_statement" | "while_statement" => {
                metrics.loops += 1;
                metrics.complexity += 1;
            }
            // elif clauses count as conditionals in their own right
            "if_statement" | "elif_clause" => {
                metrics.conditionals += 1;
                metrics.complexity += 1;
            }
            _ => {}
        }

        for i in (0..node.child_count()).rev() {
            if let Some(child) = node.child(i) {
                stack.push(child);
            }
        }
    }

    SyntaxAnalysis { metrics, issues }
}

fn check_function_length(node: &Node, source: &[u8], issues: &mut Vec<Issue>) {
    let body = match node.child_by_field_name("body") {
        Some(b) => b,
        None => return,
    };

    let mut cursor = body.walk();
    let statements = body
        .named_children(&mut cursor)
        .filter(|c| c.kind() != "comment")
        .count();

    if statements > LONG_FUNCTION_STATEMENTS {
        let name = node
            .child_by_field_name("name")
            .and_then(|n| n.utf8_text(source).ok())
            .unwrap_or("unknown")
            .to_string();
        issues.push(Issue {
            pattern: "long_function".to_string(),
            severity: 3,
            position: None,
            line: Some(node.start_position().row + 1),
            matched: None,
            function: Some(name),
            statements: Some(statements),
        });
    }
}

fn flag_bare_excepts(node: &Node, issues: &mut Vec<Issue>) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if child.kind() == "except_clause" && is_bare_except(&child) {
            issues.push(Issue::structural(
                "bare_except",
                4,
                child.start_position().row + 1,
            ));
        }
    }
}

/// A bare except declares no exception type: its only named children
/// are the handler block (and possibly comments).
fn is_bare_except(node: &Node) -> bool {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        match child.kind() {
            "block" | "comment" => continue,
            _ => return false,
        }
    }
    true
}

fn first_error_line(root: Node) -> Option<usize> {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            return Some(node.start_position().row + 1);
        }
        for i in (0..node.child_count()).rev() {
            if let Some(child) = node.child(i) {
                stack.push(child);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(source: &str) -> SyntaxAnalysis {
        match analyze(source).unwrap() {
            AnalysisOutcome::Parsed(a) => a,
            AnalysisOutcome::SyntaxError { message, .. } => {
                panic!("unexpected syntax error: {}", message)
            }
        }
    }

    #[test]
    fn test_counts_basic_metrics() {
        let source = "\
import os
from pathlib import Path

class Runner:
    def start(self):
        for i in items:
            if i:
                work(i)
        while running:
            tick()
";
        let analysis = parsed(source);
        assert_eq!(analysis.metrics.functions, 1);
        assert_eq!(analysis.metrics.classes, 1);
        assert_eq!(analysis.metrics.imports, 2);
        assert_eq!(analysis.metrics.loops, 2);
        assert_eq!(analysis.metrics.conditionals, 1);
        assert_eq!(analysis.metrics.complexity, 3);
    }

    #[test]
    fn test_flags_bare_except() {
        let source = "\
try:
    risky()
except:
    pass
";
        let analysis = parsed(source);
        assert_eq!(analysis.metrics.try_blocks, 1);
        let issue = analysis
            .issues
            .iter()
            .find(|i| i.pattern == "bare_except")
            .unwrap();
        assert_eq!(issue.severity, 4);
        assert_eq!(issue.line, Some(3));
    }

    #[test]
    fn test_typed_except_is_not_flagged() {
        let source = "\
try:
    risky()
except ValueError as e:
    log(e)
";
        let analysis = parsed(source);
        assert!(analysis.issues.iter().all(|i| i.pattern != "bare_except"));
    }

    #[test]
    fn test_elif_counts_as_conditional() {
        let source = "\
if a:
    one()
elif b:
    two()
else:
    three()
";
        let analysis = parsed(source);
        assert_eq!(analysis.metrics.conditionals, 2);
        assert_eq!(analysis.metrics.complexity, 2);
    }

    #[test]
    fn test_flags_long_function() {
        let mut source = String::from("def bulky():\n");
        for i in 0..51 {
            source.push_str(&format!("    v{} = {}\n", i, i));
        }
        let analysis = parsed(&source);
        let issue = analysis
            .issues
            .iter()
            .find(|i| i.pattern == "long_function")
            .unwrap();
        assert_eq!(issue.severity, 3);
        assert_eq!(issue.function.as_deref(), Some("bulky"));
        assert_eq!(issue.statements, Some(51));
    }

    #[test]
    fn test_short_function_is_not_flagged() {
        let analysis = parsed("def small():\n    return 1\n");
        assert!(analysis.issues.iter().all(|i| i.pattern != "long_function"));
    }

    #[test]
    fn test_syntax_error_reports_line() {
        let outcome = analyze("def broken(:\n    pass\n").unwrap();
        match outcome {
            AnalysisOutcome::SyntaxError { line, .. } => assert_eq!(line, 1),
            AnalysisOutcome::Parsed(_) => panic!("expected syntax error"),
        }
    }
}
