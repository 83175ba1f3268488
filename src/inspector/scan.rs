//! Static Inspection
//!
//! Combines the syntax-tree pass and the textual pattern pass into a
//! single severity-scored report per module. Unreadable or unparseable
//! modules produce a severity-10 report instead of an error, so batch
//! callers never lose a slot to one bad file.

use std::fs;

use anyhow::Result;
use tracing::debug;

use crate::inspector::patterns::PatternDetector;
use crate::inspector::syntax::{self, AnalysisOutcome};
use crate::types::{InspectionReport, Issue};

pub struct StaticInspector {
    patterns: PatternDetector,
}

impl StaticInspector {
    pub fn new() -> Result<Self> {
        Ok(StaticInspector {
            patterns: PatternDetector::new()?,
        })
    }

    /// Inspect a single module. Structural findings are listed before
    /// textual ones; report severity is the max across all findings.
    pub fn inspect(&self, path: &str) -> InspectionReport {
        let code = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                debug!("Module unreadable: {} ({})", path, e);
                return InspectionReport::read_failure(path, e.to_string());
            }
        };

        let analysis = match syntax::analyze(&code) {
            Ok(AnalysisOutcome::Parsed(a)) => a,
            Ok(AnalysisOutcome::SyntaxError { message, line }) => {
                debug!("Module does not parse: {} (line {})", path, line);
                return InspectionReport::parse_failure(path, message, line);
            }
            Err(e) => {
                return InspectionReport::read_failure(path, e.to_string());
            }
        };

        let mut issues = analysis.issues;
        issues.extend(self.patterns.detect(&code));

        let severity = issues.iter().map(|i| i.severity).max().unwrap_or(0);
        let recommendations = build_recommendations(&issues);

        debug!(
            "Inspected {}: severity {} with {} issue(s)",
            path,
            severity,
            issues.len()
        );

        InspectionReport {
            path: path.to_string(),
            metrics: analysis.metrics,
            issues,
            severity,
            recommendations,
            error: None,
            syntax_error: None,
            line: None,
        }
    }

    /// Inspect a list of modules in order.
    pub fn inspect_batch(&self, paths: &[String]) -> Vec<InspectionReport> {
        paths.iter().map(|p| self.inspect(p)).collect()
    }
}

/// Advice keyed on pattern id, de-duplicated in first-seen order.
fn build_recommendations(issues: &[Issue]) -> Vec<String> {
    let mut recommendations: Vec<String> = Vec::new();
    for issue in issues {
        if let Some(rec) = recommendation_for(&issue.pattern) {
            if !recommendations.iter().any(|r| r == rec) {
                recommendations.push(rec.to_string());
            }
        }
    }
    recommendations
}

fn recommendation_for(pattern: &str) -> Option<&'static str> {
    match pattern {
        "eval_usage" => Some("Replace eval() with ast.literal_eval() or explicit parsing"),
        "exec_usage" => Some("Avoid exec(); use explicit function calls"),
        "bare_except" => Some("Use specific exception types instead of bare except"),
        "long_function" => Some("Refactor function into smaller units"),
        "subprocess_usage" => Some("Review subprocess usage for security implications"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_module(dir: &tempfile::TempDir, name: &str, code: &str) -> String {
        let path = dir.path().join(name);
        fs::write(&path, code).unwrap();
        path.to_string_lossy().to_string()
    }

    #[test]
    fn test_inspect_clean_module() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_module(&dir, "clean.py", "def add(a, b):\n    return a + b\n");

        let inspector = StaticInspector::new().unwrap();
        let report = inspector.inspect(&path);

        assert_eq!(report.severity, 0);
        assert!(report.issues.is_empty());
        assert!(report.recommendations.is_empty());
        assert_eq!(report.metrics.functions, 1);
    }

    #[test]
    fn test_inspect_unsafe_module() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_module(
            &dir,
            "unsafe.py",
            "def run(cmd):\n    return eval(cmd)\n",
        );

        let inspector = StaticInspector::new().unwrap();
        let report = inspector.inspect(&path);

        assert_eq!(report.severity, 8);
        assert!(report.issues.iter().any(|i| i.pattern == "eval_usage"));
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.contains("literal_eval")));
    }

    #[test]
    fn test_structural_findings_precede_textual() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_module(
            &dir,
            "mixed.py",
            "try:\n    eval(x)\nexcept:\n    pass\n",
        );

        let inspector = StaticInspector::new().unwrap();
        let report = inspector.inspect(&path);

        assert_eq!(report.issues[0].pattern, "bare_except");
        assert!(report.issues.iter().any(|i| i.pattern == "eval_usage"));
        assert_eq!(report.severity, 8);
    }

    #[test]
    fn test_recommendations_are_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_module(&dir, "twice.py", "a = eval(x)\nb = eval(y)\n");

        let inspector = StaticInspector::new().unwrap();
        let report = inspector.inspect(&path);

        assert_eq!(report.issues.len(), 2);
        assert_eq!(report.recommendations.len(), 1);
    }

    #[test]
    fn test_missing_file_yields_severity_ten() {
        let inspector = StaticInspector::new().unwrap();
        let report = inspector.inspect("/nonexistent/module.py");

        assert_eq!(report.severity, 10);
        assert!(report.error.is_some());
    }

    #[test]
    fn test_syntax_error_yields_severity_ten_with_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_module(&dir, "broken.py", "def broken(:\n    pass\n");

        let inspector = StaticInspector::new().unwrap();
        let report = inspector.inspect(&path);

        assert_eq!(report.severity, 10);
        assert!(report.syntax_error.is_some());
        assert_eq!(report.line, Some(1));
    }

    #[test]
    fn test_inspect_batch_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let clean = write_module(&dir, "a.py", "x = 1\n");
        let dirty = write_module(&dir, "b.py", "eval(x)\n");

        let inspector = StaticInspector::new().unwrap();
        let reports = inspector.inspect_batch(&[clean.clone(), dirty.clone()]);

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].path, clean);
        assert_eq!(reports[0].severity, 0);
        assert_eq!(reports[1].severity, 8);
    }
}
