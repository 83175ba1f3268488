//! Repair Rules
//!
//! Maps pattern ids to literal find/replace pairs. Replacements are
//! positionless: applying one rewrites every occurrence in the module,
//! so a single rule covers repeated findings of the same pattern.

use crate::types::{Issue, Patch, Replacement};

/// Pattern id to replacement pairs. Patterns without an entry have no
/// automatic repair and are left for manual follow-up.
const REPAIR_RULES: &[(&str, &[(&str, &str)])] = &[
    ("eval_usage", &[("eval(", "ast.literal_eval(")]),
    ("bare_except", &[("except:", "except Exception:")]),
    (
        "explicit_bool_compare",
        &[("== True", ""), ("== False", " is False")],
    ),
];

pub struct RepairEngine;

impl RepairEngine {
    pub fn new() -> Self {
        RepairEngine
    }

    /// Build a patch from the repairable subset of `issues`. Unmatched
    /// issues contribute nothing; an all-unmatched list yields an empty
    /// patch, which callers treat as "no applicable repairs".
    pub fn generate_patch(&self, issues: &[Issue]) -> Patch {
        let mut replacements = Vec::new();
        for issue in issues {
            if let Some(rules) = rules_for(&issue.pattern) {
                for (old, new) in rules {
                    replacements.push(Replacement {
                        old: old.to_string(),
                        new: new.to_string(),
                    });
                }
            }
        }
        Patch { replacements }
    }

    /// Pattern ids from `issues` that no rule covers.
    pub fn unrepairable(&self, issues: &[Issue]) -> Vec<String> {
        let mut unmatched: Vec<String> = Vec::new();
        for issue in issues {
            if rules_for(&issue.pattern).is_none() && !unmatched.contains(&issue.pattern) {
                unmatched.push(issue.pattern.clone());
            }
        }
        unmatched
    }
}

impl Default for RepairEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn rules_for(pattern: &str) -> Option<&'static [(&'static str, &'static str)]> {
    REPAIR_RULES
        .iter()
        .find(|(name, _)| *name == pattern)
        .map(|(_, rules)| *rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eval_issue_produces_literal_eval_replacement() {
        let engine = RepairEngine::new();
        let patch = engine.generate_patch(&[Issue::textual("eval_usage", 8, 0, "eval(")]);

        assert_eq!(patch.replacements.len(), 1);
        assert_eq!(patch.replacements[0].old, "eval(");
        assert_eq!(patch.replacements[0].new, "ast.literal_eval(");
    }

    #[test]
    fn test_bool_compare_expands_to_both_replacements() {
        let engine = RepairEngine::new();
        let patch =
            engine.generate_patch(&[Issue::textual("explicit_bool_compare", 1, 0, "== True")]);

        assert_eq!(patch.replacements.len(), 2);
        assert_eq!(patch.replacements[0].old, "== True");
        assert_eq!(patch.replacements[1].old, "== False");
    }

    #[test]
    fn test_bare_except_gets_typed_clause() {
        let engine = RepairEngine::new();
        let patch = engine.generate_patch(&[Issue::structural("bare_except", 4, 3)]);

        assert_eq!(patch.replacements.len(), 1);
        assert_eq!(patch.replacements[0].new, "except Exception:");
    }

    #[test]
    fn test_unknown_patterns_yield_empty_patch() {
        let engine = RepairEngine::new();
        let issues = vec![
            Issue::textual("os_system", 9, 0, "os.system"),
            Issue::textual("subprocess_usage", 9, 10, "subprocess"),
        ];
        let patch = engine.generate_patch(&issues);

        assert!(patch.is_empty());
        assert_eq!(
            engine.unrepairable(&issues),
            vec!["os_system".to_string(), "subprocess_usage".to_string()]
        );
    }

    #[test]
    fn test_mixed_issues_only_repairable_contribute() {
        let engine = RepairEngine::new();
        let issues = vec![
            Issue::textual("eval_usage", 8, 0, "eval("),
            Issue::textual("pickle_usage", 7, 20, "pickle.loads"),
        ];
        let patch = engine.generate_patch(&issues);

        assert_eq!(patch.replacements.len(), 1);
        assert_eq!(engine.unrepairable(&issues), vec!["pickle_usage".to_string()]);
    }
}
