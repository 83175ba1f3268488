//! Static Inspector Module
//!
//! Two-pass static analysis for python modules: a syntax-tree walk for
//! structural metrics and findings, and a regex pass for textual
//! patterns. Both passes produce the same issue shape so reports can
//! score them together.

pub mod patterns;
pub mod scan;
pub mod syntax;

pub use patterns::PatternDetector;
pub use scan::StaticInspector;
pub use syntax::{analyze, AnalysisOutcome, SyntaxAnalysis};
