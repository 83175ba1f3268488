//! Mender - Type Definitions
//!
//! Shared types for the self-repair pipeline: inspection artifacts,
//! patches, incidents, test results, worker tasks, and the interface
//! traits the components depend on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Inspection ──────────────────────────────────────────────────

/// One detected problem in a module. Structural (tree walk) and textual
/// (pattern match) findings share this shape so the two passes can be
/// unioned before scoring.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Issue {
    /// Pattern id, e.g. `bare_except` or `eval_usage`.
    pub pattern: String,
    /// Severity 0-10.
    pub severity: u8,
    /// Byte offset of the match for textual findings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    /// 1-based source line for structural findings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    /// Matched text, truncated to 50 characters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched: Option<String>,
    /// Function name for `long_function` findings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    /// Body statement count for `long_function` findings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statements: Option<usize>,
}

impl Issue {
    /// A finding produced by the textual pattern pass.
    pub fn textual(pattern: &str, severity: u8, position: usize, matched: &str) -> Self {
        let truncated: String = matched.chars().take(50).collect();
        Issue {
            pattern: pattern.to_string(),
            severity,
            position: Some(position),
            line: None,
            matched: Some(truncated),
            function: None,
            statements: None,
        }
    }

    /// A finding produced by the syntax-tree pass.
    pub fn structural(pattern: &str, severity: u8, line: usize) -> Self {
        Issue {
            pattern: pattern.to_string(),
            severity,
            position: None,
            line: Some(line),
            matched: None,
            function: None,
            statements: None,
        }
    }
}

/// Per-category counts collected by the syntax-tree walk.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModuleMetrics {
    pub functions: usize,
    pub classes: usize,
    pub imports: usize,
    pub try_blocks: usize,
    pub loops: usize,
    pub conditionals: usize,
    pub complexity: usize,
}

/// Aggregate result of one inspection. Unreadable or unparseable modules
/// produce a severity-10 report with the corresponding error field set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InspectionReport {
    pub path: String,
    pub metrics: ModuleMetrics,
    pub issues: Vec<Issue>,
    /// Max severity across all issues; 0 when the module is clean.
    pub severity: u8,
    pub recommendations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub syntax_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl InspectionReport {
    /// Report for a module that could not be read.
    pub fn read_failure(path: &str, error: String) -> Self {
        InspectionReport {
            path: path.to_string(),
            metrics: ModuleMetrics::default(),
            issues: Vec::new(),
            severity: 10,
            recommendations: Vec::new(),
            error: Some(error),
            syntax_error: None,
            line: None,
        }
    }

    /// Report for a module that could not be parsed.
    pub fn parse_failure(path: &str, message: String, line: usize) -> Self {
        InspectionReport {
            path: path.to_string(),
            metrics: ModuleMetrics::default(),
            issues: Vec::new(),
            severity: 10,
            recommendations: Vec::new(),
            error: None,
            syntax_error: Some(message),
            line: Some(line),
        }
    }
}

// ─── Repair ──────────────────────────────────────────────────────

/// A single literal find/replace operation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Replacement {
    pub old: String,
    pub new: String,
}

/// An ordered list of replacements. An empty list means no rule matched
/// any issue ("no applicable repair").
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Patch {
    pub replacements: Vec<Replacement>,
}

impl Patch {
    pub fn is_empty(&self) -> bool {
        self.replacements.is_empty()
    }
}

// ─── Incidents ───────────────────────────────────────────────────

/// One recorded repair attempt on one module. Append-only: incidents are
/// written once and never mutated or deleted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Incident {
    /// `INC-<ms-timestamp>`.
    pub id: String,
    pub module_path: String,
    pub severity: u8,
    pub issues: Vec<Issue>,
    pub logged_at: String,
}

/// Terminal result of `AutonomyEngine::handle_incident`. Every outcome
/// carries an explicit `repaired` flag and, on failure, a `reason` -
/// callers never need to inspect errors to know what happened.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RepairOutcome {
    pub repaired: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<Patch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_passed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rolled_back: Option<bool>,
}

impl RepairOutcome {
    /// A not-repaired outcome with only a reason attached.
    pub fn not_repaired(reason: &str) -> Self {
        RepairOutcome {
            repaired: false,
            reason: Some(reason.to_string()),
            incident_id: None,
            snapshot_id: None,
            patch: None,
            test_passed: None,
            rolled_back: None,
        }
    }
}

// ─── Approvals ───────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
}

/// A privileged action awaiting sign-off. Transitions exactly once from
/// pending to approved or denied and is then retained.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// `APR-<ms-timestamp>`.
    pub id: String,
    pub entity_id: String,
    pub action: String,
    pub context: Value,
    pub requested_at: String,
    pub status: ApprovalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ─── Testing ─────────────────────────────────────────────────────

/// Outcome of running a module in the sandbox. Immutable once created.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestResult {
    pub module_id: String,
    pub passed: bool,
    pub duration_ms: f64,
    pub details: Value,
    pub timestamp: String,
}

/// Summary over a batch of test results.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestReport {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    /// Percentage 0-100.
    pub pass_rate: f64,
    pub avg_duration_ms: f64,
    pub failures: Vec<TestResult>,
}

// ─── Worker Pool ─────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Test,
    Analyze,
    Repair,
    Execute,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Test => "test",
            TaskType::Analyze => "analyze",
            TaskType::Repair => "repair",
            TaskType::Execute => "execute",
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Completed,
    Failed,
}

/// Unit of work submitted to the pool. Transient: tasks are not
/// persisted beyond the run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerTask {
    pub task_id: String,
    pub task_type: TaskType,
    pub payload: Value,
    pub created_at: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl WorkerTask {
    /// Create a task with a generated id.
    pub fn new(task_type: TaskType, payload: Value) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), task_type, payload)
    }

    pub fn with_id(task_id: String, task_type: TaskType, payload: Value) -> Self {
        WorkerTask {
            task_id,
            task_type,
            payload,
            created_at: chrono::Utc::now().to_rfc3339(),
            status: TaskStatus::Pending,
            result: None,
        }
    }
}

/// Per-task entry in a `process_batch` result. Successful dispatches
/// carry the worker id and duration; tasks that failed or could not be
/// placed carry an `error` instead.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskDispatch {
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Snapshot of pool health returned by `get_stats`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolStats {
    pub total_workers: usize,
    pub idle: usize,
    pub busy: usize,
    pub queue_size: usize,
    pub total_completed: u64,
}

/// Seam between the pool's dispatch mechanics and actual task work.
/// Implementations route by task type; errors are caught at the worker
/// boundary and reported as failed dispatches without crashing the pool.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &WorkerTask) -> anyhow::Result<Value>;
}

// ─── Sandbox Interface ───────────────────────────────────────────

/// Resource limits for one sandboxed execution.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SandboxLimits {
    pub cpu_s: u64,
    pub mem_mb: u64,
    pub timeout_s: u64,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        SandboxLimits {
            cpu_s: 2,
            mem_mb: 64,
            timeout_s: 5,
        }
    }
}

/// Structured result of a sandboxed execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SandboxOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<bool>,
    /// Set when the requested entry point does not exist in the module,
    /// so callers can distinguish "no such hook" from "hook failed".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_missing: Option<bool>,
}

impl SandboxOutcome {
    pub fn failure(error: String) -> Self {
        SandboxOutcome {
            ok: false,
            result: None,
            error: Some(error),
            timeout: None,
            entry_missing: None,
        }
    }

    pub fn timed_out() -> Self {
        SandboxOutcome {
            ok: false,
            result: None,
            error: Some("Execution timeout".to_string()),
            timeout: Some(true),
            entry_missing: None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.timeout.unwrap_or(false)
    }

    pub fn is_entry_missing(&self) -> bool {
        self.entry_missing.unwrap_or(false)
    }
}

/// The execution environment contract the tester and engine depend on.
/// Only the interface is fixed here; the isolation mechanism lives
/// behind it.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Run `entry` in the module at `module_path` with `payload` under
    /// the given limits. Never panics: all failures fold into an
    /// outcome with `ok: false`.
    async fn run_module(
        &self,
        module_path: &str,
        entry: &str,
        payload: &Value,
        limits: &SandboxLimits,
    ) -> SandboxOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_textual_issue_truncates_match() {
        let long = "x".repeat(80);
        let issue = Issue::textual("eval_usage", 8, 12, &long);
        assert_eq!(issue.matched.as_deref().map(|m| m.len()), Some(50));
        assert_eq!(issue.position, Some(12));
    }

    #[test]
    fn test_read_failure_report_is_severity_ten() {
        let report = InspectionReport::read_failure("/tmp/missing.py", "gone".to_string());
        assert_eq!(report.severity, 10);
        assert!(report.issues.is_empty());
        assert!(report.error.is_some());
    }

    #[test]
    fn test_task_type_serializes_snake_case() {
        let json = serde_json::to_string(&TaskType::Analyze).unwrap();
        assert_eq!(json, "\"analyze\"");
    }

    #[test]
    fn test_empty_patch() {
        assert!(Patch::default().is_empty());
    }

    #[test]
    fn test_sandbox_outcome_timeout() {
        let outcome = SandboxOutcome::timed_out();
        assert!(!outcome.ok);
        assert!(outcome.is_timeout());
        assert_eq!(outcome.error.as_deref(), Some("Execution timeout"));
    }
}
