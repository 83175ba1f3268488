//! Autonomous Tester
//!
//! Runs module entry points in the sandbox and turns the outcomes into
//! test results, batch reports, and incident payloads. Batch testing
//! fans out across tasks behind a semaphore so a large module set
//! cannot exhaust the runtime.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::types::{Sandbox, SandboxLimits, SandboxOutcome, TestReport, TestResult};

/// Entry point invoked when testing a module.
const TEST_ENTRY: &str = "execute";

pub const DEFAULT_ANOMALY_THRESHOLD_MS: u64 = 1000;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub issues: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub anomalies: Vec<String>,
    pub has_anomaly: bool,
}

pub struct AutonomousTester {
    sandbox: Arc<dyn Sandbox>,
    limits: SandboxLimits,
    max_workers: usize,
    results: Mutex<Vec<TestResult>>,
}

impl AutonomousTester {
    pub fn new(sandbox: Arc<dyn Sandbox>, max_workers: usize) -> Self {
        AutonomousTester {
            sandbox,
            limits: SandboxLimits::default(),
            max_workers: max_workers.max(1),
            results: Mutex::new(Vec::new()),
        }
    }

    /// Run one module's `execute` entry under the standard limits.
    pub async fn test_module(&self, module_path: &str, payload: Option<&Value>) -> TestResult {
        run_one(
            self.sandbox.clone(),
            self.limits,
            module_path,
            payload.cloned(),
        )
        .await
    }

    /// Test many modules concurrently, at most `max_workers` at a time.
    /// Results arrive in completion order and are also retained on the
    /// tester for later reporting.
    pub async fn test_batch(
        &self,
        module_paths: &[String],
        payloads: Option<&HashMap<String, Value>>,
    ) -> Vec<TestResult> {
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut set = JoinSet::new();

        for path in module_paths {
            let semaphore = semaphore.clone();
            let sandbox = self.sandbox.clone();
            let limits = self.limits;
            let path = path.clone();
            let payload = payloads.and_then(|m| m.get(&path)).cloned();

            set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return failed_result(&path, "test semaphore closed");
                    }
                };
                run_one(sandbox, limits, &path, payload).await
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!("Test task failed to join: {}", e),
            }
        }

        info!(
            "Tested {} module(s): {} passed",
            results.len(),
            results.iter().filter(|r| r.passed).count()
        );
        self.results.lock().unwrap().extend(results.iter().cloned());
        results
    }

    /// Everything tested through this instance so far.
    pub fn all_results(&self) -> Vec<TestResult> {
        self.results.lock().unwrap().clone()
    }

    /// Minimal output contract: a JSON object carrying an `ok` or
    /// `status` key, and never an error alongside `ok=true`.
    pub fn validate_output(&self, result: &Value) -> ValidationReport {
        let mut issues = Vec::new();

        if !result.is_object() {
            issues.push("Output is not a JSON object".to_string());
            return ValidationReport {
                valid: false,
                issues,
            };
        }

        if result.get("ok").is_none() && result.get("status").is_none() {
            issues.push("Missing ok/status field".to_string());
        }

        let ok = result.get("ok").and_then(Value::as_bool).unwrap_or(true);
        if field_is_truthy(result, "error") && ok {
            issues.push("Error present but ok=true".to_string());
        }

        ValidationReport {
            valid: issues.is_empty(),
            issues,
        }
    }

    /// Flag slow executions and internal timeouts.
    pub fn detect_performance_anomaly(
        &self,
        result: &TestResult,
        threshold_ms: u64,
    ) -> AnomalyReport {
        let mut anomalies = Vec::new();

        if result.duration_ms > threshold_ms as f64 {
            anomalies.push(format!(
                "Slow execution: {:.1}ms > {}ms",
                result.duration_ms, threshold_ms
            ));
        }
        if field_is_truthy(&result.details, "timeout") {
            anomalies.push("Execution timed out".to_string());
        }

        AnomalyReport {
            has_anomaly: !anomalies.is_empty(),
            anomalies,
        }
    }

    /// Summarise a batch of results.
    pub fn generate_report(&self, results: &[TestResult]) -> TestReport {
        let total = results.len();
        let passed = results.iter().filter(|r| r.passed).count();
        let failed = total - passed;
        let pass_rate = if total > 0 {
            passed as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        let avg_duration_ms = if total > 0 {
            results.iter().map(|r| r.duration_ms).sum::<f64>() / total as f64
        } else {
            0.0
        };

        TestReport {
            total,
            passed,
            failed,
            pass_rate,
            avg_duration_ms,
            failures: results.iter().filter(|r| !r.passed).cloned().collect(),
        }
    }

    /// Convert a failing result into an incident payload for the
    /// engine. Timeouts rank higher than plain failures.
    pub fn create_incident(&self, result: &TestResult) -> Value {
        let severity = if field_is_truthy(&result.details, "timeout") {
            7
        } else {
            5
        };
        json!({
            "type": "module_test_failure",
            "module_id": result.module_id,
            "severity": severity,
            "details": result.details,
            "timestamp": result.timestamp,
            "action": "repair",
        })
    }
}

async fn run_one(
    sandbox: Arc<dyn Sandbox>,
    limits: SandboxLimits,
    module_path: &str,
    payload: Option<Value>,
) -> TestResult {
    let payload = payload.unwrap_or_else(|| json!({}));
    let start = Instant::now();
    let outcome = sandbox
        .run_module(module_path, TEST_ENTRY, &payload, &limits)
        .await;
    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
    result_from_outcome(module_path, &outcome, duration_ms)
}

fn result_from_outcome(module_id: &str, outcome: &SandboxOutcome, duration_ms: f64) -> TestResult {
    let details = serde_json::to_value(outcome)
        .unwrap_or_else(|_| json!({"error": "unserializable sandbox outcome"}));
    TestResult {
        module_id: module_id.to_string(),
        passed: outcome.ok,
        duration_ms,
        details,
        timestamp: Utc::now().to_rfc3339(),
    }
}

fn failed_result(module_id: &str, error: &str) -> TestResult {
    TestResult {
        module_id: module_id.to_string(),
        passed: false,
        duration_ms: 0.0,
        details: json!({"error": error}),
        timestamp: Utc::now().to_rfc3339(),
    }
}

/// Mirrors loose truthiness for protocol fields: absent, null, false,
/// and empty-string all count as unset.
fn field_is_truthy(value: &Value, key: &str) -> bool {
    match value.get(key) {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Sandbox stub returning a fixed outcome for every module.
    struct StubSandbox {
        outcome: SandboxOutcome,
    }

    #[async_trait]
    impl Sandbox for StubSandbox {
        async fn run_module(
            &self,
            _module_path: &str,
            _entry: &str,
            _payload: &Value,
            _limits: &SandboxLimits,
        ) -> SandboxOutcome {
            self.outcome.clone()
        }
    }

    fn tester_with(outcome: SandboxOutcome) -> AutonomousTester {
        AutonomousTester::new(Arc::new(StubSandbox { outcome }), 4)
    }

    fn ok_outcome() -> SandboxOutcome {
        SandboxOutcome {
            ok: true,
            result: Some(json!({"ok": true})),
            error: None,
            timeout: None,
            entry_missing: None,
        }
    }

    #[tokio::test]
    async fn test_passing_module() {
        let tester = tester_with(ok_outcome());
        let result = tester.test_module("mod.py", None).await;

        assert!(result.passed);
        assert_eq!(result.module_id, "mod.py");
        assert_eq!(result.details["ok"], json!(true));
    }

    #[tokio::test]
    async fn test_failing_module() {
        let tester = tester_with(SandboxOutcome::failure("boom".to_string()));
        let result = tester.test_module("mod.py", None).await;

        assert!(!result.passed);
        assert_eq!(result.details["error"], json!("boom"));
    }

    #[tokio::test]
    async fn test_batch_returns_every_module_and_retains_results() {
        let tester = tester_with(ok_outcome());
        let paths: Vec<String> = (0..5).map(|i| format!("m{}.py", i)).collect();

        let results = tester.test_batch(&paths, None).await;
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| r.passed));
        assert_eq!(tester.all_results().len(), 5);
    }

    #[test]
    fn test_validate_output_rejects_non_object() {
        let tester = tester_with(ok_outcome());
        let report = tester.validate_output(&json!([1, 2, 3]));
        assert!(!report.valid);
        assert_eq!(report.issues, vec!["Output is not a JSON object"]);
    }

    #[test]
    fn test_validate_output_requires_ok_or_status() {
        let tester = tester_with(ok_outcome());

        let report = tester.validate_output(&json!({"data": 1}));
        assert!(!report.valid);
        assert!(report.issues.contains(&"Missing ok/status field".to_string()));

        assert!(tester.validate_output(&json!({"status": "done"})).valid);
        assert!(tester.validate_output(&json!({"ok": false})).valid);
    }

    #[test]
    fn test_validate_output_flags_error_with_ok_true() {
        let tester = tester_with(ok_outcome());

        let report = tester.validate_output(&json!({"ok": true, "error": "bad"}));
        assert!(!report.valid);
        assert!(report
            .issues
            .contains(&"Error present but ok=true".to_string()));

        // ok=false alongside an error is consistent
        assert!(tester
            .validate_output(&json!({"ok": false, "error": "bad"}))
            .valid);
    }

    #[test]
    fn test_detects_slow_execution() {
        let tester = tester_with(ok_outcome());
        let result = TestResult {
            module_id: "m.py".to_string(),
            passed: true,
            duration_ms: 1500.0,
            details: json!({"ok": true}),
            timestamp: Utc::now().to_rfc3339(),
        };

        let report = tester.detect_performance_anomaly(&result, DEFAULT_ANOMALY_THRESHOLD_MS);
        assert!(report.has_anomaly);
        assert!(report.anomalies[0].starts_with("Slow execution"));
    }

    #[test]
    fn test_detects_internal_timeout() {
        let tester = tester_with(ok_outcome());
        let result = TestResult {
            module_id: "m.py".to_string(),
            passed: false,
            duration_ms: 10.0,
            details: json!({"ok": false, "timeout": true}),
            timestamp: Utc::now().to_rfc3339(),
        };

        let report = tester.detect_performance_anomaly(&result, DEFAULT_ANOMALY_THRESHOLD_MS);
        assert_eq!(report.anomalies, vec!["Execution timed out"]);
    }

    #[test]
    fn test_fast_clean_run_has_no_anomaly() {
        let tester = tester_with(ok_outcome());
        let result = TestResult {
            module_id: "m.py".to_string(),
            passed: true,
            duration_ms: 12.0,
            details: json!({"ok": true}),
            timestamp: Utc::now().to_rfc3339(),
        };

        assert!(!tester
            .detect_performance_anomaly(&result, DEFAULT_ANOMALY_THRESHOLD_MS)
            .has_anomaly);
    }

    #[test]
    fn test_incident_severity_depends_on_timeout() {
        let tester = tester_with(ok_outcome());

        let timed_out = failed_result("m.py", "x");
        let mut with_timeout = timed_out.clone();
        with_timeout.details = json!({"timeout": true});

        assert_eq!(tester.create_incident(&with_timeout)["severity"], json!(7));
        assert_eq!(tester.create_incident(&timed_out)["severity"], json!(5));
        assert_eq!(
            tester.create_incident(&timed_out)["type"],
            json!("module_test_failure")
        );
        assert_eq!(tester.create_incident(&timed_out)["action"], json!("repair"));
    }

    #[test]
    fn test_report_rates() {
        let tester = tester_with(ok_outcome());
        let mut results = vec![failed_result("a.py", "x")];
        let mut ok = failed_result("b.py", "unused");
        ok.passed = true;
        ok.duration_ms = 30.0;
        results.push(ok.clone());
        results.push(ok);

        let report = tester.generate_report(&results);
        assert_eq!(report.total, 3);
        assert_eq!(report.passed, 2);
        assert_eq!(report.failed, 1);
        assert!((report.pass_rate - 66.666).abs() < 0.01);
        assert_eq!(report.failures.len(), 1);
    }

    #[test]
    fn test_empty_report_is_all_zero() {
        let tester = tester_with(ok_outcome());
        let report = tester.generate_report(&[]);
        assert_eq!(report.total, 0);
        assert_eq!(report.pass_rate, 0.0);
        assert_eq!(report.avg_duration_ms, 0.0);
    }
}
