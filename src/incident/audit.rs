//! Repair Audit Log
//!
//! Append-only ledger of every lifecycle decision: incident starts,
//! skips, patch outcomes, rollbacks, promotions. One JSON object per
//! line; appends are serialized so concurrent repairs never interleave
//! partial lines.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;

pub struct AuditLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: PathBuf) -> Self {
        AuditLog {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Append one event. `fields` must be a JSON object (or null for
    /// none); the action and timestamp are filled in here.
    pub fn append(&self, action: &str, fields: Value) -> Result<()> {
        let mut entry = serde_json::Map::new();
        entry.insert("action".to_string(), Value::String(action.to_string()));
        if let Value::Object(map) = fields {
            for (key, value) in map {
                entry.insert(key, value);
            }
        }
        entry.insert(
            "timestamp".to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );

        let line = serde_json::to_string(&Value::Object(entry))
            .context("Failed to serialize audit event")?;

        let _guard = self.write_lock.lock().unwrap();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open audit log: {}", self.path.display()))?;
        writeln!(file, "{}", line).context("Failed to append audit event")?;

        Ok(())
    }

    /// The most recent `limit` events, newest first. A missing log is
    /// an empty history, not an error.
    pub fn recent(&self, limit: usize) -> Vec<Value> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };

        let mut events: Vec<Value> = contents
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        events.reverse();
        events.truncate(limit);
        events
    }

    /// Generate a human-readable report summarising recent activity.
    pub fn render_report(&self) -> String {
        let events = self.recent(50);

        if events.is_empty() {
            return "No audit events recorded.".to_string();
        }

        let mut report = String::from("=== Repair Audit Report ===\n\n");
        report.push_str(&format!("Total events shown: {}\n\n", events.len()));

        // Counts by action.
        let mut action_counts: std::collections::HashMap<String, u32> =
            std::collections::HashMap::new();
        for event in &events {
            let action = event
                .get("action")
                .and_then(|a| a.as_str())
                .unwrap_or("unknown")
                .to_string();
            *action_counts.entry(action).or_insert(0) += 1;
        }

        report.push_str("Breakdown by action:\n");
        for (action, count) in &action_counts {
            report.push_str(&format!("  {}: {}\n", action, count));
        }
        report.push('\n');

        // Individual events (most recent first).
        report.push_str("Recent events:\n");
        for event in &events {
            let timestamp = event
                .get("timestamp")
                .and_then(|t| t.as_str())
                .unwrap_or("-");
            let action = event
                .get("action")
                .and_then(|a| a.as_str())
                .unwrap_or("unknown");
            report.push_str(&format!("  [{}] {}\n", timestamp, action));
            if let Some(module) = event.get("module").and_then(|m| m.as_str()) {
                report.push_str(&format!("    module: {}\n", module));
            }
            if let Some(reason) = event.get("reason").and_then(|r| r.as_str()) {
                report.push_str(&format!("    reason: {}\n", reason));
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_append_and_recent() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.log"));

        log.append("incident_start", json!({"module": "a.py"})).unwrap();
        log.append("incident_skip", json!({"reason": "low_severity"}))
            .unwrap();

        let events = log.recent(10);
        assert_eq!(events.len(), 2);
        // Newest first
        assert_eq!(events[0]["action"], "incident_skip");
        assert_eq!(events[1]["action"], "incident_start");
        assert_eq!(events[1]["module"], "a.py");
        assert!(events[0]["timestamp"].is_string());
    }

    #[test]
    fn test_recent_respects_limit() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.log"));

        for i in 0..5 {
            log.append("repair_success", json!({"incident": format!("INC-{}", i)}))
                .unwrap();
        }

        let events = log.recent(3);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0]["incident"], "INC-4");
    }

    #[test]
    fn test_missing_log_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("absent.log"));
        assert!(log.recent(10).is_empty());
        assert_eq!(log.render_report(), "No audit events recorded.");
    }

    #[test]
    fn test_report_mentions_actions() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.log"));
        log.append("rollback", json!({"module": "b.py", "reason": "test_failed"}))
            .unwrap();

        let report = log.render_report();
        assert!(report.contains("rollback"));
        assert!(report.contains("module: b.py"));
    }
}
