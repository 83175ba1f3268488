//! Incident Store
//!
//! Durable record of repair attempts: one JSON file per incident plus
//! pre-patch file snapshots for rollback. Ids embed a millisecond
//! timestamp and are allocated monotonically, so incidents created in
//! the same millisecond never collide.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::error;

use crate::types::{Incident, Issue, Patch};

pub struct IncidentHandler {
    incidents_dir: PathBuf,
    snapshots_dir: PathBuf,
    last_stamp: Mutex<i64>,
}

impl IncidentHandler {
    /// Create a handler rooted at `data_dir`, creating the incident and
    /// snapshot directories if needed.
    pub fn new(data_dir: &Path) -> Result<Self> {
        let incidents_dir = data_dir.join("incidents");
        let snapshots_dir = data_dir.join("snapshots");
        for dir in [&incidents_dir, &snapshots_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        Ok(IncidentHandler {
            incidents_dir,
            snapshots_dir,
            last_stamp: Mutex::new(0),
        })
    }

    /// Millisecond stamp for ids, bumped past the previous one when the
    /// clock has not advanced.
    fn next_stamp(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut last = self.last_stamp.lock().unwrap();
        let stamp = if now > *last { now } else { *last + 1 };
        *last = stamp;
        stamp
    }

    /// Record an incident. Written once, never mutated or deleted.
    pub fn log_incident(
        &self,
        module_path: &str,
        severity: u8,
        issues: Vec<Issue>,
    ) -> Result<Incident> {
        let incident = Incident {
            id: format!("INC-{}", self.next_stamp()),
            module_path: module_path.to_string(),
            severity,
            issues,
            logged_at: Utc::now().to_rfc3339(),
        };

        let path = self.incidents_dir.join(format!("{}.json", incident.id));
        let json = serde_json::to_string_pretty(&incident)
            .context("Failed to serialize incident")?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write incident {}", incident.id))?;

        Ok(incident)
    }

    /// Copy the module aside before patching. The id is returned even
    /// when the module does not exist; rollback then simply finds no
    /// snapshot file.
    pub fn create_snapshot(&self, module_path: &str) -> Result<String> {
        let snapshot_id = format!("SNAP-{}", self.next_stamp());
        let src = Path::new(module_path);
        if src.exists() {
            let name = src
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "module".to_string());
            let dst = self.snapshots_dir.join(format!("{}_{}", snapshot_id, name));
            fs::copy(src, &dst)
                .with_context(|| format!("Failed to snapshot {}", module_path))?;
        }
        Ok(snapshot_id)
    }

    /// Apply a patch in place. Each replacement rewrites every
    /// occurrence of its needle. Returns false on any I/O failure; the
    /// write is only attempted after a successful read, so a failed
    /// apply leaves the module untouched.
    pub fn apply_patch(&self, module_path: &str, patch: &Patch) -> bool {
        let code = match fs::read_to_string(module_path) {
            Ok(c) => c,
            Err(e) => {
                error!("Patch failed reading {}: {}", module_path, e);
                return false;
            }
        };

        let mut patched = code;
        for replacement in &patch.replacements {
            patched = patched.replace(&replacement.old, &replacement.new);
        }

        if let Err(e) = fs::write(module_path, patched) {
            error!("Patch failed writing {}: {}", module_path, e);
            return false;
        }
        true
    }

    /// Restore the module from a snapshot. Returns false when the
    /// snapshot is missing or the copy fails.
    pub fn rollback(&self, module_path: &str, snapshot_id: &str) -> bool {
        let prefix = format!("{}_", snapshot_id);
        let entries = match fs::read_dir(&self.snapshots_dir) {
            Ok(e) => e,
            Err(e) => {
                error!("Rollback failed listing snapshots: {}", e);
                return false;
            }
        };

        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(&prefix) {
                return match fs::copy(entry.path(), module_path) {
                    Ok(_) => true,
                    Err(e) => {
                        error!("Rollback of {} failed: {}", module_path, e);
                        false
                    }
                };
            }
        }
        false
    }

    /// The most recent `limit` incidents, newest first. Ids embed the
    /// creation stamp, so lexicographic order on the fixed-width part
    /// matches time order.
    pub fn recent_incidents(&self, limit: usize) -> Vec<Incident> {
        let entries = match fs::read_dir(&self.incidents_dir) {
            Ok(e) => e,
            Err(_) => return Vec::new(),
        };

        let mut incidents: Vec<Incident> = entries
            .flatten()
            .filter_map(|entry| fs::read_to_string(entry.path()).ok())
            .filter_map(|contents| serde_json::from_str(&contents).ok())
            .collect();

        incidents.sort_by(|a, b| b.id.cmp(&a.id));
        incidents.truncate(limit);
        incidents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Replacement;

    fn handler(dir: &tempfile::TempDir) -> IncidentHandler {
        IncidentHandler::new(dir.path()).unwrap()
    }

    #[test]
    fn test_log_incident_writes_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = handler(&dir);

        let incident = store
            .log_incident("mod.py", 8, vec![Issue::textual("eval_usage", 8, 0, "eval(")])
            .unwrap();

        assert!(incident.id.starts_with("INC-"));
        let file = dir.path().join("incidents").join(format!("{}.json", incident.id));
        let contents = fs::read_to_string(file).unwrap();
        let parsed: Incident = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.module_path, "mod.py");
        assert_eq!(parsed.severity, 8);
        assert_eq!(parsed.issues.len(), 1);
    }

    #[test]
    fn test_incident_ids_are_unique_under_rapid_logging() {
        let dir = tempfile::tempdir().unwrap();
        let store = handler(&dir);

        let mut ids = std::collections::HashSet::new();
        for _ in 0..20 {
            let incident = store.log_incident("mod.py", 5, Vec::new()).unwrap();
            assert!(ids.insert(incident.id));
        }
    }

    #[test]
    fn test_snapshot_and_rollback_restore_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = handler(&dir);

        let module = dir.path().join("module.py");
        fs::write(&module, "original = True\n").unwrap();
        let module_path = module.to_string_lossy().to_string();

        let snapshot_id = store.create_snapshot(&module_path).unwrap();
        fs::write(&module, "mutated = True\n").unwrap();

        assert!(store.rollback(&module_path, &snapshot_id));
        assert_eq!(fs::read_to_string(&module).unwrap(), "original = True\n");
    }

    #[test]
    fn test_rollback_without_snapshot_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let store = handler(&dir);
        assert!(!store.rollback("/tmp/whatever.py", "SNAP-0"));
    }

    #[test]
    fn test_apply_patch_replaces_all_occurrences() {
        let dir = tempfile::tempdir().unwrap();
        let store = handler(&dir);

        let module = dir.path().join("module.py");
        fs::write(&module, "a = eval(x)\nb = eval(y)\n").unwrap();
        let module_path = module.to_string_lossy().to_string();

        let patch = Patch {
            replacements: vec![Replacement {
                old: "eval(".to_string(),
                new: "ast.literal_eval(".to_string(),
            }],
        };

        assert!(store.apply_patch(&module_path, &patch));
        let patched = fs::read_to_string(&module).unwrap();
        assert_eq!(patched.matches("ast.literal_eval(").count(), 2);
    }

    #[test]
    fn test_apply_patch_missing_file_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let store = handler(&dir);
        let patch = Patch::default();
        assert!(!store.apply_patch("/nonexistent/module.py", &patch));
    }

    #[test]
    fn test_recent_incidents_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = handler(&dir);

        let first = store.log_incident("a.py", 5, Vec::new()).unwrap();
        let second = store.log_incident("b.py", 6, Vec::new()).unwrap();

        let recent = store.recent_incidents(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, second.id);
        assert_eq!(recent[1].id, first.id);
    }
}
