//! Autonomy Engine
//!
//! Orchestrates the full incident lifecycle over a single module:
//! inspect, gate on severity, snapshot, patch, re-test in the sandbox,
//! then finalize or roll back. Every decision point appends to the
//! audit log, so the trail survives even when the outcome is a skip.
//!
//! Privileged follow-on actions (promoting a repaired module into a
//! live directory) pass through the security layer: the engine entity
//! must hold the promote capability and, because promote is always
//! approval gated, an explicitly approved request.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::config::{self, MenderConfig};
use crate::incident::{AuditLog, IncidentHandler};
use crate::inspector::StaticInspector;
use crate::repair::RepairEngine;
use crate::sandbox::ProcessSandbox;
use crate::security::{SecurityLayer, DEFAULT_TOKEN_TTL_SECS};
use crate::tester::AutonomousTester;
use crate::types::{RepairOutcome, Sandbox};

use super::watch;

/// Entity the engine acts as when it talks to the security layer.
pub const ENGINE_ENTITY: &str = "autonomy-engine";

pub struct AutonomyEngine {
    inspector: StaticInspector,
    repair: RepairEngine,
    incidents: IncidentHandler,
    audit: AuditLog,
    tester: AutonomousTester,
    security: Arc<SecurityLayer>,
    entity_id: String,
    severity_threshold: u8,
}

impl AutonomyEngine {
    /// Build an engine over the process sandbox. The engine issues
    /// itself an autonomy tier token; promotion additionally needs an
    /// admin token for [`ENGINE_ENTITY`] plus an approved request.
    pub fn new(config: &MenderConfig, security: Arc<SecurityLayer>) -> Result<Self> {
        let sandbox: Arc<dyn Sandbox> = Arc::new(ProcessSandbox::new(&config.python_bin));
        Self::with_sandbox(config, security, sandbox)
    }

    /// Same as [`AutonomyEngine::new`] but over a caller-supplied
    /// sandbox.
    pub fn with_sandbox(
        config: &MenderConfig,
        security: Arc<SecurityLayer>,
        sandbox: Arc<dyn Sandbox>,
    ) -> Result<Self> {
        let data_dir = PathBuf::from(config::resolve_path(&config.data_dir));
        let incidents = IncidentHandler::new(&data_dir)?;
        let audit = AuditLog::new(data_dir.join("audit.log"));
        let tester = AutonomousTester::new(sandbox, config.max_test_workers);
        security
            .issue_token(ENGINE_ENTITY, "autonomy", DEFAULT_TOKEN_TTL_SECS)
            .context("Failed to issue the engine token")?;

        Ok(AutonomyEngine {
            inspector: StaticInspector::new()?,
            repair: RepairEngine::new(),
            incidents,
            audit,
            tester,
            security,
            entity_id: ENGINE_ENTITY.to_string(),
            severity_threshold: config.severity_threshold,
        })
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn tester(&self) -> &AutonomousTester {
        &self.tester
    }

    pub fn incidents(&self) -> &IncidentHandler {
        &self.incidents
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Run the full repair pipeline on one module. Steps are strictly
    /// sequential; every terminal state carries an explicit `repaired`
    /// flag, with a reason on failure.
    pub async fn handle_incident(&self, module_path: &str) -> Result<RepairOutcome> {
        self.audit
            .append("incident_start", json!({"module": module_path}))?;

        let report = self.inspector.inspect(module_path);
        if report.severity < self.severity_threshold {
            self.audit
                .append("incident_skip", json!({"reason": "low_severity"}))?;
            return Ok(RepairOutcome::not_repaired("Severity below threshold"));
        }

        let incident =
            self.incidents
                .log_incident(module_path, report.severity, report.issues.clone())?;
        let snapshot_id = self.incidents.create_snapshot(module_path)?;

        let patch = self.repair.generate_patch(&report.issues);
        if patch.is_empty() {
            self.audit
                .append("no_patch", json!({"incident": incident.id}))?;
            return Ok(RepairOutcome::not_repaired("No applicable repairs"));
        }

        if !self.incidents.apply_patch(module_path, &patch) {
            self.audit
                .append("patch_failed", json!({"incident": incident.id}))?;
            return Ok(RepairOutcome::not_repaired("Patch application failed"));
        }

        let test_result = self.tester.test_module(module_path, None).await;
        if !test_result.passed {
            if !self.incidents.rollback(module_path, &snapshot_id) {
                warn!(
                    "Rollback of {} failed: snapshot {} not found",
                    module_path, snapshot_id
                );
            }
            self.audit
                .append("rollback", json!({"incident": incident.id}))?;
            let mut outcome = RepairOutcome::not_repaired("Post-repair test failed");
            outcome.rolled_back = Some(true);
            return Ok(outcome);
        }

        self.audit
            .append("repair_success", json!({"incident": incident.id}))?;
        info!("Repaired {} under incident {}", module_path, incident.id);
        Ok(RepairOutcome {
            repaired: true,
            reason: None,
            incident_id: Some(incident.id),
            snapshot_id: Some(snapshot_id),
            patch: Some(patch),
            test_passed: Some(true),
            rolled_back: None,
        })
    }

    /// Copy a module into a live directory. Refused unless the engine
    /// entity holds the promote capability and a matching approval has
    /// been granted.
    pub fn promote_module(&self, src_path: &str, dst_dir: &str) -> bool {
        if !self.security.check_capability(&self.entity_id, "promote") {
            warn!(
                "Promotion refused: '{}' lacks the promote capability",
                self.entity_id
            );
            return false;
        }
        if self.security.requires_approval("promote")
            && !self.security.has_approved(&self.entity_id, "promote")
        {
            warn!(
                "Promotion refused: no approved request for '{}'",
                self.entity_id
            );
            return false;
        }

        match self.copy_to_live(src_path, dst_dir) {
            Ok(dst) => {
                info!("Promoted {} to {}", src_path, dst.display());
                true
            }
            Err(e) => {
                error!("Promotion failed: {:#}", e);
                false
            }
        }
    }

    /// Poll `watch_dir` forever: test every module each cycle and run
    /// the repair pipeline on any that fail. Intended to run as a
    /// long-lived background process.
    pub async fn run_continuous(&self, watch_dir: &str, interval_s: u64) -> Result<()> {
        info!("Watching {} every {}s", watch_dir, interval_s);
        let mut ticker = interval(Duration::from_secs(interval_s.max(1)));
        loop {
            ticker.tick().await;
            let summary = watch::scan_cycle(self, watch_dir).await?;
            if summary.tested > 0 {
                info!(
                    "Watch cycle: {} module(s) tested, {} failed, {} repaired",
                    summary.tested, summary.failed, summary.repaired
                );
            }
        }
    }

    fn copy_to_live(&self, src_path: &str, dst_dir: &str) -> Result<PathBuf> {
        let src = Path::new(src_path);
        let name = src
            .file_name()
            .with_context(|| format!("'{}' has no file name", src_path))?;
        fs::create_dir_all(dst_dir).with_context(|| format!("Failed to create {}", dst_dir))?;
        let dst = Path::new(dst_dir).join(name);
        fs::copy(src, &dst)
            .with_context(|| format!("Failed to copy {} to {}", src_path, dst.display()))?;
        self.audit.append(
            "promote",
            json!({"src": src_path, "dst": dst.display().to_string()}),
        )?;
        Ok(dst)
    }
}
