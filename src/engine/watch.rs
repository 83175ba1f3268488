//! Continuous Watch
//!
//! Directory polling for watch mode. Each cycle discovers every Python
//! module under the watch root, batch tests them through the tester's
//! bounded fan-out, and hands each failing module to the repair
//! pipeline in sequence.

use std::path::Path;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::autonomy::AutonomyEngine;

/// Counts from a single watch cycle.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct ScanSummary {
    pub tested: usize,
    pub failed: usize,
    pub repaired: usize,
}

/// Every `.py` file under `root`, sorted for a stable cycle order.
pub fn discover_modules(root: &Path) -> Vec<String> {
    let mut modules: Vec<String> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .map(|ext| ext == "py")
                .unwrap_or(false)
        })
        .filter_map(|entry| entry.path().to_str().map(String::from))
        .collect();
    modules.sort();
    modules
}

/// One poll of the watch directory: test everything, repair failures.
pub async fn scan_cycle(engine: &AutonomyEngine, watch_dir: &str) -> Result<ScanSummary> {
    let modules = discover_modules(Path::new(watch_dir));
    let mut summary = ScanSummary {
        tested: modules.len(),
        ..ScanSummary::default()
    };
    if modules.is_empty() {
        debug!("No modules found under {}", watch_dir);
        return Ok(summary);
    }

    let results = engine.tester().test_batch(&modules, None).await;
    for result in results.iter().filter(|r| !r.passed) {
        summary.failed += 1;
        let outcome = engine.handle_incident(&result.module_id).await?;
        if outcome.repaired {
            summary.repaired += 1;
        } else {
            warn!(
                "Module {} not repaired: {}",
                result.module_id,
                outcome.reason.as_deref().unwrap_or("unknown")
            );
        }
    }
    Ok(summary)
}
