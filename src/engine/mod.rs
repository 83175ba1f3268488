//! Engine
//!
//! The orchestration layer. The autonomy engine drives the incident
//! pipeline end to end, and watch mode keeps it running over a
//! directory of modules.

pub mod autonomy;
pub mod watch;

pub use autonomy::{AutonomyEngine, ENGINE_ENTITY};
pub use watch::{discover_modules, scan_cycle, ScanSummary};
