//! Tester Module
//!
//! Sandbox-backed module testing: single runs, bounded batch fan-out,
//! output validation, anomaly detection, and incident conversion for
//! failures.

pub mod runner;

pub use runner::{AutonomousTester, DEFAULT_ANOMALY_THRESHOLD_MS};
