//! Mender -- Autonomous Self-Repair Runtime
//!
//! A pipeline that inspects Python modules for unsafe and inefficient
//! patterns, applies rule-based textual patches, re-tests the patched
//! module inside an isolated sandbox, and rolls back on failure.
//! Privileged follow-on actions are gated by signed capability tokens
//! and an explicit approval workflow.

pub mod types;
pub mod config;
pub mod inspector;
pub mod repair;
pub mod incident;
pub mod security;
pub mod sandbox;
pub mod tester;
pub mod workers;
pub mod lifecycle;
pub mod engine;
