//! Sandbox Module
//!
//! Isolated execution for untrusted modules. The `Sandbox` trait in
//! `types` fixes the interface; this module provides the process-based
//! implementation used in production.

pub mod process;

pub use process::ProcessSandbox;
