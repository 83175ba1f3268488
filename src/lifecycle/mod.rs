//! Lifecycle
//!
//! Named entry point contract for managed modules. The host keeps an
//! explicit registry and resolves phases through it, so a missing or
//! failing hook surfaces as a typed error instead of a loader
//! exception.

pub mod host;

pub use host::{LifecycleError, ModuleHost, PhaseReport, RegisteredModule};
