//! Incident Module
//!
//! Persistence for the repair lifecycle: the incident store with its
//! rollback snapshots, and the append-only audit log every lifecycle
//! decision is written to.

pub mod audit;
pub mod store;

pub use audit::AuditLog;
pub use store::IncidentHandler;
