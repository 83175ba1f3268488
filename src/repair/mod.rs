//! Repair Module
//!
//! Rule-driven patch generation. Translates inspection findings into
//! literal replacement patches; application and rollback live with the
//! incident handler.

pub mod rules;

pub use rules::RepairEngine;
