//! Security Module
//!
//! Signed capability tokens and the tiered enforcement layer with its
//! approval workflow. The signing secret comes from configuration;
//! there is no built-in default.

pub mod layer;
pub mod token;

pub use layer::{SecurityLayer, DEFAULT_TOKEN_TTL_SECS};
pub use token::{generate_secret, CapabilityToken};
