//! Configuration and shared types
//!
//! Backend selection, execution limits, and the error taxonomy.

pub mod loader;
pub mod types;

pub use loader::{EnclaveConfig, ExecutionLimits, SiblingConfig, TeeConfig};
