//! Integrity verification
//!
//! SHA-256 content digests gating the execute step.

pub mod verifier;

pub use verifier::{compute_hash, verify, verify_payloads, VerificationRecord};
