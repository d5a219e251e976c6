//! Observability
//!
//! Structured lifecycle audit events for every session.

pub mod audit;
