//! teebox: confidential execution sessions over pluggable isolation backends
//!
//! A session loads an algorithm and its data into an isolated context,
//! checks both against expected SHA-256 digests, runs the algorithm only
//! after that check succeeds, and always releases the context.
//!
//! # Architecture
//!
//! ## Sessions ([`session`])
//! - [`session::controller`]: Runtime-checked lifecycle state machine
//! - [`session::typed`]: Type-state enforced lifecycle ordering
//!
//! ## Integrity ([`integrity`])
//! - [`integrity::verifier`]: SHA-256 digests and payload verification
//!
//! ## Backends ([`backend`])
//! - [`backend::adapter`]: Common execution contract
//! - [`backend::folder`]: Local workspace folder
//! - [`backend::sibling`]: Peer container on the host runtime
//! - [`backend::enclave`]: SGX enclave through a loader
//! - [`backend::process`]: Bounded subprocess execution
//!
//! ## Safety ([`safety`])
//! - [`safety::workspace`]: Run-scoped payload staging
//!
//! ## Data sources ([`storage`])
//! - [`storage::source`]: Collaborator contract and credentials
//! - [`storage::fs`]: Filesystem-backed blob store
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: Structured lifecycle events
//!
//! ## Configuration ([`config`])
//! - [`config::loader`]: teebox.json loading and validation
//! - [`config::types`]: Shared enums and error types
//!
//! ## Testing Infrastructure ([`testing`])
//! - [`testing::scripted`]: In-process backend with fault injection

// Sessions
pub mod session;

// Integrity
pub mod integrity;

// Backends
pub mod backend;

// Safety
pub mod safety;

// Data sources
pub mod storage;

// Observability
pub mod observability;

// Configuration
pub mod config;

// Testing Infrastructure
pub mod testing;

// CLI entrypoint wiring for the teebox binary
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
pub use session::{Session, TeeSession};
