use crate::config::types::{BackendType, Result};

/// Execution backend contract shared by every isolation variant.
///
/// The session controller owns exactly one backend and calls these methods in
/// lifecycle order; implementations report failures in the shared
/// [`TeeError`](crate::TeeError) taxonomy so the controller stays
/// backend-agnostic.
pub trait ExecutionBackend: Send {
    fn backend_type(&self) -> BackendType;

    /// Provision the isolated context. Fails with `BackendUnavailable`.
    fn create(&mut self) -> Result<()>;

    /// Replace the isolated context's payloads. Fails with `TransferError`.
    fn upload(&mut self, algorithm: &[u8], data: &[Vec<u8>]) -> Result<()>;

    /// Run the algorithm on the uploaded data. Fails with `ExecutionFault`.
    fn execute(&mut self) -> Result<Vec<u8>>;

    /// Release the isolated context. Must tolerate repeated calls.
    /// Fails with `TeardownError`.
    fn destroy(&mut self) -> Result<()>;
}
