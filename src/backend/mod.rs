//! Execution backends.
//!
//! The session controller stays backend-agnostic. Each variant provisions
//! its own isolation and reports failures in the shared error taxonomy.

pub mod adapter;
pub mod enclave;
pub mod folder;
pub mod process;
pub mod sibling;

pub use adapter::ExecutionBackend;

use crate::config::types::BackendType;
use crate::config::TeeConfig;
use enclave::EnclaveBackend;
use folder::FolderBackend;
use sibling::SiblingBackend;

/// Build the backend for `backend_type`. Nothing is provisioned until `create`.
pub fn adapter_for(backend_type: BackendType, config: &TeeConfig) -> Box<dyn ExecutionBackend> {
    match backend_type {
        BackendType::DockerFolder => Box::new(FolderBackend::new(config)),
        BackendType::SiblingContainer => Box::new(SiblingBackend::new(config)),
        BackendType::HardwareEnclave => Box::new(EnclaveBackend::new(config)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_for_matches_type() {
        let config = TeeConfig::default();
        for backend_type in [
            BackendType::DockerFolder,
            BackendType::SiblingContainer,
            BackendType::HardwareEnclave,
        ] {
            assert_eq!(adapter_for(backend_type, &config).backend_type(), backend_type);
        }
    }
}
