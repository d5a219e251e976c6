/// Core types and structures for the teebox system
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Isolation substrate a session runs on
/// Fixed at session construction, never re-selected mid-lifecycle
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BackendType {
    /// Sandboxed folder execution on the local host
    DockerFolder,
    /// Peer container on the host container runtime (needs the control socket bound in)
    SiblingContainer,
    /// CPU-based memory isolation (SGX)
    HardwareEnclave,
}

impl BackendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::DockerFolder => "docker_folder",
            BackendType::SiblingContainer => "sibling_container",
            BackendType::HardwareEnclave => "hardware_enclave",
        }
    }
}

impl Default for BackendType {
    fn default() -> Self {
        BackendType::DockerFolder
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendType {
    type Err = TeeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docker_folder" | "docker-folder" | "docker" | "folder" => Ok(BackendType::DockerFolder),
            "sibling_container" | "sibling-container" | "sibling" => {
                Ok(BackendType::SiblingContainer)
            }
            "hardware_enclave" | "hardware-enclave" | "sgx" | "enclave" => {
                Ok(BackendType::HardwareEnclave)
            }
            other => Err(TeeError::Config(format!("unknown backend type: {other}"))),
        }
    }
}

/// Session lifecycle state
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Created,
    Loaded,
    Verified,
    Executed,
    Destroyed,
    /// Absorbing error state; only `destroy` leaves it
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Created => "created",
            SessionState::Loaded => "loaded",
            SessionState::Verified => "verified",
            SessionState::Executed => "executed",
            SessionState::Destroyed => "destroyed",
            SessionState::Failed => "failed",
        }
    }

    /// A backend handle may be alive in this state
    pub fn holds_backend(&self) -> bool {
        !matches!(self, SessionState::Uninitialized | SessionState::Destroyed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle operation names, used in precondition errors and audit events
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Upload,
    Verify,
    Execute,
    Destroy,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Create => "create",
            Operation::Upload => "upload",
            Operation::Verify => "verify",
            Operation::Execute => "execute",
            Operation::Destroy => "destroy",
        };
        f.write_str(name)
    }
}

/// Which payload a digest belongs to
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum PayloadRef {
    Algorithm,
    /// Zero-based ordinal in the uploaded data list
    Data(usize),
}

impl fmt::Display for PayloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadRef::Algorithm => f.write_str("algorithm"),
            PayloadRef::Data(idx) => write!(f, "data[{idx}]"),
        }
    }
}

/// Error taxonomy shared by the controller and every backend
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BackendUnavailable,
    InvalidInput,
    ArityMismatch,
    TransferError,
    IntegrityViolation,
    ExecutionFault,
    TeardownError,
    InvalidState,
    Config,
    Storage,
}

/// Custom error types for teebox
#[derive(Error, Debug)]
pub enum TeeError {
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Arity mismatch: {actual} data hashes supplied for {expected} uploaded payloads")]
    ArityMismatch { expected: usize, actual: usize },

    #[error("Transfer error: {0}")]
    TransferError(String),

    #[error("Integrity violation on {payload}: expected {expected:?}, computed {computed}")]
    IntegrityViolation {
        payload: PayloadRef,
        expected: String,
        computed: String,
    },

    #[error("Execution fault: {0}")]
    ExecutionFault(String),

    #[error("Teardown error: {0}")]
    TeardownError(String),

    #[error("Cannot {operation} from state {state}")]
    InvalidState {
        operation: Operation,
        state: SessionState,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl TeeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TeeError::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
            TeeError::InvalidInput(_) => ErrorKind::InvalidInput,
            TeeError::ArityMismatch { .. } => ErrorKind::ArityMismatch,
            TeeError::TransferError(_) => ErrorKind::TransferError,
            TeeError::IntegrityViolation { .. } => ErrorKind::IntegrityViolation,
            TeeError::ExecutionFault(_) => ErrorKind::ExecutionFault,
            TeeError::TeardownError(_) => ErrorKind::TeardownError,
            TeeError::InvalidState { .. } => ErrorKind::InvalidState,
            TeeError::Config(_) => ErrorKind::Config,
            TeeError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Whether the caller may reasonably retry the failed step
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TransferError | ErrorKind::TeardownError
        )
    }
}

/// Convert errors to process exit codes
impl From<&TeeError> for i32 {
    fn from(err: &TeeError) -> i32 {
        match err.kind() {
            ErrorKind::InvalidInput | ErrorKind::ArityMismatch => 64, // EX_USAGE
            ErrorKind::Storage => 66,                                 // EX_NOINPUT
            ErrorKind::BackendUnavailable => 69,                      // EX_UNAVAILABLE
            ErrorKind::ExecutionFault => 70,                          // EX_SOFTWARE
            ErrorKind::TransferError | ErrorKind::TeardownError => 74, // EX_IOERR
            ErrorKind::IntegrityViolation => 65,                      // EX_DATAERR
            ErrorKind::InvalidState => 75,                            // EX_TEMPFAIL
            ErrorKind::Config => 78,                                  // EX_CONFIG
        }
    }
}

/// Errors reported by a data-source collaborator
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("quota exceeded: {used} of {quota} bytes used, {requested} more requested")]
    QuotaExceeded {
        quota: u64,
        used: u64,
        requested: u64,
    },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("storage configuration error: {0}")]
    Config(String),

    #[error("storage IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for teebox operations
pub type Result<T> = std::result::Result<T, TeeError>;
